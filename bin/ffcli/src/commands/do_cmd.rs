use ffcli_client::Client;

use super::parse_maybe_json;

/// Call `function` and print every streamed result as one JSON line.
pub async fn run(client: &Client, function: &str, args: &[String]) -> anyhow::Result<i32> {
    let args = args.iter().map(|a| parse_maybe_json(a)).collect();
    let mut response = client.invoke(function, args);
    while let Some(item) = response.next().await {
        println!("{}", serde_json::to_string(&item?)?);
    }
    Ok(0)
}
