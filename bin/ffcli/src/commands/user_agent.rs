use ffcli_client::Client;

pub async fn run(client: &Client, real: bool, tab: Option<i64>) -> anyhow::Result<i32> {
    println!("{}", client.get_user_agent(real, tab).await?);
    Ok(0)
}
