use std::path::Path;

use ffcli_client::cookies::parse_netscape;
use ffcli_client::Client;
use tracing::info;

pub async fn run(client: &Client, file: &Path, container: Option<&str>) -> anyhow::Result<i32> {
    let store_id = match container {
        Some(name) => Some(client.container_store(name).await?),
        None => None,
    };

    let text = tokio::fs::read_to_string(file).await?;
    let cookies = parse_netscape(&text)?;
    for cookie in &cookies {
        client.set_cookie(&cookie.to_browser(store_id.as_deref())).await?;
    }
    info!(count = cookies.len(), file = %file.display(), "imported cookies");
    Ok(0)
}
