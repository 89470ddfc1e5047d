use std::time::Duration;

use resilient_http::{
    transient_status, ClientOptions, HttpClientManager, QueryString, SendOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("RESILIENT_HTTP_DEMO_URL")?;

    let manager = HttpClientManager::with_options(ClientOptions::from_env()?);
    let client = manager
        .create_client()?
        .with_retry_on_result(transient_status);

    let body = client
        .get_string(
            &url,
            SendOptions::new()
                .query(QueryString::new().append("source", "demo"))
                .timeout(Duration::from_secs(5)),
        )
        .await?;

    println!("{} byte(s) from {url}", body.len());
    println!("{body}");

    Ok(())
}
