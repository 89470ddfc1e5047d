use std::time::Duration;

use resilient_http::{
    HttpClientManager, HttpError, RetryPolicy, SendOptions, Timeout, TransportHandler,
    TransportTuning,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base = std::env::var("RESILIENT_HTTP_DEMO_URL")?;

    let manager = HttpClientManager::new();
    manager.add_http_handler(
        "api",
        TransportHandler::with_tuning(TransportTuning {
            max_connections_per_endpoint: 4,
            ..TransportTuning::default()
        })?,
    )?;

    let client = manager
        .create_client_with(
            "api",
            Timeout::from_millis(2_000),
            RetryPolicy::new(3).with_base_backoff(Duration::from_millis(200)),
        )?
        .with_base_address(base);

    let status = client.get("/health", SendOptions::new()).await?.status();
    println!("health: {status}");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    match client
        .get("/slow", SendOptions::new().cancel_on(cancel))
        .await
    {
        Ok(response) => println!("slow: {}", response.status()),
        Err(HttpError::Cancelled) => println!("slow: cancelled by caller"),
        Err(err @ HttpError::TimedOut { .. }) => println!("slow: {err}"),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
