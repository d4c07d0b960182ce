use redis::Client;
use redis::aio::ConnectionManager;

/// Open a reconnecting Redis connection shared by the credit ledger and
/// the intake bridge. Clones of the manager multiplex over one socket.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!(url = %redact_url(redis_url), "Connected to Redis");
    Ok(manager)
}

/// Strip credentials from a connection URL before it is logged.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
