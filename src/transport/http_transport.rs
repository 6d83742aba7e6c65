use std::time::Duration;

use bytes::Bytes;

use crate::config::ServerConfig;
use crate::error::RelayError;

use super::retry_policy::{
    retry_backoff_delay, retry_delay, should_retry_transport_error, should_retry_upstream_status,
    RETRY_MAX_ATTEMPTS,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the shared outbound HTTP client from server settings.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] when reqwest rejects the configuration.
pub fn build_reqwest_client(config: &ServerConfig) -> Result<reqwest::Client, RelayError> {
    let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
    };

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout));

    if !config.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// POST `body` to `url`, retrying connection failures and retriable statuses.
///
/// The final response is returned whatever its status; the caller decides
/// how to treat non-success codes.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] when the request cannot be sent and
/// retries are exhausted.
pub async fn post_with_retry(
    client: &reqwest::Client,
    url: &url::Url,
    headers: &http::HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, RelayError> {
    let mut attempt = 0;
    loop {
        let result = client
            .post(url.clone())
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                if attempt < RETRY_MAX_ATTEMPTS && should_retry_upstream_status(response.status())
                {
                    let delay = retry_delay(response.headers(), attempt);
                    tracing::debug!(
                        status = response.status().as_u16(),
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "retrying upstream request after retriable status"
                    );
                    drop(response);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if attempt >= RETRY_MAX_ATTEMPTS || !should_retry_transport_error(&err) {
                    return Err(RelayError::Transport(err.to_string()));
                }
                let delay = retry_backoff_delay(attempt);
                tracing::debug!(
                    retry_attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "retrying upstream request after transport error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
