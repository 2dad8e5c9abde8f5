use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};

use crate::error::VaultKitError;

/// A thin wrapper on an HTTP client. Sets timeouts and the user-agent, refuses plain HTTP
/// and retries transient failures.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: usize,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3, // total attempts = 4
        }
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> Result<RequestBuilder, VaultKitError> {
        if !is_allowed_endpoint(url) {
            return Err(VaultKitError::NetworkError {
                url: url.to_string(),
                status: None,
                error: "only https endpoints are allowed".to_string(),
            });
        }

        Ok(self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("vaultkit-core/{}", env!("CARGO_PKG_VERSION")),
            ))
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str) -> Result<RequestBuilder, VaultKitError> {
        self.req(Method::POST, url)
    }

    /// Sends a request built by `req`/`post`, retrying timeouts, connection errors, 429 and 5xx.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, VaultKitError> {
        let Some(template) = request_builder.try_clone() else {
            return execute_request_builder(request_builder)
                .await
                .map_err(Into::into);
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries);

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                RequestHandleError::permanent(
                    "<unknown>".to_string(),
                    None,
                    "request cannot be retried because it is not cloneable".to_string(),
                )
            })?;
            execute_request_builder(request_builder).await
        })
        .retry(backoff)
        .when(RequestHandleError::is_retryable)
        .notify(|err, after| {
            tracing::debug!(url = %err.url, status = ?err.status, ?after, "retrying request");
        })
        .await
        .map_err(Into::into)
    }
}

/// HTTPS anywhere, plain HTTP only on the loopback interface (local nodes and mocks).
fn is_allowed_endpoint(url: &str) -> bool {
    url.starts_with("https://")
        || ["http://127.0.0.1", "http://localhost", "http://[::1]"]
            .iter()
            .any(|prefix| {
                url.strip_prefix(prefix)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with([':', '/']))
            })
}

#[derive(Debug)]
struct RequestHandleError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl RequestHandleError {
    const fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
        }
    }

    const fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
        }
    }

    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<RequestHandleError> for VaultKitError {
    fn from(value: RequestHandleError) -> Self {
        Self::NetworkError {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute_request_builder(
    request_builder: RequestBuilder,
) -> Result<Response, RequestHandleError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        RequestHandleError::permanent(
            err.url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(RequestHandleError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            if !resp.status().is_success() {
                return Err(RequestHandleError::permanent(
                    url,
                    Some(status),
                    format!("request rejected with status code {status}"),
                ));
            }
            Ok(resp)
        }
        Err(err) => {
            if err.is_timeout() || err.is_connect() {
                return Err(RequestHandleError::retryable(
                    url,
                    None,
                    format!("request timeout/connect error: {err}"),
                ));
            }

            Err(RequestHandleError::permanent(
                url,
                None,
                format!("request failed: {err}"),
            ))
        }
    }
}
