use crate::error::ServiceError;
use reqwest::{Client, Response};
use std::time::Duration;

/// Shared client for every outbound service call. With a timeout set, a hung
/// backend surfaces as `ServiceError::Unavailable` instead of blocking forever.
pub fn build_client(timeout: Option<Duration>) -> Result<Client, ServiceError> {
    let mut builder = Client::builder().user_agent(concat!("manual-chat/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Turns a non-2xx response into `BackendResponse` carrying status and body.
pub(crate) async fn ensure_success(backend: &str, response: Response) -> Result<Response, ServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::BackendResponse {
        backend: backend.to_string(),
        details: format!("{status}: {body}"),
    })
}
