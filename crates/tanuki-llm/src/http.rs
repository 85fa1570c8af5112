//! Shared plumbing for the HTTP backends.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crate::{LlmError, LlmResult};

/// Connect timeout for backend HTTP clients. The overall request deadline is
/// enforced by the session, not here.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_client() -> LlmResult<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| LlmError::Unavailable(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn map_send_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::NetworkError(format!("request timed out: {err}"))
    } else {
        LlmError::NetworkError(err.to_string())
    }
}

/// Turn a non-success response into an [`LlmError`], passing successes through.
pub(crate) async fn check_status(response: Response) -> LlmResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(map_http_error(status, body))
}

pub(crate) fn map_http_error(status: StatusCode, body: String) -> LlmError {
    let message = truncate(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthError(message),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(message),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            LlmError::InvalidRequest(message)
        }
        _ => LlmError::ApiError {
            status: status.as_u16(),
            message,
        },
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
