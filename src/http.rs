use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::KiraError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

pub fn user_agent() -> String {
    format!("kira-ri/{}", env!("CARGO_PKG_VERSION"))
}

pub fn build_client(
    timeout: Duration,
    on_error: impl Fn(String) -> KiraError,
) -> Result<Client, KiraError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent()).map_err(|err| on_error(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| on_error(err.to_string()))
}

/// Sends the request built by `make_req`, retrying transient failures with a
/// linear backoff. Non-retryable statuses are returned to the caller as-is.
pub fn send_with_retries<F>(
    make_req: F,
    on_error: impl Fn(String) -> KiraError,
) -> Result<Response, KiraError>
where
    F: FnMut() -> RequestBuilder,
{
    send_until(make_req, None, on_error)
}

/// Like [`send_with_retries`], but every attempt is cut off at `deadline` and
/// no retry starts once the backoff would cross it.
pub fn send_before<F>(
    mut make_req: F,
    deadline: Instant,
    per_request: Duration,
    on_error: impl Fn(String) -> KiraError,
) -> Result<Response, KiraError>
where
    F: FnMut() -> RequestBuilder,
{
    if Instant::now() >= deadline {
        return Err(on_error("deadline passed before the request was sent".to_string()));
    }
    send_until(
        || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            make_req().timeout(remaining.min(per_request))
        },
        Some(deadline),
        on_error,
    )
}

fn send_until<F>(
    mut make_req: F,
    deadline: Option<Instant>,
    on_error: impl Fn(String) -> KiraError,
) -> Result<Response, KiraError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        let response = make_req().send();
        let retryable = match &response {
            Ok(resp) => is_retryable_status(resp.status().as_u16()),
            Err(err) => is_retryable_error(err),
        };
        let delay = Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1));
        let out_of_time = deadline.is_some_and(|deadline| Instant::now() + delay >= deadline);
        if !retryable || attempt >= MAX_RETRIES || out_of_time {
            return response.map_err(|err| on_error(err.to_string()));
        }
        thread::sleep(delay);
        attempt += 1;
    }
}

pub fn read_text(
    response: Response,
    on_status: impl FnOnce(u16, String) -> KiraError,
    on_error: impl Fn(String) -> KiraError,
) -> Result<String, KiraError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "request failed".to_string());
        return Err(on_status(status, message));
    }
    response.text().map_err(|err| on_error(err.to_string()))
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status));
        }
        for status in [200, 400, 404] {
            assert!(!is_retryable_status(status));
        }
    }

    #[test]
    fn user_agent_carries_version() {
        assert!(user_agent().starts_with("kira-ri/"));
    }
}
