//! Single-request page fetcher
//!
//! One GET through a session's current client, classified into a page or a
//! typed `FetchError`:
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | HTTP 200 with a body | `RawPage` |
//! | HTTP 200, empty body | `EmptyBody` |
//! | Any other status | `Status(code)` |
//! | Timeout | `Timeout` |
//! | Connect / proxy failure | `Connect` |
//! | Anything else | `Transport` |

use crate::harvest::{FetchError, FetchErrorKind};
use crate::session::Session;
use reqwest::StatusCode;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Requested URL
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    /// Circuit generation that served the page
    pub generation: u64,
    pub body: String,
}

/// Fetches `url` through `session`, holding the circuit for the request
pub async fn fetch(session: &Session, url: &str) -> Result<RawPage, FetchError> {
    let _circuit = session.lock_circuit().await;
    // Taken under the lock so a rotation that finished while we waited applies
    let (client, generation) = session.client_and_generation();

    let failure = |kind| FetchError {
        url: url.to_string(),
        session_index: session.index(),
        generation,
        kind,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| failure(classify(&e)))?;

    let status = response.status();
    let final_url = response.url().to_string();

    if status != StatusCode::OK {
        return Err(failure(FetchErrorKind::Status(status.as_u16())));
    }

    let body = response.text().await.map_err(|e| failure(classify(&e)))?;
    if body.trim().is_empty() {
        return Err(failure(FetchErrorKind::EmptyBody));
    }

    tracing::debug!(
        "Fetched {} ({} bytes) on circuit {}",
        url,
        body.len(),
        session.index()
    );

    Ok(RawPage {
        url: url.to_string(),
        final_url,
        generation,
        body,
    })
}

fn classify(error: &reqwest::Error) -> FetchErrorKind {
    if error.is_timeout() {
        FetchErrorKind::Timeout
    } else if error.is_connect() {
        FetchErrorKind::Connect(error.to_string())
    } else {
        FetchErrorKind::Transport(error.to_string())
    }
}
