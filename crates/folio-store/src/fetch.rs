use std::io::{self, Read};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::StoreError;

const USER_AGENT: &str = concat!("folio/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Status and body of a completed request. Non-success statuses are returned,
/// not raised; callers decide what a 404 means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access used to materialize remote resources.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchResponse, StoreError>;
}

/// [`Fetcher`] over a blocking `reqwest` client with a per-request deadline.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| StoreError::Network {
                url: String::new(),
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self { client, timeout })
    }

    fn request_error(&self, url: &str, err: &reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            StoreError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    fn body_error(&self, url: &str, err: &io::Error) -> StoreError {
        if err.kind() == io::ErrorKind::TimedOut {
            StoreError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            StoreError::Network {
                url: url.to_string(),
                message: format!("stream error: {err}"),
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, StoreError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| self.request_error(url, &err))?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .read_to_end(&mut body)
            .map_err(|err| self.body_error(url, &err))?;
        debug!(url, status, bytes = body.len(), "fetched");
        Ok(FetchResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::panic;

    fn server_or_skip(test: &str) -> Option<Server> {
        match panic::catch_unwind(Server::run) {
            Ok(server) => Some(server),
            Err(_) => {
                eprintln!("skipping {test} (httptest server unavailable)");
                None
            }
        }
    }

    #[test]
    fn returns_body_and_status() -> anyhow::Result<()> {
        let Some(server) = server_or_skip("returns_body_and_status") else {
            return Ok(());
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/mets.xml"))
                .respond_with(status_code(200).body("<mets:mets/>")),
        );
        let fetcher = HttpFetcher::new(DEFAULT_HTTP_TIMEOUT)?;
        let response = fetcher.fetch(&server.url_str("/mets.xml"))?;
        assert!(response.is_success());
        assert_eq!(response.body, b"<mets:mets/>");
        Ok(())
    }

    #[test]
    fn non_success_status_is_returned() -> anyhow::Result<()> {
        let Some(server) = server_or_skip("non_success_status_is_returned") else {
            return Ok(());
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing"))
                .respond_with(status_code(404)),
        );
        let fetcher = HttpFetcher::new(DEFAULT_HTTP_TIMEOUT)?;
        let response = fetcher.fetch(&server.url_str("/missing"))?;
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        Ok(())
    }

    #[test]
    fn slow_responses_time_out() -> anyhow::Result<()> {
        let Some(server) = server_or_skip("slow_responses_time_out") else {
            return Ok(());
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/slow"))
                .times(..)
                .respond_with(delay_and_then(Duration::from_secs(2), status_code(200))),
        );
        let fetcher = HttpFetcher::new(Duration::from_millis(200))?;
        let err = fetcher
            .fetch(&server.url_str("/slow"))
            .expect_err("deadline should expire");
        assert!(err.is_timeout(), "unexpected error: {err}");
        Ok(())
    }

    #[test]
    fn unreachable_hosts_are_network_errors() -> anyhow::Result<()> {
        let fetcher = HttpFetcher::new(Duration::from_secs(2))?;
        let err = fetcher
            .fetch("http://127.0.0.1:9/unreachable")
            .expect_err("nothing listens on the discard port");
        assert!(matches!(err, StoreError::Network { .. }), "unexpected error: {err}");
        Ok(())
    }
}
