//! HTTP probe implementation.

use super::{ProbeError, ProbeResult, Prober};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::error::Error as StdError;
use std::time::{Duration, Instant};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Probes sites with a single GET per check.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    /// Build a prober with its own client.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, url: &str) -> ProbeResult {
        let start = Instant::now();
        let outcome = self.client.get(url).send().await;
        let elapsed = elapsed_ms(start);

        match outcome {
            Ok(response) => ProbeResult::from_status(response.status().as_u16(), elapsed),
            Err(e) => {
                let error = classify_error(&e, self.timeout);
                tracing::debug!("Probe of {} failed: {} ({})", url, error, e);
                ProbeResult::failed(&error, elapsed)
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    (start.elapsed().as_secs_f64() * 1000.0).round() as u64
}

/// Map a request failure onto the probe error taxonomy.
///
/// Precedence: timeout, DNS, connection refused, generic network, other.
pub fn classify_error(err: &reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    let mut dns = false;
    let mut refused = false;
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => refused = true,
                std::io::ErrorKind::TimedOut => return ProbeError::Timeout(timeout),
                _ => {}
            }
        }
        if is_dns_message(&cause.to_string()) {
            dns = true;
        }
        source = cause.source();
    }

    if dns {
        ProbeError::Dns
    } else if refused {
        ProbeError::ConnectionRefused
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ProbeError::Network
    } else {
        ProbeError::other(err.to_string())
    }
}

fn is_dns_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
        || lower.contains("nodename nor servname")
}
