//! Resilient blocking HTTP client shared by every upstream collaborator.
//!
//! - Process-wide concurrency bound via a FIFO permit pool (callers queue,
//!   they never fail on contention).
//! - Exponential backoff with jitter on 5xx and transport errors.
//! - 429 honors `Retry-After` when present and is always retried while
//!   attempts remain; any other non-2xx status fails immediately.
//! - Optional HMAC signing, re-signed per attempt with a fresh timestamp.

use crate::signing::{AUTH_HEADER, RequestSigner, TIMESTAMP_HEADER};
use crate::utils::now_ms;
use crossbeam_channel::{Receiver, Sender, bounded};
use log::warn;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub enum FetchError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
}

impl core::fmt::Display for FetchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FetchError::Transport(s) => write!(f, "transport error: {}", s),
            FetchError::Http { status, message } => write!(f, "http {}: {}", status, message),
            FetchError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<serde_json::Error> for FetchError {
    fn from(value: serde_json::Error) -> Self {
        FetchError::Json(value)
    }
}

/// Fair counting semaphore over a bounded channel: `recv` is the acquire
/// (FIFO among blocked callers), returning the token on drop is the release.
#[derive(Debug, Clone)]
pub struct Permits {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Permits {
    pub fn new(count: usize) -> Self {
        let (tx, rx) = bounded(count);
        for _ in 0..count {
            tx.send(()).expect("channel sized to count");
        }
        Permits { tx, rx }
    }

    pub fn acquire(&self) -> Permit {
        // Cannot disconnect: we hold a sender for the pool's lifetime.
        self.rx.recv().expect("permit pool disconnected");
        Permit { tx: self.tx.clone() }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.rx.len()
    }
}

pub struct Permit {
    tx: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub base_backoff: Duration,
    pub max_retries: u32,
    /// Stagger applied before the first attempt so parallel callers do not
    /// burst the upstream simultaneously.
    pub request_jitter: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            base_backoff: Duration::from_millis(350),
            max_retries: 4,
            request_jitter: Duration::from_millis(120),
        }
    }
}

#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// Target of a `Link: <url>; rel="next"` header, if any.
    pub next_link: Option<String>,
}

pub struct FetchClient {
    agent: ureq::Agent,
    permits: Permits,
    settings: FetchSettings,
    signer: Option<RequestSigner>,
}

impl FetchClient {
    pub fn new(permits: Permits, settings: FetchSettings, signer: Option<RequestSigner>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(4))
            .timeout_read(Duration::from_secs(6))
            .timeout(Duration::from_secs(10))
            .build();
        FetchClient {
            agent,
            permits,
            settings,
            signer,
        }
    }

    /// GET with retry/backoff under the shared permit. The permit is held
    /// for the whole retry sequence so a struggling upstream is never hit by
    /// more than `max_concurrency` logical requests at once.
    pub fn get(&self, url: &str, query: &[(&str, String)]) -> Result<FetchResponse, FetchError> {
        let _permit = self.permits.acquire();

        let mut rate_limited: Option<FetchError> = None;
        for attempt in 0..self.settings.max_retries {
            if attempt == 0 {
                jitter_sleep(self.settings.request_jitter);
            }

            match self.build_request(url, query).call() {
                Ok(resp) => return read_response(resp),
                Err(ureq::Error::Status(429, resp)) => {
                    let delay = resp
                        .header("Retry-After")
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.backoff(attempt));
                    warn!(
                        "http 429 for {}: retrying after {}ms (attempt={})",
                        url,
                        delay.as_millis(),
                        attempt
                    );
                    rate_limited = Some(FetchError::Http {
                        status: 429,
                        message: "rate limited".into(),
                    });
                    jitter_sleep(delay);
                }
                Err(ureq::Error::Status(status, resp)) if (500..600).contains(&status) => {
                    if attempt + 1 < self.settings.max_retries {
                        let delay = self.backoff(attempt);
                        warn!(
                            "http {} for {}: retrying in {}ms (attempt={})",
                            status,
                            url,
                            delay.as_millis(),
                            attempt
                        );
                        jitter_sleep(delay);
                    } else {
                        return Err(FetchError::Http {
                            status,
                            message: body_or_placeholder(resp),
                        });
                    }
                }
                Err(ureq::Error::Status(status, resp)) => {
                    // Permanent: no retry.
                    return Err(FetchError::Http {
                        status,
                        message: body_or_placeholder(resp),
                    });
                }
                Err(ureq::Error::Transport(t)) => {
                    if attempt + 1 < self.settings.max_retries {
                        let delay = self.backoff(attempt);
                        warn!(
                            "transport error for {}: {} -> retrying in {}ms (attempt={})",
                            url,
                            t,
                            delay.as_millis(),
                            attempt
                        );
                        jitter_sleep(delay);
                    } else {
                        return Err(FetchError::Transport(t.to_string()));
                    }
                }
            }
        }

        // Only an exhausted rate-limit sequence falls through the loop.
        Err(rate_limited.unwrap_or_else(|| FetchError::Transport("no attempts configured".into())))
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, FetchError> {
        let resp = self.get(url, query)?;
        let jd = &mut serde_json::Deserializer::from_str(&resp.body);
        serde_path_to_error::deserialize(jd).map_err(|e| {
            warn!("decode failed for {} at `{}`: {}", url, e.path(), e.inner());
            FetchError::Json(e.into_inner())
        })
    }

    fn build_request(&self, url: &str, query: &[(&str, String)]) -> ureq::Request {
        let mut req = self.agent.get(url).set("Accept", "application/json");
        for (k, v) in query {
            req = req.query(k, v);
        }
        if let Some(signer) = &self.signer {
            let (auth, timestamp) = signer.sign("GET", url_path(url), query_string(query).as_deref(), now_ms());
            req = req.set(AUTH_HEADER, &auth).set(TIMESTAMP_HEADER, &timestamp);
        }
        req
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.settings.base_backoff * 2u32.saturating_pow(attempt)
    }
}

fn read_response(resp: ureq::Response) -> Result<FetchResponse, FetchError> {
    let status = resp.status();
    let next_link = resp.header("Link").and_then(parse_next_link);
    let body = resp.into_string().map_err(|e| FetchError::Transport(e.to_string()))?;
    Ok(FetchResponse {
        status,
        body,
        next_link,
    })
}

fn body_or_placeholder(resp: ureq::Response) -> String {
    resp.into_string().unwrap_or_else(|_| String::from("<no body>"))
}

/// Extract the target of the `rel="next"` segment of a `Link` header.
fn parse_next_link(header: &str) -> Option<String> {
    for part in header.split(',') {
        let part = part.trim();
        if !part.contains("rel=\"next\"") {
            continue;
        }
        let start = part.find('<')?;
        let end = part.find('>')?;
        if start < end {
            return Some(part[start + 1..end].to_string());
        }
    }
    None
}

fn url_path(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => &url[after_scheme + i..],
        None => "/",
    }
}

fn query_string(query: &[(&str, String)]) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    Some(
        query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&"),
    )
}

fn jitter_sleep(base: Duration) {
    let half = base.as_millis() as u64 / 2;
    let extra = rand::rng().random_range(0..=half);
    thread::sleep(base + Duration::from_millis(extra));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    fn client(max_retries: u32) -> FetchClient {
        FetchClient::new(
            Permits::new(2),
            FetchSettings {
                base_backoff: Duration::from_millis(10),
                max_retries,
                request_jitter: Duration::from_millis(1),
            },
            None,
        )
    }

    /// Minimal one-connection-per-response server for status sequences,
    /// which mockito cannot express.
    fn serve_sequence(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = match listener.accept() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    fn plain(status: u16, reason: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        )
    }

    #[test]
    fn succeeds_after_three_consecutive_500s() {
        let url = serve_sequence(vec![
            plain(500, "Internal Server Error", ""),
            plain(500, "Internal Server Error", ""),
            plain(500, "Internal Server Error", ""),
            plain(200, "OK", "{\"ok\":true}"),
        ]);
        let resp = client(4).get(&url, &[]).expect("4th attempt succeeds");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "{\"ok\":true}");
    }

    #[test]
    fn gives_up_after_max_retries_of_500() {
        let url = serve_sequence(vec![
            plain(500, "Internal Server Error", "boom"),
            plain(500, "Internal Server Error", "boom"),
        ]);
        let err = client(2).get(&url, &[]).expect_err("exhausted");
        match err {
            FetchError::Http { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn rate_limit_honors_retry_after() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/device/status")
            .with_status(429)
            .with_header("Retry-After", "2")
            .expect(2)
            .create();

        let started = Instant::now();
        let err = client(2)
            .get(&format!("{}/device/status", server.url()), &[])
            .expect_err("still rate limited");
        // One full Retry-After wait between the two attempts.
        assert!(started.elapsed() >= Duration::from_secs(2), "elapsed={:?}", started.elapsed());
        match err {
            FetchError::Http { status, .. } => assert_eq!(status, 429),
            other => panic!("unexpected error: {}", other),
        }
        mock.assert();
    }

    #[test]
    fn non_retryable_status_fails_immediately() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/missing").with_status(404).expect(1).create();

        let err = client(4)
            .get(&format!("{}/missing", server.url()), &[])
            .expect_err("404 is permanent");
        match err {
            FetchError::Http { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {}", other),
        }
        mock.assert();
    }

    #[test]
    fn signed_requests_carry_auth_headers() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/v1/devices/abc/properties/p1")
            .match_header(AUTH_HEADER, mockito::Matcher::Regex("^key:.+=*$".into()))
            .match_header(TIMESTAMP_HEADER, mockito::Matcher::Regex("^[0-9]+$".into()))
            .with_status(200)
            .with_body("{}")
            .create();

        let client = FetchClient::new(
            Permits::new(1),
            FetchSettings {
                base_backoff: Duration::from_millis(10),
                max_retries: 1,
                request_jitter: Duration::from_millis(1),
            },
            Some(RequestSigner::new("key", "secret")),
        );
        client
            .get(&format!("{}/v1/devices/abc/properties/p1", server.url()), &[])
            .expect("signed request accepted");
        mock.assert();
    }

    #[test]
    fn next_link_header_is_extracted() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v1/devices/abc/properties")
            .with_status(200)
            .with_header(
                "Link",
                "</v1/devices/abc/properties?page=2>; rel=\"next\", </v1/devices/abc/properties?page=0>; rel=\"prev\"",
            )
            .with_body("[]")
            .create();

        let resp = client(1)
            .get(&format!("{}/v1/devices/abc/properties", server.url()), &[])
            .expect("ok");
        assert_eq!(resp.next_link.as_deref(), Some("/v1/devices/abc/properties?page=2"));
    }

    #[test]
    fn permits_are_returned_on_drop() {
        let permits = Permits::new(2);
        assert_eq!(permits.available(), 2);
        let held = permits.acquire();
        assert_eq!(permits.available(), 1);
        drop(held);
        assert_eq!(permits.available(), 2);
    }

    #[test]
    fn parse_next_link_variants() {
        assert_eq!(
            parse_next_link("<https://x/y?p=2>; rel=\"next\"").as_deref(),
            Some("https://x/y?p=2")
        );
        assert_eq!(parse_next_link("<https://x/y?p=0>; rel=\"prev\""), None);
        assert_eq!(parse_next_link(""), None);
    }

    #[test]
    fn url_path_extraction() {
        assert_eq!(url_path("https://api.example.com/v1/devices?x=1"), "/v1/devices?x=1");
        assert_eq!(url_path("https://api.example.com"), "/");
    }
}
