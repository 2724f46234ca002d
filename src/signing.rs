//! HMAC request signing for the Wattsense API.
//!
//! The signed message is `METHOD\npath[\nquery][\nbody]\ntimestamp_ms`,
//! MACed with HMAC-SHA512 and base64-encoded. The signature travels in
//! `X-API-Auth: <key>:<signature>` next to `X-API-Timestamp`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

pub const AUTH_HEADER: &str = "X-API-Auth";
pub const TIMESTAMP_HEADER: &str = "X-API-Timestamp";

#[derive(Debug, Clone)]
pub struct RequestSigner {
    api_key: String,
    api_secret: String,
}

impl RequestSigner {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        RequestSigner {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Produce the `(X-API-Auth, X-API-Timestamp)` header values for one
    /// attempt. Each retry signs again with a fresh timestamp.
    pub fn sign(&self, method: &str, path: &str, query: Option<&str>, timestamp_ms: i64) -> (String, String) {
        let timestamp = timestamp_ms.to_string();

        let mut message = String::new();
        message.push_str(&method.to_uppercase());
        message.push('\n');
        message.push_str(path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            message.push('\n');
            message.push_str(q);
        }
        message.push('\n');
        message.push_str(&timestamp);

        // Key length is unconstrained for HMAC; new_from_slice cannot fail.
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(message.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        (format!("{}:{}", self.api_key, signature), timestamp)
    }
}
