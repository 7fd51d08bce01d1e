//! Request signing
//!
//! `X-Signature` is the hex HMAC-SHA256 of `"<timestamp>.<body>"` keyed by the
//! device secret. Without a secret the header is sent empty.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Default)]
pub struct RequestSigner {
    secret: Option<Vec<u8>>,
}

impl RequestSigner {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn sign(&self, timestamp: i64, body: &str) -> String {
        let Some(secret) = &self.secret else {
            return String::new();
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            return String::new();
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
