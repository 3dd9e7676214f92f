//! HMAC request authentication for the SiGa service.
//!
//! Every request to SiGa carries four `X-Authorization-*` headers derived
//! from the service identifier, a shared secret key, the current time, and
//! the request itself.

use crate::infra::error::{SigaError, SigaResult};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use std::time::{SystemTime, UNIX_EPOCH};

/// Header carrying the decimal Unix timestamp of the request.
pub const HEADER_TIMESTAMP: &str = "X-Authorization-Timestamp";
/// Header carrying the service identifier verbatim.
pub const HEADER_SERVICE_UUID: &str = "X-Authorization-ServiceUUID";
/// Header naming the HMAC algorithm.
pub const HEADER_HMAC_ALGORITHM: &str = "X-Authorization-Hmac-Algorithm";
/// Header carrying the lowercase hex HMAC signature.
pub const HEADER_SIGNATURE: &str = "X-Authorization-Signature";

/// HMAC hash function used to authorize requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HmacAlgorithm {
    /// Parse the configuration value. Empty selects the HMAC-SHA256
    /// default; unrecognized values are rejected.
    pub fn from_conf(value: &str) -> SigaResult<Self> {
        match value {
            "" | "HMAC-SHA256" => Ok(HmacAlgorithm::Sha256),
            "HMAC-SHA384" => Ok(HmacAlgorithm::Sha384),
            "HMAC-SHA512" => Ok(HmacAlgorithm::Sha512),
            other => Err(SigaError::Validation(format!("unknown HMACAlgorithm: {other}"))),
        }
    }

    /// The algorithm name sent on the wire.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            HmacAlgorithm::Sha256 => "HmacSHA256",
            HmacAlgorithm::Sha384 => "HmacSHA384",
            HmacAlgorithm::Sha512 => "HmacSHA512",
        }
    }
}

/// Derives the `X-Authorization-*` headers for one request.
#[derive(Clone)]
pub struct RequestAuthenticator {
    identifier: String,
    key: Vec<u8>,
    algorithm: HmacAlgorithm,
    clock: fn() -> u64,
}

impl std::fmt::Debug for RequestAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuthenticator")
            .field("identifier", &self.identifier)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl RequestAuthenticator {
    /// Create an authenticator for the given service identity.
    pub fn new(identifier: impl Into<String>, key: impl Into<Vec<u8>>, algorithm: HmacAlgorithm) -> Self {
        Self {
            identifier: identifier.into(),
            key: key.into(),
            algorithm,
            clock: unix_now,
        }
    }

    /// Replace the wall-clock source. Used by tests to pin the timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Compute the four authorization headers for a request.
    ///
    /// The signature is `HMAC(key, "{uuid}:{ts}:{METHOD}:{uri}:" ++ body)`
    /// in lowercase hex. `method` must be upper-case and `uri` the
    /// path-and-query part starting with `/`; `body` is empty when the
    /// request has no body.
    #[must_use]
    pub fn headers(&self, method: &str, uri: &str, body: &[u8]) -> [(&'static str, String); 4] {
        let timestamp = (self.clock)().to_string();
        let prefix = format!("{}:{}:{}:{}:", self.identifier, timestamp, method, uri);

        let signature = match self.algorithm {
            HmacAlgorithm::Sha256 => mac_hex::<Hmac<Sha256>>(&self.key, prefix.as_bytes(), body),
            HmacAlgorithm::Sha384 => mac_hex::<Hmac<Sha384>>(&self.key, prefix.as_bytes(), body),
            HmacAlgorithm::Sha512 => mac_hex::<Hmac<Sha512>>(&self.key, prefix.as_bytes(), body),
        };

        [
            (HEADER_TIMESTAMP, timestamp),
            (HEADER_SERVICE_UUID, self.identifier.clone()),
            (HEADER_HMAC_ALGORITHM, self.algorithm.wire_name().to_string()),
            (HEADER_SIGNATURE, signature),
        ]
    }
}

fn mac_hex<M: Mac + hmac::digest::KeyInit>(key: &[u8], prefix: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key).expect("hmac key");
    mac.update(prefix);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
