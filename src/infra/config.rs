//! Configuration for the SiGa client and the middleware server.
//!
//! The configuration is a JSON document whose field names are fixed by the
//! deployment environment (`URL`, `ClientTLS`, `RootCAs`, `TimeoutSeconds`,
//! `ServiceIdentifier`, `ServiceKey`, `HMACAlgorithm`, `SignatureProfile`,
//! `MIDLanguage`).

use crate::infra::error::{SigaError, SigaResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default per-call timeout for requests to SiGa.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(25);

/// Configuration values for the SiGa client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conf {
    /// Base URL of the SiGa service.
    #[serde(rename = "URL")]
    pub url: String,

    /// Certificate chain and private key used for TLS client
    /// authentication, if the service requires mutual TLS.
    #[serde(rename = "ClientTLS", default, skip_serializing_if = "Option::is_none")]
    pub client_tls: Option<TlsConf>,

    /// Root certificates (PEM) for server-side TLS verification. When
    /// empty, the platform trust store is used.
    #[serde(rename = "RootCAs", default, skip_serializing_if = "Vec::is_empty")]
    pub root_cas: Vec<String>,

    /// HTTP timeout of a single request to SiGa, in seconds. Zero or
    /// absent means the 25-second default.
    #[serde(rename = "TimeoutSeconds", default)]
    pub timeout_seconds: u64,

    /// Service identifier (UUID) used to authorize requests.
    #[serde(rename = "ServiceIdentifier")]
    pub service_identifier: String,

    /// Signing secret key used to authorize requests. The raw bytes of
    /// this string are the HMAC key.
    #[serde(rename = "ServiceKey")]
    pub service_key: String,

    /// HMAC algorithm used to authorize requests. Possible values are
    /// "HMAC-SHA256", "HMAC-SHA384", and "HMAC-SHA512". Empty means
    /// "HMAC-SHA256".
    #[serde(rename = "HMACAlgorithm", default)]
    pub hmac_algorithm: String,

    /// Signature profile used for qualifying signatures. Possible values
    /// are dictated by the SiGa service provider. Empty means "LT".
    #[serde(rename = "SignatureProfile", default)]
    pub signature_profile: String,

    /// Language of the dialogs shown on the signer's phone during
    /// Mobile-ID signing. Possible values are dictated by the SiGa
    /// service provider. Empty means "EST".
    #[serde(rename = "MIDLanguage", default)]
    pub mid_language: String,
}

/// A PEM certificate chain with its PEM private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConf {
    /// Certificate chain, PEM.
    pub chain: String,
    /// Private key, PEM.
    pub key: String,
}

impl Conf {
    /// Read configuration from a JSON file.
    pub fn read(path: impl AsRef<Path>) -> SigaResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| SigaError::Internal(format!("read {}: {e}", path.display())))?;
        let conf: Conf = serde_json::from_slice(&bytes)
            .map_err(|e| SigaError::Validation(format!("parse {}: {e}", path.display())))?;
        conf.validate()?;
        Ok(conf)
    }

    /// Reject configurations that cannot produce a working client.
    pub fn validate(&self) -> SigaResult<()> {
        if self.url.is_empty() {
            return Err(SigaError::Validation("missing URL".into()));
        }
        if self.service_identifier.is_empty() {
            return Err(SigaError::Validation("missing ServiceIdentifier".into()));
        }
        if self.service_key.is_empty() {
            return Err(SigaError::Validation("missing ServiceKey".into()));
        }
        Ok(())
    }

    /// Per-call timeout, falling back to [`DEFAULT_CLIENT_TIMEOUT`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        if self.timeout_seconds == 0 {
            DEFAULT_CLIENT_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_seconds)
        }
    }

    /// Signature profile, falling back to "LT".
    #[must_use]
    pub fn profile(&self) -> &str {
        if self.signature_profile.is_empty() {
            "LT"
        } else {
            &self.signature_profile
        }
    }

    /// Mobile-ID dialog language, falling back to "EST".
    #[must_use]
    pub fn language(&self) -> &str {
        if self.mid_language.is_empty() {
            "EST"
        } else {
            &self.mid_language
        }
    }
}
