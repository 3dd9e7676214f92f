//! Authenticated HTTPS client for the SiGa service.
//!
//! Executes one JSON request per call: the body is serialized up front so
//! the HMAC covers the exact bytes sent, the four `X-Authorization-*`
//! headers are attached, and the response is decoded or converted into a
//! structured service error.

use crate::adapters::siga::auth::{HmacAlgorithm, RequestAuthenticator};
use crate::adapters::siga::protocol::ErrorResponse;
use crate::infra::config::Conf;
use crate::infra::error::{ServiceError, SigaError, SigaResult};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Stateless HTTPS client for SiGa. Cheap to clone; all clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct SigaHttpClient {
    http: reqwest::Client,
    base_url: String,
    auth: RequestAuthenticator,
}

impl SigaHttpClient {
    /// Build a client from configuration: TLS material, per-call timeout,
    /// and the request-authentication identity.
    pub fn new(conf: &Conf) -> SigaResult<Self> {
        conf.validate()?;
        let algorithm = HmacAlgorithm::from_conf(&conf.hmac_algorithm)?;

        let mut builder = reqwest::Client::builder().timeout(conf.timeout());
        for pem in &conf.root_cas {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| SigaError::Validation(format!("parse RootCAs entry: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(tls) = &conf.client_tls {
            let mut pem = tls.chain.clone().into_bytes();
            pem.push(b'\n');
            pem.extend_from_slice(tls.key.as_bytes());
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| SigaError::Validation(format!("parse ClientTLS: {e}")))?;
            builder = builder.identity(identity);
        }
        let http = builder
            .build()
            .map_err(|e| SigaError::Transport(format!("create http client: {e}")))?;

        Ok(Self {
            http,
            base_url: conf.url.clone(),
            auth: RequestAuthenticator::new(
                conf.service_identifier.clone(),
                conf.service_key.clone().into_bytes(),
                algorithm,
            ),
        })
    }

    /// Execute a request and decode the 2xx response body into `R`.
    pub async fn exchange<Q: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        request: Option<&Q>,
    ) -> SigaResult<R> {
        let response = self.execute(method, uri, request).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| SigaError::Protocol(format!("decode response: {e}")))
    }

    /// Execute a request and discard the 2xx response body.
    pub async fn send<Q: Serialize>(
        &self,
        method: Method,
        uri: &str,
        request: Option<&Q>,
    ) -> SigaResult<()> {
        self.execute(method, uri, request).await.map(|_| ())
    }

    async fn execute<Q: Serialize>(
        &self,
        method: Method,
        uri: &str,
        request: Option<&Q>,
    ) -> SigaResult<reqwest::Response> {
        // Marshal the body into memory first: the MAC is computed over the
        // exact bytes sent to the server.
        let body = match request {
            Some(value) => Some(
                serde_json::to_vec(value)
                    .map_err(|e| SigaError::Protocol(format!("encode request: {e}")))?,
            ),
            None => None,
        };

        let url = join_url(&self.base_url, uri);
        let mut builder = self.http.request(method.clone(), url.as_str());
        for (name, value) in self
            .auth
            .headers(method.as_str(), uri, body.as_deref().unwrap_or_default())
        {
            builder = builder.header(name, value);
        }
        if let Some(bytes) = body {
            builder = builder
                .header(CONTENT_TYPE, "application/json; charset=UTF-8")
                .body(bytes);
        }

        log::debug!("siga request: {} {url}", method.as_str());
        let response = builder
            .send()
            .await
            .map_err(|e| SigaError::Transport(format!("perform request: {e}")))?;
        log::debug!("siga response: {}", response.status());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let mut service = ServiceError {
            status: status.as_u16(),
            code: None,
            message: None,
            decode: None,
        };
        if !text.is_empty() {
            match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(body) => {
                    service.code = body.error_code;
                    service.message = body.error_message;
                }
                Err(e) => service.decode = Some(e.to_string()),
            }
        }
        Err(SigaError::Service(service))
    }
}

/// Join the base URL and a URI with exactly one `/` between them.
fn join_url(base: &str, uri: &str) -> String {
    match (base.ends_with('/'), uri.starts_with('/')) {
        (true, true) => format!("{}{}", base, &uri[1..]),
        (false, false) => format!("{base}/{uri}"),
        _ => format!("{base}{uri}"),
    }
}

/// Percent-escape a string for use as a single URI path segment.
pub(crate) fn escape_path_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                escaped.push(byte as char);
            }
            other => {
                escaped.push('%');
                escaped.push_str(&format!("{other:02X}"));
            }
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_uses_a_single_slash() {
        assert_eq!(join_url("http://h/v1", "/x"), "http://h/v1/x");
        assert_eq!(join_url("http://h/v1/", "/x"), "http://h/v1/x");
        assert_eq!(join_url("http://h/v1/", "x"), "http://h/v1/x");
        assert_eq!(join_url("http://h/v1", "x"), "http://h/v1/x");
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(escape_path_segment("plain-id_1.2~3"), "plain-id_1.2~3");
        assert_eq!(escape_path_segment("a b/c"), "a%20b%2Fc");
    }
}
