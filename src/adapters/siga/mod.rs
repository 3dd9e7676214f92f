//! SiGa service adapter: HMAC request authentication, wire protocol types,
//! and the HTTPS client executing authenticated JSON calls.

pub mod auth;
pub mod http;
pub mod protocol;

pub use auth::{HmacAlgorithm, RequestAuthenticator};
pub use http::SigaHttpClient;
