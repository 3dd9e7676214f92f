//! SiGa signing middleware
//!
//! A middleware orchestrator between browser clients and the SiGa
//! signature gateway, which produces qualified electronic signatures on
//! ASiC-E containers. The library hides all interaction with SiGa:
//! HMAC-authenticated HTTPS calls, session state, hashcode <-> complete
//! container transformations, and cleanup. Two signing flows are exposed:
//! remote signing (the signer's local software signs a hash prepared by
//! the service) and Mobile-ID signing (a phone-operator ceremony polled
//! until completion).

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod services;

pub use domain::datafile::DataFile;
pub use domain::zipstream::ZipInputStream;
pub use infra::config::{Conf, TlsConf};
pub use infra::error::{ServiceError, SigaError, SigaResult};
pub use services::client::Client;
pub use services::store::{MemoryStore, SessionStatus, SessionStore};
