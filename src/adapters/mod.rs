//! Adapter layer for external system integration.
//!
//! Currently a single adapter: the authenticated HTTPS client for the SiGa
//! signature gateway, together with its request-authentication scheme and
//! wire protocol types.

pub mod siga;
