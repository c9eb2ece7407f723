//! Upstream API surface
//!
//! The endpoint catalogue (names, paths, aliases) and the typed decoding of
//! each endpoint's response body.

pub mod endpoints;
pub mod payloads;

pub use endpoints::{Endpoint, UnknownEndpoint};
pub use payloads::{parse_money, parse_payload, EndpointPayload, PayloadError};
