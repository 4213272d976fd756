//! DNS-over-HTTPS providers
//!
//! Speaks the JSON dialect (`Accept: application/dns-json`) understood by
//! Cloudflare, Google and Quad9.

pub mod client;
pub mod provider;
pub mod types;

pub use client::DohClient;
pub use provider::DohProvider;
pub use types::{parse_envelope, STATUS_NOERROR, STATUS_NXDOMAIN};
