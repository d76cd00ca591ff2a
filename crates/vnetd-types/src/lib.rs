//! Network primitive types for the VNET orchestration daemon.
//!
//! Every value that crosses the boundary between the declarative config feed
//! and the orchestration core is carried by one of these types:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`]: IPv4 or IPv6 addresses
//! - [`IpPrefix`]: IP network prefixes in CIDR notation
//!
//! Parsing is the only way to construct them from text, so downstream code
//! can rely on values being well-formed.

mod ip;
mod mac;

pub use ip::{IpAddress, IpPrefix};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
