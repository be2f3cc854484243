#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for token-endpoint exchanges.
//!
//! The credential manager talks to token endpoints only through the
//! [`HttpTransport`] trait: one request in, one fully buffered response out.
//! [`HyperTransport`] is the production implementation:
//! - TLS via rustls (HTTPS only by default)
//! - Connection pooling
//! - Per-request timeout covering headers and body
//! - Response body size limit
//! - `User-Agent` injection
//!
//! Non-2xx statuses are returned as `Ok(response)`; interpreting them is the
//! caller's job. `Err` is reserved for transport, TLS and timeout failures.
//!
//! # Example
//!
//! ```ignore
//! use credmgr_http::{HttpTransport, HyperTransport, TransportConfig};
//!
//! let transport = HyperTransport::new(&TransportConfig::default())?;
//! let request = http::Request::post("https://id.example.com/oauth2/token")
//!     .header("content-type", "application/x-www-form-urlencoded")
//!     .body(bytes::Bytes::from_static(b"grant_type=client_credentials"))?;
//! let response = transport.send(request).await?;
//! ```

mod config;
mod error;
mod hyper_transport;
mod tls;
mod transport;

pub use config::{DEFAULT_USER_AGENT, TlsRootConfig, TransportConfig, TransportSecurity};
pub use error::TransportError;
pub use hyper_transport::HyperTransport;
pub use transport::{HttpRequest, HttpResponse, HttpTransport};
