//! `reqkit` builds and executes HTTP/1.1 requests from composable options, with
//! per-phase connection timeouts, transport-level retries and a fixed policy
//! for routing the response body into caller-owned targets.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqkit::prelude::*;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Default, Deserialize)]
//! struct CreateItemResponse {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default()
//!         .with_timeouts(Timeouts::default().with_read(Duration::from_secs(3)));
//!     let client = Client::new(config)?;
//!
//!     let mut created = CreateItemResponse::default();
//!     let exchange = client
//!         .post(
//!             "https://api.example.com/v1/items",
//!             vec![
//!                 with_retry_times(2),
//!                 with_header(["x-request-source", "demo"]),
//!                 with_json(&serde_json::json!({ "name": "demo" })),
//!                 with_response_json(&mut created),
//!             ],
//!         )
//!         .await?;
//!
//!     println!("status={} id={}", exchange.status_code(), created.id);
//!     Ok(())
//! }
//! ```
//!
//! # Behavior
//!
//! - Only transport failures are retried, immediately and without backoff.
//! - A final status of 300 or above becomes [`Error::HttpStatus`] unless
//!   [`with_error_on_status(false)`](with_error_on_status) is given.
//! - Errors raised while applying options abort the call before any I/O.

mod body;
mod client;
mod config;
mod conn;
mod disposition;
mod error;
mod multipart;
mod option;
mod proxy;
mod request;
mod response;
mod tls;
mod transport;
mod util;

pub use crate::body::{ReqBody, RespBody, full_body};
pub use crate::client::{
    Client, connect, delete, execute, get, head, options, patch, post, put, trace,
};
pub use crate::config::{Config, ProxyConfig, Timeouts};
pub use crate::conn::{DeadlineElapsed, TimeoutConnection};
pub use crate::error::{Error, ErrorCode, TimeoutPhase, TransportErrorKind};
pub use crate::multipart::FormFile;
pub use crate::option::{
    RequestOption, with_basic_auth, with_body, with_body_factory, with_body_file, with_config,
    with_error_on_status, with_files, with_form, with_form_serialized, with_header, with_json,
    with_json_escaped, with_method, with_query, with_response_copy, with_response_json,
    with_retry_times, with_transport,
};
pub use crate::proxy::{Dialer, ProxyConnection};
pub use crate::request::{CopyTarget, JsonTarget};
pub use crate::response::{Exchange, RequestHead, ResponseHead};
pub use crate::transport::{HyperTransport, Transport, TransportFuture};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Client, Config, Error, ErrorCode, Exchange, FormFile, ProxyConfig, RequestOption,
        TimeoutPhase, Timeouts, Transport, TransportErrorKind, with_basic_auth, with_body,
        with_body_factory, with_body_file, with_config, with_error_on_status, with_files,
        with_form, with_form_serialized, with_header, with_json, with_json_escaped, with_method,
        with_query, with_response_copy, with_response_json, with_retry_times, with_transport,
    };
}
