//! Asynchronous client for a framed binary RPC protocol.
//!
//! A [`RpcClient`] maintains a single framed transport (plain TCP or TLS) to
//! one server endpoint and pipelines any number of concurrent requests over
//! it. Every request carries a sequence number; a single background receive
//! task matches each inbound response to the caller awaiting it, so
//! responses may arrive in any order. Per-call deadlines close the whole
//! connection when they fire, because the stream framing does not permit
//! skipping a late response.
//!
//! ```no_run
//! use std::time::Duration;
//! use wirecall::RpcClient;
//!
//! wirecall::rpc_function! {
//!     fn echo(input: String) -> String;
//! }
//!
//! # async fn demo() -> Result<(), wirecall::RpcError> {
//! let mut client = RpcClient::new(0);
//! client.connect("127.0.0.1", "8801", Duration::from_secs(5)).await?;
//! let pong = client.call::<echo>("hi".to_owned()).await?;
//! assert_eq!(pong, "hi");
//! # Ok(())
//! # }
//! ```
//!
//! Calls can also be split into two stages with
//! [`RpcClient::send_request`]: the first stage resolves once the request is
//! on the wire, the returned [`Reply`] resolves once the response arrived.
//! This allows pipelining without holding the client borrowed across both
//! awaits.

pub mod client;
pub mod config;
pub mod error;
pub mod function;
pub mod payload;
pub mod protocol;
mod tls;

pub use client::{Reply, Response, RpcClient};
pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use error::{ErrorCode, RpcError};
pub use function::RpcFunction;
