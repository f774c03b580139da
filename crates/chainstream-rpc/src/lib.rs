//! chainstream-rpc: JSON-RPC binding of the chainstream remote call surface.
//!
//! # Overview
//!
//! - [`RpcTransport`]: the trait a transport (HTTP, WebSocket, …) implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`wire`]: node payloads and their validated conversion into core types
//! - [`JsonRpcChainClient`]: [`chainstream_core::ChainClient`] addressing one node group
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use chainstream_core::{StreamConfig, SubscriptionKind, SubscriptionManager};
//! # use chainstream_rpc::{JsonRpcChainClient, RpcClientConfig, RpcTransport};
//! # fn demo(transport: impl RpcTransport) -> Result<(), chainstream_core::StreamError> {
//! let client = JsonRpcChainClient::with_config(transport, RpcClientConfig { group_id: 1 });
//! let manager = SubscriptionManager::new(Arc::new(client), StreamConfig::default())?;
//! let (blocks, errors) = manager.subscribe(SubscriptionKind::NewBlockHashes)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod request;
pub mod transport;
pub mod wire;

pub use client::{JsonRpcChainClient, RpcClientConfig};
pub use error::TransportError;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
pub use wire::{RawBlock, RawLog, RawTransaction};
