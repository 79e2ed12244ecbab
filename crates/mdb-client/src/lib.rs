// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Rust client for the MillenniumDB graph server protocol.
//!
//! Exposes a synchronous TCP client, the wire codec and frame protocol it speaks, and
//! typed proxies for server-side resources: node iterators, graph loaders, tensor stores
//! and the neighborhood sampler.

pub mod client;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod graph;
pub mod graph_loader;
pub mod handle;
pub mod node_iterator;
pub mod protocol;
pub mod sampler;
pub mod tensor_store;
pub mod testing;

#[cfg(test)]
mod test_util;

pub use crate::client::{
    dial, with_dial_timeout, with_request_timeout, Client, ClientOption, Transport,
};
pub use crate::config::{dial_from_env, ClientConfig};
pub use crate::cursor::{Batches, CursorKind, ResourceIterator};
pub use crate::error::{is_connection_error, is_server_error, Error, Result, ServerError};
pub use crate::graph::{normalize_fan_out, FeatureMatrix, GraphSample, ALL_NEIGHBORS};
pub use crate::graph_loader::{GraphBatches, GraphLoader, LoaderConfig, LoaderMode};
pub use crate::handle::{HandleState, ResourceHandle};
pub use crate::node_iterator::{NodeBatches, NodeIterator};
pub use crate::protocol::{Opcode, Response, StatusCode};
pub use crate::sampler::Sampler;
pub use crate::tensor_store::{TensorKey, TensorKeys, TensorStore};

pub const DEFAULT_DIAL_TIMEOUT: std::time::Duration = protocol::DEFAULT_DIAL_TIMEOUT;
pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = protocol::DEFAULT_REQUEST_TIMEOUT;
