// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use crate::client::Transport;
use crate::codec::{pack_u64, PayloadReader};
use crate::cursor::{CursorKind, ResourceIterator};
use crate::error::{Error, Result};
use crate::protocol::Opcode;

/// Batches of node ids covering every node in the graph.
#[derive(Debug)]
pub struct NodeBatches;

impl CursorKind for NodeBatches {
    const RESOURCE: &'static str = "NodeIterator";
    const BEGIN: Opcode = Opcode::NodeIteratorBegin;
    const NEXT: Opcode = Opcode::NodeIteratorNext;
    const CLOSE: Opcode = Opcode::NodeIteratorClose;

    type Item = Vec<u64>;

    fn decode_item(reader: &mut PayloadReader<'_>) -> Result<Vec<u64>> {
        reader.read_u64_vector("node ids")
    }
}

pub type NodeIterator<T> = ResourceIterator<NodeBatches, T>;

impl<T: Transport> ResourceIterator<NodeBatches, T> {
    /// Opens a node iterator yielding at most `batch_size` ids per batch.
    pub fn new(transport: T, batch_size: u64) -> Result<Self> {
        let payload = node_iterator_payload(batch_size)?;
        Self::open(transport, Opcode::NodeIteratorNew, &payload)
    }
}

fn node_iterator_payload(batch_size: u64) -> Result<Vec<u8>> {
    if batch_size == 0 {
        return Err(Error::invalid_argument("batch_size must be positive"));
    }
    let mut payload = Vec::with_capacity(8);
    pack_u64(&mut payload, batch_size)?;
    Ok(payload)
}
