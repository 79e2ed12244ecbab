// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use crate::client::Transport;
use crate::codec::{pack_string, pack_u64, pack_u64_vector, PayloadReader};
use crate::cursor::{CursorKind, ResourceIterator};
use crate::error::{Error, Result};
use crate::graph::{decode_batch, normalize_fan_out, GraphSample};
use crate::protocol::Opcode;

/// Mini-batches of sampled neighborhoods with node features taken from a tensor store.
#[derive(Debug)]
pub struct GraphBatches;

impl CursorKind for GraphBatches {
    const RESOURCE: &'static str = "GraphLoader";
    const BEGIN: Opcode = Opcode::GraphLoaderBegin;
    const NEXT: Opcode = Opcode::GraphLoaderNext;
    const CLOSE: Opcode = Opcode::GraphLoaderClose;

    type Item = GraphSample;

    fn decode_item(reader: &mut PayloadReader<'_>) -> Result<GraphSample> {
        decode_batch(reader)
    }
}

pub type GraphLoader<T> = ResourceIterator<GraphBatches, T>;

/// Where the seeds of each batch come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderMode {
    /// Walks every node of the graph.
    Eval,
    /// The server samples `num_seeds` seeds per epoch.
    Sampling { num_seeds: u64 },
    /// Iterates over a fixed seed list.
    Train { seed_ids: Vec<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Tensor store whose tensors become node features.
    pub store_name: String,
    pub batch_size: u64,
    /// Neighbors sampled per hop; negative means all of them.
    pub fan_out: Vec<i64>,
    pub mode: LoaderMode,
}

impl LoaderConfig {
    pub fn new(
        store_name: impl Into<String>,
        batch_size: u64,
        fan_out: Vec<i64>,
        mode: LoaderMode,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            batch_size,
            fan_out,
            mode,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid_argument("batch_size must be positive"));
        }
        if self.fan_out.is_empty() {
            return Err(Error::invalid_argument("fan_out must be non-empty"));
        }
        match &self.mode {
            LoaderMode::Sampling { num_seeds: 0 } => {
                Err(Error::invalid_argument("num_seeds must be positive"))
            }
            LoaderMode::Train { seed_ids } if seed_ids.is_empty() => {
                Err(Error::invalid_argument("seed_ids must be non-empty"))
            }
            _ => Ok(()),
        }
    }

    /// Validates and encodes the open request.
    pub fn encode(&self) -> Result<(Opcode, Vec<u8>)> {
        self.validate()?;
        let fan_out = normalize_fan_out(&self.fan_out);
        let mut payload = Vec::with_capacity(64);
        pack_u64(&mut payload, self.batch_size)?;

        let opcode = match &self.mode {
            LoaderMode::Eval => {
                pack_u64_vector(&mut payload, &fan_out)?;
                pack_string(&mut payload, &self.store_name)?;
                Opcode::EvalGraphLoaderNew
            }
            LoaderMode::Sampling { num_seeds } => {
                pack_u64(&mut payload, *num_seeds)?;
                pack_u64_vector(&mut payload, &fan_out)?;
                pack_string(&mut payload, &self.store_name)?;
                Opcode::SamplingGraphLoaderNew
            }
            LoaderMode::Train { seed_ids } => {
                pack_u64_vector(&mut payload, &fan_out)?;
                pack_string(&mut payload, &self.store_name)?;
                pack_u64_vector(&mut payload, seed_ids)?;
                Opcode::TrainGraphLoaderNew
            }
        };
        Ok((opcode, payload))
    }
}

impl<T: Transport> ResourceIterator<GraphBatches, T> {
    /// Opens a loader. Arguments are validated before any request is sent.
    pub fn with_config(transport: T, config: &LoaderConfig) -> Result<Self> {
        let (opcode, payload) = config.encode()?;
        Self::open(transport, opcode, &payload)
    }

    pub fn eval(
        transport: T,
        store_name: &str,
        batch_size: u64,
        fan_out: Vec<i64>,
    ) -> Result<Self> {
        let config = LoaderConfig::new(store_name, batch_size, fan_out, LoaderMode::Eval);
        Self::with_config(transport, &config)
    }

    pub fn sampling(
        transport: T,
        store_name: &str,
        num_seeds: u64,
        batch_size: u64,
        fan_out: Vec<i64>,
    ) -> Result<Self> {
        let mode = LoaderMode::Sampling { num_seeds };
        Self::with_config(
            transport,
            &LoaderConfig::new(store_name, batch_size, fan_out, mode),
        )
    }

    pub fn train(
        transport: T,
        store_name: &str,
        batch_size: u64,
        fan_out: Vec<i64>,
        seed_ids: Vec<u64>,
    ) -> Result<Self> {
        let mode = LoaderMode::Train { seed_ids };
        Self::with_config(
            transport,
            &LoaderConfig::new(store_name, batch_size, fan_out, mode),
        )
    }
}
