// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use crate::client::Transport;
use crate::codec::{pack_u64, pack_u64_vector, PayloadReader};
use crate::error::{Error, Result};
use crate::graph::{decode_sample, normalize_fan_out, GraphSample};
use crate::protocol::Opcode;

/// Stateless neighborhood sampling. Each call is a single request with no server handle.
#[derive(Debug, Clone)]
pub struct Sampler<T: Transport> {
    transport: T,
}

impl<T: Transport> Sampler<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Samples `num_seeds` random seeds and expands them hop by hop.
    pub fn subgraph(&self, num_seeds: u64, fan_out: &[i64]) -> Result<GraphSample> {
        self.sample(Opcode::SamplerSubgraph, "num_seeds", num_seeds, fan_out)
    }

    /// Like [`Self::subgraph`], but the returned edges are candidates for link prediction.
    pub fn subgraph_edge_existence(
        &self,
        num_preseeds: u64,
        fan_out: &[i64],
    ) -> Result<GraphSample> {
        self.sample(
            Opcode::SamplerSubgraphEdgeExistence,
            "num_preseeds",
            num_preseeds,
            fan_out,
        )
    }

    /// Draws up to `num_seeds` random node ids.
    pub fn get_seeds(&self, num_seeds: u64) -> Result<Vec<u64>> {
        if num_seeds == 0 {
            return Err(Error::invalid_argument("num_seeds must be positive"));
        }
        let mut payload = Vec::with_capacity(8);
        pack_u64(&mut payload, num_seeds)?;
        let response = self.transport.request(Opcode::SamplerGetSeeds, &payload)?;
        PayloadReader::new(&response.payload).read_u64_vector("seeds")
    }

    fn sample(
        &self,
        opcode: Opcode,
        count_name: &str,
        count: u64,
        fan_out: &[i64],
    ) -> Result<GraphSample> {
        if count == 0 {
            return Err(Error::invalid_argument(format!("{count_name} must be positive")));
        }
        if fan_out.is_empty() {
            return Err(Error::invalid_argument("fan_out must be non-empty"));
        }

        let mut payload = Vec::with_capacity(16 + fan_out.len() * 8);
        pack_u64(&mut payload, count)?;
        pack_u64_vector(&mut payload, &normalize_fan_out(fan_out))?;

        let response = self.transport.request(opcode, &payload)?;
        let sample = decode_sample(&mut PayloadReader::new(&response.payload))?;
        tracing::debug!(
            ?opcode,
            seeds = sample.num_seeds,
            nodes = sample.num_nodes(),
            edges = sample.num_edges(),
            "sampled subgraph"
        );
        Ok(sample)
    }
}
