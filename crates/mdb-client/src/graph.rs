// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::codec::PayloadReader;
use crate::error::{Error, Result};

/// Sentinel sent for an unbounded fan-out.
pub const ALL_NEIGHBORS: u64 = u64::MAX;

/// Maps per-hop fan-outs to their wire form; any negative value means "every neighbor".
pub fn normalize_fan_out(fan_out: &[i64]) -> Vec<u64> {
    fan_out
        .iter()
        .map(|&hop| u64::try_from(hop).unwrap_or(ALL_NEIGHBORS))
        .collect()
}

/// Dense row-major `rows × cols` matrix of f32.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::malformed(format!("{rows}x{cols} matrix overflows")))?;
        if data.len() != expected {
            return Err(Error::malformed(format!(
                "{rows}x{cols} matrix needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        self.data.get(start..start + self.cols)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// A sampled subgraph. The first `num_seeds` entries of `node_ids` are the seed nodes.
///
/// Sampler responses fill `edge_ids`; graph loader batches fill `node_features` and
/// `node_labels` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSample {
    pub num_seeds: usize,
    pub node_ids: Vec<u64>,
    pub edge_ids: Vec<u64>,
    /// `(source, target)` pairs.
    pub edge_index: Vec<(u64, u64)>,
    pub node_features: Option<FeatureMatrix>,
    pub node_labels: Option<Vec<u64>>,
}

impl GraphSample {
    pub fn seeds(&self) -> &[u64] {
        &self.node_ids[..self.num_seeds.min(self.node_ids.len())]
    }

    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.len()
    }

    pub fn feature_size(&self) -> usize {
        self.node_features.as_ref().map_or(0, FeatureMatrix::cols)
    }
}

fn to_usize(value: u64, field: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::malformed(format!("{field} {value} is too large")))
}

/// Sampler layout: `[num_seeds][num_nodes][num_edges][seed ids][node ids][edge ids]
/// [(src, dst) pairs]`.
pub(crate) fn decode_sample(reader: &mut PayloadReader<'_>) -> Result<GraphSample> {
    let num_seeds = to_usize(reader.read_u64("num_seeds")?, "num_seeds")?;
    let num_nodes = to_usize(reader.read_u64("num_nodes")?, "num_nodes")?;
    let num_edges = to_usize(reader.read_u64("num_edges")?, "num_edges")?;

    let mut node_ids = reader.read_u64_array(num_seeds, "seed ids")?;
    node_ids.extend(reader.read_u64_array(num_nodes, "node ids")?);
    let edge_ids = reader.read_u64_array(num_edges, "edge ids")?;
    let pair_count = num_edges
        .checked_mul(2)
        .ok_or_else(|| Error::malformed("edge index overflows"))?;
    let flat = reader.read_u64_array(pair_count, "edge index")?;
    let edge_index = flat.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect();

    Ok(GraphSample {
        num_seeds,
        node_ids,
        edge_ids,
        edge_index,
        node_features: None,
        node_labels: None,
    })
}

/// Loader layout: `[num_nodes][num_edges][num_seeds][feature_size]`, node features,
/// node labels, edge index as all sources then all targets, node ids.
pub(crate) fn decode_batch(reader: &mut PayloadReader<'_>) -> Result<GraphSample> {
    let num_nodes = to_usize(reader.read_u64("num_nodes")?, "num_nodes")?;
    let num_edges = to_usize(reader.read_u64("num_edges")?, "num_edges")?;
    let num_seeds = to_usize(reader.read_u64("num_seeds")?, "num_seeds")?;
    let feature_size = to_usize(reader.read_u64("feature_size")?, "feature_size")?;

    if num_seeds > num_nodes {
        return Err(Error::malformed(format!(
            "batch declares {num_seeds} seeds but only {num_nodes} nodes"
        )));
    }

    let feature_count = num_nodes
        .checked_mul(feature_size)
        .ok_or_else(|| Error::malformed("node features overflow"))?;
    let features = reader.read_f32_array(feature_count, "node features")?;
    let node_features = FeatureMatrix::new(num_nodes, feature_size, features)?;
    let node_labels = reader.read_u64_array(num_nodes, "node labels")?;

    let pair_count = num_edges
        .checked_mul(2)
        .ok_or_else(|| Error::malformed("edge index overflows"))?;
    let flat = reader.read_u64_array(pair_count, "edge index")?;
    let (sources, targets) = flat.split_at(num_edges);
    let edge_index = sources.iter().copied().zip(targets.iter().copied()).collect();

    let node_ids = reader.read_u64_array(num_nodes, "node ids")?;

    Ok(GraphSample {
        num_seeds,
        node_ids,
        edge_ids: Vec::new(),
        edge_index,
        node_features: Some(node_features),
        node_labels: Some(node_labels),
    })
}
