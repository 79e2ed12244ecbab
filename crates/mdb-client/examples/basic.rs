// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use mdb_client::{dial_from_env, GraphLoader, Sampler};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = dial_from_env()?;
    let store = std::env::var("MDB_FEATURE_STORE").unwrap_or_else(|_| "features".to_string());

    let sample = Sampler::new(&client).subgraph(4, &[10, 5])?;
    println!(
        "sampled {} nodes and {} edges around seeds {:?}",
        sample.num_nodes(),
        sample.num_edges(),
        sample.seeds()
    );

    let mut loader = GraphLoader::eval(&client, &store, 256, vec![10, -1])?;
    println!("loader covers {} nodes", loader.size()?);
    for batch in loader.batches()? {
        let batch = batch?;
        println!(
            "batch: {} seeds, {} nodes, feature size {}",
            batch.num_seeds,
            batch.num_nodes(),
            batch.feature_size()
        );
    }
    loader.close()?;
    Ok(())
}
