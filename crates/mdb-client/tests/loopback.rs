// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! End-to-end runs over a real socket against the in-memory server.

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use mdb_client::testing::MockServer;
use mdb_client::{
    dial, with_request_timeout, Client, Error, NodeIterator, Response, StatusCode, TensorStore,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serves every accepted connection with `mock` until the listener thread is dropped.
fn spawn_server(mock: MockServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let mock = mock.clone();
            thread::spawn(move || {
                let _ = mock.serve(stream);
            });
        }
    });
    addr
}

fn connect(addr: &str) -> Client {
    dial(addr, [with_request_timeout(Duration::from_secs(5))]).unwrap()
}

#[test]
fn tensor_store_lifecycle_over_tcp() {
    init_tracing();
    let addr = spawn_server(MockServer::new());
    let client = connect(&addr);

    TensorStore::create(&client, "t", 3).unwrap();
    assert!(TensorStore::exists(&client, "t").unwrap());

    let mut store = TensorStore::open(&client, "t").unwrap();
    store.insert(1u64, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(store.get(1u64).unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(store.size().unwrap(), 1);
    store.close().unwrap();
    assert!(matches!(store.get(1u64), Err(Error::HandleClosed { .. })));

    let err = store.insert(2u64, &[1.0]).unwrap_err();
    assert!(matches!(err, Error::HandleClosed { .. }));
    assert!(client.is_connected());
}

#[test]
fn large_response_spans_many_frames() {
    init_tracing();
    let addr = spawn_server(MockServer::new());
    let client = connect(&addr);

    // 3 x 2000 f32 values need several 4096-byte frames.
    TensorStore::create(&client, "wide", 2000).unwrap();
    let store = TensorStore::open(&client, "wide").unwrap();
    let values: Vec<f32> = (0..6000).map(|i| i as f32 * 0.5).collect();
    store.multi_insert(vec![1u64, 2, 3], &values).unwrap();

    let matrix = store.multi_get(vec![1u64, 2, 3]).unwrap();
    assert_eq!(matrix.as_slice(), values.as_slice());
}

#[test]
fn server_errors_leave_connection_usable() {
    init_tracing();
    let addr = spawn_server(MockServer::new());
    let client = connect(&addr);

    let err = TensorStore::open(&client, "missing").unwrap_err();
    assert!(mdb_client::is_server_error(&err, StatusCode::Exception));
    assert!(client.is_connected());
    assert!(TensorStore::list(&client).unwrap().is_empty());
}

#[test]
fn node_iteration_over_tcp() {
    init_tracing();
    let addr = spawn_server(MockServer::new().with_nodes((1..=10).collect()));
    let client = connect(&addr);

    let mut nodes = NodeIterator::new(&client, 4).unwrap();
    assert_eq!(nodes.size().unwrap(), 10);
    let batches: Vec<Vec<u64>> = nodes
        .batches()
        .unwrap()
        .collect::<mdb_client::Result<_>>()
        .unwrap();
    assert_eq!(
        batches,
        vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10]]
    );
    assert!(nodes.next_item().unwrap().is_none());
}

#[test]
fn reconnect_makes_open_handles_stale() {
    init_tracing();
    let addr = spawn_server(MockServer::new().with_nodes(vec![1, 2, 3]));
    let client = connect(&addr);

    let mut nodes = NodeIterator::new(&client, 2).unwrap();
    client.reconnect().unwrap();
    assert!(matches!(nodes.next_item(), Err(Error::StaleHandle { .. })));
    nodes.close().unwrap();

    let mut fresh = NodeIterator::new(&client, 2).unwrap();
    assert_eq!(fresh.next_item().unwrap(), Some(vec![1, 2]));
}

#[test]
fn scripted_end_of_iteration_travels_as_status() {
    init_tracing();
    let mock = MockServer::new();
    mock.push_response(Response::end_of_iteration());
    let addr = spawn_server(mock);
    let client = connect(&addr);

    let response = client
        .request(mdb_client::Opcode::NodeIteratorNext, &7u64.to_be_bytes())
        .unwrap();
    assert!(response.is_end_of_iteration());
    assert!(response.payload.is_empty());
}
