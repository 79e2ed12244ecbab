// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! In-memory server for tests.
//!
//! [`MockServer`] implements [`Transport`] directly, so resources can run against it without
//! a socket, and [`MockServer::serve`] speaks the real wire protocol over a `TcpStream`.
//! Scripted responses are returned first, in push order. Once the script is empty the mock
//! simulates tensor stores and node iterators; every other request gets an `Exception`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::Transport;
use crate::codec::{
    pack_bool, pack_f32_vector, pack_string_vector, pack_u64, pack_u64_vector, PayloadReader,
};
use crate::error::{Error, Result};
use crate::protocol::{
    encode_response, read_request, Opcode, Response, StatusCode, MAX_FRAME_PAYLOAD,
};
use crate::tensor_store::TensorKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum Scripted {
    Reply(Response),
    Fail(StatusCode, String),
}

#[derive(Debug)]
struct MockStore {
    tensor_size: usize,
    tensors: HashMap<TensorKey, Vec<f32>>,
}

#[derive(Debug)]
struct MockCursor {
    batch_size: usize,
    position: usize,
}

#[derive(Debug)]
struct MockState {
    session: u64,
    next_id: u64,
    script: VecDeque<Scripted>,
    requests: Vec<RecordedRequest>,
    nodes: Vec<u64>,
    stores: BTreeMap<String, MockStore>,
    open_stores: HashMap<u64, String>,
    cursors: HashMap<u64, MockCursor>,
}

impl MockState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Debug)]
pub struct MockServer {
    inner: Arc<Mutex<MockState>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                session: 1,
                next_id: 0,
                script: VecDeque::new(),
                requests: Vec::new(),
                nodes: Vec::new(),
                stores: BTreeMap::new(),
                open_stores: HashMap::new(),
                cursors: HashMap::new(),
            })),
        }
    }

    /// Node ids served, in order, by simulated node iterators.
    pub fn with_nodes(self, nodes: Vec<u64>) -> Self {
        self.lock().nodes = nodes;
        self
    }

    pub fn push_response(&self, response: Response) {
        self.lock().script.push_back(Scripted::Reply(response));
    }

    pub fn push_server_error(&self, status: StatusCode, message: &str) {
        self.lock()
            .script
            .push_back(Scripted::Fail(status, message.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn set_session(&self, session: u64) {
        self.lock().session = session;
    }

    /// Answers requests read from `stream` until the peer hangs up.
    pub fn serve(&self, mut stream: TcpStream) -> Result<()> {
        while let Some((opcode, payload)) = read_request(&mut stream)? {
            let wire = match self.request(opcode, &payload) {
                Ok(response) => {
                    encode_response(response.status, &response.payload, MAX_FRAME_PAYLOAD)
                }
                Err(Error::Server(err)) => {
                    encode_response(err.status, err.message.as_bytes(), MAX_FRAME_PAYLOAD)
                }
                Err(err) => encode_response(
                    StatusCode::UnexpectedError,
                    err.to_string().as_bytes(),
                    MAX_FRAME_PAYLOAD,
                ),
            };
            stream.write_all(&wire)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockServer {
    fn request(&self, opcode: Opcode, payload: &[u8]) -> Result<Response> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            opcode,
            payload: payload.to_vec(),
        });
        match state.script.pop_front() {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(status, message)) => Err(Error::server(status, message)),
            None => simulate(&mut state, opcode, payload),
        }
    }

    fn session(&self) -> u64 {
        self.lock().session
    }
}

fn exception(message: impl Into<String>) -> Error {
    Error::server(StatusCode::Exception, message)
}

fn reply(build: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<Response> {
    let mut payload = Vec::new();
    build(&mut payload)?;
    Ok(Response::success(payload))
}

fn read_key(reader: &mut PayloadReader<'_>) -> Result<TensorKey> {
    if reader.read_bool("key kind")? {
        Ok(TensorKey::Id(reader.read_u64("key")?))
    } else {
        Ok(TensorKey::Name(reader.read_string("key")?))
    }
}

fn read_keys(reader: &mut PayloadReader<'_>) -> Result<Vec<TensorKey>> {
    if reader.read_bool("key kind")? {
        let ids = reader.read_u64_vector("keys")?;
        Ok(ids.into_iter().map(TensorKey::Id).collect())
    } else {
        let names = reader.read_string_vector("keys")?;
        Ok(names.into_iter().map(TensorKey::Name).collect())
    }
}

fn open_store<'a>(state: &'a mut MockState, id: u64) -> Result<&'a mut MockStore> {
    let name = state
        .open_stores
        .get(&id)
        .ok_or_else(|| exception(format!("unknown tensor store id {id}")))?;
    state
        .stores
        .get_mut(name)
        .ok_or_else(|| exception(format!("tensor store {name} was removed")))
}

fn simulate(state: &mut MockState, opcode: Opcode, payload: &[u8]) -> Result<Response> {
    let mut reader = PayloadReader::new(payload);
    match opcode {
        Opcode::TensorStoreExists => {
            let name = reader.read_string("name")?;
            let exists = state.stores.contains_key(&name);
            reply(|buf| pack_bool(buf, exists))
        }
        Opcode::TensorStoreIsOpen => {
            let name = reader.read_string("name")?;
            let open = state.open_stores.values().any(|open| *open == name);
            reply(|buf| pack_bool(buf, open))
        }
        Opcode::TensorStoreCreate => {
            let tensor_size = reader.read_u64("tensor size")? as usize;
            let name = reader.read_string("name")?;
            if state.stores.contains_key(&name) {
                return Err(exception(format!("tensor store {name} already exists")));
            }
            state.stores.insert(
                name,
                MockStore {
                    tensor_size,
                    tensors: HashMap::new(),
                },
            );
            Ok(Response::success(Vec::new()))
        }
        Opcode::TensorStoreRemove => {
            let name = reader.read_string("name")?;
            state
                .stores
                .remove(&name)
                .ok_or_else(|| exception(format!("tensor store {name} does not exist")))?;
            Ok(Response::success(Vec::new()))
        }
        Opcode::TensorStoreList => {
            let names: Vec<&String> = state.stores.keys().collect();
            reply(|buf| pack_string_vector(buf, &names))
        }
        Opcode::TensorStoreOpen => {
            let name = reader.read_string("name")?;
            let tensor_size = state
                .stores
                .get(&name)
                .map(|store| store.tensor_size)
                .ok_or_else(|| exception(format!("tensor store {name} does not exist")))?;
            let id = state.allocate_id();
            state.open_stores.insert(id, name);
            reply(|buf| {
                pack_u64(buf, id)?;
                pack_u64(buf, tensor_size as u64)
            })
        }
        Opcode::TensorStoreClose => {
            let id = reader.read_u64("id")?;
            state.open_stores.remove(&id);
            Ok(Response::success(Vec::new()))
        }
        Opcode::TensorStoreContains => {
            let store = open_store(state, reader.read_u64("id")?)?;
            let key = read_key(&mut reader)?;
            let found = store.tensors.contains_key(&key);
            reply(|buf| pack_bool(buf, found))
        }
        Opcode::TensorStoreInsert => {
            let store = open_store(state, reader.read_u64("id")?)?;
            let key = read_key(&mut reader)?;
            let tensor = reader.read_f32_vector("tensor")?;
            if tensor.len() != store.tensor_size {
                return Err(exception("tensor size mismatch"));
            }
            store.tensors.insert(key, tensor);
            Ok(Response::success(Vec::new()))
        }
        Opcode::TensorStoreMultiInsert => {
            let store = open_store(state, reader.read_u64("id")?)?;
            let keys = read_keys(&mut reader)?;
            let values = reader.read_f32_vector("tensors")?;
            if values.len() != keys.len() * store.tensor_size {
                return Err(exception("tensor size mismatch"));
            }
            let rows = values.chunks(store.tensor_size.max(1));
            for (key, row) in keys.into_iter().zip(rows) {
                store.tensors.insert(key, row.to_vec());
            }
            Ok(Response::success(Vec::new()))
        }
        Opcode::TensorStoreGet => {
            let store = open_store(state, reader.read_u64("id")?)?;
            let key = read_key(&mut reader)?;
            let tensor = store
                .tensors
                .get(&key)
                .ok_or_else(|| exception(format!("no tensor for {key:?}")))?;
            reply(|buf| pack_f32_vector(buf, tensor))
        }
        Opcode::TensorStoreMultiGet => {
            let store = open_store(state, reader.read_u64("id")?)?;
            let mut values = Vec::new();
            for key in read_keys(&mut reader)? {
                let tensor = store
                    .tensors
                    .get(&key)
                    .ok_or_else(|| exception(format!("no tensor for {key:?}")))?;
                values.extend_from_slice(tensor);
            }
            reply(|buf| pack_f32_vector(buf, &values))
        }
        Opcode::TensorStoreSize => {
            let store = open_store(state, reader.read_u64("id")?)?;
            let size = store.tensors.len() as u64;
            reply(|buf| pack_u64(buf, size))
        }
        Opcode::NodeIteratorNew => {
            let batch_size = reader.read_u64("batch size")? as usize;
            let id = state.allocate_id();
            state.cursors.insert(
                id,
                MockCursor {
                    batch_size,
                    position: 0,
                },
            );
            let size = state.nodes.len() as u64;
            reply(|buf| {
                pack_u64(buf, id)?;
                pack_u64(buf, size)
            })
        }
        Opcode::NodeIteratorBegin => {
            let id = reader.read_u64("id")?;
            let cursor = state
                .cursors
                .get_mut(&id)
                .ok_or_else(|| exception(format!("unknown node iterator {id}")))?;
            cursor.position = 0;
            Ok(Response::success(Vec::new()))
        }
        Opcode::NodeIteratorNext => {
            let id = reader.read_u64("id")?;
            let cursor = state
                .cursors
                .get_mut(&id)
                .ok_or_else(|| exception(format!("unknown node iterator {id}")))?;
            if cursor.position >= state.nodes.len() {
                return Ok(Response::end_of_iteration());
            }
            let end = (cursor.position + cursor.batch_size).min(state.nodes.len());
            let batch = &state.nodes[cursor.position..end];
            cursor.position = end;
            reply(|buf| pack_u64_vector(buf, batch))
        }
        Opcode::NodeIteratorClose => {
            let id = reader.read_u64("id")?;
            state.cursors.remove(&id);
            Ok(Response::success(Vec::new()))
        }
        other => Err(exception(format!("{other:?} is not simulated"))),
    }
}
