// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Named key-value stores of fixed-length f32 tensors.
//!
//! Tensors are addressed by a numeric id or by a string name, never both in one call. The
//! tensor length is fixed when the store is created; inserts with another length are
//! rejected locally. Tensors cannot be removed once inserted.

use crate::client::Transport;
use crate::codec::{
    pack_bool, pack_f32_vector, pack_string, pack_string_vector, pack_u64, pack_u64_vector,
    PayloadReader,
};
use crate::error::{Error, Result};
use crate::graph::FeatureMatrix;
use crate::handle::ResourceHandle;
use crate::protocol::{Opcode, Response};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TensorKey {
    Id(u64),
    Name(String),
}

impl TensorKey {
    /// `[is_numeric: bool][u64 | string]`.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            TensorKey::Id(id) => {
                pack_bool(buf, true)?;
                pack_u64(buf, *id)
            }
            TensorKey::Name(name) => {
                pack_bool(buf, false)?;
                pack_string(buf, name)
            }
        }
    }
}

impl From<u64> for TensorKey {
    fn from(id: u64) -> Self {
        TensorKey::Id(id)
    }
}

impl From<&str> for TensorKey {
    fn from(name: &str) -> Self {
        TensorKey::Name(name.to_string())
    }
}

impl From<String> for TensorKey {
    fn from(name: String) -> Self {
        TensorKey::Name(name)
    }
}

/// A homogeneous key list for the multi-key operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorKeys {
    Ids(Vec<u64>),
    Names(Vec<String>),
}

impl TensorKeys {
    pub fn len(&self) -> usize {
        match self {
            TensorKeys::Ids(ids) => ids.len(),
            TensorKeys::Names(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            TensorKeys::Ids(ids) => {
                pack_bool(buf, true)?;
                pack_u64_vector(buf, ids)
            }
            TensorKeys::Names(names) => {
                pack_bool(buf, false)?;
                pack_string_vector(buf, names)
            }
        }
    }
}

impl From<Vec<u64>> for TensorKeys {
    fn from(ids: Vec<u64>) -> Self {
        TensorKeys::Ids(ids)
    }
}

impl From<&[u64]> for TensorKeys {
    fn from(ids: &[u64]) -> Self {
        TensorKeys::Ids(ids.to_vec())
    }
}

impl From<Vec<String>> for TensorKeys {
    fn from(names: Vec<String>) -> Self {
        TensorKeys::Names(names)
    }
}

impl From<&[&str]> for TensorKeys {
    fn from(names: &[&str]) -> Self {
        TensorKeys::Names(names.iter().map(|name| name.to_string()).collect())
    }
}

const RESOURCE: &str = "TensorStore";

/// Open handle to a tensor store.
#[derive(Debug)]
pub struct TensorStore<T: Transport> {
    handle: ResourceHandle<T>,
    name: String,
    tensor_size: usize,
}

impl<T: Transport> TensorStore<T> {
    pub fn exists(transport: &T, name: &str) -> Result<bool> {
        let mut payload = Vec::new();
        pack_string(&mut payload, name)?;
        let response = transport.request(Opcode::TensorStoreExists, &payload)?;
        PayloadReader::new(&response.payload).read_bool("exists")
    }

    /// Whether some client currently holds the store open on the server.
    pub fn is_open(transport: &T, name: &str) -> Result<bool> {
        let mut payload = Vec::new();
        pack_string(&mut payload, name)?;
        let response = transport.request(Opcode::TensorStoreIsOpen, &payload)?;
        PayloadReader::new(&response.payload).read_bool("is open")
    }

    /// Creates an empty store whose tensors all have `tensor_size` values.
    pub fn create(transport: &T, name: &str, tensor_size: u64) -> Result<()> {
        if tensor_size == 0 {
            return Err(Error::invalid_argument("tensor_size must be positive"));
        }
        let mut payload = Vec::new();
        pack_u64(&mut payload, tensor_size)?;
        pack_string(&mut payload, name)?;
        transport.request(Opcode::TensorStoreCreate, &payload)?;
        Ok(())
    }

    pub fn remove(transport: &T, name: &str) -> Result<()> {
        let mut payload = Vec::new();
        pack_string(&mut payload, name)?;
        transport.request(Opcode::TensorStoreRemove, &payload)?;
        Ok(())
    }

    pub fn list(transport: &T) -> Result<Vec<String>> {
        let response = transport.request(Opcode::TensorStoreList, &[])?;
        PayloadReader::new(&response.payload).read_string_vector("store names")
    }

    pub fn open(transport: T, name: &str) -> Result<Self> {
        let mut payload = Vec::new();
        pack_string(&mut payload, name)?;

        let mut handle = ResourceHandle::new(transport, RESOURCE, Opcode::TensorStoreClose);
        let tensor_size = handle.open(Opcode::TensorStoreOpen, &payload, |reader| {
            let size = reader.read_u64("tensor size")?;
            usize::try_from(size)
                .map_err(|_| Error::malformed(format!("tensor size {size} is too large")))
        })?;

        Ok(Self {
            handle,
            name: name.to_string(),
            tensor_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensor_size(&self) -> usize {
        self.tensor_size
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn contains(&self, key: impl Into<TensorKey>) -> Result<bool> {
        let key = key.into();
        let response = self
            .handle
            .call(Opcode::TensorStoreContains, |buf| key.encode(buf))?;
        PayloadReader::new(&response.payload).read_bool("contains")
    }

    pub fn insert(&self, key: impl Into<TensorKey>, tensor: &[f32]) -> Result<()> {
        let key = key.into();
        self.handle.server_id()?;
        if tensor.len() != self.tensor_size {
            return Err(Error::invalid_argument(format!(
                "tensor has {} values, store {} expects {}",
                tensor.len(),
                self.name,
                self.tensor_size
            )));
        }
        self.handle.call(Opcode::TensorStoreInsert, |buf| {
            key.encode(buf)?;
            pack_f32_vector(buf, tensor)
        })?;
        Ok(())
    }

    /// Inserts `keys.len()` tensors given as one row-major buffer.
    pub fn multi_insert(&self, keys: impl Into<TensorKeys>, tensors: &[f32]) -> Result<()> {
        let keys = keys.into();
        self.handle.server_id()?;
        let expected = keys.len().checked_mul(self.tensor_size).ok_or_else(|| {
            Error::invalid_argument(format!(
                "{} keys of size {} overflow",
                keys.len(),
                self.tensor_size
            ))
        })?;
        if tensors.len() != expected {
            return Err(Error::invalid_argument(format!(
                "{} keys need {expected} values, got {}",
                keys.len(),
                tensors.len()
            )));
        }
        self.handle.call(Opcode::TensorStoreMultiInsert, |buf| {
            keys.encode(buf)?;
            pack_f32_vector(buf, tensors)
        })?;
        Ok(())
    }

    pub fn get(&self, key: impl Into<TensorKey>) -> Result<Vec<f32>> {
        let key = key.into();
        let response = self
            .handle
            .call(Opcode::TensorStoreGet, |buf| key.encode(buf))?;
        let tensor = read_tensors(&response)?;
        if tensor.len() != self.tensor_size {
            return Err(Error::malformed(format!(
                "server returned {} values for a tensor of size {}",
                tensor.len(),
                self.tensor_size
            )));
        }
        Ok(tensor)
    }

    /// Fetches several tensors as a `keys.len() × tensor_size` matrix.
    pub fn multi_get(&self, keys: impl Into<TensorKeys>) -> Result<FeatureMatrix> {
        let keys = keys.into();
        let rows = keys.len();
        let response = self
            .handle
            .call(Opcode::TensorStoreMultiGet, |buf| keys.encode(buf))?;
        FeatureMatrix::new(rows, self.tensor_size, read_tensors(&response)?)
    }

    /// Number of tensors in the store.
    pub fn size(&self) -> Result<u64> {
        let response = self.handle.call(Opcode::TensorStoreSize, |_| Ok(()))?;
        PayloadReader::new(&response.payload).read_u64("size")
    }

    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }
}

fn read_tensors(response: &Response) -> Result<Vec<f32>> {
    PayloadReader::new(&response.payload).read_f32_vector("tensor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;
    use crate::test_util::load_fixture;
    use crate::testing::MockServer;

    fn open_response(id: u64, tensor_size: u64) -> Response {
        let mut payload = Vec::new();
        pack_u64(&mut payload, id).unwrap();
        pack_u64(&mut payload, tensor_size).unwrap();
        Response::success(payload)
    }

    #[test]
    fn insert_get_size_close_scenario() {
        let mock = MockServer::new();
        TensorStore::create(&mock, "t", 3).unwrap();
        let mut store = TensorStore::open(&mock, "t").unwrap();
        assert_eq!(store.tensor_size(), 3);

        store.insert(1u64, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.get(1u64).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(store.size().unwrap(), 1);

        store.close().unwrap();
        assert!(matches!(
            store.get(1u64),
            Err(Error::HandleClosed { resource: "TensorStore" })
        ));
    }

    #[test]
    fn wrong_tensor_length_sends_nothing() {
        let mock = MockServer::new();
        TensorStore::create(&mock, "t", 3).unwrap();
        let store = TensorStore::open(&mock, "t").unwrap();
        let before = mock.request_count();

        let err = store.insert(5u64, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = store.multi_insert(vec![1u64, 2], &[0.0; 5]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(mock.request_count(), before);
    }

    #[test]
    fn named_keys_are_separate_from_ids() {
        let mock = MockServer::new();
        TensorStore::create(&mock, "emb", 2).unwrap();
        let store = TensorStore::open(&mock, "emb").unwrap();

        store.insert("alice", &[0.5, 0.5]).unwrap();
        assert!(store.contains("alice").unwrap());
        assert!(!store.contains(7u64).unwrap());
        assert_eq!(store.get("alice").unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn multi_insert_and_multi_get_round_trip_rows() {
        let mock = MockServer::new();
        TensorStore::create(&mock, "m", 2).unwrap();
        let store = TensorStore::open(&mock, "m").unwrap();

        store
            .multi_insert(vec![10u64, 11, 12], &[1.0, 1.5, 2.0, 2.5, 3.0, 3.5])
            .unwrap();
        let matrix = store.multi_get(vec![12u64, 10]).unwrap();
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.row(0), Some(&[3.0f32, 3.5][..]));
        assert_eq!(matrix.row(1), Some(&[1.0f32, 1.5][..]));
        assert_eq!(store.size().unwrap(), 3);
    }

    #[test]
    fn static_operations() {
        let mock = MockServer::new();
        assert!(!TensorStore::exists(&mock, "a").unwrap());
        TensorStore::create(&mock, "a", 4).unwrap();
        TensorStore::create(&mock, "b", 4).unwrap();
        assert!(TensorStore::exists(&mock, "a").unwrap());
        assert_eq!(
            TensorStore::list(&mock).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        let err = TensorStore::create(&mock, "a", 4).unwrap_err();
        assert!(crate::error::is_server_error(&err, StatusCode::Exception));

        TensorStore::remove(&mock, "a").unwrap();
        assert!(!TensorStore::exists(&mock, "a").unwrap());
        assert!(matches!(
            TensorStore::create(&mock, "c", 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn payloads_match_fixtures() {
        let mock = MockServer::new();
        mock.push_response(Response::success(Vec::new()));
        TensorStore::create(&mock, "t", 3).unwrap();
        let fixture = load_fixture("tensor_store_create");
        assert_eq!(mock.requests()[0].opcode, fixture.opcode());
        assert_eq!(mock.requests()[0].payload, fixture.payload());

        mock.push_response(open_response(7, 3));
        mock.push_response(Response::success(Vec::new()));
        let store = TensorStore::open(&mock, "t").unwrap();
        store.insert(1u64, &[1.0, 2.0, 3.0]).unwrap();
        let fixture = load_fixture("tensor_store_insert");
        assert_eq!(mock.requests()[2].opcode, fixture.opcode());
        assert_eq!(mock.requests()[2].payload, fixture.payload());

        let mut values = Vec::new();
        pack_f32_vector(&mut values, &[0.0; 6]).unwrap();
        mock.push_response(Response::success(values));
        let matrix = store.multi_get(&["a", "b"][..]).unwrap();
        assert_eq!((matrix.rows(), matrix.cols()), (2, 3));
        let fixture = load_fixture("tensor_store_multi_get_named");
        assert_eq!(mock.requests()[3].opcode, fixture.opcode());
        assert_eq!(mock.requests()[3].payload, fixture.payload());
    }

    #[test]
    fn short_get_response_is_malformed() {
        let mock = MockServer::new();
        mock.push_response(open_response(1, 4));
        let store = TensorStore::open(&mock, "s").unwrap();
        let mut values = Vec::new();
        pack_f32_vector(&mut values, &[1.0, 2.0]).unwrap();
        mock.push_response(Response::success(values));
        assert!(matches!(store.get(0u64), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn is_open_tracks_open_handles() {
        let mock = MockServer::new();
        TensorStore::create(&mock, "t", 2).unwrap();
        assert!(!TensorStore::is_open(&mock, "t").unwrap());

        let mut store = TensorStore::open(&mock, "t").unwrap();
        assert!(TensorStore::is_open(&mock, "t").unwrap());
        store.close().unwrap();
        assert!(!TensorStore::is_open(&mock, "t").unwrap());

        let request = mock.requests().pop().unwrap();
        assert_eq!(request.opcode, Opcode::TensorStoreIsOpen);
        assert_eq!(request.payload, vec![0, 0, 0, 0, 0, 0, 0, 1, b't']);
    }

    #[test]
    fn oversized_tensor_size_fails_multi_insert_without_io() {
        let mock = MockServer::new();
        mock.push_response(open_response(3, u64::MAX));
        let store = TensorStore::open(&mock, "huge").unwrap();
        let before = mock.request_count();

        let err = store.multi_insert(vec![1u64, 2], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(mock.request_count(), before);
    }

    #[test]
    fn key_encoding_carries_discriminator() {
        let mut buf = Vec::new();
        TensorKey::Id(2).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 0, 0, 0, 0, 0, 0, 0, 2]);

        let mut buf = Vec::new();
        TensorKey::from("n").encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0, 0, 0, 0, 0, 1, b'n']);
    }
}
