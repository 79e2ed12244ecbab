// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Generic server-side iterator. Node iterators and graph loaders differ only in their open
//! request and in how one item is decoded; both are [`ResourceIterator`] with a different
//! [`CursorKind`].

use std::marker::PhantomData;

use crate::client::Transport;
use crate::codec::PayloadReader;
use crate::error::Result;
use crate::handle::{HandleState, ResourceHandle};
use crate::protocol::Opcode;

/// Opcodes and item decoding for one iterator family.
pub trait CursorKind {
    const RESOURCE: &'static str;
    const BEGIN: Opcode;
    const NEXT: Opcode;
    const CLOSE: Opcode;

    type Item;

    fn decode_item(reader: &mut PayloadReader<'_>) -> Result<Self::Item>;
}

#[derive(Debug)]
pub struct ResourceIterator<K: CursorKind, T: Transport> {
    handle: ResourceHandle<T>,
    size: u64,
    exhausted: bool,
    _kind: PhantomData<K>,
}

impl<K: CursorKind, T: Transport> ResourceIterator<K, T> {
    /// Sends `new_opcode` with `payload`, reads `[server_id][size]`, then positions the
    /// cursor at the start with `begin`.
    pub fn open(transport: T, new_opcode: Opcode, payload: &[u8]) -> Result<Self> {
        let mut handle = ResourceHandle::new(transport, K::RESOURCE, K::CLOSE);
        let size = handle.open(new_opcode, payload, |reader| reader.read_u64("size"))?;
        let mut iter = Self {
            handle,
            size,
            exhausted: false,
            _kind: PhantomData,
        };
        iter.begin()?;
        Ok(iter)
    }

    /// Number of items reported by the server at open time.
    pub fn size(&self) -> Result<u64> {
        self.handle.server_id()?;
        Ok(self.size)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn state(&self) -> HandleState {
        self.handle.state()
    }

    /// Rewinds the server-side cursor without releasing it.
    pub fn begin(&mut self) -> Result<()> {
        self.handle.call(K::BEGIN, |_| Ok(()))?;
        self.exhausted = false;
        Ok(())
    }

    /// Fetches the next item. `Ok(None)` marks the end of iteration; later calls keep
    /// returning `Ok(None)` without contacting the server until [`Self::begin`].
    pub fn next_item(&mut self) -> Result<Option<K::Item>> {
        self.handle.server_id()?;
        if self.exhausted {
            return Ok(None);
        }

        let response = self.handle.call(K::NEXT, |_| Ok(()))?;
        if response.is_end_of_iteration() {
            self.exhausted = true;
            return Ok(None);
        }
        K::decode_item(&mut PayloadReader::new(&response.payload)).map(Some)
    }

    /// Rewinds and returns an iterator over the remaining items.
    pub fn batches(&mut self) -> Result<Batches<'_, K, T>> {
        self.begin()?;
        Ok(Batches {
            inner: self,
            done: false,
        })
    }

    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }
}

/// Borrowing adapter yielding `Result<Item>`; stops after the end of iteration or the first
/// error.
#[derive(Debug)]
pub struct Batches<'a, K: CursorKind, T: Transport> {
    inner: &'a mut ResourceIterator<K, T>,
    done: bool,
}

impl<K: CursorKind, T: Transport> Iterator for Batches<'_, K, T> {
    type Item = Result<K::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
