// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Open/operate/close lifecycle shared by every server-side resource.

use crate::client::Transport;
use crate::codec::{pack_u64, PayloadReader};
use crate::error::{Error, Result};
use crate::protocol::{Opcode, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Unopened,
    Open,
    Closed,
}

/// Client-side proxy for a server-allocated resource.
///
/// Operations check the local state before touching the transport, so a closed or stale
/// handle never produces network traffic. An open handle closes itself when dropped.
#[derive(Debug)]
pub struct ResourceHandle<T: Transport> {
    transport: T,
    resource: &'static str,
    close_opcode: Opcode,
    state: HandleState,
    server_id: Option<u64>,
    session: u64,
}

impl<T: Transport> ResourceHandle<T> {
    pub fn new(transport: T, resource: &'static str, close_opcode: Opcode) -> Self {
        Self {
            transport,
            resource,
            close_opcode,
            state: HandleState::Unopened,
            server_id: None,
            session: 0,
        }
    }

    /// Sends the open request and reads the server id that leads its response. `decode`
    /// gets the rest of the payload for resource-specific metadata. If `decode` fails, the
    /// server id is released with a close request and the handle stays unopened.
    pub fn open<R>(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        decode: impl FnOnce(&mut PayloadReader<'_>) -> Result<R>,
    ) -> Result<R> {
        match self.state {
            HandleState::Unopened => {}
            HandleState::Open => {
                return Err(Error::invalid_argument(format!(
                    "{} is already open",
                    self.resource
                )))
            }
            HandleState::Closed => {
                return Err(Error::HandleClosed {
                    resource: self.resource,
                })
            }
        }

        let session = self.transport.session();
        let response = self.transport.request(opcode, payload)?;
        let mut reader = PayloadReader::new(&response.payload);
        let server_id = reader.read_u64("server id")?;
        let meta = match decode(&mut reader) {
            Ok(meta) => meta,
            Err(err) => {
                self.release(server_id);
                return Err(err);
            }
        };

        self.server_id = Some(server_id);
        self.session = session;
        self.state = HandleState::Open;
        tracing::info!(resource = self.resource, server_id, "opened");
        Ok(meta)
    }

    /// Best-effort close of a server id that never reached the open state.
    fn release(&self, server_id: u64) {
        let mut payload = Vec::with_capacity(8);
        let result = pack_u64(&mut payload, server_id)
            .and_then(|()| self.transport.request(self.close_opcode, &payload));
        if let Err(err) = result {
            tracing::warn!(
                resource = self.resource,
                server_id,
                error = %err,
                "release after failed open failed"
            );
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state != HandleState::Open
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the server id, or the local error explaining why the handle is unusable.
    pub fn server_id(&self) -> Result<u64> {
        let server_id = match (self.state, self.server_id) {
            (HandleState::Open, Some(id)) => id,
            _ => {
                return Err(Error::HandleClosed {
                    resource: self.resource,
                })
            }
        };
        if self.transport.session() != self.session {
            return Err(Error::StaleHandle {
                resource: self.resource,
            });
        }
        Ok(server_id)
    }

    /// Sends `[server_id]` followed by whatever `build` appends.
    pub fn call(
        &self,
        opcode: Opcode,
        build: impl FnOnce(&mut Vec<u8>) -> Result<()>,
    ) -> Result<Response> {
        let server_id = self.server_id()?;
        let mut payload = Vec::with_capacity(64);
        pack_u64(&mut payload, server_id)?;
        build(&mut payload)?;
        self.transport.request(opcode, &payload)
    }

    /// Releases the server resource. Only the first call on an open handle does I/O; a
    /// handle from a previous session is closed locally since the server already dropped it.
    pub fn close(&mut self) -> Result<()> {
        if self.state != HandleState::Open {
            self.state = HandleState::Closed;
            return Ok(());
        }

        let result = match self.server_id() {
            Ok(_) => self.call(self.close_opcode, |_| Ok(())).map(|_| ()),
            Err(Error::StaleHandle { .. }) => Ok(()),
            Err(err) => Err(err),
        };

        tracing::info!(
            resource = self.resource,
            server_id = ?self.server_id,
            ok = result.is_ok(),
            "closed"
        );
        self.server_id = None;
        self.state = HandleState::Closed;
        result
    }
}

impl<T: Transport> Drop for ResourceHandle<T> {
    fn drop(&mut self) {
        if self.state == HandleState::Open {
            if let Err(err) = self.close() {
                tracing::warn!(resource = self.resource, error = %err, "close on drop failed");
            }
        }
    }
}
