// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{
    read_message, write_request, Opcode, Response, DEFAULT_DIAL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};

/// Request/response channel to one server.
///
/// Resource handles only talk to the server through this trait, which lets tests swap the
/// socket for [`crate::testing::MockServer`].
pub trait Transport {
    /// Sends one request and blocks until its full response has been reassembled.
    fn request(&self, opcode: Opcode, payload: &[u8]) -> Result<Response>;

    /// Identifies the server session. Handles opened under an older session are stale.
    fn session(&self) -> u64;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn request(&self, opcode: Opcode, payload: &[u8]) -> Result<Response> {
        (**self).request(opcode, payload)
    }

    fn session(&self) -> u64 {
        (**self).session()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOption {
    DialTimeout(Duration),
    RequestTimeout(Duration),
}

/// Bounds the TCP connect. Must be non-zero.
pub fn with_dial_timeout(timeout: Duration) -> ClientOption {
    ClientOption::DialTimeout(timeout)
}

/// Bounds every socket read and write; expiry surfaces as [`Error::Timeout`]. Must be
/// non-zero.
pub fn with_request_timeout(timeout: Duration) -> ClientOption {
    ClientOption::RequestTimeout(timeout)
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    dial: Duration,
    request: Duration,
}

impl Timeouts {
    /// Zero durations are rejected since sockets cannot take them.
    fn from_options(opts: impl IntoIterator<Item = ClientOption>) -> Result<Self> {
        let mut timeouts = Timeouts {
            dial: DEFAULT_DIAL_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
        };
        for opt in opts {
            match opt {
                ClientOption::DialTimeout(timeout) => timeouts.dial = timeout,
                ClientOption::RequestTimeout(timeout) => timeouts.request = timeout,
            }
        }
        if timeouts.dial.is_zero() {
            return Err(Error::invalid_argument("dial timeout must be non-zero"));
        }
        if timeouts.request.is_zero() {
            return Err(Error::invalid_argument("request timeout must be non-zero"));
        }
        Ok(timeouts)
    }
}

#[derive(Debug)]
struct ConnState {
    stream: Option<TcpStream>,
    session: u64,
}

/// Synchronous connection to a MillenniumDB server.
///
/// The socket sits behind a mutex held for the whole of [`Client::request`], so requests on
/// one client never interleave. Use separate clients for parallel work.
#[derive(Debug)]
pub struct Client {
    addr: String,
    timeouts: Timeouts,
    state: Mutex<ConnState>,
}

/// Connects to `addr` (`host:port`).
pub fn dial(addr: &str, opts: impl IntoIterator<Item = ClientOption>) -> Result<Client> {
    let timeouts = Timeouts::from_options(opts)?;
    let stream = connect(addr, timeouts)?;
    Ok(Client {
        addr: addr.to_string(),
        timeouts,
        state: Mutex::new(ConnState {
            stream: Some(stream),
            session: 1,
        }),
    })
}

fn connect(addr: &str, timeouts: Timeouts) -> Result<TcpStream> {
    let connect_err = |source: std::io::Error| Error::Connect {
        addr: addr.to_string(),
        source,
    };

    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs().map_err(connect_err)? {
        match TcpStream::connect_timeout(&sock_addr, timeouts.dial) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(timeouts.request))?;
                stream.set_write_timeout(Some(timeouts.request))?;
                tracing::debug!(addr, peer = %sock_addr, "connected");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(connect_err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        )
    })))
}

impl Client {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.lock().stream.is_some()
    }

    /// Writes one request without waiting for the response.
    ///
    /// Callers pairing `send` with [`Client::receive`] by hand must not send again before the
    /// matching receive; [`Client::request`] does both under one lock.
    pub fn send(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let mut state = self.lock();
        send_locked(&mut state, opcode, payload)
    }

    /// Reads the next full response.
    pub fn receive(&self) -> Result<Response> {
        let mut state = self.lock();
        receive_locked(&mut state)
    }

    pub fn request(&self, opcode: Opcode, payload: &[u8]) -> Result<Response> {
        let mut state = self.lock();
        send_locked(&mut state, opcode, payload)?;
        receive_locked(&mut state)
    }

    /// Shuts the socket down. Calling it again is a no-op.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(stream) = state.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!(addr = %self.addr, "connection closed");
        }
    }

    /// Drops the current socket and dials the same address again.
    ///
    /// Server-side resources belong to the old session, so every handle opened before the
    /// reconnect reports [`Error::StaleHandle`] afterwards.
    pub fn reconnect(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(stream) = state.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let stream = connect(&self.addr, self.timeouts)?;
        state.stream = Some(stream);
        state.session += 1;
        tracing::debug!(addr = %self.addr, session = state.session, "reconnected");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for Client {
    fn request(&self, opcode: Opcode, payload: &[u8]) -> Result<Response> {
        Client::request(self, opcode, payload)
    }

    fn session(&self) -> u64 {
        self.lock().session
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_locked(state: &mut ConnState, opcode: Opcode, payload: &[u8]) -> Result<()> {
    let stream = state.stream.as_mut().ok_or(Error::NotConnected)?;
    tracing::debug!(?opcode, payload_len = payload.len(), "sending request");
    let result = write_request(stream, opcode, payload);
    poison_on_failure(state, result)
}

fn receive_locked(state: &mut ConnState) -> Result<Response> {
    let stream = state.stream.as_mut().ok_or(Error::NotConnected)?;
    let result = read_message(stream);
    match &result {
        Ok(response) => tracing::debug!(
            status = ?response.status,
            payload_len = response.payload.len(),
            "received response"
        ),
        Err(Error::Server(err)) => tracing::debug!(status = ?err.status, "server reported error"),
        Err(_) => {}
    }
    poison_on_failure(state, result)
}

/// Anything but a server-reported error leaves the byte stream out of step with the
/// request/response sequence, so the socket is dropped.
fn poison_on_failure<T>(state: &mut ConnState, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        if !matches!(err, Error::Server(_)) {
            if let Some(stream) = state.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            tracing::warn!(error = %err, "connection poisoned");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_response, read_request, StatusCode};
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn serve_once<F>(handler: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handler(stream);
        });
        (addr, handle)
    }

    #[test]
    fn request_reassembles_multi_frame_response() {
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = body.clone();
        let (addr, server) = serve_once(move |mut stream| {
            let (op, payload) = read_request(&mut stream).unwrap().unwrap();
            assert_eq!(op, Opcode::TensorStoreSize);
            assert_eq!(payload, vec![1, 2, 3]);
            stream
                .write_all(&encode_response(StatusCode::Success, &body, 4093))
                .unwrap();
        });

        let client = dial(&addr, Vec::new()).unwrap();
        let response = client.request(Opcode::TensorStoreSize, &[1, 2, 3]).unwrap();
        assert_eq!(response.status, StatusCode::Success);
        assert_eq!(response.payload, expected);
        server.join().unwrap();
    }

    #[test]
    fn server_error_keeps_connection() {
        let (addr, server) = serve_once(|mut stream| {
            read_request(&mut stream).unwrap().unwrap();
            stream
                .write_all(&encode_response(StatusCode::Exception, b"bad name", 64))
                .unwrap();
            read_request(&mut stream).unwrap().unwrap();
            stream
                .write_all(&encode_response(StatusCode::Success, b"", 64))
                .unwrap();
        });

        let client = dial(&addr, Vec::new()).unwrap();
        let err = client.request(Opcode::TensorStoreOpen, b"x").unwrap_err();
        assert!(matches!(err, Error::Server(ref e) if e.message == "bad name"));
        assert!(client.is_connected());
        client.request(Opcode::TensorStoreOpen, b"y").unwrap();
        server.join().unwrap();
    }

    #[test]
    fn peer_close_mid_message_poisons_connection() {
        let (addr, server) = serve_once(|mut stream| {
            read_request(&mut stream).unwrap().unwrap();
            let wire = encode_response(StatusCode::Success, b"partial", 64);
            stream.write_all(&wire[..10]).unwrap();
        });

        let client = dial(&addr, Vec::new()).unwrap();
        let err = client.request(Opcode::NodeIteratorNext, &[]).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(!client.is_connected());
        assert!(matches!(
            client.request(Opcode::NodeIteratorNext, &[]),
            Err(Error::NotConnected)
        ));
        server.join().unwrap();
    }

    #[test]
    fn read_timeout_surfaces_as_timeout() {
        let (addr, server) = serve_once(|mut stream| {
            read_request(&mut stream).unwrap().unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let client = dial(&addr, [with_request_timeout(Duration::from_millis(50))]).unwrap();
        let err = client.request(Opcode::TensorStoreList, &[]).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        server.join().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_fails_fast() {
        let (addr, server) = serve_once(|_stream| {});
        let client = dial(&addr, Vec::new()).unwrap();
        client.close();
        client.close();
        assert!(matches!(
            client.send(Opcode::TensorStoreList, &[]),
            Err(Error::NotConnected)
        ));
        assert!(matches!(client.receive(), Err(Error::NotConnected)));
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = dial(&addr, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[test]
    fn zero_timeouts_are_rejected_before_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        for opt in [
            with_request_timeout(Duration::ZERO),
            with_dial_timeout(Duration::ZERO),
        ] {
            let err = dial(&addr, [opt]).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");
            assert!(!crate::error::is_connection_error(&err));
        }

        listener.set_nonblocking(true).unwrap();
        assert!(listener.accept().is_err());
    }

    #[test]
    fn options_override_defaults() {
        let timeouts = Timeouts::from_options([
            with_dial_timeout(Duration::from_secs(1)),
            with_request_timeout(Duration::from_secs(2)),
        ])
        .unwrap();
        assert_eq!(timeouts.dial, Duration::from_secs(1));
        assert_eq!(timeouts.request, Duration::from_secs(2));
    }
}
