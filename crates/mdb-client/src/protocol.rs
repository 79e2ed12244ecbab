// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of every physical response chunk, header included.
pub const FRAME_SIZE: usize = 4096;
/// Status byte plus the u16 used-length field.
pub const FRAME_HEADER_SIZE: usize = 3;
pub const MAX_FRAME_PAYLOAD: usize = FRAME_SIZE - FRAME_HEADER_SIZE;
/// Opcode byte plus the u64 payload length.
pub const REQUEST_HEADER_SIZE: usize = 9;

pub const LAST_FRAME_MASK: u8 = 0b1000_0000;
pub const ERROR_MASK: u8 = 0b0100_0000;
pub const CODE_MASK: u8 = 0b0011_1111;

/// Request kinds. Values are part of the wire contract and are never reused.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    SamplerSubgraph = 0x01,
    SamplerSubgraphEdgeExistence = 0x02,
    SamplerGetSeeds = 0x03,

    TensorStoreExists = 0x10,
    TensorStoreCreate = 0x11,
    TensorStoreRemove = 0x12,
    TensorStoreList = 0x13,
    TensorStoreOpen = 0x14,
    TensorStoreClose = 0x15,
    TensorStoreContains = 0x16,
    TensorStoreInsert = 0x17,
    TensorStoreMultiInsert = 0x18,
    TensorStoreGet = 0x19,
    TensorStoreMultiGet = 0x1A,
    TensorStoreSize = 0x1B,
    TensorStoreIsOpen = 0x1C,

    NodeIteratorNew = 0x20,
    NodeIteratorBegin = 0x21,
    NodeIteratorNext = 0x22,
    NodeIteratorClose = 0x23,

    TrainGraphLoaderNew = 0x30,
    EvalGraphLoaderNew = 0x31,
    SamplingGraphLoaderNew = 0x32,
    GraphLoaderBegin = 0x33,
    GraphLoaderNext = 0x34,
    GraphLoaderClose = 0x35,
}

impl Opcode {
    pub const ALL: [Opcode; 26] = [
        Opcode::SamplerSubgraph,
        Opcode::SamplerSubgraphEdgeExistence,
        Opcode::SamplerGetSeeds,
        Opcode::TensorStoreExists,
        Opcode::TensorStoreCreate,
        Opcode::TensorStoreRemove,
        Opcode::TensorStoreList,
        Opcode::TensorStoreOpen,
        Opcode::TensorStoreClose,
        Opcode::TensorStoreContains,
        Opcode::TensorStoreInsert,
        Opcode::TensorStoreMultiInsert,
        Opcode::TensorStoreGet,
        Opcode::TensorStoreMultiGet,
        Opcode::TensorStoreSize,
        Opcode::TensorStoreIsOpen,
        Opcode::NodeIteratorNew,
        Opcode::NodeIteratorBegin,
        Opcode::NodeIteratorNext,
        Opcode::NodeIteratorClose,
        Opcode::TrainGraphLoaderNew,
        Opcode::EvalGraphLoaderNew,
        Opcode::SamplingGraphLoaderNew,
        Opcode::GraphLoaderBegin,
        Opcode::GraphLoaderNext,
        Opcode::GraphLoaderClose,
    ];

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Opcode::ALL
            .into_iter()
            .find(|op| op.as_byte() == value)
            .ok_or_else(|| Error::malformed(format!("unknown opcode {value:#04x}")))
    }
}

/// Message status carried by the terminating frame. The error bit is part of the value, so
/// `Exception` is `0x40`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    EndOfIteration,
    Exception,
    UnexpectedError,
    Other(u8),
}

impl StatusCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte & (ERROR_MASK | CODE_MASK) {
            0x00 => StatusCode::Success,
            0x01 => StatusCode::EndOfIteration,
            0x40 => StatusCode::Exception,
            0x41 => StatusCode::UnexpectedError,
            other => StatusCode::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            StatusCode::Success => 0x00,
            StatusCode::EndOfIteration => 0x01,
            StatusCode::Exception => 0x40,
            StatusCode::UnexpectedError => 0x41,
            StatusCode::Other(value) => value & (ERROR_MASK | CODE_MASK),
        }
    }

    pub fn is_error(self) -> bool {
        is_error(self.as_byte())
    }
}

pub fn is_last_frame(status: u8) -> bool {
    status & LAST_FRAME_MASK != 0
}

pub fn is_error(status: u8) -> bool {
    status & ERROR_MASK != 0
}

pub fn status_code(status: u8) -> u8 {
    status & CODE_MASK
}

/// One reassembled server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, payload: Vec<u8>) -> Self {
        Self { status, payload }
    }

    pub fn success(payload: Vec<u8>) -> Self {
        Self::new(StatusCode::Success, payload)
    }

    pub fn end_of_iteration() -> Self {
        Self::new(StatusCode::EndOfIteration, Vec::new())
    }

    pub fn is_end_of_iteration(&self) -> bool {
        self.status == StatusCode::EndOfIteration
    }
}

/// Builds `[opcode][payload_len: u64][payload]`.
pub fn encode_request(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; REQUEST_HEADER_SIZE + payload.len()];
    buf[0] = opcode.as_byte();
    BigEndian::write_u64(&mut buf[1..REQUEST_HEADER_SIZE], payload.len() as u64);
    buf[REQUEST_HEADER_SIZE..].copy_from_slice(payload);
    buf
}

/// Writes one request. `write_all` retries short writes until every byte is accepted.
pub fn write_request<W: Write>(writer: &mut W, opcode: Opcode, payload: &[u8]) -> Result<()> {
    writer
        .write_all(&encode_request(opcode, payload))
        .map_err(Error::from_socket)?;
    writer.flush().map_err(Error::from_socket)?;
    Ok(())
}

/// Server side of [`write_request`]. Returns `None` on a clean EOF before the header.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Option<(Opcode, Vec<u8>)>> {
    let opcode = match reader.read_u8() {
        Ok(byte) => Opcode::try_from(byte)?,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(Error::from_socket(err)),
    };
    let len = reader
        .read_u64::<BigEndian>()
        .map_err(Error::from_socket)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::malformed(format!("request length {len} does not fit in memory")))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(Error::from_socket)?;
    Ok(Some((opcode, payload)))
}

/// One physical response chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub status: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_last(&self) -> bool {
        is_last_frame(self.status)
    }
}

/// Reads exactly one `FRAME_SIZE` chunk. A peer that closes mid-chunk is reported as
/// `ConnectionClosed`, never as a short frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut chunk = [0u8; FRAME_SIZE];
    reader.read_exact(&mut chunk).map_err(Error::from_socket)?;

    let status = chunk[0];
    let used = LittleEndian::read_u16(&chunk[1..FRAME_HEADER_SIZE]) as usize;
    if !(FRAME_HEADER_SIZE..=FRAME_SIZE).contains(&used) {
        return Err(Error::malformed(format!(
            "frame declares {used} used bytes, expected {FRAME_HEADER_SIZE}..={FRAME_SIZE}"
        )));
    }

    Ok(Frame {
        status,
        payload: chunk[FRAME_HEADER_SIZE..used].to_vec(),
    })
}

/// Reads frames until the last one and concatenates their payloads. The terminating frame
/// carries the status of the whole message; an error status becomes `Error::Server` with the
/// payload as its message.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Response> {
    let mut payload = Vec::new();
    let status = loop {
        let frame = read_frame(reader)?;
        payload.extend_from_slice(&frame.payload);
        if frame.is_last() {
            break frame.status;
        }
    };

    let code = StatusCode::from_byte(status);
    if is_error(status) {
        return Err(Error::server(
            code,
            String::from_utf8_lossy(&payload).into_owned(),
        ));
    }
    Ok(Response::new(code, payload))
}

/// Splits a response into frames carrying at most `chunk` payload bytes each (capped at
/// [`MAX_FRAME_PAYLOAD`]). An empty payload still produces one terminating frame.
pub fn encode_response(status: StatusCode, payload: &[u8], chunk: usize) -> Vec<u8> {
    let chunk = chunk.clamp(1, MAX_FRAME_PAYLOAD);
    let pieces: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(chunk).collect()
    };

    let mut out = Vec::with_capacity(pieces.len() * FRAME_SIZE);
    let last_index = pieces.len() - 1;
    for (index, piece) in pieces.into_iter().enumerate() {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = status.as_byte();
        if index == last_index {
            frame[0] |= LAST_FRAME_MASK;
        }
        let used = (FRAME_HEADER_SIZE + piece.len()) as u16;
        LittleEndian::write_u16(&mut frame[1..FRAME_HEADER_SIZE], used);
        frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + piece.len()].copy_from_slice(piece);
        out.extend_from_slice(&frame);
    }
    out
}
