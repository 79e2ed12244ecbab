// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Big-endian packing of the primitive values carried in request and response payloads.
//!
//! Strings are `[len: u64][utf8]`, vectors are `[count: u64][elements]`. Every `pack_*`
//! function has a matching [`PayloadReader`] method that consumes exactly the bytes it wrote.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const U64_WIDTH: usize = 8;
pub const F32_WIDTH: usize = 4;

pub fn pack_byte<W: Write>(writer: &mut W, value: u8) -> Result<()> {
    writer.write_u8(value)?;
    Ok(())
}

pub fn pack_bool<W: Write>(writer: &mut W, value: bool) -> Result<()> {
    pack_byte(writer, u8::from(value))
}

pub fn pack_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_u64::<BigEndian>(value)?;
    Ok(())
}

pub fn pack_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_f32::<BigEndian>(value)?;
    Ok(())
}

pub fn pack_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    pack_u64(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

pub fn pack_u64_vector<W: Write>(writer: &mut W, values: &[u64]) -> Result<()> {
    pack_u64(writer, values.len() as u64)?;
    for value in values {
        pack_u64(writer, *value)?;
    }
    Ok(())
}

pub fn pack_f32_vector<W: Write>(writer: &mut W, values: &[f32]) -> Result<()> {
    pack_u64(writer, values.len() as u64)?;
    for value in values {
        pack_f32(writer, *value)?;
    }
    Ok(())
}

pub fn pack_string_vector<W: Write, S: AsRef<str>>(writer: &mut W, values: &[S]) -> Result<()> {
    pack_u64(writer, values.len() as u64)?;
    for value in values {
        pack_string(writer, value.as_ref())?;
    }
    Ok(())
}

/// Decodes a bare run of u64 values. The input must hold a whole number of elements.
pub fn unpack_u64_slice(data: &[u8]) -> Result<Vec<u64>> {
    if data.len() % U64_WIDTH != 0 {
        return Err(Error::malformed(format!(
            "u64 vector of {} bytes is not a multiple of {U64_WIDTH}",
            data.len()
        )));
    }
    PayloadReader::new(data).read_u64_array(data.len() / U64_WIDTH, "u64 vector")
}

/// Decodes a bare run of f32 values. The input must hold a whole number of elements.
pub fn unpack_f32_slice(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % F32_WIDTH != 0 {
        return Err(Error::malformed(format!(
            "f32 vector of {} bytes is not a multiple of {F32_WIDTH}",
            data.len()
        )));
    }
    PayloadReader::new(data).read_f32_array(data.len() / F32_WIDTH, "f32 vector")
}

/// Sequential reader over a response payload.
///
/// Every read names the field it decodes so a short payload reports which field ran out.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    pub fn read_byte(&mut self, field: &str) -> Result<u8> {
        self.cursor.read_u8().map_err(|err| short(field, err))
    }

    pub fn read_bool(&mut self, field: &str) -> Result<bool> {
        Ok(self.read_byte(field)? != 0)
    }

    pub fn read_u64(&mut self, field: &str) -> Result<u64> {
        self.cursor
            .read_u64::<BigEndian>()
            .map_err(|err| short(field, err))
    }

    pub fn read_f32(&mut self, field: &str) -> Result<f32> {
        self.cursor
            .read_f32::<BigEndian>()
            .map_err(|err| short(field, err))
    }

    pub fn read_string(&mut self, field: &str) -> Result<String> {
        let len = self.read_u64(field)?;
        let len = self.checked_len(len, 1, field)?;
        let mut bytes = vec![0u8; len];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|err| short(field, err))?;
        String::from_utf8(bytes).map_err(|_| Error::malformed(format!("{field} is not utf8")))
    }

    /// Reads `count` u64 values with no count prefix.
    pub fn read_u64_array(&mut self, count: usize, field: &str) -> Result<Vec<u64>> {
        self.checked_len(count as u64, U64_WIDTH, field)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_u64(field)?);
        }
        Ok(values)
    }

    /// Reads `count` f32 values with no count prefix.
    pub fn read_f32_array(&mut self, count: usize, field: &str) -> Result<Vec<f32>> {
        self.checked_len(count as u64, F32_WIDTH, field)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_f32(field)?);
        }
        Ok(values)
    }

    pub fn read_u64_vector(&mut self, field: &str) -> Result<Vec<u64>> {
        let count = self.read_u64(field)?;
        let count = self.checked_len(count, U64_WIDTH, field)? / U64_WIDTH;
        self.read_u64_array(count, field)
    }

    pub fn read_f32_vector(&mut self, field: &str) -> Result<Vec<f32>> {
        let count = self.read_u64(field)?;
        let count = self.checked_len(count, F32_WIDTH, field)? / F32_WIDTH;
        self.read_f32_array(count, field)
    }

    pub fn read_string_vector(&mut self, field: &str) -> Result<Vec<String>> {
        let count = self.read_u64(field)?;
        // Each string carries at least its u64 length prefix.
        let count = self.checked_len(count, U64_WIDTH, field)? / U64_WIDTH;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_string(field)?);
        }
        Ok(values)
    }

    /// Validates that `count` elements of `width` bytes fit in what is left, returning the
    /// byte length. Keeps a corrupt count from driving a huge allocation.
    fn checked_len(&self, count: u64, width: usize, field: &str) -> Result<usize> {
        let needed = count
            .checked_mul(width as u64)
            .filter(|needed| *needed <= self.remaining() as u64)
            .ok_or_else(|| {
                Error::malformed(format!(
                    "{field} declares {count} elements but only {} bytes remain",
                    self.remaining()
                ))
            })?;
        Ok(needed as usize)
    }
}

fn short(field: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::malformed(format!("{field} truncated"))
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = Vec::new();
        pack_u64(&mut buf, 0x0102_0304_0506_0708).unwrap();
        pack_f32(&mut buf, 1.0).unwrap();
        pack_bool(&mut buf, true).unwrap();
        assert_eq!(
            buf,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 0x3f, 0x80, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn string_and_vectors_are_prefixed() {
        let mut buf = Vec::new();
        pack_string(&mut buf, "ab").unwrap();
        pack_u64_vector(&mut buf, &[7]).unwrap();
        let mut expected = vec![0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b'];
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(buf, expected);
    }

    #[test]
    fn reader_consumes_fields_in_order() {
        let mut buf = Vec::new();
        pack_bool(&mut buf, false).unwrap();
        pack_string(&mut buf, "nodes").unwrap();
        pack_f32_vector(&mut buf, &[1.5, -2.0]).unwrap();
        pack_string_vector(&mut buf, &["a", "bc"]).unwrap();

        let mut reader = PayloadReader::new(&buf);
        assert!(!reader.read_bool("flag").unwrap());
        assert_eq!(reader.read_string("name").unwrap(), "nodes");
        assert_eq!(reader.read_f32_vector("tensor").unwrap(), vec![1.5, -2.0]);
        assert_eq!(
            reader.read_string_vector("names").unwrap(),
            vec!["a".to_string(), "bc".to_string()]
        );
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncated_field_is_malformed() {
        let err = PayloadReader::new(&[0, 0, 1]).read_u64("size").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(msg) if msg == "size truncated"));
    }

    #[test]
    fn oversized_count_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        pack_u64(&mut buf, u64::MAX).unwrap();
        let err = PayloadReader::new(&buf).read_u64_vector("ids").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn bare_slices_require_whole_elements() {
        assert!(matches!(
            unpack_u64_slice(&[0; 12]),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            unpack_f32_slice(&[0; 6]),
            Err(Error::MalformedPayload(_))
        ));
        assert_eq!(unpack_u64_slice(&[0, 0, 0, 0, 0, 0, 0, 9]).unwrap(), vec![9]);
        assert!(unpack_f32_slice(&[]).unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_string_is_malformed() {
        let mut buf = Vec::new();
        pack_u64(&mut buf, 2).unwrap();
        buf.extend_from_slice(&[0xff, 0xfe]);
        let err = PayloadReader::new(&buf).read_string("name").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(msg) if msg == "name is not utf8"));
    }
}
