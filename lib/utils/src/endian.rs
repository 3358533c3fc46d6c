//! ## Endianness Module
//! Helpers for packing and unpacking big-endian fields in byte records.
//!
//! Device payloads and the aggregate device record are big-endian regardless of the host,
//! so encoding goes through [BigEndianWriter] and decoding through [BigEndianReader].

use alloc::vec::Vec;

/// Append big-endian encoded integers to a byte buffer.
pub trait BigEndianWriter {
    fn put_u8(&mut self, value: u8);
    fn put_u16_be(&mut self, value: u16);
    fn put_i16_be(&mut self, value: i16);
    fn put_u32_be(&mut self, value: u32);
}

impl BigEndianWriter for Vec<u8> {
    #[inline(always)]
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }
    #[inline(always)]
    fn put_u16_be(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }
    #[inline(always)]
    fn put_i16_be(&mut self, value: i16) {
        self.extend_from_slice(&value.to_be_bytes());
    }
    #[inline(always)]
    fn put_u32_be(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }
}

/// Cursor over a byte slice that reads big-endian fields.
///
/// Every read returns [None] instead of panicking when the slice is too short; the cursor
/// does not advance on a failed read.
#[derive(Debug, Clone)]
pub struct BigEndianReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BigEndianReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BigEndianReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let res = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(res)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Option<i16> {
        self.u16().map(|v| v as i16)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
