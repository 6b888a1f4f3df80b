//! Byte cursors for the fixed-layout on-disk records.
//!
//! Addresses and lengths are variable-width (`sizeof_addr` / `sizeof_size`
//! bytes) and every multi-byte integer honours the container byte order.
//! An address made of all-one bytes decodes to [`Address::UNDEF`].

use crate::address::{Address, HeapOffset};
use crate::error::TypeError;
use crate::params::{max_for_width, ByteOrder, FormatParams};

/// Appends encoded fields to a byte buffer.
pub struct Encoder<'a> {
    buf: &'a mut Vec<u8>,
    order: ByteOrder,
    sizeof_addr: u8,
    sizeof_size: u8,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut Vec<u8>, params: &FormatParams) -> Self {
        Self {
            buf,
            order: params.byte_order,
            sizeof_addr: params.sizeof_addr,
            sizeof_size: params.sizeof_size,
        }
    }

    /// Number of bytes in the underlying buffer.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    /// Zero-fill up to an absolute buffer length. No-op if already past it.
    pub fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    /// Encode an unsigned integer in `width` bytes.
    pub fn put_uint(&mut self, value: u64, width: u8) -> Result<(), TypeError> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(TypeError::InvalidWidth(width));
        }
        if value > max_for_width(width) {
            return Err(TypeError::Overflow { value, width });
        }
        let width = width as usize;
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()[..width]),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()[8 - width..]),
        }
        Ok(())
    }

    pub fn put_addr(&mut self, addr: Address) -> Result<(), TypeError> {
        if !addr.is_defined() {
            self.put_bytes(&vec![0xff; self.sizeof_addr as usize]);
            return Ok(());
        }
        if addr.value() >= max_for_width(self.sizeof_addr) {
            return Err(TypeError::Overflow {
                value: addr.value(),
                width: self.sizeof_addr,
            });
        }
        self.put_uint(addr.value(), self.sizeof_addr)
    }

    pub fn put_length(&mut self, value: u64) -> Result<(), TypeError> {
        self.put_uint(value, self.sizeof_size)
    }

    pub fn put_offset(&mut self, offset: HeapOffset) -> Result<(), TypeError> {
        self.put_length(offset.value())
    }
}

/// Reads encoded fields from a byte slice.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
    sizeof_addr: u8,
    sizeof_size: u8,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], params: &FormatParams) -> Self {
        Self {
            data,
            pos: 0,
            order: params.byte_order,
            sizeof_addr: params.sizeof_addr,
            sizeof_size: params.sizeof_size,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move the cursor to an absolute position.
    pub fn seek(&mut self, pos: usize) -> Result<(), TypeError> {
        if pos > self.data.len() {
            return Err(TypeError::Truncated {
                needed: pos,
                remaining: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn get_bytes(&mut self, count: usize) -> Result<&'a [u8], TypeError> {
        if self.remaining() < count {
            return Err(TypeError::Truncated {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), TypeError> {
        self.get_bytes(count).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8, TypeError> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, TypeError> {
        Ok(self.get_uint(2)? as u16)
    }

    pub fn get_u32(&mut self) -> Result<u32, TypeError> {
        Ok(self.get_uint(4)? as u32)
    }

    /// Decode an unsigned integer stored in `width` bytes.
    pub fn get_uint(&mut self, width: u8) -> Result<u64, TypeError> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(TypeError::InvalidWidth(width));
        }
        let order = self.order;
        let bytes = self.get_bytes(width as usize)?;
        let mut raw = [0u8; 8];
        let value = match order {
            ByteOrder::Little => {
                raw[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(raw)
            }
            ByteOrder::Big => {
                raw[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(raw)
            }
        };
        Ok(value)
    }

    pub fn get_addr(&mut self) -> Result<Address, TypeError> {
        let width = self.sizeof_addr;
        let raw = self.get_uint(width)?;
        if raw == max_for_width(width) {
            Ok(Address::UNDEF)
        } else {
            Ok(Address::new(raw))
        }
    }

    pub fn get_length(&mut self) -> Result<u64, TypeError> {
        self.get_uint(self.sizeof_size)
    }

    pub fn get_offset(&mut self) -> Result<HeapOffset, TypeError> {
        Ok(HeapOffset::new(self.get_length()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(addr: u8, size: u8, order: ByteOrder) -> FormatParams {
        FormatParams {
            sizeof_addr: addr,
            sizeof_size: size,
            byte_order: order,
            ..Default::default()
        }
    }

    #[test]
    fn little_endian_layout() {
        let p = params(4, 2, ByteOrder::Little);
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, &p);
        enc.put_addr(Address::new(0x0102_0304)).unwrap();
        enc.put_length(0x0a0b).unwrap();
        assert_eq!(buf, vec![0x04, 0x03, 0x02, 0x01, 0x0b, 0x0a]);
    }

    #[test]
    fn big_endian_layout() {
        let p = params(4, 2, ByteOrder::Big);
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, &p);
        enc.put_addr(Address::new(0x0102_0304)).unwrap();
        enc.put_u32(7);
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04, 0, 0, 0, 7]);
    }

    #[test]
    fn undef_address_is_all_ones() {
        let p = params(2, 2, ByteOrder::Little);
        let mut buf = Vec::new();
        Encoder::new(&mut buf, &p).put_addr(Address::UNDEF).unwrap();
        assert_eq!(buf, vec![0xff, 0xff]);
        let mut dec = Decoder::new(&buf, &p);
        assert_eq!(dec.get_addr().unwrap(), Address::UNDEF);
    }

    #[test]
    fn address_overflow_is_rejected() {
        let p = params(2, 2, ByteOrder::Little);
        let mut buf = Vec::new();
        let err = Encoder::new(&mut buf, &p)
            .put_addr(Address::new(0x1_0000))
            .unwrap_err();
        assert_eq!(
            err,
            TypeError::Overflow {
                value: 0x1_0000,
                width: 2
            }
        );
    }

    #[test]
    fn truncated_read_fails() {
        let p = FormatParams::default();
        let mut dec = Decoder::new(&[1, 2, 3], &p);
        let err = dec.get_addr().unwrap_err();
        assert_eq!(
            err,
            TypeError::Truncated {
                needed: 8,
                remaining: 3
            }
        );
    }

    #[test]
    fn pad_to_fills_with_zeros() {
        let p = FormatParams::default();
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf, &p);
        enc.put_u8(9);
        enc.pad_to(4);
        enc.pad_to(2);
        assert_eq!(buf, vec![9, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn uint_roundtrip(value in any::<u32>(), big in any::<bool>()) {
            let order = if big { ByteOrder::Big } else { ByteOrder::Little };
            let p = params(8, 4, order);
            let mut buf = Vec::new();
            Encoder::new(&mut buf, &p).put_length(value as u64).unwrap();
            let mut dec = Decoder::new(&buf, &p);
            prop_assert_eq!(dec.get_length().unwrap(), value as u64);
            prop_assert_eq!(dec.remaining(), 0);
        }
    }
}
