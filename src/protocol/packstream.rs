// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! PackStream, the self-describing binary encoding Bolt messages are made
//! of. Packing always picks the smallest size class that can hold a value.

use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::value::Value;

// size-class limits shared by strings, bytes, lists, and maps
const TINY_MAX: usize = 15;
const U8_MAX: usize = u8::MAX as usize;
const U16_MAX: usize = u16::MAX as usize;
const U32_MAX: usize = i32::MAX as usize;

pub(crate) fn pack_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push(0xC0),
        Value::Boolean(false) => out.push(0xC2),
        Value::Boolean(true) => out.push(0xC3),
        Value::Integer(i) => pack_int(out, *i),
        Value::Float(f) => {
            out.push(0xC1);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bytes(bytes) => {
            sized_marker(out, bytes.len(), [None, Some(0xCC), Some(0xCD), Some(0xCE)])
                .ok_or_else(|| Error::config("byte array too long for the wire"))?;
            out.extend_from_slice(bytes);
        }
        Value::String(string) => pack_string(out, string)?,
        Value::List(values) => {
            pack_list_header(out, values.len())?;
            for value in values {
                pack_value(out, value)?;
            }
        }
        Value::Map(entries) => {
            pack_map_header(out, entries.len())?;
            for (key, value) in entries {
                pack_string(out, key)?;
                pack_value(out, value)?;
            }
        }
        Value::Struct { tag, fields } => {
            let size: u8 = fields
                .len()
                .try_into()
                .ok()
                .filter(|size| *size <= 15)
                .ok_or_else(|| Error::config("structure has too many fields for the wire"))?;
            pack_struct_header(out, *tag, size);
            for field in fields {
                pack_value(out, field)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn pack_int(out: &mut Vec<u8>, i: i64) {
    match i {
        -16..=127 => out.push(i as u8),
        -128..=127 => {
            out.push(0xC8);
            out.push(i as u8);
        }
        -32_768..=32_767 => {
            out.push(0xC9);
            out.extend_from_slice(&(i as i16).to_be_bytes());
        }
        -2_147_483_648..=2_147_483_647 => {
            out.push(0xCA);
            out.extend_from_slice(&(i as i32).to_be_bytes());
        }
        _ => {
            out.push(0xCB);
            out.extend_from_slice(&i.to_be_bytes());
        }
    }
}

pub(crate) fn pack_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    sized_marker(out, s.len(), [Some(0x80), Some(0xD0), Some(0xD1), Some(0xD2)])
        .ok_or_else(|| Error::config("string too long for the wire"))?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn pack_list_header(out: &mut Vec<u8>, len: usize) -> Result<()> {
    sized_marker(out, len, [Some(0x90), Some(0xD4), Some(0xD5), Some(0xD6)])
        .ok_or_else(|| Error::config("list too long for the wire"))
}

pub(crate) fn pack_map_header(out: &mut Vec<u8>, len: usize) -> Result<()> {
    sized_marker(out, len, [Some(0xA0), Some(0xD8), Some(0xD9), Some(0xDA)])
        .ok_or_else(|| Error::config("map too large for the wire"))
}

pub(crate) fn pack_struct_header(out: &mut Vec<u8>, tag: u8, size: u8) {
    out.push(0xB0 + size);
    out.push(tag);
}

/// Writes the marker (and size, where not tiny) for one of the four size
/// classes. `markers` holds the tiny nibble base and the 8/16/32 bit
/// markers; `None` means the class does not exist for this type.
fn sized_marker(out: &mut Vec<u8>, len: usize, markers: [Option<u8>; 4]) -> Option<()> {
    match (len, markers) {
        (0..=TINY_MAX, [Some(tiny), ..]) => out.push(tiny + len as u8),
        (0..=U8_MAX, [_, Some(m8), ..]) => {
            out.push(m8);
            out.push(len as u8);
        }
        (0..=U16_MAX, [_, _, Some(m16), _]) => {
            out.push(m16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        (0..=U32_MAX, [_, _, _, Some(m32)]) => {
            out.push(m32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
        _ => return None,
    }
    Some(())
}

/// Decodes values from a fully received message.
pub(crate) struct Unpacker<'a> {
    bytes: &'a [u8],
}

impl<'a> Unpacker<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(Error::protocol("message ended in the middle of a value"));
        }
        let (taken, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(taken)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn be_uint(&mut self, width: usize) -> Result<usize> {
        let bytes = self.take(width)?;
        let mut value = 0usize;
        for byte in bytes {
            value = value
                .checked_shl(8)
                .and_then(|v| v.checked_add(*byte as usize))
                .ok_or_else(|| Error::protocol("collection size overflows this platform"))?;
        }
        Ok(value)
    }

    pub(crate) fn value(&mut self) -> Result<Value> {
        let marker = self.byte()?;
        Ok(match marker {
            0xC0 => Value::Null,
            0xC2 => Value::Boolean(false),
            0xC3 => Value::Boolean(true),
            // tiny ints live in the marker byte itself
            0x00..=0x7F | 0xF0..=0xFF => Value::Integer(i64::from(marker as i8)),
            0xC8 => Value::Integer(i64::from(self.byte()? as i8)),
            0xC9 => {
                let bytes: [u8; 2] = self.take(2)?.try_into().expect("took exactly 2");
                Value::Integer(i64::from(i16::from_be_bytes(bytes)))
            }
            0xCA => {
                let bytes: [u8; 4] = self.take(4)?.try_into().expect("took exactly 4");
                Value::Integer(i64::from(i32::from_be_bytes(bytes)))
            }
            0xCB => {
                let bytes: [u8; 8] = self.take(8)?.try_into().expect("took exactly 8");
                Value::Integer(i64::from_be_bytes(bytes))
            }
            0xC1 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().expect("took exactly 8");
                Value::Float(f64::from_be_bytes(bytes))
            }
            0xCC | 0xCD | 0xCE => {
                let width = 1 << (marker - 0xCC);
                let len = self.be_uint(width)?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            0x80..=0x8F => self.string_body((marker - 0x80) as usize)?,
            0xD0 | 0xD1 | 0xD2 => {
                let width = 1 << (marker - 0xD0);
                let len = self.be_uint(width)?;
                self.string_body(len)?
            }
            0x90..=0x9F => self.list_body((marker - 0x90) as usize)?,
            0xD4 | 0xD5 | 0xD6 => {
                let width = 1 << (marker - 0xD4);
                let len = self.be_uint(width)?;
                self.list_body(len)?
            }
            0xA0..=0xAF => self.map_body((marker - 0xA0) as usize)?,
            0xD8 | 0xD9 | 0xDA => {
                let width = 1 << (marker - 0xD8);
                let len = self.be_uint(width)?;
                self.map_body(len)?
            }
            0xB0..=0xBF => {
                let size = (marker - 0xB0) as usize;
                let tag = self.byte()?;
                let mut fields = Vec::with_capacity(size);
                for _ in 0..size {
                    fields.push(self.value()?);
                }
                Value::Struct { tag, fields }
            }
            other => {
                return Err(Error::protocol(format!(
                    "unknown PackStream marker {other:#04X}"
                )))
            }
        })
    }

    fn string_body(&mut self, len: usize) -> Result<Value> {
        let bytes = self.take(len)?;
        Ok(Value::String(
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    }

    fn list_body(&mut self, len: usize) -> Result<Value> {
        let mut values = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            values.push(self.value()?);
        }
        Ok(Value::List(values))
    }

    fn map_body(&mut self, len: usize) -> Result<Value> {
        let mut entries = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match self.value()? {
                Value::String(key) => key,
                other => {
                    return Err(Error::protocol(format!(
                        "map key must be a string, got {}",
                        other.kind()
                    )))
                }
            };
            entries.insert(key, self.value()?);
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::value_map;

    fn packed(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        pack_value(&mut out, value).unwrap();
        out
    }

    fn unpacked(bytes: &[u8]) -> Value {
        let mut unpacker = Unpacker::new(bytes);
        let value = unpacker.value().unwrap();
        assert!(unpacker.exhausted(), "decoder left bytes behind");
        value
    }

    #[rstest]
    #[case(Value::Null, vec![0xC0])]
    #[case(Value::Boolean(false), vec![0xC2])]
    #[case(Value::Boolean(true), vec![0xC3])]
    fn markers_for_constants(#[case] value: Value, #[case] bytes: Vec<u8>) {
        assert_eq!(packed(&value), bytes);
        assert_eq!(unpacked(&bytes), value);
    }

    #[rstest]
    // the marker byte is the value
    #[case(0, vec![0x00])]
    #[case(-16, vec![0xF0])]
    #[case(127, vec![0x7F])]
    // one spare byte
    #[case(-17, vec![0xC8, 0xEF])]
    #[case(-128, vec![0xC8, 0x80])]
    // two bytes
    #[case(128, vec![0xC9, 0x00, 0x80])]
    #[case(-32_768, vec![0xC9, 0x80, 0x00])]
    // four bytes
    #[case(32_768, vec![0xCA, 0x00, 0x00, 0x80, 0x00])]
    // eight bytes
    #[case(-2_147_483_649, vec![0xCB, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF])]
    #[case(i64::MAX, vec![0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])]
    #[case(i64::MIN, vec![0xCB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])]
    fn integers_use_the_smallest_size_class(#[case] value: i64, #[case] bytes: Vec<u8>) {
        assert_eq!(packed(&Value::Integer(value)), bytes);
        assert_eq!(unpacked(&bytes), Value::Integer(value));
    }

    #[test]
    fn floats_are_big_endian_ieee754() {
        let bytes = packed(&Value::Float(1.23));
        assert_eq!(
            bytes,
            vec![0xC1, 0x3F, 0xF3, 0xAE, 0x14, 0x7A, 0xE1, 0x47, 0xAE]
        );
        assert_eq!(unpacked(&bytes), Value::Float(1.23));
    }

    #[rstest]
    #[case(0, 0x80, 1)]
    #[case(15, 0x8F, 1)]
    #[case(16, 0xD0, 2)]
    #[case(255, 0xD0, 2)]
    #[case(256, 0xD1, 3)]
    #[case(65_535, 0xD1, 3)]
    #[case(65_536, 0xD2, 5)]
    fn strings_use_the_smallest_size_class(
        #[case] len: usize,
        #[case] marker: u8,
        #[case] header: usize,
    ) {
        let value = Value::String("x".repeat(len));
        let bytes = packed(&value);
        assert_eq!(bytes[0], marker);
        assert_eq!(bytes.len(), header + len);
        assert_eq!(unpacked(&bytes), value);
    }

    #[test]
    fn non_ascii_strings_survive() {
        let value = Value::String(String::from("Größenmaßstäbe"));
        assert_eq!(unpacked(&packed(&value)), value);
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(300)]
    fn bytes_round_trip(#[case] len: usize) {
        let value = Value::Bytes((0..len).map(|i| i as u8).collect());
        assert_eq!(unpacked(&packed(&value)), value);
    }

    #[test]
    fn collection_headers() {
        let mut out = Vec::new();
        pack_list_header(&mut out, 3).unwrap();
        pack_list_header(&mut out, 16).unwrap();
        pack_map_header(&mut out, 0).unwrap();
        pack_map_header(&mut out, 300).unwrap();
        assert_eq!(out, vec![0x93, 0xD4, 0x10, 0xA0, 0xD9, 0x01, 0x2C]);
    }

    #[test]
    fn nested_values_round_trip() {
        let value = Value::Map(value_map! {
            "list" => vec![Value::Integer(1), Value::Null, Value::Boolean(true)],
            "text" => "hello",
            "inner" => value_map! { "f" => -0.25 },
        });
        assert_eq!(unpacked(&packed(&value)), value);
    }

    #[test]
    fn structures_keep_tag_and_fields() {
        let value = Value::Struct {
            tag: 0x58,
            fields: vec![Value::Integer(7), Value::Float(1.0)],
        };
        let bytes = packed(&value);
        assert_eq!(&bytes[..2], &[0xB2, 0x58]);
        assert_eq!(unpacked(&bytes), value);
    }

    #[test]
    fn unknown_marker_is_a_protocol_error() {
        let mut unpacker = Unpacker::new(&[0xDF]);
        assert!(matches!(unpacker.value(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn truncated_value_is_a_protocol_error() {
        let mut unpacker = Unpacker::new(&[0xC9, 0x01]);
        assert!(matches!(unpacker.value(), Err(Error::Protocol { .. })));
    }
}
