// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

//! Message framing: every logical message travels as a series of
//! `u16`-length-prefixed chunks and ends with one zero-length chunk.

use std::io::{self, Read};

const MAX_CHUNK: usize = u16::MAX as usize;

/// Appends `payload` to `out` as one fully framed message.
pub(crate) fn enframe(out: &mut Vec<u8>, payload: &[u8]) {
    for chunk in payload.chunks(MAX_CHUNK) {
        out.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&[0, 0]);
}

/// Reads chunks until the terminating zero-length chunk and returns the
/// reassembled message. Zero-length chunks before any payload are keep-alive
/// NOOPs and are skipped.
pub(crate) fn deframe(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut message = Vec::new();
    loop {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header)?;
        let size = u16::from_be_bytes(header) as usize;
        if size == 0 {
            if message.is_empty() {
                continue;
            }
            return Ok(message);
        }
        let offset = message.len();
        message.resize(offset + size, 0);
        reader.read_exact(&mut message[offset..])?;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn small_message_is_one_chunk() {
        let mut out = Vec::new();
        enframe(&mut out, &[0xB0, 0x02]);
        assert_eq!(out, vec![0x00, 0x02, 0xB0, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn oversized_message_is_split() {
        let payload = vec![0x42; MAX_CHUNK + 10];
        let mut out = Vec::new();
        enframe(&mut out, &payload);
        assert_eq!(&out[..2], &u16::MAX.to_be_bytes());
        let second_header = 2 + MAX_CHUNK;
        assert_eq!(&out[second_header..second_header + 2], &10u16.to_be_bytes());
        assert_eq!(&out[out.len() - 2..], &[0, 0]);
        assert_eq!(out.len(), payload.len() + 3 * 2);
    }

    #[rstest]
    #[case(vec![0x01])]
    #[case(vec![0xAB; 1000])]
    #[case(vec![0xCD; 2 * MAX_CHUNK + 1])]
    fn round_trip(#[case] payload: Vec<u8>) {
        let mut out = Vec::new();
        enframe(&mut out, &payload);
        let mut reader = out.as_slice();
        assert_eq!(deframe(&mut reader).unwrap(), payload);
        assert!(reader.is_empty());
    }

    #[test]
    fn leading_noop_chunks_are_skipped() {
        let mut out = vec![0x00, 0x00, 0x00, 0x00];
        enframe(&mut out, &[0x7E]);
        let mut reader = out.as_slice();
        assert_eq!(deframe(&mut reader).unwrap(), vec![0x7E]);
    }

    #[test]
    fn eof_mid_message_errors() {
        let out = vec![0x00, 0x05, 0x01, 0x02];
        let mut reader = out.as_slice();
        assert!(deframe(&mut reader).is_err());
    }
}
