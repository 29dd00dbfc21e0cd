// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The `dataPack`: every bulk buffer/image payload crosses the wire as
//! `{u64 compressed_size; bytes}`, deflated with zlib. Control frames are
//! never packed. The receiver knows the decompressed size from the request
//! that set the transfer up, and a mismatch after inflation is a protocol
//! error for that transfer.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use log::*;

use std::io::{Read, Write};

use crate::wire::{WireRead, WireWrite};
use crate::{Error, ProtocolError};

/// Deflate a payload. Compression failure aborts the transfer this pack
/// was meant for, not the connection.
pub fn pack(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::fast());
    enc.write_all(data)?;
    enc.finish()
}

/// Inflate a payload and check it against the size the request promised.
pub fn unpack(compressed: &[u8], expected: u64) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(expected as usize);
    let mut dec = ZlibDecoder::new(compressed);
    dec.read_to_end(&mut out).map_err(|e| {
        warn!("error inflating a {} byte payload: {e}", compressed.len());
        ProtocolError::Corrupt
    })?;

    if out.len() as u64 != expected {
        return Err(ProtocolError::PackSize {
            expected,
            got: out.len() as u64,
        }
        .into());
    }
    Ok(out)
}

/// Deflate and send a payload as one size-prefixed record.
pub fn write_pack<W: Write>(stream: &mut W, data: &[u8]) -> std::io::Result<()> {
    let packed = pack(data)?;
    stream.put_size(packed.len() as u64)?;
    stream.write_all(&packed)
}

/// Receive one size-prefixed record and inflate it to `expected` bytes.
pub fn read_pack<R: Read>(stream: &mut R, expected: u64) -> Result<Vec<u8>, Error> {
    let compressed = stream.get_blob()?;
    unpack(&compressed, expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_on_compressible_data() {
        let data: Vec<u8> = (0..1 << 20).map(|i| (i & 0xFF) as u8).collect();
        let packed = pack(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(unpack(&packed, data.len() as u64).unwrap(), data);
    }

    #[test]
    fn lossless_on_incompressible_data() {
        // A xorshift stream does not deflate; the pack may grow but must
        // still round-trip.
        let mut x = 0x2545_f491_4f6c_dd1du64;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                (x & 0xFF) as u8
            })
            .collect();
        let packed = pack(&data).unwrap();
        assert_eq!(unpack(&packed, data.len() as u64).unwrap(), data);
    }

    #[test]
    fn zero_sized_payload() {
        let packed = pack(&[]).unwrap();
        assert_eq!(unpack(&packed, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let packed = pack(&[1, 2, 3]).unwrap();
        match unpack(&packed, 4) {
            Err(Error::Protocol(ProtocolError::PackSize { expected: 4, got: 3 })) => {}
            other => panic!("expected a size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn stream_record_round_trip() {
        let data = vec![7u8; 10_000];
        let mut wire = Vec::new();
        write_pack(&mut wire, &data).unwrap();
        let got = read_pack(&mut wire.as_slice(), data.len() as u64).unwrap();
        assert_eq!(got, data);
    }
}
