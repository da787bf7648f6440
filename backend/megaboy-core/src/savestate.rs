//! Save-state plumbing: the bincode configuration every component block is
//! encoded with, the FNV-1a-64 file hash, and the DEFLATE helpers for the
//! framebuffer and state payloads.

use crate::api::LoadError;
use bincode::config::Configuration;
use bincode::{Decode, Encode};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// 27-byte file signature.
pub const SIGNATURE: &[u8; 27] = b"MegaBoy Emulator Save State";

// Component state is encoded little-endian with fixed-width integers so the
// on-disk layout is stable
fn config() -> Configuration<bincode::config::LittleEndian, bincode::config::Fixint> {
    bincode::config::standard().with_fixed_int_encoding()
}

pub(crate) fn encode<W: Write, E: Encode>(out: &mut W, value: &E) -> io::Result<()> {
    bincode::encode_into_std_write(value, out, config())
        .map(|_| ())
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
}

pub(crate) fn decode<R: Read, D: Decode<()>>(reader: &mut R) -> Result<D, LoadError> {
    bincode::decode_from_std_read(reader, config()).map_err(|_| LoadError::CorruptSaveState)
}

/// FNV-1a-64 over the file contents following the hash field.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
    const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;

    data.iter().fold(FNV_OFFSET, |hash, &byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}

// The compressed-length fields in the file count raw DEFLATE bytes, so the
// streams carry no zlib header or checksum
pub(crate) fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub(crate) fn inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>, LoadError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut decompressed = Vec::with_capacity(expected_len);
    decoder.read_to_end(&mut decompressed).map_err(|_| LoadError::CorruptSaveState)?;

    if decompressed.len() != expected_len {
        return Err(LoadError::CorruptSaveState);
    }

    Ok(decompressed)
}
