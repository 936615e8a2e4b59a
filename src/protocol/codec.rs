//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Len (4)  │ CRC (4)  │     Data (bincode)          │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

use super::{Command, Response};

/// Header size: 4 bytes length + 4 bytes CRC32
pub const HEADER_SIZE: usize = 8;

/// Maximum data size (1 MB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

// =============================================================================
// Frame helpers
// =============================================================================

fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let data = bincode::serialize(message)?;
    if data.len() > MAX_FRAME_SIZE as usize {
        return Err(StoreError::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + data.len());
    frame.put_u32(data.len() as u32);
    frame.put_u32(crc32fast::hash(&data));
    frame.put_slice(&data);

    Ok(frame.to_vec())
}

/// Parse a header into (data length, checksum)
fn parse_header(mut header: &[u8]) -> Result<(usize, u32)> {
    if header.len() < HEADER_SIZE {
        return Err(StoreError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            header.len()
        )));
    }

    let data_len = header.get_u32();
    let crc = header.get_u32();

    if data_len > MAX_FRAME_SIZE {
        return Err(StoreError::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            data_len, MAX_FRAME_SIZE
        )));
    }

    Ok((data_len as usize, crc))
}

fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (data_len, crc) = parse_header(bytes)?;

    let total_len = HEADER_SIZE + data_len;
    if bytes.len() < total_len {
        return Err(StoreError::Protocol(format!(
            "Incomplete frame: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    decode_data(&bytes[HEADER_SIZE..total_len], crc)
}

fn decode_data<T: DeserializeOwned>(data: &[u8], crc: u32) -> Result<T> {
    let actual = crc32fast::hash(data);
    if actual != crc {
        return Err(StoreError::Protocol(format!(
            "Checksum mismatch: header 0x{:08x}, data 0x{:08x}",
            crc, actual
        )));
    }
    Ok(bincode::deserialize(data)?)
}

fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    // Read header first
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let (data_len, crc) = parse_header(&header)?;

    let mut data = vec![0u8; data_len];
    reader.read_exact(&mut data)?;

    decode_data(&data, crc)
}

fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let bytes = encode_frame(message)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to a complete frame
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    encode_frame(command)
}

/// Decode a command from a complete frame
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    decode_frame(bytes)
}

/// Read a complete command from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    read_frame(reader)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    write_frame(writer, command)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to a complete frame
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode_frame(response)
}

/// Decode a response from a complete frame
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    decode_frame(bytes)
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    read_frame(reader)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    write_frame(writer, response)
}
