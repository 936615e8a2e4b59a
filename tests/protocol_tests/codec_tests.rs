//! Protocol Codec Tests
//!
//! Tests verify:
//! - Frame header layout (length, CRC32)
//! - Corrupted, truncated and oversized frames are rejected
//! - Stream helpers read back what they write

use std::io::Cursor;

use quorumlock::protocol::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, Command, CommandType, Response, HEADER_SIZE,
    MAX_FRAME_SIZE,
};
use quorumlock::StoreError;

fn set_if_absent() -> Command {
    Command::SetIfAbsent {
        key: "stock-lock".to_string(),
        value: "7c9e6679-7425-40de-944b-e07fc1f90ae7".to_string(),
        ttl_ms: 30_000,
    }
}

// =============================================================================
// Frame Layout Tests
// =============================================================================

#[test]
fn test_header_describes_data() {
    let frame = encode_command(&set_if_absent()).unwrap();

    let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let crc = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);

    assert_eq!(frame.len(), HEADER_SIZE + len);
    assert_eq!(crc, crc32fast::hash(&frame[HEADER_SIZE..]));
}

#[test]
fn test_command_frames_decode() {
    let commands = vec![
        Command::Ping,
        set_if_absent(),
        Command::Get { key: "k".into() },
        Command::DeleteIfEquals {
            key: "k".into(),
            value: "v".into(),
        },
        Command::ExpireIfEquals {
            key: "k".into(),
            value: "v".into(),
            ttl_ms: 5,
        },
    ];

    for command in commands {
        let frame = encode_command(&command).unwrap();
        assert_eq!(decode_command(&frame).unwrap(), command);
    }
}

#[test]
fn test_response_with_absent_value() {
    let frame = encode_response(&Response::Value(None)).unwrap();
    assert_eq!(decode_response(&frame).unwrap(), Response::Value(None));
}

#[test]
fn test_command_type() {
    assert_eq!(set_if_absent().command_type(), CommandType::SetIfAbsent);
    assert_eq!(Command::Ping.command_type(), CommandType::Ping);
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_incomplete_header() {
    let result = decode_command(&[0, 0, 0]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_incomplete_data() {
    let frame = encode_command(&set_if_absent()).unwrap();
    let result = decode_command(&frame[..frame.len() - 1]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_corrupted_data_fails_checksum() {
    let mut frame = encode_command(&set_if_absent()).unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xff;

    match decode_command(&frame) {
        Err(StoreError::Protocol(msg)) => assert!(msg.contains("Checksum")),
        other => panic!("expected checksum error, got {:?}", other),
    }
}

#[test]
fn test_oversized_frame_rejected() {
    let mut header = Vec::new();
    header.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
    header.extend_from_slice(&0u32.to_be_bytes());

    let result = read_command(&mut Cursor::new(header));
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_garbage_with_valid_checksum() {
    let data = [0xffu8; 4];
    let mut frame = Vec::new();
    frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&data).to_be_bytes());
    frame.extend_from_slice(&data);

    let result = decode_command(&frame);
    assert!(matches!(result, Err(StoreError::Serialization(_))));
}

// =============================================================================
// Stream Tests
// =============================================================================

#[test]
fn test_stream_sequence() {
    let mut buffer = Vec::new();
    write_command(&mut buffer, &Command::Ping).unwrap();
    write_command(&mut buffer, &set_if_absent()).unwrap();

    let mut reader = Cursor::new(buffer);
    assert_eq!(read_command(&mut reader).unwrap(), Command::Ping);
    assert_eq!(read_command(&mut reader).unwrap(), set_if_absent());

    // Stream exhausted
    assert!(matches!(read_command(&mut reader), Err(StoreError::Io(_))));
}

#[test]
fn test_stream_responses() {
    let mut buffer = Vec::new();
    write_response(&mut buffer, &Response::Bool(true)).unwrap();
    write_response(&mut buffer, &Response::error("store down")).unwrap();

    let mut reader = Cursor::new(buffer);
    assert_eq!(read_response(&mut reader).unwrap(), Response::Bool(true));
    assert_eq!(
        read_response(&mut reader).unwrap(),
        Response::Error("store down".to_string())
    );
}
