//! Records exchanged between `wsh` and `wshd`.
//!
//! Each record travels as one frame: a 4-byte big-endian length followed by
//! that many bytes of JSON. The response frame is the only one that carries
//! passed descriptors; see [`crate::handles`].

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use warden_common::constants::MAX_FRAME_LEN;
use warden_common::error::{Result, WardenError};

const LEN_PREFIX: usize = 4;

/// Asks the daemon to run a program as a local user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Login name to run as; empty means the default user.
    pub user: String,
    /// Program and its arguments.
    pub argv: Vec<String>,
}

/// Empty acknowledgment sent together with the passed descriptors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {}

/// Final status of a remote process, written once on the status descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatusMessage {
    /// The process's exit code, or the start-failure sentinel.
    pub exit_status: i32,
}

/// Serializes a record into a complete frame.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized or is too large.
pub fn encode_frame<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(record)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WardenError::protocol(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
            body.len()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| WardenError::protocol("frame length does not fit in u32"))?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parses a record from a buffer holding exactly one complete frame.
///
/// # Errors
///
/// Returns a protocol error if the buffer is truncated, has trailing bytes,
/// or does not hold the expected record.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    let Some((prefix, body)) = frame.split_first_chunk::<LEN_PREFIX>() else {
        return Err(WardenError::protocol(format!(
            "truncated frame header ({} bytes)",
            frame.len()
        )));
    };
    let len = frame_len(*prefix)?;
    if body.len() != len {
        return Err(WardenError::protocol(format!(
            "frame declares {len} bytes but carries {}",
            body.len()
        )));
    }
    decode_body(body)
}

/// Writes one record as a frame.
///
/// # Errors
///
/// Returns a protocol error if encoding or writing fails.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, record: &T) -> Result<()> {
    let frame = encode_frame(record)?;
    writer
        .write_all(&frame)
        .and_then(|()| writer.flush())
        .map_err(|e| WardenError::protocol(format!("failed writing frame: {e}")))
}

/// Reads one framed record.
///
/// # Errors
///
/// Returns a protocol error if the stream ends early, the length is out of
/// bounds, or the body does not decode.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut prefix = [0u8; LEN_PREFIX];
    reader.read_exact(&mut prefix).map_err(|e| read_error(&e))?;
    let len = frame_len(prefix)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| read_error(&e))?;
    decode_body(&body)
}

fn frame_len(prefix: [u8; LEN_PREFIX]) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WardenError::protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }
    Ok(len)
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| WardenError::protocol(format!("malformed frame body: {e}")))
}

fn read_error(err: &io::Error) -> WardenError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        WardenError::protocol("peer closed before sending a complete frame")
    } else {
        WardenError::protocol(format!("failed reading frame: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_survives_a_stream() {
        let request = RunRequest {
            user: "vcap".into(),
            argv: vec!["/bin/echo".into(), "hi".into()],
        };
        let mut wire = Vec::new();
        write_frame(&mut wire, &request).expect("write");

        let decoded: RunRequest = read_frame(&mut wire.as_slice()).expect("read");
        assert_eq!(decoded, request);
    }

    #[test]
    fn frame_starts_with_big_endian_length() {
        let frame = encode_frame(&ExitStatusMessage { exit_status: 42 }).expect("encode");
        let body = br#"{"exit_status":42}"#;
        assert_eq!(&frame[..4], &u32::try_from(body.len()).unwrap().to_be_bytes());
        assert_eq!(&frame[4..], body);
    }

    #[test]
    fn empty_response_is_decodable_from_a_buffer() {
        let frame = encode_frame(&RunResponse {}).expect("encode");
        let _: RunResponse = decode_frame(&frame).expect("decode");
    }

    #[test]
    fn truncated_stream_is_a_protocol_error() {
        let frame = encode_frame(&ExitStatusMessage { exit_status: 0 }).expect("encode");
        let mut short = &frame[..frame.len() - 1];
        let err = read_frame::<_, ExitStatusMessage>(&mut short).unwrap_err();
        assert!(matches!(err, WardenError::Protocol { .. }));
    }

    #[test]
    fn closed_stream_is_a_protocol_error() {
        let mut empty: &[u8] = &[];
        let err = read_frame::<_, ExitStatusMessage>(&mut empty).unwrap_err();
        assert!(err.to_string().contains("peer closed"));
    }

    #[test]
    fn oversized_length_is_rejected_before_allocating() {
        let mut wire = u32::MAX.to_be_bytes().to_vec();
        wire.extend_from_slice(b"{}");
        let err = read_frame::<_, RunResponse>(&mut wire.as_slice()).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn decode_frame_rejects_trailing_bytes() {
        let mut frame = encode_frame(&RunResponse {}).expect("encode");
        frame.push(b' ');
        assert!(decode_frame::<RunResponse>(&frame).is_err());
    }

    #[test]
    fn wrong_record_shape_is_rejected() {
        let frame = encode_frame(&RunResponse {}).expect("encode");
        assert!(decode_frame::<ExitStatusMessage>(&frame).is_err());
    }
}
