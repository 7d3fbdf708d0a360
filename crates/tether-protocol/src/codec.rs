//! Codec for encoding and decoding Tether frames.
//!
//! Frames are JSON objects carried one per WebSocket text message, so no
//! length prefix is needed: the transport preserves message boundaries.

use thiserror::Error;

use crate::frames::Frame;

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a frame to its JSON text form.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, is not JSON, or does not
/// describe a known frame.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let frame = serde_json::from_str(text)?;
    Ok(frame)
}

/// Decode a frame from raw bytes that should hold UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or fail [`decode`].
pub fn decode_bytes(data: &[u8]) -> Result<Frame, ProtocolError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| ProtocolError::Invalid(format!("frame is not UTF-8: {e}")))?;
    decode(text)
}
