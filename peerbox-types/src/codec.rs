//! Line codec: one JSON object per line.
//!
//! Decoding is two-step (raw value, then typed) so callers can tell a
//! missing or malformed `command` apart from a command this build simply
//! does not recognize. The dispatcher drops unrecognized commands; every
//! other decode failure is a protocol violation.

use serde_json::Value;

use crate::Message;

/// Upper bound on one encoded line, newline excluded.
///
/// A full block transfer response is the largest message: a 64 KiB block is
/// under 90 KiB base64, so 1 MiB leaves generous headroom.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Failure to encode a message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// serde_json rejected the message (practically unreachable for these types).
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The encoded line exceeds [`MAX_LINE_BYTES`].
    #[error("encoded message too large: {size} > {limit} bytes")]
    TooLarge {
        /// Actual encoded size.
        size: usize,
        /// The enforced limit.
        limit: usize,
    },
}

/// Failure to decode a line. Callers treat these as protocol violations
/// by the remote peer, not local bugs.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The line is not syntactically valid JSON.
    #[error("malformed message: {reason}")]
    Syntax {
        /// Parser error text.
        reason: String,
    },
    /// The line parsed but is not a JSON object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// No `command` field.
    #[error("message must contain a command field as string")]
    MissingCommand,
    /// `command` is present but not a string.
    #[error("command field must be a string")]
    CommandNotString,
    /// `command` is a string this build does not recognize.
    #[error("unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized verb.
        command: String,
    },
    /// A recognized command with missing or ill-typed fields.
    #[error("invalid fields for {command}: {reason}")]
    InvalidFields {
        /// The verb whose payload failed to decode.
        command: String,
        /// Deserializer error text.
        reason: String,
    },
}

/// Encode one message as a single line of JSON (no trailing newline).
pub fn encode_line(message: &Message) -> Result<String, EncodeError> {
    let line = serde_json::to_string(message)?;
    if line.len() > MAX_LINE_BYTES {
        return Err(EncodeError::TooLarge {
            size: line.len(),
            limit: MAX_LINE_BYTES,
        });
    }
    Ok(line)
}

/// Decode one line into a message.
pub fn decode_line(line: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(line).map_err(|e| DecodeError::Syntax {
        reason: e.to_string(),
    })?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let command = match object.get("command") {
        None => return Err(DecodeError::MissingCommand),
        Some(v) => v.as_str().ok_or(DecodeError::CommandNotString)?,
    };
    if !Message::KNOWN_COMMANDS.contains(&command) {
        return Err(DecodeError::UnknownCommand {
            command: command.to_owned(),
        });
    }
    let command = command.to_owned();
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields {
        command,
        reason: e.to_string(),
    })
}
