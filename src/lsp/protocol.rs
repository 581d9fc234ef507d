/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-RPC message types and `Content-Length` framing.

use anyhow::{Context, Result, anyhow};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A decoded message coming from the server.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// The server asks the client for something.
    Request(RequestMessage),
    /// Answer to one of our requests.
    Response(ResponseMessage),
    /// Fire-and-forget message from the server.
    Notification(NotificationMessage),
}

impl ResponseMessage {
    /// A successful response.
    #[must_use]
    pub fn ok(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn error(id: RequestId, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// Classifies a raw JSON message body.
///
/// # Errors
///
/// Returns an error if the body is not JSON or fits none of the three
/// JSON-RPC message shapes.
pub fn decode(body: &str) -> Result<Incoming> {
    let value: serde_json::Value = serde_json::from_str(body).context("Failed to parse JSON")?;

    let has_method = value.get("method").is_some();
    let has_id = value.get("id").is_some_and(|id| !id.is_null());

    match (has_method, has_id) {
        (true, true) => Ok(Incoming::Request(
            serde_json::from_value(value).context("Malformed request")?,
        )),
        (true, false) => Ok(Incoming::Notification(
            serde_json::from_value(value).context("Malformed notification")?,
        )),
        (false, true) => Ok(Incoming::Response(
            serde_json::from_value(value).context("Malformed response")?,
        )),
        (false, false) => Err(anyhow!("Unknown message format: {body}")),
    }
}

/// Serializes a message and prefixes it with its `Content-Length` header.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_string(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

/// Largest message body accepted from the server.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Helper to parse the Content-Length header and body from a buffer.
///
/// Returns `Ok(None)` until a complete message is buffered. A complete frame
/// is consumed from the buffer even if its body turns out not to be UTF-8,
/// and an unusable header block is consumed up to its terminator, so one bad
/// frame does not wedge the stream or discard the frames behind it.
///
/// # Errors
///
/// Returns an error if the header block is unreadable, lacks a usable
/// `Content-Length` (including one above [`MAX_MESSAGE_SIZE`]), or if the
/// body is not UTF-8.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(header_len) = buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
    else {
        return Ok(None);
    };
    let body_start = header_len + HEADER_TERMINATOR.len();

    let content_length = match parse_content_length(&buffer[..header_len]) {
        Ok(length) => length,
        Err(e) => {
            buffer.advance(body_start);
            return Err(e);
        }
    };

    if buffer.len() - body_start < content_length {
        return Ok(None);
    }

    buffer.advance(body_start);
    let body = buffer.split_to(content_length);
    let message = String::from_utf8(body.to_vec()).context("Message body is not UTF-8")?;
    Ok(Some(message))
}

fn parse_content_length(headers: &[u8]) -> Result<usize> {
    let headers = std::str::from_utf8(headers).context("Failed to parse headers as UTF-8")?;

    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>())
        })
        .ok_or_else(|| anyhow!("Missing Content-Length header"))?
        .context("Invalid Content-Length header")?;

    if content_length > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Invalid Content-Length header: {content_length} exceeds {MAX_MESSAGE_SIZE} bytes"
        ));
    }
    Ok(content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    #[test]
    fn test_parse_complete_message() -> Result<()> {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let mut buffer = BytesMut::from(frame(body).as_str());

        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_waits_for_full_body() -> Result<()> {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        assert_eq!(try_parse_message(&mut buffer)?, None);

        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        assert_eq!(try_parse_message(&mut buffer)?, None);
        Ok(())
    }

    #[test]
    fn test_parse_back_to_back_messages() -> Result<()> {
        let first = r#"{"jsonrpc":"2.0","id":1}"#;
        let second = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let mut buffer = BytesMut::from(format!("{}{}", frame(first), frame(second)).as_str());

        assert_eq!(try_parse_message(&mut buffer)?, Some(first.to_string()));
        assert_eq!(try_parse_message(&mut buffer)?, Some(second.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_ignores_other_headers() -> Result<()> {
        let body = r#"{"test":true}"#;
        let raw = format!(
            "content-type: application/vscode-jsonrpc\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut buffer = BytesMut::from(raw.as_str());
        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        Ok(())
    }

    #[test]
    fn test_missing_length_is_an_error() {
        let mut buffer = BytesMut::from("X-Other: 1\r\n\r\n{}");
        assert!(try_parse_message(&mut buffer).is_err());
    }

    #[test]
    fn test_huge_length_is_an_error() {
        let mut buffer = BytesMut::from("Content-Length: 18446744073709551615\r\n\r\n{}");
        assert!(try_parse_message(&mut buffer).is_err());

        let mut buffer =
            BytesMut::from(format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1).as_str());
        assert!(try_parse_message(&mut buffer).is_err());
    }

    #[test]
    fn test_bad_header_keeps_following_frames() -> Result<()> {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let raw = format!("Content-Length: nine\r\n\r\n{}", frame(body));
        let mut buffer = BytesMut::from(raw.as_str());

        assert!(try_parse_message(&mut buffer).is_err());
        assert_eq!(try_parse_message(&mut buffer)?, Some(body.to_string()));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_decode_shapes() -> Result<()> {
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":"a","method":"workspace/configuration"}"#)?,
            Incoming::Request(r) if r.id == RequestId::String("a".to_string())
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","method":"window/logMessage","params":{}}"#)?,
            Incoming::Notification(_)
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":3,"result":null}"#)?,
            Incoming::Response(r) if r.id == Some(RequestId::Number(3))
        ));
        assert!(decode(r#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(decode("not json").is_err());
        Ok(())
    }

    #[test]
    fn test_encode_produces_parseable_frame() -> Result<()> {
        let response = ResponseMessage::error(RequestId::Number(7), METHOD_NOT_FOUND, "nope".into());
        let mut buffer = BytesMut::from(encode(&response)?.as_slice());

        let body = try_parse_message(&mut buffer)?.ok_or_else(|| anyhow!("no frame"))?;
        let Incoming::Response(decoded) = decode(&body)? else {
            return Err(anyhow!("expected a response"));
        };
        assert_eq!(decoded.error.map(|e| e.code), Some(METHOD_NOT_FOUND));
        Ok(())
    }
}
