// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock NPL language server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. CLI flags control failure modes. Every message received can be
//! appended to a record file so tests can check what the client sent.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock NPL language server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Return `InternalError` for `initialize`.
    #[arg(long)]
    fail_initialize: bool,

    /// Exit right after the `initialized` notification (simulate crash).
    #[arg(long)]
    exit_after_initialized: bool,

    /// Send an undecodable message after `initialized`.
    #[arg(long)]
    malformed: bool,

    /// Ask the client for its workspace folders after `initialized`.
    #[arg(long)]
    request_folders: bool,

    /// Append every received message as a JSON line to this file.
    #[arg(long)]
    record: Option<PathBuf>,
}

/// A JSON-RPC message from the client.
#[derive(Debug, Deserialize, Serialize)]
struct Incoming {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// What to do after handling a message.
enum Flow {
    Continue,
    Exit,
}

struct MockServer<W: Write> {
    args: Args,
    writer: W,
}

impl<W: Write> MockServer<W> {
    const fn new(args: Args, writer: W) -> Self {
        Self { args, writer }
    }

    /// Run the server, reading from the given reader until EOF or `exit`.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(incoming) = serde_json::from_str::<Incoming>(&message) else {
                    continue;
                };
                self.record(&incoming);

                if matches!(self.handle(incoming), Flow::Exit) {
                    return;
                }
            }
        }
    }

    fn record(&self, incoming: &Incoming) {
        let Some(path) = &self.args.record else {
            return;
        };
        let Ok(line) = serde_json::to_string(incoming) else {
            return;
        };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{line}");
        }
    }

    fn handle(&mut self, incoming: Incoming) -> Flow {
        match (incoming.id, incoming.method) {
            (Some(id), Some(method)) => {
                self.handle_request(id, &method);
                Flow::Continue
            }
            (None, Some(method)) => self.handle_notification(&method),
            // Replies to our own requests only need recording.
            _ => Flow::Continue,
        }
    }

    fn handle_request(&mut self, id: Value, method: &str) {
        let (result, error) = match method {
            "initialize" if self.args.fail_initialize => (
                None,
                Some(RpcError {
                    code: -32603,
                    message: "mockls: configured to fail on initialize".to_string(),
                }),
            ),
            "initialize" => (
                Some(serde_json::json!({
                    "capabilities": {
                        "textDocumentSync": 1,
                        "workspace": {
                            "workspaceFolders": { "supported": true }
                        }
                    },
                    "serverInfo": { "name": "mockls", "version": "0.0.0" }
                })),
                None,
            ),
            "shutdown" => (Some(Value::Null), None),
            _ => (
                None,
                Some(RpcError {
                    code: -32601,
                    message: format!("mockls: method not found: {method}"),
                }),
            ),
        };

        self.send(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error,
        });
    }

    fn handle_notification(&mut self, method: &str) -> Flow {
        match method {
            "initialized" => {
                if self.args.malformed {
                    self.write_raw(b"Content-Length: 9\r\n\r\n{not json");
                }
                if self.args.request_folders {
                    self.send(&serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": "mockls-folders",
                        "method": "workspace/workspaceFolders",
                    }));
                }
                if self.args.exit_after_initialized {
                    return Flow::Exit;
                }
                Flow::Continue
            }
            "exit" => Flow::Exit,
            _ => Flow::Continue,
        }
    }

    fn send<T: Serialize>(&mut self, message: &T) {
        let Ok(body) = serde_json::to_string(message) else {
            return;
        };
        let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        self.write_raw(frame.as_bytes());
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        let _ = self.writer.write_all(bytes);
        let _ = self.writer.flush();
    }
}

/// Parse one Content-Length framed message from the buffer.
///
/// Returns the message body and the total number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let content_length = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse::<usize>().ok())
            .flatten()
    })?;

    let body_start = header_end + 4;
    let total = body_start + content_length;
    if buffer.len() < total {
        return None;
    }

    let body = String::from_utf8(buffer[body_start..total].to_vec()).ok()?;
    Some((body, total))
}

fn main() {
    let args = Args::parse();
    let mut server = MockServer::new(args, std::io::stdout());
    server.run(&mut std::io::stdin());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn run(args: Args, input: &[u8]) -> Vec<String> {
        let mut output = Vec::new();
        MockServer::new(args, &mut output).run(&mut &input[..]);

        let mut messages = Vec::new();
        let mut rest = output.as_slice();
        while let Some((body, consumed)) = try_parse_message(rest) {
            messages.push(body);
            rest = &rest[consumed..];
        }
        messages
    }

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mockls").chain(extra.iter().copied()))
    }

    const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
    const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
    const SHUTDOWN: &str = r#"{"jsonrpc":"2.0","id":2,"method":"shutdown"}"#;
    const EXIT: &str = r#"{"jsonrpc":"2.0","method":"exit"}"#;

    #[test]
    fn test_initialize_and_shutdown() {
        let input = [frame(INITIALIZE), frame(SHUTDOWN), frame(EXIT)].concat();
        let messages = run(args(&[]), &input);

        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("\"serverInfo\""));
        assert!(messages[1].contains("\"id\":2"));
    }

    #[test]
    fn test_fail_initialize() {
        let messages = run(args(&["--fail-initialize"]), &frame(INITIALIZE));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("-32603"));
    }

    #[test]
    fn test_exit_after_initialized_ignores_rest() {
        let input = [frame(INITIALIZE), frame(INITIALIZED), frame(SHUTDOWN)].concat();
        let messages = run(args(&["--exit-after-initialized"]), &input);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_request_folders_after_initialized() {
        let input = [frame(INITIALIZE), frame(INITIALIZED)].concat();
        let messages = run(args(&["--request-folders"]), &input);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("workspace/workspaceFolders"));
    }

    #[test]
    fn test_record_appends_messages() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let record = dir.path().join("record.jsonl");
        let input = [frame(INITIALIZE), frame(INITIALIZED)].concat();

        run(
            args(&["--record", &*record.to_string_lossy()]),
            &input,
        );

        let recorded = std::fs::read_to_string(&record)?;
        let methods: Vec<&str> = recorded
            .lines()
            .filter(|l| l.contains("\"method\""))
            .collect();
        assert_eq!(methods.len(), 2);
        assert!(methods[0].contains("initialize"));
        Ok(())
    }

    #[test]
    fn test_parse_waits_for_full_body() {
        assert!(try_parse_message(b"Content-Length: 10\r\n\r\n{}").is_none());
        assert!(try_parse_message(b"Content-Length: 2\r\n").is_none());
    }
}
