// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! In-process fakes for unit tests: a scripted language server over an
//! in-memory duplex stream, a server manager handing out connections to it,
//! and a host with settable roots and settings.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::broadcast;

use super::protocol::{self, Incoming, ResponseMessage};
use super::transport::{ServerManager, Transport};
use crate::activation::ActivationContext;
use crate::config::{SettingKey, Settings};
use crate::host::{ConfigurationChange, Host};
use crate::workspace::WorkspaceRoot;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the fake server misbehaves.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools, reason = "test switches")]
pub struct Behavior {
    /// Answer `initialize` with an error.
    pub reject_initialize: bool,
    /// Hang up right after `initialized`.
    pub close_after_initialized: bool,
    /// Send an undecodable frame after `initialized`.
    pub garbage_after_initialized: bool,
    /// Ask the client for its workspace folders after `initialized`.
    pub ask_workspace_folders: bool,
}

/// Server manager whose connections lead to in-process fake servers.
#[derive(Default)]
pub struct MockServerManager {
    behavior: Behavior,
    fail: AtomicBool,
    connections: AtomicUsize,
    stops: AtomicUsize,
    events: Arc<Mutex<Vec<String>>>,
    initialize_params: Arc<Mutex<Option<Value>>>,
    folder_reply: Arc<Mutex<Option<Value>>>,
}

impl MockServerManager {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Makes every following connection attempt fail.
    pub fn fail_connections(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Everything that happened, in order: `connect`, `stop_server` and the
    /// method of every message the fake servers received.
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    /// Methods received by the fake servers.
    pub fn methods(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e != "connect" && e != "stop_server")
            .collect()
    }

    /// Params of the most recent `initialize`.
    pub fn initialize_params(&self) -> Option<Value> {
        lock(&self.initialize_params).clone()
    }

    /// The client's answer to `workspace/workspaceFolders`.
    pub fn folder_reply(&self) -> Option<Value> {
        lock(&self.folder_reply).clone()
    }
}

#[async_trait]
impl ServerManager for MockServerManager {
    async fn get_server_connection(&self, _context: &ActivationContext) -> Result<Transport> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("server binary not available"));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).push("connect".to_string());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let fake = FakeServer {
            behavior: self.behavior,
            events: self.events.clone(),
            initialize_params: self.initialize_params.clone(),
            folder_reply: self.folder_reply.clone(),
        };
        tokio::spawn(fake.run(server));
        Ok(Transport::from_duplex(client))
    }

    fn stop_server(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).push("stop_server".to_string());
    }
}

struct FakeServer {
    behavior: Behavior,
    events: Arc<Mutex<Vec<String>>>,
    initialize_params: Arc<Mutex<Option<Value>>>,
    folder_reply: Arc<Mutex<Option<Value>>>,
}

impl FakeServer {
    async fn run(self, stream: DuplexStream) -> Result<()> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffer = BytesMut::new();

        while let Some(body) = next_message(&mut reader, &mut buffer).await? {
            let value: Value = serde_json::from_str(&body)?;
            match protocol::decode(&body)? {
                Incoming::Request(request) => {
                    lock(&self.events).push(request.method.clone());
                    let response = match request.method.as_str() {
                        "initialize" => {
                            *lock(&self.initialize_params) = Some(request.params.clone());
                            if self.behavior.reject_initialize {
                                ResponseMessage::error(request.id, -32603, "boom".to_string())
                            } else {
                                ResponseMessage::ok(
                                    request.id,
                                    json!({
                                        "capabilities": {},
                                        "serverInfo": {"name": "fake-npl", "version": "1.0"},
                                    }),
                                )
                            }
                        }
                        _ => ResponseMessage::ok(request.id, Value::Null),
                    };
                    send(&mut writer, &response).await?;
                }
                Incoming::Notification(notification) => {
                    lock(&self.events).push(notification.method.clone());
                    match notification.method.as_str() {
                        "exit" => return Ok(()),
                        "initialized" => {
                            if self.behavior.garbage_after_initialized {
                                writer.write_all(b"Content-Length: 9\r\n\r\n{not json").await?;
                            }
                            if self.behavior.ask_workspace_folders {
                                send(
                                    &mut writer,
                                    &json!({
                                        "jsonrpc": "2.0",
                                        "id": "folders-1",
                                        "method": "workspace/workspaceFolders",
                                    }),
                                )
                                .await?;
                            }
                            if self.behavior.close_after_initialized {
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
                Incoming::Response(_) => {
                    *lock(&self.folder_reply) = Some(value);
                }
            }
        }
        Ok(())
    }
}

async fn next_message(
    reader: &mut ReadHalf<DuplexStream>,
    buffer: &mut BytesMut,
) -> Result<Option<String>> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(body) = protocol::try_parse_message(buffer)? {
            return Ok(Some(body));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn send<T: serde::Serialize>(writer: &mut WriteHalf<DuplexStream>, message: &T) -> Result<()> {
    writer.write_all(&protocol::encode(message)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Host with settable roots and settings that records what it shows.
pub struct MockHost {
    roots: Mutex<Vec<WorkspaceRoot>>,
    settings: Mutex<Settings>,
    changes: broadcast::Sender<ConfigurationChange>,
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    updates: Mutex<Vec<(PathBuf, SettingKey, Value)>>,
    picks: Mutex<VecDeque<PathBuf>>,
    picked_defaults: Mutex<Vec<PathBuf>>,
}

impl MockHost {
    pub fn new(roots: Vec<WorkspaceRoot>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            roots: Mutex::new(roots),
            settings: Mutex::new(Settings::default()),
            changes,
            infos: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            picks: Mutex::new(VecDeque::new()),
            picked_defaults: Mutex::new(Vec::new()),
        }
    }

    /// A host with one root at `/proj`.
    pub fn single_root() -> Self {
        Self::new(vec![WorkspaceRoot::new("/proj", "proj", 0)])
    }

    pub fn set_roots(&self, roots: Vec<WorkspaceRoot>) {
        *lock(&self.roots) = roots;
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        update(&mut lock(&self.settings));
    }

    /// Broadcasts a change of the given qualified keys.
    pub fn emit(&self, keys: &[&str]) {
        let _ = self.changes.send(ConfigurationChange {
            keys: keys.iter().map(ToString::to_string).collect(),
        });
    }

    pub fn subscribers(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn queue_pick(&self, path: impl Into<PathBuf>) {
        lock(&self.picks).push_back(path.into());
    }

    pub fn infos(&self) -> Vec<String> {
        lock(&self.infos).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }

    pub fn updates(&self) -> Vec<(PathBuf, SettingKey, Value)> {
        lock(&self.updates).clone()
    }

    pub fn picked_defaults(&self) -> Vec<PathBuf> {
        lock(&self.picked_defaults).clone()
    }
}

#[async_trait]
impl Host for MockHost {
    fn workspace_roots(&self) -> Vec<WorkspaceRoot> {
        lock(&self.roots).clone()
    }

    fn settings(&self, _scope: Option<&Path>) -> Result<Settings> {
        Ok(lock(&self.settings).clone())
    }

    fn subscribe_configuration(&self) -> broadcast::Receiver<ConfigurationChange> {
        self.changes.subscribe()
    }

    async fn update_setting(&self, scope: &Path, key: SettingKey, value: Value) -> Result<()> {
        lock(&self.updates).push((scope.to_path_buf(), key, value));
        Ok(())
    }

    async fn pick_folder(&self, _label: &str, default: &Path) -> Option<PathBuf> {
        lock(&self.picked_defaults).push(default.to_path_buf());
        lock(&self.picks).pop_front()
    }

    fn show_info(&self, message: &str) {
        lock(&self.infos).push(message.to_string());
    }

    fn show_error(&self, message: &str) {
        lock(&self.errors).push(message.to_string());
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("condition not reached in time"))
}
