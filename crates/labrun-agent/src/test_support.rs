//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use labrun_core::TaskId;
use reqwest::StatusCode;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

use crate::artifact::Artifact;
use crate::error::FetchError;
use crate::fetcher::Fetcher;

pub type ServerSocket = WebSocketStream<TcpStream>;
pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write an executable `/bin/sh` script.
pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, Permissions::from_mode(0o755)).unwrap();
}

/// A connected WebSocket pair over loopback TCP.
pub async fn ws_pair() -> (ServerSocket, ClientSocket) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/server/test", listener.local_addr().unwrap());

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    };
    let connect = async { connect_async(url.as_str()).await.unwrap().0 };

    tokio::join!(accept, connect)
}

/// Fetcher serving shell scripts from memory. Unknown names fail the way a
/// missing download does.
pub struct ScriptFetcher {
    scratch_dir: PathBuf,
    scripts: HashMap<String, String>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptFetcher {
    pub fn new(scratch_dir: &Path) -> Self {
        Self {
            scratch_dir: scratch_dir.to_path_buf(),
            scripts: HashMap::new(),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_script(mut self, name: &str, body: &str) -> Self {
        self.scripts.insert(name.to_string(), body.to_string());
        self
    }

    /// Counter of fetch attempts, shared with the fetcher.
    pub fn fetch_count(&self) -> Arc<AtomicUsize> {
        self.fetches.clone()
    }
}

#[async_trait]
impl Fetcher for ScriptFetcher {
    async fn fetch(&self, task_id: &TaskId, name: &str) -> Result<Artifact, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let artifact = Artifact::claim(&self.scratch_dir, name, task_id)?;
        match self.scripts.get(name) {
            Some(body) => {
                write_script(artifact.path(), body);
                Ok(artifact)
            }
            None => Err(FetchError::Status {
                url: format!("/tests/download/{}/{}", task_id, name),
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}
