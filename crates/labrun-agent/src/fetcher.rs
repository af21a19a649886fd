//! Artifact download from the control plane.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use labrun_core::TaskId;
use reqwest::{Client, Url};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::error::FetchError;

/// Mode applied to downloaded artifacts.
const ARTIFACT_MODE: u32 = 0o755;

/// Source of runnable artifacts.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve `name` for `task_id` and return it ready to execute.
    async fn fetch(&self, task_id: &TaskId, name: &str) -> Result<Artifact, FetchError>;
}

/// Downloads artifacts over HTTP(S) from `/tests/download/...`.
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
    scratch_dir: PathBuf,
}

impl HttpFetcher {
    /// Create a fetcher resolving downloads against `base_url` and writing
    /// them under `scratch_dir`.
    pub fn new(client: Client, base_url: Url, scratch_dir: PathBuf) -> Self {
        Self {
            client,
            base_url,
            scratch_dir,
        }
    }

    /// `/tests/download/{task_id}/{name}`, or `/tests/download/{name}` when
    /// the request carries no task id.
    fn download_url(&self, task_id: &TaskId, name: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FetchError::InvalidName(name.to_string()))?;
            segments.pop_if_empty().extend(["tests", "download"]);
            if !task_id.is_empty() {
                segments.push(task_id.as_str());
            }
            segments.push(name);
        }
        Ok(url)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, task_id: &TaskId, name: &str) -> Result<Artifact, FetchError> {
        let artifact = Artifact::claim(&self.scratch_dir, name, task_id)?;
        let url = self.download_url(task_id, name)?;
        debug!(url = %url, path = %artifact.path().display(), "Downloading artifact");

        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let write_err = |source| FetchError::Write {
            path: artifact.path().to_path_buf(),
            source,
        };

        let mut file = File::create(artifact.path())
            .await
            .map_err(|source| FetchError::Create {
                path: artifact.path().to_path_buf(),
                source,
            })?;

        let mut size = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(write_err)?;
            size += chunk.len();
        }
        file.flush().await.map_err(write_err)?;
        drop(file);

        tokio::fs::set_permissions(artifact.path(), Permissions::from_mode(ARTIFACT_MODE))
            .await
            .map_err(|source| FetchError::Permissions {
                path: artifact.path().to_path_buf(),
                source,
            })?;

        info!(
            task_id = %task_id,
            test = %name,
            bytes = size,
            "Artifact downloaded"
        );
        Ok(artifact)
    }
}
