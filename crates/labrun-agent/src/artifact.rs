//! Downloaded artifacts and their scratch files.

use std::io;
use std::path::{Component, Path, PathBuf};

use labrun_core::TaskId;
use tracing::{debug, warn};

use crate::error::FetchError;

/// An executable fetched for one task.
///
/// The value owns its scratch file: dropping it removes the file, so every
/// exit path of a task (success, failure, launch error, cancellation) leaves
/// the scratch directory as it found it.
#[derive(Debug)]
pub struct Artifact {
    name: String,
    task_id: TaskId,
    path: PathBuf,
}

impl Artifact {
    /// Claim the scratch path for `name` within `task_id`. No file is created
    /// yet; whatever ends up at the path is removed when the artifact drops.
    pub(crate) fn claim(scratch_dir: &Path, name: &str, task_id: &TaskId) -> Result<Self, FetchError> {
        let file_name = Self::file_name(name, task_id)?;
        Ok(Self {
            name: name.to_string(),
            task_id: task_id.clone(),
            path: scratch_dir.join(file_name),
        })
    }

    /// `{name}_{task_id}`, or just `{name}` for requests without an id.
    fn file_name(name: &str, task_id: &TaskId) -> Result<String, FetchError> {
        let file_name = if task_id.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", name, task_id)
        };

        let mut components = Path::new(&file_name).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(c)) if c == file_name.as_str())
            && components.next().is_none();
        if name.is_empty() || file_name.contains('\0') || !single_normal {
            return Err(FetchError::InvalidName(file_name));
        }
        Ok(file_name)
    }

    /// Logical artifact name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Local path of the executable.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        // Synchronous unlink on the current worker thread: a single syscall,
        // and `Drop` cannot await.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove artifact"
            ),
        }
    }
}
