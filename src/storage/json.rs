use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use tracing::warn;

use crate::error::StoreError;
use crate::storage::{NotificationRecord, NotificationStore};

/// Notification history kept as a single JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationStore for JsonFileStore {
    /// A missing or blank file is an empty history; a blank one is logged.
    /// Anything unparsable is reported as `StoreError::Read`.
    fn load(&self) -> BoxFuture<'_, Result<NotificationRecord, Report<StoreError>>> {
        Box::pin(async move {
            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NotificationRecord::new()),
                Err(e) => {
                    return Err(Report::new(e)
                        .change_context(StoreError::Read)
                        .attach(format!("path: {}", self.path.display())));
                }
            };

            if content.trim().is_empty() {
                warn!(path = %self.path.display(), "notification history file is empty");
                return Ok(NotificationRecord::new());
            }

            serde_json::from_str::<NotificationRecord>(&content)
                .change_context(StoreError::Read)
                .attach_with(|| format!("invalid JSON in {}", self.path.display()))
        })
    }

    /// Written to a sibling temp file first, then renamed over the target.
    fn save(&self, record: &NotificationRecord) -> BoxFuture<'_, Result<(), Report<StoreError>>> {
        let encoded = serde_json::to_string_pretty(record);
        Box::pin(async move {
            let encoded = encoded.change_context(StoreError::Write)?;

            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .change_context(StoreError::Write)
                    .attach_with(|| format!("cannot create directory: {}", parent.display()))?;
            }

            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, encoded)
                .await
                .change_context(StoreError::Write)
                .attach_with(|| format!("path: {}", tmp.display()))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .change_context(StoreError::Write)
                .attach_with(|| format!("path: {}", self.path.display()))?;

            Ok(())
        })
    }
}
