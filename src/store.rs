//! JSON-lines sink for code units.

use crate::model::CodeUnit;
use crate::traits::{Database, DatabaseError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Appends one JSON document per inserted [`CodeUnit`] to a file.
pub struct JsonLinesDatabase {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesDatabase {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Database for JsonLinesDatabase {
    async fn insert(&self, unit: CodeUnit) -> Result<(), DatabaseError> {
        let mut line = serde_json::to_vec(&unit)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        debug!(unit = %unit.display_name, "Stored code unit");
        Ok(())
    }
}
