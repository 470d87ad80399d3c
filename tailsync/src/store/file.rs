use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::state::SourceOffset;
use crate::store::OffsetStore;
use crate::sync_error;

/// [`OffsetStore`] persisting one JSON file per table in a directory.
///
/// Files are replaced atomically by writing a temporary file and renaming it, so a crash never
/// leaves a partially written offset behind.
#[derive(Debug, Clone)]
pub struct FileOffsetStore {
    directory: PathBuf,
    // Writers share the temporary file of a table.
    write_lock: Arc<Mutex<()>>,
}

impl FileOffsetStore {
    /// Creates a store in `directory`, creating the directory if needed.
    pub async fn new(directory: impl AsRef<Path>) -> SyncResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await?;

        Ok(Self {
            directory,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn file_path(&self, table_name: &str) -> SyncResult<PathBuf> {
        if table_name.is_empty()
            || table_name.contains(['/', '\\'])
            || table_name == "."
            || table_name == ".."
        {
            bail!(
                ErrorKind::InvalidData,
                "Table name cannot be used as an offset file name",
                table_name
            );
        }

        Ok(self.directory.join(format!("{table_name}.json")))
    }
}

impl OffsetStore for FileOffsetStore {
    async fn load_offset(&self, table_name: &str) -> SyncResult<Option<SourceOffset>> {
        let path = self.file_path(table_name)?;

        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let offset = serde_json::from_slice(&contents).map_err(|err| {
            sync_error!(
                ErrorKind::InvalidResumptionState,
                "Stored offset cannot be decoded",
                format!("{}: {err}", path.display())
            )
        })?;

        Ok(Some(offset))
    }

    async fn store_offset(&self, offset: &SourceOffset) -> SyncResult<()> {
        let path = self.file_path(&offset.table_name)?;
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(offset)?;

        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(&json).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &path).await?;

        debug!(table = %offset.table_name, path = %path.display(), "stored offset");

        Ok(())
    }
}
