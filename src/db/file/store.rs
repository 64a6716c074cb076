use std::io::ErrorKind;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::db::DalError;

/// One JSON array per collection, stored as `<dir>/<collection>.json`.
///
/// Reads treat a missing file, unparsable JSON and a non-array top level the
/// same way: as an empty collection. Writes go to a temporary file in the
/// same directory which is then renamed over the target, so readers only
/// ever observe a complete file.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    pub async fn load<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, DalError> {
        let path = self.path(collection);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DalError::Io(e)),
        };

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Unparsable collection file treated as empty: {e}");
                return Ok(Vec::new());
            }
        };

        if !value.is_array() {
            tracing::warn!(path = %path.display(), "Collection file is not a JSON array; treated as empty");
            return Ok(Vec::new());
        }

        match serde_json::from_value::<Vec<T>>(value) {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Collection entries do not match the expected shape; treated as empty: {e}");
                Ok(Vec::new())
            }
        }
    }

    pub async fn save<T: Serialize>(&self, collection: &str, items: &[T]) -> Result<(), DalError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let bytes = serde_json::to_vec_pretty(items)?;
        let target = self.path(collection);
        let tmp = self
            .dir
            .join(format!(".{collection}.json.{}.tmp", Uuid::now_v7().simple()));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DalError::Io(e));
        }
        Ok(())
    }
}
