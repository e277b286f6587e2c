//! Intermediate artifact storage
//!
//! Normalized batches are handed from the transform stage to the write stage
//! as `<stem>.parquet` objects behind an OpenDAL operator.

use gas2influx_core::parquet::{decode_artifact, encode_artifact, ArtifactOptions};
use gas2influx_core::NormalizedBatch;
use opendal::Operator;
use tracing::debug;

use crate::error::ArtifactError;

type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    operator: Operator,
    location: String,
}

impl ArtifactStore {
    /// Store artifacts under a local directory, created if missing.
    pub fn fs(root: &str) -> Result<Self> {
        let builder = opendal::services::Fs::default().root(root);
        let operator = Operator::new(builder)
            .map_err(|source| ArtifactError::Init {
                location: root.to_string(),
                source,
            })?
            .finish();
        debug!(root, "Artifact store initialized (fs)");
        Ok(Self {
            operator,
            location: root.to_string(),
        })
    }

    /// Process-local store, used by tests and dry runs.
    pub fn memory() -> Result<Self> {
        let operator = Operator::new(opendal::services::Memory::default())
            .map_err(|source| ArtifactError::Init {
                location: "memory".to_string(),
                source,
            })?
            .finish();
        Ok(Self {
            operator,
            location: "memory".to_string(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Object path of the artifact for a file stem.
    pub fn artifact_path(stem: &str) -> String {
        format!("{stem}.parquet")
    }

    /// Encode `batch` and write it as the artifact for its source file.
    pub async fn put_batch(
        &self,
        batch: &NormalizedBatch,
        options: &ArtifactOptions,
    ) -> Result<String> {
        let path = Self::artifact_path(batch.record.stem());
        let encoded = encode_artifact(batch, options).map_err(|source| ArtifactError::Codec {
            path: path.clone(),
            source,
        })?;
        let size = encoded.len();

        self.operator
            .write(&path, encoded)
            .await
            .map_err(|source| ArtifactError::Io {
                op: "write",
                path: path.clone(),
                source,
            })?;

        debug!(path = %path, rows = batch.len(), bytes = size, "Artifact written");
        Ok(path)
    }

    /// Read an artifact back into a batch.
    pub async fn load_batch(&self, stem: &str) -> Result<NormalizedBatch> {
        let path = Self::artifact_path(stem);
        let buffer = self
            .operator
            .read(&path)
            .await
            .map_err(|source| ArtifactError::Io {
                op: "read",
                path: path.clone(),
                source,
            })?;

        decode_artifact(buffer.to_bytes())
            .map_err(|source| ArtifactError::Codec { path, source })
    }

    pub async fn exists(&self, stem: &str) -> Result<bool> {
        let path = Self::artifact_path(stem);
        self.operator
            .exists(&path)
            .await
            .map_err(|source| ArtifactError::Io {
                op: "stat",
                path,
                source,
            })
    }

    /// Remove an artifact. Removing a missing artifact succeeds.
    pub async fn delete(&self, stem: &str) -> Result<()> {
        let path = Self::artifact_path(stem);
        self.operator
            .delete(&path)
            .await
            .map_err(|source| ArtifactError::Io {
                op: "delete",
                path: path.clone(),
                source,
            })?;
        debug!(path = %path, "Artifact deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gas2influx_core::{FileRecord, NormalizedRow, MEASUREMENT_COUNT};

    fn sample_batch() -> NormalizedBatch {
        let record = FileRecord::from_identifier("20160930_203718.csv").unwrap();
        let rows = (0..3)
            .map(|i| NormalizedRow {
                timestamp: Utc.with_ymd_and_hms(2016, 9, 30, 0, 0, i).unwrap(),
                values: [i as f64; MEASUREMENT_COUNT],
            })
            .collect();
        NormalizedBatch::new(record, rows)
    }

    #[tokio::test]
    async fn put_load_delete_in_memory() {
        let store = ArtifactStore::memory().unwrap();
        let batch = sample_batch();

        let path = store
            .put_batch(&batch, &ArtifactOptions::default())
            .await
            .unwrap();
        assert_eq!(path, "20160930_203718.parquet");
        assert!(store.exists("20160930_203718").await.unwrap());

        let loaded = store.load_batch("20160930_203718").await.unwrap();
        assert_eq!(loaded, batch);

        store.delete("20160930_203718").await.unwrap();
        assert!(!store.exists("20160930_203718").await.unwrap());
        // Idempotent
        store.delete("20160930_203718").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_writes_named_parquet_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("artifacts");
        let store = ArtifactStore::fs(root.to_str().unwrap()).unwrap();

        store
            .put_batch(&sample_batch(), &ArtifactOptions::default())
            .await
            .unwrap();
        assert!(root.join("20160930_203718.parquet").is_file());
    }

    #[tokio::test]
    async fn missing_artifact_is_an_io_error() {
        let store = ArtifactStore::memory().unwrap();
        let err = store.load_batch("nope").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Io { op: "read", .. }));
        assert_eq!(err.code().as_str(), "E006");
    }
}
