//! Raw artifact archive, payload decryption and HTTP fetch utilities.

pub mod cipher;
pub mod fetch;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use matchstats_core::{DataType, DecryptedArtifact, NaturalKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub use cipher::{
    decrypt, derive_key, seal, DecryptionError, DecryptionStage, EncryptedEnvelope, TimestampKey,
};
pub use fetch::{
    classify_status, open_envelope, ArtifactFetcher, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetchClient, RetryDisposition, DEFAULT_USER_AGENT,
};

pub const CRATE_NAME: &str = "matchstats-storage";

#[derive(Debug, Clone, Serialize)]
pub struct ArchivedArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    /// The file existed and `overwrite` was off, so nothing was written.
    pub already_present: bool,
}

/// Decrypted artifacts on disk, one file per `(match, data type)`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `<data-type>/<year>/<tournament>_<year>_<MATCH>_<data-type>.json`; only match keys have a path.
    pub fn artifact_relative_path(&self, key: &NaturalKey, data_type: DataType) -> Option<PathBuf> {
        let match_id = key.match_id.as_deref()?;
        let slug = data_type.slug();
        Some(
            PathBuf::from(slug)
                .join(key.year.to_string())
                .join(format!(
                    "{}_{}_{}_{}.json",
                    key.tournament_id,
                    key.year,
                    match_id.to_ascii_uppercase(),
                    slug
                )),
        )
    }

    fn absolute_path(&self, key: &NaturalKey, data_type: DataType) -> anyhow::Result<PathBuf> {
        self.artifact_relative_path(key, data_type)
            .map(|rel| self.root.join(rel))
            .ok_or_else(|| anyhow!("{key} is not a match key; artifacts are archived per match"))
    }

    pub async fn contains(&self, key: &NaturalKey, data_type: DataType) -> anyhow::Result<bool> {
        let path = self.absolute_path(key, data_type)?;
        fs::try_exists(&path)
            .await
            .with_context(|| format!("checking artifact path {}", path.display()))
    }

    pub async fn load(
        &self,
        key: &NaturalKey,
        data_type: DataType,
    ) -> anyhow::Result<Option<DecryptedArtifact>> {
        let path = self.absolute_path(key, data_type)?;
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking artifact path {}", path.display()))?
        {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading artifact {}", path.display()))?;
        let artifact = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing artifact {}", path.display()))?;
        Ok(Some(artifact))
    }

    /// Writes the artifact through a temp file and an atomic rename.
    pub async fn store(
        &self,
        key: &NaturalKey,
        data_type: DataType,
        artifact: &DecryptedArtifact,
        overwrite: bool,
    ) -> anyhow::Result<ArchivedArtifact> {
        let relative_path = self
            .artifact_relative_path(key, data_type)
            .ok_or_else(|| anyhow!("{key} is not a match key; artifacts are archived per match"))?;
        let absolute_path = self.root.join(&relative_path);
        let bytes = serde_json::to_vec(artifact).context("serializing artifact")?;
        let content_hash = Self::sha256_hex(&bytes);

        let parent = absolute_path
            .parent()
            .ok_or_else(|| anyhow!("artifact path {} has no parent", absolute_path.display()))?
            .to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;

        if !overwrite
            && fs::try_exists(&absolute_path)
                .await
                .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            debug!(%key, path = %absolute_path.display(), "artifact already archived");
            return Ok(ArchivedArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                already_present: true,
            });
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp artifact {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(ArchivedArtifact {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            already_present: false,
        })
    }
}
