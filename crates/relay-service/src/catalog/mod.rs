//! Channel catalog.
//!
//! The relay never creates or deletes channels. It reads them and toggles the
//! favorite flag. `FileCatalog` keeps the catalog in memory and persists
//! favorite changes back to its JSON file.

use async_trait::async_trait;
use common::types::ChannelId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// Opaque source locator; reachability is never checked.
    pub url: String,
    #[serde(default)]
    pub favorite: bool,
}

/// Catalog storage errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Channel {0} not found")]
    NotFound(ChannelId),

    #[error("Catalog I/O error: {0}")]
    Io(String),

    #[error("Catalog parse error: {0}")]
    Parse(String),

    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Channel catalog storage.
#[async_trait]
pub trait ChannelCatalog: Send + Sync {
    /// All channels, sorted by name.
    async fn list_channels(&self) -> Result<Vec<Channel>, CatalogError>;

    /// Look up one channel.
    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, CatalogError>;

    /// Set the favorite flag and return the updated channel.
    async fn set_favorite(&self, id: ChannelId, favorite: bool) -> Result<Channel, CatalogError>;
}

/// Sort by name, case-insensitively, then by id for a stable order.
pub fn sort_by_name(channels: &mut [Channel]) {
    channels.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.id.cmp(&b.id))
    });
}

/// Reject empty names and duplicate ids.
pub fn validate_channels(channels: &[Channel]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for channel in channels {
        if channel.name.trim().is_empty() {
            return Err(CatalogError::Invalid(format!(
                "channel {} has an empty name",
                channel.id
            )));
        }
        if !seen.insert(channel.id) {
            return Err(CatalogError::Invalid(format!(
                "duplicate channel id {}",
                channel.id
            )));
        }
    }
    Ok(())
}

/// JSON-file backed catalog.
///
/// The file holds a JSON array of channels. Favorite changes are written to a
/// sibling temp file and renamed over the original.
pub struct FileCatalog {
    path: PathBuf,
    channels: RwLock<Vec<Channel>>,
}

impl FileCatalog {
    /// Load the catalog from `path`.
    #[instrument(skip_all, name = "relay.catalog.load", fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?;

        let mut channels: Vec<Channel> =
            serde_json::from_slice(&raw).map_err(|e| CatalogError::Parse(e.to_string()))?;
        validate_channels(&channels)?;
        sort_by_name(&mut channels);

        info!(
            target: "relay.catalog",
            channel_count = channels.len(),
            "Channel catalog loaded"
        );

        Ok(Self {
            path,
            channels: RwLock::new(channels),
        })
    }

    /// Path the catalog persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, channels: &[Channel]) -> Result<(), CatalogError> {
        let body = serde_json::to_vec_pretty(channels)
            .map_err(|e| CatalogError::Parse(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, body)
            .await
            .map_err(|e| CatalogError::Io(format!("{}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| CatalogError::Io(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl ChannelCatalog for FileCatalog {
    async fn list_channels(&self) -> Result<Vec<Channel>, CatalogError> {
        Ok(self.channels.read().await.clone())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, CatalogError> {
        Ok(self
            .channels
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    #[instrument(skip(self), name = "relay.catalog.set_favorite")]
    async fn set_favorite(&self, id: ChannelId, favorite: bool) -> Result<Channel, CatalogError> {
        // Held across persist so concurrent toggles write in order
        let mut channels = self.channels.write().await;

        let mut updated = channels.clone();
        let channel = updated
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        channel.favorite = favorite;
        let result = channel.clone();

        self.persist(&updated).await?;
        *channels = updated;

        Ok(result)
    }
}

/// In-memory catalog for tests and the test harness.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Mock catalog holding channels in memory.
    pub struct MockCatalog {
        channels: RwLock<Vec<Channel>>,
        lookups: AtomicUsize,
        failing: AtomicBool,
    }

    impl MockCatalog {
        /// Create a mock holding `channels`.
        pub fn new(mut channels: Vec<Channel>) -> Self {
            sort_by_name(&mut channels);
            Self {
                channels: RwLock::new(channels),
                lookups: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            }
        }

        /// Make every subsequent call fail with an I/O error.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Number of `get_channel` calls made.
        pub fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), CatalogError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CatalogError::Io("mock catalog failure".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChannelCatalog for MockCatalog {
        async fn list_channels(&self) -> Result<Vec<Channel>, CatalogError> {
            self.check()?;
            Ok(self.channels.read().await.clone())
        }

        async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self
                .channels
                .read()
                .await
                .iter()
                .find(|c| c.id == id)
                .cloned())
        }

        async fn set_favorite(
            &self,
            id: ChannelId,
            favorite: bool,
        ) -> Result<Channel, CatalogError> {
            self.check()?;
            let mut channels = self.channels.write().await;
            let channel = channels
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(CatalogError::NotFound(id))?;
            channel.favorite = favorite;
            Ok(channel.clone())
        }
    }
}
