use directories::ProjectDirs;
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tokio::io::AsyncWriteExt;

use serde::Deserialize;
use serde::Serialize;
use tokio::fs::create_dir_all;
use tokio::fs::OpenOptions;
use tracing::warn;

use crate::error::Error;
use crate::policy::PartialTransfers;
use crate::ring_buffer;

/// 32 KiB, older clients drop the connection on larger chunks.
pub const DEFAULT_MAX_CHUNK_SIZE: u32 = 32 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Largest part requested from a single source at once.
    pub max_chunk_size: u32,
    /// Capacity of the ring buffer of each connection.
    pub ring_buffer_size: usize,
    /// Pad encoded payloads to a multiple of this, 0 disables padding.
    pub pad_to_block_size: usize,
    pub partial_transfers: PartialTransfers,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            ring_buffer_size: ring_buffer::DEFAULT_CAPACITY,
            pad_to_block_size: 0,
            partial_transfers: PartialTransfers::default(),
        }
    }
}

impl Config {
    /// Path of the configuration file in the user's config folder,
    /// the folder is created if it doesn't exist.
    pub async fn config_path() -> Result<PathBuf, Error> {
        // errors if the user does not have a home folder
        let dotfile =
            ProjectDirs::from("", "", "Rangesync").ok_or(Error::HomeInvalid)?;
        let mut config_path = dotfile.config_dir().to_path_buf();

        if !config_path.exists() {
            create_dir_all(&config_path).await.map_err(|_| {
                Error::FolderOpenError(config_path.display().to_string())
            })?;
        }

        config_path.push("config.toml");
        Ok(config_path)
    }

    /// Load the configuration file of the user.
    ///
    /// If the file does not exist, or is not valid, the default
    /// configuration is written to it and returned.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_path().await?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        let mut dst = String::new();
        file.read_to_string(&mut dst).await?;

        match Self::from_toml_str(&dst) {
            Ok(config) if !dst.trim().is_empty() => Ok(config),
            r => {
                if let Err(e) = r {
                    warn!("invalid config at {}: {e}", path.display());
                }
                let config = Config::default();
                let config_str = toml::to_string(&config)?;

                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                file.write_all(config_str.as_bytes()).await?;
                file.flush().await?;

                Ok(config)
            }
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str::<Config>(s)?)
    }
}
