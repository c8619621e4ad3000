use crate::atomic::write_atomic;
use crate::auth::token::Credential;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to access credential file: {0}")]
    Io(#[from] io::Error),
    #[error("Credential file is not valid: {0}")]
    Format(#[from] serde_json::Error),
}

/// Durable home of the credential between runs. Implementations only persist,
/// they never interpret the tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet
    async fn load(&self) -> Result<Option<Credential>, StoreError>;

    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;
}

/// One JSON file per client id
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// The file name is a digest of the client id, so distinct ids never share
    /// a record whatever characters they contain
    pub fn new(dir: &Path, client_id: &str) -> Self {
        let digest = Sha256::digest(client_id.as_bytes());
        Self {
            path: dir.join(format!("token-{:x}.json", digest)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(credential)?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}
