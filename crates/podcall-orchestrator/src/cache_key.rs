//! Build cache keys.
//!
//! A cache key is the image tag that identifies one version of a method's
//! artifact. When the registry already holds the tag, the build is skipped.

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::debug;

use podcall_common::{ArtifactRef, CacheKeyStrategy, OrchestratorError};

/// Hex characters of the content digest kept in the tag.
const DIGEST_TAG_LEN: usize = 16;

/// A registry tag identifying one artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the cache key for an artifact.
    ///
    /// `ByteLength` uses the size hint as-is and never touches the file.
    /// `ContentHash` reads the artifact and digests it.
    ///
    /// # Errors
    ///
    /// Returns a build error if the artifact cannot be read.
    pub async fn derive(
        artifact: &ArtifactRef,
        strategy: CacheKeyStrategy,
    ) -> Result<Self, OrchestratorError> {
        let key = match strategy {
            CacheKeyStrategy::ByteLength => Self(artifact.size_hint.to_string()),
            CacheKeyStrategy::ContentHash => {
                let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
                    OrchestratorError::build(format!(
                        "Failed to read artifact {}: {e}",
                        artifact.path.display()
                    ))
                })?;
                Self::from_contents(&bytes)
            }
        };

        debug!(cache_key = %key, ?strategy, "Derived build cache key");
        Ok(key)
    }

    /// Cache key of an in-memory artifact under the content hash strategy.
    pub fn from_contents(bytes: &[u8]) -> Self {
        let digest = format!("{:x}", Sha256::digest(bytes));
        Self(format!("sha-{}", &digest[..DIGEST_TAG_LEN]))
    }

    /// The tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
