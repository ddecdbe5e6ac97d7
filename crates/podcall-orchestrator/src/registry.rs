//! Registry cache check.
//!
//! Decides whether an image has to be built by asking the registry whether
//! a tag equal to the artifact's cache key already exists. The check fails
//! open: any transport, status or parse failure means "rebuild".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use podcall_common::{
    MethodIdentity, OrchestratorError, RegistryConfig, RegistryKind, RegistryProbeError,
};

use crate::cache_key::CacheKey;

/// Default API base of the hosted registry.
const DOCKER_HUB_API: &str = "https://hub.docker.com";

/// Tags requested per listing page.
const TAGS_PAGE_SIZE: &str = "100";

/// Listing pages followed before the probe gives up and reports a miss.
const MAX_TAG_PAGES: usize = 20;

/// Where an image lives in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCoordinates {
    /// Registry host for private registries.
    pub registry_host: Option<String>,
    /// Namespace (account/organization) for hosted registries.
    pub namespace: Option<String>,
    /// Image name.
    pub name: String,
}

impl ImageCoordinates {
    /// Coordinates of the image serving `identity` in the configured registry.
    pub fn for_identity(registry: &RegistryConfig, identity: &MethodIdentity) -> Self {
        match registry.kind {
            RegistryKind::DockerHub => Self {
                registry_host: None,
                namespace: registry.namespace.clone(),
                name: identity.slug(),
            },
            RegistryKind::Private => Self {
                registry_host: registry.host.clone(),
                namespace: None,
                name: identity.slug(),
            },
        }
    }

    /// Repository reference without tag, as used by `docker build -t`.
    pub fn repository(&self) -> String {
        match (&self.registry_host, &self.namespace) {
            (Some(host), _) => format!("{host}/{}", self.name),
            (None, Some(namespace)) => format!("{namespace}/{}", self.name),
            (None, None) => self.name.clone(),
        }
    }

    /// Full reference at `tag`.
    pub fn reference(&self, tag: &str) -> String {
        format!("{}:{tag}", self.repository())
    }
}

/// Answers "does this image need to be built?".
#[async_trait]
pub trait TagRegistry: Send + Sync {
    /// Returns `true` unless the registry confirms that `cache_key` exists.
    async fn needs_build(&self, image: &ImageCoordinates, cache_key: &CacheKey) -> bool;
}

/// Tag listing response body.
#[derive(Debug, Deserialize)]
struct TagListing {
    #[serde(default)]
    count: u64,
    results: Vec<TagEntry>,
    /// Absolute URL of the next page, absent on the last one.
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// HTTP client for registry tag listings.
pub struct RegistryClient {
    client: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    /// Create a registry client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig) -> Result<Self, OrchestratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("podcall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OrchestratorError::deploy(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// URL of the tag listing for `image`.
    pub fn tags_url(&self, image: &ImageCoordinates) -> Result<Url, RegistryProbeError> {
        let base = match (&self.config.api_base, self.config.kind) {
            (Some(base), _) => base.trim_end_matches('/').to_string(),
            (None, RegistryKind::DockerHub) => DOCKER_HUB_API.to_string(),
            (None, RegistryKind::Private) => {
                let host = self.config.host.as_deref().ok_or_else(|| {
                    RegistryProbeError::Transport {
                        reason: "private registry has no host configured".into(),
                    }
                })?;
                format!("https://{host}")
            }
        };

        let path = match self.config.kind {
            RegistryKind::DockerHub => {
                let namespace = image.namespace.as_deref().unwrap_or("library");
                format!("/v2/repositories/{namespace}/{}/tags", image.name)
            }
            RegistryKind::Private => format!("/v2/{}/tags", image.name),
        };

        Url::parse(&format!("{base}{path}")).map_err(|e| RegistryProbeError::Transport {
            reason: format!("invalid registry URL: {e}"),
        })
    }

    /// Check whether `cache_key` is among the image's tags.
    ///
    /// Follows the listing's `next` links until the tag is found or the
    /// listing ends.
    ///
    /// # Errors
    ///
    /// Returns the probe failure; [`TagRegistry::needs_build`] turns any of
    /// them into "rebuild".
    pub async fn has_tag(
        &self,
        image: &ImageCoordinates,
        cache_key: &CacheKey,
    ) -> Result<bool, RegistryProbeError> {
        let mut url = self.tags_url(image)?;
        url.query_pairs_mut().append_pair("page_size", TAGS_PAGE_SIZE);

        for page in 1..=MAX_TAG_PAGES {
            debug!(url = %url, page, cache_key = %cache_key, "Probing registry tags");
            let listing = self.fetch_listing(url).await?;
            debug!(count = listing.count, page, "Registry tag listing received");

            if listing
                .results
                .iter()
                .any(|tag| tag.name == cache_key.as_str())
            {
                return Ok(true);
            }

            let Some(next) = listing.next else {
                return Ok(false);
            };
            url = Url::parse(&next).map_err(|e| RegistryProbeError::Parse {
                reason: format!("invalid next page link {next}: {e}"),
            })?;
        }

        warn!(
            image = %image.repository(),
            pages = MAX_TAG_PAGES,
            "Tag listing longer than the page limit"
        );
        Ok(false)
    }

    /// Fetch and decode one page of the tag listing.
    async fn fetch_listing(&self, url: Url) -> Result<TagListing, RegistryProbeError> {
        let mut request = self.client.get(url);
        if self.config.has_credentials() {
            request = request.basic_auth(
                self.config.username.as_deref().unwrap_or_default(),
                self.config.password.as_deref(),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryProbeError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryProbeError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryProbeError::Transport {
                reason: e.to_string(),
            })?;
        serde_json::from_slice(&body).map_err(|e| RegistryProbeError::Parse {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl TagRegistry for RegistryClient {
    async fn needs_build(&self, image: &ImageCoordinates, cache_key: &CacheKey) -> bool {
        match self.has_tag(image, cache_key).await {
            Ok(found) => !found,
            Err(e) => {
                warn!(
                    image = %image.repository(),
                    cache_key = %cache_key,
                    error = %e,
                    "Registry probe failed, rebuilding"
                );
                true
            }
        }
    }
}
