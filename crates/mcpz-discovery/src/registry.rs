use crate::descriptor::SkillManifest;
use async_trait::async_trait;
use mcpz_core::McpzResult;
use serde::{Deserialize, Serialize};

/// Published metadata of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Registry name.
    pub name: String,
    /// The `latest` dist-tag.
    pub version: String,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
}

/// Network seam for the package registry and the skills registry.
///
/// Injected so discovery and installation can be tested offline.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn package_info(&self, id: &str) -> McpzResult<PackageInfo>;

    /// Fetch a skill's full manifest.
    async fn skill_info(&self, id: &str) -> McpzResult<SkillManifest>;
}

#[cfg(feature = "registry")]
pub use http::{HttpRegistryClient, NPM_REGISTRY_URL, SKILLS_REGISTRY_URL};

#[cfg(feature = "registry")]
mod http {
    use super::{PackageInfo, RegistryClient};
    use crate::descriptor::SkillManifest;
    use async_trait::async_trait;
    use mcpz_core::{McpzError, McpzResult};
    use tracing::debug;

    /// Public npm registry.
    pub const NPM_REGISTRY_URL: &str = "https://registry.npmjs.org";
    /// Public skills registry.
    pub const SKILLS_REGISTRY_URL: &str = "https://agentskills.io/api";

    /// [`RegistryClient`] over HTTPS.
    #[derive(Debug, Clone)]
    pub struct HttpRegistryClient {
        http: reqwest::Client,
        npm_url: String,
        skills_url: String,
    }

    impl Default for HttpRegistryClient {
        fn default() -> Self {
            Self::new(NPM_REGISTRY_URL, SKILLS_REGISTRY_URL)
        }
    }

    impl HttpRegistryClient {
        /// A client against custom registry base URLs.
        pub fn new(npm_url: impl Into<String>, skills_url: impl Into<String>) -> Self {
            Self {
                http: reqwest::Client::new(),
                npm_url: npm_url.into().trim_end_matches('/').to_string(),
                skills_url: skills_url.into().trim_end_matches('/').to_string(),
            }
        }

        async fn get_json(&self, url: &str) -> McpzResult<serde_json::Value> {
            debug!(url = %url, "Registry request");
            let resp = self
                .http
                .get(url)
                .header("accept", "application/json")
                .send()
                .await
                .map_err(|e| McpzError::Registry(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(McpzError::Registry(format!("{url} returned {status}")));
            }
            resp.json()
                .await
                .map_err(|e| McpzError::Registry(format!("{url}: {e}")))
        }
    }

    #[async_trait]
    impl RegistryClient for HttpRegistryClient {
        async fn package_info(&self, id: &str) -> McpzResult<PackageInfo> {
            // scoped names keep their '@' but the slash must be escaped
            let url = format!("{}/{}", self.npm_url, id.replace('/', "%2F"));
            let body = self.get_json(&url).await?;
            let version = body["dist-tags"]["latest"]
                .as_str()
                .ok_or_else(|| McpzError::Registry(format!("'{id}' has no latest version")))?;
            Ok(PackageInfo {
                name: body["name"].as_str().unwrap_or(id).to_string(),
                version: version.to_string(),
                description: body["description"].as_str().unwrap_or_default().to_string(),
            })
        }

        async fn skill_info(&self, id: &str) -> McpzResult<SkillManifest> {
            let url = format!("{}/skills/{id}", self.skills_url);
            let body = self.get_json(&url).await?;
            serde_json::from_value(body)
                .map_err(|e| McpzError::Registry(format!("bad skill manifest for '{id}': {e}")))
        }
    }
}
