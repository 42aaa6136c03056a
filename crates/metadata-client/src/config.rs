use metadata_core::EngineConfig;
use metadata_core::metadata_base_url;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project API root; a node's API URL is `{project_api_url}{node_id}/`.
    pub project_api_url: String,
    /// JSON:API root serving schemas and draft registrations.
    pub schema_api_url: Option<String>,
    /// Local mirror of node storage, laid out as `{root}/{node_id}/{provider}/...`
    pub storage_root: PathBuf,
    pub access_token: Option<String>,
    pub engine: EngineConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `METADATA_PROJECT_API_URL`: e.g. `https://rdm.example.org/api/v1/project/`
    ///
    /// Optional:
    /// - `METADATA_SCHEMA_API_URL`: e.g. `https://api.rdm.example.org/v2/`
    /// - `METADATA_STORAGE_ROOT`: storage mirror (supports ~ for home directory)
    /// - `METADATA_ACCESS_TOKEN`
    /// - `METADATA_VALIDATION_TTL_MS`, `METADATA_POLL_INTERVAL_MS`, `METADATA_MOVE_MAX_ATTEMPTS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let project_api_url = lookup("METADATA_PROJECT_API_URL")
            .map(with_trailing_slash)
            .ok_or(ConfigError::MissingProjectApiUrl)?;
        let schema_api_url = lookup("METADATA_SCHEMA_API_URL").map(with_trailing_slash);

        let storage_root = match lookup("METADATA_STORAGE_ROOT") {
            Some(path) => expand_tilde(&path),
            None => dirs::data_dir()
                .map(|dir| dir.join("metadata-sync"))
                .ok_or(ConfigError::NoStorageRoot)?,
        };

        let mut engine = EngineConfig::default();
        if let Some(ms) = parse_number(&lookup, "METADATA_VALIDATION_TTL_MS")? {
            engine.validation_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "METADATA_POLL_INTERVAL_MS")? {
            engine.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_number(&lookup, "METADATA_MOVE_MAX_ATTEMPTS")? {
            engine.move_retry.max_attempts =
                u32::try_from(attempts).map_err(|_| ConfigError::InvalidNumber {
                    name: "METADATA_MOVE_MAX_ATTEMPTS",
                    value: attempts.to_string(),
                })?;
        }

        Ok(Self {
            project_api_url,
            schema_api_url,
            storage_root,
            access_token: lookup("METADATA_ACCESS_TOKEN").filter(|t| !t.is_empty()),
            engine,
        })
    }

    pub fn node_api_url(&self, node_id: &str) -> String {
        format!("{}{}/", self.project_api_url, node_id)
    }

    pub fn metadata_url(&self, node_id: &str) -> String {
        metadata_base_url(&self.node_api_url(node_id))
    }
}

fn with_trailing_slash(url: String) -> String {
    if url.ends_with('/') { url } else { format!("{url}/") }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { name, value })
        })
        .transpose()
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("METADATA_PROJECT_API_URL environment variable not set")]
    MissingProjectApiUrl,

    #[error("METADATA_STORAGE_ROOT not set and no data directory available")]
    NoStorageRoot,

    #[error("{name} must be a whole number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_urls_are_derived_per_node() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("METADATA_PROJECT_API_URL", "https://rdm.example.org/api/v1/project"),
            ("METADATA_STORAGE_ROOT", "/srv/mirror"),
        ]))
        .unwrap();
        assert_eq!(
            config.node_api_url("abc12"),
            "https://rdm.example.org/api/v1/project/abc12/"
        );
        assert_eq!(
            config.metadata_url("abc12"),
            "https://rdm.example.org/api/v1/project/abc12/metadata/"
        );
        assert_eq!(config.storage_root, PathBuf::from("/srv/mirror"));
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_engine_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("METADATA_PROJECT_API_URL", "https://rdm.example.org/api/v1/project/"),
            ("METADATA_STORAGE_ROOT", "/srv/mirror"),
            ("METADATA_VALIDATION_TTL_MS", "1000"),
            ("METADATA_MOVE_MAX_ATTEMPTS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.engine.validation_ttl, Duration::from_millis(1000));
        assert_eq!(config.engine.move_retry.max_attempts, 3);
    }

    #[test]
    fn test_missing_url_and_bad_numbers() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingProjectApiUrl)
        ));
        let err = ClientConfig::from_lookup(lookup(&[
            ("METADATA_PROJECT_API_URL", "https://rdm.example.org/"),
            ("METADATA_STORAGE_ROOT", "/srv/mirror"),
            ("METADATA_POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                name: "METADATA_POLL_INTERVAL_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
