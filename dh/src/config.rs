//! dynhtml configuration types and loading

use eyre::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capabilities::native::from_yaml;
use crate::engine::EngineBuilder;
use crate::script::Value;
use crate::watcher::WatcherConfig;

/// Main dynhtml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Template directories; the first one that has a module wins
    pub roots: Vec<String>,

    /// Stripped from request paths before routing
    pub prefix: String,

    /// Path rendered for requests to `/`
    #[serde(rename = "index-page")]
    pub index_page: String,

    /// Path rendered (with status 200) when a template is missing
    #[serde(rename = "not-found-page")]
    pub not_found_page: String,

    /// Native modules templates may import
    #[serde(rename = "allowed-imports")]
    pub allowed_imports: Vec<String>,

    /// Extra names visible in every template
    pub globals: serde_yaml::Mapping,

    /// Template directory watching
    pub watch: WatcherConfig,

    /// HTTP listener
    pub server: ServerConfig,

    /// Log level when none is given on the command line
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: vec!["templates".to_string()],
            prefix: String::new(),
            index_page: String::new(),
            not_found_page: String::new(),
            allowed_imports: Vec::new(),
            globals: serde_yaml::Mapping::new(),
            watch: WatcherConfig::default(),
            server: ServerConfig::default(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: dynhtml.yml
        let local_config = PathBuf::from("dynhtml.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/dynhtml/dynhtml.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dynhtml").join("dynhtml.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Roots with `~/` expanded
    pub fn expanded_roots(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .filter_map(|root| match root.strip_prefix("~/") {
                Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
                None => Some(PathBuf::from(root)),
            })
            .collect()
    }

    /// Globals as template values; non-string keys are skipped
    pub fn global_values(&self) -> IndexMap<String, Value> {
        self.globals
            .iter()
            .filter_map(|(key, value)| match key.as_str() {
                Some(name) => Some((name.to_string(), from_yaml(value))),
                None => {
                    tracing::warn!("Ignoring global with non-string key: {:?}", key);
                    None
                }
            })
            .collect()
    }

    /// Engine builder with every setting from this config applied
    pub fn engine_builder(&self) -> EngineBuilder {
        let mut builder = EngineBuilder::new()
            .roots(self.expanded_roots())
            .allowed_imports(self.allowed_imports.iter().cloned())
            .globals(self.global_values());
        if !self.prefix.is_empty() {
            builder = builder.prefix(&self.prefix);
        }
        if !self.index_page.is_empty() {
            builder = builder.index_page(&self.index_page);
        }
        if !self.not_found_page.is_empty() {
            builder = builder.not_found_page(&self.not_found_page);
        }
        builder
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.roots, vec!["templates"]);
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert!(config.watch.enabled);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
roots:
  - site/templates
  - ~/shared/templates
prefix: /site
index-page: /home
not-found-page: /missing
allowed-imports:
  - math
  - json
globals:
  siteName: Example
  sections: [news, about]
watch:
  enabled: false
server:
  listen: 0.0.0.0:9000
log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.prefix, "/site");
        assert_eq!(config.index_page, "/home");
        assert_eq!(config.not_found_page, "/missing");
        assert_eq!(config.allowed_imports, vec!["math", "json"]);
        assert!(!config.watch.enabled);
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let globals = config.global_values();
        assert_eq!(globals["siteName"].to_string(), "Example");
        assert_eq!(globals["sections"].repr(), "['news', 'about']");

        let roots = config.expanded_roots();
        assert_eq!(roots[0], PathBuf::from("site/templates"));
        assert!(roots.iter().all(|root| !root.starts_with("~")));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
prefix: /docs
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.prefix, "/docs");

        // Defaults for unspecified
        assert_eq!(config.roots, vec!["templates"]);
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert!(config.globals.is_empty());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dynhtml.yml");
        fs::write(&path, "roots: [pages]\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.roots, vec!["pages"]);

        let missing = dir.path().join("nope.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
