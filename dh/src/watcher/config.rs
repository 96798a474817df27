//! Watcher configuration

use serde::{Deserialize, Serialize};

/// Configuration for the template directory watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherConfig {
    /// Reload templates when their files change
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Rescan every root when a template file disappears
    #[serde(default = "default_rescan_on_remove")]
    pub rescan_on_remove: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_rescan_on_remove() -> bool {
    true
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rescan_on_remove: default_rescan_on_remove(),
        }
    }
}
