//! Configuration for session queue paging.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Paging configuration, embedded into the host application's own config.
///
/// Every field carries a serde default, so an absent or partial section
/// deserializes to working values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PagingConfig {
    /// Selects the long idle threshold used on debug rigs, where a queue can
    /// sit untouched for minutes while someone holds a breakpoint.
    /// Default: `false`. Overridden by `WIREBUS_DEBUG_MODE`.
    #[serde(default)]
    pub debug_mode: bool,
    /// Root directory for page files; queues page into
    /// `{page_dir}/queueCache/`. Defaults to the system temp directory.
    /// Overridden by `WIREBUS_PAGE_DIR`.
    #[serde(default)]
    pub page_dir: Option<PathBuf>,
    /// Capacity in bytes of each session's in-memory transmission buffer.
    /// Default: 64 KiB.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_buffer_capacity() -> usize {
    64 * 1024
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            page_dir: None,
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl PagingConfig {
    /// Default configuration with `WIREBUS_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `WIREBUS_DEBUG_MODE` and `WIREBUS_PAGE_DIR` overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(flag) = std::env::var("WIREBUS_DEBUG_MODE") {
            if !flag.trim().is_empty() {
                match flag.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => self.debug_mode = true,
                    "0" | "false" | "no" | "off" => self.debug_mode = false,
                    _ => tracing::warn!(
                        "Ignoring invalid WIREBUS_DEBUG_MODE (valid: 1|0|true|false|yes|no|on|off)"
                    ),
                }
            }
        }

        if let Ok(dir) = std::env::var("WIREBUS_PAGE_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                self.page_dir = Some(PathBuf::from(trimmed));
            }
        }
    }

    /// The directory page files live under, before the `queueCache` segment.
    pub fn resolved_page_dir(&self) -> PathBuf {
        self.page_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
