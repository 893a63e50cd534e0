//! Optional TOML file layered under the command-line flags.
use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use masonry_scroll::MasonryConfig;
use serde::Deserialize;

/// Every field is optional; missing ones keep the library default.
///
/// Durations are given in milliseconds:
///
/// ```toml
/// page_size = 500
/// cache_capacity = 7
/// window_buffer = 3
/// settle_ms = 250
///
/// [store]
/// latency_ms = 20
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoSettings {
    pub page_size: Option<usize>,
    pub cache_capacity: Option<usize>,
    pub window_buffer: Option<usize>,
    pub drag_buffer: Option<usize>,
    pub fetch_workers: Option<usize>,
    pub max_fetch_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub column_width: Option<f32>,
    pub spacing: Option<f32>,
    pub gutter: Option<f32>,
    pub scrollbar_width: Option<f32>,
    pub settle_ms: Option<u64>,
    pub settle_epsilon: Option<f64>,
    pub window_timeout_ms: Option<u64>,
    pub edge_snap: Option<f64>,
    pub layout_tolerance: Option<f64>,
    pub max_band_pages: Option<usize>,
    pub store: StoreSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Artificial delay per store call.
    pub latency_ms: Option<u64>,
}

impl DemoSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store.latency_ms.unwrap_or(0))
    }

    pub fn to_config(&self) -> MasonryConfig {
        let mut config = MasonryConfig::default();
        if let Some(value) = self.page_size {
            config.page_size = value;
        }
        if let Some(value) = self.cache_capacity {
            config.cache_capacity = value;
        }
        if let Some(value) = self.window_buffer {
            config.window_buffer = value;
        }
        if let Some(value) = self.drag_buffer {
            config.drag_buffer = value;
        }
        if let Some(value) = self.fetch_workers {
            config.fetch_workers = value;
        }
        if let Some(value) = self.max_fetch_attempts {
            config.max_fetch_attempts = value;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(value) = self.column_width {
            config.column_width = value;
        }
        if let Some(value) = self.spacing {
            config.spacing = value;
        }
        if let Some(value) = self.gutter {
            config.gutter = value;
        }
        if let Some(value) = self.scrollbar_width {
            config.scrollbar_width = value;
        }
        if let Some(ms) = self.settle_ms {
            config.settle_duration = Duration::from_millis(ms);
        }
        if let Some(value) = self.settle_epsilon {
            config.settle_epsilon = value;
        }
        if let Some(ms) = self.window_timeout_ms {
            config.window_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = self.edge_snap {
            config.edge_snap = value;
        }
        if let Some(value) = self.layout_tolerance {
            config.layout_tolerance = value;
        }
        if let Some(value) = self.max_band_pages {
            config.max_band_pages = value;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let settings: DemoSettings = toml::from_str("").expect("parse");
        assert_eq!(settings.to_config(), MasonryConfig::default());
        assert_eq!(settings.store_latency(), Duration::ZERO);
    }

    #[test]
    fn fields_override_defaults() {
        let settings: DemoSettings = toml::from_str(
            "page_size = 500\ncache_capacity = 7\nsettle_ms = 250\n[store]\nlatency_ms = 20\n",
        )
        .expect("parse");
        let config = settings.to_config();
        assert_eq!(config.page_size, 500);
        assert_eq!(config.cache_capacity, 7);
        assert_eq!(config.settle_duration, Duration::from_millis(250));
        assert_eq!(settings.store_latency(), Duration::from_millis(20));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<DemoSettings>("page_sise = 5").is_err());
    }
}
