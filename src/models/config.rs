use serde::{Deserialize, Serialize};

/// Configuration loaded from `imgload.yaml`
///
/// Every section and field has a default, so an empty or missing file yields
/// a working configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between completion poller ticks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stack size of each engine's worker thread
    #[serde(default = "default_worker_stack_size")]
    pub worker_stack_size: usize,

    /// Buffer size of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            worker_stack_size: default_worker_stack_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Longest edge of generated thumbnails, in pixels
    #[serde(default = "default_thumbnail_size")]
    pub size: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            size: default_thumbnail_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_log_prefix(),
            debug: false,
            console: default_console(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_worker_stack_size() -> usize {
    512 * 1024
}

fn default_event_capacity() -> usize {
    100
}

fn default_cache_dir() -> String {
    "thumbnails".to_string()
}

fn default_thumbnail_size() -> u32 {
    128
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "imgload".to_string()
}

fn default_console() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.worker_stack_size, 512 * 1024);
        assert_eq!(config.event_capacity, 100);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: LoaderConfig = serde_yaml_ng::from_str("engine:\n  poll_interval_ms: 20\n").unwrap();
        assert_eq!(config.engine.poll_interval_ms, 20);
        assert_eq!(config.engine.event_capacity, 100);
        assert_eq!(config.thumbnails.size, 128);
        assert_eq!(config.logging.prefix, "imgload");
    }
}
