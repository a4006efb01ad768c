// imgload - Asynchronous image loading with a serialized background decoder
//
// This is the library crate containing the engine, decoders and configuration.
// The binary crate (main.rs) is a small command-line loader built on it.

pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use engine::{
    DecodeArbiter, Engine, EngineBuilder, EngineError, EngineSettings, EngineStatus, LoadError,
    LoadResult, LoaderEvent, Tick,
};
pub use metrics::Metrics;
pub use models::{DecodeOptions, DecodedImage, LoaderConfig, Request, RequestId, SourceRef};
pub use services::{DecodeError, Decoder, SourceResolver};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
