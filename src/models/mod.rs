//! Data models for the image-loading engine.
//!
//! This module contains the value types that flow through the engine:
//! - [`SourceRef`]: Logical reference to the file the caller wants displayed
//! - [`Request`]: Immutable snapshot of one decode attempt, handed to the worker
//! - [`DecodedImage`]: The decoded payload (still frame or animation), shared via `Arc`
//! - [`LoaderConfig`]: Settings loaded from `imgload.yaml` by [`ConfigManager`](crate::config::ConfigManager)
//!
//! # Ownership Note
//!
//! A [`Request`] is created by the engine when a source has been resolved and is
//! moved to the worker thread; it is never mutated afterwards. A [`DecodedImage`]
//! is produced once per request and is read-only after it has been published.

pub mod config;
pub mod image;
pub mod request;

pub use config::{EngineConfig, LoaderConfig, LoggingConfig, ThumbnailConfig};
pub use image::{Animation, DecodedImage, Frame};
pub use request::{DecodeOptions, Request, RequestId, SourceRef};
