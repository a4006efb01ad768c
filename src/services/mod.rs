//! Services module - Pluggable decode functions and source resolution.
//!
//! The engine treats decoding as an opaque, blocking operation. Everything that
//! actually touches image data lives here, behind two traits:
//!
//! - [`Decoder`]: Turns a resolved [`Request`] into a [`DecodedImage`]. Runs on an
//!   engine's worker thread, always inside the process-wide
//!   [`DecodeArbiter`](crate::engine::DecodeArbiter).
//! - [`SourceResolver`]: Turns a logical [`SourceRef`](crate::models::SourceRef) into
//!   a local, decode-ready path before the request is submitted.
//!
//! # Decoders
//!
//! - [`StillImageDecoder`]: Plain image files through the `image` crate, including
//!   GIF animations when the request asks for them
//! - [`ThumbnailCacheDecoder`]: Reads and maintains a directory of cached PNG thumbnails
//! - [`MediaTagDecoder`]: Decodes artwork embedded in media containers, read through
//!   an injected [`EmbeddedArtwork`] tag reader
//!
//! Any `Fn(&Request) -> Result<DecodedImage, DecodeError> + Send + Sync` closure is
//! also a [`Decoder`], which keeps tests and one-off loaders short:
//!
//! ```ignore
//! engine.set_decode_function(Arc::new(|request: &Request| {
//!     Ok(DecodedImage::from_rgba(render_placeholder(&request.source)))
//! }));
//! ```

pub mod media_tag;
pub mod resolver;
pub mod still;
pub mod thumbnail;

pub use media_tag::{EmbeddedArtwork, MediaTagDecoder};
pub use resolver::{LocalResolver, ResolveError, ResolvedSource, SourceResolver};
pub use still::StillImageDecoder;
pub use thumbnail::ThumbnailCacheDecoder;

use crate::models::{DecodedImage, Request};
use thiserror::Error;

/// Errors produced by decode functions
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("No embedded image in {0}")]
    NoEmbeddedImage(String),

    #[error("Decoder produced no image")]
    Empty,

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Decoder panicked: {0}")]
    Panicked(String),
}

/// A blocking decode function.
///
/// Implementations are called from a worker thread while the caller holds the
/// process-wide decode arbiter, so they never run concurrently with another
/// decode. `progress` accepts fractions in `0.0..=1.0`; calling it is optional.
pub trait Decoder: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str {
        "custom"
    }

    fn decode(
        &self,
        request: &Request,
        progress: &mut dyn FnMut(f32),
    ) -> Result<DecodedImage, DecodeError>;
}

impl<F> Decoder for F
where
    F: Fn(&Request) -> Result<DecodedImage, DecodeError> + Send + Sync,
{
    fn decode(
        &self,
        request: &Request,
        _progress: &mut dyn FnMut(f32),
    ) -> Result<DecodedImage, DecodeError> {
        self(request)
    }
}

/// Compute the size of `(width, height)` scaled down to fit a `max` x `max` box.
///
/// Images that already fit are left alone; the result is never smaller than 1x1.
pub(crate) fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = max as f64 / width.max(height) as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_within_keeps_small_images() {
        assert_eq!(fit_within(100, 50, 128), (100, 50));
    }

    #[test]
    fn test_fit_within_preserves_aspect_ratio() {
        assert_eq!(fit_within(1000, 500, 100), (100, 50));
        assert_eq!(fit_within(300, 900, 90), (30, 90));
    }

    #[test]
    fn test_fit_within_never_collapses_to_zero() {
        assert_eq!(fit_within(10_000, 1, 10), (10, 1));
    }
}
