use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;

/// One decoded frame in RGBA8
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: RgbaImage,
    /// How long the frame stays on screen; zero for still images
    pub delay: Duration,
    /// Size of the source image before any scaling to `max_size`
    pub original_size: (u32, u32),
}

impl Frame {
    pub fn still(pixels: RgbaImage) -> Self {
        let original_size = pixels.dimensions();
        Self {
            pixels,
            delay: Duration::ZERO,
            original_size,
        }
    }

    /// A still frame scaled down from an image of `original_size`
    pub fn scaled(pixels: RgbaImage, original_size: (u32, u32)) -> Self {
        Self {
            pixels,
            delay: Duration::ZERO,
            original_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// A decoded animation
#[derive(Debug, Clone)]
pub struct Animation {
    pub frames: Vec<Frame>,
    /// Number of times to play; 0 means forever
    pub loop_count: u32,
}

/// Result payload of a successful decode.
///
/// Both variants are reference-counted so that a published result can be
/// handed to the owner, copied to another engine, or kept by a viewer
/// without duplicating pixel data.
#[derive(Debug, Clone)]
pub enum DecodedImage {
    Still(Arc<Frame>),
    Animation(Arc<Animation>),
}

impl DecodedImage {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        DecodedImage::Still(Arc::new(Frame::still(pixels)))
    }

    pub fn from_scaled(pixels: RgbaImage, original_size: (u32, u32)) -> Self {
        DecodedImage::Still(Arc::new(Frame::scaled(pixels, original_size)))
    }

    /// The image to show when animations are not wanted: the still frame, or
    /// the first frame of an animation.
    pub fn static_image(&self) -> Option<&Frame> {
        match self {
            DecodedImage::Still(frame) => Some(frame),
            DecodedImage::Animation(animation) => animation.frames.first(),
        }
    }

    pub fn animation(&self) -> Option<&Animation> {
        match self {
            DecodedImage::Still(_) => None,
            DecodedImage::Animation(animation) => Some(animation),
        }
    }

    pub fn is_animation(&self) -> bool {
        matches!(self, DecodedImage::Animation(_))
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.static_image().map(|f| (f.width(), f.height()))
    }

    /// Dimensions of the source before scaling; equal to
    /// [`dimensions`](Self::dimensions) for unscaled loads
    pub fn original_size(&self) -> Option<(u32, u32)> {
        self.static_image().map(|f| f.original_size)
    }

    pub fn frame_count(&self) -> usize {
        match self {
            DecodedImage::Still(_) => 1,
            DecodedImage::Animation(animation) => animation.frames.len(),
        }
    }

    /// Apply the request's `as_animation` flag.
    ///
    /// Animations collapse to their first frame when the caller asked for a
    /// still image; single-frame animations collapse to a still image either
    /// way. Returns `None` for an animation without frames.
    pub fn normalize(self, as_animation: bool) -> Option<Self> {
        match self {
            DecodedImage::Still(_) => Some(self),
            DecodedImage::Animation(animation) => {
                if as_animation && animation.frames.len() > 1 {
                    return Some(DecodedImage::Animation(animation));
                }
                let first = match Arc::try_unwrap(animation) {
                    Ok(owned) => owned.frames.into_iter().next(),
                    Err(shared) => shared.frames.first().cloned(),
                }?;
                Some(DecodedImage::Still(Arc::new(Frame {
                    delay: Duration::ZERO,
                    ..first
                })))
            }
        }
    }
}
