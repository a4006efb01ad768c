use super::{fit_within, DecodeError, Decoder};
use crate::models::{Animation, DecodeOptions, DecodedImage, Frame, Request};
use camino::Utf8Path;
use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, ImageFormat, ImageReader, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoder for ordinary image files.
///
/// Uses the `image` crate with format sniffing, so file extensions do not have
/// to match the content. When the request asks for an animation and the file
/// is a GIF, every frame is decoded; otherwise only the still image is.
#[derive(Debug, Clone, Copy, Default)]
pub struct StillImageDecoder;

impl StillImageDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a local file. Shared with decoders that wrap this one.
    pub fn decode_path(
        &self,
        path: &Utf8Path,
        options: &DecodeOptions,
        as_animation: bool,
        progress: &mut dyn FnMut(f32),
    ) -> Result<DecodedImage, DecodeError> {
        let start = Instant::now();
        progress(0.0);

        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format();

        if as_animation && format == Some(ImageFormat::Gif) {
            let image = decode_gif_animation(path, options)?;
            progress(1.0);
            tracing::debug!(
                "Decoded {} frame(s) from {} in {:?}",
                image.frame_count(),
                path,
                start.elapsed()
            );
            return Ok(image);
        }

        let decoded = reader.decode()?.into_rgba8();
        let original_size = decoded.dimensions();
        progress(0.8);

        let pixels = scale_to_fit(decoded, options.max_size);
        progress(1.0);

        tracing::debug!(
            "Decoded {} ({:?}, {}x{} from {}x{}) in {:?}",
            path,
            format,
            pixels.width(),
            pixels.height(),
            original_size.0,
            original_size.1,
            start.elapsed()
        );

        Ok(DecodedImage::from_scaled(pixels, original_size))
    }
}

impl Decoder for StillImageDecoder {
    fn name(&self) -> &str {
        "still-image"
    }

    fn decode(
        &self,
        request: &Request,
        progress: &mut dyn FnMut(f32),
    ) -> Result<DecodedImage, DecodeError> {
        self.decode_path(&request.path, &request.options, request.as_animation, progress)
    }
}

fn decode_gif_animation(path: &Utf8Path, options: &DecodeOptions) -> Result<DecodedImage, DecodeError> {
    let reader = BufReader::new(File::open(path)?);
    let decoder = GifDecoder::new(reader)?;
    let frames = decoder.into_frames().collect_frames()?;

    let frames: Vec<Frame> = frames
        .into_iter()
        .map(|frame| {
            let delay = Duration::from(frame.delay());
            let buffer = frame.into_buffer();
            let original_size = buffer.dimensions();
            Frame {
                pixels: scale_to_fit(buffer, options.max_size),
                delay,
                original_size,
            }
        })
        .collect();

    if frames.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedImage::Animation(Arc::new(Animation {
        frames,
        loop_count: 0,
    })))
}

pub(crate) fn scale_to_fit(pixels: RgbaImage, max_size: Option<u32>) -> RgbaImage {
    let Some(max) = max_size else {
        return pixels;
    };
    let (width, height) = fit_within(pixels.width(), pixels.height(), max);
    if (width, height) == pixels.dimensions() {
        return pixels;
    }
    image::imageops::resize(&pixels, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_scale_to_fit_without_limit_is_identity() {
        let pixels = RgbaImage::from_pixel(40, 20, Rgba([1, 2, 3, 255]));
        assert_eq!(scale_to_fit(pixels, None).dimensions(), (40, 20));
    }

    #[test]
    fn test_scale_to_fit_shrinks_long_edge() {
        let pixels = RgbaImage::from_pixel(40, 20, Rgba([1, 2, 3, 255]));
        assert_eq!(scale_to_fit(pixels, Some(10)).dimensions(), (10, 5));
    }

    #[test]
    fn test_decode_missing_file_is_io_error() {
        let mut ignore = |_: f32| {};
        let result = StillImageDecoder::new().decode_path(
            Utf8Path::new("/definitely/not/here.png"),
            &DecodeOptions::default(),
            false,
            &mut ignore,
        );
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }
}
