use super::still::scale_to_fit;
use super::{DecodeError, Decoder};
use crate::models::{DecodedImage, Request};
use camino::Utf8Path;
use std::sync::Arc;

/// Reader for artwork embedded in media containers (cover art in audio
/// files, poster frames in video files).
///
/// Tag parsing is an external concern; implementations return the raw bytes
/// of the embedded picture, or `None` when the container has none.
#[cfg_attr(test, mockall::automock)]
pub trait EmbeddedArtwork: Send + Sync {
    fn artwork(&self, path: &Utf8Path) -> Result<Option<Vec<u8>>, DecodeError>;
}

/// Decoder for media files, driven by their embedded tags
#[derive(Clone)]
pub struct MediaTagDecoder {
    tags: Arc<dyn EmbeddedArtwork>,
}

impl MediaTagDecoder {
    pub fn new(tags: Arc<dyn EmbeddedArtwork>) -> Self {
        Self { tags }
    }
}

impl Decoder for MediaTagDecoder {
    fn name(&self) -> &str {
        "media-tag"
    }

    fn decode(
        &self,
        request: &Request,
        progress: &mut dyn FnMut(f32),
    ) -> Result<DecodedImage, DecodeError> {
        progress(0.0);

        let bytes = self
            .tags
            .artwork(&request.path)?
            .ok_or_else(|| DecodeError::NoEmbeddedImage(request.path.to_string()))?;
        progress(0.5);

        let decoded = image::load_from_memory(&bytes)?.into_rgba8();
        let original_size = decoded.dimensions();
        let pixels = scale_to_fit(decoded, request.options.max_size);
        progress(1.0);

        tracing::debug!(
            "Decoded {} bytes of embedded artwork from {}",
            bytes.len(),
            request.path
        );

        Ok(DecodedImage::from_scaled(pixels, original_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecodeOptions, RequestId, SourceRef};
    use camino::Utf8PathBuf;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn request(decoder: Arc<dyn Decoder>) -> Request {
        Request {
            id: RequestId(1),
            source: SourceRef::from("/music/track.flac"),
            path: Utf8PathBuf::from("/music/track.flac"),
            size: 0,
            options: DecodeOptions::default(),
            as_animation: false,
            decoder,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(6, 3, Rgba([0, 0, 255, 255]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decodes_embedded_artwork() {
        let mut tags = MockEmbeddedArtwork::new();
        tags.expect_artwork()
            .withf(|path| path.as_str() == "/music/track.flac")
            .times(1)
            .returning(|_| Ok(Some(png_bytes())));

        let decoder = Arc::new(MediaTagDecoder::new(Arc::new(tags)));
        let mut fractions = Vec::new();
        let image = decoder
            .decode(&request(decoder.clone()), &mut |f| fractions.push(f))
            .unwrap();

        assert_eq!(image.dimensions(), Some((6, 3)));
        assert_eq!(fractions.last().copied(), Some(1.0));
    }

    #[test]
    fn test_scaled_artwork_keeps_original_size() {
        let mut tags = MockEmbeddedArtwork::new();
        tags.expect_artwork().returning(|_| Ok(Some(png_bytes())));

        let decoder = Arc::new(MediaTagDecoder::new(Arc::new(tags)));
        let mut request = request(decoder.clone());
        request.options.max_size = Some(2);
        let image = decoder.decode(&request, &mut |_| {}).unwrap();

        assert_eq!(image.dimensions(), Some((2, 1)));
        assert_eq!(image.original_size(), Some((6, 3)));
    }

    #[test]
    fn test_missing_artwork_is_reported() {
        let mut tags = MockEmbeddedArtwork::new();
        tags.expect_artwork().returning(|_| Ok(None));

        let decoder = Arc::new(MediaTagDecoder::new(Arc::new(tags)));
        let result = decoder.decode(&request(decoder.clone()), &mut |_| {});
        assert!(matches!(result, Err(DecodeError::NoEmbeddedImage(_))));
    }

    #[test]
    fn test_corrupt_artwork_is_image_error() {
        let mut tags = MockEmbeddedArtwork::new();
        tags.expect_artwork().returning(|_| Ok(Some(vec![0, 1, 2, 3])));

        let decoder = Arc::new(MediaTagDecoder::new(Arc::new(tags)));
        let result = decoder.decode(&request(decoder.clone()), &mut |_| {});
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }
}
