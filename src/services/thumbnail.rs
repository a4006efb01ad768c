use super::{DecodeError, Decoder, StillImageDecoder};
use crate::models::{DecodeOptions, DecodedImage, Request, ThumbnailConfig};
use camino::{Utf8Path, Utf8PathBuf};
use image::{ImageFormat, RgbaImage};
use std::fs;
use std::time::UNIX_EPOCH;

/// Hex digits of the hash used in entry names
const KEY_LEN: usize = 32;

/// Decoder that serves thumbnails from an on-disk cache.
///
/// Cache entries are PNG files named after a BLAKE3 hash of the source path,
/// its size and modification time, and the thumbnail size. Editing the source
/// therefore invalidates its entry. On a miss the source is decoded at
/// thumbnail size and the entry is written; a failed write only costs the
/// next lookup.
#[derive(Debug, Clone)]
pub struct ThumbnailCacheDecoder {
    cache_dir: Utf8PathBuf,
    size: u32,
    still: StillImageDecoder,
}

impl ThumbnailCacheDecoder {
    pub fn new(cache_dir: impl Into<Utf8PathBuf>, size: u32) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            size: size.max(1),
            still: StillImageDecoder::new(),
        }
    }

    pub fn from_config(config: &ThumbnailConfig) -> Self {
        Self::new(config.cache_dir.as_str(), config.size)
    }

    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Location of the cache entry for `source`
    pub fn cache_path(&self, source: &Utf8Path) -> Result<Utf8PathBuf, DecodeError> {
        let metadata = fs::metadata(source)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(source.as_str().len() as u64).to_le_bytes());
        hasher.update(source.as_str().as_bytes());
        hasher.update(&metadata.len().to_le_bytes());
        hasher.update(&modified.as_secs().to_le_bytes());
        hasher.update(&modified.subsec_nanos().to_le_bytes());
        hasher.update(&self.size.to_le_bytes());
        let key = hasher.finalize().to_hex();

        Ok(self.cache_dir.join(format!("{}.png", &key.as_str()[..KEY_LEN])))
    }

    fn store(&self, cache_path: &Utf8Path, pixels: &RgbaImage) -> Result<(), DecodeError> {
        fs::create_dir_all(&self.cache_dir)?;

        // Write beside the entry and rename, so readers never see a partial file
        let partial = cache_path.with_extension("png.partial");
        pixels.save_with_format(&partial, ImageFormat::Png)?;
        fs::rename(&partial, cache_path)?;
        Ok(())
    }
}

impl Decoder for ThumbnailCacheDecoder {
    fn name(&self) -> &str {
        "thumbnail-cache"
    }

    fn decode(
        &self,
        request: &Request,
        progress: &mut dyn FnMut(f32),
    ) -> Result<DecodedImage, DecodeError> {
        progress(0.0);
        let cache_path = self.cache_path(&request.path)?;

        if cache_path.exists() {
            match image::open(&cache_path) {
                Ok(cached) => {
                    tracing::debug!("Thumbnail cache hit for {}: {}", request.path, cache_path);
                    let cached = cached.into_rgba8();
                    // Header only; the source is not decoded on a hit
                    let original_size = image::image_dimensions(&request.path).unwrap_or_else(|e| {
                        tracing::debug!("Cannot read size of {}: {}", request.path, e);
                        cached.dimensions()
                    });
                    progress(1.0);
                    return Ok(DecodedImage::from_scaled(cached, original_size));
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable thumbnail {}: {}", cache_path, e);
                }
            }
        }

        let options = DecodeOptions {
            max_size: Some(self.size),
        };
        let image = self.still.decode_path(&request.path, &options, false, progress)?;

        if let Some(frame) = image.static_image() {
            match self.store(&cache_path, &frame.pixels) {
                Ok(()) => tracing::debug!("Stored thumbnail for {} at {}", request.path, cache_path),
                Err(e) => tracing::warn!("Failed to store thumbnail for {}: {}", request.path, e),
            }
        }

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    fn write_png(dir: &Utf8Path, name: &str, w: u32, h: u32) -> Utf8PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[test]
    fn test_cache_path_depends_on_thumbnail_size() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let source = write_png(&dir, "a.png", 4, 4);

        let small = ThumbnailCacheDecoder::new(dir.join("cache"), 64);
        let large = ThumbnailCacheDecoder::new(dir.join("cache"), 256);

        let small_path = small.cache_path(&source).unwrap();
        assert_ne!(small_path, large.cache_path(&source).unwrap());
        assert_eq!(small_path, small.cache_path(&source).unwrap());
        assert!(small_path.starts_with(dir.join("cache")));
    }

    #[test]
    fn test_cache_key_is_fixed_width_hex() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let source = write_png(&dir, "a.png", 4, 4);

        let path = ThumbnailCacheDecoder::new(dir.join("cache"), 64).cache_path(&source).unwrap();
        let stem = path.file_stem().unwrap();
        assert_eq!(stem.len(), KEY_LEN);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(path.extension(), Some("png"));
    }

    #[test]
    fn test_cache_path_changes_when_source_changes() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let source = write_png(&dir, "a.png", 4, 4);
        let decoder = ThumbnailCacheDecoder::new(dir.join("cache"), 64);

        let before = decoder.cache_path(&source).unwrap();
        write_png(&dir, "a.png", 40, 40);
        assert_ne!(before, decoder.cache_path(&source).unwrap());
    }

    #[test]
    fn test_cache_path_of_missing_source_fails() {
        let decoder = ThumbnailCacheDecoder::new("cache", 64);
        assert!(decoder.cache_path(Utf8Path::new("/no/such/file.png")).is_err());
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(ThumbnailCacheDecoder::new("cache", 0).size(), 1);
    }
}
