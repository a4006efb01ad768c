use crate::models::SourceRef;
use camino::Utf8PathBuf;
use std::fs;
use std::io;
use thiserror::Error;

/// A source that is ready to be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub path: Utf8PathBuf,
    pub size: u64,
}

/// Errors from the resolution hop that precedes a decode
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Unsupported URI scheme '{scheme}' in {uri}")]
    UnsupportedScheme { scheme: String, uri: String },

    #[error("Malformed URI: {0}")]
    InvalidUri(String),

    #[error("Failed to stat {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Turns a logical file reference into a local, decode-ready path.
///
/// Remote references would first be copied locally by an implementation of
/// this trait; the engine only needs the resulting path.
#[cfg_attr(test, mockall::automock)]
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, source: &SourceRef) -> Result<ResolvedSource, ResolveError>;
}

/// Resolver for plain paths and `file://` URIs
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResolver;

impl LocalResolver {
    pub fn new() -> Self {
        Self
    }

    fn local_path(source: &SourceRef) -> Result<Utf8PathBuf, ResolveError> {
        let Some(url) = source.url() else {
            return Ok(Utf8PathBuf::from(source.as_str()));
        };

        if url.scheme() != "file" {
            return Err(ResolveError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                uri: source.to_string(),
            });
        }

        // Rejects remote hosts and, on Windows, URIs without a drive or share
        let path = url
            .to_file_path()
            .map_err(|()| ResolveError::InvalidUri(source.to_string()))?;
        Utf8PathBuf::from_path_buf(path).map_err(|_| ResolveError::InvalidUri(source.to_string()))
    }
}

impl SourceResolver for LocalResolver {
    fn resolve(&self, source: &SourceRef) -> Result<ResolvedSource, ResolveError> {
        let path = Self::local_path(source)?;

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::NotFound(path.into_string()));
            }
            Err(e) => {
                return Err(ResolveError::Io {
                    path: path.into_string(),
                    source: e,
                });
            }
        };

        if !metadata.is_file() {
            return Err(ResolveError::NotAFile(path.into_string()));
        }

        tracing::trace!("Resolved {} to {} ({} bytes)", source, path, metadata.len());

        Ok(ResolvedSource {
            path,
            size: metadata.len(),
        })
    }
}
