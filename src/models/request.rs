use crate::services::Decoder;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Identifier of one decode attempt, unique and increasing per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical reference to an image source.
///
/// Either a plain filesystem path or a URI such as `file:///photos/a.jpg`.
/// Turning it into a decode-ready local path is the job of a
/// [`SourceResolver`](crate::services::SourceResolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reference as an absolute URI, or `None` for a plain path
    pub fn url(&self) -> Option<Url> {
        let url = Url::parse(&self.0).ok()?;
        // `C:/photos/a.png` parses with scheme `c`; a drive letter is a path
        (url.scheme().len() > 1).then_some(url)
    }

    /// URI scheme, lowercased, if the reference carries one (`file`, `sftp`, ...)
    pub fn scheme(&self) -> Option<String> {
        self.url().map(|url| url.scheme().to_string())
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Utf8Path> for SourceRef {
    fn from(value: &Utf8Path) -> Self {
        Self::new(value.as_str())
    }
}

impl From<Utf8PathBuf> for SourceRef {
    fn from(value: Utf8PathBuf) -> Self {
        Self(value.into_string())
    }
}

/// Options passed through to the decode function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Scale the decoded image to fit a `max_size` x `max_size` box
    #[serde(default)]
    pub max_size: Option<u32>,
}

/// Immutable snapshot of one decode attempt.
///
/// Built by the engine once the source has been resolved, then moved to the
/// worker thread. Nothing mutates it after creation.
#[derive(Clone)]
pub struct Request {
    pub id: RequestId,
    pub source: SourceRef,
    /// Local, decode-ready path produced by source resolution
    pub path: Utf8PathBuf,
    /// File size reported by source resolution
    pub size: u64,
    pub options: DecodeOptions,
    pub as_animation: bool,
    pub decoder: Arc<dyn Decoder>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("options", &self.options)
            .field("as_animation", &self.as_animation)
            .field("decoder", &self.decoder.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_detection() {
        assert_eq!(SourceRef::from("file:///tmp/a.png").scheme().as_deref(), Some("file"));
        assert_eq!(SourceRef::from("SFTP://host/a.png").scheme().as_deref(), Some("sftp"));
        assert_eq!(SourceRef::from("/tmp/a.png").scheme(), None);
        assert_eq!(SourceRef::from("photos/a.png").scheme(), None);
        assert_eq!(SourceRef::from("weird name://x").scheme(), None);
    }

    #[test]
    fn test_drive_letter_is_a_path() {
        assert!(SourceRef::from("C:/photos/a.png").url().is_none());
        assert!(SourceRef::from(r"D:\photos\a.png").url().is_none());
        assert!(SourceRef::from("file:///C:/photos/a.png").url().is_some());
    }

    #[test]
    fn test_request_id_ordering() {
        assert!(RequestId(1) < RequestId(2));
        assert_eq!(RequestId(7).to_string(), "#7");
    }
}
