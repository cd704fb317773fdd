//! Decode sources: a file path or a stream device.

use std::fmt;
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::Arc;

use symphonia::core::io::MediaSource;

type OpenFn = dyn Fn() -> io::Result<Box<dyn MediaSource>> + Send + Sync;

/// Handle to a readable stream used as a decode source.
///
/// The handle opens a fresh reader for every decode run, so a session can be
/// restarted on the same device. Two handles are equal when they are clones
/// of the same handle.
#[derive(Clone)]
pub struct StreamHandle {
    name: String,
    open: Arc<OpenFn>,
}

impl StreamHandle {
    pub fn new<F>(name: impl Into<String>, open: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn MediaSource>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            open: Arc::new(open),
        }
    }

    /// In-memory stream over `bytes`.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self::new(name, move || {
            Ok(Box::new(Cursor::new(bytes.clone())) as Box<dyn MediaSource>)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a new reader positioned at the start of the stream.
    pub fn open(&self) -> io::Result<Box<dyn MediaSource>> {
        (self.open)()
    }
}

impl PartialEq for StreamHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.open, &other.open)
    }
}

impl Eq for StreamHandle {}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// What a decode session reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeSource {
    File(PathBuf),
    Device(StreamHandle),
}

impl DecodeSource {
    /// Human-readable label for logs and status snapshots.
    pub fn describe(&self) -> String {
        match self {
            DecodeSource::File(path) => path.display().to_string(),
            DecodeSource::Device(handle) => format!("stream:{}", handle.name()),
        }
    }

    /// File extension used as a container hint, when there is one.
    pub fn extension_hint(&self) -> Option<String> {
        let name = match self {
            DecodeSource::File(path) => path.to_str()?,
            DecodeSource::Device(handle) => handle.name(),
        };
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() || ext.contains('/') {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}
