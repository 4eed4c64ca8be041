use std::fmt;
use std::path::PathBuf;

/// A convenient result type wrapping [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct CorruptCacheError {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for CorruptCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Terrain cache '{}' is not usable: {}",
            self.path.display(),
            self.reason
        )
    }
}

impl std::error::Error for CorruptCacheError {}

#[derive(Debug)]
pub enum Error {
    /// No height source was assigned before requesting generation.
    MissingHeightSource,
    /// A generation request arrived while another one was in flight.
    GenerationInProgress,
    /// A persisted terrain cache failed validation; prior state is untouched.
    CorruptCache(CorruptCacheError),
    IoError(std::io::Error),
    ImageError(image::ImageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingHeightSource => {
                write!(f, "No height source assigned, cannot generate terrain!")
            }
            Error::GenerationInProgress => {
                write!(f, "Terrain generation is already running!")
            }
            Error::CorruptCache(err) => err.fmt(f),
            Error::IoError(err) => err.fmt(f),
            Error::ImageError(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::CorruptCache(err) => Some(err),
            Error::IoError(err) => Some(err),
            Error::ImageError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::IoError(value)
    }
}

impl From<image::ImageError> for Error {
    fn from(value: image::ImageError) -> Self {
        Error::ImageError(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            value.to_string(),
        ))
    }
}
