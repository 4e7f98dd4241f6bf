//! Movie header inspection.
//!
//! The batch runner only needs the frame count of each movie to decide
//! whether it is long enough to analyse. `.dax` movies are headerless raw
//! 16-bit frames; their geometry lives in a sibling `.inf` text file:
//!
//! ```text
//! frame dimensions = 256 x 256
//! number of frames = 1000
//!  little endian
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static DIMENSIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"frame dimensions\s*=\s*(\d+)\s*x\s*(\d+)").expect("static regex is valid")
});
static FRAMES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"number of frames\s*=\s*(\d+)").expect("static regex is valid"));
static ENDIAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(big|little) endian").expect("static regex is valid"));

/// Bytes per pixel of a `.dax` frame.
const DAX_BYTES_PER_PIXEL: u64 = 2;

/// Geometry of a movie as reported by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieInfo {
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    pub big_endian: bool,
}

/// Errors from reading a movie header.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Header file {path} is missing")]
    MissingHeader { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed header {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Reads the length of an input movie.
pub trait MovieInspector {
    fn inspect(&self, path: &Path) -> Result<MovieInfo, InspectError>;
}

/// Inspector for `.dax` movies with a sibling `.inf` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaxInspector;

impl DaxInspector {
    /// Path of the `.inf` header belonging to `movie`.
    pub fn header_path(movie: &Path) -> PathBuf {
        movie.with_extension("inf")
    }
}

impl MovieInspector for DaxInspector {
    fn inspect(&self, path: &Path) -> Result<MovieInfo, InspectError> {
        let header = Self::header_path(path);
        let text = std::fs::read_to_string(&header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                InspectError::MissingHeader {
                    path: header.clone(),
                }
            } else {
                InspectError::Io {
                    path: header.clone(),
                    source: e,
                }
            }
        })?;

        let malformed = |reason: &str| InspectError::Malformed {
            path: header.clone(),
            reason: reason.to_string(),
        };

        let dims = DIMENSIONS_RE
            .captures(&text)
            .ok_or_else(|| malformed("no frame dimensions"))?;
        let width: u32 = dims[1]
            .parse()
            .map_err(|_| malformed("frame width out of range"))?;
        let height: u32 = dims[2]
            .parse()
            .map_err(|_| malformed("frame height out of range"))?;
        if width == 0 || height == 0 {
            return Err(malformed("zero frame dimension"));
        }

        let big_endian = ENDIAN_RE
            .captures(&text)
            .is_some_and(|c| &c[1] == "big");

        let frames = match FRAMES_RE.captures(&text) {
            Some(c) => c[1]
                .parse()
                .map_err(|_| malformed("frame count out of range"))?,
            None => {
                // No explicit count: derive it from the size of the raw data.
                let len = std::fs::metadata(path)
                    .map_err(|e| InspectError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    })?
                    .len();
                let frame_bytes = DAX_BYTES_PER_PIXEL
                    .checked_mul(u64::from(width))
                    .and_then(|n| n.checked_mul(u64::from(height)))
                    .ok_or_else(|| malformed("frame size out of range"))?;
                len / frame_bytes
            }
        };

        Ok(MovieInfo {
            width,
            height,
            frames,
            big_endian,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn movie(dir: &Path, name: &str, inf: Option<&str>, data_len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; data_len]).unwrap();
        if let Some(inf) = inf {
            std::fs::write(DaxInspector::header_path(&path), inf).unwrap();
        }
        path
    }

    #[test]
    fn reads_explicit_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = movie(
            dir.path(),
            "a.dax",
            Some("binning = 1 x 1\nframe dimensions = 256 x 128\nnumber of frames = 500\n little endian\n"),
            0,
        );

        let info = DaxInspector.inspect(&path).unwrap();
        assert_eq!(
            info,
            MovieInfo {
                width: 256,
                height: 128,
                frames: 500,
                big_endian: false,
            }
        );
    }

    #[test]
    fn derives_frame_count_from_data_size() {
        let dir = tempfile::tempdir().unwrap();
        // 4 x 2 pixels, 2 bytes each, 3 frames
        let path = movie(
            dir.path(),
            "b.dax",
            Some("frame dimensions = 4 x 2\n big endian\n"),
            4 * 2 * 2 * 3,
        );

        let info = DaxInspector.inspect(&path).unwrap();
        assert_eq!(info.frames, 3);
        assert!(info.big_endian);
    }

    #[test]
    fn missing_header_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = movie(dir.path(), "c.dax", None, 16);

        let err = DaxInspector.inspect(&path).unwrap_err();
        assert!(matches!(err, InspectError::MissingHeader { .. }));
    }

    #[test]
    fn header_without_dimensions_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = movie(dir.path(), "d.dax", Some("number of frames = 10\n"), 0);

        let err = DaxInspector.inspect(&path).unwrap_err();
        assert!(matches!(err, InspectError::Malformed { .. }));
        assert!(err.to_string().contains("frame dimensions"));
    }

    #[test]
    fn zero_dimension_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = movie(dir.path(), "e.dax", Some("frame dimensions = 0 x 10\n"), 0);

        assert!(DaxInspector.inspect(&path).is_err());
    }

    #[test]
    fn huge_dimensions_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = movie(
            dir.path(),
            "f.dax",
            Some("frame dimensions = 4294967295 x 4294967295
"),
            16,
        );

        let err = DaxInspector.inspect(&path).unwrap_err();
        assert!(matches!(err, InspectError::Malformed { .. }));
        assert!(err.to_string().contains("frame size out of range"));
    }
}
