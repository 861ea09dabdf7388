//! Resource locations and source positions
//!
//! This module handles resolution of resource locations (URLs, file paths,
//! in-memory text) for documents and external entities, and the positions
//! reported with errors.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use url::Url;

use crate::error::Result;

/// Resource location - can be a URL, file path, or string identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// File system path
    Path(PathBuf),
    /// URL (http, https, ftp, etc.)
    Url(Url),
    /// String identifier (for in-memory resources)
    String(String),
}

impl Location {
    /// Create a location from a string (auto-detect type)
    pub fn from_str(s: &str) -> Result<Self> {
        if let Ok(url) = Url::parse(s) {
            if url.scheme() == "file" {
                if let Ok(path) = url.to_file_path() {
                    return Ok(Location::Path(path));
                }
            } else if url.scheme().len() > 1 {
                // single letter schemes are Windows drive letters
                return Ok(Location::Url(url));
            }
        }

        let path = PathBuf::from(s);
        if path.exists() || s.starts_with('/') || s.starts_with('.') {
            return Ok(Location::Path(path));
        }

        Ok(Location::String(s.to_string()))
    }

    /// Resolve a system identifier relative to this location.
    ///
    /// Absolute URLs stay as they are; anything else is taken relative to the
    /// directory of a path location, or the URL of a URL location.
    pub fn join(&self, system_id: &str) -> Result<Location> {
        if let Ok(url) = Url::parse(system_id) {
            if url.scheme().len() > 1 {
                return Location::from_str(system_id);
            }
        }

        match self {
            Location::Path(base) => {
                let candidate = Path::new(system_id);
                if candidate.is_absolute() {
                    return Ok(Location::Path(candidate.to_path_buf()));
                }
                let dir = if base.is_dir() {
                    base.as_path()
                } else {
                    base.parent().unwrap_or_else(|| Path::new(""))
                };
                Ok(Location::Path(dir.join(candidate)))
            }
            Location::Url(base) => Ok(Location::Url(base.join(system_id)?)),
            Location::String(_) => Ok(Location::Path(PathBuf::from(system_id))),
        }
    }

    /// Get the location as a string
    pub fn as_str(&self) -> String {
        match self {
            Location::Path(p) => p.to_string_lossy().to_string(),
            Location::Url(u) => u.to_string(),
            Location::String(s) => s.clone(),
        }
    }

    /// Check if this is a remote location (URL)
    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Url(_))
    }

    /// Check if this is a local file
    pub fn is_file(&self) -> bool {
        matches!(self, Location::Path(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Position of an event in the source text.
///
/// Lines and columns are 1-based, the byte offset is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    /// Line number
    pub line: usize,
    /// Column (in characters) on the line
    pub column: usize,
    /// Byte offset from the start of the text
    pub byte_offset: usize,
}

impl Position {
    /// Create a position from its parts
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }

    /// Compute the position of `offset` within `text`.
    ///
    /// Offsets past the end of the text are clamped to the end.
    pub fn from_offset(text: &str, offset: usize) -> Self {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }

        let before = &text[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;

        Self::new(line, column, offset)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(1, 1, 0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}
