//! Resource loading utilities
//!
//! This module handles loading of documents, external DTD subsets and
//! external parameter entities from various sources.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::locations::Location;

/// Resource loader for documents and external entities
#[derive(Debug, Clone)]
pub struct Loader {
    /// Resource limits
    limits: Limits,
    /// Whether to allow remote resources
    allow_remote: bool,
    /// Directory used to resolve relative system ids of in-memory documents
    base: Option<PathBuf>,
    /// URL prefixes served from local directories
    url_mappings: Vec<(String, PathBuf)>,
}

impl Loader {
    /// Create a new loader with default settings
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
            allow_remote: false,
            base: None,
            url_mappings: Vec::new(),
        }
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set whether to allow remote resources
    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    /// Set the directory relative system ids are resolved against when
    /// the referencing resource has no location of its own.
    pub fn with_base(mut self, base: impl AsRef<Path>) -> Self {
        self.base = Some(base.as_ref().to_path_buf());
        self
    }

    /// Serve system ids starting with `prefix` from the local directory `dir`.
    ///
    /// `http://example.com/dtd/book.dtd` with the mapping
    /// (`http://example.com/dtd/`, `/usr/share/dtd`) loads
    /// `/usr/share/dtd/book.dtd`.
    pub fn with_url_mapping(mut self, prefix: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        self.url_mappings
            .push((prefix.into(), dir.as_ref().to_path_buf()));
        self
    }

    /// Get the limits
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Resolve a system id, relative to `referrer` when one is given.
    pub fn resolve(&self, system_id: &str, referrer: Option<&Location>) -> Result<Location> {
        for (prefix, dir) in &self.url_mappings {
            if let Some(rest) = system_id.strip_prefix(prefix.as_str()) {
                let rest = rest.trim_start_matches('/');
                return Ok(Location::Path(dir.join(rest)));
            }
        }

        match referrer {
            Some(location @ (Location::Path(_) | Location::Url(_))) => location.join(system_id),
            // in-memory documents resolve against the base directory
            _ => match Location::from_str(system_id)? {
                Location::Url(url) => Ok(Location::Url(url)),
                _ => {
                    let path = Path::new(system_id);
                    match &self.base {
                        Some(dir) if path.is_relative() => Ok(Location::Path(dir.join(path))),
                        _ => Ok(Location::Path(path.to_path_buf())),
                    }
                }
            },
        }
    }

    /// Resolve and load an external entity
    pub fn load_entity(
        &self,
        system_id: &str,
        referrer: Option<&Location>,
    ) -> Result<(Location, String)> {
        let location = self.resolve(system_id, referrer)?;
        debug!(system_id, location = %location, "loading external entity");
        let content = self.load(&location)?;
        Ok((location, content))
    }

    /// Load a resource as a string
    pub fn load(&self, location: &Location) -> Result<String> {
        match location {
            Location::Path(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    Error::Resource(format!("Failed to read file '{}': {}", path.display(), e))
                })?;

                self.limits.check_document_size(content.len())?;

                Ok(content)
            }
            Location::Url(url) => {
                if !self.allow_remote {
                    return Err(Error::Resource(format!(
                        "Remote resources are not allowed: {}",
                        url
                    )));
                }

                Err(Error::Resource(format!(
                    "Remote loading is not supported, map the URL to a local directory: {}",
                    url
                )))
            }
            Location::String(s) => {
                self.limits.check_document_size(s.len())?;
                Ok(s.clone())
            }
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
