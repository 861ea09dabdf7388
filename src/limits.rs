//! Limits and constraints for document processing
//!
//! This module defines various limits to prevent resource exhaustion
//! (deeply nested documents, runaway entity nesting, oversized inputs).

use crate::error::{Error, Result};

/// Global limits configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum element nesting depth
    pub max_depth: usize,

    /// Maximum document or entity size in bytes
    pub max_document_size: usize,

    /// Maximum nesting of external entities (sub-parsers)
    pub max_entity_depth: usize,

    /// Maximum bytes produced by general entity expansion in one document
    pub max_entity_expansion_size: usize,

    /// Maximum number of attributes per element
    pub max_attributes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 1000,
            max_document_size: 100 * 1024 * 1024, // 100 MB
            max_entity_depth: 16,
            max_entity_expansion_size: 10 * 1024 * 1024, // 10 MB
            max_attributes: 1000,
        }
    }
}

impl Limits {
    /// Create a new Limits with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create strict limits (more restrictive)
    pub fn strict() -> Self {
        Self {
            max_depth: 100,
            max_document_size: 10 * 1024 * 1024, // 10 MB
            max_entity_depth: 4,
            max_entity_expansion_size: 1024 * 1024, // 1 MB
            max_attributes: 100,
        }
    }

    /// Create permissive limits (less restrictive, use with caution)
    pub fn permissive() -> Self {
        Self {
            max_depth: 10000,
            max_document_size: 1024 * 1024 * 1024, // 1 GB
            max_entity_depth: 64,
            max_entity_expansion_size: 100 * 1024 * 1024, // 100 MB
            max_attributes: 10000,
        }
    }

    /// Check if element depth is within limits
    pub fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            Err(Error::LimitExceeded(format!(
                "Element depth {} exceeds maximum {}",
                depth, self.max_depth
            )))
        } else {
            Ok(())
        }
    }

    /// Check if document size is within limits
    pub fn check_document_size(&self, size: usize) -> Result<()> {
        if size > self.max_document_size {
            Err(Error::LimitExceeded(format!(
                "Document size {} bytes exceeds maximum {} bytes",
                size, self.max_document_size
            )))
        } else {
            Ok(())
        }
    }

    /// Check if entity nesting is within limits
    pub fn check_entity_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_entity_depth {
            Err(Error::LimitExceeded(format!(
                "Entity nesting {} exceeds maximum {}",
                depth, self.max_entity_depth
            )))
        } else {
            Ok(())
        }
    }

    /// Check if entity expansion size is within limits
    pub fn check_entity_expansion_size(&self, size: usize) -> Result<()> {
        if size > self.max_entity_expansion_size {
            Err(Error::LimitExceeded(format!(
                "Entity expansion size {} bytes exceeds maximum {} bytes",
                size, self.max_entity_expansion_size
            )))
        } else {
            Ok(())
        }
    }

    /// Check if number of attributes is within limits
    pub fn check_attributes(&self, count: usize) -> Result<()> {
        if count > self.max_attributes {
            Err(Error::LimitExceeded(format!(
                "Attribute count {} exceeds maximum {}",
                count, self.max_attributes
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_depth, 1000);
        assert!(limits.check_depth(500).is_ok());
        assert!(limits.check_depth(1500).is_err());
    }

    #[test]
    fn test_strict_limits() {
        let limits = Limits::strict();
        assert!(limits.max_depth < Limits::default().max_depth);
        assert!(limits.check_depth(150).is_err());
    }

    #[test]
    fn test_permissive_limits() {
        let limits = Limits::permissive();
        assert!(limits.max_depth > Limits::default().max_depth);
        assert!(limits.check_depth(5000).is_ok());
    }

    #[test]
    fn test_check_document_size() {
        let limits = Limits::default();
        assert!(limits.check_document_size(1024).is_ok());
        assert!(limits.check_document_size(200 * 1024 * 1024).is_err());
    }

    #[test]
    fn test_check_entity_depth() {
        let limits = Limits::strict();
        assert!(limits.check_entity_depth(4).is_ok());
        assert!(matches!(
            limits.check_entity_depth(5),
            Err(Error::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_check_entity_expansion_size() {
        let limits = Limits::strict();
        assert!(limits.check_entity_expansion_size(1024).is_ok());
        assert!(limits.check_entity_expansion_size(2 * 1024 * 1024).is_err());
    }
}
