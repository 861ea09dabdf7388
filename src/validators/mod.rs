//! DTD validators
//!
//! This module contains the core validation logic: content models and
//! their DFAs, element and attribute declarations, and the [`Validator`]
//! driven by document events.

pub mod attributes;
pub mod content_model;
pub mod dfa;
pub mod elements;
pub mod parse_tree;
pub mod validation;

// Re-exports
pub use attributes::{AttributeDecl, AttributeType};
pub use content_model::{Category, ContentModel};
pub use dfa::{Dfa, State, StateId, StateKind};
pub use elements::ElementDecl;
pub use parse_tree::{NodeId, NodeKind, ParseNode, ParseTree};
pub use validation::{ValidationHandler, Validator};
