//! Element content models
//!
//! A [`ContentModel`] is the normalized form of a declared content
//! particle. It carries a [`Category`] that selects how its DFA is built
//! and a signature string under which structurally identical models share
//! one DFA.
//!
//! Categorization runs in precedence order: `ANY`, `EMPTY`, mixed content,
//! then pure choice or pure sequence (every child a bare name without an
//! occurrence indicator), and complex for everything else. Complex models
//! are normalized first and then categorized again, since normalization
//! can reduce them to a pure form.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::dtd::{ContentParticle, ParticleKind, Quantity};

/// How the DFA of a content model is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    /// `EMPTY`
    Empty,
    /// `ANY`
    Any,
    /// `(#PCDATA | ...)*`
    Mixed,
    /// A choice of bare names, e.g. `(a | b | c)*`
    PureChoice,
    /// A sequence of bare names, e.g. `(a, b, c)+`
    PureSeq,
    /// Anything else
    Complex,
}

/// A categorized, normalized content model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentModel {
    root: ContentParticle,
    category: Category,
    signature: String,
}

impl ContentModel {
    /// Build a content model from a declared particle
    pub fn new(particle: &ContentParticle) -> Self {
        let mut root = particle.clone();
        if root.kind == ParticleKind::Name {
            let quantity = root.quantity;
            root.quantity = Quantity::None;
            root = ContentParticle::seq(vec![root]).with_quantity(quantity);
        }

        let mut category = categorize(&root);
        if category == Category::Complex {
            root = optimize(root);
            category = categorize(&root);
        }

        let mut signature = String::new();
        write_signature(&root, &mut signature);

        Self {
            root,
            category,
            signature,
        }
    }

    /// The normalized model
    pub fn root(&self) -> &ContentParticle {
        &self.root
    }

    /// The construction category
    pub fn category(&self) -> Category {
        self.category
    }

    /// Canonical encoding of the normalized model
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Occurrence indicator of the root group
    pub fn quantity(&self) -> Quantity {
        self.root.quantity
    }

    /// Whether the model allows character data
    pub fn is_mixed(&self) -> bool {
        matches!(self.category, Category::Mixed | Category::Any)
    }

    /// Element names of the root's direct children, in declaration order
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.root
            .children
            .iter()
            .filter_map(|child| child.name.as_deref())
    }
}

impl fmt::Display for ContentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

fn categorize(root: &ContentParticle) -> Category {
    match root.kind {
        ParticleKind::Any => Category::Any,
        ParticleKind::Empty => Category::Empty,
        ParticleKind::Mixed => Category::Mixed,
        ParticleKind::Name => Category::Complex,
        ParticleKind::Choice | ParticleKind::Seq => {
            let pure = !root.children.is_empty()
                && root
                    .children
                    .iter()
                    .all(|c| c.kind == ParticleKind::Name && c.quantity == Quantity::None);
            match (pure, root.kind) {
                (true, ParticleKind::Choice) => Category::PureChoice,
                (true, _) => Category::PureSeq,
                (false, _) => Category::Complex,
            }
        }
    }
}

fn is_group(particle: &ContentParticle) -> bool {
    matches!(particle.kind, ParticleKind::Choice | ParticleKind::Seq)
}

/// Quantity of `(x inner) outer`
fn combine(outer: Quantity, inner: Quantity) -> Quantity {
    match (outer, inner) {
        (Quantity::None, q) | (q, Quantity::None) => q,
        (a, b) if a == b => a,
        _ => Quantity::Rep,
    }
}

/// Remove redundant grouping without changing the accepted language.
fn optimize(root: ContentParticle) -> ContentParticle {
    let mut root = collapse(root);

    // a lone child of the root is hoisted into it
    while is_group(&root) && root.children.len() == 1 {
        let mut child = root.children.remove(0);
        let quantity = combine(root.quantity, child.quantity);
        if is_group(&child) {
            root.kind = child.kind;
            root.quantity = quantity;
            root.children = child.children;
            root = collapse(root);
        } else {
            child.quantity = Quantity::None;
            root.kind = ParticleKind::Seq;
            root.quantity = quantity;
            root.children = vec![child];
            break;
        }
    }
    root
}

/// Normalize the children of a group, bottom-up.
///
/// - a single-item group child is replaced by its item, quantities combined
/// - under `( ... | ... )*` the quantities of the alternatives are dropped
/// - a child group of the same kind without a quantity is spliced in
fn collapse(mut node: ContentParticle) -> ContentParticle {
    if !is_group(&node) {
        return node;
    }

    let strip = node.kind == ParticleKind::Choice && node.quantity == Quantity::Rep;
    let mut pending: VecDeque<ContentParticle> =
        node.children.drain(..).map(collapse).collect();
    let mut children = Vec::with_capacity(pending.len());

    while let Some(mut child) = pending.pop_front() {
        if is_group(&child) && child.children.len() == 1 {
            let mut inner = child.children.remove(0);
            inner.quantity = combine(child.quantity, inner.quantity);
            pending.push_front(inner);
            continue;
        }
        if strip {
            child.quantity = Quantity::None;
        }
        if child.kind == node.kind && child.quantity == Quantity::None {
            for grandchild in child.children.into_iter().rev() {
                pending.push_front(grandchild);
            }
            continue;
        }
        children.push(child);
    }

    node.children = children;
    node
}

/// Delimited encoding: kind, quantity, then name or bracketed children
fn write_signature(particle: &ContentParticle, out: &mut String) {
    out.push(match particle.kind {
        ParticleKind::Empty => 'E',
        ParticleKind::Any => 'A',
        ParticleKind::Mixed => 'M',
        ParticleKind::Name => 'N',
        ParticleKind::Choice => 'C',
        ParticleKind::Seq => 'S',
    });
    out.push(particle.quantity.as_char());

    if let Some(name) = &particle.name {
        out.push_str(name);
    }
    if !particle.children.is_empty() {
        out.push('(');
        for (i, child) in particle.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_signature(child, out);
        }
        out.push(')');
    }
}
