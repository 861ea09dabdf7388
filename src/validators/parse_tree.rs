//! Augmented regular expression trees
//!
//! A [`ParseTree`] is the binary syntax tree of a complex content model,
//! extended by a final sequence with a unique end marker. Leaves (element
//! names and the end marker) are the positions used by subset construction.
//! Nodes live in an arena and refer to each other by [`NodeId`].

use std::collections::BTreeSet;

use crate::dtd::{ContentParticle, ParticleKind, Quantity};

/// Index of a node in its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Kind of a parse tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The end marker
    End,
    /// Matches the empty string
    Epsilon,
    /// An element name
    Name,
    /// Alternation of left and right
    Choice,
    /// Concatenation of left and right
    Seq,
    /// Zero or more of left
    Rep,
    /// Zero or one of left
    Opt,
    /// One or more of left
    Plus,
}

/// One node of a parse tree
#[derive(Debug, Clone)]
pub struct ParseNode {
    /// Identity of the node
    pub id: NodeId,
    /// Kind of node
    pub kind: NodeKind,
    /// Element name of `Name` leaves
    pub symbol: Option<String>,
    /// Left (or only) operand
    pub left: Option<NodeId>,
    /// Right operand of `Choice` and `Seq`
    pub right: Option<NodeId>,
    /// Whether the subexpression matches the empty string
    pub nullable: bool,
    /// Positions that can start a match
    pub firstpos: BTreeSet<NodeId>,
    /// Positions that can end a match
    pub lastpos: BTreeSet<NodeId>,
    /// Positions that can follow this one (leaves only)
    pub followpos: BTreeSet<NodeId>,
}

impl ParseNode {
    /// Whether the node is a position (a leaf)
    pub fn is_position(&self) -> bool {
        matches!(self.kind, NodeKind::Name | NodeKind::End)
    }
}

/// Parse tree with computed position sets.
///
/// Operands are always created before their parent, so index order is a
/// post-order traversal.
#[derive(Debug, Clone)]
pub struct ParseTree {
    nodes: Vec<ParseNode>,
    root: NodeId,
    end: NodeId,
}

impl ParseTree {
    /// Build the augmented tree of a content particle and compute its sets
    pub fn new(particle: &ContentParticle) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            end: NodeId(0),
        };

        let body = tree.add_particle(particle);
        tree.end = tree.add(NodeKind::End, None, None, None);
        tree.root = tree.add(NodeKind::Seq, None, Some(body), Some(tree.end));

        tree.compute_positions();
        tree.compute_followpos();
        tree
    }

    fn add(
        &mut self,
        kind: NodeKind,
        symbol: Option<String>,
        left: Option<NodeId>,
        right: Option<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ParseNode {
            id,
            kind,
            symbol,
            left,
            right,
            nullable: false,
            firstpos: BTreeSet::new(),
            lastpos: BTreeSet::new(),
            followpos: BTreeSet::new(),
        });
        id
    }

    fn add_particle(&mut self, particle: &ContentParticle) -> NodeId {
        let node = match particle.kind {
            ParticleKind::Name => {
                self.add(NodeKind::Name, particle.name.clone(), None, None)
            }
            ParticleKind::Choice | ParticleKind::Seq => {
                let kind = if particle.kind == ParticleKind::Choice {
                    NodeKind::Choice
                } else {
                    NodeKind::Seq
                };
                let mut operands = particle.children.iter();
                match operands.next() {
                    Some(first) => {
                        let mut acc = self.add_particle(first);
                        for operand in operands {
                            let right = self.add_particle(operand);
                            acc = self.add(kind, None, Some(acc), Some(right));
                        }
                        acc
                    }
                    None => self.add(NodeKind::Epsilon, None, None, None),
                }
            }
            // only valid as whole content models
            ParticleKind::Empty | ParticleKind::Any | ParticleKind::Mixed => {
                self.add(NodeKind::Epsilon, None, None, None)
            }
        };

        match particle.quantity {
            Quantity::None => node,
            Quantity::Opt => self.add(NodeKind::Opt, None, Some(node), None),
            Quantity::Rep => self.add(NodeKind::Rep, None, Some(node), None),
            Quantity::Plus => self.add(NodeKind::Plus, None, Some(node), None),
        }
    }

    fn compute_positions(&mut self) {
        for i in 0..self.nodes.len() {
            let (nullable, firstpos, lastpos) = {
                let node = &self.nodes[i];
                let left = node.left.map(|id| &self.nodes[id.0]);
                let right = node.right.map(|id| &self.nodes[id.0]);
                let own = || BTreeSet::from([node.id]);

                match (node.kind, left, right) {
                    (NodeKind::Name | NodeKind::End, _, _) => (false, own(), own()),
                    (NodeKind::Choice, Some(l), Some(r)) => (
                        l.nullable || r.nullable,
                        l.firstpos.union(&r.firstpos).copied().collect(),
                        l.lastpos.union(&r.lastpos).copied().collect(),
                    ),
                    (NodeKind::Seq, Some(l), Some(r)) => {
                        let firstpos = if l.nullable {
                            l.firstpos.union(&r.firstpos).copied().collect()
                        } else {
                            l.firstpos.clone()
                        };
                        let lastpos = if r.nullable {
                            l.lastpos.union(&r.lastpos).copied().collect()
                        } else {
                            r.lastpos.clone()
                        };
                        (l.nullable && r.nullable, firstpos, lastpos)
                    }
                    (NodeKind::Rep | NodeKind::Opt, Some(l), _) => {
                        (true, l.firstpos.clone(), l.lastpos.clone())
                    }
                    (NodeKind::Plus, Some(l), _) => {
                        (l.nullable, l.firstpos.clone(), l.lastpos.clone())
                    }
                    _ => (true, BTreeSet::new(), BTreeSet::new()),
                }
            };

            let node = &mut self.nodes[i];
            node.nullable = nullable;
            node.firstpos = firstpos;
            node.lastpos = lastpos;
        }
    }

    fn compute_followpos(&mut self) {
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            let (from, to) = match (node.kind, node.left, node.right) {
                (NodeKind::Seq, Some(l), Some(r)) => (
                    self.nodes[l.0].lastpos.clone(),
                    self.nodes[r.0].firstpos.clone(),
                ),
                (NodeKind::Rep | NodeKind::Plus, _, _) => {
                    (node.lastpos.clone(), node.firstpos.clone())
                }
                _ => continue,
            };

            for position in from {
                self.nodes[position.0].followpos.extend(to.iter().copied());
            }
        }
    }

    /// Get a node
    pub fn node(&self, id: NodeId) -> &ParseNode {
        &self.nodes[id.0]
    }

    /// All nodes in post-order
    pub fn nodes(&self) -> &[ParseNode] {
        &self.nodes
    }

    /// The synthetic root `Seq(model, End)`
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The end marker position
    pub fn end(&self) -> NodeId {
        self.end
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes (never true for a built tree)
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct element names, sorted
    pub fn symbols(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter_map(|n| n.symbol.as_deref())
            .collect()
    }
}
