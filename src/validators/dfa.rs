//! Deterministic automata for content models
//!
//! Each distinct content model compiles to one [`Dfa`]. Empty, any, mixed,
//! pure choice and pure sequence models are built directly; complex models
//! go through subset construction over their [`ParseTree`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::dtd::Quantity;

use super::content_model::{Category, ContentModel};
use super::parse_tree::{NodeId, ParseTree};

/// Index of a state in its DFA
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub usize);

/// Kind of a DFA state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Element content
    Normal,
    /// `EMPTY`: no content at all
    Empty,
    /// `ANY`: any declared element and character data
    Any,
    /// Mixed content: character data and the listed elements
    Mixed,
}

/// A DFA state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    /// Identity of the state
    pub id: StateId,
    /// Kind of state
    pub kind: StateKind,
    /// Parse tree positions the state stands for (complex models only)
    pub positions: BTreeSet<NodeId>,
    /// Whether the element may end in this state
    pub accepting: bool,
    /// Transitions on element names
    pub transitions: BTreeMap<String, StateId>,
}

impl State {
    fn new(id: StateId, kind: StateKind, accepting: bool) -> Self {
        Self {
            id,
            kind,
            positions: BTreeSet::new(),
            accepting,
            transitions: BTreeMap::new(),
        }
    }

    /// Whether character data other than whitespace is allowed
    pub fn accepts_character_data(&self) -> bool {
        matches!(self.kind, StateKind::Mixed | StateKind::Any)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state {}", self.id.0)?;
        match self.kind {
            StateKind::Normal => {}
            StateKind::Empty => f.write_str(" EMPTY")?,
            StateKind::Any => f.write_str(" ANY")?,
            StateKind::Mixed => f.write_str(" MIXED")?,
        }
        if self.accepting {
            f.write_str(" (accepting)")?;
        }
        for (symbol, target) in &self.transitions {
            write!(f, "\n    {} -> {}", symbol, target.0)?;
        }
        Ok(())
    }
}

/// Automaton validating the children of elements with one content model
#[derive(Debug, Clone)]
pub struct Dfa {
    model: ContentModel,
    states: Vec<State>,
    parse_tree: Option<ParseTree>,
}

impl Dfa {
    /// Compile a content model
    pub fn new(model: ContentModel) -> Self {
        let mut dfa = Self {
            model,
            states: Vec::new(),
            parse_tree: None,
        };

        match dfa.model.category() {
            Category::Empty => {
                dfa.add_state(StateKind::Empty, true);
            }
            Category::Any => {
                dfa.add_state(StateKind::Any, true);
            }
            Category::Mixed => dfa.build_mixed(),
            Category::PureChoice => dfa.build_pure_choice(),
            Category::PureSeq => dfa.build_pure_seq(),
            Category::Complex => dfa.build_complex(),
        }

        debug!(
            model = %dfa.model,
            category = ?dfa.model.category(),
            states = dfa.states.len(),
            "built content model DFA"
        );
        dfa
    }

    fn add_state(&mut self, kind: StateKind, accepting: bool) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(State::new(id, kind, accepting));
        id
    }

    fn add_transition(&mut self, from: StateId, symbol: &str, to: StateId) {
        self.states[from.0]
            .transitions
            .insert(symbol.to_string(), to);
    }

    fn names(&self) -> Vec<String> {
        self.model.child_names().map(str::to_string).collect()
    }

    fn build_mixed(&mut self) {
        let state = self.add_state(StateKind::Mixed, true);
        for name in self.names() {
            self.add_transition(state, &name, state);
        }
    }

    fn build_pure_choice(&mut self) {
        let names = self.names();
        match self.model.quantity() {
            Quantity::Rep => {
                let state = self.add_state(StateKind::Normal, true);
                for name in &names {
                    self.add_transition(state, name, state);
                }
            }
            Quantity::Plus => {
                let start = self.add_state(StateKind::Normal, false);
                let end = self.add_state(StateKind::Normal, true);
                for name in &names {
                    self.add_transition(start, name, end);
                    self.add_transition(end, name, end);
                }
            }
            quantity => {
                let start = self.add_state(StateKind::Normal, quantity == Quantity::Opt);
                let end = self.add_state(StateKind::Normal, true);
                for name in &names {
                    self.add_transition(start, name, end);
                }
            }
        }
    }

    fn build_pure_seq(&mut self) {
        let names = self.names();
        let quantity = self.model.quantity();
        let start = self.add_state(StateKind::Normal, quantity.is_optional());

        // one full run of the sequence
        let mut current = start;
        for (i, name) in names.iter().enumerate() {
            let last = i + 1 == names.len();
            if last && quantity == Quantity::Rep {
                self.add_transition(current, name, start);
            } else {
                let next = self.add_state(StateKind::Normal, last);
                self.add_transition(current, name, next);
                current = next;
            }
        }

        // further runs loop back to the accepting end of the first
        if quantity == Quantity::Plus {
            let end = current;
            for (i, name) in names.iter().enumerate() {
                if i + 1 == names.len() {
                    self.add_transition(current, name, end);
                } else {
                    let next = self.add_state(StateKind::Normal, false);
                    self.add_transition(current, name, next);
                    current = next;
                }
            }
        }
    }

    fn build_complex(&mut self) {
        let tree = ParseTree::new(self.model.root());
        let end = tree.end();
        let symbols: Vec<String> = tree.symbols().into_iter().map(str::to_string).collect();

        let start_positions = tree.node(tree.root()).firstpos.clone();
        let start = self.add_state(StateKind::Normal, start_positions.contains(&end));
        self.states[start.0].positions = start_positions;

        // states before the cursor have all their transitions
        let mut cursor = 0;
        while cursor < self.states.len() {
            for symbol in &symbols {
                let mut next = BTreeSet::new();
                for position in &self.states[cursor].positions {
                    let node = tree.node(*position);
                    if node.symbol.as_deref() == Some(symbol.as_str()) {
                        next.extend(node.followpos.iter().copied());
                    }
                }
                if next.is_empty() {
                    continue;
                }

                let target = match self.states.iter().find(|s| s.positions == next) {
                    Some(state) => state.id,
                    None => {
                        let accepting = next.contains(&end);
                        let id = self.add_state(StateKind::Normal, accepting);
                        self.states[id.0].positions = next;
                        id
                    }
                };
                self.add_transition(StateId(cursor), symbol, target);
            }
            cursor += 1;
        }

        self.parse_tree = Some(tree);
    }

    /// The start state
    pub fn start(&self) -> StateId {
        StateId(0)
    }

    /// Get a state
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0]
    }

    /// All states
    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Number of states
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// The compiled content model
    pub fn model(&self) -> &ContentModel {
        &self.model
    }

    /// The construction category
    pub fn category(&self) -> Category {
        self.model.category()
    }

    /// The parse tree of complex models
    pub fn parse_tree(&self) -> Option<&ParseTree> {
        self.parse_tree.as_ref()
    }

    /// Whether `id` is an accepting state
    pub fn is_accepting(&self, id: StateId) -> bool {
        self.states[id.0].accepting
    }

    /// Follow the transition on `name`.
    ///
    /// `ANY` states loop on every name in `any_elements`.
    pub fn next_state(
        &self,
        from: StateId,
        name: &str,
        any_elements: &BTreeSet<String>,
    ) -> Option<StateId> {
        let state = &self.states[from.0];
        match state.kind {
            StateKind::Any => any_elements.contains(name).then_some(from),
            _ => state.transitions.get(name).copied(),
        }
    }

    /// Element names with a transition out of `id`
    pub fn allowable_elements(
        &self,
        id: StateId,
        any_elements: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let state = &self.states[id.0];
        match state.kind {
            StateKind::Any => any_elements.clone(),
            _ => state.transitions.keys().cloned().collect(),
        }
    }

    /// Whether the sequence of child element names is accepted
    pub fn accepts<'a, I>(&self, names: I, any_elements: &BTreeSet<String>) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.start();
        for name in names {
            match self.next_state(state, name, any_elements) {
                Some(next) => state = next,
                None => return false,
            }
        }
        self.is_accepting(state)
    }
}

impl fmt::Display for Dfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DFA {} [{:?}, {} states]",
            self.model,
            self.model.category(),
            self.states.len()
        )?;
        for state in &self.states {
            write!(f, "\n  {}", state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtd::ContentParticle;

    fn name(n: &str) -> ContentParticle {
        ContentParticle::name(n)
    }

    fn dfa(particle: ContentParticle) -> Dfa {
        Dfa::new(ContentModel::new(&particle))
    }

    fn accepts(dfa: &Dfa, input: &str) -> bool {
        let none = BTreeSet::new();
        dfa.accepts(input.split_whitespace(), &none)
    }

    #[test]
    fn test_empty() {
        let dfa = dfa(ContentParticle::empty());
        assert_eq!(dfa.state_count(), 1);
        assert_eq!(dfa.state(dfa.start()).kind, StateKind::Empty);
        assert!(accepts(&dfa, ""));
        assert!(!accepts(&dfa, "a"));
    }

    #[test]
    fn test_any() {
        let dfa = dfa(ContentParticle::any());
        let any: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        assert!(dfa.accepts(["a", "b", "a"], &any));
        assert!(!dfa.accepts(["c"], &any));
        assert_eq!(dfa.allowable_elements(dfa.start(), &any), any);
    }

    #[test]
    fn test_mixed() {
        let dfa = dfa(ContentParticle::mixed(["a", "b"]));
        assert_eq!(dfa.state_count(), 1);
        assert!(dfa.state(dfa.start()).accepts_character_data());
        assert!(accepts(&dfa, ""));
        assert!(accepts(&dfa, "b a a b"));
        assert!(!accepts(&dfa, "c"));
    }

    #[test]
    fn test_pure_choice() {
        let choice = || ContentParticle::choice(vec![name("a"), name("b")]);

        let once = dfa(choice());
        assert!(accepts(&once, "a"));
        assert!(!accepts(&once, ""));
        assert!(!accepts(&once, "a b"));

        let opt = dfa(choice().with_quantity(Quantity::Opt));
        assert!(accepts(&opt, ""));
        assert!(accepts(&opt, "b"));
        assert!(!accepts(&opt, "b b"));

        let rep = dfa(choice().with_quantity(Quantity::Rep));
        assert_eq!(rep.state_count(), 1);
        assert!(accepts(&rep, ""));
        assert!(accepts(&rep, "a b b a"));

        let plus = dfa(choice().with_quantity(Quantity::Plus));
        assert!(!accepts(&plus, ""));
        assert!(accepts(&plus, "b"));
        assert!(accepts(&plus, "a b a"));
    }

    #[test]
    fn test_pure_seq() {
        let seq = || ContentParticle::seq(vec![name("a"), name("b"), name("c")]);

        let once = dfa(seq());
        assert_eq!(once.category(), Category::PureSeq);
        assert!(accepts(&once, "a b c"));
        assert!(!accepts(&once, "a b"));
        assert!(!accepts(&once, ""));

        let opt = dfa(seq().with_quantity(Quantity::Opt));
        assert!(accepts(&opt, ""));
        assert!(accepts(&opt, "a b c"));
        assert!(!accepts(&opt, "a b c a b c"));

        let rep = dfa(seq().with_quantity(Quantity::Rep));
        assert!(accepts(&rep, ""));
        assert!(accepts(&rep, "a b c a b c"));
        assert!(!accepts(&rep, "a b c a"));

        let plus = dfa(seq().with_quantity(Quantity::Plus));
        assert!(!accepts(&plus, ""));
        assert!(accepts(&plus, "a b c"));
        assert!(accepts(&plus, "a b c a b c a b c"));
        assert!(!accepts(&plus, "a b c a b"));
    }

    #[test]
    fn test_pure_seq_single_name() {
        let rep = dfa(ContentParticle::seq(vec![name("a")]).with_quantity(Quantity::Rep));
        assert!(accepts(&rep, ""));
        assert!(accepts(&rep, "a a a"));

        let plus = dfa(ContentParticle::seq(vec![name("a")]).with_quantity(Quantity::Plus));
        assert!(!accepts(&plus, ""));
        assert!(accepts(&plus, "a a"));
    }

    #[test]
    fn test_complex() {
        // (a, b*, c?)
        let dfa = dfa(ContentParticle::seq(vec![
            name("a"),
            name("b").with_quantity(Quantity::Rep),
            name("c").with_quantity(Quantity::Opt),
        ]));
        assert_eq!(dfa.category(), Category::Complex);
        assert!(dfa.parse_tree().is_some());
        assert!(accepts(&dfa, "a"));
        assert!(accepts(&dfa, "a b b c"));
        assert!(accepts(&dfa, "a c"));
        assert!(!accepts(&dfa, "a c b"));
        assert!(!accepts(&dfa, "b a"));
        assert!(!accepts(&dfa, ""));
    }

    #[test]
    fn test_complex_states_deduplicated() {
        // ((a|b)*, a, b, b) has the classic four state automaton
        let dfa = dfa(ContentParticle::seq(vec![
            ContentParticle::choice(vec![name("a"), name("b")]).with_quantity(Quantity::Rep),
            name("a"),
            name("b"),
            name("b"),
        ]));
        assert_eq!(dfa.state_count(), 4);
        assert!(accepts(&dfa, "a b b"));
        assert!(accepts(&dfa, "b a b a b b"));
        assert!(!accepts(&dfa, "a b b a"));
    }

    #[test]
    fn test_allowable_elements() {
        let dfa = dfa(ContentParticle::seq(vec![
            name("a"),
            ContentParticle::choice(vec![name("b"), name("c")]).with_quantity(Quantity::Opt),
        ]));
        let none = BTreeSet::new();
        let after_a = dfa.next_state(dfa.start(), "a", &none).unwrap();
        let allowed: Vec<String> = dfa.allowable_elements(after_a, &none).into_iter().collect();
        assert_eq!(allowed, vec!["b", "c"]);
        assert!(dfa.is_accepting(after_a));
    }

    #[test]
    fn test_display() {
        let dfa = dfa(ContentParticle::seq(vec![name("a"), name("b")]));
        let text = dfa.to_string();
        assert!(text.starts_with("DFA (a,b) [PureSeq, 3 states]"));
        assert!(text.contains("a -> 1"));
        assert!(text.contains("(accepting)"));
    }
}
