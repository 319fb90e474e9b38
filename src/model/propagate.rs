use std::fmt;
use std::vec;

use tracing::{event, instrument, Level};

use crate::model::tree;
use crate::model::tree::NodeId;
use crate::model::tree::State;

/// A node whose stored state actually changed, and what it changed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeChange {
    pub id: NodeId,
    pub state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleError {
    NotFound(NodeId),

    /// Only definite states can be requested.
    InvalidArgument(State),
}

/// Pushes a toggle down through a subtree and folds the result back up the ancestor chain.
#[derive(Debug, Clone, Default)]
pub struct Propagator {
    container_boundary: Option<NodeId>,
}

impl Propagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes the propagator to the boundary's subtree. Aggregation never climbs past the boundary node (the boundary
    /// itself is still recomputed), and nodes outside it can't be toggled.
    pub fn with_container_boundary(container_boundary: Option<NodeId>) -> Self {
        Propagator {
            container_boundary,
        }
    }

    pub fn container_boundary(&self) -> Option<NodeId> {
        self.container_boundary
    }

    /// The node whose subtree this propagator keeps consistent.
    pub fn scope(&self, tree: &tree::Tree) -> NodeId {
        self.container_boundary.unwrap_or_else(|| tree.root())
    }

    /// Checks the tri-state invariants over everything this propagator manages. Nodes above the container boundary
    /// are never touched by a toggle, so they're left out.
    pub fn check_consistency(&self, tree: &tree::Tree) -> Result<(), tree::Inconsistency> {
        tree.check_subtree_consistency(self.scope(tree))
    }

    /// Forces `id` and its whole subtree to `new_state`, then recomputes ancestors until one of them comes out
    /// unchanged. Returns every stored change, subtree first (pre-order) and then ancestors nearest-first.
    ///
    /// Errors are reported before anything is touched.
    #[instrument(skip(self, tree))]
    pub fn apply_toggle(&self, tree: &mut tree::Tree, id: NodeId, new_state: State) -> Result<vec::Vec<NodeChange>, ToggleError> {
        tree.get(id)?;

        /* nodes outside the container aren't part of this tri-state tree */
        if !tree.is_within(id, self.scope(tree))? {
            return Err(ToggleError::NotFound(id));
        }

        if !new_state.is_definite() {
            return Err(ToggleError::InvalidArgument(new_state));
        }

        let mut changes = vec::Vec::new();

        self.cascade(tree, id, new_state, &mut changes)?;
        let cascaded = changes.len();

        self.aggregate_upward(tree, id, &mut changes)?;

        event!(Level::DEBUG, cascaded, aggregated = changes.len() - cascaded, "applied toggle");

        Ok(changes)
    }

    fn cascade(&self, tree: &mut tree::Tree, id: NodeId, new_state: State, changes: &mut vec::Vec<NodeChange>) -> Result<(), ToggleError> {
        let subtree: vec::Vec<NodeId> = tree.descendants(id)?.collect();

        for node in subtree {
            if tree.get(node)?.state != new_state {
                tree.set_state(node, new_state)?;
                record(changes, node, new_state);
            }
        }

        Ok(())
    }

    fn aggregate_upward(&self, tree: &mut tree::Tree, id: NodeId, changes: &mut vec::Vec<NodeChange>) -> Result<(), ToggleError> {
        let mut current = id;

        loop {
            if Some(current) == self.container_boundary {
                break;
            }

            let parent = match tree.parent_of(current)? {
                Some(parent) => parent,
                None => break,
            };

            let recomputed = match tree.aggregate_children(parent)? {
                Some(state) => state,
                None => break,
            };

            /* nothing above an unchanged ancestor can see a difference */
            if tree.get(parent)?.state == recomputed {
                break;
            }

            tree.set_state(parent, recomputed)?;
            record(changes, parent, recomputed);
            current = parent;
        }

        Ok(())
    }
}

fn record(changes: &mut vec::Vec<NodeChange>, id: NodeId, state: State) {
    event!(Level::TRACE, %id, %state, "node changed");
    changes.push(NodeChange { id, state });
}

impl From<tree::LookupError> for ToggleError {
    fn from(e: tree::LookupError) -> ToggleError {
        match e {
            tree::LookupError::NotFound(id) => ToggleError::NotFound(id),
        }
    }
}

impl fmt::Display for ToggleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToggleError::NotFound(id) => write!(f, "No node {} in tree", id),
            ToggleError::InvalidArgument(state) => write!(f, "Can't request a node become {}", state),
        }
    }
}

impl std::error::Error for ToggleError {
}

impl fmt::Display for NodeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    /* R has children A and B; A has children A1 and A2. Everything starts unchecked. */
    fn create_scenario_tree() -> tree::Tree {
        tree::Tree::builder()
            .label("R")
            .child(|b| b
                   .label("A")
                   .child(|b| b.label("A1"))
                   .child(|b| b.label("A2")))
            .child(|b| b.label("B"))
            .build()
    }

    fn create_deep_test_tree() -> tree::Tree {
        tree::Tree::builder()
            .label("root")
            .child(|b| b
                   .label("a")
                   .child(|b| b
                          .label("a0")
                          .child(|b| b.label("a0.0"))
                          .child(|b| b.label("a0.1").checked(true)))
                   .child(|b| b
                          .label("a1")
                          .child(|b| b.label("a1.0"))))
            .child(|b| b
                   .label("b")
                   .child(|b| b.label("b0"))
                   .child(|b| b
                          .label("b1")
                          .child(|b| b.label("b1.0"))
                          .child(|b| b.label("b1.1"))
                          .child(|b| b.label("b1.2").checked(true))))
            .child(|b| b.label("c").checked(true))
            .build()
    }

    fn id(tree: &tree::Tree, label: &str) -> NodeId {
        tree.find(label).unwrap()
    }

    fn toggle(propagator: &Propagator, tree: &mut tree::Tree, label: &str, state: State) -> vec::Vec<(String, State)> {
        let node = id(tree, label);
        let changes = propagator.apply_toggle(tree, node, state).unwrap();

        changes.iter().map(|change| (tree.get(change.id).unwrap().label.clone(), change.state)).collect()
    }

    fn expect(list: &[(&str, State)]) -> vec::Vec<(String, State)> {
        list.iter().map(|(label, state)| (label.to_string(), *state)).collect()
    }

    fn states(tree: &tree::Tree) -> vec::Vec<State> {
        tree.iter().map(|node| node.state).collect()
    }

    #[test]
    fn test_scenarios() {
        let propagator = Propagator::new();
        let mut tree = create_scenario_tree();

        assert_eq!(
            toggle(&propagator, &mut tree, "A1", State::Checked),
            expect(&[("A1", State::Checked), ("A", State::Indeterminate), ("R", State::Indeterminate)]));

        assert_eq!(
            toggle(&propagator, &mut tree, "A2", State::Checked),
            expect(&[("A2", State::Checked), ("A", State::Checked)]));
        assert_eq!(tree.get(tree.root()).unwrap().state, State::Indeterminate);

        assert_eq!(
            toggle(&propagator, &mut tree, "B", State::Checked),
            expect(&[("B", State::Checked), ("R", State::Checked)]));

        assert_eq!(
            toggle(&propagator, &mut tree, "A1", State::Unchecked),
            expect(&[("A1", State::Unchecked), ("A", State::Indeterminate), ("R", State::Indeterminate)]));

        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn test_idempotent() {
        let propagator = Propagator::new();
        let mut tree = create_deep_test_tree();

        for (label, state) in [("a0.0", State::Checked), ("b", State::Unchecked), ("root", State::Checked), ("b1.1", State::Unchecked)] {
            assert!(!toggle(&propagator, &mut tree, label, state).is_empty());
            assert_eq!(toggle(&propagator, &mut tree, label, state), expect(&[]));
        }
    }

    #[test]
    fn test_cascade_clears_indeterminate() {
        let propagator = Propagator::new();
        let mut tree = create_deep_test_tree();
        let a = id(&tree, "a");

        assert_eq!(tree.get(a).unwrap().state, State::Indeterminate);

        assert_eq!(
            toggle(&propagator, &mut tree, "a", State::Checked),
            expect(&[
                ("a", State::Checked),
                ("a0", State::Checked),
                ("a0.0", State::Checked),
                ("a1", State::Checked),
                ("a1.0", State::Checked),
            ]));

        for node in tree.descendants(a).unwrap() {
            assert_eq!(tree.get(node).unwrap().state, State::Checked);
        }

        /* b is still mixed */
        assert_eq!(tree.get(tree.root()).unwrap().state, State::Indeterminate);
        assert_eq!(tree.check_consistency(), Ok(()));
    }

    #[test]
    fn test_indeterminate_child_keeps_parent_indeterminate() {
        let propagator = Propagator::new();
        let mut tree = create_deep_test_tree();

        /* b0 checked leaves b1 mixed, so b stays indeterminate and nothing above it moves */
        assert_eq!(
            toggle(&propagator, &mut tree, "b0", State::Checked),
            expect(&[("b0", State::Checked)]));

        assert_eq!(
            toggle(&propagator, &mut tree, "b1", State::Checked),
            expect(&[("b1", State::Checked), ("b1.0", State::Checked), ("b1.1", State::Checked), ("b", State::Checked)]));
    }

    #[test]
    fn test_unknown_node_leaves_tree_untouched() {
        let propagator = Propagator::new();
        let mut tree = create_deep_test_tree();
        let before = states(&tree);

        /* an id past the end of this tree's arena */
        let big = (0..tree.len()).fold(tree::Tree::builder().label("big"), |b, i| b.child(|b| b.label(i.to_string()))).build();
        let stranger = big.iter().last().unwrap().id;

        assert_matches!(propagator.apply_toggle(&mut tree, stranger, State::Checked), Err(ToggleError::NotFound(x)) if x == stranger);
        assert_eq!(states(&tree), before);
    }

    #[test]
    fn test_indeterminate_request_rejected() {
        let propagator = Propagator::new();
        let mut tree = create_deep_test_tree();
        let before = states(&tree);

        let a00 = id(&tree, "a0.0");

        assert_matches!(
            propagator.apply_toggle(&mut tree, a00, State::Indeterminate),
            Err(ToggleError::InvalidArgument(State::Indeterminate)));
        assert_eq!(states(&tree), before);
    }

    #[test]
    fn test_container_boundary() {
        let mut tree = create_deep_test_tree();
        let propagator = Propagator::with_container_boundary(Some(id(&tree, "b")));

        /* b is recomputed, root is not */
        assert_eq!(
            toggle(&propagator, &mut tree, "b1", State::Unchecked),
            expect(&[("b1", State::Unchecked), ("b1.2", State::Unchecked), ("b", State::Unchecked)]));
        assert_eq!(tree.get(tree.root()).unwrap().state, State::Indeterminate);
        assert_eq!(propagator.check_consistency(&tree), Ok(()));

        /* toggling the boundary itself goes nowhere upward */
        assert_eq!(
            toggle(&propagator, &mut tree, "b", State::Checked),
            expect(&[("b", State::Checked), ("b0", State::Checked), ("b1", State::Checked), ("b1.0", State::Checked), ("b1.1", State::Checked), ("b1.2", State::Checked)]));
        assert_eq!(tree.get(tree.root()).unwrap().state, State::Indeterminate);
        assert_eq!(propagator.check_consistency(&tree), Ok(()));
    }

    #[test]
    fn test_container_boundary_scopes_tree() {
        /* the root's aggregate depends on the boundary's state */
        let mut tree = tree::Tree::builder()
            .label("page")
            .child(|b| b.label("outside").checked(true))
            .child(|b| b
                   .label("form")
                   .child(|b| b.label("x"))
                   .child(|b| b.label("y")))
            .build();
        let propagator = Propagator::with_container_boundary(Some(id(&tree, "form")));
        let page = tree.root();

        assert_eq!(propagator.scope(&tree), id(&tree, "form"));
        assert_eq!(tree.get(page).unwrap().state, State::Indeterminate);

        assert_eq!(
            toggle(&propagator, &mut tree, "x", State::Checked),
            expect(&[("x", State::Checked), ("form", State::Indeterminate)]));
        assert_eq!(propagator.check_consistency(&tree), Ok(()));

        assert_eq!(
            toggle(&propagator, &mut tree, "y", State::Checked),
            expect(&[("y", State::Checked), ("form", State::Checked)]));
        assert_eq!(propagator.check_consistency(&tree), Ok(()));
        assert_eq!(tree.get(page).unwrap().state, State::Indeterminate);

        /* nodes outside the container aren't part of the tri-state tree */
        let before = states(&tree);
        let outside = id(&tree, "outside");
        assert_matches!(propagator.apply_toggle(&mut tree, outside, State::Unchecked), Err(ToggleError::NotFound(x)) if x == outside);
        assert_matches!(propagator.apply_toggle(&mut tree, page, State::Unchecked), Err(ToggleError::NotFound(x)) if x == page);
        assert_eq!(states(&tree), before);
        assert_eq!(propagator.check_consistency(&tree), Ok(()));

        /* once the container is cut out on its own, the whole tree is consistent */
        let scoped = tree.subtree(propagator.scope(&tree)).unwrap();
        assert_eq!(scoped.check_consistency(), Ok(()));
        assert_eq!(scoped.get(scoped.root()).unwrap().state, State::Checked);
    }

    #[test]
    fn test_invariant_holds_across_toggles() {
        let propagator = Propagator::new();
        let mut tree = create_deep_test_tree();
        let ids: vec::Vec<NodeId> = tree.iter().map(|node| node.id).collect();

        /* deterministic walk over (node, state) pairs */
        let mut seed: u64 = 0x2545f4914f6cdd1d;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let node = ids[(seed >> 33) as usize % ids.len()];
            let state = State::from_checked(seed & (1 << 20) != 0);

            let changes = propagator.apply_toggle(&mut tree, node, state).unwrap();
            assert_eq!(tree.check_consistency(), Ok(()));

            /* every reported change is reflected in the tree, and nothing is reported twice */
            for (i, change) in changes.iter().enumerate() {
                assert!(changes[i + 1..].iter().all(|other| other.id != change.id));
                assert_eq!(tree.get(change.id).unwrap().state, change.state);
            }

            /* the upward part never visits more than the node's depth */
            let subtree = tree.descendants(node).unwrap().count();
            assert!(changes.len() <= subtree + tree.depth(node).unwrap());

            for below in tree.descendants(node).unwrap() {
                assert_eq!(tree.get(below).unwrap().state, state);
            }
        }
    }
}
