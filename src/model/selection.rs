use std::vec;

use crate::model::propagate;
use crate::model::propagate::NodeChange;
use crate::model::tree;
use crate::model::tree::NodeId;
use crate::model::tree::State;
use crate::model::versioned;
use crate::model::versioned::Versioned;

/// A tri-state tree together with the rules for propagating toggles through it. This is what an adapter holds on
/// to, either directly or shared through a [Host].
#[derive(Clone)]
pub struct Selection {
    tree: tree::Tree,
    propagator: propagate::Propagator,

    version: versioned::Version<Selection>,
}

/// A user flipping one node's control to a definite state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggle {
    pub node: NodeId,
    pub state: State,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub toggle: Toggle,
    pub changes: vec::Vec<NodeChange>,
}

pub type ApplyError = propagate::ToggleError;

pub type Host = versioned::Host<Selection>;

impl Selection {
    pub fn new(tree: tree::Tree, propagator: propagate::Propagator) -> Self {
        Selection {
            tree,
            propagator,

            version: Default::default(),
        }
    }

    pub fn tree(&self) -> &tree::Tree {
        &self.tree
    }

    pub fn propagator(&self) -> &propagate::Propagator {
        &self.propagator
    }

    pub fn state_of(&self, id: NodeId) -> Result<State, tree::LookupError> {
        self.tree.get(id).map(|node| node.state)
    }

    /// Checks the tri-state invariants over the part of the tree the propagator manages.
    pub fn check_consistency(&self) -> Result<(), tree::Inconsistency> {
        self.propagator.check_consistency(&self.tree)
    }

    /// Single-threaded entry point. Returns the changes to render, in order.
    pub fn apply_toggle(&mut self, node: NodeId, state: State) -> Result<vec::Vec<NodeChange>, ApplyError> {
        self.change_in_place(Toggle { node, state }).map(|record| record.changes)
    }

    /// Everything an adapter that last rendered `older` needs to apply to catch up, in order. A node may appear more
    /// than once; the last entry wins.
    pub fn changes_since(&self, older: &Selection) -> Result<vec::Vec<NodeChange>, versioned::HistoryError> {
        let mut changes = vec::Vec::new();

        Versioned::changes_since(self, older, &mut |_selection, record: &ChangeRecord| {
            changes.extend(record.changes.iter().copied());
        })?;

        Ok(changes)
    }
}

impl versioned::Versioned for Selection {
    type Change = Toggle;

    fn version(&self) -> &versioned::Version<Selection> {
        &self.version
    }

    fn version_mut(&mut self) -> &mut versioned::Version<Selection> {
        &mut self.version
    }
}

impl versioned::Change<Selection> for Toggle {
    type ApplyError = ApplyError;
    type ApplyRecord = ChangeRecord;

    fn apply(self, selection: &mut Selection) -> Result<(Toggle, ChangeRecord), ApplyError> {
        let changes = selection.propagator.apply_toggle(&mut selection.tree, self.node, self.state)?;

        Ok((self, ChangeRecord {
            toggle: self,
            changes,
        }))
    }
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("tree", &self.tree)
            .field("container_boundary", &self.propagator.container_boundary())
            .field("version", &self.version)
            .finish()
    }
}
