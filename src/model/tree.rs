use std::collections::HashMap;
use std::fmt;
use std::vec;

use tracing::{event, Level};

/// Index of a node in a [Tree]'s arena. Only meaningful for the tree (or snapshots of the tree) that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Checked,
    Unchecked,

    /// Derived from a mixture of states below a node. Never valid as a leaf's state or as a direct request.
    Indeterminate,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub state: State,

    parent: Option<NodeId>,
    children: vec::Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    NotFound(NodeId),
}

/// An internal node whose stored state disagrees with the aggregate of its children, or a leaf left indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inconsistency {
    pub node: NodeId,
    pub stored: State,
    pub expected: State,
}

/// Arena of nodes. Node 0 is the root. Cloning is cheap since the arena is a persistent vector, which is what lets
/// versioned snapshots keep their history around.
#[derive(Clone)]
pub struct Tree {
    nodes: imbl::Vector<Node>,
}

pub struct Builder {
    label: String,
    checked: bool,
    children: vec::Vec<Builder>,
}

pub struct Descendants<'a> {
    tree: &'a Tree,
    stack: vec::Vec<NodeId>,
}

pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

/// Summarizes a set of sibling states. Returns None for an empty set, since leaves have no aggregate.
pub fn aggregate<I: IntoIterator<Item = State>>(states: I) -> Option<State> {
    let mut acc = None;

    for state in states {
        match (acc, state) {
            (_, State::Indeterminate) => return Some(State::Indeterminate),
            (None, state) => acc = Some(state),
            (Some(prev), state) if prev == state => {},
            (Some(_), _) => return Some(State::Indeterminate),
        }
    }

    acc
}

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl State {
    pub fn from_checked(checked: bool) -> State {
        if checked {
            State::Checked
        } else {
            State::Unchecked
        }
    }

    pub fn is_definite(self) -> bool {
        !matches!(self, State::Indeterminate)
    }

    /// What a click on a control in this state requests. Indeterminate controls become checked.
    pub fn toggled(self) -> State {
        match self {
            State::Checked => State::Unchecked,
            State::Unchecked | State::Indeterminate => State::Checked,
        }
    }
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children[..]
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl Tree {
    pub fn builder() -> Builder {
        Builder {
            label: String::new(),
            checked: false,
            children: vec::Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, LookupError> {
        self.nodes.get(id.0).ok_or(LookupError::NotFound(id))
    }

    pub fn children_of(&self, id: NodeId) -> Result<&[NodeId], LookupError> {
        self.get(id).map(Node::children)
    }

    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>, LookupError> {
        self.get(id).map(Node::parent)
    }

    pub fn is_leaf(&self, id: NodeId) -> Result<bool, LookupError> {
        self.get(id).map(Node::is_leaf)
    }

    /// Stores a state without any regard for what it means for the rest of the tree.
    pub fn set_state(&mut self, id: NodeId, state: State) -> Result<(), LookupError> {
        match self.nodes.get_mut(id.0) {
            Some(node) => {
                node.state = state;
                Ok(())
            },
            None => Err(LookupError::NotFound(id)),
        }
    }

    /// First node in pre-order carrying the label.
    pub fn find(&self, label: &str) -> Option<NodeId> {
        self.nodes.iter().find(|node| node.label == label).map(|node| node.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter()
    }

    /// Pre-order walk over `id` and everything beneath it.
    pub fn descendants(&self, id: NodeId) -> Result<Descendants<'_>, LookupError> {
        self.get(id)?;

        Ok(Descendants {
            tree: self,
            stack: vec![id],
        })
    }

    /// Walks the parent chain, starting with the parent of `id`.
    pub fn ancestors(&self, id: NodeId) -> Result<Ancestors<'_>, LookupError> {
        Ok(Ancestors {
            tree: self,
            next: self.parent_of(id)?,
        })
    }

    pub fn depth(&self, id: NodeId) -> Result<usize, LookupError> {
        Ok(self.ancestors(id)?.count())
    }

    /// Aggregate of the node's direct children, or None for a leaf.
    pub fn aggregate_children(&self, id: NodeId) -> Result<Option<State>, LookupError> {
        Ok(aggregate(self.children_of(id)?.iter().filter_map(|child| self.nodes.get(child.0)).map(|child| child.state)))
    }

    /// Recomputes every internal node from the leaves up. Used once at load time; unlike a toggle, nothing is forced
    /// downward.
    pub fn initialize_from_leaf_states(&mut self) {
        let mut indeterminate = 0;

        /* children are always allocated after their parents, so walking the arena backwards visits every child before
         * its parent. */
        for index in (0..self.nodes.len()).rev() {
            let id = NodeId(index);

            let state = match self.aggregate_children(id) {
                Ok(Some(state)) => state,
                Ok(None) | Err(_) => continue,
            };

            if state == State::Indeterminate {
                indeterminate+= 1;
            }

            if let Some(node) = self.nodes.get_mut(index) {
                node.state = state;
            }
        }

        event!(Level::DEBUG, nodes = self.nodes.len(), indeterminate, "initialized tree from leaf states");
    }

    /// Forces each marked node's whole subtree into the checked state, the way a checked branch control found at
    /// load time is honored.
    fn seed_marked_subtrees(&mut self, marked: &[NodeId]) {
        for root in marked {
            let subtree: vec::Vec<NodeId> = match self.descendants(*root) {
                Ok(iter) => iter.collect(),
                Err(_) => continue,
            };

            for id in subtree {
                if let Some(node) = self.nodes.get_mut(id.0) {
                    node.state = State::Checked;
                }
            }
        }
    }

    /// Finds the first node (in pre-order) that breaks the tri-state invariants.
    pub fn check_consistency(&self) -> Result<(), Inconsistency> {
        self.check_subtree_consistency(self.root())
    }

    /// Like [Tree::check_consistency], but only looks at `scope` and the nodes beneath it. An unknown scope has
    /// nothing in it to be inconsistent.
    pub fn check_subtree_consistency(&self, scope: NodeId) -> Result<(), Inconsistency> {
        let subtree = match self.descendants(scope) {
            Ok(iter) => iter,
            Err(_) => return Ok(()),
        };

        for id in subtree {
            let node = match self.get(id) {
                Ok(node) => node,
                Err(_) => continue,
            };

            let expected = match self.aggregate_children(id) {
                Ok(Some(state)) => state,
                /* leaves only need to be definite */
                Ok(None) | Err(_) => if node.state.is_definite() {
                    continue
                } else {
                    State::Unchecked
                },
            };

            if node.state != expected {
                return Err(Inconsistency {
                    node: id,
                    stored: node.state,
                    expected,
                });
            }
        }

        Ok(())
    }

    /// Whether `id` is `scope` or one of its descendants.
    pub fn is_within(&self, id: NodeId, scope: NodeId) -> Result<bool, LookupError> {
        self.get(scope)?;
        Ok(id == scope || self.ancestors(id)?.any(|ancestor| ancestor == scope))
    }

    /// Copies `id` and everything beneath it into a tree of its own, rooted at `id`. States are carried over as they
    /// are; ids are reassigned.
    pub fn subtree(&self, id: NodeId) -> Result<Tree, LookupError> {
        let old_ids: vec::Vec<NodeId> = self.descendants(id)?.collect();

        /* pre-order, so every parent is renumbered before its children and stays ahead of them in the arena */
        let renumbered: HashMap<NodeId, NodeId> = old_ids.iter().enumerate().map(|(index, old)| (*old, NodeId(index))).collect();

        let mut nodes = imbl::Vector::new();
        for (index, old) in old_ids.iter().enumerate() {
            let node = self.get(*old)?;

            nodes.push_back(Node {
                id: NodeId(index),
                label: node.label.clone(),
                state: node.state,
                parent: node.parent.and_then(|parent| renumbered.get(&parent).copied()),
                children: node.children.iter().filter_map(|child| renumbered.get(child).copied()).collect(),
            });
        }

        event!(Level::DEBUG, %id, nodes = nodes.len(), "extracted subtree");

        Ok(Tree { nodes })
    }
}

impl Builder {
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = label.into();
        self
    }

    /// For a leaf, its initial state. For an internal node, marks the whole subtree as checked.
    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    pub fn child<F: FnOnce(Builder) -> Builder>(self, f: F) -> Self {
        self.with_child(f(Tree::builder()))
    }

    pub fn with_child(mut self, child: Builder) -> Self {
        self.children.push(child);
        self
    }

    pub fn build(self) -> Tree {
        let mut tree = Tree {
            nodes: imbl::Vector::new(),
        };

        let mut marked = vec::Vec::new();
        self.flatten(None, &mut tree.nodes, &mut marked);

        tree.seed_marked_subtrees(&marked);
        tree.initialize_from_leaf_states();
        tree
    }

    fn flatten(self, parent: Option<NodeId>, nodes: &mut imbl::Vector<Node>, marked: &mut vec::Vec<NodeId>) -> NodeId {
        let id = NodeId(nodes.len());

        if self.checked && !self.children.is_empty() {
            marked.push(id);
        }

        nodes.push_back(Node {
            id,
            label: self.label,
            state: State::from_checked(self.checked),
            parent,
            children: vec::Vec::new(),
        });

        let children: vec::Vec<NodeId> = self.children.into_iter().map(|child| child.flatten(Some(id), nodes, marked)).collect();

        if let Some(node) = nodes.get_mut(id.0) {
            node.children = children;
        }

        id
    }
}

impl<'a> Iterator for Descendants<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;

        if let Ok(children) = self.tree.children_of(id) {
            self.stack.extend(children.iter().rev());
        }

        Some(id)
    }
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.tree.parent_of(id).ok().flatten();
        Some(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Checked => "checked",
            State::Unchecked => "unchecked",
            State::Indeterminate => "indeterminate",
        })
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::NotFound(id) => write!(f, "No node {} in tree", id),
        }
    }
}

impl std::error::Error for LookupError {
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node {} is {} but should be {}", self.node, self.stored, self.expected)
    }
}

/// Renders one node per line, indented by depth, with a checkbox glyph.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self.root(), 0usize)];

        while let Some((id, depth)) = stack.pop() {
            let node = match self.get(id) {
                Ok(node) => node,
                Err(_) => continue,
            };

            let glyph = match node.state {
                State::Checked => "[x]",
                State::Unchecked => "[ ]",
                State::Indeterminate => "[-]",
            };

            writeln!(f, "{:indent$}{} {}", "", glyph, node.label, indent = depth * 2)?;

            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }

        Ok(())
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}
