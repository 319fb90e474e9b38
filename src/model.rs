pub mod tree;
pub mod propagate;
pub mod versioned;
pub mod selection;
pub mod description;

pub use propagate::NodeChange;
pub use propagate::Propagator;
pub use selection::Selection;
pub use tree::NodeId;
pub use tree::State;
pub use tree::Tree;
