use thiserror::Error;

/// Errors raised while building a tree or growing the subtree instance stack.
///
/// Flow failures at runtime are never errors; they surface as [`crate::BtNodeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BtError {
    #[error("composite `{0}` has no children")]
    EmptyComposite(String),

    #[error("parallel `{name}` is malformed: {reason}")]
    InvalidParallel { name: String, reason: &'static str },

    #[error("decorator `{decorator}` cannot use abort mode {mode:?} under a {parent:?} composite")]
    UnsupportedAbortMode {
        decorator: String,
        mode: crate::FlowAbortMode,
        parent: crate::CompositeKind,
    },

    #[error("tree `{0}` has more nodes than an execution index can address")]
    TooManyNodes(String),

    #[error("subtree `{0}` cannot be pushed here")]
    SubtreeNotAllowed(String),

    #[error("instance stack is full ({0} instances)")]
    TooManyInstances(usize),
}

pub type Result<T> = std::result::Result<T, BtError>;
