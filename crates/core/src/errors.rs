//! Error types for the SceneMerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::graph::{FieldKind, ObjectRef};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

// ---------------------------------------------------------------------------
// VCS errors
// ---------------------------------------------------------------------------

/// Errors from the version-control shell-out.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The VCS executable could not be located or launched.
    #[error("VCS unavailable: could not launch '{0}'")]
    Unavailable(String),

    /// A VCS command exited with a non-zero status.
    #[error("{program} command failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    /// The path handed to the VCS has no usable file name or parent folder.
    #[error("invalid path for VCS operation: {0}")]
    InvalidPath(String),

    /// Generic I/O wrapper.
    #[error("VCS I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

/// Errors from loading, saving, or addressing the live object graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A snapshot file could not be found.
    #[error("scene file not found: {0}")]
    FileNotFound(String),

    /// A snapshot file could not be parsed.
    #[error("failed to parse scene snapshot '{path}': {detail}")]
    ParseError { path: String, detail: String },

    /// A snapshot refers to a node or component index that does not exist.
    #[error("scene snapshot references missing {entity} #{index}")]
    DanglingIndex { entity: &'static str, index: usize },

    /// A handle does not name a live object in the scene.
    #[error("object {0} is not part of the live scene")]
    MissingObject(ObjectRef),

    /// Re-parenting would make a node its own ancestor.
    #[error("cannot parent {child} under {parent}: it would create a cycle")]
    CyclicParent { child: ObjectRef, parent: ObjectRef },

    /// Serialization failure while saving.
    #[error("failed to serialize scene: {0}")]
    SerializeError(String),

    /// Generic I/O error.
    #[error("scene I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Field errors
// ---------------------------------------------------------------------------

/// Errors from reading or writing serialized fields.
#[derive(Debug, Error)]
pub enum FieldError {
    /// The field path does not resolve to a field on the object.
    #[error("no field at '{path}' on {owner}")]
    NoSuchField { owner: ObjectRef, path: String },

    /// The written value does not conform to the declared field kind.
    #[error("cannot write a {actual} value into {expected} field '{path}'")]
    KindMismatch {
        path: String,
        expected: FieldKind,
        actual: FieldKind,
    },

    /// The owning object is gone.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Action errors
// ---------------------------------------------------------------------------

/// Errors raised while applying one side of a conflict.
///
/// These never escalate past the action boundary: the action simply stays in
/// its previous state.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The user declined an operation that needed confirmation.
    #[error("user abort: {0}")]
    UserAbort(String),

    /// The requested resolution does not exist for this kind of conflict.
    #[error("action {id} does not support {operation}")]
    NotApplicable { id: usize, operation: &'static str },

    /// A field read or write failed.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// An object the action depends on is gone.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The action id is unknown to the engine.
    #[error("unknown action id {0}")]
    UnknownAction(usize),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors from starting, completing, or aborting a merge session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The VCS could not provide the other side of the file.
    #[error("merge could not start: {0}")]
    Vcs(#[from] VcsError),

    /// The scene could not be loaded or saved.
    #[error("merge scene error: {0}")]
    Graph(#[from] GraphError),

    /// The live scene has unsaved changes.
    #[error("please make sure there are no unsaved changes before attempting to merge")]
    DirtyScene,

    /// A merge session is already running.
    #[error("a merge is already in progress for '{0}'")]
    AlreadyRunning(String),

    /// No merge session is running.
    #[error("no merge in progress")]
    NotRunning,

    /// Completion was requested while conflicts remain open.
    #[error("{0} conflict(s) are still unresolved")]
    Unresolved(usize),

    /// File shuffling around the shadow copy failed.
    #[error("merge file I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// TOML serialization error.
    #[error("configuration serialize error: {0}")]
    SerializeError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Filter errors
// ---------------------------------------------------------------------------

/// Errors from the conflict filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The filter expression is not a valid regular expression.
    #[error("invalid filter expression '{expression}': {detail}")]
    InvalidRegex { expression: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;

    #[test]
    fn test_error_display_messages() {
        let err = VcsError::Unavailable("/usr/bin/git".into());
        assert_eq!(
            err.to_string(),
            "VCS unavailable: could not launch '/usr/bin/git'"
        );

        let err = SessionError::Unresolved(3);
        assert_eq!(err.to_string(), "3 conflict(s) are still unresolved");

        let err = FieldError::KindMismatch {
            path: "m_Speed".into(),
            expected: FieldKind::Float,
            actual: FieldKind::String,
        };
        assert!(err.to_string().contains("m_Speed"));

        let err = ActionError::UserAbort("parent missing".into());
        assert!(err.to_string().starts_with("user abort"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err: CoreError = VcsError::Unavailable("git".into()).into();
        assert!(matches!(err, CoreError::Vcs(_)));

        let err: CoreError = GraphError::MissingObject(ObjectRef::Node(NodeId(4))).into();
        assert!(matches!(err, CoreError::Graph(_)));
    }
}
