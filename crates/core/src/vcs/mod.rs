//! Version-control collaborator used to produce both sides of a conflicted
//! file and to mark it resolved.

pub mod git;

use std::path::Path;

use crate::errors::VcsError;

pub use git::GitCli;

/// The three operations a merge session needs from the VCS.
pub trait Vcs {
    /// Replace the working copy of `path` with our version.
    fn checkout_ours(&self, path: &Path) -> Result<(), VcsError>;

    /// Replace the working copy of `path` with their version.
    fn checkout_theirs(&self, path: &Path) -> Result<(), VcsError>;

    /// Record `path` as resolved.
    fn mark_as_merged(&self, path: &Path) -> Result<(), VcsError>;
}
