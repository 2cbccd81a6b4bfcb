//! SceneMerge core library.
//!
//! This crate provides the components for structured merging of scene and
//! prefab object graphs: the live scene arena and its field walker, stable
//! object identity, the object registry, difference detection, resolvable
//! merge actions, the merge engine, session lifecycle, the git client, and
//! configuration.

pub mod action;
pub mod config;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod identity;
pub mod registry;
pub mod session;
pub mod vcs;

// Re-exports for convenience.
pub use action::{ActionId, Confirmation, MergeAction, Resolution, ResolveOutcome, Side};
pub use config::MergeConfig;
pub use diff::MergeMode;
pub use engine::MergeEngine;
pub use errors::CoreError;
pub use graph::{JsonSceneStore, Scene, SceneStore};
pub use session::{MergeController, MergeSession, SessionRequest};
pub use vcs::{GitCli, Vcs};
