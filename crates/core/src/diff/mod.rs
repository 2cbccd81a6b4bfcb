//! Difference detection between our and their graph.

pub mod detector;
pub mod differ;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use detector::{fields_differ, layouts_match, values_differ};
pub use differ::{describe_value, DiffOutput, GraphDiffer};

/// What kind of file is being merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Scene,
    /// Node names are not compared: a prefab's root takes its name from the
    /// file it lives in.
    Prefab,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scene => write!(f, "scene"),
            Self::Prefab => write!(f, "prefab"),
        }
    }
}
