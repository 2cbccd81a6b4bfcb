//! Filtering of node groups by name and merge state.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::{MergeAction, NodeMergeActions};
use crate::errors::FilterError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Show groups whose name matches.
    #[default]
    Inclusion,
    /// Show groups whose name does not match.
    Exclusion,
}

/// Which merge states pass the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMask {
    /// Groups with unresolved actions.
    #[serde(default = "default_true")]
    pub conflict: bool,
    /// Fully merged groups.
    #[serde(default = "default_true")]
    pub done: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StateMask {
    fn default() -> Self {
        Self {
            conflict: true,
            done: true,
        }
    }
}

/// Persistable filter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub expression: String,
    /// Treat `expression` as a regular expression instead of a substring.
    #[serde(default)]
    pub regex: bool,
    /// Only meaningful for substring matching.
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(default)]
    pub state: StateMask,
}

/// A compiled [`FilterSettings`].
#[derive(Debug, Clone, Default)]
pub struct MergeFilter {
    settings: FilterSettings,
    regex: Option<Regex>,
}

impl MergeFilter {
    pub fn new(settings: FilterSettings) -> Result<Self, FilterError> {
        let regex = if settings.regex {
            Some(
                Regex::new(&settings.expression).map_err(|e| FilterError::InvalidRegex {
                    expression: settings.expression.clone(),
                    detail: e.to_string(),
                })?,
            )
        } else {
            None
        };
        Ok(Self { settings, regex })
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Whether a group with this name and merge state is shown.
    pub fn is_passing(&self, name: &str, merged: bool) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let matches = match &self.regex {
            Some(regex) => regex.is_match(name),
            None if self.settings.case_sensitive => name.contains(&self.settings.expression),
            None => name
                .to_lowercase()
                .contains(&self.settings.expression.to_lowercase()),
        };
        let name_passes = match self.settings.mode {
            FilterMode::Inclusion => matches,
            FilterMode::Exclusion => !matches,
        };

        let state = self.settings.state;
        let state_passes = (state.conflict && !merged) || (state.done && merged);

        name_passes && state_passes
    }

    pub fn is_group_passing(&self, group: &NodeMergeActions, actions: &[MergeAction]) -> bool {
        self.is_passing(&group.name, group.merged(actions))
    }
}
