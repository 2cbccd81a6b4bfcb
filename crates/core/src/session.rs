//! Merge session lifecycle.
//!
//! A [`MergeSession`] ties one conflicted file to a [`MergeEngine`]:
//!
//! 1. Check out our version of the file and produce their version beside it
//!    (`Name--THEIRS.ext`).
//! 2. Load both, absorb theirs into the live scene, and diff.
//! 3. Let the caller resolve conflicts.
//! 4. Complete (save the merged scene and mark the file resolved) or abort
//!    (restore and save our version).
//!
//! The [`MergeController`] holds at most one session at a time and turns
//! every session-level event into exactly one [`Notice`].

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::action::{MergeAction, Resolution};
use crate::diff::MergeMode;
use crate::engine::{Cleanup, MergeEngine};
use crate::errors::SessionError;
use crate::graph::SceneStore;
use crate::vcs::Vcs;

// ---------------------------------------------------------------------------
// Shadow files
// ---------------------------------------------------------------------------

/// `dir/Name.ext` -> `dir/Name--TAG.ext`.
pub fn shadow_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}--{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}--{}", stem, tag),
    };
    path.with_file_name(name)
}

/// Leave our version at `path` and their version in a shadow file beside
/// it, whose path is returned.
fn checkout_their_version(vcs: &dyn Vcs, path: &Path) -> Result<PathBuf, SessionError> {
    let ours_copy = shadow_path(path, "OURS");
    let theirs_copy = shadow_path(path, "THEIRS");

    std::fs::copy(path, &ours_copy)?;
    if let Err(e) = vcs.checkout_theirs(path) {
        if let Err(cleanup) = std::fs::remove_file(&ours_copy) {
            warn!(path = %ours_copy.display(), error = %cleanup, "failed to remove shadow file");
        }
        return Err(e.into());
    }
    std::fs::rename(path, &theirs_copy)?;
    std::fs::rename(&ours_copy, path)?;

    debug!(theirs = %theirs_copy.display(), "their version checked out");
    Ok(theirs_copy)
}

fn remove_shadow(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove shadow file");
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// What to merge and how.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub path: PathBuf,
    pub mode: MergeMode,
    pub automerge: bool,
    /// Whether the caller holds unsaved changes to the file.
    pub scene_dirty: bool,
}

impl SessionRequest {
    pub fn new(path: impl Into<PathBuf>, mode: MergeMode) -> Self {
        Self {
            path: path.into(),
            mode,
            automerge: true,
            scene_dirty: false,
        }
    }
}

/// Result of starting a session.
pub enum Begin {
    Started(MergeSession),
    /// The two versions do not disagree; nothing to resolve.
    NoConflicts,
}

pub struct MergeSession {
    id: Uuid,
    path: PathBuf,
    started_at: DateTime<Utc>,
    engine: MergeEngine,
}

impl MergeSession {
    /// Prepare both versions of `request.path` and diff them.
    #[instrument(skip(vcs, store), fields(path = %request.path.display(), mode = %request.mode))]
    pub fn begin(
        vcs: &dyn Vcs,
        store: &dyn SceneStore,
        request: &SessionRequest,
    ) -> Result<Begin, SessionError> {
        if request.scene_dirty {
            return Err(SessionError::DirtyScene);
        }
        let path = request.path.as_path();

        vcs.checkout_ours(path)?;
        let theirs_path = checkout_their_version(vcs, path)?;

        let loaded = store
            .load(path)
            .and_then(|ours| store.load(&theirs_path).map(|theirs| (ours, theirs)));
        remove_shadow(&theirs_path);
        let (ours, theirs) = loaded?;

        let mut engine = MergeEngine::new(ours, request.mode);
        engine.absorb_theirs(theirs)?;
        let count = engine.detect(request.automerge);

        if count == 0 {
            info!("no conflicts found");
            return Ok(Begin::NoConflicts);
        }

        let session = Self {
            id: Uuid::new_v4(),
            path: request.path.clone(),
            started_at: Utc::now(),
            engine,
        };
        info!(session = %session.id, conflicts = count, "merge session started");
        Ok(Begin::Started(session))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MergeEngine {
        &mut self.engine
    }

    pub fn is_complete(&self) -> bool {
        self.engine.is_complete()
    }

    /// Fail unless every conflict is resolved.
    pub fn ensure_resolved(&self) -> Result<(), SessionError> {
        match self.engine.unresolved_count() {
            0 => Ok(()),
            n => Err(SessionError::Unresolved(n)),
        }
    }

    /// Finalize the merge, save the result over the file, and mark it
    /// resolved.
    ///
    /// The finalized result is built on a copy of the engine. If saving or
    /// marking fails the session is left untouched, so it can still be
    /// aborted.
    pub fn complete(
        &mut self,
        vcs: &dyn Vcs,
        store: &dyn SceneStore,
    ) -> Result<MergeReport, SessionError> {
        self.ensure_resolved()?;
        let summaries = summarize(self.engine.actions());
        let mut merged = self.engine.clone();
        let cleanup = merged.finalize();

        store.save(merged.scene(), &self.path)?;
        vcs.mark_as_merged(&self.path)?;
        self.engine = merged;

        info!(session = %self.id, path = %self.path.display(), "merge completed");
        Ok(self.report(SessionOutcome::Completed, summaries, cleanup))
    }

    /// Restore our version of every conflict and save it over the file.
    pub fn abort(
        mut self,
        store: &dyn SceneStore,
        outcome: SessionOutcome,
    ) -> Result<MergeReport, SessionError> {
        let cleanup = self.engine.abort();
        store.save(self.engine.scene(), &self.path)?;
        info!(session = %self.id, path = %self.path.display(), %outcome, "merge aborted");
        Ok(self.report(outcome, Vec::new(), cleanup))
    }

    fn report(&self, outcome: SessionOutcome, actions: Vec<ActionSummary>, cleanup: Cleanup) -> MergeReport {
        MergeReport {
            session_id: self.id,
            path: self.path.display().to_string(),
            mode: self.engine.mode(),
            outcome,
            started_at: self.started_at,
            finished_at: Utc::now(),
            actions,
            discarded: cleanup.discarded,
            theirs_destroyed: cleanup.theirs_destroyed,
            copies_destroyed: cleanup.copies_destroyed,
        }
    }
}

fn summarize(actions: &[MergeAction]) -> Vec<ActionSummary> {
    actions
        .iter()
        .map(|a| ActionSummary {
            label: a.label().to_string(),
            kind: a.kind.name().to_string(),
            resolution: a.resolution(),
            automatic: a.automatic(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Aborted,
    /// Aborted because the host left a state where the scene may be edited.
    ForcedAbort,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::ForcedAbort => write!(f, "forced_abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub label: String,
    pub kind: String,
    pub resolution: Resolution,
    pub automatic: bool,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub session_id: Uuid,
    pub path: String,
    pub mode: MergeMode,
    pub outcome: SessionOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Final state of every conflict. Empty for aborted sessions.
    pub actions: Vec<ActionSummary>,
    pub discarded: usize,
    pub theirs_destroyed: usize,
    pub copies_destroyed: usize,
}

impl MergeReport {
    pub fn count(&self, resolution: Resolution) -> usize {
        self.actions.iter().filter(|a| a.resolution == resolution).count()
    }

    pub fn automatic_count(&self) -> usize {
        self.actions.iter().filter(|a| a.automatic).count()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// State of the host application that owns the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Editing,
    Compiling,
    EnteringPlayMode,
    Playing,
}

impl HostState {
    /// Whether the live scene may still be edited by a merge.
    pub fn allows_merge(self) -> bool {
        self == Self::Editing
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Editing => write!(f, "editing"),
            Self::Compiling => write!(f, "compiling"),
            Self::EnteringPlayMode => write!(f, "entering play mode"),
            Self::Playing => write!(f, "playing"),
        }
    }
}

/// One user-facing message per session-level event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Notice {
    StartFailed(String),
    NoConflicts(MergeMode),
    Started { conflicts: usize },
    Completed(MergeMode),
    CompleteFailed(String),
    Aborted,
    ForcedAbort(HostState),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFailed(e) => write!(f, "Merge could not start: {}", e),
            Self::NoConflicts(mode) => write!(f, "No conflict found for this {}.", mode),
            Self::Started { conflicts } => write!(f, "Merge started with {} conflict(s).", conflicts),
            Self::Completed(MergeMode::Scene) => write!(f, "Scene successfully merged."),
            Self::Completed(MergeMode::Prefab) => write!(f, "Prefab successfully merged."),
            Self::CompleteFailed(e) => write!(f, "Merge could not be completed: {}", e),
            Self::Aborted => write!(f, "Merge aborted."),
            Self::ForcedAbort(state) => {
                write!(f, "Aborting merge due to editor state change ({}).", state)
            }
        }
    }
}

/// Owns the VCS, the scene store, and at most one running session.
pub struct MergeController<V: Vcs, S: SceneStore> {
    vcs: V,
    store: S,
    session: Option<MergeSession>,
    notices: Vec<Notice>,
}

impl<V: Vcs, S: SceneStore> MergeController<V, S> {
    pub fn new(vcs: V, store: S) -> Self {
        Self {
            vcs,
            store,
            session: None,
            notices: Vec::new(),
        }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session(&self) -> Option<&MergeSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut MergeSession> {
        self.session.as_mut()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Start a session. Returns whether one is now running.
    pub fn start(&mut self, request: &SessionRequest) -> Result<bool, SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyRunning(request.path.display().to_string()));
        }
        match MergeSession::begin(&self.vcs, &self.store, request) {
            Ok(Begin::Started(session)) => {
                self.notices.push(Notice::Started {
                    conflicts: session.engine().actions().len(),
                });
                self.session = Some(session);
                Ok(true)
            }
            Ok(Begin::NoConflicts) => {
                self.notices.push(Notice::NoConflicts(request.mode));
                Ok(false)
            }
            Err(e) => {
                self.notices.push(Notice::StartFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Complete the running session. Unresolved conflicts keep it running.
    /// Any other failure aborts the session, restoring our version of the
    /// file.
    pub fn complete(&mut self) -> Result<MergeReport, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotRunning)?;
        session.ensure_resolved()?;
        let mode = session.engine().mode();
        match session.complete(&self.vcs, &self.store) {
            Ok(report) => {
                self.session = None;
                self.notices.push(Notice::Completed(mode));
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "failed to complete merge, aborting");
                if let Some(session) = self.session.take() {
                    if let Err(abort) = session.abort(&self.store, SessionOutcome::Aborted) {
                        warn!(error = %abort, "failed to abort merge");
                    }
                }
                self.notices.push(Notice::CompleteFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Abort the running session on the user's request.
    pub fn abort(&mut self) -> Result<MergeReport, SessionError> {
        let session = self.session.take().ok_or(SessionError::NotRunning)?;
        let report = session.abort(&self.store, SessionOutcome::Aborted);
        self.notices.push(Notice::Aborted);
        report
    }

    /// React to a host state change. A running session is aborted when the
    /// host leaves the editing state.
    pub fn host_state_changed(&mut self, state: HostState) -> Option<Result<MergeReport, SessionError>> {
        if state.allows_merge() {
            return None;
        }
        let session = self.session.take()?;
        warn!(%state, session = %session.id(), "host state changed during merge, aborting");
        let report = session.abort(&self.store, SessionOutcome::ForcedAbort);
        self.notices.push(Notice::ForcedAbort(state));
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_path() {
        assert_eq!(
            shadow_path(Path::new("Assets/Scenes/Main.unity"), "THEIRS"),
            PathBuf::from("Assets/Scenes/Main--THEIRS.unity")
        );
        assert_eq!(
            shadow_path(Path::new("Level"), "OURS"),
            PathBuf::from("Level--OURS")
        );
    }

    #[test]
    fn test_host_state() {
        assert!(HostState::Editing.allows_merge());
        assert!(!HostState::Compiling.allows_merge());
        assert!(!HostState::EnteringPlayMode.allows_merge());
    }

    #[test]
    fn test_notice_text() {
        assert_eq!(
            Notice::NoConflicts(MergeMode::Scene).to_string(),
            "No conflict found for this scene."
        );
        assert_eq!(
            Notice::Completed(MergeMode::Prefab).to_string(),
            "Prefab successfully merged."
        );
        assert_eq!(
            Notice::ForcedAbort(HostState::Compiling).to_string(),
            "Aborting merge due to editor state change (compiling)."
        );
    }

    #[test]
    fn test_request_defaults() {
        let request = SessionRequest::new("Main.unity", MergeMode::Scene);
        assert!(request.automerge);
        assert!(!request.scene_dirty);
    }
}
