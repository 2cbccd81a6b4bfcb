//! SceneMerge command-line merge tool.
//!
//! Provides subcommands for listing the conflicts between two scene
//! snapshots, merging a conflicted file in a git working copy (interactively
//! or by policy), and generating / validating configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::{Confirm, Input, Select};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use scenemerge_core::action::{
    ActionKind, Confirmation, FilterSettings, MergeFilter, ResolveOutcome, Side,
};
use scenemerge_core::config::MergeConfig;
use scenemerge_core::diff::MergeMode;
use scenemerge_core::engine::MergeEngine;
use scenemerge_core::graph::{JsonSceneStore, SceneStore, Value};
use scenemerge_core::session::{MergeController, MergeReport, Notice, SessionRequest};
use scenemerge_core::vcs::GitCli;
use scenemerge_core::ActionId;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// SceneMerge command-line merge tool.
#[derive(Parser, Debug)]
#[command(
    name = "scenemerge",
    version,
    about = "Merge conflicting versions of scene and prefab files object by object"
)]
struct Cli {
    /// Path to the TOML configuration file
    /// (default: <config dir>/scenemerge/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the conflicts between two scene snapshots.
    Diff {
        /// Our version.
        #[arg(long)]
        ours: PathBuf,

        /// Their version.
        #[arg(long)]
        theirs: PathBuf,

        /// Treat the files as prefabs (node names are not compared).
        #[arg(long)]
        prefab: bool,

        /// Only show groups whose name matches this expression.
        #[arg(short, long)]
        filter: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Merge a conflicted file in a git working copy.
    Merge(MergeArgs),

    /// Generate a default configuration file.
    Init {
        /// Output path (default: the configuration path).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(clap::Args, Debug)]
struct MergeArgs {
    /// The conflicted file.
    path: PathBuf,

    /// Treat the file as a prefab (node names are not compared).
    #[arg(long)]
    prefab: bool,

    /// How to resolve conflicts.
    #[arg(long, value_enum, default_value_t = Accept::Interactive)]
    accept: Accept,

    /// Do not auto-resolve node and component existence conflicts.
    #[arg(long)]
    no_automerge: bool,

    /// Only visit groups whose name matches this expression.
    #[arg(short, long)]
    filter: Option<String>,

    /// Write a JSON report of the finished session to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Accept {
    Ours,
    Theirs,
    Interactive,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path);

    let level = config
        .as_ref()
        .map(|c| c.log.level.clone())
        .unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match run(cli, &config_path, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config_path: &Path, config: Result<MergeConfig>) -> Result<()> {
    match cli.command {
        Commands::Init { output, force } => {
            cmd_init(output.as_deref().unwrap_or(config_path), force)
        }
        Commands::Validate => cmd_validate(config_path),
        Commands::Diff {
            ours,
            theirs,
            prefab,
            filter,
            json,
        } => cmd_diff(&config?, &ours, &theirs, mode_for(prefab), filter.as_deref(), json),
        Commands::Merge(args) => cmd_merge(&config?, args),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    dirs::config_dir()
        .map(|d| d.join("scenemerge").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("scenemerge.toml"))
}

/// Load the configuration, falling back to defaults when the file does not
/// exist.
fn load_config(path: &Path) -> Result<MergeConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        let mut config = MergeConfig::default();
        config
            .resolve_env_vars()
            .context("failed to resolve environment variables")?;
        return Ok(config);
    }
    MergeConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn mode_for(prefab: bool) -> MergeMode {
    if prefab {
        MergeMode::Prefab
    } else {
        MergeMode::Scene
    }
}

/// The configured filter, with `expression` (if given) replacing its
/// expression and enabling it.
fn build_filter(config: &MergeConfig, expression: Option<&str>) -> Result<MergeFilter> {
    let mut settings: FilterSettings = config.filter.clone();
    if let Some(expression) = expression {
        settings.enabled = true;
        settings.expression = expression.to_string();
    }
    MergeFilter::new(settings).context("invalid filter")
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "file already exists: {}. Use --force or a different path.",
            output.display()
        );
    }

    MergeConfig::default()
        .save_to_file(output)
        .context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Point vcs.git_path at your git executable (or set vcs.git_path_env)");
    println!("  2. Validate with: scenemerge validate --config {}", output.display());
    println!("  3. Merge a conflicted file: scenemerge merge Assets/Scenes/Main.unity");

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        MergeConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let mut config = config;
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Automerge     : {}", config.merge.automerge);
    println!("  Missing parent: {:?}", config.merge.missing_parent);
    println!(
        "  Git executable: {}{}",
        config.vcs.git_path.display(),
        if config.vcs.git_path.exists() {
            ""
        } else {
            " (NOT FOUND)"
        }
    );
    println!("  Log level     : {}", config.log.level);
    println!(
        "  Filter        : {}",
        if config.filter.enabled {
            config.filter.expression.as_str()
        } else {
            "disabled"
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_diff(
    config: &MergeConfig,
    ours: &Path,
    theirs: &Path,
    mode: MergeMode,
    filter: Option<&str>,
    json: bool,
) -> Result<()> {
    let filter = build_filter(config, filter)?;
    let store = JsonSceneStore;
    let our_scene = store
        .load(ours)
        .with_context(|| format!("failed to load {}", ours.display()))?;
    let their_scene = store
        .load(theirs)
        .with_context(|| format!("failed to load {}", theirs.display()))?;

    let mut engine = MergeEngine::new(our_scene, mode);
    engine
        .absorb_theirs(their_scene)
        .context("failed to combine scenes")?;
    engine.detect(false);

    if json {
        let groups: Vec<serde_json::Value> = engine
            .groups()
            .iter()
            .filter(|g| filter.is_group_passing(g, engine.actions()))
            .map(|g| {
                let actions: Vec<serde_json::Value> = g
                    .actions
                    .iter()
                    .filter_map(|&id| engine.action(id))
                    .map(|a| {
                        serde_json::json!({
                            "id": a.id,
                            "kind": a.kind.name(),
                            "label": a.label(),
                            "ours": a.ours_display(),
                            "theirs": a.theirs_display(),
                        })
                    })
                    .collect();
                serde_json::json!({ "group": g.name, "actions": actions })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&groups).context("failed to serialize conflicts")?
        );
        return Ok(());
    }

    if engine.actions().is_empty() {
        println!("{}", style::success(&format!("No conflict found for this {}.", mode)));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Group", "Kind", "Conflict", "Ours", "Theirs"]);

    let mut shown = 0;
    for group in engine.groups() {
        if !filter.is_group_passing(group, engine.actions()) {
            continue;
        }
        for action in group.actions.iter().filter_map(|&id| engine.action(id)) {
            table.add_row(vec![
                Cell::new(action.id),
                Cell::new(truncate(&group.name, 40)),
                Cell::new(action.kind.name()),
                Cell::new(action.label()),
                Cell::new(truncate(action.ours_display(), 30)),
                Cell::new(truncate(action.theirs_display(), 30)),
            ]);
            shown += 1;
        }
    }

    println!();
    println!("{}", style::header(&format!("Conflicts ({})", engine.actions().len())));
    println!();
    println!("{}", table);
    if shown < engine.actions().len() {
        println!("{}", style::dim(&format!("{} hidden by the filter", engine.actions().len() - shown)));
    }
    println!();

    Ok(())
}

fn cmd_merge(config: &MergeConfig, args: MergeArgs) -> Result<()> {
    let mode = mode_for(args.prefab);
    let filter = build_filter(config, args.filter.as_deref())?;
    let mut request = SessionRequest::new(&args.path, mode);
    request.automerge = config.merge.automerge && !args.no_automerge;

    let mut controller = MergeController::new(GitCli::new(&config.vcs.git_path), JsonSceneStore);
    let started = controller.start(&request);
    print_notices(&mut controller);
    if !started.context("failed to start merge")? {
        return Ok(());
    }

    let confirmation = config.merge.missing_parent.confirmation();
    let keep = {
        let engine = controller
            .session_mut()
            .context("no merge in progress")?
            .engine_mut();
        match args.accept {
            Accept::Ours => resolve_all(engine, Side::Ours, confirmation)?,
            Accept::Theirs => resolve_all(engine, Side::Theirs, confirmation)?,
            Accept::Interactive => resolve_interactively(engine, &filter, confirmation)?,
        }
    };

    let unresolved = controller
        .session()
        .map(|s| s.engine().unresolved_count())
        .unwrap_or(0);
    let report = if keep && unresolved == 0 {
        controller.complete().context("failed to complete merge")?
    } else {
        if keep {
            println!(
                "{}",
                style::warn(&format!("{} conflict(s) left unresolved, aborting", unresolved))
            );
        }
        controller.abort().context("failed to abort merge")?
    };
    print_notices(&mut controller);
    print_report(&report);

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("{}", style::dim(&format!("Report written to {}", path.display())));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve everything by policy. These resolutions are reported as
/// automatic.
fn resolve_all(engine: &mut MergeEngine, side: Side, confirmation: Confirmation) -> Result<bool> {
    engine.set_interactive(false);
    let outcomes = engine.resolve_remaining(side, confirmation);
    engine.set_interactive(true);
    for (id, outcome) in outcomes {
        settle(engine, id, side, outcome)?;
    }
    Ok(true)
}

/// Walk the filtered groups and ask for each open conflict. Returns false
/// if the user chose to abort.
fn resolve_interactively(
    engine: &mut MergeEngine,
    filter: &MergeFilter,
    confirmation: Confirmation,
) -> Result<bool> {
    for index in 0..engine.groups().len() {
        let group = &engine.groups()[index];
        if !filter.is_group_passing(group, engine.actions()) || group.merged(engine.actions()) {
            continue;
        }
        let name = group.name.clone();
        let ids = group.actions.clone();

        println!();
        println!("{}", style::header(&name));

        for id in ids {
            let Some(action) = engine.action(id) else { continue };
            if action.merged() {
                continue;
            }
            let is_change = matches!(action.kind, ActionKind::ChangeValue { .. });
            println!("  {} {}", style::state(false), action.label());
            println!("      ours  : {}", style::ours(action.ours_display()));
            println!("      theirs: {}", style::theirs(action.theirs_display()));

            let mut items = vec!["Use ours", "Use theirs"];
            if is_change {
                items.push("Enter a new value");
            }
            items.push("Skip");
            items.push("Abort merge");

            let choice = Select::new()
                .with_prompt(action.label())
                .items(&items)
                .default(0)
                .interact()
                .context("failed to read choice")?;

            match items[choice] {
                "Use ours" => {
                    let outcome = engine.resolve(id, Side::Ours, confirmation);
                    settle(engine, id, Side::Ours, outcome)?;
                }
                "Use theirs" => {
                    let outcome = engine.resolve(id, Side::Theirs, confirmation);
                    settle(engine, id, Side::Theirs, outcome)?;
                }
                "Enter a new value" => {
                    let text: String = Input::new()
                        .with_prompt(r#"New value as JSON (e.g. {"float": 2.5})"#)
                        .interact_text()
                        .context("failed to read value")?;
                    match serde_json::from_str::<Value>(&text) {
                        Ok(value) => {
                            let outcome = engine.resolve_new(id, value);
                            settle(engine, id, Side::Ours, outcome)?;
                        }
                        Err(e) => println!("{}", style::error(&format!("not a value: {}", e))),
                    }
                }
                "Abort merge" => return Ok(false),
                _ => {}
            }
        }
    }
    Ok(true)
}

/// Report an outcome, asking for confirmation when the engine needs it.
fn settle(engine: &mut MergeEngine, id: ActionId, side: Side, outcome: ResolveOutcome) -> Result<()> {
    let outcome = match outcome {
        ResolveOutcome::NeedsConfirmation(prompt) => {
            let granted = Confirm::new()
                .with_prompt(prompt.to_string())
                .default(true)
                .interact()
                .context("failed to read confirmation")?;
            let answer = if granted {
                Confirmation::Granted
            } else {
                Confirmation::Denied
            };
            engine.resolve(id, side, answer)
        }
        other => other,
    };

    let label = engine
        .action(id)
        .map(|a| a.label().to_string())
        .unwrap_or_default();
    match outcome {
        ResolveOutcome::Resolved(_) | ResolveOutcome::NeedsConfirmation(_) => {}
        ResolveOutcome::Declined(e) => {
            println!("{}", style::warn(&format!("{} left unresolved: {}", label, e)));
        }
        ResolveOutcome::Failed(e) => {
            println!("{}", style::error(&format!("{} could not be applied: {}", label, e)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_notices<V, S>(controller: &mut MergeController<V, S>)
where
    V: scenemerge_core::vcs::Vcs,
    S: SceneStore,
{
    for notice in controller.take_notices() {
        let line = match notice {
            Notice::StartFailed(_) | Notice::CompleteFailed(_) => style::error(&notice.to_string()),
            Notice::ForcedAbort(_) | Notice::Aborted => style::warn(&notice.to_string()),
            _ => style::success(&notice.to_string()),
        };
        println!("{}", line);
    }
}

fn print_report(report: &MergeReport) {
    use scenemerge_core::Resolution;

    println!();
    println!("{}", style::header(&format!("Merge {} ({})", report.outcome, report.path)));
    println!("  Session   : {}", report.session_id);
    println!("  Started   : {}", report.started_at);
    println!("  Finished  : {}", report.finished_at);
    if !report.actions.is_empty() {
        println!(
            "  Resolved  : {} ours, {} theirs, {} new ({} automatic)",
            report.count(Resolution::UsingOurs),
            report.count(Resolution::UsingTheirs),
            report.count(Resolution::UsingNew),
            report.automatic_count()
        );
    }
    println!(
        "  Cleaned up: {} discarded, {} copies, {} of theirs",
        report.discarded, report.copies_destroyed, report.theirs_destroyed
    );
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Your[Level/Enemy]", 10), "Your[Le...");
    }

    #[test]
    fn test_build_filter_override() {
        let config = MergeConfig::default();
        let filter = build_filter(&config, Some("enemy")).unwrap();
        assert!(filter.settings().enabled);
        assert!(filter.is_passing("Your[Enemy]", false));
        assert!(!filter.is_passing("Your[Player]", false));
        assert!(build_filter(&config, None).unwrap().is_passing("anything", true));
    }

    #[test]
    fn test_resolve_all_marks_resolutions_automatic() {
        use scenemerge_core::graph::{Field, PersistedId, Scene};
        use scenemerge_core::Resolution;

        let build = |speed: f32| {
            let mut scene = Scene::new();
            let player = scene.add_node("Player", None).unwrap();
            scene
                .set_persisted(player.into(), PersistedId { file_id: 1, prefab_id: 0 })
                .unwrap();
            let mover = scene.add_component(player, "Mover").unwrap();
            scene
                .set_persisted(mover.into(), PersistedId { file_id: 2, prefab_id: 0 })
                .unwrap();
            scene
                .push_field(mover.into(), Field::new("m_Speed", Value::Float(speed)))
                .unwrap();
            scene
        };
        let mut engine = MergeEngine::new(build(5.0), MergeMode::Scene);
        engine.absorb_theirs(build(9.0)).unwrap();
        assert_eq!(engine.detect(false), 1);

        assert!(resolve_all(&mut engine, Side::Theirs, Confirmation::Denied).unwrap());
        let action = &engine.actions()[0];
        assert_eq!(action.resolution(), Resolution::UsingTheirs);
        assert!(action.automatic());
        assert!(engine.is_interactive());
    }

    #[test]
    fn test_cli_parses_merge() {
        let cli = Cli::parse_from(["scenemerge", "merge", "Main.unity", "--accept", "theirs", "--prefab"]);
        match cli.command {
            Commands::Merge(args) => {
                assert_eq!(args.accept, Accept::Theirs);
                assert!(args.prefab);
                assert_eq!(args.path, PathBuf::from("Main.unity"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
