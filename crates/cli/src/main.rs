//! lws command-line tool.
//!
//! Provides subcommands for generating and validating configuration,
//! running three-way merges, checking which auto-resolve rules a change
//! summary satisfies, reconciling pending changes with a changeset, and
//! listing the local version table.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use lws_core::config::AppConfig;
use lws_core::conflict::{AutoResolveOptions, ChangeSummary, MergeSummary, ThreeWayMerge};
use lws_core::models::{Changeset, PendingChange};
use lws_core::{reconcile, Database, LocalWorkspace, VersionRecord};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// lws command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "lws",
    version,
    about = "Inspect and drive a local workspace: merges, auto-resolve rules, reconciliation"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./lws.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./lws.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Three-way merge a base, local and latest file.
    Merge {
        base: PathBuf,
        local: PathBuf,
        latest: PathBuf,

        /// Write the merged content here instead of to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the change to the local file as a unified diff.
        #[arg(long)]
        patch: bool,
    },

    /// Show which auto-resolve rules a change summary satisfies.
    Policy {
        #[arg(long, default_value = "0")]
        conflicting: usize,
        #[arg(long, default_value = "0")]
        latest: usize,
        #[arg(long, default_value = "0")]
        modified: usize,
        #[arg(long, default_value = "0")]
        conflict: usize,
    },

    /// List the pending changes a committed changeset completes.
    Reconcile {
        /// Changeset as JSON.
        changeset: PathBuf,
        /// Pending changes as a JSON array.
        pending: PathBuf,

        /// Also move the matching local versions to the changeset.
        #[arg(long)]
        apply: bool,
    },

    /// List the local version table.
    Versions,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = AppConfig::load_from_file(&cli.config)
        .map(|config| config.workspace.log_level)
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output).map(|()| ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(&cli.config).map(|()| ExitCode::SUCCESS),
        Commands::Merge {
            base,
            local,
            latest,
            output,
            patch,
        } => {
            let config = load_config_or_default(&cli.config)?;
            cmd_merge(&config, &base, &local, &latest, output.as_deref(), patch)
        }
        Commands::Policy {
            conflicting,
            latest,
            modified,
            conflict,
        } => {
            let config = load_config_or_default(&cli.config)?;
            let summary = ChangeSummary {
                total_conflicting: conflicting,
                total_latest: latest,
                total_modified: modified,
                total_conflict: conflict,
            };
            cmd_policy(&config, &summary).map(|()| ExitCode::SUCCESS)
        }
        Commands::Reconcile {
            changeset,
            pending,
            apply,
        } => {
            let config = load_config_or_default(&cli.config)?;
            cmd_reconcile(config, &changeset, &pending, apply).map(|()| ExitCode::SUCCESS)
        }
        Commands::Versions => {
            let config = load_config_or_default(&cli.config)?;
            cmd_versions(&config).map(|()| ExitCode::SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config file, or fall back to defaults when it does not exist.
fn load_config_or_default(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(AppConfig::default());
    }
    let config = AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let text = AppConfig::default()
        .to_toml_string()
        .context("failed to render default configuration")?;
    let contents = format!(
        "# lws configuration\n# See documentation for all available options.\n\n{}",
        text
    );
    std::fs::write(output, contents).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!(
            "Default configuration written to {}",
            output.display()
        ))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set [workspace] name and data_dir");
    println!("  2. Choose the auto-resolve rules under [auto_resolve]");
    println!("  3. Validate with: lws validate --config {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let policy = config.policy()?;
    println!();
    println!("Configuration summary:");
    println!("  Workspace     : {}", config.workspace.name);
    println!("  Data dir      : {}", config.workspace.data_dir.display());
    println!("  Log level     : {}", config.workspace.log_level);
    println!("  Auto-resolve  : {}", rule_names(policy.options).join(", "));
    println!("  Rename + edit : {:?}", policy.rename_edit);
    println!(
        "  Markers       : {} / {}{}",
        config.merge.local_label,
        config.merge.latest_label,
        if config.merge.include_base { " (with base)" } else { "" }
    );
    Ok(())
}

fn cmd_merge(
    config: &AppConfig,
    base: &Path,
    local: &Path,
    latest: &Path,
    output: Option<&Path>,
    patch: bool,
) -> Result<ExitCode> {
    let read = |path: &Path| {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    };
    let (base, local, latest) = (read(base)?, read(local)?, read(latest)?);

    let merger = ThreeWayMerge::new(config.merge_options());
    let outcome = merger
        .merge_text(&base, &local, &latest)
        .context("merge failed")?;

    match output {
        Some(path) => {
            std::fs::write(path, &outcome.content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{}", style::dim(&format!("merged content written to {}", path.display())));
        }
        None if patch => print!("{}", outcome.unified_patch(&local)),
        None => print!("{}", outcome.content),
    }
    if output.is_some() && patch {
        print!("{}", outcome.unified_patch(&local));
    }

    print_merge_summary(&outcome.summary);
    if outcome.has_conflicts() {
        for marker in &outcome.conflict_markers {
            eprintln!("  conflict at lines {}-{}", marker.start_line, marker.end_line);
        }
        eprintln!(
            "{}",
            style::warn(&format!(
                "{} conflict(s) left in the output",
                outcome.summary.conflict_count
            ))
        );
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_merge_summary(summary: &MergeSummary) {
    eprintln!("{}", style::header("Merge summary"));
    eprintln!("  common lines         : {}", summary.common_lines);
    eprintln!("  changed locally      : {}", summary.local_changed_lines);
    eprintln!("  changed on server    : {}", summary.latest_changed_lines);
    eprintln!("  changed identically  : {}", summary.common_changed_lines);
    eprintln!("  conflicting lines    : {}", summary.conflicting_lines);
}

fn cmd_policy(config: &AppConfig, summary: &ChangeSummary) -> Result<()> {
    let policy = config.policy()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Rule", "Enabled", "Satisfied"]);

    let checks = [
        (
            "only_local_target",
            AutoResolveOptions::ONLY_LOCAL_TARGET,
            summary.only_local_target_changed(),
        ),
        (
            "only_server_source",
            AutoResolveOptions::ONLY_SERVER_SOURCE,
            summary.only_server_source_changed(),
        ),
        (
            "both",
            AutoResolveOptions::BOTH,
            summary.both_changed_without_conflict(),
        ),
    ];
    for (name, flag, satisfied) in checks {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(yes_no(policy.options.contains(flag))),
            Cell::new(yes_no(satisfied)),
        ]);
    }
    println!("{}", table);

    match policy.content_rule(summary) {
        Some(rule) => println!(
            "{}",
            style::success(&format!("eligible via {}", rule_names(rule).join(", ")))
        ),
        None => println!("{}", style::warn("not eligible for auto-resolve")),
    }
    Ok(())
}

fn cmd_reconcile(config: AppConfig, changeset: &Path, pending: &Path, apply: bool) -> Result<()> {
    let changeset: Changeset = read_json(changeset)?;
    let pending: Vec<PendingChange> = read_json(pending)?;

    let result = if apply {
        let workspace = LocalWorkspace::open(config).context("failed to open workspace")?;
        let applied = workspace
            .reconcile_checkin(&changeset, &pending)
            .context("failed to reconcile check-in")?;
        println!(
            "{}",
            style::dim(&format!(
                "local versions: {} updated, {} removed",
                applied.upserted, applied.deleted
            ))
        );
        applied.result
    } else {
        reconcile(&changeset, &pending)
    };

    if !result.matched_at_least_one_pending_change {
        println!("No pending change is completed by changeset {}", changeset.changeset_id);
        return Ok(());
    }

    println!(
        "{}",
        style::header(&format!(
            "Completed by changeset {} ({})",
            changeset.changeset_id,
            result.len()
        ))
    );
    for change in &result.reconcilable_pending_changes {
        println!("  {:<40} {:?}", change.server_item, change.change_type);
    }
    Ok(())
}

fn cmd_versions(config: &AppConfig) -> Result<()> {
    let db = Database::open(config.database_path()).context("failed to open database")?;
    let records = db
        .list_local_versions()
        .context("failed to list local versions")?;

    if records.is_empty() {
        println!("{}", style::dim("No local versions recorded"));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Server item", "Local item", "Version", "Kind", "Baseline hash"]);

    for record in &records {
        table.add_row(vec![
            Cell::new(record.source_server_item()),
            Cell::new(record.target_local_item().unwrap_or("—")),
            Cell::new(record.local_version()),
            Cell::new(record.kind()),
            Cell::new(baseline_hash(record)),
        ]);
    }

    println!("{}", table);
    println!("{}", style::dim(&format!("{} row(s)", records.len())));
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn rule_names(options: AutoResolveOptions) -> Vec<&'static str> {
    options
        .iter_names()
        .map(|(name, _)| name)
        .filter(|name| !name.starts_with("ALL"))
        .map(|name| match name {
            "ONLY_LOCAL_TARGET" => "only_local_target",
            "ONLY_SERVER_SOURCE" => "only_server_source",
            "BOTH" => "both",
            "INCOMING_NAME" => "incoming_name",
            "REDUNDANT" => "redundant",
            _ => "silent",
        })
        .collect()
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn baseline_hash(record: &VersionRecord) -> String {
    record
        .baseline()
        .and_then(|b| b.baseline_hash.as_deref())
        .map(hex::encode)
        .unwrap_or_else(|| "—".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_merge() {
        let cli =
            Cli::try_parse_from(["lws", "merge", "b.txt", "l.txt", "t.txt", "--patch"]).unwrap();
        match cli.command {
            Commands::Merge { patch, output, .. } => {
                assert!(patch);
                assert!(output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rule_names() {
        assert_eq!(
            rule_names(AutoResolveOptions::ONLY_LOCAL_TARGET | AutoResolveOptions::SILENT),
            vec!["only_local_target", "silent"]
        );
        assert_eq!(rule_names(AutoResolveOptions::ALL).len(), 5);
    }

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lws.toml");
        cmd_init(&path).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config_or_default(Path::new("/nonexistent/lws.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
