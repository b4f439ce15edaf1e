//! # git-backup CLI - Per-file save history
//!
//! Command-line front end for the git-backup library. It drives the same
//! engine an editor integration would: back files up, browse their
//! revisions, restore or diff one, and prune or collapse a history.
//!
//! ## Usage
//! ```bash
//! # Back up a file (what a save hook does)
//! git-backup save ~/notes.txt
//!
//! # List its revisions, newest first
//! git-backup list ~/notes.txt
//!
//! # Compare an old revision with the file on disk
//! git-backup diff ~/notes.txt 3f2a9c1
//!
//! # Collapse the history into a single revision
//! git-backup combine ~/notes.txt --yes
//! ```
//!
//! Configuration is read from `<config dir>/git-backup/config.json` unless
//! `--config` is given; `--store`, `--git` and `--timeout` override it.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use git_backup::diff::to_unified;
use git_backup::utils::{atomic_write, dir_size, format_bytes};
use git_backup::{
    BackupConfig, BackupError, CombineOutcome, CombinePolicy, DiffOptions, GitBackup, GitBackupBuilder, LineChange,
    RemoveOutcome, Revision, SelectAction,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// git-backup - transparent per-file backups into a hidden git repository
#[derive(Parser)]
#[command(name = "git-backup")]
#[command(version)]
#[command(about = "Per-file save history kept in a shadow git repository")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/git-backup/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backup store directory
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// git executable
    #[arg(long, global = true)]
    git: Option<PathBuf>,

    /// Timeout for each git invocation (e.g. "30s", "2m")
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up files
    Save {
        /// Files to back up
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List revisions of a file
    #[command(alias = "ls")]
    List {
        /// File whose history to list
        file: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print a revision's content to stdout
    Show {
        /// File the revision belongs to
        file: PathBuf,

        /// Revision id or unique prefix
        revision: String,
    },

    /// Replace a file's content with a revision and back it up
    Restore {
        /// File to restore
        file: PathBuf,

        /// Revision id or unique prefix
        revision: String,
    },

    /// Compare a revision with the file's current content
    Diff {
        /// File to compare
        file: PathBuf,

        /// Revision id or unique prefix
        revision: String,

        /// Context lines around each change
        #[arg(short = 'U', long, default_value_t = 3)]
        context: usize,

        /// Ignore leading and trailing whitespace
        #[arg(short = 'w', long)]
        ignore_whitespace: bool,

        /// Only print line counts
        #[arg(long)]
        stat: bool,
    },

    /// Remove every revision of a file
    #[command(alias = "rm")]
    Remove {
        /// File whose history to remove
        file: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Collapse a file's history into one revision of its current content
    Combine {
        /// File whose history to collapse
        file: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Compact the backup store
    Gc,

    /// Show store location, size and tracked files
    Status,

    /// Print the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<BackupError>() {
            Some(backup_error) => backup_error.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => BackupConfig::default_path().context("could not determine the configuration directory")?,
    };
    let mut config = BackupConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    if let Some(store) = cli.store {
        config.store_path = absolutize(&store)?;
    }
    if let Some(git) = cli.git {
        config.git_binary = git;
    }
    if let Some(timeout) = cli.timeout {
        config.set_command_timeout(timeout);
    }

    if let Commands::Config { write } = cli.command {
        return cmd_config(&config, &config_path, write);
    }

    let backup = open_backup(config)?;
    match cli.command {
        Commands::Save { files } => cmd_save(&backup, &files),
        Commands::List { file, json, limit } => cmd_list(&backup, &file, json, limit),
        Commands::Show { file, revision } => cmd_show(&backup, &file, &revision),
        Commands::Restore { file, revision } => cmd_restore(&backup, &file, &revision),
        Commands::Diff {
            file,
            revision,
            context,
            ignore_whitespace,
            stat,
        } => cmd_diff(&backup, &file, &revision, context, ignore_whitespace, stat),
        Commands::Remove { file, yes } => cmd_remove(&backup, &file, yes),
        Commands::Combine { file, yes } => cmd_combine(&backup, &file, yes),
        Commands::Gc => cmd_gc(&backup),
        Commands::Status => cmd_status(&backup),
        Commands::Config { .. } => Ok(()),
    }
}

/// Build the engine, wiring the terminal prompt in when the policy asks
fn open_backup(config: BackupConfig) -> anyhow::Result<GitBackup> {
    let ask = config.combine_policy == CombinePolicy::AlwaysAsk;
    let mut builder = GitBackupBuilder::from_config(config);
    if ask {
        builder = builder.confirm_with(prompt_yes_no);
    }
    Ok(builder.build()?)
}

/// Ask on the terminal; anything but y/yes (or no terminal) is a no
fn prompt_yes_no(question: &str) -> bool {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return false;
    }

    eprint!("{} {} ", question.white().bold(), "[y/N]:".white());
    std::io::stderr().flush().ok();

    let mut input = String::new();
    if stdin.lock().read_line(&mut input).is_err() {
        return false;
    }
    let answer = input.trim().to_lowercase();
    answer == "y" || answer == "yes"
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Make `path` absolute against the current directory, resolving `.` and `..`
fn absolutize(path: &Path) -> anyhow::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("could not determine the current directory")?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolve a full id or unique prefix against the file's revisions
fn resolve_revision(backup: &GitBackup, file: &Path, revision: &str) -> anyhow::Result<Revision> {
    let revisions = backup.list_revisions(file)?;
    let mut matches = revisions.into_iter().filter(|r| r.id.starts_with(revision));
    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found),
        (Some(_), Some(_)) => bail!("revision '{}' is ambiguous for {}", revision, file.display()),
        (None, _) => bail!("no backup of {} matches revision '{}'", file.display(), revision),
    }
}

fn cmd_save(backup: &GitBackup, files: &[PathBuf]) -> anyhow::Result<()> {
    for file in files {
        let file = absolutize(file)?;
        if backup.backup(&file)? {
            println!("{} Backed up {}", "✓".green().bold(), file.display().to_string().cyan());
        } else {
            println!("{} Skipped {} (missing or excluded)", "-".yellow(), file.display().to_string().dimmed());
        }
    }
    Ok(())
}

fn cmd_list(backup: &GitBackup, file: &Path, json: bool, limit: Option<usize>) -> anyhow::Result<()> {
    let file = absolutize(file)?;
    let revisions = backup.list_revisions(&file)?;
    let display_count = limit.unwrap_or(revisions.len()).min(revisions.len());

    if json {
        println!("{}", serde_json::to_string_pretty(&revisions[..display_count])?);
        return Ok(());
    }

    if revisions.is_empty() {
        println!("{}", format!("No backups of {}.", file.display()).yellow());
        return Ok(());
    }

    println!("{} {}", "Backups of".blue().bold(), file.display().to_string().blue().bold());
    println!();
    for revision in revisions.iter().take(display_count) {
        println!("  {} {}", revision.short_id().yellow().bold(), revision.label.cyan());
    }

    if display_count < revisions.len() {
        println!(
            "\n{}",
            format!("Showing {} of {} revisions", display_count, revisions.len()).dimmed()
        );
    }
    Ok(())
}

fn cmd_show(backup: &GitBackup, file: &Path, revision: &str) -> anyhow::Result<()> {
    let file = absolutize(file)?;
    let revision = resolve_revision(backup, &file, revision)?;
    let selection = backup
        .select_action(&revision.id, &file, SelectAction::OpenNew)?
        .with_context(|| format!("revision {} is no longer available", revision.short_id()))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&selection.content)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_restore(backup: &GitBackup, file: &Path, revision: &str) -> anyhow::Result<()> {
    let file = absolutize(file)?;
    let revision = resolve_revision(backup, &file, revision)?;
    let selection = backup
        .select_action(&revision.id, &file, SelectAction::ReplaceCurrent)?
        .with_context(|| format!("revision {} is no longer available", revision.short_id()))?;

    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    atomic_write(&file, &selection.content)
        .with_context(|| format!("failed to write {}", file.display()))?;
    backup.backup(&file)?;

    println!(
        "{} Restored {} from {}",
        "✓".green().bold(),
        file.display().to_string().cyan(),
        revision.short_id().yellow().bold()
    );
    println!("  Size: {}", format_bytes(selection.content.len() as u64).cyan());
    Ok(())
}

fn cmd_diff(
    backup: &GitBackup,
    file: &Path,
    revision: &str,
    context: usize,
    ignore_whitespace: bool,
    stat: bool,
) -> anyhow::Result<()> {
    let file = absolutize(file)?;
    let revision = resolve_revision(backup, &file, revision)?;
    let options = DiffOptions {
        context_lines: context,
        ignore_whitespace,
        ..Default::default()
    };
    let diff = backup
        .diff(&revision.id, &file, &options)?
        .with_context(|| format!("revision {} is no longer available", revision.short_id()))?;

    if stat || diff.is_binary || diff.too_large {
        let note = if diff.is_binary {
            " (binary)"
        } else if diff.too_large {
            " (too large)"
        } else {
            ""
        };
        println!(
            "{} | {} {}{}",
            file.display(),
            format!("+{}", diff.lines_added).green(),
            format!("-{}", diff.lines_deleted).red(),
            note.dimmed()
        );
        return Ok(());
    }

    if !diff.has_changes() {
        println!("{}", "No differences.".dimmed());
        return Ok(());
    }

    let unified = to_unified(&diff);
    for line in unified.lines() {
        let colored_line = if line.starts_with("+++") || line.starts_with("---") {
            line.bold()
        } else if line.starts_with("@@") {
            line.cyan()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else {
            line.normal()
        };
        println!("{}", colored_line);
    }

    let changed = diff
        .hunks
        .iter()
        .flat_map(|h| &h.changes)
        .filter(|c| !matches!(c, LineChange::Context(..)))
        .count();
    println!("\n{}", format!("{} lines changed", changed).dimmed());
    Ok(())
}

fn cmd_remove(backup: &GitBackup, file: &Path, yes: bool) -> anyhow::Result<()> {
    let file = absolutize(file)?;
    let start = Instant::now();

    let outcome = if yes {
        let pb = spinner("Rewriting backup history...");
        let outcome = backup.remove_file(&file);
        pb.finish_and_clear();
        outcome?
    } else {
        backup.request_remove(&file)?
    };

    match outcome {
        RemoveOutcome::Removed => println!(
            "{} Removed all backups of {} in {}",
            "✓".green().bold(),
            file.display().to_string().cyan(),
            format_duration(round_millis(start.elapsed()))
        ),
        RemoveOutcome::NothingToRemove => println!("{}", format!("No backups of {}.", file.display()).yellow()),
        RemoveOutcome::Declined => println!("{}", "Nothing removed.".dimmed()),
    }
    Ok(())
}

fn cmd_combine(backup: &GitBackup, file: &Path, yes: bool) -> anyhow::Result<()> {
    let file = absolutize(file)?;
    let start = Instant::now();

    let outcome = if yes {
        let pb = spinner("Combining backup history...");
        let outcome = backup.combine(&file, true);
        pb.finish_and_clear();
        outcome?
    } else {
        backup.request_combine(&file)?
    };

    match outcome {
        CombineOutcome::Combined => println!(
            "{} Combined backups of {} into one revision in {}",
            "✓".green().bold(),
            file.display().to_string().cyan(),
            format_duration(round_millis(start.elapsed()))
        ),
        CombineOutcome::RemovedOnly => println!(
            "{} Removed backups of {}; the file is missing or excluded so no new revision was made",
            "!".yellow().bold(),
            file.display()
        ),
        CombineOutcome::Declined => println!("{}", "Nothing combined.".dimmed()),
    }
    Ok(())
}

fn cmd_gc(backup: &GitBackup) -> anyhow::Result<()> {
    let root = backup.store().root().to_path_buf();
    let before = dir_size(&root)?;
    let start = Instant::now();

    let pb = spinner("Compacting backup store...");
    backup.gc();
    pb.finish_and_clear();

    let after = dir_size(&root)?;
    println!("{} Garbage collection complete", "✓".green().bold());
    println!("  Size: {} -> {}", format_bytes(before).dimmed(), format_bytes(after).green());
    println!("  Time: {}", format_duration(round_millis(start.elapsed())).to_string().cyan());
    Ok(())
}

fn cmd_status(backup: &GitBackup) -> anyhow::Result<()> {
    let config = backup.config();
    println!("{}", "git-backup status:".blue().bold());
    println!();
    println!("  Store: {}", config.store_path.display());
    println!("  git: {}", config.git_binary.display());
    println!("  Combine policy: {}", config.combine_policy.to_string().cyan());
    println!("  Exclusion rules: {}", config.exclusion_rules.len());

    if !backup.is_initialized() {
        println!("\n{}", "Store not created yet; it appears on the first backup.".yellow());
        return Ok(());
    }

    let files = backup.tracked_files()?;
    println!("  Size: {}", format_bytes(dir_size(backup.store().root())?).cyan());
    println!("\n{} ({})", "Tracked files".bold(), files.len());
    for file in &files {
        println!("  {}", file.display());
    }
    Ok(())
}

fn cmd_config(config: &BackupConfig, path: &Path, write: bool) -> anyhow::Result<()> {
    if write {
        config
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{} Wrote {}", "✓".green().bold(), path.display().to_string().cyan());
    } else {
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}

fn round_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
