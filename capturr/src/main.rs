//! capturr - quick capture to a remote notes graph
//!
//! Every capture is queued locally first and delivered by the sync
//! orchestrator, either right away (`--send`), in a one-shot `sync`, or by a
//! long-running `run`.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/capturr/captures.db (~/.local/share/capturr/captures.db)
//! - Device id: $XDG_DATA_HOME/capturr/device-id
//! - Logs: $XDG_STATE_HOME/capturr/capturr.log (~/.local/state/capturr/capturr.log)
//! - Config: $XDG_CONFIG_HOME/capturr/config.toml (~/.config/capturr/config.toml)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use capturr_core::capture;
use capturr_core::format::{format_relative_time, format_relative_time_opt};
use capturr_core::logging;
use capturr_core::profile::{load_or_create_device_id, ProfileSource, ProfileStore};
use capturr_core::reachability::{spawn_probe, Reachability};
use capturr_core::remote::GraphClient;
use capturr_core::sync::{SyncEngine, SyncHandle, SyncOrchestrator, SyncSettings};
use capturr_core::{CaptureRecord, Config, Database, Profile, QueueStore, TickOutcome};
use clap::{Args, Parser, Subcommand};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "capturr")]
#[command(about = "Capture notes offline and deliver them to your graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a note
    #[command(alias = "note")]
    Capture {
        /// Note text (words are joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,

        /// Try to deliver immediately
        #[arg(long)]
        send: bool,
    },

    /// Capture one to-do per non-empty line
    Todo {
        /// To-do text; separate items with newlines
        text: String,

        /// Try to deliver immediately
        #[arg(long)]
        send: bool,
    },

    /// Import shared text or a shared URL
    Share {
        /// Shared plain text
        text: Option<String>,

        /// Shared URL
        #[arg(long, conflicts_with = "text")]
        url: Option<String>,

        /// Page title accompanying the URL
        #[arg(long, requires = "url")]
        title: Option<String>,

        /// Try to deliver immediately
        #[arg(long)]
        send: bool,
    },

    /// Capture a voice transcript
    Voice {
        /// Raw transcript
        transcript: String,

        /// Try to deliver immediately
        #[arg(long)]
        send: bool,
    },

    /// Show recent captures
    History {
        /// Number of captures to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show queue counts per status
    Status,

    /// Delete a capture
    Delete {
        /// Capture id (from `history`)
        id: String,
    },

    /// Show or edit the device profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Deliver everything currently eligible, then exit
    Sync,

    /// Keep syncing in the foreground until Ctrl-C
    Run,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print the current profile
    Show,
    /// Change profile fields (pass an empty string to clear a text field)
    Set(ProfileArgs),
}

#[derive(Args)]
struct ProfileArgs {
    /// Graph name
    #[arg(long)]
    graph: Option<String>,

    /// API token
    #[arg(long)]
    token: Option<String>,

    /// Tag appended to every capture
    #[arg(long)]
    tag: Option<String>,

    /// Append the first-attempt time (HH:MM)
    #[arg(long)]
    timestamp: Option<bool>,

    /// Send to today's daily note
    #[arg(long)]
    daily_notes: Option<bool>,

    /// Page title used when daily notes are off
    #[arg(long)]
    location: Option<String>,

    /// Block to nest captures under
    #[arg(long)]
    block: Option<String>,

    /// Format shared URLs as [title](url)
    #[arg(long)]
    format_links: Option<bool>,
}

/// Open stores shared by all commands.
struct App {
    config: Config,
    db: Arc<Database>,
    profiles: Arc<ProfileStore>,
}

impl App {
    fn open(config: Config) -> Result<Self> {
        let db_path = Config::database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create data directory")?;
        }

        tracing::info!(path = %db_path.display(), "Opening database");
        let db = Database::open(&db_path).context("failed to open database")?;
        db.migrate().context("failed to run database migrations")?;
        let db = Arc::new(db);

        let device_id = load_or_create_device_id(&Config::device_id_path())
            .context("failed to load device identity")?;
        let profiles = Arc::new(ProfileStore::new(db.clone(), device_id));

        Ok(Self {
            config,
            db,
            profiles,
        })
    }

    fn profile(&self) -> Result<Profile> {
        self.profiles
            .current_profile()
            .context("failed to load profile")
    }

    fn start_sync(&self, reachability: Reachability) -> Result<SyncOrchestrator> {
        let client = GraphClient::new(
            &self.config.sync.api_base_url,
            self.config.sync.request_timeout(),
        )
        .context("failed to create API client")?;

        let engine = SyncEngine::new(
            self.db.clone(),
            self.profiles.clone(),
            SyncSettings::from(&self.config.sync),
        );
        Ok(SyncOrchestrator::spawn(engine, Arc::new(client), reachability))
    }

    /// How long a one-shot command waits for sends to settle
    fn drain_timeout(&self) -> Duration {
        self.config.sync.request_timeout() + Duration::from_secs(5)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let output = match cli.command {
        Command::Run => logging::Output::FileAndStderr,
        _ => logging::Output::File,
    };
    let _log_guard =
        logging::init(&config.logging, output).context("failed to initialize logging")?;

    tracing::info!("capturr starting");

    let app = App::open(config)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let result = runtime.block_on(execute(&app, cli.command));

    tracing::info!("capturr shutting down");
    result
}

async fn execute(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Capture { text, send } => {
            let record = capture::capture_note(&app.db, &text.join(" "))?;
            finish_capture(app, record.into_iter().collect(), send).await
        }
        Command::Todo { text, send } => {
            let records = capture::capture_todos(&app.db, &text)?;
            finish_capture(app, records, send).await
        }
        Command::Share {
            text,
            url,
            title,
            send,
        } => {
            let content = match (url, text) {
                (Some(url), _) => {
                    let profile = app.profile()?;
                    capture::share_url(&url, title.as_deref(), profile.share_format_links)
                }
                (None, Some(text)) => capture::share_text(&text),
                (None, None) => bail!("nothing to share: pass TEXT or --url"),
            };
            let record = capture::import_share(&app.db, &content)?;
            finish_capture(app, record.into_iter().collect(), send).await
        }
        Command::Voice { transcript, send } => {
            let record = capture::capture_transcript(&app.db, &transcript)?;
            finish_capture(app, record.into_iter().collect(), send).await
        }
        Command::History { limit } => show_history(app, limit),
        Command::Status => show_status(app),
        Command::Delete { id } => delete_capture(app, &id),
        Command::Profile { action } => match action {
            ProfileAction::Show => show_profile(app),
            ProfileAction::Set(args) => set_profile(app, args),
        },
        Command::Sync => sync_once(app).await,
        Command::Run => run_foreground(app).await,
    }
}

async fn finish_capture(app: &App, records: Vec<CaptureRecord>, send: bool) -> Result<()> {
    if records.is_empty() {
        println!("Nothing to capture");
        return Ok(());
    }

    for record in &records {
        println!("Queued {} {}", record.id, preview(&record.content, 60));
    }

    if !send {
        return Ok(());
    }

    let profile = app.profile()?;
    if !profile.is_configured() {
        println!("Profile not configured; captures stay queued");
        return Ok(());
    }

    let orchestrator = app.start_sync(Reachability::default())?;
    let handle = orchestrator.handle();
    for record in &records {
        handle.sync_one(record.id).await?;
    }
    drain(&handle, &app.db, app.drain_timeout()).await?;
    orchestrator.shutdown().await;

    for record in &records {
        if let Some(saved) = app.db.get_capture(&record.id)? {
            println!(
                "{} {}",
                record.id,
                saved.last_error.as_deref().unwrap_or(saved.status.display_name())
            );
        }
    }
    Ok(())
}

/// Wait until nothing is in flight and a fresh tick finds no more work.
async fn drain(handle: &SyncHandle, db: &Database, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        while db.status_counts()?.in_progress > 0 {
            if Instant::now() >= deadline {
                tracing::warn!("Timed out waiting for sends to finish");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let report = handle.tick().await?;
        if report.dispatched == 0 || Instant::now() >= deadline {
            return Ok(());
        }
    }
}

async fn sync_once(app: &App) -> Result<()> {
    let orchestrator = app.start_sync(Reachability::default())?;
    let handle = orchestrator.handle();

    let report = handle.tick().await?;
    match report.outcome {
        TickOutcome::NotConfigured => println!("Profile not configured; nothing sent"),
        TickOutcome::Offline => println!("Offline; nothing sent"),
        TickOutcome::Ran => drain(&handle, &app.db, app.drain_timeout()).await?,
    }
    orchestrator.shutdown().await;

    show_status(app)
}

async fn run_foreground(app: &App) -> Result<()> {
    let reachability = Reachability::default();
    let probe_cancel = CancellationToken::new();

    let probe = app.config.reachability.probe_url.clone().map(|url| {
        tracing::info!(url = %url, "Starting reachability probe");
        spawn_probe(
            reachability.clone(),
            url,
            app.config.reachability.probe_interval(),
            probe_cancel.clone(),
        )
    });

    let orchestrator = app.start_sync(reachability)?;

    // Recover anything a previous run left behind
    let report = orchestrator.handle().tick().await?;
    tracing::info!(outcome = ?report.outcome, dispatched = report.dispatched, "Startup tick");

    println!(
        "Syncing every {}s. Press Ctrl-C to stop.",
        app.config.sync.tick_interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    println!("\nStopping...");
    probe_cancel.cancel();
    if let Some(probe) = probe {
        let _ = probe.await;
    }
    orchestrator.shutdown().await;

    show_status(app)
}

fn show_history(app: &App, limit: usize) -> Result<()> {
    let records = app.db.list_captures(limit)?;
    if records.is_empty() {
        println!("No captures yet");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<11} {:<4} {:>8}  {}",
            record.id,
            record.status.display_name(),
            record.kind.as_str(),
            format_relative_time(record.created_at),
            preview(&record.content, 50)
        );

        if !record.is_sent() {
            if let Some(error) = &record.last_error {
                let note = if record.hard_error {
                    "blocked until credentials change".to_string()
                } else {
                    format!("retry {}", format_relative_time_opt(record.next_attempt_at))
                };
                println!("    attempts: {}, {} ({})", record.attempt_count, error, note);
            }
        }
    }
    Ok(())
}

fn show_status(app: &App) -> Result<()> {
    let counts = app.db.status_counts()?;
    println!("Pending:     {}", counts.pending);
    println!("In progress: {}", counts.in_progress);
    println!("Sent:        {}", counts.success);
    if counts.failed > 0 {
        println!("Failed:      {}", counts.failed);
    }
    if counts.hard_errors > 0 {
        println!(
            "Blocked:     {} (rejected credentials; update the profile to retry)",
            counts.hard_errors
        );
    }
    Ok(())
}

fn delete_capture(app: &App, id: &str) -> Result<()> {
    let id = Uuid::parse_str(id.trim()).with_context(|| format!("invalid capture id: {}", id))?;
    if app.db.delete_capture(&id)? {
        println!("Deleted {}", id);
        Ok(())
    } else {
        bail!("capture not found: {}", id)
    }
}

fn show_profile(app: &App) -> Result<()> {
    let profile = app.profile()?;

    println!("Device:       {}", app.profiles.device_id());
    println!("Graph:        {}", profile.graph_name.as_deref().unwrap_or("-"));
    println!("Token:        {}", mask_token(profile.api_token.as_deref()));
    println!("Tag:          {}", profile.default_tag.as_deref().unwrap_or("-"));
    println!("Timestamp:    {}", profile.add_timestamp);
    println!("Daily notes:  {}", profile.use_daily_notes);
    println!(
        "Location:     {}",
        profile.custom_location.as_deref().unwrap_or("-")
    );
    println!("Nest under:   {}", profile.custom_block.as_deref().unwrap_or("-"));
    println!("Format links: {}", profile.share_format_links);
    if !profile.is_configured() {
        println!("\nSync is idle until graph and token are set.");
    }
    Ok(())
}

fn set_profile(app: &App, args: ProfileArgs) -> Result<()> {
    let mut profile = app.profile()?;

    if let Some(graph) = args.graph {
        profile.graph_name = non_empty(graph);
    }
    if let Some(token) = args.token {
        profile.api_token = non_empty(token);
    }
    if let Some(tag) = args.tag {
        profile.default_tag = non_empty(tag);
    }
    if let Some(timestamp) = args.timestamp {
        profile.add_timestamp = timestamp;
    }
    if let Some(daily_notes) = args.daily_notes {
        profile.use_daily_notes = daily_notes;
    }
    if let Some(location) = args.location {
        profile.custom_location = non_empty(location);
    }
    if let Some(block) = args.block {
        profile.custom_block = non_empty(block);
    }
    if let Some(format_links) = args.format_links {
        profile.share_format_links = format_links;
    }

    let released = app
        .profiles
        .update(&profile)
        .context("failed to save profile")?;
    println!("Profile saved");
    if released > 0 {
        println!("Released {} capture(s) blocked by the old credentials", released);
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn mask_token(token: Option<&str>) -> String {
    match token {
        None | Some("") => "-".to_string(),
        Some(token) => {
            let tail: String = token
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("****{}", tail)
        }
    }
}

/// First line of `content`, cut to `max` characters.
fn preview(content: &str, max: usize) -> String {
    let line = content.lines().next().unwrap_or("");
    if line.chars().count() <= max && !content.contains('\n') {
        return line.to_string();
    }
    let cut: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
