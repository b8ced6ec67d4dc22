//! LedgerVault CLI - Command line interface for personal vault operations.
//!
//! Every command works on a data directory holding the SQLite database,
//! the local content store and the ledger journal. Sessions are persisted
//! when a command exits, so unsynced edits survive between invocations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ledgervault_app::{rehydrate, AppConfig, SessionStatus, VaultService};
use ledgervault_common::{SensitiveBytes, UserId};
use ledgervault_crypto::{IdentitySecret, KdfParams};
use ledgervault_vault::{Entry, EntryKind, RuntimeContext};
use serde_json::{json, Value};

const PASSWORD_ENV: &str = "LEDGERVAULT_PASSWORD";

#[derive(Parser)]
#[command(name = "ledgervault")]
#[command(about = "LedgerVault - Encrypted personal vault with ledger-anchored commits")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: platform data dir).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: <data-dir>/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Vault owner.
    #[arg(short, long, global = true, default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the signing identity for the user.
    Keygen {
        /// Replace an existing identity.
        #[arg(long)]
        force: bool,

        /// KDF strength written to a new config: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "interactive")]
        strength: String,
    },

    /// Open (or create) the vault and show its metadata.
    Open,

    /// Add an entry from JSON.
    Add {
        /// Entry kind: login, card, identity, note, ssh_key.
        kind: String,

        /// Entry fields as a JSON object.
        json: String,
    },

    /// Replace an entry; the JSON must carry its id.
    Edit {
        kind: String,
        json: String,
    },

    /// Move an entry to the trash.
    Trash {
        kind: String,
        id: String,
    },

    /// Restore an entry from the trash.
    Restore {
        kind: String,
        id: String,
    },

    /// List entries.
    List {
        /// Only this kind (default: all).
        #[arg(short, long)]
        kind: Option<String>,

        /// Include trashed entries.
        #[arg(short, long)]
        trashed: bool,

        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create a folder.
    Folder {
        name: String,
    },

    /// Encrypt, store and anchor the current vault.
    Sync,

    /// Retry delivery of pending commit envelopes.
    Flush,

    /// Show session state.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No platform data directory; pass --data-dir")?
            .join("ledgervault"),
    };
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    let config_path = cli
        .config
        .unwrap_or_else(|| data_dir.join("config.json"));
    let user = UserId::new(cli.user).context("Invalid user")?;

    if let Commands::Keygen { force, strength } = &cli.command {
        return cmd_keygen(&data_dir, &config_path, &user, *force, strength);
    }

    let config = load_config(&data_dir, &config_path)?;
    let service = VaultService::from_config(&config).context("Failed to initialize vault service")?;
    let cli_session = CliSession::start(service, &data_dir, user).await?;

    let result = run_command(&cli_session, cli.command).await;
    cli_session.finish().await?;
    result
}

async fn run_command(session: &CliSession, command: Commands) -> Result<()> {
    match command {
        Commands::Keygen { .. } => Ok(()),
        Commands::Open => cmd_open(session).await,
        Commands::Add { kind, json } => cmd_add(session, &kind, &json).await,
        Commands::Edit { kind, json } => cmd_edit(session, &kind, &json).await,
        Commands::Trash { kind, id } => cmd_trash(session, &kind, &id, true).await,
        Commands::Restore { kind, id } => cmd_trash(session, &kind, &id, false).await,
        Commands::List {
            kind,
            trashed,
            json,
        } => cmd_list(session, kind.as_deref(), trashed, json).await,
        Commands::Folder { name } => cmd_folder(session, &name).await,
        Commands::Sync => cmd_sync(session).await,
        Commands::Flush => Ok(()),
        Commands::Status { json } => cmd_status(session, json).await,
    }
}

fn identity_path(data_dir: &Path, user: &UserId) -> PathBuf {
    data_dir.join(format!("{}.identity", user))
}

fn load_config(data_dir: &Path, config_path: &Path) -> Result<AppConfig> {
    if config_path.exists() {
        AppConfig::load(config_path).context("Failed to load config")
    } else {
        Ok(AppConfig::for_data_dir(data_dir))
    }
}

/// Prompt for password securely, or take it from the environment.
fn prompt_password(prompt: &str) -> Result<SensitiveBytes> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(SensitiveBytes::new(password.into_bytes()));
    }
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(SensitiveBytes::new(password.into_bytes()))
}

fn parse_kind(kind: &str) -> Result<EntryKind> {
    kind.parse().with_context(|| {
        format!(
            "Unknown entry kind '{}'. Use: login, card, identity, note, ssh_key",
            kind
        )
    })
}

/// Generate an identity for the user.
fn cmd_keygen(
    data_dir: &Path,
    config_path: &Path,
    user: &UserId,
    force: bool,
    strength: &str,
) -> Result<()> {
    let path = identity_path(data_dir, user);
    if path.exists() && !force {
        anyhow::bail!(
            "Identity already exists at {} (use --force to replace)",
            path.display()
        );
    }

    if !config_path.exists() {
        let mut config = AppConfig::for_data_dir(data_dir);
        config.kdf = KdfParams::preset(strength)
            .context("Invalid strength. Use: interactive, moderate, or sensitive")?;
        config.save(config_path).context("Failed to write config")?;
        info!("Config written to {}", config_path.display());
    }

    let identity = IdentitySecret::generate();
    std::fs::write(&path, identity.to_base64().as_bytes()).context("Failed to write identity")?;
    restrict_permissions(&path)?;

    println!("Identity created for {}", user);
    println!("  Public key: {}", identity.public_key().to_base64());
    println!("  Stored at: {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict identity file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// One command's worth of service state.
struct CliSession {
    service: VaultService,
    user: UserId,
    identity: Option<IdentitySecret>,
    worker_shutdown: CancellationToken,
    worker_task: tokio::task::JoinHandle<()>,
}

impl CliSession {
    async fn start(service: VaultService, data_dir: &Path, user: UserId) -> Result<Self> {
        let identity = match std::fs::read_to_string(identity_path(data_dir, &user)) {
            Ok(encoded) => Some(
                IdentitySecret::from_base64(encoded.trim()).context("Invalid identity file")?,
            ),
            Err(_) => None,
        };

        let report = rehydrate(service.sessions(), service.worker(), &CancellationToken::new())
            .await
            .context("Failed to restore sessions")?;
        debug!(
            sessions = report.sessions,
            pending = report.pending_commits,
            "Sessions restored"
        );

        let worker_shutdown = CancellationToken::new();
        let worker_task = tokio::spawn(Arc::clone(service.worker()).run(worker_shutdown.clone()));

        Ok(Self {
            service,
            user,
            identity,
            worker_shutdown,
            worker_task,
        })
    }

    /// Open the vault with a freshly prompted password and return it.
    async fn ensure_open(&self) -> Result<SensitiveBytes> {
        let identity = self
            .identity
            .clone()
            .context("No identity for this user; run `ledgervault keygen` first")?;
        let runtime = RuntimeContext::new(identity, "owner");
        let password = prompt_password("Enter password: ")?;

        self.service
            .open_vault(&self.user, password.as_bytes(), runtime)
            .await
            .context("Failed to open vault")?;
        Ok(password)
    }

    /// Stop the worker, retry pending commits once and persist the session.
    async fn finish(self) -> Result<()> {
        self.worker_shutdown.cancel();
        self.worker_task.await.context("Commit worker panicked")?;

        let report = self.service.worker().tick().await;
        if report.delivered > 0 || report.failed > 0 {
            println!(
                "Commits delivered: {}, still pending: {}",
                report.delivered, report.failed
            );
        }

        for user in self.service.sessions().active_users().await {
            self.service
                .end_session(&user)
                .await
                .context("Failed to persist session")?;
        }
        Ok(())
    }
}

async fn cmd_open(session: &CliSession) -> Result<()> {
    let identity = session
        .identity
        .clone()
        .context("No identity for this user; run `ledgervault keygen` first")?;
    let password = prompt_password("Enter password: ")?;
    let record = session
        .service
        .open_vault(&session.user, password.as_bytes(), RuntimeContext::new(identity, "owner"))
        .await
        .context("Failed to open vault")?;

    println!("Vault opened successfully!");
    println!("  ID: {}", record.id);
    println!("  Name: {}", record.name);
    match &record.content_id {
        Some(content_id) => println!("  Content: {}", content_id),
        None => println!("  Content: (never synced)"),
    }
    if let Some(anchor) = &record.anchor_ref {
        println!("  Anchor: {}", anchor);
    }
    Ok(())
}

async fn cmd_add(session: &CliSession, kind: &str, json: &str) -> Result<()> {
    session.ensure_open().await?;
    let id = session
        .service
        .add_entry_raw(&session.user, kind, json.as_bytes())
        .await
        .context("Failed to add entry")?;
    println!("Entry added: {}", id);
    Ok(())
}

async fn cmd_edit(session: &CliSession, kind: &str, json: &str) -> Result<()> {
    session.ensure_open().await?;
    session
        .service
        .edit_entry_raw(&session.user, kind, json.as_bytes())
        .await
        .context("Failed to edit entry")?;
    println!("Entry updated.");
    Ok(())
}

async fn cmd_trash(session: &CliSession, kind: &str, id: &str, trash: bool) -> Result<()> {
    let kind = parse_kind(kind)?;
    session.ensure_open().await?;
    if trash {
        session
            .service
            .trash_entry(&session.user, kind, id)
            .await
            .context("Failed to trash entry")?;
        println!("Entry trashed: {}", id);
    } else {
        session
            .service
            .restore_entry(&session.user, kind, id)
            .await
            .context("Failed to restore entry")?;
        println!("Entry restored: {}", id);
    }
    Ok(())
}

async fn cmd_list(
    session: &CliSession,
    kind: Option<&str>,
    trashed: bool,
    json: bool,
) -> Result<()> {
    let kinds = match kind {
        Some(kind) => vec![parse_kind(kind)?],
        None => EntryKind::ALL.to_vec(),
    };
    session.ensure_open().await?;

    let mut entries = Vec::new();
    for kind in kinds {
        entries.extend(
            session
                .service
                .list_entries(&session.user, kind, trashed)
                .await
                .context("Failed to list entries")?,
        );
    }

    if json {
        let values = entries
            .iter()
            .map(entry_json)
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    for entry in &entries {
        let base = entry.base();
        let marker = if base.trashed { " (trashed)" } else { "" };
        println!("  [{}] {} {}{}", entry.kind(), base.id, base.entry_name, marker);
    }
    if entries.is_empty() {
        println!("No entries.");
    }
    Ok(())
}

/// An entry's fields plus its kind tag.
fn entry_json(entry: &Entry) -> Result<Value> {
    let mut value = entry.to_value().context("Failed to serialize entry")?;
    if let Value::Object(fields) = &mut value {
        fields.insert("kind".to_string(), json!(entry.kind().to_string()));
    }
    Ok(value)
}

fn status_json(user: &UserId, status: &SessionStatus) -> Value {
    json!({
        "user": user.to_string(),
        "state": format!("{:?}", status.state),
        "entries": status.entries,
        "dirty": status.dirty,
        "lastContentId": status.last_content_id.as_ref().map(|id| id.to_string()),
        "lastSyncedAt": status.last_synced_at.map(|at| at.to_rfc3339()),
        "pendingCommits": status.pending_commits,
    })
}

async fn cmd_folder(session: &CliSession, name: &str) -> Result<()> {
    session.ensure_open().await?;
    let id = session
        .service
        .add_folder(&session.user, name)
        .await
        .context("Failed to add folder")?;
    println!("Folder created: {} ({})", name, id);
    Ok(())
}

async fn cmd_sync(session: &CliSession) -> Result<()> {
    let password = session.ensure_open().await?;
    let outcome = session
        .service
        .sync(&session.user, password.as_bytes())
        .await
        .context("Sync failed")?;

    println!("Vault synced!");
    println!("  Content: {}", outcome.content_id);
    println!("  Anchor: {}", outcome.tx_ref);
    if !outcome.clean {
        println!("  Vault changed during sync; run sync again.");
    }
    Ok(())
}

async fn cmd_status(session: &CliSession, json: bool) -> Result<()> {
    let status = match session.service.status(&session.user).await {
        Ok(status) => status,
        Err(_) => {
            println!("No session for {}.", session.user);
            return Ok(());
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status_json(&session.user, &status))?
        );
        return Ok(());
    }

    println!("Session for {}:", session.user);
    println!("  State: {:?}", status.state);
    println!("  Entries: {}", status.entries);
    println!("  Unsynced changes: {}", if status.dirty { "yes" } else { "no" });
    match &status.last_content_id {
        Some(content_id) => println!("  Last content: {}", content_id),
        None => println!("  Last content: (none)"),
    }
    if let Some(at) = status.last_synced_at {
        println!("  Last synced: {}", at);
    }
    println!("  Pending commits: {}", status.pending_commits);
    Ok(())
}
