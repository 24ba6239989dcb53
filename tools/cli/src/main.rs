//! Lockbox CLI - Command line interface for encrypted backups.
//!
//! This tool backs up and restores notes, passwords and cards to the
//! private app-data folder of a cloud drive, and manages the sign-in
//! session used for it.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use lockbox_app::{BackupService, LockboxConfig};
use lockbox_auth::OAuthIdentity;
use lockbox_common::{Error, Passphrase};
use lockbox_storage::StoredCredential;
use lockbox_vault::{BackupMode, BackupPayload};

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Lockbox - Encrypted backups of notes, passwords and cards")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/lockbox/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Account used when a new token has to be obtained.
    #[arg(short, long, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a payload file and upload it as a new backup.
    Backup {
        /// Payload JSON file.
        #[arg(short, long)]
        input: PathBuf,

        /// Protect the backup with a passphrase instead of the device key.
        #[arg(short, long)]
        passphrase: bool,
    },

    /// Download and decrypt the newest backup.
    Restore {
        /// Destination payload JSON file.
        #[arg(short, long)]
        output: PathBuf,

        /// The backup is protected with a passphrase.
        #[arg(short, long)]
        passphrase: bool,

        /// Merge into an existing output file instead of replacing it.
        #[arg(short, long)]
        merge: bool,
    },

    /// Show session state and the time of the newest backup.
    Status,

    /// Store credentials from an interactive sign-in.
    SignIn {
        /// Authorization code from the consent redirect.
        #[arg(long, conflicts_with = "access_token")]
        code: Option<String>,

        /// Access token obtained elsewhere.
        #[arg(long, required_unless_present = "code")]
        access_token: Option<String>,

        /// Refresh token.
        #[arg(long, requires = "access_token")]
        refresh_token: Option<String>,

        /// Access token lifetime in seconds.
        #[arg(long, requires = "access_token")]
        expires_in: Option<i64>,

        /// Account the credential belongs to.
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Forget all credentials.
    SignOut,

    /// Print the URL for granting access to the account given by --account.
    AuthorizeUrl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = LockboxConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let result = run(cli.command, cli.account, &config).await;

    if let Err(e) = &result {
        if let Some(intent) = e.downcast_ref::<Error>().and_then(Error::consent_intent) {
            eprintln!("Access needs to be granted again ({}).", intent.reason);
            eprintln!("Visit: {}", intent.url);
            eprintln!("Then run: lockbox sign-in --code <code>");
        }
    }

    result
}

async fn run(command: Commands, account: Option<String>, config: &LockboxConfig) -> Result<()> {
    match command {
        Commands::Backup { input, passphrase } => {
            cmd_backup(config, account, &input, passphrase).await
        }

        Commands::Restore {
            output,
            passphrase,
            merge,
        } => cmd_restore(config, account, &output, passphrase, merge).await,

        Commands::Status => cmd_status(config, account).await,

        Commands::SignIn {
            code,
            access_token,
            refresh_token,
            expires_in,
            user_id,
        } => {
            let user_id = user_id.or(account);
            match code {
                Some(code) => cmd_sign_in_code(config, &code, user_id).await,
                None => {
                    let access_token =
                        access_token.context("--access-token or --code is required")?;
                    let mut credential = StoredCredential::new(access_token);
                    if let Some(refresh_token) = refresh_token {
                        credential = credential.with_refresh_token(refresh_token);
                    }
                    if let Some(secs) = expires_in {
                        credential = credential.with_expires_at(Utc::now() + Duration::seconds(secs));
                    }
                    if let Some(user_id) = user_id {
                        credential = credential.with_user_id(user_id);
                    }
                    cmd_sign_in(config, credential).await
                }
            }
        }

        Commands::SignOut => cmd_sign_out(config).await,

        Commands::AuthorizeUrl => {
            let account = account.context("--account is required")?;
            cmd_authorize_url(config, &account)
        }
    }
}

/// Race a network operation against Ctrl-C.
async fn interruptible<T>(operation: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = operation => result,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted"),
    }
}

/// Prompt for passphrase securely.
fn prompt_passphrase(prompt: &str) -> Result<Passphrase> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(Passphrase::from_string(passphrase))
}

async fn service(config: &LockboxConfig, account: Option<String>) -> Result<BackupService> {
    let service = BackupService::from_config(config)
        .await
        .context("Failed to initialize backup service")?;

    Ok(match account {
        Some(account) => service.with_account(account),
        None => service,
    })
}

/// Encrypt a payload file and upload it.
async fn cmd_backup(
    config: &LockboxConfig,
    account: Option<String>,
    input: &Path,
    use_passphrase: bool,
) -> Result<()> {
    info!("Backing up {}", input.display());

    let json = Zeroizing::new(
        tokio::fs::read_to_string(input)
            .await
            .context("Failed to read payload file")?,
    );
    let payload: BackupPayload =
        serde_json::from_str(&json).context("Payload file is not valid backup JSON")?;

    let mode = if use_passphrase {
        let passphrase = prompt_passphrase("Backup passphrase: ")?;
        let confirm = prompt_passphrase("Confirm passphrase: ")?;

        if passphrase.as_bytes() != confirm.as_bytes() {
            anyhow::bail!("Passphrases do not match");
        }

        if passphrase.is_empty() {
            anyhow::bail!("Passphrase cannot be empty");
        }

        BackupMode::Passphrase(passphrase)
    } else {
        BackupMode::Device
    };

    let counts = payload.counts();
    let service = service(config, account).await?;
    interruptible(async { Ok(service.perform_backup(payload, mode).await?) })
        .await
        .context("Backup failed")?;

    println!("Backup uploaded ({}).", counts);
    Ok(())
}

/// Download, decrypt and write the newest backup.
async fn cmd_restore(
    config: &LockboxConfig,
    account: Option<String>,
    output: &Path,
    use_passphrase: bool,
    merge: bool,
) -> Result<()> {
    let mode = if use_passphrase {
        BackupMode::Passphrase(prompt_passphrase("Backup passphrase: ")?)
    } else {
        BackupMode::Device
    };

    let service = service(config, account).await?;
    let restored = interruptible(async { Ok(service.perform_restore(mode).await?) })
        .await
        .context("Restore failed")?;

    let Some(restored) = restored else {
        println!("No backup found.");
        return Ok(());
    };

    let payload = if merge && output.exists() {
        let existing = Zeroizing::new(
            tokio::fs::read_to_string(output)
                .await
                .context("Failed to read existing output file")?,
        );
        let mut current: BackupPayload =
            serde_json::from_str(&existing).context("Existing output file is not backup JSON")?;
        current.merge(restored);
        current
    } else {
        restored
    };

    let json = Zeroizing::new(
        serde_json::to_string_pretty(&payload).context("Failed to serialize payload")?,
    );
    tokio::fs::write(output, json.as_bytes())
        .await
        .context("Failed to write output file")?;

    println!("Restored {} to {}", payload.counts(), output.display());
    Ok(())
}

/// Show session state and last backup time.
async fn cmd_status(config: &LockboxConfig, account: Option<String>) -> Result<()> {
    let service = service(config, account).await?;

    if service.is_signed_out() {
        println!("Signed out.");
        return Ok(());
    }

    let last = interruptible(async { Ok(service.last_backup_timestamp().await?) })
        .await
        .context("Failed to query backups")?;

    match last {
        Some(timestamp) => println!("Last backup: {}", timestamp),
        None => println!("No backup yet."),
    }
    Ok(())
}

/// Store a credential obtained out of band.
async fn cmd_sign_in(config: &LockboxConfig, credential: StoredCredential) -> Result<()> {
    let service = service(config, None).await?;
    service
        .sign_in(credential)
        .await
        .context("Failed to store credential")?;

    println!("Signed in.");
    Ok(())
}

/// Complete the consent flow with an authorization code.
async fn cmd_sign_in_code(
    config: &LockboxConfig,
    code: &str,
    account: Option<String>,
) -> Result<()> {
    let account = account.context("--user-id (or --account) is required with --code")?;
    let identity =
        OAuthIdentity::new(config.oauth.clone()).context("Invalid OAuth configuration")?;

    let issued = interruptible(async { Ok(identity.exchange_code(code).await?) })
        .await
        .context("Authorization code exchange failed")?;

    cmd_sign_in(config, issued.to_credential(&account)).await
}

/// Forget all credentials.
async fn cmd_sign_out(config: &LockboxConfig) -> Result<()> {
    let service = service(config, None).await?;
    service.sign_out().await.context("Sign-out incomplete")?;

    println!("Signed out.");
    Ok(())
}

/// Print the consent URL.
fn cmd_authorize_url(config: &LockboxConfig, account: &str) -> Result<()> {
    let identity =
        OAuthIdentity::new(config.oauth.clone()).context("Invalid OAuth configuration")?;
    let intent = identity.consent_intent(Some(account), &config.scopes, "Requested by user");

    println!("{}", intent.url);
    Ok(())
}
