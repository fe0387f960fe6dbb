use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rpassword::prompt_password;
use server_core::{
    AuditSink, Bridge, FileAccess, MemoryTargetStore, ServerConfig, SessionRegistry, SshConnector,
    Vault,
};
use sg_types::{AuditEvent, AuthType, Credential, TargetRecord};
use tokio::sync::mpsc;
use tracing::info;

use crate::web;

#[derive(Parser)]
#[command(
    name = "spyglass",
    about = "Browser-based SSH/SFTP access with encrypted credentials and trust-on-first-use host verification"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge server
    Serve {
        /// Override the configured bind address
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
        /// Config directory (defaults to $SPYGLASS_CONFIG_DIR, then ~/.spyglass)
        #[arg(long, value_name = "DIR")]
        config_dir: Option<PathBuf>,
    },
    /// Add or replace a target, encrypting its credential with your vault key
    AddTarget {
        /// Numeric id for the target
        #[arg(long)]
        id: i64,
        /// Numeric id of the owning user
        #[arg(long)]
        owner: i64,
        /// Display name
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        /// Remote account to log in as
        #[arg(long)]
        username: String,
        #[arg(long, value_enum, default_value_t = AuthKind::Password)]
        auth: AuthKind,
        /// Private key file, required with --auth key
        #[arg(long, value_name = "PATH")]
        key_file: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        config_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AuthKind {
    Password,
    Key,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { listen, config_dir } => serve(listen, config_dir).await,
            Command::AddTarget {
                id,
                owner,
                name,
                host,
                port,
                username,
                auth,
                key_file,
                config_dir,
            } => add_target(id, owner, name, host, port, username, auth, key_file, config_dir),
        }
    }
}

async fn serve(listen: Option<String>, config_dir: Option<PathBuf>) -> Result<()> {
    let mut config = ServerConfig::load_or_create(config_dir).context("loading server config")?;
    if let Some(listen) = listen {
        config.listen = listen;
    }

    let vault = Arc::new(Vault::new(config.server_secret()));
    let store = Arc::new(
        MemoryTargetStore::load(config.targets_file.clone()).context("loading target store")?,
    );
    let registry = Arc::new(SessionRegistry::new());
    let (audit, audit_rx) = AuditSink::channel();
    tokio::spawn(log_audit_events(audit_rx));

    let bridge = Bridge {
        store: store.clone(),
        connector: Arc::new(SshConnector),
        vault: vault.clone(),
        registry: registry.clone(),
        audit,
    };
    let files = FileAccess { store, vault };
    let app = web::router(web::AppState {
        bridge,
        files,
        registry,
        tokens: config.access_tokens.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(listen = %config.listen, "spyglass server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn log_audit_events(mut rx: mpsc::UnboundedReceiver<AuditEvent>) {
    while let Some(event) = rx.recv().await {
        info!(
            target: "audit",
            kind = ?event.kind,
            target_id = event.target_id,
            owner_id = event.owner_id,
            detail = %event.detail,
            failure = event.failure.as_deref().unwrap_or(""),
            "session event"
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn add_target(
    id: i64,
    owner: i64,
    name: String,
    host: String,
    port: u16,
    username: String,
    auth: AuthKind,
    key_file: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Result<()> {
    let config = ServerConfig::load_or_create(config_dir).context("loading server config")?;
    let vault = Vault::new(config.server_secret());
    let store =
        MemoryTargetStore::load(config.targets_file.clone()).context("loading target store")?;

    let vault_key = prompt_password("vault key: ").context("reading vault key")?;
    if vault_key.is_empty() {
        bail!("vault key must not be empty");
    }

    let (auth_type, credential) = match auth {
        AuthKind::Password => {
            let password = prompt_password(format!("password for {username}@{host}: "))
                .context("reading password")?;
            (AuthType::Password, Credential::password(password))
        }
        AuthKind::Key => {
            let Some(path) = key_file else {
                bail!("--key-file is required with --auth key");
            };
            let key = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let passphrase = prompt_password("key passphrase (empty for none): ")
                .context("reading passphrase")?;
            let passphrase = if passphrase.is_empty() { None } else { Some(passphrase) };
            (AuthType::Key, Credential::private_key(key, passphrase))
        }
    };

    let encrypted_credential = vault
        .encrypt_credential(&vault_key, &credential)
        .context("encrypting credential")?;

    store.insert(
        owner,
        TargetRecord {
            id,
            name: name.clone(),
            host,
            port,
            username,
            auth_type,
            encrypted_credential,
            host_fingerprint: None,
        },
    )?;

    println!("target '{name}' (id {id}) saved for user {owner}");
    Ok(())
}
