//! Classflow CLI - classroom client and data service
//!
//! Signs in against the Classflow tenant, talks to the classroom API, and
//! can host that API locally.

mod api;
mod auth;
mod classroom;
mod config;
mod models;
mod server;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::classes::{self, NewClass, NewMember};
use crate::api::{ApiClient, ApiError, ApiErrorKind};
use crate::auth::store::MemoryTokenStore;
use crate::auth::{AuthConfig, AuthSession, FileTokenStore, MsalGateway, Phase, TokenStore};
use crate::classroom::MemoryClassroom;
use crate::config::Config;
use crate::models::{Role, User};

#[derive(Parser)]
#[command(name = "classflow")]
#[command(about = "Classroom client for Classflow", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in (Microsoft account by default)
    Login {
        /// Sign in with a Google account
        #[arg(long, conflicts_with_all = ["microsoft", "email"])]
        google: bool,

        /// Sign in with a Microsoft account
        #[arg(long, conflicts_with = "email")]
        microsoft: bool,

        /// Sign in with email and password (password from CLASSFLOW_PASSWORD or prompt)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Sign out and clear cached credentials
    Logout,

    /// Show current session status
    Status,

    /// Show the signed-in user
    Whoami,

    /// List your classes
    Classes {
        /// Only classes where you have this role: teacher or student
        #[arg(short, long)]
        role: Option<Role>,
    },

    /// Work with a single class
    Class {
        #[command(subcommand)]
        command: ClassCommands,
    },

    /// Host the classroom API (in-memory storage)
    Serve {
        /// Address to listen on (defaults to server.bind from config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
enum ClassCommands {
    /// Show a class you belong to
    Show { class_id: String },

    /// Create a class with yourself as teacher
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Add a member to a class
    AddMember {
        class_id: String,

        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        role: Role,
    },

    /// Remove a member from a class
    RemoveMember {
        class_id: String,

        #[arg(short, long)]
        user: String,
    },
}

/// Application shell: owns the session and hands it to the request layer.
struct Shell {
    config: Config,
    store: Arc<dyn TokenStore>,
    gateway: Arc<MsalGateway>,
    session: Arc<AuthSession>,
}

impl Shell {
    async fn init(config: Config) -> Result<Self> {
        let auth_config = AuthConfig::from_settings(&config.identity);
        let (store, accounts_path): (Arc<dyn TokenStore>, PathBuf) = match Config::data_dir() {
            Ok(dir) => (
                Arc::new(FileTokenStore::new(dir.join("session.toml"))),
                dir.join("accounts.toml"),
            ),
            Err(e) => {
                tracing::warn!("No data directory ({:#}); the session will not be saved", e);
                (
                    Arc::new(MemoryTokenStore::new()),
                    std::env::temp_dir().join("classflow-accounts.toml"),
                )
            }
        };
        let gateway = Arc::new(MsalGateway::new(auth_config.clone(), accounts_path)?);
        let session =
            Arc::new(AuthSession::restore(gateway.clone(), store.clone(), &auth_config).await);

        Ok(Self {
            config,
            store,
            gateway,
            session,
        })
    }

    fn api(&self) -> Result<ApiClient> {
        Ok(
            ApiClient::new(&self.config.api, self.store.clone(), self.session.clone())?
                .with_reauthenticator(self.gateway.clone()),
        )
    }

    /// Turn a data-service failure into a message that says what to do next.
    fn explain(&self, err: ApiError) -> anyhow::Error {
        match err.kind() {
            ApiErrorKind::Transport => anyhow!(
                "{} (is the classroom API reachable at {}?)",
                err,
                self.config.api.base_url
            ),
            ApiErrorKind::Unauthorized => {
                anyhow!("Session expired. Run 'classflow login' again.")
            }
            _ => err.into(),
        }
    }

    fn require_user(&self) -> Result<User> {
        self.session
            .snapshot()
            .user
            .context("Not logged in. Run 'classflow login' first.")
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn login(shell: &Shell, google: bool, microsoft: bool, email: Option<String>) -> Result<()> {
    let session = &shell.session;

    let mut changes = session.subscribe();
    let watcher = tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let phase = changes.borrow_and_update().phase();
            tracing::debug!(?phase, "Session changed");
        }
    });

    match email {
        Some(email) => {
            let password = match std::env::var("CLASSFLOW_PASSWORD") {
                Ok(pw) if !pw.is_empty() => pw,
                _ => prompt("Password: ")?,
            };
            session.login(&email, &password).await;
        }
        None if google && !microsoft => session.login_with_google().await,
        None => session.login_with_microsoft().await,
    }
    watcher.abort();

    let state = session.snapshot();
    match session.phase() {
        Phase::Authenticated => {
            if let Some(user) = &state.user {
                println!("Logged in as {} <{}>", user.display_name, user.email);
            }
            Ok(())
        }
        Phase::Idle => {
            println!("Sign-in cancelled.");
            Ok(())
        }
        Phase::Failed => {
            let message = state.error.unwrap_or_default();
            session.clear_error();
            bail!("Login failed: {}", message)
        }
        Phase::Loading => bail!("Sign-in did not complete"),
    }
}

async fn status(shell: &Shell) -> Result<()> {
    let state = shell.session.snapshot();

    match &state.user {
        Some(user) => println!("Session:     signed in as {}", user.email),
        None => println!("Session:     signed out"),
    }

    match shell.store.credential().await? {
        Some(credential) if !credential.access_token.is_expired() => {
            println!("Access tok:  valid");
            if let Some(exp) = credential.access_token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => println!("Access tok:  expired"),
        None => println!("Access tok:  none"),
    }

    match shell.store.credential().await?.and_then(|c| c.refresh_token) {
        Some(_) => println!("Refresh tok: present"),
        None => println!("Refresh tok: none"),
    }

    println!("API:         {}", shell.config.api.base_url);

    if state.user.is_none() {
        println!("\nRun 'classflow login' to authenticate.");
    }
    Ok(())
}

fn whoami(user: &User) {
    println!();
    println!("Display Name: {}", user.display_name);
    println!("Email:        {}", user.email);
    println!("ID:           {}", user.id);
    if let Some(avatar) = &user.avatar {
        println!("Avatar:       {}", avatar);
    }
}

async fn class_command(shell: &Shell, command: ClassCommands) -> Result<()> {
    let user = shell.require_user()?;
    let api = shell.api()?;

    match command {
        ClassCommands::Show { class_id } => {
            let class = classes::get_class(&api, &class_id, &user.id)
                .await
                .map_err(|e| shell.explain(e))?;
            classes::print_class(&class);
        }
        ClassCommands::Create { name, description } => {
            let class = classes::create_class(
                &api,
                &NewClass {
                    name,
                    description,
                    owner_id: user.id.clone(),
                },
            )
            .await
            .map_err(|e| shell.explain(e))?;
            println!("Created class {} ({})", class.name, class.id);
            if let Some(code) = &class.invite_code {
                println!("Invite code: {}", code);
            }
        }
        ClassCommands::AddMember {
            class_id,
            user: member,
            role,
        } => {
            classes::add_member(
                &api,
                &class_id,
                &NewMember {
                    user_id: member.clone(),
                    role,
                    invited_by: Some(user.id.clone()),
                },
            )
            .await
            .map_err(|e| shell.explain(e))?;
            println!("Added {} as {}.", member, role);
        }
        ClassCommands::RemoveMember {
            class_id,
            user: member,
        } => {
            classes::remove_member(&api, &class_id, &member)
                .await
                .map_err(|e| shell.explain(e))?;
            println!("Removed {}.", member);
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Login {
            google,
            microsoft,
            email,
        } => {
            tracing::info!("Starting authentication flow...");
            let shell = Shell::init(config).await?;
            login(&shell, google, microsoft, email).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            let shell = Shell::init(config).await?;
            shell.session.logout().await;
            println!("Logged out.");
        }
        Commands::Status => {
            let shell = Shell::init(config).await?;
            status(&shell).await?;
        }
        Commands::Whoami => {
            let shell = Shell::init(config).await?;
            whoami(&shell.require_user()?);
        }
        Commands::Classes { role } => {
            tracing::info!("Fetching classes...");
            let shell = Shell::init(config).await?;
            let user = shell.require_user()?;
            let list = classes::get_classes(&shell.api()?, &user.id, role)
                .await
                .map_err(|e| shell.explain(e))?;
            classes::print_classes(&user, &list);
        }
        Commands::Class { command } => {
            let shell = Shell::init(config).await?;
            class_command(&shell, command).await?;
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            server::serve(&bind, Arc::new(MemoryClassroom::new())).await?;
        }
        Commands::Config { save } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("\nConfiguration saved.");
            }
        }
    }

    Ok(())
}
