//! Command definitions and handlers.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use workdesk_core::auth::DEFAULT_SERVICE;
use workdesk_core::models::{ProfileUpdateRequest, RegisterRequest};
use workdesk_core::{
    ApiConfig, Config, CredentialStorage, ExecutionContext, FileStorage, KeyringStorage,
    NoopStorage, ResourceClient, Workdesk,
};

/// Credentials file name inside the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Parser)]
#[command(name = "workdesk")]
#[command(version)]
#[command(about = "Command-line client for the Workdesk management API")]
pub struct Cli {
    /// Where credentials are kept between runs
    #[arg(long, value_enum, default_value_t = StorageKind::Keyring, global = true)]
    storage: StorageKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    /// OS keychain
    Keyring,
    /// JSON file in the cache directory
    File,
    /// Keep nothing; every request is anonymous
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResourceKind {
    Projects,
    Ideas,
    Clients,
    Finances,
    Experiences,
    Chats,
    Tasks,
    Testimonials,
    Certifications,
    Languages,
    ApiKeys,
}

impl ResourceKind {
    fn endpoint(self) -> &'static str {
        match self {
            ResourceKind::Projects => "/projects",
            ResourceKind::Ideas => "/ideas",
            ResourceKind::Clients => "/clients",
            ResourceKind::Finances => "/finance",
            ResourceKind::Experiences => "/experiences",
            ResourceKind::Chats => "/chats",
            ResourceKind::Tasks => "/scheduler",
            ResourceKind::Testimonials => "/testimonials",
            ResourceKind::Certifications => "/certifications",
            ResourceKind::Languages => "/languages",
            ResourceKind::ApiKeys => "/api-keys",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store credentials
    Login {
        /// Account e-mail (defaults to the last one used)
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account and log in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },

    /// Revoke the session and forget local credentials
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Show or edit the profile
    Profile {
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },

    /// Change the account password
    ChangePassword,

    /// List one page of a resource
    List {
        #[arg(value_enum)]
        resource: ResourceKind,
        #[arg(long, default_value_t = workdesk_core::api::DEFAULT_PAGE)]
        page: u32,
        #[arg(long, default_value_t = workdesk_core::api::DEFAULT_PAGE_SIZE)]
        limit: u32,
    },

    /// Show a single resource
    Show {
        #[arg(value_enum)]
        resource: ResourceKind,
        id: String,
    },

    /// Delete a resource
    Delete {
        #[arg(value_enum)]
        resource: ResourceKind,
        id: String,
    },

    /// Dashboard counters
    Dashboard,

    /// Show the account preferences
    Preferences,

    /// Finance report for a period (e.g. 2026-03)
    Report { period: String },

    /// Mark a scheduled task completed
    CompleteTask { id: String },

    /// Show a chat's messages
    Messages {
        chat_id: String,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Post a message to a chat
    Send { chat_id: String, message: String },
}

fn build_client(kind: StorageKind, config: &Config) -> Result<Workdesk> {
    let (context, storage): (ExecutionContext, Arc<dyn CredentialStorage>) = match kind {
        StorageKind::Keyring => (
            ExecutionContext::Client,
            Arc::new(KeyringStorage::new(DEFAULT_SERVICE)),
        ),
        StorageKind::File => {
            let path = Config::cache_dir()?.join(CREDENTIALS_FILE);
            (ExecutionContext::Client, Arc::new(FileStorage::new(path)))
        }
        StorageKind::None => (ExecutionContext::Server, Arc::new(NoopStorage)),
    };
    Workdesk::new(ApiConfig::from_env(config), context, storage)
        .context("Failed to create API client")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{} is required", label);
    }
    Ok(value)
}

fn prompt_password(label: &str) -> Result<String> {
    let value = rpassword::prompt_password(format!("{}: ", label))
        .context("Failed to read password")?;
    if value.is_empty() {
        bail!("{} is required", label);
    }
    Ok(value)
}

fn json_client(workdesk: &Workdesk, kind: ResourceKind) -> ResourceClient<serde_json::Value> {
    ResourceClient::at(workdesk.management().clone(), kind.endpoint())
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Ignoring unreadable config file");
        Config::default()
    });
    let workdesk = build_client(cli.storage, &config)?;

    match cli.command {
        Commands::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("E-mail")?,
            };
            let password = prompt_password("Password")?;

            let state = workdesk.auth_state();
            state.login(&email, &password).await.context("Login failed")?;
            match state.snapshot().user {
                Some(user) => println!("Logged in as {}", user.display_name()),
                None => println!("Logged in"),
            }

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to save config");
            }
        }

        Commands::Register {
            email,
            username,
            first_name,
            last_name,
        } => {
            let password = prompt_password("Password")?;
            if prompt_password("Confirm password")? != password {
                bail!("Passwords do not match");
            }
            let details = RegisterRequest {
                email,
                password,
                username,
                first_name,
                last_name,
            };
            workdesk
                .auth_state()
                .register(&details)
                .await
                .context("Registration failed")?;
            println!("Account created for {}", details.email);
        }

        Commands::Logout => {
            let state = workdesk.auth_state();
            match state.logout().await {
                Ok(()) => println!("Logged out"),
                Err(e) => println!("Local credentials cleared (server said: {})", e),
            }
        }

        Commands::Whoami => {
            let state = workdesk.auth_state();
            match state.initialize().await {
                Ok(Some(user)) => println!("{} <{}>", user.display_name(), user.email),
                Ok(None) => println!("Not logged in"),
                Err(e) => bail!("{}: {}", workdesk_core::auth::VERIFY_FAILED, e),
            }
        }

        Commands::Profile {
            bio,
            website,
            location,
        } => {
            let update = ProfileUpdateRequest {
                bio,
                website,
                location,
                ..Default::default()
            };
            let profile = if update.bio.is_none()
                && update.website.is_none()
                && update.location.is_none()
            {
                workdesk.auth().profile().await?
            } else {
                workdesk.auth().update_profile(&update).await?
            };
            print_json(&profile)?;
        }

        Commands::ChangePassword => {
            let old_password = prompt_password("Current password")?;
            let new_password = prompt_password("New password")?;
            if prompt_password("Confirm new password")? != new_password {
                bail!("Passwords do not match");
            }
            workdesk
                .auth_state()
                .change_password(&old_password, &new_password)
                .await
                .context("Failed to change password")?;
            println!("Password changed");
        }

        Commands::List {
            resource,
            page,
            limit,
        } => {
            let page = json_client(&workdesk, resource).list(page, limit).await?;
            print_json(&page)?;
        }

        Commands::Show { resource, id } => {
            print_json(&json_client(&workdesk, resource).get(&id).await?)?;
        }

        Commands::Delete { resource, id } => {
            json_client(&workdesk, resource).delete(&id).await?;
            println!("Deleted {}", id);
        }

        Commands::Dashboard => {
            print_json(&workdesk.dashboard_stats().await?)?;
        }

        Commands::Preferences => {
            print_json(&workdesk.user_preferences().await?)?;
        }

        Commands::Report { period } => {
            print_json(&workdesk.finances().report(&period).await?)?;
        }

        Commands::CompleteTask { id } => {
            let task = workdesk.scheduler().complete_task(&id).await?;
            println!("Completed: {}", task.title);
        }

        Commands::Messages { chat_id, limit } => {
            print_json(&workdesk.chats().messages(&chat_id, limit).await?)?;
        }

        Commands::Send { chat_id, message } => {
            print_json(&workdesk.chats().send_message(&chat_id, &message).await?)?;
        }
    }

    Ok(())
}
