// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use libby_core::api::auth::{mask, SetupCode};
use libby_core::api::client::{ClientConfig, LibbyClient};
use libby_core::settings::{normalize_library_keys, save_settings, Notifier, SaveHost, SettingsForm};
use libby_core::storage::{PrefKey, PrefValue, PreferenceBatch, PreferenceStore};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "libby-cli")]
#[command(about = "Libby plugin CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Preference file (default: calibre's plugin directory, or $LIBBY_PREFS_PATH)
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stored preferences, secrets masked
    Show,
    /// Check a setup code's format without contacting Libby
    CheckCode {
        code: String,
    },
    /// Exchange a setup code and store the resulting token
    Link {
        code: String,
    },
    /// Set the libraries searched, as a comma separated list of keys
    Libraries {
        keys: String,
    },
    /// List the library cards of the linked account
    Cards,
}

/// Prints what the settings dialog would show
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn report_error(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }

    fn request_restart(&self, message: &str) {
        eprintln!("{}", message);
    }
}

fn init_logging() -> anyhow::Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let path = cli.prefs.unwrap_or_else(PreferenceStore::default_path);
    info!(path = %path.display(), "Using preference file");
    let mut store = PreferenceStore::open(&path);

    match cli.command {
        Commands::Show => {
            println!("# {}", path.display());
            for (key, value) in store.preferences().iter() {
                let shown = match (key, value) {
                    (PrefKey::LibbySetupCode | PrefKey::LibbyToken, PrefValue::Text(s)) => mask(s),
                    _ => value.to_json().to_string(),
                };
                println!("{} = {}", key.as_str(), shown);
            }
            println!("configured = {}", store.preferences().is_configured());
        }
        Commands::CheckCode { code } => match SetupCode::parse(code.trim()) {
            Ok(code) => println!("{} is a valid setup code", code),
            Err(e) => bail!(e.user_message()),
        },
        Commands::Link { code } => {
            let form = SettingsForm {
                setup_code: code,
                ..SettingsForm::from_preferences(store.preferences())
            };
            let host = SaveHost {
                notifier: &TerminalNotifier,
                columns: None,
                restart_pending: false,
            };
            let outcome = save_settings(&mut store, &form, &host, LibbyClient::new)
                .await
                .context("Linking failed")?;
            if outcome.credential_updated {
                println!("Linked. Token {}", mask(store.preferences().text(PrefKey::LibbyToken)));
            } else {
                println!("Setup code unchanged, nothing to do");
            }
        }
        Commands::Libraries { keys } => {
            let keys = normalize_library_keys(&keys);
            let mut batch = PreferenceBatch::new();
            batch.set(PrefKey::SearchLibraries, keys.clone());
            store.save(batch).context("Could not save preferences")?;
            println!("Searching {} libraries: {}", keys.len(), keys.join(", "));
        }
        Commands::Cards => {
            let Some(token) = store.preferences().identity_token() else {
                bail!("Libby is not linked yet, run `libby-cli link <code>` first");
            };
            let config = ClientConfig::from_preferences(store.preferences());
            let client = LibbyClient::with_identity(config, token)?;
            let sync = client.sync().await.context("Could not fetch cards")?;
            if !sync.is_logged_in() {
                bail!("The stored token is no longer linked to a Libby account");
            }

            for card in &sync.cards {
                let loans = card.loan_usage();
                let holds = card.hold_usage();
                println!("{} ({})", card.card_name, card.advantage_key);
                println!(
                    "  loans {}/{}, holds {}/{}",
                    loans.count, loans.limit, holds.count, holds.limit
                );
                if let Some(created) = card.created_at() {
                    println!("  created {}", created.format("%Y-%m-%d"));
                }
                if let Some(links) = card.links() {
                    println!("  {}", links.libby_library());
                    println!("  {}", links.overdrive_site());
                }
            }
        }
    }

    Ok(())
}
