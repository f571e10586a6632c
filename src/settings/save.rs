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


//! Committing the settings dialog
//!
//! A save is one logical unit:
//!
//! 1. Custom column names are checked against the host's reserved prefix
//! 2. A changed setup code is exchanged for a new identity token, using the
//!    network timeout and retry count from the form being saved
//! 3. Every field, plus the new credential, is written as a single batch
//! 4. The host is told if a restart is needed
//!
//! Any failure in steps 1-3 is shown through the [`Notifier`] and leaves the
//! store exactly as it was, including fields unrelated to the failure.

use crate::api::auth::{exchange_setup_code, IdentityService, SetupCode};
use crate::api::client::ClientConfig;
use crate::error::{LibbyError, Result};
use crate::settings::form::SettingsForm;
use crate::settings::host::{CustomColumns, Notifier};
use crate::storage::{BatchReport, PrefKey, PreferenceBatch, PreferenceStore};
use tracing::{debug, info};

pub const RESTART_MESSAGE: &str =
    "Some of the changes you made require a restart. Please restart calibre as soon as possible.";

/// Host collaborators for one save
pub struct SaveHost<'a> {
    pub notifier: &'a dyn Notifier,
    /// `None` when the host has no custom column creator; the column fields
    /// are then neither checked nor saved
    pub columns: Option<&'a dyn CustomColumns>,
    /// The host already needs a restart for its own reasons
    pub restart_pending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// A new setup code was accepted and its token stored
    pub credential_updated: bool,
    /// The host was asked to restart
    pub restart_required: bool,
    pub report: BatchReport,
}

/// Validate and persist the settings dialog
///
/// `connect` builds the identity service for the exchange; it is only
/// called when the setup code changed and passed format validation.
///
/// # Errors
/// - `ValidationFailure` for a custom column name without the reserved prefix
/// - `InvalidFormat`, `ExchangeRejected` or `NetworkFailure` from the exchange
/// - `PreferenceStore` when the batch could not be written
///
/// Every error has already been reported through `host.notifier`.
pub async fn save_settings<S, F>(
    store: &mut PreferenceStore,
    form: &SettingsForm,
    host: &SaveHost<'_>,
    connect: F,
) -> Result<SaveOutcome>
where
    S: IdentityService,
    F: FnOnce(ClientConfig) -> Result<S>,
{
    match commit(store, form, host, connect).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let message = if err.is_exchange_error() {
                err.exchange_message(form.trimmed_setup_code())
            } else {
                err.user_message()
            };
            host.notifier.report_error(err.dialog_title(), &message);
            Err(err)
        }
    }
}

async fn commit<S, F>(
    store: &mut PreferenceStore,
    form: &SettingsForm,
    host: &SaveHost<'_>,
    connect: F,
) -> Result<SaveOutcome>
where
    S: IdentityService,
    F: FnOnce(ClientConfig) -> Result<S>,
{
    let mut batch = form.preference_batch();
    if let Some(columns) = host.columns {
        add_custom_columns(&mut batch, form, columns.custom_field_prefix())?;
    }

    let code = form.trimmed_setup_code();
    let mut credential_updated = false;
    if code != store.preferences().setup_code() {
        // Checked before connecting so a bad code never costs a request
        SetupCode::parse(code)?;

        let config = ClientConfig::from_preferences(&store.preview(&batch));
        debug!(
            timeout_secs = config.timeout.as_secs(),
            max_retries = config.max_retries,
            "Setup code changed, linking Libby"
        );
        let service = connect(config)
            .map_err(|e| LibbyError::network_error(e.to_string(), 0, e.is_retryable()))?;
        let credential = exchange_setup_code(&service, code).await?;

        batch
            .set(PrefKey::LibbySetupCode, credential.setup_code.as_str())
            .set(PrefKey::LibbyToken, credential.identity_token.into_inner());
        credential_updated = true;
    }

    let report = store.save(batch)?;
    info!(credential_updated, applied = report.applied.len(), "Settings saved");

    let restart_required = match host.columns {
        Some(columns) => host.restart_pending || columns.must_restart(),
        None => false,
    };
    if restart_required {
        host.notifier.request_restart(RESTART_MESSAGE);
    }

    Ok(SaveOutcome {
        credential_updated,
        restart_required,
        report,
    })
}

fn add_custom_columns(
    batch: &mut PreferenceBatch,
    form: &SettingsForm,
    prefix: &str,
) -> Result<()> {
    let fields = [
        (PrefKey::CustcolBorrowedDate, &form.custcol_borrowed),
        (PrefKey::CustcolDueDate, &form.custcol_due),
    ];
    let mut names = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let name = value.as_deref().unwrap_or_default().trim();
        if !name.is_empty() && !name.starts_with(prefix) {
            return Err(LibbyError::validation(
                key.as_str(),
                format!("The lookup name must begin with a '{}'", prefix),
            ));
        }
        names.push((key, name.to_string()));
    }
    for (key, name) in names {
        batch.set(key, name);
    }
    Ok(())
}
