// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Host application capabilities
//!
//! The settings flow talks to calibre only through these traits: one to
//! show messages, one for custom columns. The host plugin implements them
//! on top of its dialogs; tests use recording fakes.

use crate::error::{LibbyError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// User-facing notifications
pub trait Notifier {
    /// Show a blocking error dialog
    fn report_error(&self, title: &str, message: &str);

    /// Tell the user the host must be restarted for changes to apply
    fn request_restart(&self, message: &str);
}

/// Date columns the plugin can maintain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateColumn {
    Borrowed,
    Due,
}

impl DateColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrowed => "borrowed",
            Self::Due => "due",
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Self::Borrowed => "Libby Borrowed Date",
            Self::Due => "Libby Due Date",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Borrowed => "Loan's borrowed/checkout date",
            Self::Due => "Loan's due/expiry date",
        }
    }
}

/// What the host's create-column dialog is asked to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRequest {
    pub lookup_name: String,
    pub heading: String,
    pub datatype: &'static str,
    pub is_multiple: bool,
    pub description: String,
    pub freeze_lookup_name: bool,
}

/// Result of the host's create-column dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnCreation {
    Canceled,
    /// Column created; carries its final lookup name
    ColumnAdded(String),
    /// A column with the proposed lookup name already exists
    DuplicateKey,
    /// Anything else the host reports
    Failed { title: String, message: String },
}

/// The host's custom column subsystem
pub trait CustomColumns {
    /// Reserved prefix of custom column lookup names (`#` in calibre)
    fn custom_field_prefix(&self) -> &str;

    /// Run the create-column dialog
    fn create_column(&self, request: &ColumnRequest) -> ColumnCreation;

    /// Whether a column change is waiting for a restart
    fn must_restart(&self) -> bool;
}

/// Lookup name the plugin proposes for a date column
pub fn custom_column_name(prefix: &str, column: DateColumn) -> String {
    format!("{}libby_{}_date", prefix, column.as_str())
}

/// Preference name under the host's "confirm before action" convention
pub fn confirm_config_name(name: &str) -> String {
    format!("{}_again", name)
}

/// Ask the host to create a date column
///
/// Returns the lookup name to put in the settings field, or `None` when the
/// user cancelled.
///
/// # Errors
/// `ValidationFailure` when the host reports anything other than the three
/// known outcomes; the notifier has already shown it.
pub fn create_date_column<C, N>(
    columns: &C,
    notifier: &N,
    column: DateColumn,
) -> Result<Option<String>>
where
    C: CustomColumns + ?Sized,
    N: Notifier + ?Sized,
{
    let lookup_name = custom_column_name(columns.custom_field_prefix(), column);
    let request = ColumnRequest {
        lookup_name: lookup_name.clone(),
        heading: column.heading().to_string(),
        datatype: "datetime",
        is_multiple: false,
        description: column.description().to_string(),
        freeze_lookup_name: false,
    };

    match columns.create_column(&request) {
        ColumnCreation::Canceled => {
            debug!(column = column.as_str(), "Column creation cancelled");
            Ok(None)
        }
        ColumnCreation::ColumnAdded(name) => Ok(Some(name)),
        ColumnCreation::DuplicateKey => Ok(Some(lookup_name)),
        ColumnCreation::Failed { title, message } => {
            warn!(column = column.as_str(), %title, %message, "Column creation failed");
            notifier.report_error(&title, &message);
            Err(LibbyError::validation(column_field(column), message))
        }
    }
}

fn column_field(column: DateColumn) -> &'static str {
    match column {
        DateColumn::Borrowed => "custcol_borrowed_dt",
        DateColumn::Due => "custcol_due_dt",
    }
}
