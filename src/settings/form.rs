// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Values collected from the settings dialog

use crate::storage::{PrefKey, PreferenceBatch, Preferences, MAX_SEARCH_LIBRARIES};
use serde::{Deserialize, Serialize};

/// Everything the settings dialog lets the user edit
///
/// Fields hold raw widget text; [`SettingsForm::preference_batch`] applies
/// the normalization rules. Missing fields deserialize to the plugin
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsForm {
    pub setup_code: String,

    pub hide_magazines: bool,
    pub hide_ebooks: bool,
    pub hide_books_already_in_library: bool,
    pub exclude_empty_books: bool,
    pub hide_holds_unavailable: bool,
    pub prefer_open_formats: bool,
    pub confirm_returns: bool,
    pub confirm_cancellations: bool,
    pub overdrive_link_integration: bool,
    pub mark_updated_books: bool,
    pub always_download_as_new: bool,

    pub tag_ebooks: String,
    pub tag_magazines: String,

    pub network_timeout: i64,
    pub network_retry: i64,
    pub search_results_max: i64,

    /// Comma separated library keys as typed
    pub search_libraries: String,

    /// Only present when the host can create custom columns
    pub custcol_borrowed: Option<String>,
    pub custcol_due: Option<String>,
}

impl Default for SettingsForm {
    fn default() -> Self {
        Self::from_preferences(&Preferences::default())
    }
}

impl SettingsForm {
    /// Pre-fill the dialog from stored values
    pub fn from_preferences(prefs: &Preferences) -> Self {
        Self {
            setup_code: prefs.setup_code().to_string(),
            hide_magazines: prefs.flag(PrefKey::HideMagazines),
            hide_ebooks: prefs.flag(PrefKey::HideEbooks),
            hide_books_already_in_library: prefs.flag(PrefKey::HideBooksAlreadyInLib),
            exclude_empty_books: prefs.flag(PrefKey::ExcludeEmptyBooks),
            hide_holds_unavailable: prefs.flag(PrefKey::HideHoldsUnavailable),
            prefer_open_formats: prefs.flag(PrefKey::PreferOpenFormats),
            confirm_returns: prefs.flag(PrefKey::ConfirmReturns),
            confirm_cancellations: prefs.flag(PrefKey::ConfirmCancellations),
            overdrive_link_integration: prefs.flag(PrefKey::OverdriveLinkIntegration),
            mark_updated_books: prefs.flag(PrefKey::MarkUpdatedBooks),
            always_download_as_new: prefs.flag(PrefKey::AlwaysDownloadAsNew),
            tag_ebooks: prefs.text(PrefKey::TagEbooks).to_string(),
            tag_magazines: prefs.text(PrefKey::TagMagazines).to_string(),
            network_timeout: prefs.int(PrefKey::NetworkTimeout),
            network_retry: prefs.int(PrefKey::NetworkRetry),
            search_results_max: prefs.int(PrefKey::SearchResultsMax),
            search_libraries: prefs.search_libraries().join(", "),
            custcol_borrowed: Some(prefs.text(PrefKey::CustcolBorrowedDate).to_string()),
            custcol_due: Some(prefs.text(PrefKey::CustcolDueDate).to_string()),
        }
    }

    /// Setup code with surrounding whitespace removed
    pub fn trimmed_setup_code(&self) -> &str {
        self.setup_code.trim()
    }

    /// Normalized values for every field except the setup code and the
    /// custom columns, which need their own checks first
    pub fn preference_batch(&self) -> PreferenceBatch {
        let mut batch = PreferenceBatch::new();
        batch
            .set(PrefKey::HideMagazines, self.hide_magazines)
            .set(PrefKey::HideEbooks, self.hide_ebooks)
            .set(PrefKey::HideBooksAlreadyInLib, self.hide_books_already_in_library)
            .set(PrefKey::ExcludeEmptyBooks, self.exclude_empty_books)
            .set(PrefKey::HideHoldsUnavailable, self.hide_holds_unavailable)
            .set(PrefKey::PreferOpenFormats, self.prefer_open_formats)
            .set(PrefKey::ConfirmReturns, self.confirm_returns)
            .set(PrefKey::ConfirmCancellations, self.confirm_cancellations)
            .set(PrefKey::OverdriveLinkIntegration, self.overdrive_link_integration)
            .set(PrefKey::MarkUpdatedBooks, self.mark_updated_books)
            .set(PrefKey::AlwaysDownloadAsNew, self.always_download_as_new)
            .set(PrefKey::TagEbooks, normalize_tag(&self.tag_ebooks))
            .set(PrefKey::TagMagazines, normalize_tag(&self.tag_magazines))
            .set(PrefKey::NetworkTimeout, self.network_timeout)
            .set(PrefKey::NetworkRetry, self.network_retry)
            .set(PrefKey::SearchResultsMax, self.search_results_max)
            .set(PrefKey::SearchLibraries, normalize_library_keys(&self.search_libraries));
        batch
    }
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_string()
}

/// Split, trim, lower-case and dedupe comma separated library keys
///
/// First occurrence wins; at most [`MAX_SEARCH_LIBRARIES`] keys are kept.
pub fn normalize_library_keys(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(|k| k.trim().to_lowercase()) {
        if key.is_empty() || keys.contains(&key) {
            continue;
        }
        keys.push(key);
        if keys.len() == MAX_SEARCH_LIBRARIES {
            break;
        }
    }
    keys
}
