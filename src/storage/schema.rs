// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Preference schema
//!
//! The set of recognised keys is fixed at compile time. Every key has a kind
//! (what values it accepts) and a default. Keys are stored in the plugin's
//! JSON preference file under the names returned by [`PrefKey::as_str`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Plugin name; also the preference file stem
pub const PLUGIN_NAME: &str = "overdrive_libby";

/// Maximum number of library keys searched at once
pub const MAX_SEARCH_LIBRARIES: usize = 24;

/// Recognised preference keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrefKey {
    LibbySetupCode,
    LibbyToken,
    HideMagazines,
    HideEbooks,
    HideBooksAlreadyInLib,
    ExcludeEmptyBooks,
    HideHoldsUnavailable,
    PreferOpenFormats,
    TagEbooks,
    TagMagazines,
    ConfirmReturns,
    ConfirmCancellations,
    OverdriveLinkIntegration,
    MarkUpdatedBooks,
    AlwaysDownloadAsNew,
    NetworkTimeout,
    NetworkRetry,
    SearchResultsMax,
    SearchLibraries,
    CustcolBorrowedDate,
    CustcolDueDate,
    MainUiWidth,
    MainUiHeight,
    LastBorrowAction,
    LastSelectedTab,
}

impl PrefKey {
    pub const ALL: [PrefKey; 25] = [
        PrefKey::LibbySetupCode,
        PrefKey::LibbyToken,
        PrefKey::HideMagazines,
        PrefKey::HideEbooks,
        PrefKey::HideBooksAlreadyInLib,
        PrefKey::ExcludeEmptyBooks,
        PrefKey::HideHoldsUnavailable,
        PrefKey::PreferOpenFormats,
        PrefKey::TagEbooks,
        PrefKey::TagMagazines,
        PrefKey::ConfirmReturns,
        PrefKey::ConfirmCancellations,
        PrefKey::OverdriveLinkIntegration,
        PrefKey::MarkUpdatedBooks,
        PrefKey::AlwaysDownloadAsNew,
        PrefKey::NetworkTimeout,
        PrefKey::NetworkRetry,
        PrefKey::SearchResultsMax,
        PrefKey::SearchLibraries,
        PrefKey::CustcolBorrowedDate,
        PrefKey::CustcolDueDate,
        PrefKey::MainUiWidth,
        PrefKey::MainUiHeight,
        PrefKey::LastBorrowAction,
        PrefKey::LastSelectedTab,
    ];

    /// Name of the key in the preference file
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LibbySetupCode => "libby_setup_code",
            Self::LibbyToken => "libby_token",
            Self::HideMagazines => "hide_magazines",
            Self::HideEbooks => "hide_ebooks",
            Self::HideBooksAlreadyInLib => "hide_books_in_already_lib",
            Self::ExcludeEmptyBooks => "exclude_empty_books",
            Self::HideHoldsUnavailable => "hide_holds_unavailable",
            Self::PreferOpenFormats => "prefer_open_formats",
            Self::TagEbooks => "tag_ebooks",
            Self::TagMagazines => "tag_magazines",
            // host "confirm before action" convention: base name + "_again"
            Self::ConfirmReturns => "confirm_returns_again",
            Self::ConfirmCancellations => "confirm_cancels_again",
            Self::OverdriveLinkIntegration => "enable_overdrivelink_integration",
            Self::MarkUpdatedBooks => "mark_updated_books",
            Self::AlwaysDownloadAsNew => "always_download_new",
            Self::NetworkTimeout => "network_timeout",
            Self::NetworkRetry => "network_retry",
            Self::SearchResultsMax => "search_results_max",
            Self::SearchLibraries => "search_libraries",
            Self::CustcolBorrowedDate => "custcol_borrowed_dt",
            Self::CustcolDueDate => "custcol_due_dt",
            Self::MainUiWidth => "main_ui_width",
            Self::MainUiHeight => "main_ui_height",
            Self::LastBorrowAction => "last_borrow_action",
            Self::LastSelectedTab => "last_selected_tab",
        }
    }

    /// Look up a key by its file name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    pub fn kind(&self) -> PrefKind {
        match self {
            Self::LibbySetupCode
            | Self::LibbyToken
            | Self::TagEbooks
            | Self::TagMagazines
            | Self::CustcolBorrowedDate
            | Self::CustcolDueDate => PrefKind::Text,

            Self::HideMagazines
            | Self::HideEbooks
            | Self::HideBooksAlreadyInLib
            | Self::ExcludeEmptyBooks
            | Self::HideHoldsUnavailable
            | Self::PreferOpenFormats
            | Self::ConfirmReturns
            | Self::ConfirmCancellations
            | Self::OverdriveLinkIntegration
            | Self::MarkUpdatedBooks
            | Self::AlwaysDownloadAsNew => PrefKind::Flag,

            Self::NetworkTimeout => PrefKind::Int { min: 10, max: 180 },
            Self::NetworkRetry => PrefKind::Int { min: 0, max: 5 },
            Self::SearchResultsMax => PrefKind::Int { min: 20, max: 60 },
            Self::MainUiWidth | Self::MainUiHeight | Self::LastSelectedTab => {
                PrefKind::Int { min: 0, max: i64::MAX }
            }

            Self::SearchLibraries => PrefKind::List { max_len: MAX_SEARCH_LIBRARIES },

            Self::LastBorrowAction => PrefKind::Choice(BorrowAction::NAMES),
        }
    }

    pub fn default_value(&self) -> PrefValue {
        match self {
            Self::ExcludeEmptyBooks
            | Self::HideHoldsUnavailable
            | Self::PreferOpenFormats
            | Self::ConfirmReturns
            | Self::ConfirmCancellations
            | Self::OverdriveLinkIntegration
            | Self::MarkUpdatedBooks => PrefValue::Flag(true),
            Self::NetworkTimeout => PrefValue::Int(30),
            Self::NetworkRetry => PrefValue::Int(1),
            Self::SearchResultsMax => PrefValue::Int(20),
            Self::LastBorrowAction => PrefValue::Text(BorrowAction::Borrow.as_str().to_string()),
            _ => match self.kind() {
                PrefKind::Text | PrefKind::Choice(_) => PrefValue::Text(String::new()),
                PrefKind::Flag => PrefValue::Flag(false),
                PrefKind::Int { .. } => PrefValue::Int(0),
                PrefKind::List { .. } => PrefValue::List(Vec::new()),
            },
        }
    }
}

/// What a key accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefKind {
    Text,
    Flag,
    /// Integer within `min..=max`
    Int { min: i64, max: i64 },
    /// Distinct keys, each trimmed, lower-case and non-empty, at most
    /// `max_len` of them
    List { max_len: usize },
    /// One of a fixed set of strings
    Choice(&'static [&'static str]),
}

impl PrefKind {
    pub fn accepts(&self, value: &PrefValue) -> bool {
        match (self, value) {
            (PrefKind::Text, PrefValue::Text(_)) => true,
            (PrefKind::Flag, PrefValue::Flag(_)) => true,
            (PrefKind::Int { min, max }, PrefValue::Int(v)) => (*min..=*max).contains(v),
            (PrefKind::List { max_len }, PrefValue::List(items)) => {
                items.len() <= *max_len && is_normalized_key_list(items)
            }
            (PrefKind::Choice(names), PrefValue::Text(v)) => names.contains(&v.as_str()),
            _ => false,
        }
    }
}

fn is_normalized_key_list(items: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().all(|item| {
        !item.is_empty()
            && item.trim() == item
            && item.to_lowercase() == *item
            && seen.insert(item.as_str())
    })
}

/// A stored preference value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Flag(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl PrefValue {
    /// Convert a raw JSON value; `None` for shapes no key can hold
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(PrefValue::Flag(*b)),
            Value::Number(n) => n.as_i64().map(PrefValue::Int),
            Value::String(s) => Some(PrefValue::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(PrefValue::List),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PrefValue::Flag(b) => Value::Bool(*b),
            PrefValue::Int(i) => Value::from(*i),
            PrefValue::Text(s) => Value::String(s.clone()),
            PrefValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

impl From<bool> for PrefValue {
    fn from(value: bool) -> Self {
        PrefValue::Flag(value)
    }
}

impl From<i64> for PrefValue {
    fn from(value: i64) -> Self {
        PrefValue::Int(value)
    }
}

impl From<String> for PrefValue {
    fn from(value: String) -> Self {
        PrefValue::Text(value)
    }
}

impl From<&str> for PrefValue {
    fn from(value: &str) -> Self {
        PrefValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for PrefValue {
    fn from(value: Vec<String>) -> Self {
        PrefValue::List(value)
    }
}

/// Default action of the borrow button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowAction {
    Borrow,
    BorrowAndDownload,
}

impl BorrowAction {
    pub const NAMES: &'static [&'static str] = &["borrow", "borrow_and_download"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrow => "borrow",
            Self::BorrowAndDownload => "borrow_and_download",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "borrow" => Some(Self::Borrow),
            "borrow_and_download" => Some(Self::BorrowAndDownload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_key_has_an_accepted_default() {
        for key in PrefKey::ALL {
            assert!(
                key.kind().accepts(&key.default_value()),
                "default for {} does not fit its kind",
                key.as_str()
            );
        }
    }

    #[test]
    fn test_key_names_round_trip_and_are_unique() {
        let names: HashSet<_> = PrefKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), PrefKey::ALL.len());
        assert_eq!(PrefKey::parse("network_timeout"), Some(PrefKey::NetworkTimeout));
        assert_eq!(PrefKey::parse("magazine_subscriptions"), None);
    }

    #[test]
    fn test_documented_defaults() {
        assert_eq!(PrefKey::LibbySetupCode.default_value(), PrefValue::Text(String::new()));
        assert_eq!(PrefKey::LibbyToken.default_value(), PrefValue::Text(String::new()));
        assert_eq!(PrefKey::NetworkTimeout.default_value(), PrefValue::Int(30));
        assert_eq!(PrefKey::NetworkRetry.default_value(), PrefValue::Int(1));
        assert_eq!(PrefKey::SearchResultsMax.default_value(), PrefValue::Int(20));
        assert_eq!(PrefKey::SearchLibraries.default_value(), PrefValue::List(vec![]));
        assert_eq!(PrefKey::HideEbooks.default_value(), PrefValue::Flag(false));
        assert_eq!(PrefKey::ConfirmReturns.default_value(), PrefValue::Flag(true));
    }

    #[test]
    fn test_int_ranges() {
        let timeout = PrefKey::NetworkTimeout.kind();
        assert!(timeout.accepts(&PrefValue::Int(10)));
        assert!(timeout.accepts(&PrefValue::Int(180)));
        assert!(!timeout.accepts(&PrefValue::Int(9)));
        assert!(!timeout.accepts(&PrefValue::Int(181)));
        assert!(!timeout.accepts(&PrefValue::Text("30".into())));

        let retry = PrefKey::NetworkRetry.kind();
        assert!(retry.accepts(&PrefValue::Int(0)));
        assert!(!retry.accepts(&PrefValue::Int(6)));
    }

    #[test]
    fn test_list_and_choice() {
        let libraries = PrefKey::SearchLibraries.kind();
        let many: Vec<String> = (0..25).map(|i| format!("lib{}", i)).collect();
        assert!(!libraries.accepts(&PrefValue::List(many[..25].to_vec())));
        assert!(libraries.accepts(&PrefValue::List(many[..24].to_vec())));
        assert!(libraries.accepts(&PrefValue::List(Vec::new())));

        let list = |items: &[&str]| PrefValue::List(items.iter().map(|s| s.to_string()).collect());
        assert!(libraries.accepts(&list(&["lapl", "sno-isle"])));
        assert!(!libraries.accepts(&list(&["lapl", "lapl"])));
        assert!(!libraries.accepts(&list(&["LAPL"])));
        assert!(!libraries.accepts(&list(&[" sno-isle "])));
        assert!(!libraries.accepts(&list(&["lapl", ""])));

        let action = PrefKey::LastBorrowAction.kind();
        assert!(action.accepts(&"borrow_and_download".into()));
        assert!(!action.accepts(&"steal".into()));
    }

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(PrefValue::from_json(&serde_json::json!(true)), Some(PrefValue::Flag(true)));
        assert_eq!(PrefValue::from_json(&serde_json::json!(42)), Some(PrefValue::Int(42)));
        assert_eq!(PrefValue::from_json(&serde_json::json!(4.5)), None);
        assert_eq!(
            PrefValue::from_json(&serde_json::json!(["a", "b"])),
            Some(PrefValue::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(PrefValue::from_json(&serde_json::json!(["a", 1])), None);
        assert_eq!(PrefValue::from_json(&serde_json::json!({"a": 1})), None);
    }
}
