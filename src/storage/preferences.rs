// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Loaded preference values

use crate::api::auth::IdentityToken;
use crate::storage::schema::{BorrowAction, PrefKey, PrefValue};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Snapshot of every recognised preference
///
/// Always complete: keys missing from the file hold their defaults, so the
/// typed accessors never fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    values: BTreeMap<PrefKey, PrefValue>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            values: PrefKey::ALL.iter().map(|k| (*k, k.default_value())).collect(),
        }
    }
}

impl Preferences {
    pub fn get(&self, key: PrefKey) -> &PrefValue {
        // Every key is inserted by Default and values are only ever replaced
        &self.values[&key]
    }

    /// Replace a value; callers have already checked it against the key's kind
    pub(crate) fn set(&mut self, key: PrefKey, value: PrefValue) {
        self.values.insert(key, value);
    }

    pub fn text(&self, key: PrefKey) -> &str {
        match self.get(key) {
            PrefValue::Text(s) => s,
            _ => "",
        }
    }

    pub fn flag(&self, key: PrefKey) -> bool {
        matches!(self.get(key), PrefValue::Flag(true))
    }

    pub fn int(&self, key: PrefKey) -> i64 {
        match self.get(key) {
            PrefValue::Int(i) => *i,
            _ => 0,
        }
    }

    pub fn list(&self, key: PrefKey) -> &[String] {
        match self.get(key) {
            PrefValue::List(items) => items,
            _ => &[],
        }
    }

    pub fn setup_code(&self) -> &str {
        self.text(PrefKey::LibbySetupCode)
    }

    /// Stored identity token, if Libby has been linked
    pub fn identity_token(&self) -> Option<IdentityToken> {
        let token = self.text(PrefKey::LibbyToken);
        (!token.is_empty()).then(|| IdentityToken::new(token))
    }

    pub fn is_configured(&self) -> bool {
        !self.text(PrefKey::LibbyToken).is_empty()
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.int(PrefKey::NetworkTimeout).max(0) as u64)
    }

    pub fn network_retry(&self) -> u32 {
        self.int(PrefKey::NetworkRetry).clamp(0, u32::MAX as i64) as u32
    }

    pub fn search_results_max(&self) -> u32 {
        self.int(PrefKey::SearchResultsMax).clamp(0, u32::MAX as i64) as u32
    }

    pub fn search_libraries(&self) -> &[String] {
        self.list(PrefKey::SearchLibraries)
    }

    pub fn last_borrow_action(&self) -> BorrowAction {
        BorrowAction::parse(self.text(PrefKey::LastBorrowAction)).unwrap_or(BorrowAction::Borrow)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PrefKey, &PrefValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// JSON object keyed by file names
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_json()))
            .collect()
    }
}
