// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Library cards from the Libby sync state
//!
//! `GET /chip/sync` answers with the reader's linked library cards. This
//! module types the parts the plugin uses: card identity, loan and hold
//! limits, and the dates Libby records for each card.

use crate::error::{LibbyError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// `result` value of a chip that is linked to a reader account
pub const SYNCHRONIZED: &str = "synchronized";

/// Response of `GET /chip/sync`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub cards: Vec<LibraryCard>,
}

impl SyncState {
    /// Linked and holding at least one card
    pub fn is_logged_in(&self) -> bool {
        self.result == SYNCHRONIZED && !self.cards.is_empty()
    }
}

/// One library card linked in Libby
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryCard {
    pub card_id: String,
    #[serde(default)]
    pub card_name: String,
    /// Library key, e.g. "lapl"
    #[serde(default)]
    pub advantage_key: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub create_date: Option<String>,
    #[serde(default)]
    pub authorize_date: Option<String>,
    #[serde(default)]
    pub limits: HashMap<String, u32>,
    #[serde(default)]
    pub counts: HashMap<String, u32>,
    #[serde(default)]
    pub library: Option<CardLibrary>,
}

/// Library summary embedded in a card
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardLibrary {
    #[serde(default)]
    pub name: String,
    pub website_id: u64,
}

/// Items in use against a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub count: u32,
    pub limit: u32,
}

impl Usage {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

impl LibraryCard {
    pub fn loan_usage(&self) -> Usage {
        self.usage("loan")
    }

    pub fn hold_usage(&self) -> Usage {
        self.usage("hold")
    }

    fn usage(&self, kind: &str) -> Usage {
        Usage {
            count: self.counts.get(kind).copied().unwrap_or(0),
            limit: self.limits.get(kind).copied().unwrap_or(0),
        }
    }

    /// When the card was added to Libby
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_date.as_deref().and_then(|s| parse_datetime(s).ok())
    }

    /// When the library last verified the card
    pub fn authorized_at(&self) -> Option<DateTime<Utc>> {
        self.authorize_date.as_deref().and_then(|s| parse_datetime(s).ok())
    }

    pub fn website_id(&self) -> Option<u64> {
        self.library.as_ref().map(|l| l.website_id)
    }

    /// Shortcuts to this card's library, if the card names one
    pub fn links(&self) -> Option<LibraryLinks> {
        if self.advantage_key.is_empty() {
            return None;
        }
        Some(LibraryLinks::new(&self.advantage_key, self.website_id()))
    }
}

/// Parse a Libby timestamp
///
/// Libby sends RFC 3339 with or without fractional seconds, and older cards
/// sometimes omit the offset entirely; those are taken as UTC.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(LibbyError::InvalidApiResponse {
        message: format!("Unrecognised date: {}", value),
        response_body: None,
    })
}

/// Links into Libby and OverDrive for one library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryLinks {
    library_key: String,
    website_id: Option<u64>,
}

impl LibraryLinks {
    pub fn new(library_key: &str, website_id: Option<u64>) -> Self {
        Self {
            library_key: library_key.to_string(),
            website_id,
        }
    }

    pub fn libby_library(&self) -> String {
        format!("https://libbyapp.com/library/{}", self.library_key)
    }

    pub fn overdrive_site(&self) -> String {
        format!("https://{}.overdrive.com/", self.library_key)
    }

    pub fn libby_loans(&self) -> Option<String> {
        self.website_id
            .map(|id| format!("https://libbyapp.com/shelf/loans/default,all,{}", id))
    }

    pub fn libby_holds(&self) -> Option<String> {
        self.website_id
            .map(|id| format!("https://libbyapp.com/shelf/holds/default,all,{}", id))
    }

    pub fn overdrive_loans(&self) -> Result<String> {
        self.overdrive_page("account/loans")
    }

    pub fn overdrive_holds(&self) -> Result<String> {
        self.overdrive_page("account/holds")
    }

    fn overdrive_page(&self, path: &str) -> Result<String> {
        let base = Url::parse(&self.overdrive_site())
            .map_err(|e| LibbyError::invalid_input(format!("Bad library key: {}", e)))?;
        let page = base
            .join(path)
            .map_err(|e| LibbyError::invalid_input(format!("Bad link path: {}", e)))?;
        Ok(page.to_string())
    }
}
