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


//! Libby identity service client
//!
//! Only the part of the Libby API needed to link an account and inspect its
//! cards: chip creation, clone by setup code, and chip sync.

pub mod auth;
pub mod cards;
pub mod client;

// Re-export commonly used types
pub use auth::{exchange_setup_code, IdentityService, IdentityToken, SetupCode, SetupCredential};
pub use cards::{LibraryCard, LibraryLinks, SyncState};
pub use client::{ClientConfig, LibbyClient};
