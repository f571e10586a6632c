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


//! Plugin preference storage
//!
//! Preferences live in one JSON object per plugin installation, next to the
//! host's other plugin configuration files.
//!
//! # Layout
//! - `schema` - every key the plugin knows, with its kind and default
//! - `preferences` - a complete, typed snapshot of loaded values
//! - `store` - loading and batch saving over a pluggable backend
//!
//! # Usage Example
//! ```no_run
//! use libby_core::storage::{PrefKey, PreferenceBatch, PreferenceStore};
//!
//! # fn example() -> libby_core::Result<()> {
//! let mut store = PreferenceStore::open_default();
//! println!("timeout: {:?}", store.preferences().network_timeout());
//!
//! let mut batch = PreferenceBatch::new();
//! batch.set(PrefKey::HideMagazines, true);
//! store.save(batch)?;
//! # Ok(())
//! # }
//! ```

pub mod preferences;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use preferences::Preferences;
pub use schema::{BorrowAction, PrefKey, PrefKind, PrefValue, MAX_SEARCH_LIBRARIES, PLUGIN_NAME};
pub use store::{
    BatchReport, JsonFileBackend, MemoryBackend, PreferenceBackend, PreferenceBatch,
    PreferenceStore, PREFS_PATH_ENV,
};
