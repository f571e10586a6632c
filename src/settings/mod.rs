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


//! Plugin settings dialog logic
//!
//! The dialog itself lives in the host. This module holds what happens
//! behind it: the edited values, the host's capabilities, and the save.

pub mod form;
pub mod host;
pub mod save;

pub use form::{normalize_library_keys, SettingsForm};
pub use host::{
    confirm_config_name, create_date_column, custom_column_name, ColumnCreation, ColumnRequest,
    CustomColumns, DateColumn, Notifier,
};
pub use save::{save_settings, SaveHost, SaveOutcome, RESTART_MESSAGE};
