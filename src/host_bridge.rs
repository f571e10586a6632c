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


//! C FFI bridge for the calibre plugin
//!
//! The plugin (Python, via ctypes) owns the dialogs. It calls into these
//! functions with plain strings and shows whatever messages come back.
//!
//! # Architecture
//! calibre settings dialog → ctypes → C FFI → Rust
//!
//! # Response Format
//! All functions return JSON strings with this structure:
//! ```json
//! {
//!   "success": true,
//!   "data": { ... }
//! }
//! ```
//! Or on error:
//! ```json
//! {
//!   "success": false,
//!   "error": "Error message"
//! }
//! ```
//! A save that fails validation or linking is still a successful call: the
//! data says nothing was saved and carries the dialog to show.
//!
//! # Memory Management
//! Every returned pointer must be released with `libby_free_string()`.
//!
//! ```python
//! ptr = lib.libby_validate_setup_code(b"12345678")
//! try:
//!     result = json.loads(ctypes.string_at(ptr))
//! finally:
//!     lib.libby_free_string(ptr)
//! ```

use crate::api::auth::SetupCode;
use crate::api::client::LibbyClient;
use crate::error::LibbyError;
use crate::settings::{
    create_date_column, save_settings, ColumnCreation, ColumnRequest, CustomColumns, DateColumn,
    Notifier, SaveHost, SettingsForm,
};
use crate::storage::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;

// Calls block the host's UI thread while the exchange runs
lazy_static::lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Safely convert C string pointer to Rust String
///
/// # Safety
/// Caller must ensure ptr is a valid null-terminated C string
fn c_str_to_string(ptr: *const c_char) -> crate::Result<String> {
    if ptr.is_null() {
        return Err(LibbyError::InvalidInput("Null pointer received".to_string()));
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| LibbyError::InvalidInput(format!("Invalid UTF-8: {}", e)))
    }
}

/// Like `c_str_to_string`, but null or empty means "not given"
fn optional_c_str(ptr: *const c_char) -> crate::Result<Option<String>> {
    if ptr.is_null() {
        return Ok(None);
    }
    let s = c_str_to_string(ptr)?;
    Ok((!s.is_empty()).then_some(s))
}

/// Convert Rust string to C string pointer
///
/// # Safety
/// Caller MUST free the returned pointer using `libby_free_string()`
fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => {
            let error_json = error_response("String contains null bytes");
            // error_response output is plain JSON without interior nulls
            CString::new(error_json).map_or(std::ptr::null_mut(), CString::into_raw)
        }
    }
}

/// Create success response JSON
fn success_response<T: Serialize>(data: T) -> String {
    serde_json::json!({
        "success": true,
        "data": data
    })
    .to_string()
}

/// Create error response JSON
fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    })
    .to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> crate::Result<String> + panic::UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => error_response(&e.to_string()),
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

fn open_store(path: Option<String>) -> PreferenceStore {
    match path {
        Some(path) => PreferenceStore::open(path),
        None => PreferenceStore::open_default(),
    }
}

// ============================================================================
// HOST STAND-INS
// ============================================================================

/// What the plugin knows about calibre at save time
#[derive(Debug, Clone, Deserialize)]
struct HostFacts {
    #[serde(default = "default_prefix")]
    custom_field_prefix: String,
    #[serde(default)]
    has_column_creator: bool,
    /// calibre's own `must_restart_before_config`
    #[serde(default)]
    restart_pending: bool,
    /// The column creator has pending changes
    #[serde(default)]
    columns_need_restart: bool,
}

impl Default for HostFacts {
    fn default() -> Self {
        Self {
            custom_field_prefix: default_prefix(),
            has_column_creator: false,
            restart_pending: false,
            columns_need_restart: false,
        }
    }
}

fn default_prefix() -> String {
    "#".to_string()
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    form: SettingsForm,
    #[serde(default)]
    host: HostFacts,
}

#[derive(Debug, Clone, Serialize)]
struct Dialog {
    title: String,
    message: String,
}

/// Collects what the Rust side wants shown, for the plugin to display
#[derive(Debug, Default)]
struct DeferredNotifier {
    errors: RefCell<Vec<Dialog>>,
    restart: RefCell<Option<String>>,
}

impl Notifier for DeferredNotifier {
    fn report_error(&self, title: &str, message: &str) {
        self.errors.borrow_mut().push(Dialog {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    fn request_restart(&self, message: &str) {
        *self.restart.borrow_mut() = Some(message.to_string());
    }
}

/// Custom column subsystem described by [`HostFacts`] or a dialog result
/// the plugin already has
struct ReportedColumns {
    prefix: String,
    must_restart: bool,
    answer: ColumnCreation,
}

impl CustomColumns for ReportedColumns {
    fn custom_field_prefix(&self) -> &str {
        &self.prefix
    }

    fn create_column(&self, _request: &ColumnRequest) -> ColumnCreation {
        self.answer.clone()
    }

    fn must_restart(&self) -> bool {
        self.must_restart
    }
}

// ============================================================================
// SETUP CODE
// ============================================================================

/// Check a setup code's format without any network access
///
/// # Returns
/// ```json
/// { "success": true, "data": { "valid": true, "code": "12345678" } }
/// ```
///
/// # Safety
/// Caller must free the returned string with `libby_free_string()`
#[no_mangle]
pub extern "C" fn libby_validate_setup_code(code: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let code = c_str_to_string(code)?;
        let code = code.trim();
        Ok(success_response(serde_json::json!({
            "valid": SetupCode::is_valid(code),
            "code": code,
        })))
    });

    string_to_c_str(response)
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Load the values to pre-fill the settings dialog
///
/// # Arguments
/// * `path` - preference file; null or empty for the default location
///
/// # Returns
/// ```json
/// {
///   "success": true,
///   "data": { "path": "...", "configured": false, "form": { ... } }
/// }
/// ```
///
/// # Safety
/// Caller must free the returned string with `libby_free_string()`
#[no_mangle]
pub extern "C" fn libby_load_preferences(path: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let path = optional_c_str(path)?;
        let display_path = path
            .clone()
            .unwrap_or_else(|| PreferenceStore::default_path().display().to_string());
        let store = open_store(path);
        let prefs = store.preferences();

        Ok(success_response(serde_json::json!({
            "path": display_path,
            "configured": prefs.is_configured(),
            "form": SettingsForm::from_preferences(prefs),
        })))
    });

    string_to_c_str(response)
}

/// Validate and save the settings dialog, linking Libby if the code changed
///
/// # Arguments
/// * `path` - preference file; null or empty for the default location
/// * `request_json` - `{"form": {...}, "host": {"custom_field_prefix": "#",
///   "has_column_creator": true, "restart_pending": false,
///   "columns_need_restart": false}}`
///
/// # Returns
/// ```json
/// {
///   "success": true,
///   "data": {
///     "saved": true,
///     "credential_updated": true,
///     "applied": ["hide_ebooks", "..."],
///     "rejected": [],
///     "errors": [],
///     "restart_message": null
///   }
/// }
/// ```
///
/// # Safety
/// Caller must free the returned string with `libby_free_string()`
#[no_mangle]
pub extern "C" fn libby_save_settings(
    path: *const c_char,
    request_json: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let path = optional_c_str(path)?;
        let request_json = c_str_to_string(request_json)?;
        let request: SaveRequest = serde_json::from_str(&request_json)
            .map_err(|e| LibbyError::InvalidInput(format!("Invalid save request: {}", e)))?;

        let mut store = open_store(path);
        let notifier = DeferredNotifier::default();
        let columns = ReportedColumns {
            prefix: request.host.custom_field_prefix.clone(),
            must_restart: request.host.columns_need_restart,
            answer: ColumnCreation::Canceled,
        };
        let host = SaveHost {
            notifier: &notifier,
            columns: request
                .host
                .has_column_creator
                .then_some(&columns as &dyn CustomColumns),
            restart_pending: request.host.restart_pending,
        };

        let result = RUNTIME.block_on(save_settings(
            &mut store,
            &request.form,
            &host,
            LibbyClient::new,
        ));

        let (saved, credential_updated, applied, rejected): (bool, bool, Vec<&str>, Vec<&str>) =
            match result {
                Ok(outcome) => (
                    true,
                    outcome.credential_updated,
                    outcome.report.applied.iter().map(|k| k.as_str()).collect(),
                    outcome.report.rejected.iter().map(|k| k.as_str()).collect(),
                ),
                Err(_) => (false, false, Vec::new(), Vec::new()),
            };

        Ok(success_response(serde_json::json!({
            "saved": saved,
            "credential_updated": credential_updated,
            "applied": applied,
            "rejected": rejected,
            "errors": notifier.errors.into_inner(),
            "restart_message": notifier.restart.into_inner(),
        })))
    });

    string_to_c_str(response)
}

// ============================================================================
// CUSTOM COLUMNS
// ============================================================================

/// Describe the create-column dialog the plugin should open
///
/// # Arguments
/// * `prefix` - calibre's custom field prefix
/// * `kind` - `"borrowed"` or `"due"`
///
/// # Safety
/// Caller must free the returned string with `libby_free_string()`
#[no_mangle]
pub extern "C" fn libby_custom_column_request(
    prefix: *const c_char,
    kind: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let prefix = c_str_to_string(prefix)?;
        let column = parse_column(&c_str_to_string(kind)?)?;
        let recorder = RecordingColumns {
            prefix,
            seen: RefCell::new(None),
        };
        create_date_column(&recorder, &DeferredNotifier::default(), column)?;
        Ok(success_response(recorder.seen.into_inner()))
    });

    string_to_c_str(response)
}

/// Turn the create-column dialog's result into the text for the settings field
///
/// # Arguments
/// * `result_json` - `{"result": "COLUMN_ADDED", "payload": "#name"}`,
///   `{"result": "DUPLICATE_KEY"}`, `{"result": "CANCELED"}` or
///   `{"result": "FAILED", "payload": {"title": "...", "message": "..."}}`
///
/// # Returns
/// `{"lookup_name": "#..."}`, with `null` when the field should not change,
/// plus any error dialog to show.
///
/// # Safety
/// Caller must free the returned string with `libby_free_string()`
#[no_mangle]
pub extern "C" fn libby_custom_column_result(
    prefix: *const c_char,
    kind: *const c_char,
    result_json: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let prefix = c_str_to_string(prefix)?;
        let column = parse_column(&c_str_to_string(kind)?)?;
        let answer: ColumnCreation = serde_json::from_str(&c_str_to_string(result_json)?)
            .map_err(|e| LibbyError::InvalidInput(format!("Invalid column result: {}", e)))?;

        let columns = ReportedColumns {
            prefix,
            must_restart: false,
            answer,
        };
        let notifier = DeferredNotifier::default();
        let lookup_name = create_date_column(&columns, &notifier, column).ok().flatten();

        Ok(success_response(serde_json::json!({
            "lookup_name": lookup_name,
            "errors": notifier.errors.into_inner(),
        })))
    });

    string_to_c_str(response)
}

/// Captures the request instead of running a dialog
struct RecordingColumns {
    prefix: String,
    seen: RefCell<Option<ColumnRequest>>,
}

impl CustomColumns for RecordingColumns {
    fn custom_field_prefix(&self) -> &str {
        &self.prefix
    }

    fn create_column(&self, request: &ColumnRequest) -> ColumnCreation {
        *self.seen.borrow_mut() = Some(request.clone());
        ColumnCreation::Canceled
    }

    fn must_restart(&self) -> bool {
        false
    }
}

fn parse_column(kind: &str) -> crate::Result<DateColumn> {
    match kind {
        "borrowed" => Ok(DateColumn::Borrowed),
        "due" => Ok(DateColumn::Due),
        other => Err(LibbyError::InvalidInput(format!("Unknown column kind: {}", other))),
    }
}

// ============================================================================
// MEMORY MANAGEMENT
// ============================================================================

/// Free a string returned by any `libby_*` function
///
/// # Safety
/// `ptr` must come from this library and must not be used afterwards
#[no_mangle]
pub extern "C" fn libby_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}
