// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! End-to-end tests of the settings save flow
//!
//! Uses an in-memory preference backend, a scripted identity service and a
//! notifier that records dialogs, so no network or UI is involved.

use libby_core::api::auth::{
    exchange_setup_code, ChipResponse, CloneResponse, IdentityService, IdentityToken, SetupCode,
};
use libby_core::api::client::ClientConfig;
use libby_core::settings::{
    save_settings, ColumnCreation, ColumnRequest, CustomColumns, Notifier, SaveHost, SettingsForm,
};
use libby_core::storage::{
    MemoryBackend, PrefKey, PreferenceStore, Preferences, MAX_SEARCH_LIBRARIES,
};
use libby_core::{LibbyError, Result};
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Script {
    Accept,
    /// `clone_by_code` answers 404, as Libby does for an unknown code
    RejectClone,
}

struct MockService {
    script: Script,
    calls: AtomicUsize,
}

impl MockService {
    fn new(script: Script) -> Self {
        Self { script, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityService for MockService {
    async fn get_chip(&self) -> Result<ChipResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChipResponse {
            chip: "9f1c0a".into(),
            identity: IdentityToken::new("eyJhbGciOi.identity.token"),
            syncable: false,
            primary: true,
        })
    }

    async fn clone_by_code(&self, _code: &SetupCode) -> Result<CloneResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Accept => Ok(CloneResponse { result: Some("cloned".into()) }),
            Script::RejectClone => Err(LibbyError::api_failed(
                "code not found",
                Some(404),
                Some("/chip/clone/code".into()),
            )),
        }
    }

    async fn is_logged_in(&self) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script == Script::Accept)
    }
}

impl IdentityService for &MockService {
    async fn get_chip(&self) -> Result<ChipResponse> {
        (**self).get_chip().await
    }

    async fn clone_by_code(&self, code: &SetupCode) -> Result<CloneResponse> {
        (**self).clone_by_code(code).await
    }

    async fn is_logged_in(&self) -> Result<bool> {
        (**self).is_logged_in().await
    }
}

#[derive(Default)]
struct RecordingNotifier {
    errors: RefCell<Vec<(String, String)>>,
    restarts: RefCell<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn report_error(&self, title: &str, message: &str) {
        self.errors.borrow_mut().push((title.into(), message.into()));
    }

    fn request_restart(&self, message: &str) {
        self.restarts.borrow_mut().push(message.into());
    }
}

struct CalibreColumns;

impl CustomColumns for CalibreColumns {
    fn custom_field_prefix(&self) -> &str {
        "#"
    }

    fn create_column(&self, _request: &ColumnRequest) -> ColumnCreation {
        ColumnCreation::Canceled
    }

    fn must_restart(&self) -> bool {
        false
    }
}

const STORED: &str = r#"{
  "libby_setup_code": "11112222",
  "libby_token": "old-token",
  "hide_ebooks": false,
  "tag_ebooks": "overdrive",
  "search_libraries": ["nypl"],
  "network_timeout": 45
}"#;

fn stored_store() -> (PreferenceStore, MemoryBackend) {
    let backend = MemoryBackend::with_contents(STORED);
    (PreferenceStore::load(Box::new(backend.clone())), backend)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn format_validation_happens_before_any_request() {
    let service = MockService::new(Script::Accept);
    for bad in ["", "1234567", "123456789", "1234567a", " 12345678", "１２３４５６７８"] {
        let err = exchange_setup_code(&service, bad).await.unwrap_err();
        assert!(matches!(err, LibbyError::InvalidFormat { .. }), "{:?} accepted", bad);
    }
    assert_eq!(service.calls(), 0);

    for good in ["12345678", "00000000", "99999999"] {
        assert!(SetupCode::is_valid(good));
    }
}

#[tokio::test]
async fn accepted_code_persists_code_and_token() {
    let (mut store, backend) = stored_store();
    let notifier = RecordingNotifier::default();
    let service = MockService::new(Script::Accept);
    let form = SettingsForm {
        setup_code: "12345678".into(),
        network_timeout: 30,
        network_retry: 1,
        ..SettingsForm::from_preferences(store.preferences())
    };
    let host = SaveHost { notifier: &notifier, columns: None, restart_pending: false };

    let mut seen = None;
    let outcome = save_settings(&mut store, &form, &host, |config: ClientConfig| {
        seen = Some((config.timeout, config.max_retries));
        Ok(&service)
    })
    .await
    .unwrap();

    assert!(outcome.credential_updated);
    assert_eq!(seen, Some((Duration::from_secs(30), 1)));
    assert_eq!(service.calls(), 3);
    assert!(notifier.errors.borrow().is_empty());
    assert!(notifier.restarts.borrow().is_empty());

    let reloaded = PreferenceStore::load(Box::new(backend));
    assert_eq!(reloaded.preferences().setup_code(), "12345678");
    assert_eq!(reloaded.preferences().text(PrefKey::LibbyToken), "eyJhbGciOi.identity.token");
    assert!(reloaded.preferences().is_configured());
}

#[tokio::test]
async fn rejected_code_keeps_every_field() {
    let (mut store, backend) = stored_store();
    let before: Preferences = store.preferences().clone();
    let contents_before = backend.contents();
    let notifier = RecordingNotifier::default();
    let service = MockService::new(Script::RejectClone);

    let form = SettingsForm {
        setup_code: "87654321".into(),
        hide_ebooks: true,
        tag_ebooks: "libby".into(),
        search_libraries: "lapl".into(),
        ..SettingsForm::from_preferences(store.preferences())
    };
    let host = SaveHost { notifier: &notifier, columns: None, restart_pending: false };

    let err = save_settings(&mut store, &form, &host, |_| Ok(&service)).await.unwrap_err();

    assert!(matches!(err, LibbyError::ExchangeRejected { .. }));
    assert_eq!(service.calls(), 2);
    assert_eq!(store.preferences(), &before);
    assert_eq!(backend.contents(), contents_before);

    let errors = notifier.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Libby Setup Code");
    assert!(errors[0].1.contains("87654321"));
}

#[tokio::test]
async fn library_keys_are_normalized_on_save() {
    let (mut store, _) = stored_store();
    let notifier = RecordingNotifier::default();
    let form = SettingsForm {
        search_libraries: "LAPL, sno-isle, LAPL".into(),
        ..SettingsForm::from_preferences(store.preferences())
    };
    let host = SaveHost { notifier: &notifier, columns: None, restart_pending: false };

    save_settings(&mut store, &form, &host, |_| -> Result<MockService> {
        unreachable!("setup code unchanged")
    })
    .await
    .unwrap();

    let mut keys = store.preferences().search_libraries().to_vec();
    keys.sort();
    assert_eq!(keys, vec!["lapl".to_string(), "sno-isle".to_string()]);
}

#[tokio::test]
async fn thirty_library_keys_truncate_to_limit() {
    let (mut store, _) = stored_store();
    let notifier = RecordingNotifier::default();
    let raw: Vec<String> = (1..=30).map(|i| format!("library{:02}", i)).collect();
    let form = SettingsForm {
        search_libraries: raw.join(","),
        ..SettingsForm::from_preferences(store.preferences())
    };
    let host = SaveHost { notifier: &notifier, columns: None, restart_pending: false };

    save_settings(&mut store, &form, &host, |_| -> Result<MockService> {
        unreachable!("setup code unchanged")
    })
    .await
    .unwrap();

    let keys = store.preferences().search_libraries();
    assert_eq!(keys.len(), MAX_SEARCH_LIBRARIES);
    assert_eq!(keys, &raw[..MAX_SEARCH_LIBRARIES]);
}

#[tokio::test]
async fn unprefixed_custom_column_persists_nothing() {
    let (mut store, backend) = stored_store();
    let before = store.preferences().clone();
    let notifier = RecordingNotifier::default();
    let service = MockService::new(Script::Accept);
    let form = SettingsForm {
        setup_code: "12345678".into(),
        hide_magazines: true,
        custcol_borrowed: Some("libby_borrowed_date".into()),
        ..SettingsForm::from_preferences(store.preferences())
    };
    let host = SaveHost {
        notifier: &notifier,
        columns: Some(&CalibreColumns),
        restart_pending: false,
    };

    let err = save_settings(&mut store, &form, &host, |_| Ok(&service)).await.unwrap_err();

    assert!(matches!(err, LibbyError::ValidationFailure { .. }));
    assert_eq!(service.calls(), 0);
    assert_eq!(store.preferences(), &before);
    assert_eq!(backend.contents().as_deref(), Some(STORED));
    assert_eq!(notifier.errors.borrow()[0].0, "Custom columns");
}

#[test]
fn older_file_gets_defaults_for_new_keys() {
    let (store, _) = stored_store();
    let prefs = store.preferences();

    assert_eq!(prefs.network_timeout(), Duration::from_secs(45));
    assert_eq!(prefs.network_retry(), 1);
    assert_eq!(prefs.search_results_max(), 20);
    assert!(prefs.flag(PrefKey::ConfirmReturns));
    assert_eq!(prefs.text(PrefKey::CustcolDueDate), "");
}
