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


//! Setup code authentication for Libby
//!
//! Libby links a new device to an existing reader account through an
//! 8-digit setup code shown in the Libby app. Linking is a fixed sequence:
//!
//! 1. Validate the code locally (no request is sent for a malformed code)
//! 2. `get_chip` - obtain a fresh anonymous session ("chip") and its identity token
//! 3. `clone_by_code` - attach the reader account behind the code to that chip
//! 4. `is_logged_in` - confirm the chip is now synchronized with at least one card
//!
//! The identity token issued in step 2 is the credential that gets persisted
//! together with the accepted code. Nothing here writes preferences; the
//! caller decides when to commit the returned [`SetupCredential`].
//!
//! # Example
//! ```rust,no_run
//! use libby_core::api::auth::exchange_setup_code;
//! use libby_core::api::client::{ClientConfig, LibbyClient};
//!
//! # async fn example() -> libby_core::error::Result<()> {
//! let client = LibbyClient::new(ClientConfig::default())?;
//! let credential = exchange_setup_code(&client, "12345678").await?;
//! println!("linked, token {}", credential.identity_token.masked());
//! # Ok(())
//! # }
//! ```

use crate::error::{LibbyError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Length of a Libby setup code
pub const SETUP_CODE_LEN: usize = 8;

lazy_static::lazy_static! {
    // ASCII only: `\d` would also accept other Unicode digits
    static ref SETUP_CODE_PATTERN: Regex = Regex::new(&format!("^[0-9]{{{}}}$", SETUP_CODE_LEN))
        .expect("setup code pattern is valid");
}

// ============================================================================
// Setup code and identity token
// ============================================================================

/// A setup code that passed format validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SetupCode(String);

impl SetupCode {
    /// Validate `code` as exactly eight ASCII digits
    ///
    /// # Errors
    /// `InvalidFormat` for anything else, including the empty string.
    pub fn parse(code: &str) -> Result<Self> {
        if Self::is_valid(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(LibbyError::invalid_format(code))
        }
    }

    /// Check the format without constructing a `SetupCode`
    pub fn is_valid(code: &str) -> bool {
        SETUP_CODE_PATTERN.is_match(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form for log output
    pub fn masked(&self) -> String {
        mask(&self.0)
    }
}

impl fmt::Display for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bearer credential issued by the identity service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityToken(String);

impl IdentityToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked form for log output
    pub fn masked(&self) -> String {
        mask(&self.0)
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

// Tokens never reach logs through Debug
impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityToken({})", self.masked())
    }
}

/// A setup code together with the identity token it was exchanged for
///
/// The pair is always persisted as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCredential {
    pub setup_code: SetupCode,
    pub identity_token: IdentityToken,
}

/// Mask a string for safe logging
///
/// Shows first 2 and last 2 characters, replaces middle with asterisks
pub fn mask(s: &str) -> String {
    if s.is_empty() {
        "[empty]".to_string()
    } else if s.chars().count() <= 4 {
        "****".to_string()
    } else {
        let chars: Vec<char> = s.chars().collect();
        let first_two: String = chars.iter().take(2).collect();
        let last_two: String = chars.iter().skip(chars.len() - 2).collect();
        format!("{}{}{}", first_two, "*".repeat(chars.len() - 4), last_two)
    }
}

// ============================================================================
// Identity service responses
// ============================================================================

/// Response of `POST /chip`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipResponse {
    /// Anonymous session identifier
    pub chip: String,
    /// Bearer token bound to the chip
    pub identity: IdentityToken,
    #[serde(default)]
    pub syncable: bool,
    #[serde(default)]
    pub primary: bool,
}

/// Response of `POST /chip/clone/code`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneResponse {
    #[serde(default)]
    pub result: Option<String>,
}

// ============================================================================
// Identity service capability
// ============================================================================

/// The three remote calls the exchange needs
///
/// [`crate::api::client::LibbyClient`] is the network implementation; tests
/// substitute their own. Implementations keep the identity returned by
/// `get_chip` and use it for the calls that follow.
#[allow(async_fn_in_trait)]
pub trait IdentityService {
    /// Obtain a fresh anonymous session
    async fn get_chip(&self) -> Result<ChipResponse>;

    /// Claim the current session for the account behind `code`
    async fn clone_by_code(&self, code: &SetupCode) -> Result<CloneResponse>;

    /// Whether the current session is synchronized with a reader account
    async fn is_logged_in(&self) -> Result<bool>;
}

/// Exchange a user-entered setup code for an identity token
///
/// Runs the fixed sequence described in the module docs. Timeout and retry
/// policy belong to the `service`.
///
/// # Errors
/// - `InvalidFormat` before any request when `code` is not 8 digits
/// - `ExchangeRejected` when the service answers 4xx or the session is not
///   authenticated afterwards
/// - `NetworkFailure` when a call could not be completed
pub async fn exchange_setup_code<S: IdentityService>(
    service: &S,
    code: &str,
) -> Result<SetupCredential> {
    let setup_code = SetupCode::parse(code)?;
    debug!(code = %setup_code.masked(), "Starting setup code exchange");

    let chip = service
        .get_chip()
        .await
        .map_err(|e| classify_exchange_error(e, &setup_code, "get_chip"))?;

    service
        .clone_by_code(&setup_code)
        .await
        .map_err(|e| classify_exchange_error(e, &setup_code, "clone_by_code"))?;

    let logged_in = service
        .is_logged_in()
        .await
        .map_err(|e| classify_exchange_error(e, &setup_code, "is_logged_in"))?;

    if !logged_in {
        warn!(code = %setup_code.masked(), "Session not authenticated after clone");
        return Err(LibbyError::rejected(
            setup_code.as_str(),
            "session is not authenticated (expired or already used code)",
        ));
    }

    info!(
        code = %setup_code.masked(),
        token = %chip.identity.masked(),
        "Setup code accepted"
    );

    Ok(SetupCredential {
        setup_code,
        identity_token: chip.identity,
    })
}

/// Fold remote failures into the exchange taxonomy
///
/// Client errors mean the service declined us; everything else that is not
/// already an exchange error is a transport-level failure.
fn classify_exchange_error(err: LibbyError, code: &SetupCode, step: &str) -> LibbyError {
    warn!(step, code = %code.masked(), error = %err, "Setup code exchange step failed");
    match err {
        LibbyError::ApiRequestFailed { status_code: Some(status @ 400..=499), message, .. } => {
            LibbyError::rejected(code.as_str(), format!("{} ({}): {}", step, status, message))
        }
        e @ (LibbyError::ExchangeRejected { .. }
        | LibbyError::NetworkFailure { .. }
        | LibbyError::InvalidFormat { .. }) => e,
        // Exhausted retries already arrive as NetworkFailure; the rest took one attempt
        other => {
            let transient = other.is_retryable();
            LibbyError::network_error(format!("{}: {}", step, other), 1, transient)
        }
    }
}
