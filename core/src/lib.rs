// check-if-email-exists
// Copyright (C) 2018-2023 Reacher

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! `check-if-email-exists` lets you check if an email address exists without
//! sending any email.
//!
//! Under the hood, it resolves the address's mail exchangers, dials the
//! fastest responder, and drives a `HELO`/`MAIL FROM`/`RCPT TO` dialogue to
//! observe whether the recipient is accepted, absent, full, or behind a
//! catch-all. It also tracks disposable-email domains and can self-check
//! whether the sending IP has been blocklisted.
//!
//! ```rust,no_run
//! use check_if_email_exists::Verifier;
//!
//! # async fn check() {
//! let verifier = Verifier::new("my-app.example.com", "verify@my-app.example.com");
//! let lookup = verifier.verify("someone@gmail.com").await;
//! println!("{:?}", lookup);
//! # }
//! ```

pub mod address;
pub mod blocklist;
pub mod disposable;
pub mod error;
pub mod gravatar;
pub mod smtp;
mod verifier;

pub use address::Address;
pub use error::{LookupError, LookupErrorKind};
pub use verifier::{Lookup, Verifier, VerifierConfig};

/// The target under which this crate's `tracing` spans and events are
/// emitted.
pub const LOG_TARGET: &str = "check_if_email_exists";

#[cfg(feature = "sentry")]
pub(crate) fn report_if_reportable(err: &LookupError) {
        if err.reportable {
                sentry::capture_message(&format!("{}: {}", err.kind, err.detail), sentry::Level::Warning);
        }
}
