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

//! The SMTP response classifier: a pure mapping from raw server replies and
//! network errors to a stable, vendor-agnostic [`LookupErrorKind`].

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// The fixed taxonomy of verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupErrorKind {
        #[error("Email address could not be parsed")]
        EmailParseFailure,
        #[error("The connection to the mail server has timed out")]
        Timeout,
        #[error("Mail server does not exist")]
        NoSuchHost,
        #[error("Mail server is unavailable")]
        ServerUnavailable,
        #[error("Blocked by mail server")]
        Blocked,
        #[error("Try again later")]
        TryAgainLater,
        #[error("Mailbox busy")]
        MailboxBusy,
        #[error("Messaging limits have been exceeded")]
        ExceededMessagingLimits,
        #[error("Recipient out of disk space")]
        FullInbox,
        #[error("Too many recipients")]
        TooManyRcpt,
        #[error("Not an open relay")]
        NoRelay,
        #[error("Need MAIL before RCPT")]
        NeedMailBeforeRcpt,
        #[error("Recipient has moved")]
        RcptHasMoved,
        #[error("Not Allowed")]
        NotAllowed,
        #[error("Unexpected response from deliverabler")]
        UnexpectedResponse,
        #[error("Unknown error")]
        Unknown,
}

/// A typed verification failure. `detail` preserves the original server or
/// network text verbatim; `reportable` flags whether an optional error-sink
/// integration (see the `sentry` feature) should surface it upstream.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct LookupError {
        pub kind: LookupErrorKind,
        pub detail: String,
        pub reportable: bool,
}

impl LookupError {
        pub fn new(kind: LookupErrorKind, detail: impl Into<String>) -> Self {
                let reportable = !matches!(
                        kind,
                        LookupErrorKind::EmailParseFailure | LookupErrorKind::NoSuchHost
                );
                Self {
                        kind,
                        detail: detail.into(),
                        reportable,
                }
        }

        pub fn message(&self) -> String {
                self.kind.to_string()
        }
}

/// Serializes losslessly to both JSON and XML as `{"message": ..., "details": ...}`.
impl Serialize for LookupError {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut state = serializer.serialize_struct("LookupError", 2)?;
                state.serialize_field("message", &self.message())?;
                state.serialize_field("details", &self.detail)?;
                state.end()
        }
}

/// Substrings that signal the recipient mailbox is authoritatively absent.
/// A match demotes what would otherwise be a classified error into a clean
/// "not deliverable" outcome.
const MAILBOX_ABSENT: &[&str] = &[
        "undeliverable",
        "does not exist",
        "may not exist",
        "user unknown",
        "user not found",
        "invalid address",
        "recipient invalid",
        "recipient rejected",
        "no mailbox",
];

const BLOCKED_TOKENS: &[&str] = &[
        "spamhaus",
        "proofpoint",
        "cloudmark",
        "banned",
        "blacklisted",
        "blocked",
        "block list",
        "denied",
];

const BASIC_BLOCKED_TOKENS: &[&str] =
        &["spamhaus", "proofpoint", "cloudmark", "banned", "blocked", "denied"];

const FULL_INBOX_TOKENS: &[&str] = &["full", "space", "over quota", "insufficient"];

/// Case-insensitive substring match against any of `needles`, short-circuiting
/// on the first hit.
pub fn ins_contains(haystack: &str, needles: &[&str]) -> bool {
        let haystack = haystack.to_lowercase();
        needles.iter().any(|n| haystack.contains(&n.to_lowercase()))
}

/// Classifies a reply received during the `HELO`/`MAIL FROM`/`RCPT TO`
/// exchange. `None` means the reply is a clean "mailbox does not exist"
/// outcome rather than a reportable error.
pub fn classify_smtp(code: u16, detail: &str) -> Option<LookupError> {
        if code < 400 {
                return Some(classify_basic(detail));
        }
        if ins_contains(detail, MAILBOX_ABSENT) {
                return None;
        }
        let kind = match code {
                421 => LookupErrorKind::TryAgainLater,
                450 => LookupErrorKind::MailboxBusy,
                451 => LookupErrorKind::ExceededMessagingLimits,
                452 => {
                        if ins_contains(detail, FULL_INBOX_TOKENS) {
                                LookupErrorKind::FullInbox
                        } else {
                                LookupErrorKind::TooManyRcpt
                        }
                }
                503 => LookupErrorKind::NeedMailBeforeRcpt,
                550 => {
                        if ins_contains(detail, BLOCKED_TOKENS) {
                                LookupErrorKind::Blocked
                        } else {
                                return None;
                        }
                }
                551 => LookupErrorKind::RcptHasMoved,
                552 => LookupErrorKind::FullInbox,
                553 => LookupErrorKind::NoRelay,
                554 => LookupErrorKind::NotAllowed,
                _ => return Some(classify_basic(detail)),
        };
        Some(LookupError::new(kind, detail))
}

/// Classifies an error that never carried an SMTP status code: DNS
/// failures, TCP errors, timeouts.
pub fn classify_basic(detail: &str) -> LookupError {
        let kind = if ins_contains(detail, BASIC_BLOCKED_TOKENS) {
                LookupErrorKind::Blocked
        } else if ins_contains(detail, &["timeout"]) {
                LookupErrorKind::Timeout
        } else if ins_contains(detail, &["no such host"]) {
                LookupErrorKind::NoSuchHost
        } else if ins_contains(detail, &["unavailable"]) {
                LookupErrorKind::ServerUnavailable
        } else {
                LookupErrorKind::Unknown
        };
        LookupError::new(kind, detail)
}

#[cfg(test)]
mod tests {
        use super::*;

        #[test]
        fn spamhaus_550_is_blocked() {
                let e = classify_smtp(550, "550 Blocked by spamhaus").unwrap();
                assert_eq!(e.kind, LookupErrorKind::Blocked);
        }

        #[test]
        fn mailbox_absent_550_is_clean() {
                assert!(classify_smtp(550, "550 This mailbox does not exist").is_none());
        }

        #[test]
        fn mailbox_absent_wins_over_blocked_tokens() {
                // "recipient rejected" signals mailbox-absent even though it could be
                // mistaken for a block; mailbox-absent is checked first.
                assert!(classify_smtp(550, "550 recipient rejected").is_none());
        }

        #[test]
        fn full_452_is_full_inbox() {
                let e = classify_smtp(452, "452 4.2.2 mailbox full").unwrap();
                assert_eq!(e.kind, LookupErrorKind::FullInbox);
        }

        #[test]
        fn bare_452_is_too_many_rcpt() {
                let e = classify_smtp(452, "452 too many recipients this session").unwrap();
                assert_eq!(e.kind, LookupErrorKind::TooManyRcpt);
        }

        #[test]
        fn sub_400_falls_through_to_basic() {
                let e = classify_smtp(250, "250 OK").unwrap();
                assert_eq!(e.kind, LookupErrorKind::Unknown);
        }

        #[test]
        fn basic_timeout() {
                let e = classify_basic("dial tcp: i/o timeout");
                assert_eq!(e.kind, LookupErrorKind::Timeout);
        }

        #[test]
        fn basic_no_such_host() {
                let e = classify_basic("lookup mx.example.com: no such host");
                assert_eq!(e.kind, LookupErrorKind::NoSuchHost);
        }

        #[test]
        fn ins_contains_is_case_insensitive_and_short_circuits() {
                assert!(ins_contains("SPAMHAUS listed", &["nope", "spamhaus"]));
                assert!(!ins_contains("clean response", &["spamhaus", "proofpoint"]));
        }

        #[test]
        fn reportable_excludes_parse_and_no_such_host() {
                assert!(!LookupError::new(LookupErrorKind::EmailParseFailure, "").reportable);
                assert!(!LookupError::new(LookupErrorKind::NoSuchHost, "").reportable);
                assert!(LookupError::new(LookupErrorKind::Timeout, "").reportable);
        }
}
