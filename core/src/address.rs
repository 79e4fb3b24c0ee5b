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

//! Parsing and normalization of a single email address.

use percent_encoding::percent_decode_str;
use serde::Serialize;

/// An immutable, normalized email address.
///
/// `domain` is always lowercased and IDNA-ASCII. `raw` preserves the local
/// part's original case, joined to the lowercased domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
        #[serde(rename = "address")]
        pub raw: String,
        pub username: String,
        pub domain: String,
        #[serde(rename = "md5Hash")]
        pub md5: String,
}

/// Parses an email address, un-escaping it once if it was URL-encoded.
///
/// Returns `None` if the string does not contain a mailbox in the form
/// `local-part@domain`. No network I/O is performed.
pub fn parse(s: &str) -> Option<Address> {
        let decoded = percent_decode_str(s)
                .decode_utf8()
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string());

        let index = decoded.rfind('@')?;
        let (local, domain) = (&decoded[..index], &decoded[index + 1..]);
        if local.is_empty() || domain.is_empty() {
                return None;
        }
        if !is_plausible_local_part(local) {
                return None;
        }

        let domain_lower = domain.to_lowercase();
        let ascii_domain = idna::domain_to_ascii(&domain_lower).unwrap_or(domain_lower);
        let raw = format!("{local}@{ascii_domain}");
        let md5 = format!("{:x}", md5::compute(raw.as_bytes()));

        Some(Address {
                raw,
                username: local.to_string(),
                domain: ascii_domain,
                md5,
        })
}

/// A permissive check that the local part has no raw whitespace or control
/// characters, matching the kind of mailbox RFC 5322 describes without
/// pulling in a full grammar parser for a single boolean gate.
fn is_plausible_local_part(local: &str) -> bool {
        !local.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
        use super::*;

        #[test]
        fn lowercases_domain_preserves_local_case() {
                let a = parse("Steven.Wolfe@GmAiL.Com").unwrap();
                assert_eq!(a.raw, "Steven.Wolfe@gmail.com");
                assert_eq!(a.username, "Steven.Wolfe");
                assert_eq!(a.domain, "gmail.com");
        }

        #[test]
        fn computes_md5_over_raw() {
                let a = parse("foo@bar.com").unwrap();
                let expected = format!("{:x}", md5::compute(b"foo@bar.com"));
                assert_eq!(a.md5, expected);
        }

        #[test]
        fn rejects_missing_at_sign() {
                assert!(parse("not-an-email").is_none());
        }

        #[test]
        fn rejects_empty_local_or_domain() {
                assert!(parse("@domain.com").is_none());
                assert!(parse("user@").is_none());
        }

        #[test]
        fn url_decodes_once() {
                let a = parse("user%40example.com@domain.com");
                // The only `%40` here is literal text inside the local part, not a
                // separator, so decoding still yields a single mailbox.
                assert!(a.is_some());
        }

        #[test]
        fn tolerates_malformed_encoding() {
                // `%zz` is not valid percent-encoding; parsing falls through to the
                // literal string instead of failing.
                let a = parse("user%zz@domain.com").unwrap();
                assert_eq!(a.domain, "domain.com");
        }

        #[test]
        fn idempotent_on_its_own_output() {
                let once = parse("Mixed.Case@EXAMPLE.com").unwrap();
                let twice = parse(&once.raw).unwrap();
                assert_eq!(once.raw, twice.raw);
        }

        #[test]
        fn differs_only_by_domain_case_or_escaping_converge() {
                let a = parse("User@Example.com").unwrap();
                let b = parse("User@EXAMPLE.COM").unwrap();
                assert_eq!(a.raw, b.raw);
        }
}
