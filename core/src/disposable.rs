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

//! Background tracker of known disposable-email domains.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::LOG_TARGET;

/// Source lists of disposable domains. One entry (`mailchecker`) ships its
/// domains as a JSON array-of-arrays with leading `//` comment lines.
pub const DEFAULT_SOURCE_URLS: &[&str] = &[
        "https://raw.githubusercontent.com/wesbos/burner-email-providers/master/emails.txt",
        "https://gist.githubusercontent.com/adamloving/4401361/raw/temporary-email-address-domains",
        "https://gist.githubusercontent.com/michenriksen/8710649/raw/disposable-email-provider-domains",
        "https://raw.githubusercontent.com/martenson/disposable-email-domains/master/disposable_email_blacklist.conf",
        "https://raw.githubusercontent.com/jamesaustin/disposable-email-domains/master/disposable-email-domains.txt",
        "https://raw.githubusercontent.com/flotwig/disposable-email-addresses/master/domains.txt",
        "https://raw.githubusercontent.com/FGRibreau/mailchecker/master/list.json",
];

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Concurrent-safe, additive-only set of lowercased disposable domains.
pub struct DisposableTracker {
        domains: RwLock<HashSet<String>>,
        client: reqwest::Client,
        source_urls: Vec<String>,
        refresh_interval: Duration,
}

impl DisposableTracker {
        pub fn new(client: reqwest::Client, source_urls: Vec<String>, refresh_interval: Duration) -> Self {
                Self {
                        domains: RwLock::new(HashSet::new()),
                        client,
                        source_urls,
                        refresh_interval,
                }
        }

        /// Non-blocking membership test against the current snapshot.
        pub fn is_disposable(&self, domain: &str) -> bool {
                self.domains.read().unwrap().contains(&domain.to_lowercase())
        }

        /// Spawns the background refresh loop on the current tokio runtime.
        pub fn spawn_refresh_loop(self: std::sync::Arc<Self>) {
                tokio::spawn(async move {
                        loop {
                                self.refresh_once().await;
                                tokio::time::sleep(self.refresh_interval).await;
                        }
                });
        }

        async fn refresh_once(&self) {
                for url in &self.source_urls {
                        let body = match self.client.get(url).send().await {
                                Ok(resp) => match resp.text().await {
                                        Ok(body) => body,
                                        Err(_) => continue,
                                },
                                Err(_) => continue,
                        };
                        let domains = parse_source_body(url, &body);
                        let mut set = self.domains.write().unwrap();
                        for domain in domains {
                                set.insert(domain);
                        }
                }
                debug!(target: LOG_TARGET, count = self.domains.read().unwrap().len(), "refreshed disposable domain set");
        }
}

fn parse_source_body(url: &str, body: &str) -> Vec<String> {
        if url.contains("FGRibreau/mailchecker") {
                return parse_mailchecker_json(body);
        }
        body.lines()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect()
}

fn parse_mailchecker_json(body: &str) -> Vec<String> {
        let comment_re = Regex::new(r"(?m)^\s*//.*$").unwrap();
        let stripped = comment_re.replace_all(body, "");
        match serde_json::from_str::<Vec<Vec<String>>>(&stripped) {
                Ok(groups) => groups
                        .into_iter()
                        .flatten()
                        .map(|d| d.trim().to_lowercase())
                        .filter(|d| !d.is_empty())
                        .collect(),
                Err(e) => {
                        warn!(target: LOG_TARGET, error = %e, "could not parse mailchecker domain list");
                        Vec::new()
                }
        }
}

#[cfg(test)]
mod tests {
        use super::*;

        #[test]
        fn parses_newline_separated_list() {
                let got = parse_source_body("https://example.com/list.txt", "Foo.com\n bar.COM \n\nbaz.com");
                assert_eq!(got, vec!["foo.com", "bar.com", "baz.com"]);
        }

        #[test]
        fn parses_mailchecker_array_of_arrays_stripping_comments() {
                let body = "// generated\n[[\"Foo.com\"],[\"Bar.com\",\"Baz.com\"]]";
                let got = parse_source_body("https://raw.githubusercontent.com/FGRibreau/mailchecker/master/list.json", body);
                assert_eq!(got, vec!["foo.com", "bar.com", "baz.com"]);
        }

        #[test]
        fn malformed_mailchecker_json_yields_empty_not_panic() {
                let got = parse_mailchecker_json("not json");
                assert!(got.is_empty());
        }

        #[tokio::test]
        async fn membership_reflects_inserted_domains() {
                let tracker = DisposableTracker::new(
                        reqwest::Client::new(),
                        vec![],
                        DEFAULT_REFRESH_INTERVAL,
                );
                assert!(!tracker.is_disposable("mailinator.com"));
                tracker.domains.write().unwrap().insert("mailinator.com".to_string());
                assert!(tracker.is_disposable("MAILINATOR.com"));
        }
}
