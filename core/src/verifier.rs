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

//! The orchestrator: wires the address parser, disposable tracker, SMTP
//! prober, and Gravatar probe into a single bounded verification call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::address::{self, Address};
use crate::blocklist::{self, Canary, DEFAULT_CANARIES, DEFAULT_RBL_HOSTS};
use crate::disposable::{DisposableTracker, DEFAULT_REFRESH_INTERVAL, DEFAULT_SOURCE_URLS};
use crate::error::{LookupError, LookupErrorKind};
use crate::gravatar;
use crate::smtp::Deliverabler;
use crate::LOG_TARGET;

/// Immutable configuration threaded into every `Verifier` call. Built once
/// per process; callers override only what they need via `..Default::default()`.
#[derive(Clone)]
pub struct VerifierConfig {
        pub hello_host: String,
        pub mail_from: String,
        pub per_step_timeout: Duration,
        pub mx_dial_timeout: Duration,
        pub disposable_refresh_interval: Duration,
        pub disposable_source_urls: Vec<String>,
        pub rbl_hosts: &'static [&'static str],
        pub canaries: &'static [Canary],
        pub probe_gravatar: bool,
}

impl Default for VerifierConfig {
        fn default() -> Self {
                Self {
                        hello_host: "localhost".to_string(),
                        mail_from: "verify@localhost".to_string(),
                        per_step_timeout: Duration::from_secs(10),
                        mx_dial_timeout: Duration::from_secs(10),
                        disposable_refresh_interval: DEFAULT_REFRESH_INTERVAL,
                        disposable_source_urls: DEFAULT_SOURCE_URLS.iter().map(|s| s.to_string()).collect(),
                        rbl_hosts: DEFAULT_RBL_HOSTS,
                        canaries: DEFAULT_CANARIES,
                        probe_gravatar: true,
                }
        }
}

/// Result record for one verification. Serializes losslessly to JSON and
/// XML with stable field names. Address fields are inlined (rather than
/// nested via `#[serde(flatten)]`) since quick-xml's serde support does not
/// round-trip flattened structs.
#[derive(Debug, Clone, Serialize)]
pub struct Lookup {
        #[serde(rename = "address")]
        pub raw: String,
        pub username: String,
        pub domain: String,
        #[serde(rename = "md5Hash")]
        pub md5: String,
        #[serde(rename = "validFormat")]
        pub valid_format: bool,
        pub deliverable: bool,
        #[serde(rename = "fullInbox")]
        pub full_inbox: bool,
        #[serde(rename = "hostExists")]
        pub host_exists: bool,
        #[serde(rename = "catchAll")]
        pub catch_all: bool,
        pub disposable: bool,
        pub gravatar: bool,
}

impl Lookup {
        fn invalid(raw: &str) -> Self {
                Self {
                        raw: raw.to_string(),
                        username: String::new(),
                        domain: String::new(),
                        md5: String::new(),
                        valid_format: false,
                        deliverable: false,
                        full_inbox: false,
                        host_exists: false,
                        catch_all: false,
                        disposable: false,
                        gravatar: false,
                }
        }

        fn from_address(address: &Address) -> Self {
                Self {
                        raw: address.raw.clone(),
                        username: address.username.clone(),
                        domain: address.domain.clone(),
                        md5: address.md5.clone(),
                        valid_format: true,
                        deliverable: false,
                        full_inbox: false,
                        host_exists: false,
                        catch_all: false,
                        disposable: false,
                        gravatar: false,
                }
        }
}

/// Verifies single email addresses against their destination mail exchanger.
pub struct Verifier {
        config: VerifierConfig,
        resolver: TokioAsyncResolver,
        http: reqwest::Client,
        disposable: Arc<DisposableTracker>,
        rng: Mutex<SmallRng>,
}

impl Clone for Verifier {
        /// Cheap: `resolver` and `http` clone their inner `Arc`s, `disposable`
        /// is already `Arc`-shared, and `config` is plain data. Only `rng` is
        /// reseeded, since a `Mutex` can't be cloned and the random catch-all
        /// probe itself doesn't draw from it (see `random_local_part` in
        /// `smtp.rs`). Exists solely so `verify_timeout` can hand a `'static`
        /// owned copy to `tokio::spawn`.
        fn clone(&self) -> Self {
                Self {
                        config: self.config.clone(),
                        resolver: self.resolver.clone(),
                        http: self.http.clone(),
                        disposable: self.disposable.clone(),
                        rng: Mutex::new(SmallRng::from_entropy()),
                }
        }
}

impl Verifier {
        /// Builds a verifier with the common two required strings and default
        /// configuration for everything else.
        pub fn new(hello_host: impl Into<String>, mail_from: impl Into<String>) -> Self {
                Self::with_config(VerifierConfig {
                        hello_host: hello_host.into(),
                        mail_from: mail_from.into(),
                        ..Default::default()
                })
        }

        /// Builds a verifier from a fully specified configuration.
        pub fn with_config(config: VerifierConfig) -> Self {
                let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
                let http = reqwest::Client::builder()
                        .timeout(Duration::from_secs(10))
                        .user_agent("check-if-email-exists")
                        .build()
                        .unwrap_or_default();
                let disposable = Arc::new(DisposableTracker::new(
                        http.clone(),
                        config.disposable_source_urls.clone(),
                        config.disposable_refresh_interval,
                ));
                disposable.clone().spawn_refresh_loop();

                Self {
                        config,
                        resolver,
                        http,
                        disposable,
                        rng: Mutex::new(SmallRng::from_entropy()),
                }
        }

        /// Verifies one address with no deadline beyond the per-step timeouts
        /// already baked into the probe.
        pub async fn verify(&self, email: &str) -> Result<Lookup, LookupError> {
                let result = self.verify_inner(email).await;
                #[cfg(feature = "sentry")]
                if let Err(ref e) = result {
                        crate::report_if_reportable(e);
                }
                result
        }

        async fn verify_inner(&self, email: &str) -> Result<Lookup, LookupError> {
                let address = match address::parse(email) {
                        Some(a) => a,
                        None => return Ok(Lookup::invalid(email)),
                };

                let mut lookup = Lookup::from_address(&address);
                lookup.disposable = self.disposable.is_disposable(&address.domain);

                let deliverabler = match Deliverabler::open(
                        &self.resolver,
                        &address.domain,
                        &self.config.hello_host,
                        &self.config.mail_from,
                        self.config.per_step_timeout,
                )
                .await
                {
                        Ok(d) => d,
                        Err(e) if e.kind == LookupErrorKind::NoSuchHost => {
                                info!(target: LOG_TARGET, domain = %address.domain, "host does not exist");
                                return Ok(lookup);
                        }
                        Err(e) => return Err(e),
                };
                lookup.host_exists = true;

                let (handle, has_catch_all) = deliverabler.has_catch_all(3).await;
                if has_catch_all {
                        lookup.catch_all = true;
                        lookup.deliverable = true;
                        if let Some(handle) = handle {
                                handle.close().await;
                        }
                } else {
                        // Reuse the same dialogue the catch-all probe already opened —
                        // one MAIL FROM, two RCPT TOs — instead of dialling a fresh MX
                        // race for the real address. Only a dead dialogue (the probe's
                        // own retries exhausted it) falls back to opening a new one.
                        let handle = match handle {
                                Some(handle) => handle,
                                None => match Deliverabler::open(
                                        &self.resolver,
                                        &address.domain,
                                        &self.config.hello_host,
                                        &self.config.mail_from,
                                        self.config.per_step_timeout,
                                )
                                .await
                                {
                                        Ok(d) => d,
                                        Err(e) if e.kind == LookupErrorKind::NoSuchHost => {
                                                return self.finish(lookup, &address.md5).await
                                        }
                                        Err(e) => return Err(e),
                                },
                        };
                        let (handle, result) = handle.is_deliverable(&address.raw, 3).await;
                        if let Some(handle) = handle {
                                handle.close().await;
                        }
                        match result {
                                Ok(accepted) => lookup.deliverable = accepted,
                                Err(e) if e.kind == LookupErrorKind::FullInbox => {
                                        lookup.full_inbox = true;
                                        return self.finish(lookup, &address.md5).await;
                                }
                                Err(e) => return Err(e),
                        }
                }

                self.finish(lookup, &address.md5).await
        }

        async fn finish(&self, mut lookup: Lookup, md5: &str) -> Result<Lookup, LookupError> {
                if self.config.probe_gravatar {
                        lookup.gravatar = gravatar::has_gravatar(&self.http, md5).await;
                }
                Ok(lookup)
        }

        /// Runs `verify` under a deadline. On expiry, returns `Timeout`
        /// immediately while the orphaned probe keeps running in the
        /// background solely to close its SMTP connection. The probe is
        /// `tokio::spawn`ed rather than raced in-place with `tokio::select!`:
        /// a losing `select!` branch is simply dropped, and `Deliverabler`
        /// has no `Drop` impl, so a dropped dialogue never sends `QUIT` —
        /// only the OS-level socket closes. Spawning lets the probe run to
        /// its own `close().await` even after this call has already
        /// returned `Timeout` to the caller.
        pub async fn verify_timeout(&self, email: &str, deadline: Duration) -> Result<Lookup, LookupError> {
                let email = email.to_string();
                let verifier = self.clone();
                let probe_email = email.clone();
                let probe = tokio::spawn(async move { verifier.verify(&probe_email).await });

                tokio::select! {
                        joined = probe => match joined {
                                Ok(result) => result,
                                Err(e) => Err(LookupError::new(LookupErrorKind::UnexpectedResponse, format!("verification task panicked: {e}"))),
                        },
                        _ = tokio::time::sleep(deadline) => {
                                warn!(target: LOG_TARGET, email, "verification deadline exceeded");
                                Err(LookupError::new(LookupErrorKind::Timeout, "verification deadline exceeded"))
                        }
                }
        }

        /// Checks whether this process's sending IP is listed on any
        /// monitored DNS-RBL or blocked by a vendor mailbox provider.
        pub async fn blacklisted(&self) -> Option<LookupError> {
                blocklist::check(
                        &self.resolver,
                        &self.http,
                        &self.config.hello_host,
                        &self.config.mail_from,
                        self.config.per_step_timeout,
                        self.config.rbl_hosts,
                        self.config.canaries,
                )
                .await
        }

        /// Checks whether `md5` has an associated Gravatar.
        pub async fn has_gravatar(&self, md5: &str) -> bool {
                gravatar::has_gravatar(&self.http, md5).await
        }

        /// Generates a random local-part at `domain`, mainly useful for ad
        /// hoc catch-all probes outside the main `verify` path.
        pub fn random_probe_address(&self, domain: &str) -> String {
                use rand::Rng;
                const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
                let mut rng = self.rng.lock().unwrap();
                let local: String = (0..20).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect();
                format!("{local}@{domain}")
        }
}

#[cfg(test)]
mod tests {
        use super::*;

        #[test]
        fn invalid_lookup_has_all_booleans_false() {
                let l = Lookup::invalid("not-an-email");
                assert!(!l.valid_format);
                assert!(!l.deliverable);
                assert!(!l.full_inbox);
                assert!(!l.host_exists);
                assert!(!l.catch_all);
                assert!(!l.disposable);
                assert!(!l.gravatar);
        }

        #[test]
        fn default_config_has_sensible_timeouts() {
                let config = VerifierConfig::default();
                assert!(config.per_step_timeout > Duration::from_secs(0));
                assert_eq!(config.rbl_hosts.len(), DEFAULT_RBL_HOSTS.len());
        }

        #[tokio::test]
        async fn random_probe_address_is_well_formed() {
                let verifier = Verifier::new("localhost", "verify@localhost");
                let probe = verifier.random_probe_address("example.com");
                let (local, domain) = probe.split_once('@').unwrap();
                assert_eq!(local.len(), 20);
                assert_eq!(domain, "example.com");
        }
}
