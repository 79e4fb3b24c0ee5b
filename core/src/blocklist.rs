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

//! Blocklist self-check: is our own sending IP listed on a DNS-RBL, or
//! blocked by a vendor mailbox provider?

use std::net::Ipv4Addr;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::error::{ins_contains, LookupError, LookupErrorKind};
use crate::smtp::Deliverabler;
use crate::LOG_TARGET;

const IP_ECHO_URL: &str = "https://api.ipify.org";

pub const DEFAULT_RBL_HOSTS: &[&str] = &[
        "zen.spamhaus.org",
        "xbl.spamhaus.org",
        "pbl.spamhaus.org",
        "sbl-xbl.spamhaus.org",
        "sbl.spamhaus.org",
        "all.spamrats.com",
        "noptr.spamrats.com",
        "spam.spamrats.com",
        "dyna.spamrats.com",
];

/// A canary recipient known to sit behind a specific vendor's filtering, used
/// to attribute a block to that vendor.
pub struct Canary {
        pub address: &'static str,
        pub vendor_token: &'static str,
}

pub const DEFAULT_CANARIES: &[Canary] = &[
        Canary {
                address: "support@me.com",
                vendor_token: "proofpoint",
        },
        Canary {
                address: "support@orange.fr",
                vendor_token: "cloudmark",
        },
        Canary {
                address: "support@subaru.com.au",
                vendor_token: "trend micro rbl",
        },
];

/// Runs the DNS-RBL sweep and the vendor canary probes concurrently and
/// returns the first confirmed block, naming the offending list. Does not
/// wait for every sub-check once one is positive.
pub async fn check(
        resolver: &TokioAsyncResolver,
        http: &reqwest::Client,
        hello_host: &str,
        mail_from: &str,
        per_step_timeout: Duration,
        rbl_hosts: &'static [&'static str],
        canaries: &'static [Canary],
) -> Option<LookupError> {
        let mut set = tokio::task::JoinSet::new();

        {
                let resolver = resolver.clone();
                let http = http.clone();
                set.spawn(async move {
                        dns_blacklisted(&resolver, &http, rbl_hosts)
                                .await
                                .map(|list| LookupError::new(LookupErrorKind::Blocked, list))
                });
        }
        for canary in canaries {
                let resolver = resolver.clone();
                let hello_host = hello_host.to_string();
                let mail_from = mail_from.to_string();
                set.spawn(async move {
                        matches_blacklisted(&resolver, &hello_host, &mail_from, per_step_timeout, canary).await
                });
        }

        while let Some(joined) = set.join_next().await {
                if let Ok(Some(err)) = joined {
                        set.abort_all();
                        return Some(err);
                }
        }
        None
}

async fn dns_blacklisted(
        resolver: &TokioAsyncResolver,
        http: &reqwest::Client,
        rbl_hosts: &[&str],
) -> Option<String> {
        let ip = fetch_public_ipv4(http).await?;
        let reversed = {
                let mut octets = ip.octets();
                octets.reverse();
                octets.map(|o| o.to_string()).join(".")
        };

        for host in rbl_hosts {
                let query = format!("{reversed}.{host}");
                if let Ok(lookup) = resolver.ipv4_lookup(&query).await {
                        if lookup.iter().next().is_some() {
                                debug!(target: LOG_TARGET, host, "sending IP listed on RBL");
                                return Some((*host).to_string());
                        }
                }
        }
        None
}

async fn fetch_public_ipv4(http: &reqwest::Client) -> Option<Ipv4Addr> {
        let text = http.get(IP_ECHO_URL).send().await.ok()?.text().await.ok()?;
        text.trim().parse().ok()
}

async fn matches_blacklisted(
        resolver: &TokioAsyncResolver,
        hello_host: &str,
        mail_from: &str,
        per_step_timeout: Duration,
        canary: &Canary,
) -> Option<LookupError> {
        let (_, domain) = canary.address.split_once('@')?;
        let deliverabler = match Deliverabler::open(resolver, domain, hello_host, mail_from, per_step_timeout).await {
                Ok(d) => d,
                Err(e) => return confirm(&e, canary.vendor_token),
        };
        let (handle, result) = deliverabler.is_deliverable(canary.address, 0).await;
        if let Some(handle) = handle {
                handle.close().await;
        }
        match result {
                Ok(_) => None,
                Err(e) => {
                        let confirmed = confirm(&e, canary.vendor_token);
                        if confirmed.is_none() {
                                warn!(target: LOG_TARGET, vendor = canary.vendor_token, "canary probe inconclusive");
                        }
                        confirmed
                }
        }
}

fn confirm(err: &LookupError, vendor_token: &str) -> Option<LookupError> {
        if err.kind == LookupErrorKind::Blocked && ins_contains(&err.detail, &[vendor_token]) {
                Some(LookupError::new(LookupErrorKind::Blocked, vendor_token))
        } else {
                None
        }
}

#[cfg(test)]
mod tests {
        use super::*;

        #[test]
        fn confirm_requires_both_blocked_kind_and_vendor_token() {
                let blocked_other = LookupError::new(LookupErrorKind::Blocked, "550 blocked by spamhaus");
                assert!(confirm(&blocked_other, "proofpoint").is_none());

                let blocked_vendor = LookupError::new(LookupErrorKind::Blocked, "550 blocked by proofpoint");
                assert!(confirm(&blocked_vendor, "proofpoint").is_some());

                let not_blocked = LookupError::new(LookupErrorKind::Timeout, "proofpoint");
                assert!(confirm(&not_blocked, "proofpoint").is_none());
        }
}
