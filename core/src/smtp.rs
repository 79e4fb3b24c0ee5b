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

//! The SMTP prober ("Deliverabler"): MX discovery, race-dial, and the
//! `HELO`/`MAIL FROM`/`RCPT TO` handshake.

use std::io;
use std::time::Duration;

use async_smtp::commands::{MailCommand, RcptCommand};
use async_smtp::extension::ClientId;
use async_smtp::response::Response;
use async_smtp::{EmailAddress, SmtpClient, SmtpTransport};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{classify_basic, classify_smtp, LookupError, LookupErrorKind};
use crate::LOG_TARGET;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const SMTP_PORT: u16 = 25;

type Transport = SmtpTransport<BufStream<TcpStream>>;

/// A short-lived handle over an open SMTP dialogue whose envelope sender has
/// already been accepted by one MX of `domain`.
pub struct Deliverabler {
        transport: Transport,
        hosts: Vec<String>,
        domain: String,
        hello_host: String,
        mail_from: String,
        per_step_timeout: Duration,
}

impl Deliverabler {
        /// Resolves `domain`'s MX records, race-dials all of them, and drives
        /// the dialogue through `HELO`/`MAIL FROM`.
        pub async fn open(
                resolver: &TokioAsyncResolver,
                domain: &str,
                hello_host: &str,
                mail_from: &str,
                per_step_timeout: Duration,
        ) -> Result<Self, LookupError> {
                let ascii_domain = idna::domain_to_ascii(domain).unwrap_or_else(|_| domain.to_string());
                let hosts = resolve_mx(resolver, &ascii_domain).await?;
                Self::open_with_hosts(&hosts, &ascii_domain, hello_host, mail_from, per_step_timeout).await
        }

        /// Like [`open`](Self::open) but dials the given `host:port` addresses
        /// directly instead of resolving MX records. Used by the blocklist
        /// canary probes (which target a fixed recipient domain) and by
        /// integration tests driving a local mock SMTP listener.
        pub(crate) async fn open_with_hosts(
                hosts: &[String],
                domain: &str,
                hello_host: &str,
                mail_from: &str,
                per_step_timeout: Duration,
        ) -> Result<Self, LookupError> {
                let mut transport = race_dial(hosts, per_step_timeout, hello_host).await?;

                let sender = EmailAddress::new(mail_from.to_string())
                        .map_err(|e| LookupError::new(LookupErrorKind::EmailParseFailure, e.to_string()))?;
                match transport.get_mut().command(MailCommand::new(Some(sender), vec![])).await {
                        Ok(_) => {}
                        Err(e) => {
                                let _ = transport.quit().await;
                                return Err(classify_async_smtp_err(&e));
                        }
                }

                Ok(Self {
                        transport,
                        hosts: hosts.to_vec(),
                        domain: domain.to_string(),
                        hello_host: hello_host.to_string(),
                        mail_from: mail_from.to_string(),
                        per_step_timeout,
                })
        }

        /// Issues `RCPT TO:<address>`, retrying against a fresh dialogue up to
        /// `retries` times on transient failures. Each retry re-dials the same
        /// MX hosts this dialogue was originally opened against, rather than
        /// re-resolving MX records from scratch.
        ///
        /// `Ok(true)` means the recipient was accepted; `Ok(false)` means the
        /// server cleanly reported the mailbox as absent (not an error worth
        /// surfacing, just "not deliverable"); `Err` is a real failure.
        pub async fn is_deliverable(mut self, address: &str, mut retries: u8) -> (Option<Self>, Result<bool, LookupError>) {
                loop {
                        let recipient = match EmailAddress::new(address.to_string()) {
                                Ok(r) => r,
                                Err(e) => {
                                        self.close().await;
                                        return (
                                                None,
                                                Err(LookupError::new(LookupErrorKind::EmailParseFailure, e.to_string())),
                                        );
                                }
                        };

                        let result = self
                                .transport
                                .get_mut()
                                .command(RcptCommand::new(recipient, vec![]))
                                .await;

                        match result {
                                Ok(_) => return (Some(self), Ok(true)),
                                Err(e) => {
                                        let classified = classify_rcpt_err(&e);
                                        match classified {
                                                None => {
                                                        return (Some(self), Ok(false));
                                                }
                                                Some(classified) if retries > 0 && should_retry(&classified) => {
                                                        retries -= 1;
                                                        let (hosts, domain, hello_host, mail_from, per_step_timeout) = (
                                                                self.hosts.clone(),
                                                                self.domain.clone(),
                                                                self.hello_host.clone(),
                                                                self.mail_from.clone(),
                                                                self.per_step_timeout,
                                                        );
                                                        self.close().await;
                                                        tokio::time::sleep(RETRY_BACKOFF).await;
                                                        match Self::open_with_hosts(&hosts, &domain, &hello_host, &mail_from, per_step_timeout).await {
                                                                Ok(fresh) => self = fresh,
                                                                Err(e) => return (None, Err(e)),
                                                        }
                                                }
                                                Some(classified) => {
                                                        self.close().await;
                                                        return (None, Err(classified));
                                                }
                                        }
                                }
                        }
                }
        }

        /// Probes a random 20-character local-part at `domain`; true iff the
        /// server accepts it, which signals a catch-all.
        pub async fn has_catch_all(self, retries: u8) -> (Option<Self>, bool) {
                let probe = format!("{}@{}", random_local_part(), self.domain);
                let (handle, result) = self.is_deliverable(&probe, retries).await;
                (handle, result.unwrap_or(false))
        }

        /// Sends `QUIT` and releases the connection. Safe to call on every exit
        /// path; never panics.
        pub async fn close(mut self) {
                let _ = self.transport.quit().await;
        }
}

async fn resolve_mx(
        resolver: &TokioAsyncResolver,
        domain: &str,
) -> Result<Vec<String>, LookupError> {
        let lookup = match resolver.mx_lookup(domain).await {
                Ok(lookup) => lookup,
                Err(e) => {
                        if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                                return Err(LookupError::new(LookupErrorKind::NoSuchHost, e.to_string()));
                        }
                        return Err(classify_basic(&e.to_string()));
                }
        };

        let mut hosts: Vec<(u16, String)> = lookup
                .iter()
                .filter(|mx| mx.exchange().is_fqdn() && !mx.exchange().is_root())
                .map(|mx| (mx.preference(), mx.exchange().to_utf8()))
                .collect();
        hosts.sort_by_key(|(preference, _)| *preference);

        if hosts.is_empty() {
                return Err(LookupError::new(
                        LookupErrorKind::NoSuchHost,
                        "No MX records found",
                ));
        }
        debug!(target: LOG_TARGET, domain, count = hosts.len(), "resolved MX records");
        Ok(hosts
                .into_iter()
                .map(|(_, host)| format!("{}:{SMTP_PORT}", host.trim_end_matches('.')))
                .collect())
}

/// Dials every `host:port` address in parallel, racing only the TCP connect
/// and the SMTP greeting exchange — the only phase that's safe to run
/// against every MX candidate at once. `HELO`/`EHLO` is sent exactly once,
/// against the winning candidate only, once the race is decided.
async fn race_dial(
        addrs: &[String],
        per_step_timeout: Duration,
        hello_host: &str,
) -> Result<Transport, LookupError> {
        let mut set = tokio::task::JoinSet::new();
        for addr in addrs {
                let addr = addr.clone();
                set.spawn(async move { dial_one(&addr, per_step_timeout).await });
        }

        let mut first_err = None;
        let mut winner = None;
        while let Some(joined) = set.join_next().await {
                match joined {
                        Ok(Ok(stream)) => {
                                set.abort_all();
                                winner = Some(stream);
                                break;
                        }
                        Ok(Err(e)) => first_err.get_or_insert(e),
                        Err(_join_err) => first_err.get_or_insert(LookupError::new(
                                LookupErrorKind::UnexpectedResponse,
                                "MX dial task panicked",
                        )),
                };
        }

        let stream = match winner {
                Some(stream) => stream,
                None => {
                        return Err(first_err.unwrap_or_else(|| LookupError::new(LookupErrorKind::NoSuchHost, "no MX hosts")));
                }
        };

        // The winner already consumed its greeting during the race; skip
        // re-reading it and send only the EHLO this transport still owes.
        let client = SmtpClient::new()
                .hello_name(ClientId::new(hello_host.to_string()))
                .without_greeting();
        timeout(per_step_timeout, SmtpTransport::new(client, stream))
                .await
                .map_err(|_| LookupError::new(LookupErrorKind::Timeout, "EHLO handshake timed out"))?
                .map_err(|e| classify_async_smtp_err(&e))
}

/// Connects to `addr` and reads (but does not act on beyond validation) the
/// SMTP greeting line, returning the still-open stream for the winner of
/// [`race_dial`] to hand off to [`SmtpTransport::new`].
async fn dial_one(addr: &str, per_step_timeout: Duration) -> Result<BufStream<TcpStream>, LookupError> {
        let tcp = timeout(per_step_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| LookupError::new(LookupErrorKind::Timeout, format!("dial {addr} timed out")))?
                .map_err(|e: io::Error| classify_basic(&e.to_string()))?;

        let mut stream = BufStream::new(tcp);
        timeout(per_step_timeout, read_greeting(&mut stream))
                .await
                .map_err(|_| LookupError::new(LookupErrorKind::Timeout, format!("greeting from {addr} timed out")))??;
        Ok(stream)
}

/// Reads one SMTP reply (following the `CODE SP`/`CODE -` continuation
/// convention) off `stream` and validates it's a positive greeting, without
/// sending anything — the race-dial phase never writes to the wire.
async fn read_greeting<S: tokio::io::AsyncBufRead + Unpin>(stream: &mut S) -> Result<(), LookupError> {
        let mut buffer = String::new();
        loop {
                let mut line = String::new();
                let n = stream
                        .read_line(&mut line)
                        .await
                        .map_err(|e: io::Error| classify_basic(&e.to_string()))?;
                if n == 0 {
                        return Err(LookupError::new(
                                LookupErrorKind::UnexpectedResponse,
                                "connection closed before greeting",
                        ));
                }
                let continues = line.as_bytes().get(3) == Some(&b'-');
                buffer.push_str(&line);
                if !continues {
                        break;
                }
        }

        match buffer.parse::<Response>() {
                Ok(resp) if resp.is_positive() => Ok(()),
                Ok(resp) => Err(classify_basic(&resp.message.join("; "))),
                Err(e) => Err(classify_basic(&e.to_string())),
        }
}

fn classify_async_smtp_err(err: &async_smtp::error::Error) -> LookupError {
        classify_rcpt_err(err).unwrap_or_else(|| classify_basic(&err.to_string()))
}

/// Classifies a reply received for `RCPT TO`. `None` means the server
/// cleanly reported the mailbox as absent; callers treat that as a
/// "not deliverable" outcome rather than an error, matching the source's
/// `parseSMTPError` returning `nil` for those replies.
fn classify_rcpt_err(err: &async_smtp::error::Error) -> Option<LookupError> {
        use async_smtp::error::Error;
        match err {
                Error::Transient(resp) | Error::Permanent(resp) => {
                        let detail = if resp.message.is_empty() {
                                err.to_string()
                        } else {
                                resp.message.join("; ")
                        };
                        let code: u16 = resp.code.to_string().parse().unwrap_or(0);
                        classify_smtp(code, &detail)
                }
                _ => Some(classify_basic(&err.to_string())),
        }
}

fn should_retry(err: &LookupError) -> bool {
        if matches!(
                err.kind,
                LookupErrorKind::TryAgainLater | LookupErrorKind::TooManyRcpt | LookupErrorKind::Timeout
        ) {
                return true;
        }
        crate::error::ins_contains(
                &err.detail,
                &[
                        "i/o timeout",
                        "broken pipe",
                        "use of closed network connection",
                        "connection reset by peer",
                        "connection declined",
                        "connection refused",
                        "multiple regions",
                        "server busy",
                        "eof",
                ],
        )
}

fn random_local_part() -> String {
        const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        (0..20)
                .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
                .collect()
}
