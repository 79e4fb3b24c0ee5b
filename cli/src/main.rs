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

//! Command-line driver around the `check-if-email-exists` verification core.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use check_if_email_exists::{Verifier, VerifierConfig};
use clap::Parser;

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Xml,
}

/// Checks whether an email address is likely to be deliverable, without
/// sending any mail.
#[derive(Parser)]
#[clap(version, author)]
struct Cli {
    /// The email address to verify.
    email: String,

    /// Name advertised during `HELO`/`EHLO`.
    #[clap(long, env = "RCH_HELLO_NAME", default_value = "localhost")]
    hello_host: String,

    /// Envelope sender used for `MAIL FROM`.
    #[clap(long, env = "RCH_FROM_EMAIL", default_value = "verify@localhost")]
    mail_from: String,

    /// Overall deadline for the verification, in seconds.
    #[clap(long, default_value = "30")]
    timeout_secs: u64,

    /// Output format.
    #[clap(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also check whether this host's sending IP is blocklisted before
    /// verifying the address.
    #[clap(long)]
    check_blacklist: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let verifier = Verifier::with_config(VerifierConfig {
        hello_host: cli.hello_host.clone(),
        mail_from: cli.mail_from.clone(),
        ..Default::default()
    });

    if cli.check_blacklist {
        if let Some(err) = verifier.blacklisted().await {
            eprintln!("warning: sending IP appears blocklisted: {err}");
        }
    }

    let lookup = verifier
        .verify_timeout(&cli.email, Duration::from_secs(cli.timeout_secs))
        .await;

    let exit_code = match &lookup {
        Ok(l) if l.deliverable => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    };

    match lookup {
        Ok(l) => print_result(&l, cli.format)?,
        Err(e) => print_result(&e, cli.format)?,
    }

    Ok(exit_code)
}

fn print_result(value: &impl serde::Serialize, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).context("serializing to JSON")?);
        }
        OutputFormat::Xml => {
            println!("{}", quick_xml::se::to_string(value).context("serializing to XML")?);
        }
    }
    Ok(())
}
