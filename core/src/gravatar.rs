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

//! Gravatar HEAD probe: is a picture registered for this address's MD5?

use tracing::debug;

use crate::LOG_TARGET;

const GRAVATAR_BASE_URL: &str = "https://en.gravatar.com";

/// Never fails: any transport error or non-2xx status is reported as `false`.
pub async fn has_gravatar(client: &reqwest::Client, md5: &str) -> bool {
        let url = format!("{GRAVATAR_BASE_URL}/{md5}.json");
        let found = matches!(client.head(&url).send().await, Ok(resp) if resp.status().is_success());
        debug!(target: LOG_TARGET, md5, found, "gravatar probe");
        found
}

#[cfg(test)]
mod tests {
        use super::*;

        #[tokio::test]
        async fn unreachable_host_yields_false() {
                let client = reqwest::Client::builder()
                        .timeout(std::time::Duration::from_millis(200))
                        .build()
                        .unwrap();
                assert!(!has_gravatar(&client, "0000000000000000000000000000zz").await);
        }
}
