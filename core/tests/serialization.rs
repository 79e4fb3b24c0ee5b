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

use check_if_email_exists::{Address, Lookup, LookupError, LookupErrorKind};

fn sample_address() -> Address {
    check_if_email_exists::address::parse("Someone@Example.COM").expect("valid address")
}

fn sample_lookup() -> Lookup {
    Lookup {
        raw: "someone@example.com".to_string(),
        username: "someone".to_string(),
        domain: "example.com".to_string(),
        md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
        valid_format: true,
        deliverable: true,
        full_inbox: false,
        host_exists: true,
        catch_all: false,
        disposable: false,
        gravatar: true,
    }
}

#[test]
fn lookup_json_uses_wire_field_names() {
    let json = serde_json::to_value(sample_lookup()).unwrap();
    assert_eq!(json["address"], "someone@example.com");
    assert_eq!(json["validFormat"], true);
    assert_eq!(json["fullInbox"], false);
    assert_eq!(json["hostExists"], true);
    assert_eq!(json["catchAll"], false);
    assert_eq!(json["md5Hash"], "d41d8cd98f00b204e9800998ecf8427e");
}

#[test]
fn lookup_xml_uses_wire_field_names() {
    let xml = quick_xml::se::to_string(&sample_lookup()).unwrap();
    assert!(xml.contains("<address>someone@example.com</address>"));
    assert!(xml.contains("<validFormat>true</validFormat>"));
    assert!(xml.contains("<fullInbox>false</fullInbox>"));
    assert!(xml.contains("<hostExists>true</hostExists>"));
    assert!(xml.contains("<catchAll>false</catchAll>"));
}

#[test]
fn address_json_uses_wire_field_names() {
    let address = sample_address();
    let json = serde_json::to_value(&address).unwrap();
    assert_eq!(json["address"], "Someone@example.com");
    assert_eq!(json["username"], "Someone");
    assert_eq!(json["domain"], "example.com");
    assert!(json["md5Hash"].is_string());
}

#[test]
fn lookup_error_json_has_message_and_details() {
    let err = LookupError::new(LookupErrorKind::Blocked, "550 blocked by spamhaus");
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["message"], "Blocked by mail server");
    assert_eq!(json["details"], "550 blocked by spamhaus");
    assert_eq!(json.as_object().unwrap().len(), 2);
}

#[test]
fn lookup_error_xml_round_trips_message_and_details() {
    let err = LookupError::new(LookupErrorKind::Timeout, "dial 10.0.0.1:25 timed out");
    let xml = quick_xml::se::to_string(&err).unwrap();
    assert!(xml.contains("<message>The connection to the mail server has timed out</message>"));
    assert!(xml.contains("<details>dial 10.0.0.1:25 timed out</details>"));
}
