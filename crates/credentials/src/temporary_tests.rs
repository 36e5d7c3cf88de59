// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

fn sample() -> AwsCredentialsData {
    AwsCredentialsData {
        access_key_id: "AKIA123".into(),
        secret_access_key: "secret".into(),
        session_token: "token".into(),
        expiration: Utc.timestamp_opt(1_700_003_600, 0).single().unwrap(),
    }
}

#[test]
fn file_shape_is_pascal_case_with_version() {
    let file = CredentialsFile::from(&sample());
    let json = serde_json::to_value(&file).unwrap();

    assert_eq!(json["Version"], 1);
    assert_eq!(json["AccessKeyId"], "AKIA123");
    assert_eq!(json["SecretAccessKey"], "secret");
    assert_eq!(json["SessionToken"], "token");
    assert!(json["Expiration"].as_str().unwrap().starts_with("2023-11-14T"));
}

#[test]
fn file_roundtrip() {
    let data = sample();
    let file = CredentialsFile::from(&data);
    let parsed: CredentialsFile =
        serde_json::from_str(&serde_json::to_string(&file).unwrap()).unwrap();
    assert_eq!(parsed.into_data(), data);
}

#[test]
fn expiry_check() {
    let data = sample();
    assert!(!is_expired(&data, data.expiration - chrono::Duration::seconds(1)));
    assert!(is_expired(&data, data.expiration));
    assert!(is_expired(&data, data.expiration + chrono::Duration::seconds(1)));
}
