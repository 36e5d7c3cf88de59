// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The on-disk JSON shape of a temporary credential set.
//!
//! This is the exact document a credentials-process must print on stdout,
//! and the shape the agent writes for both its own credentials and each
//! queue's.

use chrono::{DateTime, Utc};
use fh_api::AwsCredentialsData;
use serde::{Deserialize, Serialize};

/// Credential-process document version. Fixed by the SDK contract.
const CREDENTIALS_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialsFile {
    pub version: u32,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl From<&AwsCredentialsData> for CredentialsFile {
    fn from(data: &AwsCredentialsData) -> Self {
        Self {
            version: CREDENTIALS_FILE_VERSION,
            access_key_id: data.access_key_id.clone(),
            secret_access_key: data.secret_access_key.clone(),
            session_token: data.session_token.clone(),
            expiration: data.expiration,
        }
    }
}

impl CredentialsFile {
    pub fn into_data(self) -> AwsCredentialsData {
        AwsCredentialsData {
            access_key_id: self.access_key_id,
            secret_access_key: self.secret_access_key,
            session_token: self.session_token,
            expiration: self.expiration,
        }
    }
}

/// True once the credential set's expiration has passed.
pub fn is_expired(data: &AwsCredentialsData, now: DateTime<Utc>) -> bool {
    data.expiration <= now
}

#[cfg(test)]
#[path = "temporary_tests.rs"]
mod tests;
