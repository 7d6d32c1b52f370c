//! # Link Model
//!
//! Plain data types exchanged between the storage backends and the HTTP/gRPC
//! front ends. Field names follow the JSON wire format of the public HTTP API
//! (`correlation_id`, `original_url`, `short_url`).
//!
//! Short codes are [`SHORT_CODE_LEN`] ASCII alphanumerics produced by
//! [`generate_short_code`]; they are opaque to clients and unique per store.

use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

/// Length of a generated short code.
pub const SHORT_CODE_LEN: usize = 10;

/// A link as persisted by a storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLink {
    pub short: String,
    pub origin: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

/// One entry of a batch shortening request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    #[serde(rename = "original_url")]
    pub origin: String,
}

/// The short code assigned to one [`BatchItem`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub correlation_id: String,
    pub short: String,
}

/// A live link owned by a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLink {
    pub short: String,
    pub origin: String,
}

/// Service-wide counters reported by the internal stats endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub urls: usize,
    pub users: usize,
}

/// Returns a fresh random short code.
pub fn generate_short_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_CODE_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codes_are_alphanumeric() {
        let code = generate_short_code();
        assert_eq!(code.len(), SHORT_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn batch_item_uses_wire_names() {
        let item: BatchItem =
            serde_json::from_str(r#"{"correlation_id":"c1","original_url":"https://a.io"}"#)
                .unwrap();
        assert_eq!(item.correlation_id, "c1");
        assert_eq!(item.origin, "https://a.io");
    }
}
