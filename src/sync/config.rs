use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::administration::DEFAULT_API_BASE_URL;

/// What a pass does when the API answers 403/429 while listing versions or
/// fetching a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Abort the pass with the throttling error.
    #[default]
    Fail,
    /// Stop fetching and apply what was fetched so far. The rest is picked up
    /// by the next pass because its versions were never recorded.
    StopEarly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub administration_id: u64,
    pub api_token: String,
    pub request_timeout: Duration,
    pub sync_interval: Duration,
    /// Maximum number of ids per `POST {path}/synchronization` request.
    pub max_request_size: usize,
    pub throttle_policy: ThrottlePolicy,
    /// Storage key of the tag used by tagged syncs.
    pub tag_path: String,
    /// Encrypts the stored tag when set.
    pub passphrase: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            administration_id: 0,
            api_token: "".to_string(),
            request_timeout: Duration::from_secs(30),
            sync_interval: Duration::from_secs(5 * 60),
            max_request_size: 100,
            throttle_policy: ThrottlePolicy::Fail,
            tag_path: "accounting/sync_database/tag".to_string(),
            passphrase: None,
        }
    }
}
