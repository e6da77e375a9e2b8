//! The normalized signing request handed to the captured capability.
//!
//! The wire shape matches what the vendor bundle's dispatcher expects:
//! `{ url, query, form, requestBody }`, all values strings. `query` always
//! carries a `caver` entry by the time it is dispatched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Profile-fetch path used when a caller omits `url`.
pub const DEFAULT_TARGET_PATH: &str = "/rest/v/profile/get";

/// Query key the bundle requires on every request.
pub const CAVER_KEY: &str = "caver";

/// Injected value when the caller did not set one.
pub const CAVER_DEFAULT: &str = "2";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigningRequest {
    pub url: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    #[serde(default, rename = "requestBody")]
    pub body: BTreeMap<String, String>,
}

impl SigningRequest {
    pub fn new(url: impl Into<String>, query: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            query,
            form: BTreeMap::new(),
            body: BTreeMap::new(),
        }
    }

    /// Fills the `caver` default. A caller-supplied value is preserved.
    pub fn ensure_caver(&mut self) {
        self.query
            .entry(CAVER_KEY.to_string())
            .or_insert_with(|| CAVER_DEFAULT.to_string());
    }
}

/// Parameters accepted on the external surfaces (one-shot argument and
/// `/token` body), where both fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestParams {
    pub url: Option<String>,
    #[serde(default)]
    pub query: Option<BTreeMap<String, String>>,
}

impl RequestParams {
    pub fn into_request(self) -> SigningRequest {
        SigningRequest::new(
            self.url.unwrap_or_else(|| DEFAULT_TARGET_PATH.to_string()),
            self.query.unwrap_or_default(),
        )
    }
}
