//! Narrow blocking HTTP client.
//!
//! The profiler needs exactly three network operations outside the
//! speed-test CLI itself: fetch a small JSON blob, download one tarball,
//! and probe connectivity. Everything rides one pooled client with
//! per-request timeouts.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{
    CHECK_CONN_TIMEOUT_SECS, HTTP_CONNECT_TIMEOUT_SECS, HTTP_TIMEOUT_SECS, HTTP_USER_AGENT,
    SPEEDTEST_DL_TIMEOUT_SECS,
};

const NET_META_URL: &str = "https://speed.cloudflare.com/meta";

pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(HTTP_USER_AGENT)
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| format!("Failed to initialize HTTP client: {e}"))?;
        Ok(Self { client })
    }

    /// Fetches a small response body as text.
    pub fn get(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| format!("Request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("Request failed: HTTP {}", response.status()));
        }
        response
            .text()
            .map_err(|e| format!("Failed to read response body: {e}"))
    }

    /// Streams `url` into `dest` with the long download timeout.
    pub fn download(&self, url: &str, dest: &Path) -> Result<(), String> {
        let mut response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(SPEEDTEST_DL_TIMEOUT_SECS))
            .send()
            .map_err(|e| format!("Download failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("Download failed: HTTP {}", response.status()));
        }
        let mut file =
            File::create(dest).map_err(|e| format!("Failed to create {}: {e}", dest.display()))?;
        response
            .copy_to(&mut file)
            .map_err(|e| format!("Download failed: {e}"))?;
        Ok(())
    }

    /// HEAD probe with short timeouts; any successful exchange counts.
    pub fn check_connectivity(&self, host: &str) -> bool {
        self.client
            .head(format!("https://{host}/"))
            .timeout(Duration::from_secs(CHECK_CONN_TIMEOUT_SECS))
            .send()
            .is_ok()
    }
}

/// Peer-reported network facts used for the ISP/location lines.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetMeta {
    pub asn: u64,
    pub as_organization: String,
    pub city: String,
    pub country: String,
    pub region: String,
}

impl NetMeta {
    /// `"AS13335 Cloudflare"` when both parts are known, the organization
    /// alone otherwise.
    pub fn isp_display(&self) -> String {
        if self.asn != 0 && !self.as_organization.is_empty() {
            return format!("AS{} {}", self.asn, self.as_organization);
        }
        self.as_organization.clone()
    }
}

pub fn fetch_net_meta(http: &HttpClient) -> Result<NetMeta, String> {
    let body = http.get(NET_META_URL)?;
    serde_json::from_str(&body).map_err(|e| format!("Parse Error: {e}"))
}
