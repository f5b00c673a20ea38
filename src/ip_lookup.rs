//! Best-effort lookup of the caller's public IP address.

use serde::Deserialize;

use crate::config::IpLookupConfig;

pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

/// Value recorded when the address cannot be determined.
pub const UNKNOWN_IP: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

#[derive(Debug, Clone)]
pub struct IpLookup {
    client: reqwest::Client,
    endpoint: String,
    enabled: bool,
}

impl IpLookup {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            enabled: true,
        }
    }

    /// A lookup that never leaves the process and always reports [`UNKNOWN_IP`].
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(DEFAULT_IP_LOOKUP_URL)
        }
    }

    pub fn from_config(config: &IpLookupConfig) -> Self {
        if config.enabled {
            Self::new(config.endpoint.clone())
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the caller's IP, or [`UNKNOWN_IP`] on any failure.
    pub async fn client_ip(&self) -> String {
        if !self.enabled {
            return UNKNOWN_IP.to_string();
        }

        match self.fetch().await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!("Error getting IP address: {}", e);
                UNKNOWN_IP.to_string()
            }
        }
    }

    async fn fetch(&self) -> Result<String, reqwest::Error> {
        let response: IpResponse = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.ip)
    }
}

impl Default for IpLookup {
    fn default() -> Self {
        Self::new(DEFAULT_IP_LOOKUP_URL)
    }
}
