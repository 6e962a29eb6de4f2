use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::{BridgeError, Result};

use super::RelayAction;

/// HTTP access to the switches' local REST API. Cheap to clone; all clones
/// share one connection pool.
#[derive(Debug, Clone)]
pub struct SwitchClient {
    http: reqwest::Client,
    report_timeout: Duration,
    relay_timeout: Duration,
}

impl SwitchClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            report_timeout: config.report_timeout,
            relay_timeout: config.relay_timeout,
        })
    }

    /// `GET http://<address>/report`. Returns the body untouched.
    pub async fn fetch_report(&self, address: &str) -> Result<Vec<u8>> {
        let url = format!("http://{address}/report");
        debug!("GET {}", url);
        let resp = self
            .http
            .get(&url)
            .timeout(self.report_timeout)
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(BridgeError::UnexpectedStatus {
                url,
                status: resp.status(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// `GET http://<address>/relay?state=<token>`. Only the status code is checked.
    pub async fn set_relay(&self, address: &str, action: &RelayAction) -> Result<()> {
        let url = format!("http://{address}/relay");
        debug!("GET {}?state={}", url, action.state_token());
        let resp = self
            .http
            .get(&url)
            .query(&[("state", action.state_token())])
            .timeout(self.relay_timeout)
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(BridgeError::UnexpectedStatus {
                url,
                status: resp.status(),
            });
        }
        Ok(())
    }
}
