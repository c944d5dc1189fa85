use reqwest::{Client, Url};
use std::{fmt, net::IpAddr, net::SocketAddr, time::Duration};

// Any HTTP response from the description URL means on. The control port
// stays open in standby, so it cannot tell.
#[derive(Clone, Debug)]
pub struct PowerProber {
    http: Client,
    url: Url,
}

impl PowerProber {
    pub fn new(ip: IpAddr, port: u16, path: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let raw = format!("http://{}{}", SocketAddr::new(ip, port), path);
        let url = Url::parse(&raw).map_err(|err| ProbeError::Url(err.to_string()))?;

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(ProbeError::Http)?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn probe_power_state(&self) -> bool {
        match self.http.get(self.url.clone()).send().await {
            Ok(resp) => {
                tracing::debug!(url = %self.url, status = resp.status().as_u16(), "power probe answered");
                true
            }
            Err(err) => {
                tracing::debug!(url = %self.url, error = %err, "power probe failed; assuming standby");
                false
            }
        }
    }
}

pub fn power_toggle_needed(current: bool, desired: bool) -> bool {
    current != desired
}

#[derive(Debug)]
pub enum ProbeError {
    Url(String),
    Http(reqwest::Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(err) => write!(f, "probe url error: {err}"),
            Self::Http(err) => write!(f, "probe http client error: {err}"),
        }
    }
}

impl std::error::Error for ProbeError {}
