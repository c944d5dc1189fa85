use std::net::IpAddr;
use std::time::Duration;

use crate::config::{Config, KnownBox};
use crate::model::{DeviceIdentity, DeviceSummary};
use crate::power::{power_toggle_needed, PowerProber};
use crate::protocol::{lookup_button, normalize_button_name, ButtonCode, POWER_OFF, POWER_ON};
use crate::session::{Session, SessionSettings, TcpConnector};

#[derive(Debug, Clone)]
pub struct Mediabox {
    identity: DeviceIdentity,
    session: Session,
    prober: PowerProber,
}

impl Mediabox {
    pub fn new(identity: DeviceIdentity, session: Session, prober: PowerProber) -> Self {
        Self {
            identity,
            session,
            prober,
        }
    }

    pub fn start(known: &KnownBox, config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let ip: IpAddr = known.ip.trim().parse()?;
        let settings = SessionSettings::from_config(config);
        let connector = TcpConnector::new(ip, settings.port, settings.keepalive);
        let prober = PowerProber::new(
            ip,
            config.power.probe_port,
            &config.power.probe_path,
            Duration::from_millis(config.power.probe_timeout_ms),
        )?;
        let identity = known.identity();
        let (session, _task) = Session::spawn(identity.label.clone(), connector, settings);
        Ok(Self::new(identity, session, prober))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn unique_id(&self) -> &str {
        &self.identity.unique_id
    }

    pub fn label(&self) -> &str {
        &self.identity.label
    }

    pub fn ip(&self) -> &str {
        &self.identity.ip_address
    }

    pub fn is_reachable(&self) -> bool {
        self.session.is_reachable()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.identity.unique_id.clone(),
            name: self.identity.label.clone(),
            reachable: self.is_reachable(),
        }
    }

    pub fn on_button_pressed(&self, name: &str) -> bool {
        let name = normalize_button_name(name);
        tracing::debug!(device = %self.label(), button = %name, "button pressed");

        match name.as_str() {
            POWER_ON | POWER_OFF => {
                self.session.discard_digits();
                let desired = name == POWER_ON;
                let device = self.clone();
                tokio::spawn(async move {
                    device.set_power_state(desired).await;
                });
                true
            }
            _ => match lookup_button(&name) {
                Some(code) => {
                    self.session.press(code);
                    true
                }
                None => {
                    tracing::warn!(device = %self.label(), button = %name, "button not mapped; ignored");
                    false
                }
            },
        }
    }

    pub fn on_favorite_pressed(&self, favorite: &str) -> bool {
        tracing::debug!(device = %self.label(), favorite = %favorite, "favorite pressed");
        match favorite_codes(favorite) {
            Some(codes) => {
                self.session.enqueue(codes);
                true
            }
            None => {
                tracing::warn!(device = %self.label(), favorite = %favorite, "favorite is not a channel number; ignored");
                false
            }
        }
    }

    pub async fn probe_power_state(&self) -> bool {
        self.prober.probe_power_state().await
    }

    pub async fn set_power_state(&self, desired: bool) -> bool {
        let current = self.prober.probe_power_state().await;
        if !power_toggle_needed(current, desired) {
            tracing::info!(device = %self.label(), powered = current, "power already in requested state");
            return false;
        }
        tracing::info!(device = %self.label(), powered = current, desired, "toggling power");
        self.session.enqueue(vec![ButtonCode::POWER]);
        true
    }

    pub fn shutdown(&self) {
        self.session.shutdown();
    }
}

pub fn favorite_codes(favorite: &str) -> Option<Vec<ButtonCode>> {
    let favorite = favorite.trim();
    if favorite.is_empty() {
        return None;
    }
    let mut codes = favorite
        .bytes()
        .map(|b| b.is_ascii_digit().then(|| ButtonCode::digit(b - b'0')).flatten())
        .collect::<Option<Vec<_>>>()?;
    codes.push(ButtonCode::CURSOR_ENTER);
    Some(codes)
}
