use std::collections::HashMap;
use std::fmt;

use crate::config::{Config, KnownBox};
use crate::device::Mediabox;
use crate::model::DeviceSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    AlreadyKnown,
    Conflict,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    UnknownDevice(String),
    UnknownButton(String),
    InvalidFavorite(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice(id) => write!(f, "no box registered with id {id}"),
            Self::UnknownButton(name) => write!(f, "unknown button {name}"),
            Self::InvalidFavorite(raw) => write!(f, "favorite {raw} is not a channel number"),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Mediabox>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for known in &config.boxes {
            if let Err(err) = registry.register_box(known, config) {
                tracing::error!(id = %known.unique_id, ip = %known.ip, error = %err, "box not registered");
            }
        }
        registry
    }

    pub fn register_box(
        &mut self,
        known: &KnownBox,
        config: &Config,
    ) -> Result<Registration, Box<dyn std::error::Error>> {
        if let Some(existing) = self.devices.get(known.unique_id.trim()) {
            return Ok(duplicate(existing, known.ip.trim()));
        }
        let device = Mediabox::start(known, config)?;
        Ok(self.register(device))
    }

    pub fn register(&mut self, device: Mediabox) -> Registration {
        if let Some(existing) = self.devices.get(device.unique_id()) {
            let outcome = duplicate(existing, device.ip());
            device.shutdown();
            return outcome;
        }
        tracing::info!(
            id = %device.unique_id(),
            label = %device.label(),
            ip = %device.ip(),
            model = %device.identity().model_name,
            "box registered"
        );
        self.devices.insert(device.unique_id().to_string(), device);
        Registration::Added
    }

    pub fn get(&self, id: &str) -> Option<&Mediabox> {
        self.devices.get(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn list(&self) -> Vec<DeviceSummary> {
        let mut list: Vec<DeviceSummary> = self.devices.values().map(Mediabox::summary).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn button_pressed(&self, id: &str, name: &str) -> Result<(), RegistryError> {
        let device = self.device(id)?;
        if device.on_button_pressed(name) {
            Ok(())
        } else {
            Err(RegistryError::UnknownButton(name.to_string()))
        }
    }

    pub fn favorite_pressed(&self, id: &str, favorite: &str) -> Result<(), RegistryError> {
        let device = self.device(id)?;
        if device.on_favorite_pressed(favorite) {
            Ok(())
        } else {
            Err(RegistryError::InvalidFavorite(favorite.to_string()))
        }
    }

    pub async fn power_state(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.device(id)?.probe_power_state().await)
    }

    pub fn shutdown_all(&self) {
        for device in self.devices.values() {
            device.shutdown();
        }
    }

    fn device(&self, id: &str) -> Result<&Mediabox, RegistryError> {
        self.get(id)
            .ok_or_else(|| RegistryError::UnknownDevice(id.to_string()))
    }
}

fn duplicate(existing: &Mediabox, ip: &str) -> Registration {
    if existing.ip() == ip {
        tracing::debug!(id = %existing.unique_id(), ip = %ip, "box already registered with the same IP");
        Registration::AlreadyKnown
    } else {
        tracing::warn!(
            id = %existing.unique_id(),
            registered_ip = %existing.ip(),
            ip = %ip,
            "box already registered with a different IP; keeping the first"
        );
        Registration::Conflict
    }
}
