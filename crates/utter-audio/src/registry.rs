//! Exclusive ownership of physical capture devices.
//!
//! Every session claims its device here before opening it. The claim is a
//! guard; dropping it frees the device for the next session.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("device {0} is held by another session")]
pub struct DeviceBusy(pub String);

/// Shared table of devices currently held. Clone it into every engine that
/// may open the same hardware.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `device_id`, failing fast if another session holds it.
    pub fn claim(&self, device_id: &str) -> Result<DeviceLease, DeviceBusy> {
        let mut held = self.held.lock();
        if !held.insert(device_id.to_owned()) {
            return Err(DeviceBusy(device_id.to_owned()));
        }
        debug!(device = device_id, "device claimed");
        Ok(DeviceLease {
            device_id: device_id.to_owned(),
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, device_id: &str) -> bool {
        self.held.lock().contains(device_id)
    }
}

/// Proof of exclusive ownership. Releases the device on drop.
#[derive(Debug)]
pub struct DeviceLease {
    device_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.device_id);
        debug!(device = %self.device_id, "device released");
    }
}
