use std::sync::{Arc, Weak};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, info, warn};

/// Marker under which the master receiver of a bot configuration is recorded.
pub fn marker_key(platform: &str, bot_config_id: &str) -> String {
    format!("{}_master_{}", platform, bot_config_id.replace('.', "_"))
}

/// Decides which receiver bound to a bot configuration reads the handoff.
///
/// The first claimer of a marker becomes master until it releases the marker.
/// A marker whose owner went away without releasing stays taken for the
/// rest of the process; there is no re-election.
#[derive(Debug, Default)]
pub struct MasterRegistry {
    markers: DashMap<String, String>, // marker → master instance id
}

impl MasterRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims `key` for `instance_id`. `None` when the marker is already
    /// taken, by another instance or by an earlier claim of this one.
    pub fn claim(self: &Arc<Self>, key: &str, instance_id: &str) -> Option<MasterClaim> {
        match self.markers.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get() == instance_id => {
                // the existing claim stays the only guard
                debug!(marker = key, instance = instance_id, "already master");
                return None;
            }
            Entry::Occupied(entry) => {
                info!(
                    marker = key,
                    instance = instance_id,
                    master = entry.get().as_str(),
                    "another receiver is master, forwarding only"
                );
                return None;
            }
            Entry::Vacant(entry) => {
                entry.insert(instance_id.to_string());
                info!(marker = key, instance = instance_id, "elected master receiver");
            }
        }
        Some(MasterClaim {
            registry: Arc::downgrade(self),
            key: key.to_string(),
            instance_id: instance_id.to_string(),
        })
    }

    pub fn current(&self, key: &str) -> Option<String> {
        self.markers.get(key).map(|v| v.value().clone())
    }

    /// Clears `key` if `instance_id` holds it. Returns whether it did.
    pub fn release(&self, key: &str, instance_id: &str) -> bool {
        if self.markers.remove_if(key, |_, owner| owner == instance_id).is_some() {
            info!(marker = key, instance = instance_id, "master released");
            return true;
        }
        if let Some(owner) = self.current(key) {
            warn!(marker = key, instance = instance_id, master = owner.as_str(), "not the master, marker kept");
        }
        false
    }
}

/// Proof of mastership. Dropping it releases the marker.
#[must_use = "dropping the claim releases mastership immediately"]
#[derive(Debug)]
pub struct MasterClaim {
    registry: Weak<MasterRegistry>,
    key: String,
    instance_id: String,
}

impl MasterClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for MasterClaim {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.key, &self.instance_id);
        }
    }
}
