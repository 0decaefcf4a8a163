//! Read-only view of runtime permission grants

use serde::{Deserialize, Serialize};

/// Grant state of a single runtime permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    Granted,
    #[default]
    Denied,
    /// The permission does not exist on this OS version
    Unavailable,
}

impl Grant {
    pub fn is_granted(self) -> bool {
        self == Grant::Granted
    }
}

/// Current grants relevant to voice interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub microphone: Grant,
    /// Exemption from battery optimization, which keeps the background
    /// wake-word service from being killed
    pub battery_exemption: Grant,
}

impl PermissionSnapshot {
    /// Everything granted
    pub fn granted() -> Self {
        Self {
            microphone: Grant::Granted,
            battery_exemption: Grant::Granted,
        }
    }
}

/// Callback fired whenever a grant changes
pub type PermissionCallback = Box<dyn Fn(PermissionSnapshot) + Send + Sync>;

/// Supplier of permission grants
///
/// Grants can be revoked outside the app's control, so the core re-reads
/// the snapshot before every listen attempt.
pub trait PermissionGate: Send + Sync {
    fn snapshot(&self) -> PermissionSnapshot;

    fn on_change(&self, callback: PermissionCallback);
}
