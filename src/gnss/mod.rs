//! GNSS command API types shared by drivers and callers
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::device::Result;

bitflags! {
    /// Set of satellite constellations / augmentation systems
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct GnssSystems: u16 {
        const GPS = 1 << 0;
        const GLONASS = 1 << 1;
        const GALILEO = 1 << 2;
        const BEIDOU = 1 << 3;
        const QZSS = 1 << 4;
        const IRNSS = 1 << 5;
        const SBAS = 1 << 6;
        const IMES = 1 << 7;
    }
}

impl GnssSystems {
    /// `1` when any bit of `other` is set, `0` otherwise (PMTK flag encoding)
    pub fn flag(self, other: Self) -> u8 {
        u8::from(self.intersects(other))
    }
}

impl fmt::Display for GnssSystems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Receiver dynamics model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMode {
    ZeroDynamics,
    LowDynamics,
    BalancedDynamics,
    HighDynamics,
}

/// Pulse-per-second output behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpsMode {
    Disabled,
    #[default]
    Enabled,
    EnabledAfterLock,
    EnabledWhileLocked,
}

/// Value decoded from a getter's reply. Only one kind is ever in flight, and only
/// while the transaction that asked for it holds the device lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    // FixRate and NavigationMode have no query in protocol v2.2; their getters return NotSupported
    FixRate(u16),
    EnabledSystems(GnssSystems),
    NavigationMode(NavigationMode),
}

/// Configuration commands a GNSS driver answers
#[async_trait::async_trait]
pub trait GnssApi: Send + Sync {
    async fn set_fix_rate(&self, fix_interval_ms: u32) -> Result<()>;

    async fn get_fix_rate(&self) -> Result<u32>;

    async fn set_navigation_mode(&self, mode: NavigationMode) -> Result<()>;

    async fn get_navigation_mode(&self) -> Result<NavigationMode>;

    async fn set_enabled_systems(&self, systems: GnssSystems) -> Result<()>;

    async fn get_enabled_systems(&self) -> Result<GnssSystems>;

    async fn get_supported_systems(&self) -> Result<GnssSystems>;
}
