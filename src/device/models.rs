use serde::{Deserialize, Serialize};

/// Power state of the module as tracked by the driver
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerState {
    /// Transport closed, chat detached
    Off,
    /// Streaming, chat attached
    On,
    /// Module in low-power standby
    Standby,
    Resuming,
    Suspending,
    ExitingStandby,
}

/// Lifecycle signal from the power-management framework
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerAction {
    TurnOn,
    TurnOff,
    Suspend,
    Resume,
}
