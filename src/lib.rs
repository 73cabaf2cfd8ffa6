//! Driver core for Quectel L86-class GNSS receivers: a line-oriented chat engine over a
//! serial transport, PMTK configuration transactions and the module's power state machine.
pub mod chat;
pub mod config;
pub mod device;
pub mod gnss;
pub mod nmea;
pub mod serial;

pub use config::Lx6Config;
pub use device::{ErrorKind, GnssError, Lx6, Lx6Builder, PowerAction, PowerManaged, PowerState};
pub use gnss::{GnssApi, GnssSystems, NavigationMode, PpsMode};
pub use nmea::{NmeaSentence, SentenceKind};
