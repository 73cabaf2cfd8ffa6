#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use quectel_lx6::serial::{self, MockHandle, MockTransport};
use quectel_lx6::{Lx6, Lx6Builder, Lx6Config};

pub const SCRIPT_TIMEOUT: Duration = Duration::from_millis(300);
pub const PM_SETTLE: Duration = Duration::from_millis(150);

/// Short timeouts so failure paths finish quickly
pub fn test_config() -> Lx6Config {
    Lx6Config {
        script_timeout_ms: SCRIPT_TIMEOUT.as_millis() as u64,
        transport_timeout_ms: 500,
        pm_settle_ms: PM_SETTLE.as_millis() as u64,
        ..Default::default()
    }
}

pub fn build(config: Lx6Config) -> (Arc<Lx6>, MockHandle) {
    let (transport, mock) = MockTransport::new();
    let gnss = Lx6Builder::new(serial::shared(transport)).config(config).build();
    (Arc::new(gnss), mock)
}

/// Device after a successful cold resume, with the boot traffic cleared
pub async fn powered_device() -> (Arc<Lx6>, MockHandle) {
    let (gnss, mock) = build(test_config());
    gnss.init(true).await.expect("cold resume");
    mock.clear_writes();
    (gnss, mock)
}

/// Default acknowledgements except for the command with `id`, which gets `reply`
pub fn override_reply(mock: &MockHandle, id: &'static str, reply: Vec<&'static str>) {
    mock.set_responder(move |body| {
        let command = body.strip_prefix("PMTK").and_then(|rest| rest.split(',').next());
        if command == Some(id) {
            reply.iter().map(|r| r.to_string()).collect()
        } else {
            serial::mock::acknowledge_pmtk(body)
        }
    });
}
