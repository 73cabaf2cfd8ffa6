//! Power state machine: cold resume, standby entry/exit and power-off
use tokio::time::Instant;

use super::driver::{DeviceState, Lx6};
use super::{GnssError, PowerAction, PowerState, Result};

/// Lifecycle hook driven by the host's power-management framework
#[async_trait::async_trait]
pub trait PowerManaged: Send + Sync {
    async fn on_power_action(&self, action: PowerAction) -> Result<()>;
}

#[async_trait::async_trait]
impl PowerManaged for Lx6 {
    async fn on_power_action(&self, action: PowerAction) -> Result<()> {
        let mut state = self.lock().await;
        let power = state.power;

        let result = match action {
            PowerAction::TurnOn => {
                state.powered = true;
                log::debug!("Module powered");
                Ok(())
            }
            PowerAction::TurnOff => self.turn_off(&mut state).await,
            PowerAction::Suspend => self.suspend(&mut state).await,
            PowerAction::Resume => match power {
                PowerState::Standby => self.exit_standby(&mut state).await,
                PowerState::On => Ok(()),
                _ => self.resume(&mut state).await,
            },
        };

        self.pm_changed(&mut state);
        result
    }
}

impl Lx6 {
    /// Boot transition: cold resume when the module is powered, stay `Off` otherwise
    pub async fn init(&self, powered: bool) -> Result<()> {
        let mut state = self.lock().await;
        state.powered = powered;

        let result = if powered {
            self.resume(&mut state).await
        } else {
            log::info!("Module not powered, staying off");
            Ok(())
        };

        self.pm_changed(&mut state);
        result
    }

    fn pm_changed(&self, state: &mut DeviceState) {
        state.pm_ready_at = Instant::now() + self.config.pm_settle();
    }

    async fn await_pm_ready(&self, state: &DeviceState) {
        if Instant::now() < state.pm_ready_at {
            log::debug!("Waiting until PM ready");
            tokio::time::sleep_until(state.pm_ready_at).await;
        }
    }

    async fn open_and_attach(&self, state: &mut DeviceState) -> Result<()> {
        self.transport.lock().await.open(self.config.transport_timeout()).await?;
        state.chat.attach(self.transport.clone()).await;
        Ok(())
    }

    /// Detach the chat and close the transport, reporting the close result
    async fn release_transport(&self, state: &mut DeviceState) -> Result<()> {
        state.chat.detach().await;
        self.transport.lock().await.close(self.config.transport_timeout()).await?;
        Ok(())
    }

    async fn start_streaming(&self, state: &mut DeviceState) -> Result<()> {
        self.open_and_attach(state).await?;
        state.chat.run_script(&self.scripts.resume).await?;
        self.configure_pps(state).await
    }

    async fn wake(&self, state: &mut DeviceState) -> Result<()> {
        self.open_and_attach(state).await?;
        state.chat.run_script(&self.scripts.exit_standby).await?;
        Ok(())
    }

    async fn fail_to_off(&self, state: &mut DeviceState, error: GnssError) -> Result<()> {
        if let Err(e) = self.release_transport(state).await {
            log::warn!("Failed to close transport: {}", e);
        }
        self.set_power_state(state, PowerState::Off);
        Err(error)
    }

    async fn resume(&self, state: &mut DeviceState) -> Result<()> {
        self.await_pm_ready(state).await;

        log::info!("Resuming");
        self.set_power_state(state, PowerState::Resuming);

        match self.start_streaming(state).await {
            Ok(()) => {
                self.set_power_state(state, PowerState::On);
                log::info!("Resumed");
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to resume: {}", e);
                self.fail_to_off(state, e).await
            }
        }
    }

    async fn suspend(&self, state: &mut DeviceState) -> Result<()> {
        if state.power != PowerState::On {
            return Err(GnssError::InvalidState { action: PowerAction::Suspend, state: state.power });
        }

        self.await_pm_ready(state).await;

        log::info!("Suspending: Go to standby mode");
        self.set_power_state(state, PowerState::Suspending);

        match state.chat.run_script(&self.scripts.suspend).await {
            Ok(_) => {
                self.set_power_state(state, PowerState::Standby);
                log::info!("Suspended");
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to suspend: {}", e);
                self.set_power_state(state, PowerState::On);
                Err(e.into())
            }
        }
    }

    async fn exit_standby(&self, state: &mut DeviceState) -> Result<()> {
        self.await_pm_ready(state).await;

        log::info!("Exit Standby mode");
        self.set_power_state(state, PowerState::ExitingStandby);

        match self.wake(state).await {
            Ok(()) => {
                self.set_power_state(state, PowerState::On);
                log::info!("Left standby");
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to exit standby: {}", e);
                self.fail_to_off(state, e).await
            }
        }
    }

    async fn turn_off(&self, state: &mut DeviceState) -> Result<()> {
        self.await_pm_ready(state).await;

        let result = self.release_transport(state).await;
        state.powered = false;
        self.set_power_state(state, PowerState::Off);

        match &result {
            Ok(()) => log::info!("Powered off"),
            Err(e) => log::error!("Failed to close transport while powering off: {}", e),
        }
        result
    }
}
