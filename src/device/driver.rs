use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tokio::time::Instant;

use crate::chat::{Chat, ChatMetrics};
use crate::config::Lx6Config;
use crate::gnss::{GnssApi, GnssSystems, NavigationMode, PpsMode, Response};
use crate::nmea::{self, NmeaSentence};
use crate::serial::SharedTransport;
use super::pmtk::{self, FixedScripts, PmtkScript};
use super::{GnssError, PowerState, Result};

pub const FIX_RATE_MIN_MS: u32 = 200;
pub const FIX_RATE_MAX_MS: u32 = 1000;

/// Systems the module can be told to search for
pub const CONFIGURABLE_SYSTEMS: GnssSystems = GnssSystems::GPS
    .union(GnssSystems::GLONASS)
    .union(GnssSystems::GALILEO)
    .union(GnssSystems::BEIDOU);

pub const SUPPORTED_SYSTEMS: GnssSystems = CONFIGURABLE_SYSTEMS
    .union(GnssSystems::QZSS)
    .union(GnssSystems::SBAS);

/// Everything guarded by the device lock
pub(crate) struct DeviceState {
    pub(crate) chat: Chat,
    pub(crate) pmtk: PmtkScript,
    /// Valid only right after the run that filled it, for the lock holder
    pub(crate) response: Option<Response>,
    pub(crate) power: PowerState,
    pub(crate) powered: bool,
    pub(crate) pm_ready_at: Instant,
}

/// Driver for one Quectel L86-class module
pub struct Lx6 {
    pub(crate) config: Lx6Config,
    pub(crate) transport: SharedTransport,
    pub(crate) scripts: FixedScripts,
    state: Mutex<DeviceState>,
    power_tx: watch::Sender<PowerState>,
    sentences_tx: broadcast::Sender<NmeaSentence>,
    metrics_rx: watch::Receiver<ChatMetrics>,
}

pub struct Lx6Builder {
    pub transport: SharedTransport,
    pub config: Lx6Config,
}

impl Lx6Builder {
    pub fn new(transport: SharedTransport) -> Self {
        Self { transport, config: Lx6Config::default() }
    }

    pub fn config(mut self, config: Lx6Config) -> Self {
        self.config = config;
        self
    }

    pub fn pps_mode(mut self, mode: PpsMode) -> Self {
        self.config.pps_mode = mode;
        self
    }

    pub fn pps_pulse_width(mut self, width_ms: u16) -> Self {
        self.config.pps_pulse_width = width_ms;
        self
    }

    pub fn build(self) -> Lx6 {
        let config = self.config;
        let (sentences_tx, _) = broadcast::channel(config.sentence_capacity.max(1));
        let chat = Chat::new(nmea::sentence_matches(&sentences_tx), config.receive_buffer_size.max(1));
        let metrics_rx = chat.metrics_receiver();
        let (power_tx, _) = watch::channel(PowerState::Off);

        let state = DeviceState {
            chat,
            pmtk: PmtkScript::new(config.pmtk_buffer_size, config.script_timeout()),
            response: None,
            power: PowerState::Off,
            powered: false,
            pm_ready_at: Instant::now() + config.pm_settle(),
        };

        Lx6 {
            scripts: FixedScripts::new(config.script_timeout()),
            transport: self.transport,
            state: Mutex::new(state),
            power_tx,
            sentences_tx,
            metrics_rx,
            config,
        }
    }
}

impl Lx6 {
    pub fn config(&self) -> &Lx6Config {
        &self.config
    }

    /// Stream of GGA/RMC (and GSV) sentences, delivered regardless of running transactions
    pub fn subscribe_sentences(&self) -> broadcast::Receiver<NmeaSentence> {
        self.sentences_tx.subscribe()
    }

    pub fn power_state(&self) -> PowerState {
        *self.power_tx.borrow()
    }

    pub fn power_state_receiver(&self) -> watch::Receiver<PowerState> {
        self.power_tx.subscribe()
    }

    /// Whether the module has supply power, as last reported by `init` or a TurnOn/TurnOff action
    pub async fn is_powered(&self) -> bool {
        self.lock().await.powered
    }

    pub fn chat_metrics(&self) -> ChatMetrics {
        self.metrics_rx.borrow().clone()
    }

    /// Serialization lock: one transaction or power transition at a time
    pub(crate) async fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().await
    }

    pub(crate) fn set_power_state(&self, state: &mut DeviceState, power: PowerState) {
        state.power = power;
        self.power_tx.send_replace(power);
    }

    /// Run the parameterized script as it currently stands and park the decoded value
    /// in the response slot
    async fn run_pmtk(&self, state: &mut DeviceState) -> Result<()> {
        let script = state.pmtk.script();
        state.response = None;

        log::debug!("Sending {}", state.pmtk.request());
        let outcome = state.chat.run_script(&script).await?;
        state.response = outcome.response;
        Ok(())
    }

    /// PMTK285 with the configured PPS mode and pulse width. Caller holds the lock.
    pub(crate) async fn configure_pps(&self, state: &mut DeviceState) -> Result<()> {
        let mode = pmtk::pps_mode_code(self.config.pps_mode);

        state.pmtk.set_request(format_args!("PMTK285,{},{}", mode, self.config.pps_pulse_width))?;
        state.pmtk.set_match(format_args!("PMTK001,285,{}", pmtk::ACK_SUCCESS))?;
        self.run_pmtk(state).await
    }
}

#[async_trait::async_trait]
impl GnssApi for Lx6 {
    async fn set_fix_rate(&self, fix_interval_ms: u32) -> Result<()> {
        if !(FIX_RATE_MIN_MS..=FIX_RATE_MAX_MS).contains(&fix_interval_ms) {
            return Err(GnssError::InvalidArgument(format!(
                "fix interval {} ms outside {}..={} ms",
                fix_interval_ms, FIX_RATE_MIN_MS, FIX_RATE_MAX_MS
            )));
        }

        let mut state = self.lock().await;
        state.pmtk.set_request(format_args!("PMTK220,{}", fix_interval_ms))?;
        state.pmtk.set_match(format_args!("PMTK001,220,{},{}", pmtk::ACK_SUCCESS, fix_interval_ms))?;
        self.run_pmtk(&mut state).await
    }

    // not supported in protocol specification v2.2
    async fn get_fix_rate(&self) -> Result<u32> {
        Err(GnssError::NotSupported)
    }

    async fn set_navigation_mode(&self, mode: NavigationMode) -> Result<()> {
        let code = pmtk::navigation_mode_code(mode);

        let mut state = self.lock().await;
        state.pmtk.set_request(format_args!("PMTK886,{}", code))?;
        state.pmtk.set_match(format_args!("PMTK001,886,{}", pmtk::ACK_SUCCESS))?;
        self.run_pmtk(&mut state).await
    }

    // not supported in protocol specification v2.2
    async fn get_navigation_mode(&self) -> Result<NavigationMode> {
        Err(GnssError::NotSupported)
    }

    async fn set_enabled_systems(&self, systems: GnssSystems) -> Result<()> {
        let unsupported = systems.difference(CONFIGURABLE_SYSTEMS);
        if !unsupported.is_empty() {
            return Err(GnssError::InvalidArgument(format!("cannot enable {}", unsupported)));
        }

        let gps = systems.flag(GnssSystems::GPS);
        let glonass = systems.flag(GnssSystems::GLONASS);
        let galileo = systems.flag(GnssSystems::GALILEO);
        let beidou = systems.flag(GnssSystems::BEIDOU);

        let mut state = self.lock().await;
        state.pmtk.set_request(format_args!("PMTK353,{},{},{},0,{}", gps, glonass, galileo, beidou))?;
        state.pmtk.set_match(format_args!(
            "PMTK001,353,{},{},{},{},0,{}",
            pmtk::ACK_SUCCESS, gps, glonass, galileo, beidou
        ))?;
        self.run_pmtk(&mut state).await?;

        // SBAS cannot pass the range check above, so this always switches SBAS off
        state.pmtk.set_request(format_args!("PMTK313,{}", systems.flag(GnssSystems::SBAS)))?;
        state.pmtk.set_match(format_args!("PMTK001,313,{}", pmtk::ACK_SUCCESS))?;
        self.run_pmtk(&mut state).await
    }

    async fn get_enabled_systems(&self) -> Result<GnssSystems> {
        let mut state = self.lock().await;
        state.pmtk.set_request(format_args!("PMTK355"))?;
        state.pmtk.set_match(format_args!("PMTK001,355,{}", pmtk::ACK_SUCCESS))?;

        state.pmtk.set_callback(Some(pmtk::decode_search_mode));
        let result = self.run_pmtk(&mut state).await;
        state.pmtk.set_callback(None);
        result?;

        // SBAS is not reported by protocol specification v2.2
        match state.response.take() {
            Some(Response::EnabledSystems(systems)) => Ok(systems),
            _ => Err(GnssError::MalformedResponse("PMTK355 reply did not carry 5 search flags".into())),
        }
    }

    async fn get_supported_systems(&self) -> Result<GnssSystems> {
        Ok(SUPPORTED_SYSTEMS)
    }
}
