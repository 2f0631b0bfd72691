// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The authoritative control state and its transitions.
//!
//! [`Controller`] is the only writer to the hardware and to the persisted
//! config. The daemon wraps it in a single mutex ([`SharedController`]) so
//! that every hardware transaction, whether it comes from a client or from
//! the G-Mode key, runs to completion before the next one starts.

use crate::hardware::{Hardware, TempSensor};
use crate::mode::{FanId, PowerMode};
use crate::protocol::{AllData, FansData, PowerData, StatusData, TempsData};
use crate::store::{ConfigStore, FanProfiles, PersistedConfig, SCHEMA_VERSION};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// The controller as shared between connection workers and the key listener.
pub type SharedController = Arc<Mutex<Controller>>;

/// Take the hardware lock. A panic in an earlier holder does not leave the
/// state half-written (every mutation is a plain field store), so poisoning
/// is ignored.
pub fn lock(shared: &SharedController) -> MutexGuard<'_, Controller> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("invalid fan id {0}")]
    InvalidFan(i64),

    #[error("invalid fan boost percentage {0}")]
    InvalidPercentage(i64),
}

/// Boost and manual flag of one fan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanState {
    pub boost: u8,
    pub manual: bool,
}

/// What G-Mode displaced, restored when it is turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub mode: PowerMode,
    pub fans: [FanState; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareState {
    pub mode: PowerMode,
    pub g_mode_active: bool,
    pub fans: [FanState; 2],
    /// Present exactly while G-Mode is on after a normal enable.
    pub pre_gmode: Option<Snapshot>,
}

impl HardwareState {
    pub fn fan(&self, fan: FanId) -> FanState {
        self.fans[fan.index()]
    }
}

pub struct Controller {
    hardware: Hardware,
    store: ConfigStore,
    state: HardwareState,
    model: String,
    auto_apply: bool,
}

impl Controller {
    /// Wrap already-validated hardware without touching it.
    pub fn new(hardware: Hardware, store: ConfigStore) -> Self {
        Self {
            hardware,
            store,
            state: HardwareState::default(),
            model: "Unknown".to_string(),
            auto_apply: true,
        }
    }

    /// Detect the model, load the persisted state and replay it if asked to.
    pub fn start(hardware: Hardware, store: ConfigStore) -> Self {
        let mut controller = Self::new(hardware, store);
        controller.model = controller.hardware.detect_model();

        let config = controller.store.load();
        controller.auto_apply = config.auto_apply;
        if config.auto_apply {
            controller.replay(&config);
        } else {
            log::info!("Auto-apply disabled, leaving hardware untouched");
        }
        controller
    }

    fn replay(&mut self, config: &PersistedConfig) {
        log::info!("Applying saved configuration ({})", config.power_mode);
        self.apply_power_mode(config.power_mode, false);

        if config.power_mode.is_custom() {
            let profiles = &config.fan_profiles;
            for (fan, boost, manual) in [
                (FanId::Cpu, profiles.cpu_fan_boost, profiles.cpu_manual),
                (FanId::Gpu, profiles.gpu_fan_boost, profiles.gpu_manual),
            ] {
                if manual {
                    self.apply_fan_boost(fan, boost, false, true);
                }
            }
        }

        // After the fans, so the snapshot captures them.
        if config.g_mode {
            self.apply_enable_g_mode(false);
        }

        match self.hardware.g_mode_status() {
            Ok(fw) if fw != self.state.g_mode_active => {
                log::warn!(
                    "Firmware reports G-Mode {} but saved state has it {}",
                    on_off(fw),
                    on_off(self.state.g_mode_active)
                );
            }
            Ok(_) => {}
            Err(e) => log::warn!("Could not query firmware G-Mode flag: {e}"),
        }
        log::info!("Configuration applied");
    }

    // -- queries ------------------------------------------------------------

    pub fn state(&self) -> &HardwareState {
        &self.state
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Boost for a protocol fan number; 0 for anything that isn't a fan.
    pub fn get_fan_boost(&self, fan_id: i64) -> u8 {
        match FanId::try_from(fan_id) {
            Ok(fan) => self.state.fan(fan).boost,
            Err(bad) => {
                log::warn!(target: "security", "SECURITY: invalid fan_id {bad}");
                0
            }
        }
    }

    pub fn status(&self) -> StatusData {
        StatusData {
            model: self.model.clone(),
            hwmon_available: self.hardware.hwmon_available(),
            g_mode_active: self.state.g_mode_active,
        }
    }

    pub fn temps(&mut self) -> TempsData {
        TempsData {
            cpu_temp: self.hardware.read_temp(TempSensor::Cpu),
            gpu_temp: self.hardware.read_temp(TempSensor::Gpu),
        }
    }

    pub fn fans(&mut self) -> FansData {
        let cpu = self.state.fan(FanId::Cpu);
        let gpu = self.state.fan(FanId::Gpu);
        FansData {
            fan1_rpm: self.hardware.read_fan_rpm(FanId::Cpu),
            fan2_rpm: self.hardware.read_fan_rpm(FanId::Gpu),
            fan1_boost: cpu.boost,
            fan2_boost: gpu.boost,
            fan1_manual: cpu.manual,
            fan2_manual: gpu.manual,
        }
    }

    pub fn power(&self) -> PowerData {
        PowerData {
            current_mode: self.state.mode,
            g_mode: self.state.g_mode_active,
        }
    }

    pub fn all_data(&mut self) -> AllData {
        AllData {
            temps: self.temps(),
            fans: self.fans(),
            power: self.power(),
            status: self.status(),
        }
    }

    // -- transitions --------------------------------------------------------

    pub fn set_power_mode(&mut self, mode: PowerMode) {
        self.apply_power_mode(mode, true);
    }

    fn apply_power_mode(&mut self, mode: PowerMode, save: bool) {
        log::info!("CONTROL: setting power mode to {mode}");
        self.state.mode = mode;

        // Custom only unlocks manual fans; the firmware is not told.
        if !mode.is_custom() {
            if let Err(e) = self.hardware.set_power_mode(mode) {
                log::warn!("Power mode call failed: {e}");
            }
            self.state.fans = [FanState::default(); 2];
        }

        if save {
            self.persist();
        }
    }

    /// Validate and apply a client-requested fan boost.
    pub fn set_fan_boost(&mut self, fan_id: i64, percentage: i64) -> Result<(), ControlError> {
        let fan = FanId::try_from(fan_id).map_err(|bad| {
            log::warn!(target: "security", "SECURITY: invalid fan_id {bad}");
            ControlError::InvalidFan(bad)
        })?;
        let pct = u8::try_from(percentage)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                log::warn!(target: "security", "SECURITY: invalid percentage {percentage}");
                ControlError::InvalidPercentage(percentage)
            })?;

        self.apply_fan_boost(fan, pct, true, true);
        Ok(())
    }

    /// `manual = false` leaves the fan's manual flag as it was.
    fn apply_fan_boost(&mut self, fan: FanId, pct: u8, save: bool, manual: bool) {
        log::info!("CONTROL: setting {fan} boost to {pct}%");
        if let Err(e) = self.hardware.set_fan_boost(fan, pct) {
            log::warn!("Fan boost call failed: {e}");
        }

        let slot = &mut self.state.fans[fan.index()];
        slot.boost = pct;
        if manual {
            slot.manual = pct > 0;
        }

        if save {
            self.persist();
        }
    }

    pub fn enable_g_mode(&mut self) {
        self.apply_enable_g_mode(true);
    }

    fn apply_enable_g_mode(&mut self, save: bool) {
        log::info!("CONTROL: enabling G-Mode");
        if !self.state.g_mode_active {
            self.state.pre_gmode = Some(Snapshot {
                mode: self.state.mode,
                fans: self.state.fans,
            });
        }
        self.state.g_mode_active = true;

        if let Err(e) = self.hardware.enable_g_mode() {
            log::warn!("G-Mode enable sequence failed: {e}");
        }

        if save {
            self.persist();
        }
    }

    pub fn disable_g_mode(&mut self) {
        log::info!("CONTROL: disabling G-Mode");
        self.state.g_mode_active = false;

        if let Err(e) = self.hardware.disable_g_mode() {
            log::warn!("G-Mode disable call failed: {e}");
        }

        match self.state.pre_gmode.take() {
            Some(snapshot) => self.restore(snapshot),
            None => {
                // Disabled without a matching enable: re-assert the mode, Custom included.
                if let Err(e) = self.hardware.set_power_mode(self.state.mode) {
                    log::warn!("Power mode call failed: {e}");
                }
            }
        }

        self.persist();
    }

    fn restore(&mut self, snapshot: Snapshot) {
        if let Err(e) = self.hardware.park_neutral() {
            log::warn!("Neutral mode call failed: {e}");
        }

        self.apply_power_mode(snapshot.mode, false);
        if snapshot.mode.is_custom() {
            for fan in FanId::ALL {
                let saved = snapshot.fans[fan.index()];
                if saved.manual {
                    self.apply_fan_boost(fan, saved.boost, false, true);
                } else {
                    self.state.fans[fan.index()] = saved;
                }
            }
        }
    }

    /// Single entry point for the IPC action and the hotkey.
    pub fn toggle_g_mode(&mut self) {
        if self.state.g_mode_active {
            self.disable_g_mode();
        } else {
            self.enable_g_mode();
        }
    }

    // -- persistence --------------------------------------------------------

    fn to_persisted(&self) -> PersistedConfig {
        let cpu = self.state.fan(FanId::Cpu);
        let gpu = self.state.fan(FanId::Gpu);
        PersistedConfig {
            power_mode: self.state.mode,
            g_mode: self.state.g_mode_active,
            fan_profiles: FanProfiles {
                cpu_fan_boost: cpu.boost,
                gpu_fan_boost: gpu.boost,
                cpu_manual: cpu.manual,
                gpu_manual: gpu.manual,
            },
            auto_apply: self.auto_apply,
            last_saved: None,
            version: SCHEMA_VERSION.to_string(),
        }
    }

    /// Best effort: the in-memory state stays authoritative if this fails.
    fn persist(&mut self) {
        let mut config = self.to_persisted();
        if let Err(e) = self.store.save(&mut config) {
            log::error!("Config save failed: {e}");
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
