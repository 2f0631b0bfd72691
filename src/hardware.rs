// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Hardware interface: sensor reads and thermal-control calls.
//!
//! Reads prefer hwmon, fall back to the WMAX sensor query, and finally to a
//! fixed plausible value so a status request never fails because a sensor is
//! missing. Writes always go through [`Hardware::call_acpi`], the single place
//! where hex literals are validated.

use crate::acpi::{self, AcpiError, AcpiTransport, WmaxFunction};
use crate::hwmon::{self, DellHwmon};
use crate::mode::{FanId, PowerMode};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Kernel module providing `/proc/acpi/call`.
pub const ACPI_CALL_MODULE: &str = "acpi_call";

/// Mode byte that puts the firmware into its G-Mode fan curve.
pub const GMODE_MODE_BYTE: u8 = 0xab;

/// Mode the firmware is parked in before a pre-G-Mode state is replayed.
pub const NEUTRAL_MODE: PowerMode = PowerMode::Balanced;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("daemon must run as root")]
    NotRoot,

    #[error("ACPI call interface not found at {0}")]
    AcpiMissing(PathBuf),

    #[error("failed to load kernel module acpi_call: {0}")]
    ModuleLoad(String),

    #[error("cannot write to ACPI interface: {0}")]
    WriteProbe(io::Error),

    #[error("invalid fan boost percentage {0}")]
    InvalidPercentage(u8),

    #[error(transparent)]
    Acpi(#[from] AcpiError),
}

/// Temperature sources known to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempSensor {
    Cpu,
    Gpu,
}

impl TempSensor {
    fn hwmon_index(self) -> u32 {
        match self {
            TempSensor::Cpu => 1,
            TempSensor::Gpu => 2,
        }
    }

    fn acpi_sensor(self) -> u8 {
        match self {
            TempSensor::Cpu => 0x01,
            TempSensor::Gpu => 0x02,
        }
    }

    /// Value reported when neither hwmon nor ACPI answer.
    pub fn default_temp(self) -> u32 {
        match self {
            TempSensor::Cpu => 45,
            TempSensor::Gpu => 50,
        }
    }
}

/// Settle delays between stateful firmware calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Between the G-Mode flag and the override mode byte.
    pub gmode_enable: Duration,
    /// After clearing the G-Mode flag, and after parking in the neutral mode.
    pub gmode_disable: Duration,
}

impl Timing {
    /// Delays the embedded controller needs on real hardware.
    pub const FIRMWARE: Timing = Timing {
        gmode_enable: Duration::from_millis(50),
        gmode_disable: Duration::from_millis(100),
    };

    pub const NONE: Timing = Timing {
        gmode_enable: Duration::ZERO,
        gmode_disable: Duration::ZERO,
    };
}

impl Default for Timing {
    fn default() -> Self {
        Timing::FIRMWARE
    }
}

// ---------------------------------------------------------------------------
// Startup preconditions
// ---------------------------------------------------------------------------

/// Paths checked before the daemon is allowed to touch hardware.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub acpi_call_path: PathBuf,
    pub modules_path: PathBuf,
    /// Program used to load [`ACPI_CALL_MODULE`].
    pub modprobe: PathBuf,
    pub require_root: bool,
}

impl Default for Preflight {
    fn default() -> Self {
        Self {
            acpi_call_path: PathBuf::from(acpi::ACPI_CALL_PATH),
            modules_path: PathBuf::from("/proc/modules"),
            modprobe: PathBuf::from("modprobe"),
            require_root: true,
        }
    }
}

impl Preflight {
    /// Run every mandatory check. Any error here is fatal for the daemon.
    pub fn run(&self) -> Result<(), HardwareError> {
        if self.require_root && !nix::unistd::geteuid().is_root() {
            log::error!(target: "security", "SECURITY: daemon must run as root");
            return Err(HardwareError::NotRoot);
        }

        for critical in ["/proc/acpi", hwmon::HWMON_ROOT] {
            if !Path::new(critical).exists() {
                log::warn!(target: "security", "SECURITY: critical path missing: {critical}");
            }
        }

        // The module creates the call file, so load it before looking for one.
        if !module_loaded(&self.modules_path, ACPI_CALL_MODULE) {
            log::info!("Loading {ACPI_CALL_MODULE} module");
            let status = Command::new(&self.modprobe)
                .arg(ACPI_CALL_MODULE)
                .status()
                .map_err(|e| HardwareError::ModuleLoad(e.to_string()))?;
            if !status.success() {
                return Err(HardwareError::ModuleLoad(format!("modprobe exited with {status}")));
            }
        }

        if !self.acpi_call_path.exists() {
            return Err(HardwareError::AcpiMissing(self.acpi_call_path.clone()));
        }

        OpenOptions::new()
            .write(true)
            .open(&self.acpi_call_path)
            .map_err(HardwareError::WriteProbe)?;

        log::info!("ACPI interface at {} is accessible", self.acpi_call_path.display());
        Ok(())
    }
}

/// Check `/proc/modules` (or a file laid out like it) for `module`.
pub fn module_loaded(modules_path: &Path, module: &str) -> bool {
    fs::read_to_string(modules_path)
        .map(|s| {
            s.lines()
                .any(|line| line.split_whitespace().next() == Some(module))
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// The ACPI channel plus whatever hwmon device was found at startup.
pub struct Hardware {
    transport: Box<dyn AcpiTransport>,
    hwmon: Option<DellHwmon>,
    timing: Timing,
}

impl Hardware {
    pub fn new(transport: Box<dyn AcpiTransport>, hwmon: Option<DellHwmon>, timing: Timing) -> Self {
        if hwmon.is_none() {
            log::warn!("No Dell hwmon sensors found, using ACPI only");
        }
        Self {
            transport,
            hwmon,
            timing,
        }
    }

    pub fn hwmon_available(&self) -> bool {
        self.hwmon.is_some()
    }

    /// Validate, encode and issue a raw WMAX call, returning the normalized result.
    pub fn call_acpi(&mut self, code: &str, args: &[&str]) -> Result<String, AcpiError> {
        let command = acpi::encode_command(code, args).inspect_err(|e| {
            log::warn!(target: "security", "SECURITY: rejected ACPI call {code} {args:?}: {e}");
        })?;

        let raw = self.transport.execute(&command).inspect_err(|e| {
            log::error!("ACPI call error for {command}: {e}");
        })?;
        let result = acpi::normalize_result(&raw);
        log::debug!("ACPI call: {command} -> {result}");
        Ok(result)
    }

    fn call(&mut self, function: WmaxFunction, args: &[u8]) -> Result<String, AcpiError> {
        let code = acpi::hex_byte(function.code());
        let args: Vec<String> = args.iter().map(|&a| acpi::hex_byte(a)).collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.call_acpi(&code, &args)
    }

    fn query(&mut self, function: WmaxFunction, args: &[u8]) -> Result<u32, AcpiError> {
        let result = self.call(function, args)?;
        acpi::parse_result(&result)
    }

    // -- sensors ------------------------------------------------------------

    /// Temperature in degrees C; never fails.
    pub fn read_temp(&mut self, sensor: TempSensor) -> u32 {
        if let Some(t) = self
            .hwmon
            .as_ref()
            .and_then(|h| h.read_temp_c(sensor.hwmon_index()))
        {
            return t;
        }

        match self.query(WmaxFunction::SensorQuery, &[0x04, sensor.acpi_sensor()]) {
            Ok(t) if t <= hwmon::MAX_TEMP_C => t,
            Ok(t) => {
                log::debug!("ACPI {sensor:?} temperature {t} out of range");
                sensor.default_temp()
            }
            Err(_) => sensor.default_temp(),
        }
    }

    /// Fan speed in RPM; never fails.
    pub fn read_fan_rpm(&mut self, fan: FanId) -> u32 {
        if let Some(rpm) = self
            .hwmon
            .as_ref()
            .and_then(|h| h.read_fan_rpm(u32::from(fan.number())))
        {
            return rpm;
        }

        match self.query(WmaxFunction::SensorQuery, &[0x05, fan.sensor_id()]) {
            Ok(rpm) if rpm <= hwmon::MAX_FAN_RPM => rpm,
            _ => fan.default_rpm(),
        }
    }

    // -- control ------------------------------------------------------------

    /// Write a mode byte to the firmware. Callers decide whether Custom is sent.
    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), HardwareError> {
        self.call(WmaxFunction::ThermalControl, &[0x01, mode.code()])?;
        Ok(())
    }

    pub fn set_fan_boost(&mut self, fan: FanId, pct: u8) -> Result<(), HardwareError> {
        if pct > 100 {
            log::warn!(target: "security", "SECURITY: invalid fan boost percentage {pct}");
            return Err(HardwareError::InvalidPercentage(pct));
        }
        self.call(WmaxFunction::ThermalControl, &[0x02, fan.sensor_id(), pct])?;
        Ok(())
    }

    /// Raise the G-Mode flag, then force the G-Mode fan curve.
    pub fn enable_g_mode(&mut self) -> Result<(), HardwareError> {
        self.call(WmaxFunction::GMode, &[0x01, 0x01])?;
        thread::sleep(self.timing.gmode_enable);
        self.call(WmaxFunction::ThermalControl, &[0x01, GMODE_MODE_BYTE])?;
        Ok(())
    }

    /// Clear the G-Mode flag. The caller must restore a mode afterwards.
    pub fn disable_g_mode(&mut self) -> Result<(), HardwareError> {
        self.call(WmaxFunction::GMode, &[0x01, 0x00])?;
        thread::sleep(self.timing.gmode_disable);
        Ok(())
    }

    /// Park the firmware in [`NEUTRAL_MODE`] and wait for it to settle.
    pub fn park_neutral(&mut self) -> Result<(), HardwareError> {
        self.set_power_mode(NEUTRAL_MODE)?;
        thread::sleep(self.timing.gmode_disable);
        Ok(())
    }

    /// Ask the firmware whether its G-Mode flag is set.
    pub fn g_mode_status(&mut self) -> Result<bool, HardwareError> {
        let result = self.call(WmaxFunction::GMode, &[0x02])?;
        Ok(acpi::parse_result(&result)? == 1)
    }

    /// Best-effort board detection; "Unknown" on any failure.
    pub fn detect_model(&mut self) -> String {
        let model = match self.query(WmaxFunction::ModelQuery, &[0x02, 0x02]) {
            Ok(1) => "5511",
            Ok(2) => "5515",
            Ok(3) => "5520",
            Ok(4) => "5525",
            Ok(5) => "5530",
            Ok(6) => "5535",
            Ok(_) => "Unknown",
            Err(e) => {
                log::warn!("Model detection failed: {e}");
                "Unknown"
            }
        };
        log::info!("Detected Dell G15 model: {model}");
        model.to_string()
    }
}
