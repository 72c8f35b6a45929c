//! Agilent MXA N9020A Spectrum Analyzer Driver
//!
//! Protocol Overview:
//! - Format: SCPI over a raw TCP instrument socket (port 5025 on the MXA)
//! - Terminator: LF (`\n`)
//! - Setters: `:SENS:...` command tree; queries append `?`
//! - Trace readout: `:FETC:SAN<n>?` returns comma-separated
//!   frequency/amplitude pairs for trace `n`
//!
//! Acquisition model: single sweeps only. `acquire` disables continuous
//! sweep, triggers once, and waits a computed
//! `1.05 * sweep_time * averages + 0.5` seconds before fetching; the MXA
//! offers no completion handshake on this path, so the margin absorbs
//! instrument-side processing latency. The fetch itself runs under a
//! [`RetryPolicy`]; the default replays the firmware quirk of fetching
//! twice and trusting only the second reply.

use crate::error::{InstrumentError, Result};
use crate::retry::RetryPolicy;
use crate::trace;
use crate::transport::{ScpiSocket, Transport, TransportExt};
use anyhow::Context;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Highest trace index the `:FETC:SAN<n>?` tree accepts.
const MAX_TRACE: u8 = 6;

/// Configuration for the MXA driver.
#[derive(Debug, Clone, Deserialize)]
pub struct MxaConfig {
    /// Instrument socket address, e.g. `"192.168.1.20:5025"`.
    pub address: String,

    /// Reset to spectrum-analyzer defaults on connect.
    #[serde(default)]
    pub reset: bool,

    /// Bound on every response read.
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,

    /// Optional ceiling on a whole acquisition, computed wait included.
    /// `None` (the default) lets an underestimated sweep time block for the
    /// full computed wait and both fetches, as the instrument free-runs.
    #[serde(with = "humantime_serde", default)]
    pub max_acquire: Option<Duration>,
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(5)
}

impl MxaConfig {
    /// Parse and validate a `[devices.<id>]`-style TOML table.
    pub fn from_toml(value: toml::Value) -> anyhow::Result<Self> {
        let config: Self = value.try_into().context("Invalid Agilent MXA config")?;
        if config.address.is_empty() {
            anyhow::bail!("Agilent MXA config requires a non-empty 'address'");
        }
        Ok(config)
    }
}

/// Input attenuation coupling mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttenuationMode {
    /// Attenuation tracks the reference level.
    Auto,
    /// Attenuation fixed at the programmed value.
    Manual,
}

impl FromStr for AttenuationMode {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "MAN" | "MANUAL" => Ok(Self::Manual),
            _ => Err(InstrumentError::invalid(format!(
                "attenuation mode must be AUTO or MAN, got '{}'",
                value
            ))),
        }
    }
}

/// Trace averaging mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AverageType {
    /// Power (RMS) averaging.
    Rms,
    /// Log-power (video) averaging.
    Log,
    /// Voltage (scalar) averaging.
    Scalar,
}

impl AverageType {
    fn scpi(self) -> &'static str {
        match self {
            AverageType::Rms => "RMS",
            AverageType::Log => "LOG",
            AverageType::Scalar => "SCALAR",
        }
    }
}

impl FromStr for AverageType {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "RMS" => Ok(Self::Rms),
            "LOG" => Ok(Self::Log),
            "SCAL" | "SCALAR" => Ok(Self::Scalar),
            _ => Err(InstrumentError::invalid(format!(
                "average type must be RMS, LOG or SCALAR, got '{}'",
                value
            ))),
        }
    }
}

/// Amplitude readout unit.
///
/// The closed set the `:UNIT:POW` node accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PowerUnit {
    Dbm,
    Dbmv,
    Dbma,
    Volts,
    Watts,
    Amps,
    Dbuv,
    Dbua,
    Dbuvm,
    Dbuam,
    Dbpt,
    Dbg,
}

impl PowerUnit {
    fn scpi(self) -> &'static str {
        match self {
            PowerUnit::Dbm => "DBM",
            PowerUnit::Dbmv => "DBMV",
            PowerUnit::Dbma => "DBMA",
            PowerUnit::Volts => "V",
            PowerUnit::Watts => "W",
            PowerUnit::Amps => "A",
            PowerUnit::Dbuv => "DBUV",
            PowerUnit::Dbua => "DBUA",
            PowerUnit::Dbuvm => "DBUVM",
            PowerUnit::Dbuam => "DBUAM",
            PowerUnit::Dbpt => "DBPT",
            PowerUnit::Dbg => "DBG",
        }
    }
}

impl FromStr for PowerUnit {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "DBM" => Ok(Self::Dbm),
            "DBMV" => Ok(Self::Dbmv),
            "DBMA" => Ok(Self::Dbma),
            "V" => Ok(Self::Volts),
            "W" => Ok(Self::Watts),
            "A" => Ok(Self::Amps),
            "DBUV" => Ok(Self::Dbuv),
            "DBUA" => Ok(Self::Dbua),
            "DBUVM" => Ok(Self::Dbuvm),
            "DBUAM" => Ok(Self::Dbuam),
            "DBPT" => Ok(Self::Dbpt),
            "DBG" => Ok(Self::Dbg),
            _ => Err(InstrumentError::invalid(format!(
                "power unit must be one of DBM|DBMV|DBMA|V|W|A|DBUV|DBUA|DBUVM|DBUAM|DBPT|DBG, got '{}'",
                value
            ))),
        }
    }
}

/// Point-in-time read of the sweep configuration.
///
/// The instrument stays the source of truth; this is what it reported when
/// [`AgilentMxa::snapshot`] ran, nothing fresher.
#[derive(Clone, Debug, PartialEq)]
pub struct MxaSnapshot {
    /// Resolution bandwidth, Hz.
    pub resolution_bw: f64,
    /// Video bandwidth, Hz.
    pub video_bw: f64,
    /// Input attenuation, dB.
    pub input_attenuation: i64,
    /// Attenuation coupling mode.
    pub attenuation_mode: AttenuationMode,
    /// Center frequency, Hz.
    pub center_frequency: f64,
    /// Average count.
    pub averages: i64,
    /// Sweep points per trace.
    pub sweep_points: i64,
    /// Frequency span, Hz.
    pub span: f64,
    /// Trace averaging mode.
    pub average_type: AverageType,
}

/// Wait before fetching a single sweep: averaging multiplies the effective
/// acquisition time, the 5% margin and fixed half second absorb
/// instrument-side processing latency.
pub(crate) fn computed_wait(sweep_time_s: f64, averages: i64) -> Duration {
    Duration::from_secs_f64(1.05 * sweep_time_s * averages as f64 + 0.5)
}

/// Driver for the Agilent MXA N9020A spectrum analyzer.
///
/// Owns its [`Transport`] exclusively; one in-flight acquisition at a time.
pub struct AgilentMxa {
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
    max_acquire: Option<Duration>,
}

impl AgilentMxa {
    /// Connect to the instrument and read the initial sweep configuration.
    ///
    /// With `config.reset` set, the analyzer is first put back into SA mode
    /// with default values.
    pub async fn connect(config: &MxaConfig) -> Result<Self> {
        let socket = ScpiSocket::connect(&config.address, config.io_timeout).await?;
        let driver = Self {
            transport: Box::new(socket),
            retry: RetryPolicy::default(),
            max_acquire: config.max_acquire,
        };

        if config.reset {
            driver.reset().await?;
        }
        let snapshot = driver.snapshot().await?;
        tracing::info!(?snapshot, "Agilent MXA connected");
        Ok(driver)
    }

    /// Build a driver over an existing transport. Used by tests.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            max_acquire: None,
        }
    }

    /// Replace the fetch retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound a whole acquisition (computed wait included).
    pub fn with_max_acquire(mut self, max_acquire: Option<Duration>) -> Self {
        self.max_acquire = max_acquire;
        self
    }

    /// Put the instrument into SA mode with default values.
    pub async fn reset(&self) -> Result<()> {
        log::info!("resetting MXA to spectrum-analyzer defaults");
        self.transport.write("CONF:SAN").await
    }

    /// Read the full sweep configuration from the instrument.
    pub async fn snapshot(&self) -> Result<MxaSnapshot> {
        Ok(MxaSnapshot {
            resolution_bw: self.resolution_bw().await?,
            video_bw: self.video_bw().await?,
            input_attenuation: self.input_attenuation().await?,
            attenuation_mode: self.attenuation_mode().await?,
            center_frequency: self.center_frequency().await?,
            averages: self.averages().await?,
            sweep_points: self.sweep_points().await?,
            span: self.span().await?,
            average_type: self.average_type().await?,
        })
    }

    // ------------------------------------------------------------------
    // Bandwidths
    // ------------------------------------------------------------------

    /// Resolution bandwidth in Hz.
    pub async fn resolution_bw(&self) -> Result<f64> {
        self.transport.query_f64(":SENS:BAND:RES?").await
    }

    /// Set the resolution bandwidth (1 Hz to 300 MHz).
    pub async fn set_resolution_bw(&self, hz: f64) -> Result<()> {
        if !(1.0..=3e8).contains(&hz) {
            return Err(InstrumentError::invalid(format!(
                "resolution bandwidth {} Hz out of range 1 Hz to 3e8 Hz",
                hz
            )));
        }
        self.transport.write(&format!(":SENS:BAND:RES {}", hz)).await
    }

    /// Decouple resolution bandwidth from span.
    pub async fn resolution_bw_auto_off(&self) -> Result<()> {
        self.transport.write(":SENS:BAND:RES:AUTO 0").await
    }

    /// Video bandwidth in Hz.
    pub async fn video_bw(&self) -> Result<f64> {
        self.transport.query_f64(":SENS:BAND:VID?").await
    }

    /// Set the video bandwidth (0.01 Hz to 300 MHz).
    pub async fn set_video_bw(&self, hz: f64) -> Result<()> {
        if !(0.01..=3e8).contains(&hz) {
            return Err(InstrumentError::invalid(format!(
                "video bandwidth {} Hz out of range 0.01 Hz to 3e8 Hz",
                hz
            )));
        }
        self.transport.write(&format!(":SENS:BAND:VID {}", hz)).await
    }

    /// Decouple video bandwidth from span.
    pub async fn video_bw_auto_off(&self) -> Result<()> {
        self.transport.write(":SENS:BAND:VID:AUTO 0").await
    }

    // ------------------------------------------------------------------
    // Input attenuation
    // ------------------------------------------------------------------

    /// Input attenuation in dB.
    pub async fn input_attenuation(&self) -> Result<i64> {
        // Firmware reports attenuation as a float even though it programs in
        // whole dB.
        Ok(self.transport.query_f64(":SENS:POW:RF:ATT?").await? as i64)
    }

    /// Set the input attenuation (0 to 50 dB).
    pub async fn set_input_attenuation(&self, db: i64) -> Result<()> {
        if !(0..=50).contains(&db) {
            return Err(InstrumentError::invalid(format!(
                "input attenuation {} dB out of range 0 to 50 dB",
                db
            )));
        }
        self.transport
            .write(&format!(":SENS:POW:RF:ATT {}", db))
            .await
    }

    /// Attenuation coupling mode.
    pub async fn attenuation_mode(&self) -> Result<AttenuationMode> {
        let auto = self.transport.query_on_off(":SENS:POW:RF:ATT:AUTO?").await?;
        Ok(if auto {
            AttenuationMode::Auto
        } else {
            AttenuationMode::Manual
        })
    }

    /// Set the attenuation coupling mode.
    pub async fn set_attenuation_mode(&self, mode: AttenuationMode) -> Result<()> {
        let state = match mode {
            AttenuationMode::Auto => "ON",
            AttenuationMode::Manual => "OFF",
        };
        self.transport
            .write(&format!(":SENS:POW:RF:ATT:AUTO {}", state))
            .await
    }

    // ------------------------------------------------------------------
    // Frequency axis
    // ------------------------------------------------------------------

    /// Center frequency in Hz.
    pub async fn center_frequency(&self) -> Result<f64> {
        self.transport.query_f64(":SENS:FREQ:CENT?").await
    }

    /// Set the center frequency (20 Hz to 30 GHz).
    pub async fn set_center_frequency(&self, hz: f64) -> Result<()> {
        if !(20.0..=3e10).contains(&hz) {
            return Err(InstrumentError::invalid(format!(
                "center frequency {} Hz out of range 20 Hz to 3e10 Hz",
                hz
            )));
        }
        self.transport
            .write(&format!(":SENS:FREQ:CENT {}", hz))
            .await
    }

    /// Frequency span in Hz.
    pub async fn span(&self) -> Result<f64> {
        self.transport.query_f64(":SENS:FREQ:SPAN?").await
    }

    /// Set the frequency span (10 Hz to 26 GHz).
    pub async fn set_span(&self, hz: f64) -> Result<()> {
        if !(10.0..=2.6e10).contains(&hz) {
            return Err(InstrumentError::invalid(format!(
                "span {} Hz out of range 10 Hz to 2.6e10 Hz",
                hz
            )));
        }
        self.transport
            .write(&format!(":SENS:FREQ:SPAN {}", hz))
            .await
    }

    /// Sweep points per trace.
    pub async fn sweep_points(&self) -> Result<i64> {
        self.transport.query_i64(":SENS:SWE:POIN?").await
    }

    /// Set the sweep points per trace (1 to 20001).
    pub async fn set_sweep_points(&self, points: i64) -> Result<()> {
        if !(1..=20001).contains(&points) {
            return Err(InstrumentError::invalid(format!(
                "sweep points {} out of range 1 to 20001",
                points
            )));
        }
        self.transport
            .write(&format!(":SENS:SWE:POIN {}", points))
            .await
    }

    // ------------------------------------------------------------------
    // Averaging
    // ------------------------------------------------------------------

    /// Average count.
    pub async fn averages(&self) -> Result<i64> {
        self.transport.query_i64(":SENS:AVER:COUN?").await
    }

    /// Set the average count (1 to 10000).
    pub async fn set_averages(&self, averages: i64) -> Result<()> {
        if !(1..=10000).contains(&averages) {
            return Err(InstrumentError::invalid(format!(
                "average count {} out of range 1 to 10000",
                averages
            )));
        }
        self.transport
            .write(&format!(":SENS:AVER:COUN {}", averages))
            .await
    }

    /// Trace averaging mode.
    pub async fn average_type(&self) -> Result<AverageType> {
        let response = self.transport.query(":SENS:AVER:TYPE?").await?;
        response.trim().parse()
    }

    /// Set the trace averaging mode.
    pub async fn set_average_type(&self, average_type: AverageType) -> Result<()> {
        self.transport
            .write(&format!(":SENS:AVER:TYPE {}", average_type.scpi()))
            .await
    }

    /// Turn on averaging for the given trace.
    pub async fn average_on(&self, trace: u8) -> Result<()> {
        check_trace(trace)?;
        self.transport
            .write(&format!("TRAC{}:TYPE AVER", trace))
            .await
    }

    /// Restart the running average.
    pub async fn clear_average(&self) -> Result<()> {
        self.transport.write(":SENS:AVER:CLE").await
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    /// Amplitude readout unit.
    pub async fn power_unit(&self) -> Result<PowerUnit> {
        let response = self.transport.query(":UNIT:POW?").await?;
        response.trim().parse()
    }

    /// Set the amplitude readout unit.
    pub async fn set_power_unit(&self, unit: PowerUnit) -> Result<()> {
        self.transport
            .write(&format!(":UNIT:POW {}", unit.scpi()))
            .await
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Run one single sweep and read back trace `trace` as N×2 rows.
    ///
    /// Continuous sweep is disabled for the measurement; pass
    /// `keep_continuous` to re-enable it afterwards.
    ///
    /// There is no completion handshake on this path: if the computed wait
    /// underestimates the true sweep time the fetch can return stale data.
    /// Configure [`MxaConfig::max_acquire`] to at least bound the wall-clock
    /// cost of a wedged acquisition.
    #[instrument(skip(self), err)]
    pub async fn acquire(&self, trace: u8, keep_continuous: bool) -> Result<Vec<[f64; 2]>> {
        check_trace(trace)?;
        let run = self.acquire_inner(trace, keep_continuous);
        match self.max_acquire {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| InstrumentError::Timeout { waited: limit })?,
            None => run.await,
        }
    }

    async fn acquire_inner(&self, trace: u8, keep_continuous: bool) -> Result<Vec<[f64; 2]>> {
        let sweep_time = self.transport.query_f64(":SENS:SWE:TIME?").await?;
        let averages = self.averages().await?;

        self.transport.write(":INIT:CONT OFF").await?;
        self.transport.write(":INIT:IMM").await?;

        let wait = computed_wait(sweep_time, averages);
        tracing::debug!(
            sweep_time_s = sweep_time,
            averages,
            wait_s = wait.as_secs_f64(),
            "waiting for single sweep"
        );
        tokio::time::sleep(wait).await;

        let fetch = format!(":FETC:SAN{}?", trace);
        let payload = self.retry.run(|| self.transport.query(&fetch)).await?;

        if keep_continuous {
            self.transport.write(":INIT:CONT ON").await?;
        }

        Ok(trace::into_rows(trace::parse_payload(&payload)?))
    }

    // ------------------------------------------------------------------
    // Raw access
    // ------------------------------------------------------------------

    /// Send an arbitrary command.
    pub async fn write_raw(&self, command: &str) -> Result<()> {
        self.transport.write(command).await
    }

    /// Send an arbitrary query and return the reply.
    pub async fn query_raw(&self, command: &str) -> Result<String> {
        self.transport.query(command).await
    }
}

fn check_trace(trace: u8) -> Result<()> {
    if !(1..=MAX_TRACE).contains(&trace) {
        return Err(InstrumentError::invalid(format!(
            "trace index {} out of range 1 to {}",
            trace, MAX_TRACE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_wait_applies_margin_and_offset() {
        assert_eq!(computed_wait(2.0, 10), Duration::from_secs_f64(21.5));
        assert_eq!(computed_wait(0.1, 1), Duration::from_secs_f64(0.605));
    }

    #[test]
    fn config_parses_with_defaults() {
        let config = MxaConfig::from_toml(toml::Value::Table(toml::toml! {
            address = "192.168.1.20:5025"
        }))
        .unwrap();
        assert_eq!(config.address, "192.168.1.20:5025");
        assert!(!config.reset);
        assert_eq!(config.io_timeout, Duration::from_secs(5));
        assert_eq!(config.max_acquire, None);

        let config = MxaConfig::from_toml(toml::Value::Table(toml::toml! {
            address = "mxa.lab:5025"
            reset = true
            io_timeout = "250ms"
            max_acquire = "2m"
        }))
        .unwrap();
        assert!(config.reset);
        assert_eq!(config.io_timeout, Duration::from_millis(250));
        assert_eq!(config.max_acquire, Some(Duration::from_secs(120)));
    }

    #[test]
    fn config_rejects_missing_address() {
        assert!(MxaConfig::from_toml(toml::Value::Table(toml::toml! { reset = true })).is_err());
        assert!(MxaConfig::from_toml(toml::Value::Table(toml::toml! { address = "" })).is_err());
    }

    #[test]
    fn attenuation_mode_parses_firmware_spellings() {
        assert_eq!("AUTO".parse::<AttenuationMode>().unwrap(), AttenuationMode::Auto);
        assert_eq!("man".parse::<AttenuationMode>().unwrap(), AttenuationMode::Manual);
        assert!("fixed".parse::<AttenuationMode>().is_err());
    }

    #[test]
    fn average_type_parses_firmware_spellings() {
        assert_eq!("RMS".parse::<AverageType>().unwrap(), AverageType::Rms);
        assert_eq!("scal".parse::<AverageType>().unwrap(), AverageType::Scalar);
        assert!("median".parse::<AverageType>().is_err());
    }

    #[test]
    fn power_unit_covers_the_closed_set() {
        for label in [
            "DBM", "DBMV", "DBMA", "V", "W", "A", "DBUV", "DBUA", "DBUVM", "DBUAM", "DBPT", "DBG",
        ] {
            let unit = label.parse::<PowerUnit>().unwrap();
            assert_eq!(unit.scpi(), label);
        }
        let err = "DBX".parse::<PowerUnit>().unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidArgument(_)));
    }

    #[test]
    fn trace_index_is_bounded() {
        assert!(check_trace(1).is_ok());
        assert!(check_trace(6).is_ok());
        assert!(check_trace(0).is_err());
        assert!(check_trace(7).is_err());
    }
}
