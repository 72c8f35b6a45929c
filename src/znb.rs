//! Rohde & Schwarz ZNB20 Vector Network Analyzer Driver
//!
//! Protocol Overview:
//! - Format: SCPI over a raw TCP instrument socket (port 5025)
//! - Terminator: LF (`\n`)
//! - Traces are named calculation parameters bound to S-parameters via
//!   `CALC:PAR:SDEF "name","S21"`; at most four are kept on screen
//! - Readout: select a trace with `CALC:PAR:SEL`, then `CALC:DATA? SDATA`
//!   returns interleaved real/imaginary pairs
//!
//! Acquisition model: the sweep is armed once (`INIT1:IMM; *OPC` after
//! `*CLS`) and completion is detected by polling the event status register
//! through [`CompletionPoll`]. With the default [`PollConfig`] the poll has
//! no deadline; a missed trigger blocks until the transport gives up.

use crate::error::{InstrumentError, Result};
use crate::sweep::{CompletionPoll, PollConfig};
use crate::trace::{self, TraceFormat};
use crate::transport::{ScpiSocket, Transport, TransportExt};
use anyhow::Context;
use num_complex::Complex64;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Most traces one acquisition (and one display window) can carry.
pub const MAX_TRACES: usize = 4;

const DATA_QUERY: &str = "CALC:DATA? SDATA";

/// Configuration for the ZNB driver.
#[derive(Debug, Clone, Deserialize)]
pub struct ZnbConfig {
    /// Instrument socket address, e.g. `"192.168.1.30:5025"`.
    pub address: String,

    /// Issue `*RST` on connect.
    #[serde(default)]
    pub reset: bool,

    /// Bound on every response read.
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,

    /// Completion-poll tuning for `acquire_traces`.
    #[serde(default)]
    pub poll: PollConfig,
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(5)
}

impl ZnbConfig {
    /// Parse and validate a `[devices.<id>]`-style TOML table.
    pub fn from_toml(value: toml::Value) -> anyhow::Result<Self> {
        let config: Self = value.try_into().context("Invalid R&S ZNB config")?;
        if config.address.is_empty() {
            anyhow::bail!("R&S ZNB config requires a non-empty 'address'");
        }
        Ok(config)
    }
}

/// Scattering parameter a trace can measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SParam {
    S11,
    S21,
    S12,
    S22,
}

impl SParam {
    fn scpi(self) -> &'static str {
        match self {
            SParam::S11 => "S11",
            SParam::S21 => "S21",
            SParam::S12 => "S12",
            SParam::S22 => "S22",
        }
    }
}

impl FromStr for SParam {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "S11" => Ok(Self::S11),
            "S21" => Ok(Self::S21),
            "S12" => Ok(Self::S12),
            "S22" => Ok(Self::S22),
            _ => Err(InstrumentError::invalid(format!(
                "S-parameter must be S11, S21, S12 or S22, got '{}'",
                value
            ))),
        }
    }
}

/// Sweep trigger source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// Free-run (untriggered) measurement.
    Immediate,
    /// External trigger input.
    External,
    /// Front-panel manual trigger.
    Manual,
    /// Multiple trigger sources.
    Multiple,
}

impl TriggerSource {
    fn scpi(self) -> &'static str {
        match self {
            TriggerSource::Immediate => "IMM",
            TriggerSource::External => "EXT",
            TriggerSource::Manual => "MAN",
            TriggerSource::Multiple => "MULT",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "IMM" => Ok(Self::Immediate),
            "EXT" => Ok(Self::External),
            "MAN" => Ok(Self::Manual),
            "MULT" => Ok(Self::Multiple),
            _ => Err(InstrumentError::invalid(format!(
                "trigger source must be IMM, EXT, MAN or MULT, got '{}'",
                value
            ))),
        }
    }
}

/// What a trigger event starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerLink {
    /// An entire sweep.
    Sweep,
    /// One sweep segment.
    Segment,
    /// The next sweep point.
    Point,
    /// The next partial measurement at the current or next point.
    PartialPoint,
}

impl TriggerLink {
    fn scpi(self) -> &'static str {
        match self {
            TriggerLink::Sweep => "SWE",
            TriggerLink::Segment => "SEGM",
            TriggerLink::Point => "POIN",
            TriggerLink::PartialPoint => "PPO",
        }
    }
}

impl FromStr for TriggerLink {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SWE" => Ok(Self::Sweep),
            "SEGM" => Ok(Self::Segment),
            "POIN" => Ok(Self::Point),
            "PPO" => Ok(Self::PartialPoint),
            _ => Err(InstrumentError::invalid(format!(
                "trigger link must be SWE, SEGM, POIN or PPO, got '{}'",
                value
            ))),
        }
    }
}

/// Sweep type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepType {
    /// Linear frequency sweep.
    Linear,
    /// Logarithmic frequency sweep.
    Logarithmic,
    /// Power sweep at fixed frequency.
    Power,
    /// Continuous-wave time sweep.
    Cw,
    /// Point sweep.
    Point,
    /// Segmented frequency sweep.
    Segment,
}

impl SweepType {
    fn scpi(self) -> &'static str {
        match self {
            SweepType::Linear => "LIN",
            SweepType::Logarithmic => "LOG",
            SweepType::Power => "POW",
            SweepType::Cw => "CW",
            SweepType::Point => "POIN",
            SweepType::Segment => "SEG",
        }
    }
}

impl FromStr for SweepType {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "LIN" => Ok(Self::Linear),
            "LOG" => Ok(Self::Logarithmic),
            "POW" => Ok(Self::Power),
            "CW" => Ok(Self::Cw),
            "POIN" => Ok(Self::Point),
            "SEG" => Ok(Self::Segment),
            _ => Err(InstrumentError::invalid(format!(
                "sweep type must be LIN, LOG, POW, CW, POIN or SEG, got '{}'",
                value
            ))),
        }
    }
}

/// Point-in-time read of the sweep configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ZnbSnapshot {
    /// Frequency span, Hz.
    pub span: f64,
    /// Center frequency, Hz.
    pub center_frequency: f64,
    /// Start frequency, Hz.
    pub start_frequency: f64,
    /// Stop frequency, Hz.
    pub stop_frequency: f64,
    /// Source power, dBm.
    pub power: f64,
    /// Average count.
    pub averages: i64,
    /// Whether averaging is enabled.
    pub average_enabled: bool,
    /// Sweep points.
    pub sweep_points: i64,
    /// Sweep count.
    pub sweep_count: i64,
    /// Measurement bandwidth, Hz.
    pub measurement_bw: f64,
    /// Whether the RF output is on.
    pub output_enabled: bool,
    /// CW frequency, GHz.
    pub cw_frequency_ghz: f64,
}

/// Driver for the Rohde & Schwarz ZNB20 vector network analyzer.
///
/// Owns its [`Transport`] exclusively; one in-flight acquisition at a time.
pub struct RsZnb {
    transport: Box<dyn Transport>,
    poll: PollConfig,
}

impl RsZnb {
    /// Connect to the instrument and read the initial sweep configuration.
    pub async fn connect(config: &ZnbConfig) -> Result<Self> {
        let socket = ScpiSocket::connect(&config.address, config.io_timeout).await?;
        let driver = Self {
            transport: Box::new(socket),
            poll: config.poll,
        };

        if config.reset {
            driver.reset().await?;
        }
        let snapshot = driver.snapshot().await?;
        tracing::info!(?snapshot, "R&S ZNB connected");
        Ok(driver)
    }

    /// Build a driver over an existing transport. Used by tests.
    pub fn with_transport(transport: Box<dyn Transport>, poll: PollConfig) -> Self {
        Self { transport, poll }
    }

    /// Reset the instrument to default values.
    pub async fn reset(&self) -> Result<()> {
        log::info!("resetting ZNB to default values");
        self.transport.write("*RST").await
    }

    /// Read the full sweep configuration from the instrument.
    pub async fn snapshot(&self) -> Result<ZnbSnapshot> {
        Ok(ZnbSnapshot {
            span: self.span().await?,
            center_frequency: self.center_frequency().await?,
            start_frequency: self.start_frequency().await?,
            stop_frequency: self.stop_frequency().await?,
            power: self.power().await?,
            averages: self.averages().await?,
            average_enabled: self.average_enabled().await?,
            sweep_points: self.sweep_points().await?,
            sweep_count: self.sweep_count().await?,
            measurement_bw: self.measurement_bw().await?,
            output_enabled: self.output_enabled().await?,
            cw_frequency_ghz: self.cw_frequency_ghz().await?,
        })
    }

    // ------------------------------------------------------------------
    // Trace setup
    // ------------------------------------------------------------------

    /// Replace all defined traces with the given name/S-parameter pairs and
    /// feed them into display window 1.
    ///
    /// Takes between 1 and [`MAX_TRACES`] pairs; continuous sweep is left
    /// disabled so the next trigger runs a single sweep.
    #[instrument(skip(self), err)]
    pub async fn create_traces(&self, traces: &[(&str, SParam)]) -> Result<()> {
        check_trace_count(traces.len())?;

        self.transport.write("CALC:PAR:DEL:ALL").await?;
        for (name, sparam) in traces {
            self.transport
                .write(&format!("CALC:PAR:SDEF \"{}\",\"{}\"", name, sparam.scpi()))
                .await?;
        }
        self.transport.write("DISP:WIND1:STAT ON").await?;
        for (slot, (name, _)) in traces.iter().enumerate() {
            self.transport
                .write(&format!("DISP:WIND1:TRAC{}:FEED \"{}\"", slot + 1, name))
                .await?;
        }
        self.transport.write("SYST:DISP:UPD ON").await?;
        self.transport.write("INIT:CONT OFF").await
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Arm a single sweep: stop continuous mode, clear the status registers
    /// and trigger with an operation-complete marker.
    pub async fn measure(&self) -> Result<()> {
        self.transport.write("INIT:CONT OFF").await?;
        self.transport.write("*CLS").await?;
        self.transport.write("INIT1:IMM; *OPC").await
    }

    /// Run one sweep and read back the named traces, in input order.
    ///
    /// Takes between 1 and [`MAX_TRACES`] names. Completion is detected by
    /// polling the event status register; each trace is then selected and
    /// fully read before the next selection is issued. Each sample combines
    /// the interleaved pair as `real + i·imag`.
    #[instrument(skip(self), err)]
    pub async fn acquire_traces(&self, names: &[&str]) -> Result<Vec<Vec<Complex64>>> {
        check_trace_count(names.len())?;

        self.measure().await?;

        let mut poll = CompletionPoll::new(self.poll);
        poll.arm();
        poll.wait(self.transport.as_ref()).await?;

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            self.select_trace(name).await?;
            let payload = self.transport.query(DATA_QUERY).await?;
            results.push(trace::decode_complex(&payload)?);
        }
        Ok(results)
    }

    /// Run one sweep and read back a single trace.
    pub async fn get_trace(&self, name: &str) -> Result<Vec<Complex64>> {
        let mut traces = self.acquire_traces(&[name]).await?;
        traces.pop().ok_or_else(|| {
            InstrumentError::format("acquisition returned no trace".to_string())
        })
    }

    /// Decode the currently selected trace in the requested format, without
    /// triggering a sweep.
    pub async fn fetch_data(&self, format: TraceFormat) -> Result<(Vec<f64>, Vec<f64>)> {
        let payload = self.transport.query(DATA_QUERY).await?;
        trace::decode(&payload, format)
    }

    async fn select_trace(&self, name: &str) -> Result<()> {
        self.transport
            .write(&format!("CALC:PAR:SEL \"{}\"", name))
            .await
    }

    // ------------------------------------------------------------------
    // Frequency axis
    // ------------------------------------------------------------------

    /// Frequency span in Hz.
    pub async fn span(&self) -> Result<f64> {
        self.transport.query_f64("FREQ:SPAN?").await
    }

    /// Set the frequency span (100 kHz to 20 GHz).
    pub async fn set_span(&self, hz: f64) -> Result<()> {
        check_frequency("span", hz)?;
        self.transport.write(&format!("FREQ:SPAN {}", hz)).await
    }

    /// Center frequency in Hz.
    pub async fn center_frequency(&self) -> Result<f64> {
        self.transport.query_f64("FREQ:CENT?").await
    }

    /// Set the center frequency (100 kHz to 20 GHz).
    pub async fn set_center_frequency(&self, hz: f64) -> Result<()> {
        check_frequency("center frequency", hz)?;
        self.transport.write(&format!("FREQ:CENT {}", hz)).await
    }

    /// Start frequency in Hz.
    pub async fn start_frequency(&self) -> Result<f64> {
        self.transport.query_f64("FREQ:STAR?").await
    }

    /// Set the start frequency (100 kHz to 20 GHz).
    pub async fn set_start_frequency(&self, hz: f64) -> Result<()> {
        check_frequency("start frequency", hz)?;
        self.transport.write(&format!("FREQ:STAR {}", hz)).await
    }

    /// Stop frequency in Hz.
    pub async fn stop_frequency(&self) -> Result<f64> {
        self.transport.query_f64("FREQ:STOP?").await
    }

    /// Set the stop frequency (100 kHz to 20 GHz).
    pub async fn set_stop_frequency(&self, hz: f64) -> Result<()> {
        check_frequency("stop frequency", hz)?;
        self.transport.write(&format!("FREQ:STOP {}", hz)).await
    }

    /// CW frequency in GHz.
    pub async fn cw_frequency_ghz(&self) -> Result<f64> {
        self.transport.query_f64("SOUR:FREQ:CW?").await
    }

    /// Set the CW frequency (0.0001 to 20 GHz). The value is written with an
    /// explicit GHz suffix.
    pub async fn set_cw_frequency_ghz(&self, ghz: f64) -> Result<()> {
        if !(1e-4..=20.0).contains(&ghz) {
            return Err(InstrumentError::invalid(format!(
                "CW frequency {} GHz out of range 1e-4 to 20 GHz",
                ghz
            )));
        }
        self.transport
            .write(&format!("SOUR:FREQ:CW {}GHz", ghz))
            .await
    }

    // ------------------------------------------------------------------
    // Source power and RF output
    // ------------------------------------------------------------------

    /// Source power in dBm.
    pub async fn power(&self) -> Result<f64> {
        self.transport.query_f64("SOUR:POW?").await
    }

    /// Set the source power (at most 30 dBm).
    pub async fn set_power(&self, dbm: f64) -> Result<()> {
        if dbm > 30.0 {
            return Err(InstrumentError::invalid(format!(
                "source power {} dBm above the 30 dBm limit",
                dbm
            )));
        }
        self.transport.write(&format!("SOUR:POW {}", dbm)).await
    }

    /// Whether the RF output is on.
    pub async fn output_enabled(&self) -> Result<bool> {
        self.transport.query_on_off("OUTP?").await
    }

    /// Switch the RF output on or off.
    pub async fn set_output_enabled(&self, enabled: bool) -> Result<()> {
        self.transport
            .write(if enabled { "OUTP ON" } else { "OUTP OFF" })
            .await
    }

    // ------------------------------------------------------------------
    // Averaging
    // ------------------------------------------------------------------

    /// Average count.
    pub async fn averages(&self) -> Result<i64> {
        self.transport.query_i64("AVER:COUN?").await
    }

    /// Set the average count (1 to 100000).
    pub async fn set_averages(&self, averages: i64) -> Result<()> {
        if !(1..=100_000).contains(&averages) {
            return Err(InstrumentError::invalid(format!(
                "average count {} out of range 1 to 100000",
                averages
            )));
        }
        self.transport
            .write(&format!("AVER:COUN {}", averages))
            .await
    }

    /// Whether averaging is enabled.
    pub async fn average_enabled(&self) -> Result<bool> {
        self.transport.query_on_off("AVER?").await
    }

    /// Enable or disable averaging.
    pub async fn set_average_enabled(&self, enabled: bool) -> Result<()> {
        self.transport
            .write(if enabled { "AVER ON" } else { "AVER OFF" })
            .await
    }

    /// Start a new averaging cycle.
    pub async fn clear_average(&self) -> Result<()> {
        self.transport.write("AVER:CLE").await
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    /// Sweep points.
    pub async fn sweep_points(&self) -> Result<i64> {
        self.transport.query_i64("SWE:POIN?").await
    }

    /// Set the sweep points (1 to 100000).
    pub async fn set_sweep_points(&self, points: i64) -> Result<()> {
        if !(1..=100_000).contains(&points) {
            return Err(InstrumentError::invalid(format!(
                "sweep points {} out of range 1 to 100000",
                points
            )));
        }
        self.transport.write(&format!("SWE:POIN {}", points)).await
    }

    /// Sweep count.
    pub async fn sweep_count(&self) -> Result<i64> {
        self.transport.query_i64("SWE:COUN?").await
    }

    /// Set the sweep count (1 to 1000). Continuous sweep is disabled first
    /// so the count applies to single-sweep operation.
    pub async fn set_sweep_count(&self, sweeps: i64) -> Result<()> {
        if !(1..=1000).contains(&sweeps) {
            return Err(InstrumentError::invalid(format!(
                "sweep count {} out of range 1 to 1000",
                sweeps
            )));
        }
        self.transport.write("INIT:CONT OFF").await?;
        self.transport.write(&format!("SWE:COUN {}", sweeps)).await
    }

    /// Measurement bandwidth in Hz.
    pub async fn measurement_bw(&self) -> Result<f64> {
        self.transport.query_f64("SENS:BAND?").await
    }

    /// Set the measurement bandwidth (0.1 Hz to 500 kHz).
    pub async fn set_measurement_bw(&self, hz: f64) -> Result<()> {
        if !(0.1..=500e3).contains(&hz) {
            return Err(InstrumentError::invalid(format!(
                "measurement bandwidth {} Hz out of range 0.1 Hz to 500 kHz",
                hz
            )));
        }
        self.transport.write(&format!("SENS:BAND {}", hz)).await
    }

    /// Set the sweep trigger source.
    pub async fn set_trigger_source(&self, source: TriggerSource) -> Result<()> {
        self.transport
            .write(&format!("TRIG:SOUR '{}'", source.scpi()))
            .await
    }

    /// Set what a trigger event starts.
    pub async fn set_trigger_link(&self, link: TriggerLink) -> Result<()> {
        self.transport
            .write(&format!("TRIG:LINK '{}'", link.scpi()))
            .await
    }

    /// Set the sweep type.
    pub async fn set_sweep_type(&self, sweep_type: SweepType) -> Result<()> {
        self.transport
            .write(&format!("SWE:TYPE '{}'", sweep_type.scpi()))
            .await
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

fn check_frequency(name: &str, hz: f64) -> Result<()> {
    if !(100e3..=20e9).contains(&hz) {
        return Err(InstrumentError::invalid(format!(
            "{} {} Hz out of range 100e3 to 20e9 Hz",
            name, hz
        )));
    }
    Ok(())
}

fn check_trace_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_TRACES {
        return Err(InstrumentError::invalid(format!(
            "between 1 and {} traces per acquisition, got {}",
            MAX_TRACES, count
        )));
    }
    Ok(())
}
