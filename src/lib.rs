//! RF analyzer drivers.
//!
//! This crate provides SCPI drivers for two bench instruments:
//! - Agilent MXA N9020A Spectrum Analyzer ([`mxa::AgilentMxa`])
//! - Rohde & Schwarz ZNB20 Vector Network Analyzer ([`znb::RsZnb`])
//!
//! Both drivers own a [`transport::Transport`] handle exclusively and expose
//! validated parameter get/set pairs plus one acquisition entry point each:
//! the MXA waits out a computed sweep duration before fetching, the ZNB polls
//! the event status register for sweep completion.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_rf::{MxaConfig, AgilentMxa};
//!
//! let config = MxaConfig::from_toml(toml::toml! {
//!     address = "192.168.1.20:5025"
//! }.into())?;
//!
//! let mxa = AgilentMxa::connect(&config).await?;
//! mxa.set_center_frequency(5.0e9).await?;
//! mxa.set_span(1.0e6).await?;
//! let rows = mxa.acquire(1, false).await?;
//! ```
//!
//! Concurrency model: one in-flight acquisition per instrument. The drivers
//! serialize individual wire operations internally but provide no cross-call
//! locking; callers running acquisitions from several tasks must hold their
//! own exclusive lock per instrument.

pub mod error;
pub mod mxa;
pub mod retry;
pub mod sweep;
pub mod trace;
pub mod transport;
pub mod znb;

pub use error::{InstrumentError, Result};
pub use mxa::{AgilentMxa, AttenuationMode, AverageType, MxaConfig, MxaSnapshot, PowerUnit};
pub use retry::RetryPolicy;
pub use sweep::{CompletionPoll, PollConfig, PollState};
pub use trace::TraceFormat;
pub use transport::{ScpiSocket, Transport};
pub use znb::{RsZnb, SParam, SweepType, TriggerLink, TriggerSource, ZnbConfig, ZnbSnapshot};
