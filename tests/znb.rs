//! Integration tests for the R&S ZNB driver against a scripted in-process
//! instrument.

use async_trait::async_trait;
use daq_driver_rf::error::{InstrumentError, Result};
use daq_driver_rf::{PollConfig, RsZnb, SParam, TraceFormat, Transport};
use num_complex::Complex64;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

const DATA_QUERY: &str = "CALC:DATA? SDATA";

/// Scripted instrument: query replies keyed by command text, plus an ordered
/// log of every wire operation.
#[derive(Clone, Default)]
struct ScriptedInstrument {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    replies: Mutex<HashMap<String, VecDeque<Result<String>>>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedInstrument {
    fn new() -> Self {
        Self::default()
    }

    fn push_reply(&self, query: &str, reply: &str) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .push_back(Ok(reply.to_string()));
    }

    fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedInstrument {
    async fn write(&self, command: &str) -> Result<()> {
        self.inner.log.lock().unwrap().push(format!("W {}", command));
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.inner.log.lock().unwrap().push(format!("Q {}", command));
        self.inner
            .replies
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(InstrumentError::InvalidArgument(format!(
                    "unscripted query {:?}",
                    command
                )))
            })
    }
}

fn driver_over(instrument: &ScriptedInstrument) -> RsZnb {
    RsZnb::with_transport(Box::new(instrument.clone()), PollConfig::default())
}

#[tokio::test(start_paused = true)]
async fn acquire_traces_preserves_order_and_sequences_reads() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("*ESR?", "1");
    instrument.push_reply(DATA_QUERY, "1.0,2.0");
    instrument.push_reply(DATA_QUERY, "3.0,4.0,5.0,6.0");

    let znb = driver_over(&instrument);
    let traces = znb.acquire_traces(&["trace1", "trace2"]).await.unwrap();

    assert_eq!(traces.len(), 2);
    assert_eq!(traces[0], vec![Complex64::new(1.0, 2.0)]);
    assert_eq!(
        traces[1],
        vec![Complex64::new(3.0, 4.0), Complex64::new(5.0, 6.0)]
    );

    // One trace is fully read before the next selection goes out.
    assert_eq!(
        instrument.log(),
        vec![
            "W INIT:CONT OFF",
            "W *CLS",
            "W INIT1:IMM; *OPC",
            "Q *ESR?",
            "W CALC:PAR:SEL \"trace1\"",
            "Q CALC:DATA? SDATA",
            "W CALC:PAR:SEL \"trace2\"",
            "Q CALC:DATA? SDATA",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn poll_completes_without_sleeping_when_first_status_is_done() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("*ESR?", "1");
    instrument.push_reply(DATA_QUERY, "1.0,2.0");

    let znb = driver_over(&instrument);
    let started = tokio::time::Instant::now();
    znb.acquire_traces(&["trace1"]).await.unwrap();

    // Paused time only advances across sleeps; none may have happened.
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn poll_sleeps_one_interval_per_busy_status() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("*ESR?", "0");
    instrument.push_reply("*ESR?", "0");
    instrument.push_reply("*ESR?", "1");
    instrument.push_reply(DATA_QUERY, "1.0,2.0");

    let znb = driver_over(&instrument);
    let started = tokio::time::Instant::now();
    znb.acquire_traces(&["trace1"]).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn configured_poll_deadline_times_out() {
    let instrument = ScriptedInstrument::new();
    for _ in 0..20 {
        instrument.push_reply("*ESR?", "0");
    }

    let znb = RsZnb::with_transport(
        Box::new(instrument.clone()),
        PollConfig {
            interval: Duration::from_millis(100),
            max_poll: Some(Duration::from_secs(1)),
        },
    );
    let err = znb.acquire_traces(&["trace1"]).await.unwrap_err();
    assert!(matches!(err, InstrumentError::Timeout { .. }));
}

#[tokio::test]
async fn trace_name_count_is_validated_before_any_wire_traffic() {
    let instrument = ScriptedInstrument::new();
    let znb = driver_over(&instrument);

    let err = znb.acquire_traces(&[]).await.unwrap_err();
    assert!(matches!(err, InstrumentError::InvalidArgument(_)));

    let err = znb
        .acquire_traces(&["a", "b", "c", "d", "e"])
        .await
        .unwrap_err();
    assert!(matches!(err, InstrumentError::InvalidArgument(_)));
    assert!(instrument.log().is_empty());
}

#[tokio::test]
async fn create_traces_issues_the_display_setup_sequence() {
    let instrument = ScriptedInstrument::new();
    let znb = driver_over(&instrument);

    znb.create_traces(&[("trace1", SParam::S11), ("trace2", SParam::S21)])
        .await
        .unwrap();

    assert_eq!(
        instrument.log(),
        vec![
            "W CALC:PAR:DEL:ALL",
            "W CALC:PAR:SDEF \"trace1\",\"S11\"",
            "W CALC:PAR:SDEF \"trace2\",\"S21\"",
            "W DISP:WIND1:STAT ON",
            "W DISP:WIND1:TRAC1:FEED \"trace1\"",
            "W DISP:WIND1:TRAC2:FEED \"trace2\"",
            "W SYST:DISP:UPD ON",
            "W INIT:CONT OFF",
        ]
    );

    tokio_test::assert_err!(znb.create_traces(&[]).await);
}

#[tokio::test(start_paused = true)]
async fn four_trace_acquisition_keeps_input_order() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("*ESR?", "1");
    for n in 1..=4 {
        instrument.push_reply(DATA_QUERY, &format!("{}.0,0.0", n));
    }

    let znb = driver_over(&instrument);
    let traces = znb
        .acquire_traces(&["t1", "t2", "t3", "t4"])
        .await
        .unwrap();

    let leads: Vec<f64> = traces.iter().map(|t| t[0].re).collect();
    assert_eq!(leads, vec![1.0, 2.0, 3.0, 4.0]);
}

#[tokio::test]
async fn fetch_data_transforms_the_selected_trace() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply(DATA_QUERY, "3.0,4.0");
    instrument.push_reply(DATA_QUERY, "3.0,4.0");

    let znb = driver_over(&instrument);

    let (amp, phase) = znb.fetch_data(TraceFormat::AmpPhase).await.unwrap();
    assert!((amp[0] - 5.0).abs() < 1e-12);
    assert!((phase[0] - 4.0_f64.atan2(3.0)).abs() < 1e-12);

    let (db, _) = znb.fetch_data(TraceFormat::DbPhase).await.unwrap();
    assert!((db[0] - 20.0 * 5.0_f64.log10()).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn malformed_trace_payload_fails_the_acquisition() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("*ESR?", "1");
    instrument.push_reply(DATA_QUERY, "1.0,2.0,oops");

    let znb = driver_over(&instrument);
    let err = znb.acquire_traces(&["trace1"]).await.unwrap_err();
    assert!(matches!(err, InstrumentError::Format(_)));
}

#[tokio::test]
async fn setters_validate_before_any_wire_traffic() {
    let instrument = ScriptedInstrument::new();
    let znb = driver_over(&instrument);

    tokio_test::assert_err!(znb.set_span(1.0).await);
    tokio_test::assert_err!(znb.set_power(31.0).await);
    tokio_test::assert_err!(znb.set_measurement_bw(600e3).await);
    tokio_test::assert_err!(znb.set_cw_frequency_ghz(25.0).await);
    assert!(instrument.log().is_empty());

    tokio_test::assert_ok!(znb.set_cw_frequency_ghz(4.5).await);
    tokio_test::assert_ok!(znb.set_power(-10.0).await);
    assert_eq!(
        instrument.log(),
        vec!["W SOUR:FREQ:CW 4.5GHz", "W SOUR:POW -10"]
    );
}

#[tokio::test]
async fn sweep_count_setter_stops_continuous_mode_first() {
    let instrument = ScriptedInstrument::new();
    let znb = driver_over(&instrument);

    znb.set_sweep_count(5).await.unwrap();
    assert_eq!(
        instrument.log(),
        vec!["W INIT:CONT OFF", "W SWE:COUN 5"]
    );
}

#[tokio::test]
async fn snapshot_reads_every_sweep_parameter() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("FREQ:SPAN?", "1.0e9");
    instrument.push_reply("FREQ:CENT?", "5.0e9");
    instrument.push_reply("FREQ:STAR?", "4.5e9");
    instrument.push_reply("FREQ:STOP?", "5.5e9");
    instrument.push_reply("SOUR:POW?", "-10");
    instrument.push_reply("AVER:COUN?", "16");
    instrument.push_reply("AVER?", "1");
    instrument.push_reply("SWE:POIN?", "201");
    instrument.push_reply("SWE:COUN?", "1");
    instrument.push_reply("SENS:BAND?", "1000");
    instrument.push_reply("OUTP?", "0");
    instrument.push_reply("SOUR:FREQ:CW?", "5.0");

    let znb = driver_over(&instrument);
    let snapshot = znb.snapshot().await.unwrap();

    assert_eq!(snapshot.span, 1.0e9);
    assert_eq!(snapshot.power, -10.0);
    assert!(snapshot.average_enabled);
    assert!(!snapshot.output_enabled);
    assert_eq!(snapshot.sweep_points, 201);
}

#[tokio::test]
async fn out_of_set_state_reply_is_rejected() {
    let instrument = ScriptedInstrument::new();
    instrument.push_reply("OUTP?", "whatever");

    let znb = driver_over(&instrument);
    let err = znb.output_enabled().await.unwrap_err();
    assert!(matches!(err, InstrumentError::InvalidArgument(_)));
}
