//! Trace payload decoding.
//!
//! Both analyzers return sweep data as one flat comma-separated ASCII list of
//! floats, interpreted as interleaved pairs: `a0,b0,a1,b1,...`. For the VNA
//! the pairs are the real and imaginary parts of each sample; the spectrum
//! analyzer delivers the same layout read back as N×2 rows.
//!
//! Decoding never repairs input: a non-numeric token or an odd value count is
//! a [`Format`](crate::error::InstrumentError::Format) error. Zero-magnitude
//! samples in dB follow `log10` (negative infinity) rather than being
//! special-cased.

use crate::error::{InstrumentError, Result};
use num_complex::Complex64;
use std::str::FromStr;

/// Output representation for a decoded trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    /// Raw interleaved pairs, unchanged: (real, imaginary).
    RealImag,
    /// (20·log10 |a+ib|, arg(a+ib) in radians).
    DbPhase,
    /// (|a+ib|, arg(a+ib) in radians).
    AmpPhase,
}

impl TraceFormat {
    /// The wire-facing label for this format.
    pub fn label(self) -> &'static str {
        match self {
            TraceFormat::RealImag => "real-imag",
            TraceFormat::DbPhase => "db-phase",
            TraceFormat::AmpPhase => "amp-phase",
        }
    }
}

impl FromStr for TraceFormat {
    type Err = InstrumentError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "real-imag" => Ok(TraceFormat::RealImag),
            "db-phase" => Ok(TraceFormat::DbPhase),
            "amp-phase" => Ok(TraceFormat::AmpPhase),
            _ => Err(InstrumentError::invalid(format!(
                "data format must be 'real-imag', 'db-phase' or 'amp-phase', got '{}'",
                value
            ))),
        }
    }
}

/// Parse a comma-separated payload into floats, requiring an even count.
pub fn parse_payload(payload: &str) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for token in payload.trim().split(',') {
        let token = token.trim();
        let value = token.parse::<f64>().map_err(|_| {
            InstrumentError::format(format!("non-numeric token {:?} in trace payload", token))
        })?;
        values.push(value);
    }
    if values.len() % 2 != 0 {
        return Err(InstrumentError::format(format!(
            "trace payload holds {} values; interleaved pairs require an even count",
            values.len()
        )));
    }
    Ok(values)
}

/// Reshape a flat even-length value list into N×2 rows.
///
/// This is the spectrum-analyzer view of the payload; the caller guarantees
/// evenness by going through [`parse_payload`].
pub fn into_rows(values: Vec<f64>) -> Vec<[f64; 2]> {
    values.chunks_exact(2).map(|pair| [pair[0], pair[1]]).collect()
}

/// Decode a payload into two equal-length channels in the requested format.
pub fn decode(payload: &str, format: TraceFormat) -> Result<(Vec<f64>, Vec<f64>)> {
    let samples = decode_complex(payload)?;
    Ok(match format {
        TraceFormat::RealImag => (
            samples.iter().map(|z| z.re).collect(),
            samples.iter().map(|z| z.im).collect(),
        ),
        TraceFormat::AmpPhase => (
            samples.iter().map(|z| z.norm()).collect(),
            samples.iter().map(|z| z.arg()).collect(),
        ),
        TraceFormat::DbPhase => (
            samples.iter().map(|z| 20.0 * z.norm().log10()).collect(),
            samples.iter().map(|z| z.arg()).collect(),
        ),
    })
}

/// Decode a payload into one complex sample per interleaved pair.
pub fn decode_complex(payload: &str) -> Result<Vec<Complex64>> {
    let values = parse_payload(payload)?;
    Ok(values
        .chunks_exact(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn real_imag_roundtrips_interleaved_values() {
        let (a, b) = decode("1.0,2.0,3.0,4.0", TraceFormat::RealImag).unwrap();
        assert_eq!(a, vec![1.0, 3.0]);
        assert_eq!(b, vec![2.0, 4.0]);
    }

    #[test]
    fn amp_phase_matches_norm_and_atan2() {
        let (amp, phase) = decode("1.0,2.0,3.0,4.0", TraceFormat::AmpPhase).unwrap();
        assert!((amp[0] - 5.0_f64.sqrt()).abs() < TOLERANCE);
        assert!((amp[1] - 5.0).abs() < TOLERANCE);
        assert!((phase[0] - 2.0_f64.atan2(1.0)).abs() < TOLERANCE);
        assert!((phase[1] - 4.0_f64.atan2(3.0)).abs() < TOLERANCE);
    }

    #[test]
    fn db_is_twenty_log_ten_of_amplitude() {
        let (db, phase) = decode("3.0,4.0", TraceFormat::DbPhase).unwrap();
        assert!((db[0] - 20.0 * 5.0_f64.log10()).abs() < TOLERANCE);
        assert!((phase[0] - 4.0_f64.atan2(3.0)).abs() < TOLERANCE);
    }

    #[test]
    fn zero_magnitude_db_is_negative_infinity() {
        let (db, _) = decode("0.0,0.0", TraceFormat::DbPhase).unwrap();
        assert!(db[0].is_infinite() && db[0] < 0.0);
    }

    #[test]
    fn odd_length_payload_is_a_format_error() {
        for format in [
            TraceFormat::RealImag,
            TraceFormat::DbPhase,
            TraceFormat::AmpPhase,
        ] {
            let err = decode("1.0,2.0,3.0", format).unwrap_err();
            assert!(matches!(err, InstrumentError::Format(_)), "{:?}", format);
        }
    }

    #[test]
    fn non_numeric_token_is_a_format_error() {
        let err = parse_payload("1.0,abc,3.0,4.0").unwrap_err();
        assert!(matches!(err, InstrumentError::Format(_)));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn empty_payload_is_a_format_error() {
        assert!(matches!(
            parse_payload("").unwrap_err(),
            InstrumentError::Format(_)
        ));
    }

    #[test]
    fn scientific_notation_and_whitespace_are_accepted() {
        let values = parse_payload(" 1.5E-3 , -2.25e+1 ").unwrap();
        assert_eq!(values, vec![1.5e-3, -22.5]);
    }

    #[test]
    fn complex_combine_pairs_real_and_imaginary() {
        let samples = decode_complex("1.0,2.0,3.0,4.0").unwrap();
        assert_eq!(samples, vec![Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)]);
    }

    #[test]
    fn rows_pair_consecutive_values() {
        let rows = into_rows(vec![1.0, -80.5, 2.0, -81.0]);
        assert_eq!(rows, vec![[1.0, -80.5], [2.0, -81.0]]);
    }

    #[test]
    fn format_labels_parse_back() {
        for format in [
            TraceFormat::RealImag,
            TraceFormat::DbPhase,
            TraceFormat::AmpPhase,
        ] {
            assert_eq!(format.label().parse::<TraceFormat>().unwrap(), format);
        }
        // Case-insensitive, like the driver this replaces.
        assert_eq!("Real-Imag".parse::<TraceFormat>().unwrap(), TraceFormat::RealImag);
    }

    #[test]
    fn unknown_format_is_invalid_argument() {
        let err = "magnitude".parse::<TraceFormat>().unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidArgument(_)));
    }
}
