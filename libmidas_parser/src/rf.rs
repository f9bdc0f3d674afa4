//! RF phase records.
//!
//! The DAQ fits the RF signal with a sine, using the recurrence
//! `y[n] = k * y[n-1] - y[n-2]` with `k = 2 cos(w)`, and writes the four fit coefficients
//! instead of a waveform. From them the RF period and its phase relative to the
//! timestamp are reconstructed.
use std::f64::consts::PI;

use super::constants::{CFD_UNITS_PER_SAMPLE, SAMPLE_PERIOD_NS};
use super::fragment::FragmentBuilder;
use super::griffin::{read_network_packet, read_timestamps, require};
use super::outcome::{DecodeResult, Failure, ParserState};
use super::words::{is_tagged, BitField, PacketType, WordCursor};

pub const N_COEFFICIENTS: usize = 4;
const COEFFICIENT: BitField = BitField::new(0, 26);
const FRACTIONAL_BITS: i32 = 23;

/// Reconstructed RF phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RfPhase {
    /// Frequency in MHz
    pub frequency: f64,
    /// Period in ns
    pub period: f64,
    /// Phase shift in ns
    pub phase_shift: f64,
    /// Fitted baseline
    pub offset: f64,
}

impl RfPhase {
    pub fn period_cfd(&self) -> i32 {
        (self.period / SAMPLE_PERIOD_NS * CFD_UNITS_PER_SAMPLE).round() as i32
    }

    pub fn phase_shift_cfd(&self) -> i32 {
        (self.phase_shift / SAMPLE_PERIOD_NS * CFD_UNITS_PER_SAMPLE).round() as i32
    }
}

/// Convert a 26 bit fixed point coefficient word
pub fn coefficient(word: u32) -> f64 {
    COEFFICIENT.extract_signed(word) as f64 / 2f64.powi(FRACTIONAL_BITS)
}

/// Coefficients in the order a (sine amplitude), b (cosine amplitude), k (recurrence
/// coefficient), c (offset).
pub fn rf_phase_from_coefficients(words: &[u32; N_COEFFICIENTS]) -> Result<RfPhase, ParserState> {
    let [a, b, k, c] = words.map(coefficient);
    let omega = (k / 2.0).acos(); // radians per sample
    let frequency = omega / (2.0 * PI * SAMPLE_PERIOD_NS) * 1.0e3;
    if frequency.is_nan() || frequency <= 0.0 {
        return Err(ParserState::BadRfScalerWord);
    }
    Ok(RfPhase {
        frequency,
        period: 1.0e3 / frequency,
        phase_shift: b.atan2(a) / omega * SAMPLE_PERIOD_NS,
        offset: c,
    })
}

/// Decode an RF phase record. The header has already been read into builder.
///
/// The fragment carries the period as charge and the phase shift as CFD, both in CFD units.
pub fn decode_rf(words: &[u32], mut builder: FragmentBuilder) -> DecodeResult {
    let mut cursor = WordCursor::new(words, 1);
    read_network_packet(&mut cursor, &mut builder);
    if let Err(error) = read_timestamps(&mut cursor, &mut builder) {
        return Err(error.with(builder));
    }

    let first = cursor.pos();
    let available = words.get(first..).unwrap_or(&[]);
    let available = &available[..available.len().min(N_COEFFICIENTS)];
    // identical words are how the firmware reports a failed fit
    let failed_fit = available.iter().all(|word| *word == available[0]);
    if available.len() == N_COEFFICIENTS && failed_fit {
        return Err(Failure::at(ParserState::BadRfScalerWord, first, builder));
    }
    if let Some(index) = available
        .iter()
        .position(|word| PacketType::of(*word) == PacketType::Header)
    {
        return Err(Failure::resync(ParserState::SecondHeader, first + index, builder));
    }
    let coefficients: [u32; N_COEFFICIENTS] = match available.try_into() {
        Ok(coefficients) => coefficients,
        Err(_) => return Err(Failure::at(ParserState::MissingWords, words.len(), builder)),
    };
    if let Some(index) = coefficients.iter().position(|word| is_tagged(*word)) {
        return Err(Failure::at(ParserState::BadRfScalerWord, first + index, builder));
    }
    cursor.advance(N_COEFFICIENTS);

    let trailer = cursor.pos();
    if let Err(error) = require(&mut cursor, PacketType::Trailer, ParserState::BadFooter) {
        return Err(error.with(builder));
    }
    match rf_phase_from_coefficients(&coefficients) {
        Ok(phase) => {
            builder.charge = Some(phase.period_cfd());
            builder.cfd = Some(phase.phase_shift_cfd());
        }
        Err(state) => return Err(Failure::at(state, first, builder)),
    }
    builder.into_decoded(trailer + 1, trailer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RF_DETECTOR_TYPE;
    use crate::griffin::tests::{decoder, header_word, timestamp_words};
    use crate::layout::BankLayout;
    use crate::outcome::Record;
    use crate::words::{DaqInfo, WordBuffer};

    fn to_word(value: f64) -> u32 {
        COEFFICIENT.insert(0, (value * 2f64.powi(FRACTIONAL_BITS)).round() as i32 as u32)
    }

    fn rf_words(coefficients: [u32; 4]) -> Vec<u32> {
        let mut words = vec![header_word(BankLayout::Grf3, 0x0100, 4, RF_DETECTOR_TYPE)];
        words.extend(timestamp_words(0x1000));
        words.extend(coefficients);
        words.push(0xe000_0000);
        words
    }

    fn decode(words: &[u32]) -> DecodeResult {
        decoder(Default::default())
            .decode(&WordBuffer::new(words, DaqInfo::default()), BankLayout::Grf3)
    }

    #[test]
    fn test_rf_phase() {
        // 84 ns period, 8.4 samples
        let omega = 2.0 * PI / 8.4;
        let words = [to_word(0.5), to_word(0.5), to_word(2.0 * omega.cos()), to_word(0.1)];
        let phase = rf_phase_from_coefficients(&words).unwrap();
        assert!((phase.period - 84.0).abs() < 1.0e-3);
        assert!((phase.frequency - 1.0e3 / 84.0).abs() < 1.0e-3);
        assert!((phase.phase_shift - PI / 4.0 / omega * 10.0).abs() < 1.0e-3);

        let decoded = decode(&rf_words(words)).unwrap();
        match &decoded.records[0] {
            Record::Fragment(fragment) => {
                assert_eq!(fragment.charge, Some(134));
                assert_eq!(fragment.cfd, Some(phase.phase_shift_cfd()));
                assert_eq!(fragment.address, 0x0100);
            }
            other => panic!("expected a fragment, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_coefficients_rejected() {
        for value in [0x0000_0000, 0x0123_4567, 0x8fff_ffff, 0xffff_ffff] {
            let words = rf_words([value; 4]);
            let failure = decode(&words).unwrap_err();
            assert_eq!(failure.state, ParserState::BadRfScalerWord);
            assert_eq!(failure.word, 3);
        }
    }

    #[test]
    fn test_bad_coefficients() {
        // k = 2 means a zero frequency
        let words = [to_word(0.5), to_word(0.5), to_word(2.0), to_word(0.0)];
        assert_eq!(
            rf_phase_from_coefficients(&words),
            Err(ParserState::BadRfScalerWord)
        );
        // |k| > 2 has no solution
        let words = [to_word(0.5), to_word(0.5), to_word(3.0), to_word(0.0)];
        assert_eq!(
            rf_phase_from_coefficients(&words),
            Err(ParserState::BadRfScalerWord)
        );

        let mut words = rf_words([to_word(0.5), to_word(0.1), to_word(1.5), 0]);
        words[5] |= 0x9000_0000;
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::BadRfScalerWord);
        assert_eq!(failure.word, 5);
    }

    #[test]
    fn test_header_among_coefficients() {
        let mut words = rf_words([to_word(0.5), to_word(0.1), to_word(1.5), 0]);
        words.truncate(5);
        words.push(header_word(BankLayout::Grf3, 0x0101, 1, 1));
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::SecondHeader);
        assert_eq!(failure.word, 5);
        assert_eq!(failure.resume, 5);

        // a short bank without a header is still missing words
        let failure = decode(&words[..5]).unwrap_err();
        assert_eq!(failure.state, ParserState::MissingWords);
    }
}
