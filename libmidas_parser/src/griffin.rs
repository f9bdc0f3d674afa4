//! Decoder for the GRIFFIN-family banks (GRF1 to GRF4).
//!
//! A record starts at a header word and ends at a trailer word. In between the words are
//! dispatched on their packet type; every case is a small function updating the
//! FragmentBuilder so the tags can be tested on their own. PPG, scaler and RF records share
//! the header and are handed to their own decoders once the header has been read.
use std::sync::Arc;

use super::channel_map::ChannelRegistry;
use super::config::DecoderOptions;
use super::constants::RF_DETECTOR_TYPE;
use super::digitizer::ModuleType;
use super::fragment::{FragmentBuilder, Hit, Psd, RecordClass};
use super::layout::{
    BankLayout, ChargeLayout, HeaderLayout, CHANNEL_TRIGGER_ID, DEADTIME, FILTER_ID,
    FILTER_PATTERN, NETWORK_PACKET, PSD_CHARGE, PSD_ZERO_CROSSING, TIMESTAMP_HIGH,
    TIMESTAMP_HIGH_SHIFT, TIMESTAMP_LOW, TRAILER_TRIGGER_ID, WAVEFORM_SAMPLES,
};
use super::outcome::{DecodeResult, Decoded, ErrorTracker, Failure, ParserState};
use super::words::{is_tagged, PacketType, WordBuffer, WordCursor};
use super::{ppg, rf, scaler};

/// A failed step of a decoder, before the partial fragment is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WordError {
    pub state: ParserState,
    pub word: usize,
    /// The failing word starts the next record, scanning resumes at it
    pub resync: bool,
}

impl WordError {
    pub fn at(state: ParserState, word: usize) -> Self {
        Self {
            state,
            word,
            resync: false,
        }
    }

    pub fn second_header(word: usize) -> Self {
        Self {
            state: ParserState::SecondHeader,
            word,
            resync: true,
        }
    }

    pub fn with(self, partial: FragmentBuilder) -> Failure {
        if self.resync {
            Failure::resync(self.state, self.word, partial)
        } else {
            Failure::at(self.state, self.word, partial)
        }
    }
}

/// Consume the next word, which must be of the expected packet type.
///
/// Running out of words is MissingWords and a header is SecondHeader; any other packet
/// type fails with `state`.
pub(crate) fn require(
    cursor: &mut WordCursor,
    expected: PacketType,
    state: ParserState,
) -> Result<u32, WordError> {
    let pos = cursor.pos();
    match cursor.peek() {
        None => Err(WordError::at(ParserState::MissingWords, pos)),
        Some(word) if PacketType::of(word) == expected => {
            cursor.advance(1);
            Ok(word)
        }
        Some(word) if PacketType::of(word) == PacketType::Header => {
            Err(WordError::second_header(pos))
        }
        Some(_) => Err(WordError::at(state, pos)),
    }
}

/// Consume the next word only if it is of the given packet type
pub(crate) fn optional(cursor: &mut WordCursor, packet: PacketType) -> Option<u32> {
    let word = cursor.peek()?;
    if PacketType::of(word) == packet {
        cursor.advance(1);
        Some(word)
    } else {
        None
    }
}

/// Consume an optional network packet word
pub(crate) fn read_network_packet(cursor: &mut WordCursor, builder: &mut FragmentBuilder) {
    if let Some(word) = optional(cursor, PacketType::NetworkPacket) {
        set_network_packet(builder, word);
    }
}

/// The mandatory 0xa/0xb timestamp pair
pub(crate) fn read_timestamps(
    cursor: &mut WordCursor,
    builder: &mut FragmentBuilder,
) -> Result<(), WordError> {
    let low = require(cursor, PacketType::TimestampLow, ParserState::BadLowTs)?;
    set_timestamp_low(builder, low);
    let high = require(cursor, PacketType::TimestampHigh, ParserState::BadHighTs)?;
    set_timestamp_high(builder, high);
    Ok(())
}

pub fn set_header(
    builder: &mut FragmentBuilder,
    word: u32,
    layout: &HeaderLayout,
) -> Result<(), ParserState> {
    if PacketType::of(word) != PacketType::Header {
        return Err(ParserState::BadHeader);
    }
    builder.module_type = layout.module_type.extract(word) as u8;
    builder.address = Some(layout.address.extract(word));
    builder.detector_type = layout.detector_type.extract(word) as u8;
    builder.pileups = layout.pileups.map(|field| field.extract(word) as u8);
    builder.word_count = layout.word_count.map(|field| field.extract(word));
    Ok(())
}

pub fn set_network_packet(builder: &mut FragmentBuilder, word: u32) {
    builder.network_packet = Some(NETWORK_PACKET.extract(word));
}

pub fn set_filter_pattern(builder: &mut FragmentBuilder, word: u32) {
    builder.filter_pattern = Some(FILTER_PATTERN.extract(word));
}

pub fn add_filter_id(builder: &mut FragmentBuilder, word: u32) {
    builder.filter_ids.push(FILTER_ID.extract(word));
}

pub fn set_trigger_id(builder: &mut FragmentBuilder, word: u32) {
    builder.trigger_id = Some(CHANNEL_TRIGGER_ID.extract(word));
}

pub fn set_timestamp_low(builder: &mut FragmentBuilder, word: u32) {
    builder.append_timestamp(TIMESTAMP_LOW.extract(word) as u64, 0);
}

pub fn set_timestamp_high(builder: &mut FragmentBuilder, word: u32) {
    builder.deadtime = Some(DEADTIME.extract(word) as u16);
    builder.append_timestamp(TIMESTAMP_HIGH.extract(word) as u64, TIMESTAMP_HIGH_SHIFT);
}

pub fn add_waveform_samples(builder: &mut FragmentBuilder, word: u32) {
    for field in WAVEFORM_SAMPLES {
        builder.waveform.push(field.extract_signed(word) as i16);
    }
}

pub fn add_charge_pair(
    builder: &mut FragmentBuilder,
    layout: &ChargeLayout,
    cfd_word: u32,
    charge_word: u32,
) {
    builder.hits.push(Hit {
        cfd: layout.cfd.extract(cfd_word) as i32,
        charge: layout.charge.extract_signed(charge_word),
        integration_length: layout.integration_length(cfd_word, charge_word),
        psd: None,
    });
}

/// Attach the PSD pair of a GRF4 0xf word to the last hit
pub fn set_psd(
    builder: &mut FragmentBuilder,
    zero_crossing_word: u32,
    charge_word: u32,
) -> Result<(), ParserState> {
    let hit = builder.hits.last_mut().ok_or(ParserState::MissingCfd)?;
    hit.psd = Some(Psd {
        charge: PSD_CHARGE.extract_signed(charge_word),
        zero_crossing: PSD_ZERO_CROSSING.extract(zero_crossing_word),
    });
    Ok(())
}

/// The trailer repeats the low bits of the channel trigger id
pub fn check_trailer(builder: &FragmentBuilder, word: u32) -> Result<(), ParserState> {
    match builder.trigger_id {
        Some(id) if TRAILER_TRIGGER_ID.extract(word) != id & TRAILER_TRIGGER_ID.max_value() => {
            Err(ParserState::BadFooter)
        }
        _ => Ok(()),
    }
}

/// What a GRIFFIN-family header announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Fragment(ModuleType),
    Ppg,
    Scaler,
    Rf,
}

impl RecordKind {
    pub fn classify(builder: &FragmentBuilder, layout: BankLayout) -> Result<Self, ParserState> {
        if builder.address == Some(layout.ppg_address()) {
            return Ok(Self::Ppg);
        }
        match ModuleType::from_code(builder.module_type as u32) {
            Some(ModuleType::Scaler) if builder.detector_type as u32 == RF_DETECTOR_TYPE => {
                Ok(Self::Rf)
            }
            Some(ModuleType::Scaler) => Ok(Self::Scaler),
            Some(module) => Ok(Self::Fragment(module)),
            None => Err(ParserState::BadModuleType),
        }
    }
}

/// Decoder for GRIFFIN-family records.
///
/// The decoder holds no per-event state; the same instance can decode any number of banks
/// of any of the four layouts.
pub struct GriffinDecoder {
    registry: Arc<dyn ChannelRegistry>,
    options: DecoderOptions,
}

impl GriffinDecoder {
    pub fn new(registry: Arc<dyn ChannelRegistry>, options: DecoderOptions) -> Self {
        Self { registry, options }
    }

    /// Decode the record whose header is the first word of the buffer.
    ///
    /// On success the number of consumed words is returned along with the records; word
    /// indices in a Failure are relative to the start of the buffer.
    pub fn decode(&self, buffer: &WordBuffer, layout: BankLayout) -> DecodeResult {
        let words = buffer.words();
        let mut builder = FragmentBuilder::new(buffer.daq());
        let header = match words.first() {
            Some(word) => *word,
            None => return Err(Failure::at(ParserState::MissingWords, 0, builder)),
        };
        if let Err(state) = set_header(&mut builder, header, &layout.header()) {
            return Err(Failure::at(state, 0, builder));
        }

        let module = match RecordKind::classify(&builder, layout) {
            Ok(RecordKind::Fragment(module)) => module,
            Ok(RecordKind::Ppg) => {
                builder.class = RecordClass::Ppg;
                return ppg::decode_ppg(words, builder);
            }
            Ok(RecordKind::Scaler) => {
                builder.class = RecordClass::Scaler;
                return scaler::decode_scaler(words, builder);
            }
            Ok(RecordKind::Rf) => return rf::decode_rf(words, builder),
            Err(state) => return Err(Failure::at(state, 0, builder)),
        };

        let mut cursor = WordCursor::new(words, 1);
        if let Err(error) = read_preamble(&mut cursor, &mut builder) {
            return Err(error.with(builder));
        }

        // Scalers were routed above, every remaining module writes charges
        let charge = match layout.charge(module) {
            Some(charge) => charge,
            None => return Err(Failure::at(ParserState::BadModuleType, 0, builder)),
        };
        let mut tracker = ErrorTracker::default();
        let mut waveform_words = 0;

        loop {
            let pos = cursor.pos();
            let word = match cursor.next_word() {
                Some(word) => word,
                None => {
                    tracker.fail(ParserState::MissingWords, pos);
                    return Err(tracker.into_failure(pos, builder));
                }
            };

            match PacketType::of(word) {
                PacketType::Header => {
                    tracker.fail(ParserState::SecondHeader, pos);
                    return Err(tracker.into_failure(pos, builder));
                }
                PacketType::Waveform => {
                    waveform_words += 1;
                    if self.options.record_waveforms {
                        add_waveform_samples(&mut builder, word);
                    }
                }
                PacketType::NetworkPacket => set_network_packet(&mut builder, word),
                PacketType::TriggerId | PacketType::TimestampLow | PacketType::TimestampHigh => {
                    tracker.fail(ParserState::MissingCfd, pos);
                }
                PacketType::Payload(_) => match cursor.peek() {
                    Some(charge_word) if !is_tagged(charge_word) => {
                        cursor.advance(1);
                        if builder.hits.len() >= layout.max_hits() {
                            tracker.fail(ParserState::NotSingleCfd, pos);
                        } else {
                            add_charge_pair(&mut builder, &charge, word, charge_word);
                        }
                    }
                    // Leave a tagged word in place, it may well be the trailer
                    _ => tracker.fail(ParserState::MissingCharge, pos + 1),
                },
                PacketType::Fault if layout.fault_is_psd() => match cursor.peek() {
                    Some(charge_word) if !is_tagged(charge_word) => {
                        cursor.advance(1);
                        if let Err(state) = set_psd(&mut builder, word, charge_word) {
                            tracker.fail(state, pos);
                        }
                    }
                    _ => tracker.fail(ParserState::MissingPsd, pos + 1),
                },
                PacketType::Fault => {
                    tracker.fail(ParserState::Fault, pos);
                    return Err(tracker.into_failure(pos + 1, builder));
                }
                PacketType::Trailer => {
                    if let Err(state) = check_trailer(&builder, word) {
                        tracker.fail(state, pos);
                    }
                    if let Some(expected) = builder.word_count.filter(|count| *count != 0) {
                        if (pos + 1 - waveform_words) as u32 != expected {
                            tracker.fail(ParserState::WrongNofWords, pos);
                        }
                    }
                    if builder.hits.is_empty() {
                        tracker.fail(ParserState::MissingCfd, pos);
                    }
                    if !tracker.is_good() {
                        return Err(tracker.into_failure(pos + 1, builder));
                    }
                    return self.emit(builder, pos + 1, pos);
                }
            }
        }
    }

    fn emit(&self, builder: FragmentBuilder, consumed: usize, trailer: usize) -> DecodeResult {
        if let Some(address) = builder.address {
            if !self.options.ignore_missing_channel && self.registry.lookup(address).is_none() {
                let mut decoded = Decoded::new(consumed);
                decoded.skipped = builder.hits.len().max(1);
                return Ok(decoded);
            }
        }
        builder.into_decoded(consumed, trailer)
    }
}

/// Everything between the header and the first charge word
fn read_preamble(cursor: &mut WordCursor, builder: &mut FragmentBuilder) -> Result<(), WordError> {
    read_network_packet(cursor, builder);
    if let Some(word) = optional(cursor, PacketType::Waveform) {
        set_filter_pattern(builder, word);
    }
    while let Some(word) = cursor.peek() {
        match PacketType::of(word) {
            PacketType::Payload(_) => {
                add_filter_id(builder, word);
                cursor.advance(1);
            }
            _ => break,
        }
    }
    if let Some(word) = optional(cursor, PacketType::TriggerId) {
        set_trigger_id(builder, word);
    }
    read_network_packet(cursor, builder);
    read_timestamps(cursor, builder)
}
