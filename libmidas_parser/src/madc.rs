//! Decoder for the Mesytec MADC-32 peak sensing ADC (MADC banks).
use std::sync::Arc;

use bit_set::BitSet;

use super::channel_map::ChannelRegistry;
use super::config::DecoderOptions;
use super::constants::{MADC_ADDRESS_BASE, MADC_CHANNELS_PER_MODULE, MADC_DETECTOR_TYPE};
use super::fragment::FragmentBuilder;
use super::outcome::{DecodeResult, Decoded, ErrorTracker, Failure, ParserState};
use super::timestamp::TimestampUnwrapper;
use super::words::{BitField, WordBuffer};

const SIGNATURE: BitField = BitField::new(30, 2);
const SUBHEADER: BitField = BitField::new(21, 9);

const HEADER_SIGNATURE: u32 = 0b01;
const DATA_SIGNATURE: u32 = 0b00;
const END_OF_EVENT_SIGNATURE: u32 = 0b11;
const DATA_SUBHEADER: u32 = 0x020;
const EXTENDED_TS_SUBHEADER: u32 = 0x024;

// Header
const MODULE_ID: BitField = BitField::new(16, 8);
const RESOLUTION: BitField = BitField::new(12, 3);
const WORD_COUNT: BitField = BitField::new(0, 12);
// Data
const CHANNEL: BitField = BitField::new(16, 5);
const OUT_OF_RANGE: BitField = BitField::new(14, 1);
const VALUE: BitField = BitField::new(0, 14);
// Extended timestamp and end of event
const EXTENDED_TS: BitField = BitField::new(0, 16);
const COUNTER: BitField = BitField::new(0, 30);

pub fn is_header(word: u32) -> bool {
    SIGNATURE.extract(word) == HEADER_SIGNATURE
}

pub fn madc_address(module_id: u32, channel: u32) -> u32 {
    MADC_ADDRESS_BASE + module_id * MADC_CHANNELS_PER_MODULE + channel
}

/// One converted channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcValue {
    pub channel: u32,
    pub value: u32,
    pub out_of_range: bool,
}

pub struct MadcDecoder {
    registry: Arc<dyn ChannelRegistry>,
    options: DecoderOptions,
    unwrapper: TimestampUnwrapper,
}

impl MadcDecoder {
    pub fn new(registry: Arc<dyn ChannelRegistry>, options: DecoderOptions) -> Self {
        Self {
            registry,
            options,
            unwrapper: TimestampUnwrapper::new(COUNTER.width),
        }
    }

    pub fn unwrapper(&self) -> &TimestampUnwrapper {
        &self.unwrapper
    }

    pub fn reset(&mut self) {
        self.unwrapper.reset();
    }

    /// Decode the event whose header is the first word of the buffer
    pub fn decode(&mut self, buffer: &WordBuffer) -> DecodeResult {
        let words = buffer.words();
        let mut event = FragmentBuilder::new(buffer.daq());
        let header = match words.first() {
            Some(word) if is_header(*word) => *word,
            Some(_) => return Err(Failure::at(ParserState::BadHeader, 0, event)),
            None => return Err(Failure::at(ParserState::MissingWords, 0, event)),
        };
        let module_id = MODULE_ID.extract(header);
        let word_count = WORD_COUNT.extract(header) as usize;
        spdlog::trace!(
            "MADC module {module_id} resolution {} with {word_count} words",
            RESOLUTION.extract(header)
        );

        let mut tracker = ErrorTracker::default();
        let mut values = Vec::new();
        let mut extended = None;
        event.detector_type = MADC_DETECTOR_TYPE;

        for (pos, word) in words.iter().copied().enumerate().skip(1) {
            match SIGNATURE.extract(word) {
                HEADER_SIGNATURE => {
                    tracker.fail(ParserState::SecondHeader, pos);
                    return Err(tracker.into_failure(pos, event));
                }
                END_OF_EVENT_SIGNATURE => {
                    if pos != word_count {
                        tracker.fail(ParserState::WrongNofWords, pos);
                    }
                    let counter = COUNTER.extract(word) as u64;
                    event.timestamp = Some(match extended {
                        Some(high) => ((high as u64) << COUNTER.width) | counter,
                        None => self.unwrapper.extend(counter),
                    });
                    if !tracker.is_good() {
                        return Err(tracker.into_failure(pos + 1, event));
                    }
                    return Ok(self.build(&event, module_id, &values, pos + 1));
                }
                DATA_SIGNATURE => match SUBHEADER.extract(word) {
                    DATA_SUBHEADER => values.push(AdcValue {
                        channel: CHANNEL.extract(word),
                        value: VALUE.extract(word),
                        out_of_range: OUT_OF_RANGE.extract(word) != 0,
                    }),
                    EXTENDED_TS_SUBHEADER => extended = Some(EXTENDED_TS.extract(word)),
                    // fill words are all zero
                    _ => (),
                },
                _ => (),
            }
        }

        tracker.fail(ParserState::MissingWords, words.len());
        Err(tracker.into_failure(words.len(), event))
    }

    /// One fragment per channel, only the first conversion of a channel is kept
    fn build(
        &self,
        event: &FragmentBuilder,
        module_id: u32,
        values: &[AdcValue],
        consumed: usize,
    ) -> Decoded {
        let mut decoded = Decoded::new(consumed);
        let mut seen = BitSet::new();
        for value in values {
            if !seen.insert(value.channel as usize) {
                decoded.skipped += 1;
                continue;
            }
            let mut builder = event.follow_on();
            let address = madc_address(module_id, value.channel);
            builder.address = Some(address);
            builder.charge = Some(value.value as i32);
            match self.registry.lookup(address) {
                Some(info) => builder.detector_type = info.detector_type,
                None if self.options.ignore_missing_channel => (),
                None => {
                    decoded.skipped += 1;
                    continue;
                }
            }
            if let Ok(fragments) = builder.finish() {
                decoded.push_fragments(fragments);
            }
        }
        decoded
    }
}
