//! Decoder for the CAEN V1190 multi-hit TDC (EMMT banks).
//!
//! Unlike the GRIFFIN family the words carry a 5 bit type (bits 27 to 31) and the framing
//! is per event: global header, TDC headers/measurements/trailers, the extended trigger
//! time tag and the global trailer.
use std::sync::Arc;

use bit_set::BitSet;

use super::channel_map::ChannelRegistry;
use super::config::DecoderOptions;
use super::constants::{TDC_ADDRESS_BASE, TDC_CHANNELS_PER_BOARD, TDC_DETECTOR_TYPE};
use super::fragment::FragmentBuilder;
use super::outcome::{DecodeResult, Decoded, ErrorTracker, Failure, ParserState};
use super::timestamp::TimestampUnwrapper;
use super::words::{BitField, WordBuffer};

const WORD_TYPE: BitField = BitField::new(27, 5);

const MEASUREMENT: u32 = 0x00;
const TDC_HEADER: u32 = 0x01;
const TDC_TRAILER: u32 = 0x03;
const TDC_ERROR: u32 = 0x04;
const GLOBAL_HEADER: u32 = 0x08;
const GLOBAL_TRAILER: u32 = 0x10;
const EXTENDED_TIME_TAG: u32 = 0x11;
const FILLER: u32 = 0x18;

// Global header
const EVENT_COUNT: BitField = BitField::new(5, 22);
const GEO: BitField = BitField::new(0, 5);
// TDC header and trailer
const TDC_NUMBER: BitField = BitField::new(24, 2);
const EVENT_ID: BitField = BitField::new(12, 12);
// Measurement
const TRAILING: BitField = BitField::new(26, 1);
const CHANNEL: BitField = BitField::new(19, 7);
const VALUE: BitField = BitField::new(0, 19);
// Extended trigger time tag and global trailer
const TIME_TAG: BitField = BitField::new(0, 27);
const TIME_TAG_SHIFT: u32 = 5;
const TRAILER_TIME: BitField = BitField::new(0, 5);
const TIMESTAMP_WIDTH: u32 = 32;

pub fn is_global_header(word: u32) -> bool {
    WORD_TYPE.extract(word) == GLOBAL_HEADER
}

/// One hit of one TDC channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdcMeasurement {
    pub channel: u32,
    pub value: u32,
    pub trailing: bool,
}

impl TdcMeasurement {
    pub fn from_word(word: u32) -> Self {
        Self {
            channel: CHANNEL.extract(word),
            value: VALUE.extract(word),
            trailing: TRAILING.extract(word) != 0,
        }
    }
}

pub fn tdc_address(geo: u32, channel: u32) -> u32 {
    TDC_ADDRESS_BASE + geo * TDC_CHANNELS_PER_BOARD + channel
}

/// The per-channel trailer must repeat its header's TDC number and event id
pub fn check_tdc_trailer(header: u32, trailer: u32) -> Result<(), ParserState> {
    if TDC_NUMBER.extract(header) != TDC_NUMBER.extract(trailer) {
        Err(ParserState::BadFooter)
    } else if EVENT_ID.extract(header) != EVENT_ID.extract(trailer) {
        Err(ParserState::BadTriggerId)
    } else {
        Ok(())
    }
}

pub struct TdcDecoder {
    registry: Arc<dyn ChannelRegistry>,
    options: DecoderOptions,
    unwrapper: TimestampUnwrapper,
}

impl TdcDecoder {
    pub fn new(registry: Arc<dyn ChannelRegistry>, options: DecoderOptions) -> Self {
        Self {
            registry,
            options,
            unwrapper: TimestampUnwrapper::new(TIMESTAMP_WIDTH),
        }
    }

    pub fn unwrapper(&self) -> &TimestampUnwrapper {
        &self.unwrapper
    }

    pub fn reset(&mut self) {
        self.unwrapper.reset();
    }

    /// Decode the event whose global header is the first word of the buffer
    pub fn decode(&mut self, buffer: &WordBuffer) -> DecodeResult {
        let words = buffer.words();
        let mut event = FragmentBuilder::new(buffer.daq());
        let header = match words.first() {
            Some(word) if is_global_header(*word) => *word,
            Some(_) => return Err(Failure::at(ParserState::BadHeader, 0, event)),
            None => return Err(Failure::at(ParserState::MissingWords, 0, event)),
        };
        let geo = GEO.extract(header);
        event.trigger_id = Some(EVENT_COUNT.extract(header));
        event.detector_type = TDC_DETECTOR_TYPE;

        let mut tracker = ErrorTracker::default();
        let mut measurements = Vec::new();
        let mut tdc_header = None;
        let mut time_tag = None;

        for (pos, word) in words.iter().copied().enumerate().skip(1) {
            match WORD_TYPE.extract(word) {
                MEASUREMENT => measurements.push(TdcMeasurement::from_word(word)),
                TDC_HEADER => tdc_header = Some(word),
                TDC_TRAILER => {
                    if let Some(header) = tdc_header.take() {
                        if let Err(state) = check_tdc_trailer(header, word) {
                            tracker.fail(state, pos);
                        }
                    }
                }
                TDC_ERROR => tracker.fail(ParserState::Fault, pos),
                EXTENDED_TIME_TAG => time_tag = Some(TIME_TAG.extract(word)),
                GLOBAL_HEADER => {
                    tracker.fail(ParserState::SecondHeader, pos);
                    return Err(tracker.into_failure(pos, event));
                }
                GLOBAL_TRAILER => {
                    match time_tag {
                        Some(tag) => {
                            let raw = ((tag as u64) << TIME_TAG_SHIFT)
                                | TRAILER_TIME.extract(word) as u64;
                            event.timestamp = Some(self.unwrapper.extend(raw));
                        }
                        None => tracker.fail(ParserState::BadHighTs, pos),
                    }
                    if !tracker.is_good() {
                        return Err(tracker.into_failure(pos + 1, event));
                    }
                    return Ok(self.build(&event, geo, &measurements, pos + 1));
                }
                FILLER => (),
                _ => (),
            }
        }

        tracker.fail(ParserState::MissingWords, words.len());
        Err(tracker.into_failure(words.len(), event))
    }

    /// One fragment per channel, only the first measurement of a channel is kept
    fn build(
        &self,
        event: &FragmentBuilder,
        geo: u32,
        measurements: &[TdcMeasurement],
        consumed: usize,
    ) -> Decoded {
        let mut decoded = Decoded::new(consumed);
        let mut seen = BitSet::new();
        for measurement in measurements {
            if !seen.insert(measurement.channel as usize) {
                decoded.skipped += 1;
                continue;
            }
            let mut builder = event.follow_on();
            let address = tdc_address(geo, measurement.channel);
            builder.address = Some(address);
            builder.cfd = Some(measurement.value as i32);
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel_map::ChannelMap;
    use crate::outcome::Record;
    use crate::words::DaqInfo;

    pub(crate) fn word(word_type: u32, payload: u32) -> u32 {
        WORD_TYPE.insert(payload, word_type)
    }

    pub(crate) fn measurement(channel: u32, value: u32) -> u32 {
        word(MEASUREMENT, CHANNEL.insert(VALUE.insert(0, value), channel))
    }

    pub(crate) fn tdc_event(geo: u32, time_tag: u32, measurements: &[u32]) -> Vec<u32> {
        let tdc_header = word(TDC_HEADER, EVENT_ID.insert(TDC_NUMBER.insert(0, 1), 0x42));
        let tdc_trailer = word(TDC_TRAILER, EVENT_ID.insert(TDC_NUMBER.insert(0, 1), 0x42));
        let mut words = vec![word(GLOBAL_HEADER, EVENT_COUNT.insert(GEO.insert(0, geo), 7))];
        words.push(tdc_header);
        words.extend_from_slice(measurements);
        words.push(tdc_trailer);
        words.push(word(EXTENDED_TIME_TAG, time_tag));
        words.push(word(GLOBAL_TRAILER, GEO.insert(0, geo)));
        words
    }

    fn decoder() -> TdcDecoder {
        TdcDecoder::new(Arc::new(ChannelMap::default()), DecoderOptions::default())
    }

    fn addresses(decoded: &Decoded) -> Vec<(u32, Option<i32>, u64)> {
        decoded
            .records
            .iter()
            .filter_map(|record| match record {
                Record::Fragment(f) => Some((f.address, f.cfd, f.timestamp)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decode_tdc_event() {
        let words = tdc_event(3, 0x100, &[measurement(5, 1000), measurement(9, 2000)]);
        let mut decoder = decoder();
        let decoded = decoder.decode(&WordBuffer::new(&words, DaqInfo::default())).unwrap();
        assert_eq!(decoded.words, words.len());
        let timestamp = (0x100 << 5) | 3;
        assert_eq!(
            addresses(&decoded),
            vec![
                (0xe000 + 3 * 128 + 5, Some(1000), timestamp),
                (0xe000 + 3 * 128 + 9, Some(2000), timestamp)
            ]
        );
    }

    #[test]
    fn test_duplicate_channels_dropped() {
        let words = tdc_event(
            0,
            0x10,
            &[measurement(5, 1), measurement(5, 2), measurement(6, 3)],
        );
        let decoded = decoder()
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap();
        assert_eq!(addresses(&decoded).len(), 2);
        assert_eq!(addresses(&decoded)[0].1, Some(1));
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_tdc_trailer_checks() {
        let header = word(TDC_HEADER, EVENT_ID.insert(TDC_NUMBER.insert(0, 1), 0x42));
        let other_tdc = word(TDC_TRAILER, EVENT_ID.insert(TDC_NUMBER.insert(0, 2), 0x42));
        let other_id = word(TDC_TRAILER, EVENT_ID.insert(TDC_NUMBER.insert(0, 1), 0x43));
        assert_eq!(check_tdc_trailer(header, other_tdc), Err(ParserState::BadFooter));
        assert_eq!(check_tdc_trailer(header, other_id), Err(ParserState::BadTriggerId));

        let mut words = tdc_event(0, 0x10, &[measurement(1, 1)]);
        words[3] = other_id;
        let failure = decoder()
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap_err();
        assert_eq!(failure.state, ParserState::BadTriggerId);
        assert_eq!(failure.word, 3);
        assert_eq!(failure.resume, words.len());
    }

    #[test]
    fn test_missing_time_tag() {
        let mut words = tdc_event(0, 0x10, &[measurement(1, 1)]);
        words.remove(4);
        let failure = decoder()
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap_err();
        assert_eq!(failure.state, ParserState::BadHighTs);
    }

    #[test]
    fn test_tdc_timestamp_wraps() {
        let mut decoder = decoder();
        let first = tdc_event(0, 0x07ff_ffff, &[measurement(1, 1)]);
        let second = tdc_event(0, 0x0000_0001, &[measurement(1, 1)]);
        let early = decoder.decode(&WordBuffer::new(&first, DaqInfo::default())).unwrap();
        let late = decoder.decode(&WordBuffer::new(&second, DaqInfo::default())).unwrap();
        assert_eq!(decoder.unwrapper().wraps(), 1);
        assert!(addresses(&late)[0].2 > addresses(&early)[0].2);
    }
}
