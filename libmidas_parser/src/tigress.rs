//! Decoder for the legacy TIG10/TIG64 digitizers (WFDN banks).
//!
//! One record is one trigger: an event header, the event timestamp, then any number of
//! channels each opened by a channel header, closed by the event trailer.
use std::sync::Arc;

use super::channel_map::ChannelRegistry;
use super::config::DecoderOptions;
use super::digitizer::DigitizerType;
use super::fragment::FragmentBuilder;
use super::outcome::{DecodeResult, Decoded, ErrorTracker, Failure, ParserState};
use super::words::{sign_extend, BitField, PacketType, WordBuffer};

const EVENT_TRIGGER_ID: BitField = BitField::new(0, 28);
const TIMESTAMP_SUBTYPE: BitField = BitField::new(24, 4);
const TIMESTAMP_VALUE: BitField = BitField::new(0, 24);
const TIMESTAMP_HIGH_SHIFT: u32 = 24;
const CHANNEL_ADDRESS: BitField = BitField::new(0, 24);
const SAMPLES: [BitField; 2] = [BitField::new(0, 14), BitField::new(16, 14)];
const CFD: BitField = BitField::new(0, 24);
const TRAILER_TRIGGER_ID: BitField = BitField::new(0, 14);

// 0x1 trapezoid and 0xf filler words carry nothing we keep
const WAVEFORM_TAG: u8 = 0x0;
const CFD_TAG: u8 = 0x4;
const CHARGE_TAG: u8 = 0x5;

/// A 14 bit waveform sample. Bit 13 is the sign, negative samples are read from the low
/// 13 bits of the two's complement, so 0x2000 is 0 and 0x3fff is -1.
pub fn legacy_sample(value: u32) -> i16 {
    let value = value & 0x3fff;
    if value & 0x2000 != 0 {
        -((((value as i32).wrapping_neg()) & 0x1fff) as i16)
    } else {
        value as i16
    }
}

/// Two's complement charge, the width depends on the digitizer
pub fn legacy_charge(word: u32, digitizer: DigitizerType) -> i32 {
    let bits = digitizer.legacy_charge_bits();
    sign_extend(BitField::new(0, bits).extract(word), bits)
}

pub fn set_event_header(builder: &mut FragmentBuilder, word: u32) {
    builder.trigger_id = Some(EVENT_TRIGGER_ID.extract(word));
}

pub fn set_timestamp(builder: &mut FragmentBuilder, word: u32) {
    match TIMESTAMP_SUBTYPE.extract(word) {
        0 => builder.append_timestamp(TIMESTAMP_VALUE.extract(word) as u64, 0),
        1 => builder.append_timestamp(
            TIMESTAMP_VALUE.extract(word) as u64,
            TIMESTAMP_HIGH_SHIFT,
        ),
        _ => (),
    }
}

pub fn add_samples(builder: &mut FragmentBuilder, word: u32) {
    for field in SAMPLES {
        builder.waveform.push(legacy_sample(field.extract(word)));
    }
}

pub fn check_trailer(builder: &FragmentBuilder, word: u32) -> Result<(), ParserState> {
    match builder.trigger_id {
        Some(id) if TRAILER_TRIGGER_ID.extract(word) != id & TRAILER_TRIGGER_ID.max_value() => {
            Err(ParserState::BadFooter)
        }
        _ => Ok(()),
    }
}

pub struct TigressDecoder {
    registry: Arc<dyn ChannelRegistry>,
    options: DecoderOptions,
}

impl TigressDecoder {
    pub fn new(registry: Arc<dyn ChannelRegistry>, options: DecoderOptions) -> Self {
        Self { registry, options }
    }

    /// Decode the event whose header is the first word of the buffer
    pub fn decode(&self, buffer: &WordBuffer) -> DecodeResult {
        let words = buffer.words();
        let mut event = FragmentBuilder::new(buffer.daq());
        match words.first() {
            Some(word) if PacketType::of(*word) == PacketType::Header => {
                set_event_header(&mut event, *word)
            }
            Some(_) => return Err(Failure::at(ParserState::BadHeader, 0, event)),
            None => return Err(Failure::at(ParserState::MissingWords, 0, event)),
        }

        let mut tracker = ErrorTracker::default();
        let mut decoded = Decoded::default();
        let mut channel: Option<FragmentBuilder> = None;
        let mut digitizer = DigitizerType::Tig10;
        let mut skipping = false;

        let mut pos = 1;
        while let Some(&word) = words.get(pos) {
            match PacketType::of(word) {
                PacketType::Header => {
                    tracker.fail(ParserState::SecondHeader, pos);
                    return Err(tracker.into_failure(pos, channel.unwrap_or(event)));
                }
                PacketType::TimestampLow => {
                    set_timestamp(&mut event, word);
                    if let Some(builder) = channel.as_mut() {
                        set_timestamp(builder, word);
                    }
                }
                // 0xc opens a channel
                PacketType::Waveform => {
                    if let Some(builder) = channel.take() {
                        if !skipping {
                            self.emit(builder, &mut decoded, &mut tracker, pos);
                        }
                    }
                    let mut builder = event.follow_on();
                    builder.address = Some(CHANNEL_ADDRESS.extract(word));
                    skipping = false;
                    match builder.address.and_then(|a| self.registry.lookup(a)) {
                        Some(info) => {
                            digitizer = info.digitizer;
                            builder.detector_type = info.detector_type;
                        }
                        None if self.options.ignore_missing_channel => {
                            digitizer = DigitizerType::Tig10;
                        }
                        None => {
                            skipping = true;
                            decoded.skipped += 1;
                        }
                    }
                    channel = Some(builder);
                }
                PacketType::Trailer => {
                    if let Err(state) = check_trailer(&event, word) {
                        tracker.fail(state, pos);
                    }
                    if let Some(builder) = channel.take() {
                        if !skipping {
                            self.emit(builder, &mut decoded, &mut tracker, pos);
                        }
                    }
                    if !tracker.is_good() {
                        return Err(tracker.into_failure(pos + 1, event));
                    }
                    decoded.words = pos + 1;
                    return Ok(decoded);
                }
                PacketType::Payload(tag) if !skipping => {
                    let builder = match channel.as_mut() {
                        Some(builder) => builder,
                        None => {
                            tracker.fail(ParserState::BadHeader, pos);
                            pos += 1;
                            continue;
                        }
                    };
                    match tag {
                        WAVEFORM_TAG => {
                            if self.options.record_waveforms {
                                add_samples(builder, word);
                            }
                        }
                        CHARGE_TAG => builder.charge = Some(legacy_charge(word, digitizer)),
                        CFD_TAG => {
                            builder.cfd = Some(CFD.extract(word) as i32);
                            // a cfd word not followed by the trailer closes the hit
                            let closes = words
                                .get(pos + 1)
                                .is_some_and(|next| PacketType::of(*next) != PacketType::Trailer);
                            if closes {
                                let next = builder.follow_on();
                                if let Some(done) = channel.replace(next) {
                                    self.emit(done, &mut decoded, &mut tracker, pos);
                                }
                            }
                        }
                        _ => (),
                    }
                }
                _ => (),
            }
            pos += 1;
        }

        tracker.fail(ParserState::MissingWords, words.len());
        Err(tracker.into_failure(words.len(), channel.unwrap_or(event)))
    }

    /// Finish a channel if it holds anything
    fn emit(
        &self,
        builder: FragmentBuilder,
        decoded: &mut Decoded,
        tracker: &mut ErrorTracker,
        pos: usize,
    ) {
        if !builder.has_data() {
            return;
        }
        match builder.finish() {
            Ok(fragments) => decoded.push_fragments(fragments),
            Err(state) => tracker.fail(state, pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::{ChannelInfo, ChannelMap};
    use crate::outcome::Record;
    use crate::words::DaqInfo;

    fn registry() -> Arc<dyn ChannelRegistry> {
        let mut map = ChannelMap::default();
        for (address, digitizer) in [(0x10, DigitizerType::Tig10), (0x20, DigitizerType::Tig64)] {
            map.insert(
                address,
                ChannelInfo {
                    name: format!("TIG{address:02x}"),
                    digitizer,
                    detector_type: 2,
                    time_offset: 0,
                },
            );
        }
        Arc::new(map)
    }

    fn decode_with(words: &[u32], options: DecoderOptions) -> DecodeResult {
        let buffer = WordBuffer::new(words, DaqInfo::default());
        TigressDecoder::new(registry(), options).decode(&buffer)
    }

    fn decode(words: &[u32]) -> DecodeResult {
        decode_with(words, DecoderOptions::default())
    }

    fn charges(decoded: &Decoded) -> Vec<(u32, Option<i32>, Option<i32>)> {
        decoded
            .records
            .iter()
            .filter_map(|record| match record {
                Record::Fragment(f) => Some((f.address, f.charge, f.cfd)),
                _ => None,
            })
            .collect()
    }

    const EVENT: [u32; 9] = [
        0x8000_4005, // trigger id
        0xa000_0100, // low timestamp
        0xa100_0002, // high timestamp
        0xc000_0010, // channel 0x10
        0x0001_3fff, // samples -1, 1
        0x53ff_ffff, // charge, -1 in 26 bits
        0x4000_0123, // cfd
        0xc000_0020, // channel 0x20
        0x503f_ffff, // charge, -1 in 22 bits
    ];

    fn event() -> Vec<u32> {
        let mut words = EVENT.to_vec();
        words.extend([0x4000_0456, 0xe000_0005]);
        words
    }

    #[test]
    fn test_legacy_sample() {
        assert_eq!(legacy_sample(0x2000), 0);
        assert_eq!(legacy_sample(0x3fff), -1);
        assert_eq!(legacy_sample(0x3ffe), -2);
        assert_eq!(legacy_sample(0x1fff), 0x1fff);
        assert_eq!(legacy_charge(0x003f_ffff, DigitizerType::Tig64), -1);
        assert_eq!(legacy_charge(0x003f_ffff, DigitizerType::Tig10), 0x003f_ffff);
    }

    #[test]
    fn test_decode_event() {
        let words = event();
        let decoded = decode(&words).unwrap();
        assert_eq!(decoded.words, words.len());
        assert_eq!(
            charges(&decoded),
            vec![(0x10, Some(-1), Some(0x123)), (0x20, Some(-1), Some(0x456))]
        );
        match &decoded.records[0] {
            Record::Fragment(f) => {
                assert_eq!(f.timestamp, (0x2 << 24) | 0x100);
                assert_eq!(f.trigger_id, Some(0x4005));
                assert_eq!(f.waveform, vec![-1, 1]);
                assert_eq!(f.detector_type, 2);
            }
            other => panic!("expected a fragment, got {other:?}"),
        }
    }

    #[test]
    fn test_cfd_starts_follow_on() {
        // two hits on the same channel
        let words = [
            0x8000_0001,
            0xa000_0100,
            0xc000_0010,
            0x5000_0010,
            0x4000_0001,
            0x5000_0020,
            0x4000_0002,
            0xe000_0001,
        ];
        let decoded = decode(&words).unwrap();
        assert_eq!(
            charges(&decoded),
            vec![(0x10, Some(0x10), Some(1)), (0x10, Some(0x20), Some(2))]
        );
    }

    #[test]
    fn test_legacy_failures() {
        let mut words = event();
        let last = words.len() - 1;
        words[last] = 0xe000_0006;
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::BadFooter);
        assert_eq!(failure.word, last);

        let mut words = event();
        words.pop();
        assert_eq!(decode(&words).unwrap_err().state, ParserState::MissingWords);

        let mut words = event();
        words.insert(5, 0x8000_0002);
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::SecondHeader);
        assert_eq!(failure.resume, 5);

        // data before the first channel header
        let words = [0x8000_0001, 0xa000_0100, 0x5000_0010, 0xe000_0001];
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::BadHeader);
        assert_eq!(failure.word, 2);
    }

    #[test]
    fn test_missing_channel_skipped() {
        let mut words = event();
        words[7] = 0xc000_0030;
        let options = DecoderOptions {
            ignore_missing_channel: false,
            ..Default::default()
        };
        let decoded = decode_with(&words, options).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.skipped, 1);

        let decoded = decode(&words).unwrap();
        assert_eq!(decoded.records.len(), 2);
    }
}
