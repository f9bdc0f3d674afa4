//! Decoder for CAEN digitizers running DPP-PSD (CAEN banks) or DPP-PHA (CPHA banks)
//! firmware.
//!
//! Data come in board aggregates: a four word board header, then one channel pair
//! aggregate per bit set in the dual channel mask, each holding any number of events.
use std::sync::Arc;

use bitvec::prelude::*;

use super::channel_map::ChannelRegistry;
use super::config::DecoderOptions;
use super::constants::CAEN_ADDRESS_BASE;
use super::fragment::{FragmentBuilder, Psd};
use super::outcome::{DecodeResult, Decoded, ErrorTracker, Failure, ParserState};
use super::words::{packet_tag, BitField, WordBuffer};

const BOARD_HEADER_WORDS: usize = 4;
const AGGREGATE_TAG: u8 = 0xa;

// Board aggregate header
const AGGREGATE_SIZE: BitField = BitField::new(0, 28);
const BOARD_ID: BitField = BitField::new(27, 5);
const BOARD_FAIL: BitField = BitField::new(26, 1);
const CHANNEL_MASK: BitField = BitField::new(0, 8);
// Channel pair header and format word
const PAIR_FLAG: BitField = BitField::new(31, 1);
const PAIR_SIZE: BitField = BitField::new(0, 22);
const EXTRAS_ENABLED: BitField = BitField::new(28, 1);
const SAMPLES_ENABLED: BitField = BitField::new(27, 1);
const EXTRAS_OPTION: BitField = BitField::new(24, 3);
const SAMPLES_OVER_EIGHT: BitField = BitField::new(0, 16);
// Event
const ODD_CHANNEL: BitField = BitField::new(31, 1);
const TIME_TAG: BitField = BitField::new(0, 31);
const TIME_TAG_WIDTH: u32 = 31;
const SAMPLES: [BitField; 2] = [BitField::new(0, 14), BitField::new(16, 14)];
const EXTENDED_TIME: BitField = BitField::new(16, 16);
const FINE_TIME: BitField = BitField::new(0, 10);
const PILEUP: BitField = BitField::new(15, 1);
// DPP-PSD charge word
const CHARGE_LONG: BitField = BitField::new(16, 16);
const CHARGE_SHORT: BitField = BitField::new(0, 15);
// DPP-PHA energy word, bits 16 to 25 hold the extras
const ENERGY: BitField = BitField::new(0, 15);

/// Which DPP firmware wrote the bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaenFirmware {
    Psd,
    Pha,
}

impl CaenFirmware {
    pub fn bank_name(&self) -> &'static str {
        match self {
            Self::Psd => "CAEN",
            Self::Pha => "CPHA",
        }
    }
}

pub fn is_aggregate_header(word: u32) -> bool {
    packet_tag(word) == AGGREGATE_TAG
}

pub fn caen_address(board: u32, channel: u32) -> u32 {
    CAEN_ADDRESS_BASE | (board << 4) | channel
}

/// Layout of the events of one channel pair, from its format word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFormat {
    pub samples: usize,
    pub extras: bool,
    pub extras_option: u32,
}

impl EventFormat {
    pub fn from_word(word: u32) -> Self {
        let samples = if SAMPLES_ENABLED.extract(word) != 0 {
            SAMPLES_OVER_EIGHT.extract(word) as usize * 8
        } else {
            0
        };
        Self {
            samples,
            extras: EXTRAS_ENABLED.extract(word) != 0,
            extras_option: EXTRAS_OPTION.extract(word),
        }
    }

    /// Time tag, waveform, extras and charge words
    pub fn event_words(&self) -> usize {
        2 + self.samples / 2 + self.extras as usize
    }
}

pub struct CaenDecoder {
    registry: Arc<dyn ChannelRegistry>,
    options: DecoderOptions,
    firmware: CaenFirmware,
}

impl CaenDecoder {
    pub fn new(
        registry: Arc<dyn ChannelRegistry>,
        options: DecoderOptions,
        firmware: CaenFirmware,
    ) -> Self {
        Self {
            registry,
            options,
            firmware,
        }
    }

    /// Decode the board aggregate that starts at the first word of the buffer
    pub fn decode(&self, buffer: &WordBuffer) -> DecodeResult {
        let words = buffer.words();
        let daq = buffer.daq();
        let empty = || FragmentBuilder::new(daq);
        let header = match words.first() {
            Some(word) if is_aggregate_header(*word) => *word,
            Some(_) => return Err(Failure::at(ParserState::BadHeader, 0, empty())),
            None => return Err(Failure::at(ParserState::MissingWords, 0, empty())),
        };
        let size = AGGREGATE_SIZE.extract(header) as usize;
        if size < BOARD_HEADER_WORDS {
            return Err(Failure::at(ParserState::BadHeader, 0, empty()));
        }
        if size > words.len() {
            let mut failure = Failure::at(ParserState::SizeMismatch, 0, empty());
            failure.resume = words.len();
            return Err(failure);
        }

        let board_word = words[1];
        let board = BOARD_ID.extract(board_word);
        if BOARD_FAIL.extract(board_word) != 0 {
            spdlog::warn!("CAEN board {board} reports a board failure");
        }
        let mask = CHANNEL_MASK.extract(board_word) as u8;

        let mut tracker = ErrorTracker::default();
        let mut decoded = Decoded::new(size);
        let mut pos = BOARD_HEADER_WORDS;
        for pair in mask.view_bits::<Lsb0>().iter_ones() {
            let pair_header = match words.get(pos) {
                Some(word) if pos < size => *word,
                _ => {
                    tracker.fail(ParserState::SizeMismatch, pos);
                    break;
                }
            };
            if PAIR_FLAG.extract(pair_header) == 0 {
                tracker.fail(ParserState::BadHeader, pos);
                break;
            }
            let pair_end = pos + PAIR_SIZE.extract(pair_header) as usize;
            if pair_end > size || pos + 2 > pair_end {
                tracker.fail(ParserState::SizeMismatch, pos);
                break;
            }
            let format = EventFormat::from_word(words[pos + 1]);

            let mut event = pos + 2;
            while event < pair_end {
                let end = event + format.event_words();
                if end > pair_end {
                    tracker.fail(ParserState::SizeMismatch, event);
                    break;
                }
                let mut builder = empty();
                let address =
                    self.read_event(&mut builder, &words[event..end], &format, board, pair as u32);
                if !self.accept(&mut builder, address) {
                    decoded.skipped += 1;
                } else {
                    match builder.finish() {
                        Ok(fragments) => decoded.push_fragments(fragments),
                        Err(state) => tracker.fail(state, event),
                    }
                }
                event = end;
            }
            pos = pair_end;
        }

        if !tracker.is_good() {
            return Err(tracker.into_failure(size, empty()));
        }
        Ok(decoded)
    }

    /// Fill the builder from the words of one event, returning the channel address
    fn read_event(
        &self,
        builder: &mut FragmentBuilder,
        words: &[u32],
        format: &EventFormat,
        board: u32,
        pair: u32,
    ) -> u32 {
        let time_tag = words[0];
        let channel = 2 * pair + ODD_CHANNEL.extract(time_tag);
        let address = caen_address(board, channel);
        builder.address = Some(address);
        builder.append_timestamp(TIME_TAG.extract(time_tag) as u64, 0);

        let n_waveform = format.samples / 2;
        if self.options.record_waveforms {
            for word in &words[1..1 + n_waveform] {
                for field in SAMPLES {
                    builder.waveform.push(field.extract(*word) as i16);
                }
            }
        }
        if format.extras {
            let extras = words[1 + n_waveform];
            builder.append_timestamp(EXTENDED_TIME.extract(extras) as u64, TIME_TAG_WIDTH);
            builder.cfd = Some(FINE_TIME.extract(extras) as i32);
        }

        let charge = words[words.len() - 1];
        if PILEUP.extract(charge) != 0 {
            builder.pileups = Some(1);
        }
        match self.firmware {
            CaenFirmware::Psd => {
                builder.charge = Some(CHARGE_LONG.extract(charge) as i32);
                builder.psd = Some(Psd {
                    charge: CHARGE_SHORT.extract(charge) as i32,
                    zero_crossing: 0,
                });
            }
            CaenFirmware::Pha => builder.charge = Some(ENERGY.extract(charge) as i32),
        }
        address
    }

    /// False if the channel is unknown and unknown channels are dropped
    fn accept(&self, builder: &mut FragmentBuilder, address: u32) -> bool {
        match self.registry.lookup(address) {
            Some(info) => {
                builder.detector_type = info.detector_type;
                true
            }
            None => self.options.ignore_missing_channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::{ChannelInfo, ChannelMap};
    use crate::digitizer::DigitizerType;
    use crate::outcome::Record;
    use crate::words::DaqInfo;

    /// One aggregate of board 3 with a single pair (channels 2 and 3), two events
    fn aggregate(charge_words: [u32; 2]) -> Vec<u32> {
        let format = SAMPLES_OVER_EIGHT.insert(0, 1) | (1 << 27) | (1 << 28);
        let mut pair = vec![0, format];
        for (index, charge) in charge_words.iter().enumerate() {
            pair.push(ODD_CHANNEL.insert(TIME_TAG.insert(0, 1000 + index as u32), index as u32));
            pair.extend([0x0002_0001, 0x0004_0003, 0x0006_0005, 0x0008_0007]);
            pair.push(EXTENDED_TIME.insert(FINE_TIME.insert(0, 12), 2));
            pair.push(*charge);
        }
        pair[0] = PAIR_FLAG.insert(PAIR_SIZE.insert(0, pair.len() as u32), 1);

        let size = (BOARD_HEADER_WORDS + pair.len()) as u32;
        let mut words = vec![
            0xa000_0000 | AGGREGATE_SIZE.insert(0, size),
            BOARD_ID.insert(CHANNEL_MASK.insert(0, 0b10), 3),
            1,
            0,
        ];
        words.extend(pair);
        words
    }

    fn registry() -> Arc<dyn ChannelRegistry> {
        let mut map = ChannelMap::default();
        map.insert(
            caen_address(3, 2),
            ChannelInfo {
                name: "ZDS01XN00X".to_string(),
                digitizer: DigitizerType::Caen,
                detector_type: 10,
                time_offset: 0,
            },
        );
        Arc::new(map)
    }

    fn fragments(decoded: &Decoded) -> Vec<&crate::fragment::Fragment> {
        decoded
            .records
            .iter()
            .filter_map(|record| match record {
                Record::Fragment(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decode_psd() {
        let charge = CHARGE_LONG.insert(CHARGE_SHORT.insert(0, 300), 2000);
        let words = aggregate([charge, charge | (1 << 15)]);
        let decoder = CaenDecoder::new(registry(), DecoderOptions::default(), CaenFirmware::Psd);
        let decoded = decoder
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap();
        assert_eq!(decoded.words, words.len());
        let frags = fragments(&decoded);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].address, 0xc032);
        assert_eq!(frags[1].address, 0xc033);
        assert_eq!(frags[0].detector_type, 10);
        assert_eq!(frags[0].timestamp, (2 << 31) | 1000);
        assert_eq!(frags[0].charge, Some(2000));
        assert_eq!(frags[0].psd.map(|psd| psd.charge), Some(300));
        assert_eq!(frags[0].cfd, Some(12));
        assert_eq!(frags[0].waveform, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frags[1].pileups, Some(1));
    }

    #[test]
    fn test_decode_pha() {
        let energy = ENERGY.insert(0, 1234) | (5 << 16);
        let words = aggregate([energy, energy]);
        let options = DecoderOptions {
            ignore_missing_channel: false,
            ..Default::default()
        };
        let decoder = CaenDecoder::new(registry(), options, CaenFirmware::Pha);
        let decoded = decoder
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap();
        let frags = fragments(&decoded);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].charge, Some(1234));
        assert_eq!(frags[0].psd, None);
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_size_mismatch() {
        let words = aggregate([0, 0]);
        let short = &words[..words.len() - 1];
        let decoder = CaenDecoder::new(registry(), DecoderOptions::default(), CaenFirmware::Psd);
        let failure = decoder
            .decode(&WordBuffer::new(short, DaqInfo::default()))
            .unwrap_err();
        assert_eq!(failure.state, ParserState::SizeMismatch);
        assert_eq!(failure.resume, short.len());

        // an event running past its pair
        let mut words = aggregate([0, 0]);
        words[4] = PAIR_SIZE.insert(words[4], 10);
        let failure = decoder
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap_err();
        assert_eq!(failure.state, ParserState::SizeMismatch);
        assert_eq!(failure.resume, words.len());

        let mut words = aggregate([0, 0]);
        words[4] &= !(1 << 31);
        let failure = decoder
            .decode(&WordBuffer::new(&words, DaqInfo::default()))
            .unwrap_err();
        assert_eq!(failure.state, ParserState::BadHeader);
        assert_eq!(failure.word, 4);
    }

    #[test]
    fn test_event_format() {
        let format = EventFormat::from_word(SAMPLES_OVER_EIGHT.insert(0, 2) | (1 << 27));
        assert_eq!(format.samples, 16);
        assert!(!format.extras);
        assert_eq!(format.event_words(), 10);
        // sample count is ignored when samples are disabled
        let format = EventFormat::from_word(SAMPLES_OVER_EIGHT.insert(0, 2));
        assert_eq!(format.event_words(), 2);
    }
}
