use std::fmt::Display;

use super::fragment::FragmentBuilder;
use super::griffin::{read_network_packet, read_timestamps, set_network_packet};
use super::layout::TIMESTAMP_HIGH_SHIFT;
use super::outcome::{DecodeResult, Decoded, Failure, ParserState, Record};
use super::words::{BitField, DaqInfo, PacketType, WordCursor};

const PPG_CODE: BitField = BitField::new(0, 16);
const LOW_TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_HIGH_SHIFT) - 1;

/// The cycle states the pattern generator reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpgPattern {
    BeamOn,
    Background,
    Decay,
    TapeMove,
    Sync,
    Junk,
    Unknown(u16),
}

impl PpgPattern {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => Self::BeamOn,
            0x0002 => Self::Background,
            0x0004 => Self::Decay,
            0x0008 => Self::TapeMove,
            0xc000 => Self::Sync,
            0xffff => Self::Junk,
            other => Self::Unknown(other),
        }
    }
}

impl Display for PpgPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeamOn => write!(f, "beam on"),
            Self::Background => write!(f, "background"),
            Self::Decay => write!(f, "decay"),
            Self::TapeMove => write!(f, "tape move"),
            Self::Sync => write!(f, "sync"),
            Self::Junk => write!(f, "junk"),
            Self::Unknown(code) => write!(f, "unknown ({code:#06x})"),
        }
    }
}

/// A change of the pattern generator state
#[derive(Debug, Clone, PartialEq)]
pub struct PpgData {
    pub daq: DaqInfo,
    pub address: u32,
    pub network_packet: Option<u32>,
    pub old_code: u16,
    pub new_code: u16,
    pub timestamp: u64,
}

impl PpgData {
    pub fn old_pattern(&self) -> PpgPattern {
        PpgPattern::from_code(self.old_code)
    }

    pub fn new_pattern(&self) -> PpgPattern {
        PpgPattern::from_code(self.new_code)
    }

    pub fn low_timestamp(&self) -> u32 {
        (self.timestamp & LOW_TIMESTAMP_MASK) as u32
    }

    pub fn high_timestamp(&self) -> u32 {
        (self.timestamp >> TIMESTAMP_HIGH_SHIFT) as u32
    }
}

/// Decode a PPG record. The header has already been read into builder.
pub fn decode_ppg(words: &[u32], mut builder: FragmentBuilder) -> DecodeResult {
    let mut cursor = WordCursor::new(words, 1);
    read_network_packet(&mut cursor, &mut builder);
    if let Err(error) = read_timestamps(&mut cursor, &mut builder) {
        return Err(error.with(builder));
    }

    let mut old_code = 0;
    let mut new_code = 0;
    loop {
        let pos = cursor.pos();
        let word = match cursor.next_word() {
            Some(word) => word,
            None => return Err(Failure::at(ParserState::MissingWords, pos, builder)),
        };
        match PacketType::of(word) {
            // 0x0 is the ppg mode, nothing to keep
            PacketType::Payload(1) => old_code = PPG_CODE.extract(word) as u16,
            PacketType::Payload(2) => new_code = PPG_CODE.extract(word) as u16,
            PacketType::NetworkPacket => set_network_packet(&mut builder, word),
            PacketType::Header => {
                return Err(Failure::resync(ParserState::SecondHeader, pos, builder))
            }
            PacketType::Trailer => {
                let (address, timestamp) = match builder.validate() {
                    Ok(pair) => pair,
                    Err(state) => return Err(Failure::at(state, pos, builder)),
                };
                let mut decoded = Decoded::new(pos + 1);
                decoded.push(Record::Ppg(PpgData {
                    daq: builder.daq,
                    address,
                    network_packet: builder.network_packet,
                    old_code,
                    new_code,
                    timestamp,
                }));
                return Ok(decoded);
            }
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::griffin::tests::{decoder, header_word, timestamp_words};
    use crate::layout::BankLayout;
    use crate::words::WordBuffer;

    fn ppg_words(layout: BankLayout) -> Vec<u32> {
        let mut words = vec![header_word(layout, layout.ppg_address(), 1, 0), 0xd000_0009];
        words.extend(timestamp_words(0x2_0000_0010));
        words.extend([0x0000_0001, 0x1000_0002, 0x2000_0004, 0xe000_0000]);
        words
    }

    #[test]
    fn test_decode_ppg() {
        for layout in BankLayout::ALL {
            let words = ppg_words(layout);
            let decoded = decoder(Default::default())
                .decode(&WordBuffer::new(&words, DaqInfo::default()), layout)
                .unwrap();
            assert_eq!(decoded.words, words.len());
            match &decoded.records[0] {
                Record::Ppg(ppg) => {
                    assert_eq!(ppg.old_pattern(), PpgPattern::Background);
                    assert_eq!(ppg.new_pattern(), PpgPattern::Decay);
                    assert_eq!(ppg.network_packet, Some(9));
                    assert_eq!(ppg.high_timestamp(), 0x20);
                    assert_eq!(ppg.low_timestamp(), 0x10);
                }
                other => panic!("expected a ppg record, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_ppg_missing_trailer() {
        let mut words = ppg_words(BankLayout::Grf2);
        words.pop();
        let decoded = decoder(Default::default())
            .decode(&WordBuffer::new(&words, DaqInfo::default()), BankLayout::Grf2);
        let failure = decoded.unwrap_err();
        assert_eq!(failure.state, ParserState::MissingWords);
        assert_eq!(failure.word, words.len());
    }

    #[test]
    fn test_ppg_pattern_codes() {
        assert_eq!(PpgPattern::from_code(0xc000), PpgPattern::Sync);
        assert_eq!(PpgPattern::from_code(0xffff), PpgPattern::Junk);
        assert_eq!(PpgPattern::from_code(0x0010), PpgPattern::Unknown(0x10));
        assert_eq!(PpgPattern::TapeMove.to_string(), "tape move");
    }
}
