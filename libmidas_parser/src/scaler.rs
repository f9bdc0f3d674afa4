use super::fragment::FragmentBuilder;
use super::griffin::{read_network_packet, require, set_timestamp_low};
use super::layout::TIMESTAMP_LOW;
use super::outcome::{DecodeResult, Decoded, ErrorTracker, Failure, ParserState, Record};
use super::words::{is_tagged, BitField, DaqInfo, PacketType, WordCursor};

/// Number of counters in a scaler record
pub const N_SCALER_VALUES: usize = 4;
/// Low timestamp, values and trailer
const FIXED_WORDS: usize = 2 + N_SCALER_VALUES;

const SCALER_VALUE: BitField = BitField::new(0, 31);
// Trailer fields
const SCALER_TYPE: BitField = BitField::new(24, 4);
const REDUNDANT_LOW_TS: BitField = BitField::new(16, 8);
const SCALER_HIGH_TS: BitField = BitField::new(0, 16);
/// The bits of the low timestamp the trailer repeats
const REDUNDANT_LOW_TS_SOURCE: BitField = BitField::new(20, 8);

/// Dead-time and rate counters of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerData {
    pub daq: DaqInfo,
    pub address: u32,
    pub network_packet: Option<u32>,
    pub values: [u32; N_SCALER_VALUES],
    pub low_timestamp: u32,
    pub high_timestamp: u32,
}

impl ScalerData {
    pub fn timestamp(&self) -> u64 {
        ((self.high_timestamp as u64) << TIMESTAMP_LOW.width) | self.low_timestamp as u64
    }
}

/// Decode a scaler record. The header has already been read into builder.
///
/// The record has a fixed size, a bank too short to hold it is EndOfData.
pub fn decode_scaler(words: &[u32], mut builder: FragmentBuilder) -> DecodeResult {
    let mut cursor = WordCursor::new(words, 1);
    read_network_packet(&mut cursor, &mut builder);
    if cursor.remaining() < FIXED_WORDS {
        return Err(Failure::at(ParserState::EndOfData, words.len(), builder));
    }

    let low = match require(&mut cursor, PacketType::TimestampLow, ParserState::BadScalerLowTs) {
        Ok(word) => word,
        Err(error) => return Err(error.with(builder)),
    };
    set_timestamp_low(&mut builder, low);
    let low_timestamp = TIMESTAMP_LOW.extract(low);

    let mut tracker = ErrorTracker::default();
    let mut values = [0; N_SCALER_VALUES];
    for value in values.iter_mut() {
        let pos = cursor.pos();
        let word = cursor.next_word().unwrap_or_default();
        if PacketType::of(word) == PacketType::Header {
            tracker.fail(ParserState::SecondHeader, pos);
            return Err(tracker.into_failure(pos, builder));
        }
        if is_tagged(word) {
            tracker.fail(ParserState::BadScalerValue, pos);
        }
        *value = SCALER_VALUE.extract(word);
    }

    let pos = cursor.pos();
    let trailer = match require(&mut cursor, PacketType::Trailer, ParserState::BadFooter) {
        Ok(word) => word,
        Err(error) => {
            tracker.fail(error.state, error.word);
            let resume = if error.resync { error.word } else { pos + 1 };
            return Err(tracker.into_failure(resume, builder));
        }
    };
    if SCALER_TYPE.extract(trailer) != 0 {
        tracker.fail(ParserState::BadScalerType, pos);
    }
    if REDUNDANT_LOW_TS.extract(trailer) != REDUNDANT_LOW_TS_SOURCE.extract(low_timestamp) {
        tracker.fail(ParserState::BadScalerLowTs, pos);
    }
    let high_timestamp = SCALER_HIGH_TS.extract(trailer);
    builder.append_timestamp(high_timestamp as u64, TIMESTAMP_LOW.width);

    if !tracker.is_good() {
        return Err(tracker.into_failure(pos + 1, builder));
    }

    let address = match builder.validate() {
        Ok((address, _)) => address,
        Err(state) => return Err(Failure::at(state, 0, builder)),
    };
    let mut decoded = Decoded::new(pos + 1);
    decoded.push(Record::Scaler(ScalerData {
        daq: builder.daq,
        address,
        network_packet: builder.network_packet,
        values,
        low_timestamp,
        high_timestamp,
    }));
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SCALER_DETECTOR_TYPE;
    use crate::griffin::tests::{decoder, header_word};
    use crate::layout::BankLayout;
    use crate::words::WordBuffer;

    const LOW: u32 = 0x0ab0_0123;

    fn scaler_words() -> Vec<u32> {
        let trailer = 0xe000_0000 | REDUNDANT_LOW_TS.insert(0, LOW >> 20) | 0x0042;
        vec![
            header_word(BankLayout::Grf2, 0x0040, 4, 1),
            0xd000_0001,
            0xa000_0000 | LOW,
            100,
            200,
            0x7fff_ffff,
            0,
            trailer,
        ]
    }

    fn decode(words: &[u32]) -> DecodeResult {
        decoder(Default::default())
            .decode(&WordBuffer::new(words, DaqInfo::default()), BankLayout::Grf2)
    }

    #[test]
    fn test_decode_scaler() {
        let words = scaler_words();
        let decoded = decode(&words).unwrap();
        assert_eq!(decoded.words, words.len());
        match &decoded.records[0] {
            Record::Scaler(scaler) => {
                assert_eq!(scaler.address, 0x40);
                assert_eq!(scaler.values, [100, 200, 0x7fff_ffff, 0]);
                assert_eq!(scaler.low_timestamp, LOW);
                assert_eq!(scaler.high_timestamp, 0x42);
                assert_eq!(scaler.timestamp(), (0x42 << 28) | LOW as u64);
            }
            other => panic!("expected a scaler record, got {other:?}"),
        }
    }

    #[test]
    fn test_scaler_checks() {
        let mut words = scaler_words();
        words[4] |= 0x8000_0000;
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::BadScalerValue);
        assert_eq!(failure.word, 4);
        assert_eq!(failure.resume, words.len());
        assert_eq!(failure.partial.diagnostics_key(), SCALER_DETECTOR_TYPE);

        let mut words = scaler_words();
        words[7] = SCALER_TYPE.insert(words[7], 2);
        assert_eq!(decode(&words).unwrap_err().state, ParserState::BadScalerType);

        let mut words = scaler_words();
        words[7] = REDUNDANT_LOW_TS.insert(words[7], 0);
        assert_eq!(decode(&words).unwrap_err().state, ParserState::BadScalerLowTs);

        let mut words = scaler_words();
        words[2] = 0xb000_0000;
        assert_eq!(decode(&words).unwrap_err().state, ParserState::BadScalerLowTs);
    }

    #[test]
    fn test_scaler_second_header() {
        // one value short, the trailer takes the place of the last value
        let mut words = scaler_words();
        words.remove(6);
        let next = words.len();
        words.push(header_word(BankLayout::Grf2, 0x0041, 4, 1));
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.state, ParserState::BadScalerValue);
        assert_eq!(failure.word, 6);
        assert!(failure.multiple_errors);
        assert_eq!(failure.resume, next);

        // two values short, the next header lands among the values
        let mut words = scaler_words();
        words.drain(5..7);
        let next = words.len();
        words.push(header_word(BankLayout::Grf2, 0x0041, 4, 1));
        words.extend([0; 2]);
        let failure = decode(&words).unwrap_err();
        assert_eq!(failure.resume, next);
    }

    #[test]
    fn test_short_scaler_is_end_of_data() {
        let words = &scaler_words()[..6];
        let failure = decode(words).unwrap_err();
        assert_eq!(failure.state, ParserState::EndOfData);
        assert!(failure.state.is_fatal());
    }
}
