use std::fmt::Write;
use time::OffsetDateTime;

/// Number of words printed per line in a word dump
const WORDS_PER_LINE: usize = 8;

/// A contiguous bit range inside a 32-bit data word.
///
/// Every layout table in the decoders is written in terms of BitFields so that the
/// different firmware generations can be audited side by side. Bit 0 is the least
/// significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub shift: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// The in-place mask of the field
    pub const fn mask(&self) -> u32 {
        (((1u64 << self.width) - 1) as u32) << self.shift
    }

    /// Largest value the field can hold
    pub const fn max_value(&self) -> u32 {
        ((1u64 << self.width) - 1) as u32
    }

    /// Extract the field as an unsigned value
    pub const fn extract(&self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }

    /// Extract the field as a two's complement signed value
    pub const fn extract_signed(&self, word: u32) -> i32 {
        sign_extend(self.extract(word), self.width)
    }

    /// Write value into the field of word, leaving all other bits untouched.
    /// Bits of value which do not fit into the field are dropped.
    pub const fn insert(&self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

/// Sign extend the lowest `width` bits of value (two's complement)
pub const fn sign_extend(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

/// The packet type tag lives in the top four bits of every word
pub const TAG: BitField = BitField::new(28, 4);
/// Everything below the tag
pub const PAYLOAD: BitField = BitField::new(0, 28);

/// Raw 4-bit tag of a word
pub const fn packet_tag(word: u32) -> u8 {
    TAG.extract(word) as u8
}

/// A word is "tagged" if the top bit of its tag is set (tags 0x8 to 0xf)
pub const fn is_tagged(word: u32) -> bool {
    word & 0x8000_0000 != 0
}

/// The sixteen packet types of the GRIFFIN-family word stream.
///
/// Tags 0x0 to 0x7 carry no fixed meaning on their own; what they hold (filter ids,
/// charge/CFD pairs, scaler values...) depends on where in the record they appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Payload(u8),
    Header,
    TriggerId,
    TimestampLow,
    TimestampHigh,
    Waveform,
    NetworkPacket,
    Trailer,
    Fault,
}

impl PacketType {
    pub const fn of(word: u32) -> Self {
        match packet_tag(word) {
            0x8 => Self::Header,
            0x9 => Self::TriggerId,
            0xa => Self::TimestampLow,
            0xb => Self::TimestampHigh,
            0xc => Self::Waveform,
            0xd => Self::NetworkPacket,
            0xe => Self::Trailer,
            0xf => Self::Fault,
            tag => Self::Payload(tag),
        }
    }
}

/// Where a raw event came from: the MIDAS serial number and the wall-clock time the
/// event was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaqInfo {
    pub serial_number: u32,
    pub wall_clock: OffsetDateTime,
}

impl Default for DaqInfo {
    fn default() -> Self {
        Self {
            serial_number: 0,
            wall_clock: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

impl DaqInfo {
    pub fn new(serial_number: u32, wall_clock: OffsetDateTime) -> Self {
        Self {
            serial_number,
            wall_clock,
        }
    }

    /// MIDAS stores the event time as seconds since the unix epoch. Out of range
    /// values are clamped to the epoch.
    pub fn from_unix(serial_number: u32, seconds: i64) -> Self {
        Self {
            serial_number,
            wall_clock: OffsetDateTime::from_unix_timestamp(seconds)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        }
    }
}

/// Read-only view of the words of one located bank, plus where the event came from.
#[derive(Debug, Clone, Copy)]
pub struct WordBuffer<'a> {
    words: &'a [u32],
    daq: DaqInfo,
}

impl<'a> WordBuffer<'a> {
    pub fn new(words: &'a [u32], daq: DaqInfo) -> Self {
        Self { words, daq }
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    pub fn daq(&self) -> DaqInfo {
        self.daq
    }

    /// The buffer starting at offset. Offsets past the end give an empty buffer.
    pub fn tail(&self, offset: usize) -> Self {
        Self {
            words: self.words.get(offset..).unwrap_or(&[]),
            daq: self.daq,
        }
    }
}

/// Forward-only position in a slice of words.
///
/// Optional words are handled by peeking at the next word and advancing past it only
/// if it is wanted.
#[derive(Debug, Clone)]
pub struct WordCursor<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    pub fn new(words: &'a [u32], pos: usize) -> Self {
        Self { words, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.words.len().saturating_sub(self.pos)
    }

    pub fn peek(&self) -> Option<u32> {
        self.words.get(self.pos).copied()
    }

    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    pub fn next_word(&mut self) -> Option<u32> {
        let word = self.peek()?;
        self.pos += 1;
        Some(word)
    }
}

/// Format words as a hex dump, eight per line, marking the word at `highlight`.
pub fn format_words(words: &[u32], highlight: Option<usize>) -> String {
    let mut dump = String::new();
    for (row, chunk) in words.chunks(WORDS_PER_LINE).enumerate() {
        let _ = write!(dump, "{:5}:", row * WORDS_PER_LINE);
        for (col, word) in chunk.iter().enumerate() {
            let index = row * WORDS_PER_LINE + col;
            if Some(index) == highlight {
                let _ = write!(dump, " >{word:08x}<");
            } else {
                let _ = write!(dump, "  {word:08x} ");
            }
        }
        dump.push('\n');
    }
    dump
}
