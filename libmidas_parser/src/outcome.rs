use std::fmt::Display;
use thiserror::Error;

use super::fragment::{Fragment, FragmentBuilder};
use super::ppg::PpgData;
use super::scaler::ScalerData;

/// Classification of a decode attempt.
///
/// Exactly one ParserState is attached to every attempt; anything other than Good
/// means the attempt produced a BadFragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParserState {
    #[default]
    Good,
    BadHeader,
    MissingWords,
    BadScalerLowTs,
    BadScalerValue,
    BadScalerType,
    BadTriggerId,
    BadLowTs,
    BadHighTs,
    SecondHeader,
    WrongNofWords,
    NotSingleCfd,
    SizeMismatch,
    BadFooter,
    Fault,
    MissingPsd,
    MissingCfd,
    MissingCharge,
    BadBank,
    BadModuleType,
    EndOfData,
    BadRfScalerWord,
}

impl ParserState {
    pub fn is_good(&self) -> bool {
        *self == Self::Good
    }

    /// EndOfData means the bank is too short for a fixed size record, no point in
    /// scanning the rest of it.
    pub fn is_fatal(&self) -> bool {
        *self == Self::EndOfData
    }
}

impl Display for ParserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Good => "good",
            Self::BadHeader => "bad header",
            Self::MissingWords => "missing words",
            Self::BadScalerLowTs => "bad scaler low timestamp",
            Self::BadScalerValue => "bad scaler value",
            Self::BadScalerType => "bad scaler type",
            Self::BadTriggerId => "bad trigger id",
            Self::BadLowTs => "bad low timestamp",
            Self::BadHighTs => "bad high timestamp",
            Self::SecondHeader => "second header before trailer",
            Self::WrongNofWords => "wrong number of words",
            Self::NotSingleCfd => "too many cfd/charge pairs",
            Self::SizeMismatch => "size mismatch",
            Self::BadFooter => "bad footer",
            Self::Fault => "fault reported by the daq",
            Self::MissingPsd => "missing psd word",
            Self::MissingCfd => "missing cfd word",
            Self::MissingCharge => "missing charge word",
            Self::BadBank => "unknown bank",
            Self::BadModuleType => "unknown module type",
            Self::EndOfData => "premature end of data",
            Self::BadRfScalerWord => "bad rf scaler word",
        };
        write!(f, "{text}")
    }
}

/// Keeps the first failure of a decode attempt. Any further failure only raises the
/// multiple errors flag; the original classification is never overwritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTracker {
    state: ParserState,
    word: Option<usize>,
    multiple: bool,
}

impl ErrorTracker {
    pub fn fail(&mut self, state: ParserState, word: usize) {
        if self.word.is_none() {
            self.state = state;
            self.word = Some(word);
        } else {
            self.multiple = true;
        }
    }

    pub fn is_good(&self) -> bool {
        self.word.is_none()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn word(&self) -> Option<usize> {
        self.word
    }

    pub fn multiple_errors(&self) -> bool {
        self.multiple
    }

    /// Turn the recorded failure into a Failure; `resume` is where scanning should
    /// continue. Only meaningful after fail has been called.
    pub fn into_failure(self, resume: usize, partial: FragmentBuilder) -> Failure {
        Failure {
            state: self.state,
            word: self.word.unwrap_or(resume),
            resume,
            multiple_errors: self.multiple,
            partial: Box::new(partial),
        }
    }
}

/// A classified failure of one record. Word indices are relative to the start of the
/// buffer the decoder was given.
#[derive(Debug, Clone, Error)]
#[error("{state} at word {word}")]
pub struct Failure {
    pub state: ParserState,
    /// The first word at which decoding failed
    pub word: usize,
    /// Where the caller should continue scanning
    pub resume: usize,
    pub multiple_errors: bool,
    /// Whatever had been decoded when the failure happened
    pub partial: Box<FragmentBuilder>,
}

impl Failure {
    /// A failure which resumes scanning right after the failing word
    pub fn at(state: ParserState, word: usize, partial: FragmentBuilder) -> Self {
        Self {
            state,
            word,
            resume: word + 1,
            multiple_errors: false,
            partial: Box::new(partial),
        }
    }

    /// A failure which resumes scanning at the failing word itself (used when the
    /// failing word is the start of the next record)
    pub fn resync(state: ParserState, word: usize, partial: FragmentBuilder) -> Self {
        Self {
            state,
            word,
            resume: word,
            multiple_errors: false,
            partial: Box::new(partial),
        }
    }

    /// Shift word indices by offset, used when the decoder ran on a tail of the bank
    pub fn offset(mut self, offset: usize) -> Self {
        self.word += offset;
        self.resume += offset;
        self
    }
}

/// Anything a decoder can hand to the OutputRouter
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Fragment(Fragment),
    Ppg(PpgData),
    Scaler(ScalerData),
}

/// A successful decode: the number of words consumed and the records produced.
/// Records dropped on purpose (missing channels, duplicates) are counted in skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub words: usize,
    pub records: Vec<Record>,
    pub skipped: usize,
}

impl Decoded {
    pub fn new(words: usize) -> Self {
        Self {
            words,
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn push_fragments(&mut self, fragments: Vec<Fragment>) {
        self.records
            .extend(fragments.into_iter().map(Record::Fragment));
    }
}

pub type DecodeResult = Result<Decoded, Failure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_wins() {
        let mut tracker = ErrorTracker::default();
        assert!(tracker.is_good());
        tracker.fail(ParserState::MissingCharge, 4);
        tracker.fail(ParserState::BadFooter, 9);
        assert_eq!(tracker.state(), ParserState::MissingCharge);
        assert_eq!(tracker.word(), Some(4));
        assert!(tracker.multiple_errors());

        let failure = tracker.into_failure(10, FragmentBuilder::default());
        assert_eq!(failure.state, ParserState::MissingCharge);
        assert_eq!(failure.word, 4);
        assert_eq!(failure.resume, 10);
        assert!(failure.multiple_errors);
    }

    #[test]
    fn test_failure_offset() {
        let failure = Failure::resync(ParserState::SecondHeader, 3, FragmentBuilder::default());
        let failure = failure.offset(10);
        assert_eq!(failure.word, 13);
        assert_eq!(failure.resume, 13);
        assert_eq!(failure.to_string(), "second header before trailer at word 13");
    }
}
