use super::constants::{PPG_DETECTOR_TYPE, SCALER_DETECTOR_TYPE};
use super::outcome::{DecodeResult, Decoded, Failure, ParserState};
use super::words::{format_words, DaqInfo};

/// Second charge and zero crossing of a particle discriminating detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Psd {
    pub charge: i32,
    pub zero_crossing: u32,
}

/// One charge/CFD tuple. Pile-up resolving firmware can report several per fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hit {
    pub cfd: i32,
    pub charge: i32,
    pub integration_length: u32,
    pub psd: Option<Psd>,
}

/// A decoded single-channel hit.
///
/// A Fragment always has an address and a timestamp; everything else depends on the
/// digitizer that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub daq: DaqInfo,
    pub address: u32,
    pub detector_type: u8,
    pub module_type: u8,
    /// Raw timestamp, units depend on the digitizer family
    pub timestamp: u64,
    pub cfd: Option<i32>,
    pub charge: Option<i32>,
    pub integration_length: Option<u32>,
    pub psd: Option<Psd>,
    pub filter_pattern: Option<u32>,
    pub filter_ids: Vec<u32>,
    pub waveform: Vec<i16>,
    pub pileups: Option<u8>,
    pub deadtime: Option<u16>,
    pub trigger_id: Option<u32>,
    pub network_packet: Option<u32>,
    /// Position of this fragment among the hits of its record
    pub hit_index: u8,
    /// Number of hits in the record this fragment came from
    pub hits: u8,
}

impl Fragment {
    pub fn has_waveform(&self) -> bool {
        !self.waveform.is_empty()
    }
}

/// What the record under construction turns into once decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordClass {
    #[default]
    Fragment,
    Ppg,
    Scaler,
}

/// Accumulates the fields of a fragment while a decoder walks the words.
///
/// One builder is owned by one decode attempt. On success it is turned into one
/// Fragment per collected hit, on failure it ends up inside the BadFragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentBuilder {
    pub daq: DaqInfo,
    pub class: RecordClass,
    pub address: Option<u32>,
    pub detector_type: u8,
    pub module_type: u8,
    pub pileups: Option<u8>,
    /// Word count announced by the header, if the format has one
    pub word_count: Option<u32>,
    pub network_packet: Option<u32>,
    pub filter_pattern: Option<u32>,
    pub filter_ids: Vec<u32>,
    pub trigger_id: Option<u32>,
    pub timestamp: Option<u64>,
    pub deadtime: Option<u16>,
    pub waveform: Vec<i16>,
    /// Single-hit formats fill cfd and charge directly
    pub cfd: Option<i32>,
    pub charge: Option<i32>,
    pub psd: Option<Psd>,
    /// Multi-hit formats fill hits instead
    pub hits: Vec<Hit>,
}

impl FragmentBuilder {
    pub fn new(daq: DaqInfo) -> Self {
        Self {
            daq,
            ..Default::default()
        }
    }

    /// OR value, shifted by shift, into the timestamp
    pub fn append_timestamp(&mut self, value: u64, shift: u32) {
        self.timestamp = Some(self.timestamp.unwrap_or(0) | (value << shift));
    }

    /// Does the builder hold any measured quantity
    pub fn has_data(&self) -> bool {
        self.cfd.is_some() || self.charge.is_some() || !self.hits.is_empty()
    }

    /// Start the next fragment of the same trigger, keeping identity and timing
    pub fn follow_on(&self) -> Self {
        Self {
            daq: self.daq,
            address: self.address,
            detector_type: self.detector_type,
            module_type: self.module_type,
            trigger_id: self.trigger_id,
            timestamp: self.timestamp,
            ..Default::default()
        }
    }

    /// Key the diagnostics tally this record under
    pub fn diagnostics_key(&self) -> i32 {
        match self.class {
            RecordClass::Fragment => self.detector_type as i32,
            RecordClass::Ppg => PPG_DETECTOR_TYPE,
            RecordClass::Scaler => SCALER_DETECTOR_TYPE,
        }
    }

    fn base_fragment(&self, address: u32, timestamp: u64) -> Fragment {
        Fragment {
            daq: self.daq,
            address,
            detector_type: self.detector_type,
            module_type: self.module_type,
            timestamp,
            cfd: self.cfd,
            charge: self.charge,
            integration_length: None,
            psd: self.psd,
            filter_pattern: self.filter_pattern,
            filter_ids: self.filter_ids.clone(),
            waveform: Vec::new(),
            pileups: self.pileups,
            deadtime: self.deadtime,
            trigger_id: self.trigger_id,
            network_packet: self.network_packet,
            hit_index: 0,
            hits: 1,
        }
    }

    /// Check that the builder can be finalized, returning its address and timestamp
    pub fn validate(&self) -> Result<(u32, u64), ParserState> {
        let address = self.address.ok_or(ParserState::BadHeader)?;
        let timestamp = self.timestamp.ok_or(ParserState::BadLowTs)?;
        Ok((address, timestamp))
    }

    /// Finalize into one Fragment per hit.
    ///
    /// All fragments share address, timestamp and detector type; each carries its own
    /// charge, CFD and integration length.
    pub fn finish(self) -> Result<Vec<Fragment>, ParserState> {
        let (address, timestamp) = self.validate()?;
        Ok(self.build(address, timestamp))
    }

    /// Finalize into a Decoded of `words` words, or a Failure at `word` if the builder
    /// is incomplete
    pub fn into_decoded(self, words: usize, word: usize) -> DecodeResult {
        match self.validate() {
            Ok((address, timestamp)) => {
                let mut decoded = Decoded::new(words);
                decoded.push_fragments(self.build(address, timestamp));
                Ok(decoded)
            }
            Err(state) => Err(Failure::at(state, word, self)),
        }
    }

    fn build(self, address: u32, timestamp: u64) -> Vec<Fragment> {
        if self.hits.is_empty() {
            let mut fragment = self.base_fragment(address, timestamp);
            fragment.waveform = self.waveform;
            return vec![fragment];
        }

        let n_hits = self.hits.len() as u8;
        self.hits
            .iter()
            .enumerate()
            .map(|(index, hit)| {
                let mut fragment = self.base_fragment(address, timestamp);
                fragment.cfd = Some(hit.cfd);
                fragment.charge = Some(hit.charge);
                fragment.integration_length = Some(hit.integration_length);
                fragment.psd = hit.psd;
                fragment.waveform = self.waveform.clone();
                fragment.hit_index = index as u8;
                fragment.hits = n_hits;
                fragment
            })
            .collect()
    }
}

/// A record that failed to decode: the partial fragment, the raw words it came from,
/// and where the decoding went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct BadFragment {
    pub partial: FragmentBuilder,
    pub state: ParserState,
    pub words: Vec<u32>,
    /// Index into words of the first failing word
    pub failed_word: usize,
    pub multiple_errors: bool,
}

impl BadFragment {
    /// words must be the buffer the failure indices refer to
    pub(crate) fn new(failure: Failure, words: &[u32]) -> Self {
        let end = failure.resume.max(failure.word + 1).min(words.len());
        Self {
            partial: *failure.partial,
            state: failure.state,
            words: words[..end].to_vec(),
            failed_word: failure.word,
            multiple_errors: failure.multiple_errors,
        }
    }

    /// Human readable dump of the words with the failing word marked
    pub fn dump(&self) -> String {
        format_words(&self.words, Some(self.failed_word))
    }
}
