use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use super::constants::{PPG_DETECTOR_TYPE, SCALER_DETECTOR_TYPE};
use super::diagnostics::Diagnostics;
use super::error::RouterError;
use super::fragment::{BadFragment, Fragment};
use super::outcome::{Decoded, Failure, Record};
use super::ppg::PpgData;
use super::scaler::ScalerData;

/// The sending ends of the four output streams
#[derive(Debug, Clone)]
pub struct Sinks {
    pub good: Sender<Fragment>,
    pub bad: Sender<BadFragment>,
    pub ppg: Sender<PpgData>,
    pub scaler: Sender<ScalerData>,
}

/// The receiving ends matching a set of Sinks
#[derive(Debug)]
pub struct SinkReceivers {
    pub good: Receiver<Fragment>,
    pub bad: Receiver<BadFragment>,
    pub ppg: Receiver<PpgData>,
    pub scaler: Receiver<ScalerData>,
}

impl Sinks {
    pub fn unbounded() -> (Self, SinkReceivers) {
        let (good, good_rx) = channel();
        let (bad, bad_rx) = channel();
        let (ppg, ppg_rx) = channel();
        let (scaler, scaler_rx) = channel();
        (
            Self {
                good,
                bad,
                ppg,
                scaler,
            },
            SinkReceivers {
                good: good_rx,
                bad: bad_rx,
                ppg: ppg_rx,
                scaler: scaler_rx,
            },
        )
    }
}

/// Number of records of each kind handed to the sinks by one delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivered {
    pub fragments: usize,
    pub ppg: usize,
    pub scaler: usize,
}

/// Sends decoded records to their sink and failed records to the bad sink, keeping the
/// diagnostics tally up to date.
pub struct OutputRouter {
    sinks: Sinks,
    diagnostics: Arc<dyn Diagnostics>,
    suppress_errors: bool,
}

impl OutputRouter {
    pub fn new(sinks: Sinks, diagnostics: Arc<dyn Diagnostics>, suppress_errors: bool) -> Self {
        Self {
            sinks,
            diagnostics,
            suppress_errors,
        }
    }

    pub fn diagnostics(&self) -> &Arc<dyn Diagnostics> {
        &self.diagnostics
    }

    pub fn deliver(&self, decoded: Decoded) -> Result<Delivered, RouterError> {
        let mut delivered = Delivered::default();
        for record in decoded.records {
            match record {
                Record::Fragment(fragment) => {
                    self.diagnostics.record_good(fragment.detector_type as i32);
                    self.sinks
                        .good
                        .send(fragment)
                        .map_err(|_| RouterError::SinkClosed("good"))?;
                    delivered.fragments += 1;
                }
                Record::Ppg(ppg) => {
                    self.diagnostics.record_good(PPG_DETECTOR_TYPE);
                    self.sinks
                        .ppg
                        .send(ppg)
                        .map_err(|_| RouterError::SinkClosed("ppg"))?;
                    delivered.ppg += 1;
                }
                Record::Scaler(scaler) => {
                    self.diagnostics.record_good(SCALER_DETECTOR_TYPE);
                    self.sinks
                        .scaler
                        .send(scaler)
                        .map_err(|_| RouterError::SinkClosed("scaler"))?;
                    delivered.scaler += 1;
                }
            }
        }
        Ok(delivered)
    }

    /// Route a failed decode. `words` must be the buffer the failure indices refer to.
    pub fn reject(&self, failure: Failure, words: &[u32]) -> Result<(), RouterError> {
        let bad = BadFragment::new(failure, words);
        self.diagnostics.record_bad(bad.partial.diagnostics_key());
        if !self.suppress_errors {
            spdlog::warn!(
                "Failed to decode record of serial number {}: {} at word {}{}\n{}",
                bad.partial.daq.serial_number,
                bad.state,
                bad.failed_word,
                if bad.multiple_errors {
                    " (multiple errors)"
                } else {
                    ""
                },
                bad.dump()
            );
        }
        self.sinks
            .bad
            .send(bad)
            .map_err(|_| RouterError::SinkClosed("bad"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::FragmentCounter;
    use crate::fragment::{FragmentBuilder, RecordClass};
    use crate::outcome::ParserState;
    use crate::words::DaqInfo;

    fn fragment(detector_type: u8) -> Fragment {
        let mut builder = FragmentBuilder::new(DaqInfo::default());
        builder.address = Some(0x10);
        builder.detector_type = detector_type;
        builder.timestamp = Some(100);
        builder.charge = Some(5);
        builder.finish().unwrap().remove(0)
    }

    #[test]
    fn test_deliver_and_reject() {
        let (sinks, receivers) = Sinks::unbounded();
        let counter = Arc::new(FragmentCounter::new());
        let router = OutputRouter::new(sinks, counter.clone(), true);

        let mut decoded = Decoded::new(4);
        decoded.push(Record::Fragment(fragment(3)));
        decoded.push(Record::Fragment(fragment(3)));
        let delivered = router.deliver(decoded).unwrap();
        assert_eq!(delivered.fragments, 2);
        assert_eq!(receivers.good.try_iter().count(), 2);

        let mut partial = FragmentBuilder::new(DaqInfo::default());
        partial.detector_type = 3;
        let failure = Failure::at(ParserState::BadFooter, 2, partial);
        router.reject(failure, &[1, 2, 3, 4, 5]).unwrap();
        let bad = receivers.bad.try_recv().unwrap();
        assert_eq!(bad.state, ParserState::BadFooter);
        assert_eq!(bad.words, vec![1, 2, 3]);
        assert_eq!(bad.failed_word, 2);

        assert_eq!(counter.tally(3).good, 2);
        assert_eq!(counter.tally(3).bad, 1);
    }

    #[test]
    fn test_reject_keys_aux_records() {
        let (sinks, receivers) = Sinks::unbounded();
        let counter = Arc::new(FragmentCounter::new());
        let router = OutputRouter::new(sinks, counter.clone(), true);

        for class in [RecordClass::Scaler, RecordClass::Ppg, RecordClass::Scaler] {
            let mut partial = FragmentBuilder::new(DaqInfo::default());
            partial.detector_type = 1;
            partial.class = class;
            let failure = Failure::at(ParserState::BadScalerLowTs, 1, partial);
            router.reject(failure, &[0x8000_0100, 0xb000_0000]).unwrap();
        }
        assert_eq!(receivers.bad.try_iter().count(), 3);
        assert_eq!(counter.tally(SCALER_DETECTOR_TYPE).bad, 2);
        assert_eq!(counter.tally(PPG_DETECTOR_TYPE).bad, 1);
        assert_eq!(counter.tally(1).bad, 0);
    }

    #[test]
    fn test_closed_sink() {
        let (sinks, receivers) = Sinks::unbounded();
        let router = OutputRouter::new(sinks, Arc::new(FragmentCounter::new()), true);
        drop(receivers);
        let mut decoded = Decoded::new(1);
        decoded.push(Record::Fragment(fragment(1)));
        assert!(matches!(
            router.deliver(decoded),
            Err(RouterError::SinkClosed("good"))
        ));
    }
}
