use fxhash::FxHashMap;
use std::sync::Mutex;

use super::constants::{PPG_DETECTOR_TYPE, SCALER_DETECTOR_TYPE};

/// Receives a count for every record the OutputRouter delivers or rejects.
///
/// Detector types are signed so that PPG (-2) and scaler (-3) records can be tallied
/// next to the real detector types.
pub trait Diagnostics: Send + Sync {
    fn record_good(&self, detector_type: i32);
    fn record_bad(&self, detector_type: i32);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub good: u64,
    pub bad: u64,
}

impl Tally {
    /// Fraction of bad records, zero when nothing was seen
    pub fn bad_fraction(&self) -> f64 {
        let total = self.good + self.bad;
        if total == 0 {
            0.0
        } else {
            self.bad as f64 / total as f64
        }
    }
}

/// Thread-safe tally of good and bad records per detector type
#[derive(Debug, Default)]
pub struct FragmentCounter {
    tallies: Mutex<FxHashMap<i32, Tally>>,
}

impl FragmentCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self, detector_type: i32) -> Tally {
        self.with_tallies(|tallies| tallies.get(&detector_type).copied().unwrap_or_default())
    }

    pub fn totals(&self) -> Tally {
        self.with_tallies(|tallies| {
            tallies.values().fold(Tally::default(), |sum, tally| Tally {
                good: sum.good + tally.good,
                bad: sum.bad + tally.bad,
            })
        })
    }

    /// Write the tally of every detector type seen to the log
    pub fn report(&self) {
        let mut tallies: Vec<(i32, Tally)> =
            self.with_tallies(|tallies| tallies.iter().map(|(k, v)| (*k, *v)).collect());
        tallies.sort_by_key(|(detector_type, _)| *detector_type);
        for (detector_type, tally) in tallies {
            spdlog::info!(
                "{:>12}: {} good, {} bad ({:.2}% bad)",
                detector_name(detector_type),
                tally.good,
                tally.bad,
                100.0 * tally.bad_fraction()
            );
        }
        let totals = self.totals();
        spdlog::info!("       total: {} good, {} bad", totals.good, totals.bad);
    }

    fn with_tallies<T>(&self, f: impl FnOnce(&mut FxHashMap<i32, Tally>) -> T) -> T {
        let mut tallies = self
            .tallies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut tallies)
    }
}

impl Diagnostics for FragmentCounter {
    fn record_good(&self, detector_type: i32) {
        self.with_tallies(|tallies| tallies.entry(detector_type).or_default().good += 1);
    }

    fn record_bad(&self, detector_type: i32) {
        self.with_tallies(|tallies| tallies.entry(detector_type).or_default().bad += 1);
    }
}

fn detector_name(detector_type: i32) -> String {
    match detector_type {
        PPG_DETECTOR_TYPE => String::from("ppg"),
        SCALER_DETECTOR_TYPE => String::from("scaler"),
        other => format!("type {other}"),
    }
}
