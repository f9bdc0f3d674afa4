//! Selects the decoder for each MIDAS event from the names of its banks, walks the bank
//! looking for record starts, and hands the results to the OutputRouter.
use std::sync::Arc;
use time::OffsetDateTime;

use super::caen::{self, CaenDecoder, CaenFirmware};
use super::channel_map::ChannelRegistry;
use super::config::DecoderOptions;
use super::constants::PHYSICS_EVENT_TYPE;
use super::error::DispatchError;
use super::fragment::FragmentBuilder;
use super::griffin::GriffinDecoder;
use super::layout::BankLayout;
use super::madc::{self, MadcDecoder};
use super::outcome::{DecodeResult, Failure, ParserState};
use super::router::{Delivered, OutputRouter};
use super::tdc::{self, TdcDecoder};
use super::tigress::TigressDecoder;
use super::words::{DaqInfo, PacketType, WordBuffer};

const LEGACY_BANK: &str = "WFDN";
const GENERIC_PREFIX: &str = "GRF";
const MADC_BANK: &str = "MADC";
const TDC_BANK: &str = "EMMT";

/// One located bank of a MIDAS event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub name: String,
    pub words: Vec<u32>,
}

impl Bank {
    pub fn new(name: &str, words: Vec<u32>) -> Self {
        Self {
            name: name.to_string(),
            words,
        }
    }
}

/// A MIDAS event with its banks already located and byte-swapped
#[derive(Debug, Clone, PartialEq)]
pub struct MidasEvent {
    pub event_type: u16,
    pub serial_number: u32,
    pub wall_clock: OffsetDateTime,
    pub banks: Vec<Bank>,
}

impl MidasEvent {
    pub fn daq(&self) -> DaqInfo {
        DaqInfo::new(self.serial_number, self.wall_clock)
    }

    pub fn bank(&self, name: &str) -> Option<&Bank> {
        self.banks.iter().find(|bank| bank.name == name)
    }
}

/// What came out of one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub good: usize,
    pub bad: usize,
    pub ppg: usize,
    pub scaler: usize,
    pub skipped: usize,
    /// Bank index of the first failing word
    pub first_failure: Option<usize>,
}

impl DispatchSummary {
    fn add(&mut self, delivered: Delivered) {
        self.good += delivered.fragments;
        self.ppg += delivered.ppg;
        self.scaler += delivered.scaler;
    }

    fn fail(&mut self, word: usize) {
        self.bad += 1;
        self.first_failure.get_or_insert(word);
    }

    /// The number of fragments produced, or minus the failing word if nothing was
    /// produced and decoding failed
    pub fn as_signed(&self) -> i64 {
        match self.first_failure {
            Some(word) if self.good == 0 => -(word as i64),
            _ => self.good as i64,
        }
    }
}

/// The decoder picked for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Legacy,
    Generic(BankLayout),
    Caen(CaenFirmware),
    /// MADC bank, followed by the TDC bank of the same crate if it is there
    Madc,
    Tdc,
}

impl Selection {
    /// Pick the highest priority bank of the event. An unknown generic bank version is
    /// an error; an event without any known bank gives None.
    pub fn of(event: &MidasEvent) -> Result<Option<Self>, ParserState> {
        if event.bank(LEGACY_BANK).is_some() {
            return Ok(Some(Self::Legacy));
        }
        for layout in BankLayout::ALL.iter().rev() {
            if event.bank(layout.bank_name()).is_some() {
                return Ok(Some(Self::Generic(*layout)));
            }
        }
        if event
            .banks
            .iter()
            .any(|bank| bank.name.starts_with(GENERIC_PREFIX))
        {
            return Err(ParserState::BadBank);
        }
        for firmware in [CaenFirmware::Psd, CaenFirmware::Pha] {
            if event.bank(firmware.bank_name()).is_some() {
                return Ok(Some(Self::Caen(firmware)));
            }
        }
        if event.bank(MADC_BANK).is_some() {
            return Ok(Some(Self::Madc));
        }
        if event.bank(TDC_BANK).is_some() {
            return Ok(Some(Self::Tdc));
        }
        Ok(None)
    }
}

/// Owns one decoder per format, so timestamp wrap state is per dispatcher.
pub struct BankDispatcher {
    griffin: GriffinDecoder,
    tigress: TigressDecoder,
    caen_psd: CaenDecoder,
    caen_pha: CaenDecoder,
    tdc: TdcDecoder,
    madc: MadcDecoder,
    router: OutputRouter,
}

impl BankDispatcher {
    pub fn new(
        registry: Arc<dyn ChannelRegistry>,
        options: DecoderOptions,
        router: OutputRouter,
    ) -> Self {
        Self {
            griffin: GriffinDecoder::new(registry.clone(), options),
            tigress: TigressDecoder::new(registry.clone(), options),
            caen_psd: CaenDecoder::new(registry.clone(), options, CaenFirmware::Psd),
            caen_pha: CaenDecoder::new(registry.clone(), options, CaenFirmware::Pha),
            tdc: TdcDecoder::new(registry.clone(), options),
            madc: MadcDecoder::new(registry, options),
            router,
        }
    }

    pub fn router(&self) -> &OutputRouter {
        &self.router
    }

    /// Forget timestamp wrap state, used when a new input starts
    pub fn reset(&mut self) {
        self.tdc.reset();
        self.madc.reset();
    }

    pub fn process_event(&mut self, event: &MidasEvent) -> Result<DispatchSummary, DispatchError> {
        let mut summary = DispatchSummary::default();
        if event.event_type != PHYSICS_EVENT_TYPE {
            spdlog::debug!(
                "Skipping event {} of type {}",
                event.serial_number,
                event.event_type
            );
            return Ok(summary);
        }

        let daq = event.daq();
        let selection = match Selection::of(event) {
            Ok(Some(selection)) => selection,
            Ok(None) => {
                spdlog::info!(
                    "Physics event {} has no known bank ({})",
                    event.serial_number,
                    bank_names(event)
                );
                return Ok(summary);
            }
            Err(state) => {
                spdlog::warn!(
                    "Physics event {} has an unknown generic bank ({})",
                    event.serial_number,
                    bank_names(event)
                );
                if let Some(bank) = event
                    .banks
                    .iter()
                    .find(|bank| bank.name.starts_with(GENERIC_PREFIX))
                {
                    let mut failure = Failure::at(state, 0, FragmentBuilder::new(daq));
                    failure.resume = bank.words.len();
                    self.router.reject(failure, &bank.words)?;
                    summary.fail(0);
                }
                return Ok(summary);
            }
        };

        let router = &self.router;
        match selection {
            Selection::Legacy => {
                let buffer = bank_buffer(event, LEGACY_BANK, daq);
                let decoder = &self.tigress;
                scan_bank(router, buffer, is_header, |b| decoder.decode(b), &mut summary)?;
            }
            Selection::Generic(layout) => {
                let buffer = bank_buffer(event, layout.bank_name(), daq);
                let decoder = &self.griffin;
                scan_bank(
                    router,
                    buffer,
                    is_header,
                    |b| decoder.decode(b, layout),
                    &mut summary,
                )?;
            }
            Selection::Caen(firmware) => {
                let decoder = match firmware {
                    CaenFirmware::Psd => &self.caen_psd,
                    CaenFirmware::Pha => &self.caen_pha,
                };
                let buffer = bank_buffer(event, firmware.bank_name(), daq);
                let is_start = caen::is_aggregate_header;
                scan_bank(router, buffer, is_start, |b| decoder.decode(b), &mut summary)?;
            }
            Selection::Madc => {
                let buffer = bank_buffer(event, MADC_BANK, daq);
                let decoder = &mut self.madc;
                scan_bank(router, buffer, madc::is_header, |b| decoder.decode(b), &mut summary)?;
                if event.bank(TDC_BANK).is_some() {
                    let buffer = bank_buffer(event, TDC_BANK, daq);
                    let decoder = &mut self.tdc;
                    let is_start = tdc::is_global_header;
                    scan_bank(router, buffer, is_start, |b| decoder.decode(b), &mut summary)?;
                }
            }
            Selection::Tdc => {
                let buffer = bank_buffer(event, TDC_BANK, daq);
                let decoder = &mut self.tdc;
                let is_start = tdc::is_global_header;
                scan_bank(router, buffer, is_start, |b| decoder.decode(b), &mut summary)?;
            }
        }
        Ok(summary)
    }
}

fn is_header(word: u32) -> bool {
    PacketType::of(word) == PacketType::Header
}

fn bank_names(event: &MidasEvent) -> String {
    event
        .banks
        .iter()
        .map(|bank| bank.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn bank_buffer<'a>(event: &'a MidasEvent, name: &str, daq: DaqInfo) -> WordBuffer<'a> {
    let words = event
        .bank(name)
        .map(|bank| bank.words.as_slice())
        .unwrap_or(&[]);
    WordBuffer::new(words, daq)
}

/// Walk the bank: words that do not start a record are skipped, a record start is
/// decoded and the walk continues after it, or at the resume point of a failure.
fn scan_bank(
    router: &OutputRouter,
    buffer: WordBuffer,
    is_start: fn(u32) -> bool,
    mut decode: impl FnMut(&WordBuffer) -> DecodeResult,
    summary: &mut DispatchSummary,
) -> Result<(), DispatchError> {
    let words = buffer.words();
    let mut index = 0;
    while index < words.len() {
        if !is_start(words[index]) {
            index += 1;
            continue;
        }
        let record = buffer.tail(index);
        match decode(&record) {
            Ok(decoded) => {
                summary.skipped += decoded.skipped;
                let consumed = decoded.words.max(1);
                summary.add(router.deliver(decoded)?);
                index += consumed;
            }
            Err(failure) => {
                let state = failure.state;
                let resume = index + failure.resume.max(1);
                summary.fail(index + failure.word);
                router.reject(failure, record.words())?;
                if state.is_fatal() {
                    break;
                }
                index = resume;
            }
        }
    }
    Ok(())
}
