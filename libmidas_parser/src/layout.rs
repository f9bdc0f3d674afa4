//! Bit layouts of the GRIFFIN-family banks.
//!
//! The four bank versions (GRF1 to GRF4) carry the same logical fields in different
//! places. Every offset and width lives in this module so that the generations can be
//! compared side by side; the decoders never use literal masks for these fields.
use super::digitizer::ModuleType;
use super::words::BitField;

/// Field positions of the header word (tag 0x8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub module_type: BitField,
    pub pileups: Option<BitField>,
    pub word_count: Option<BitField>,
    pub address: BitField,
    pub detector_type: BitField,
}

/// Field positions of a charge/CFD word pair.
///
/// The integration length is split over both words: the high part (if any) sits in the
/// CFD word, the low part in the charge word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeLayout {
    pub cfd: BitField,
    pub int_length_high: Option<BitField>,
    pub charge: BitField,
    pub int_length_low: BitField,
}

impl ChargeLayout {
    pub fn integration_length(&self, cfd_word: u32, charge_word: u32) -> u32 {
        let low = self.int_length_low.extract(charge_word);
        match self.int_length_high {
            Some(high) => (high.extract(cfd_word) << self.int_length_low.width) | low,
            None => low,
        }
    }
}

// May 2015 and earlier: 14 bit addresses
pub const GRF1_HEADER: HeaderLayout = HeaderLayout {
    module_type: BitField::new(25, 3),
    pileups: Some(BitField::new(22, 3)),
    word_count: None,
    address: BitField::new(4, 14),
    detector_type: BitField::new(0, 4),
};

pub const GRF2_HEADER: HeaderLayout = HeaderLayout {
    module_type: BitField::new(25, 3),
    pileups: Some(BitField::new(22, 3)),
    word_count: None,
    address: BitField::new(6, 16),
    detector_type: BitField::new(0, 6),
};

// GRF3 and GRF4 share the header, they differ in the charge words and the 0xf word
pub const GRF3_HEADER: HeaderLayout = HeaderLayout {
    module_type: BitField::new(25, 3),
    pileups: None,
    word_count: Some(BitField::new(20, 5)),
    address: BitField::new(4, 16),
    detector_type: BitField::new(0, 4),
};

pub const GRF1_CHARGE: ChargeLayout = ChargeLayout {
    cfd: BitField::new(0, 26),
    int_length_high: None,
    charge: BitField::new(0, 25),
    int_length_low: BitField::new(25, 6),
};

pub const GRIF16_CHARGE: ChargeLayout = ChargeLayout {
    cfd: BitField::new(0, 22),
    int_length_high: Some(BitField::new(26, 5)),
    charge: BitField::new(0, 26),
    int_length_low: BitField::new(26, 5),
};

pub const GRIF4G_CHARGE: ChargeLayout = ChargeLayout {
    cfd: BitField::new(0, 22),
    int_length_high: Some(BitField::new(22, 9)),
    charge: BitField::new(0, 25),
    int_length_low: BitField::new(25, 6),
};

pub const GRF4_GRIF4G_CHARGE: ChargeLayout = ChargeLayout {
    cfd: BitField::new(0, 22),
    int_length_high: Some(BitField::new(22, 9)),
    charge: BitField::new(0, 22),
    int_length_low: BitField::new(22, 9),
};

// Fields shared by all four layouts
pub const NETWORK_PACKET: BitField = BitField::new(0, 28);
pub const FILTER_PATTERN: BitField = BitField::new(0, 28);
pub const FILTER_ID: BitField = BitField::new(0, 31);
pub const CHANNEL_TRIGGER_ID: BitField = BitField::new(0, 28);
pub const TIMESTAMP_LOW: BitField = BitField::new(0, 28);
pub const TIMESTAMP_HIGH: BitField = BitField::new(0, 14);
pub const TIMESTAMP_HIGH_SHIFT: u32 = 28;
pub const DEADTIME: BitField = BitField::new(14, 14);
pub const WAVEFORM_SAMPLES: [BitField; 2] = [BitField::new(0, 14), BitField::new(14, 14)];
pub const TRAILER_TRIGGER_ID: BitField = BitField::new(0, 14);

// GRF4 only: 0xf word and its partner
pub const PSD_ZERO_CROSSING: BitField = BitField::new(0, 22);
pub const PSD_CHARGE: BitField = BitField::new(0, 25);

/// The bank layout in effect for a GRIFFIN-family bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankLayout {
    Grf1,
    Grf2,
    Grf3,
    Grf4,
}

impl BankLayout {
    pub const ALL: [BankLayout; 4] = [Self::Grf1, Self::Grf2, Self::Grf3, Self::Grf4];

    pub fn from_bank_name(name: &str) -> Option<Self> {
        match name {
            "GRF1" => Some(Self::Grf1),
            "GRF2" => Some(Self::Grf2),
            "GRF3" => Some(Self::Grf3),
            "GRF4" => Some(Self::Grf4),
            _ => None,
        }
    }

    pub fn bank_name(&self) -> &'static str {
        match self {
            Self::Grf1 => "GRF1",
            Self::Grf2 => "GRF2",
            Self::Grf3 => "GRF3",
            Self::Grf4 => "GRF4",
        }
    }

    pub fn header(&self) -> HeaderLayout {
        match self {
            Self::Grf1 => GRF1_HEADER,
            Self::Grf2 => GRF2_HEADER,
            Self::Grf3 | Self::Grf4 => GRF3_HEADER,
        }
    }

    /// Charge/CFD pair layout for a module. None for modules that do not write charges.
    pub fn charge(&self, module: ModuleType) -> Option<ChargeLayout> {
        match (self, module) {
            (_, ModuleType::Scaler) => None,
            (Self::Grf1, _) => Some(GRF1_CHARGE),
            (_, ModuleType::Grif16) => Some(GRIF16_CHARGE),
            (Self::Grf2 | Self::Grf3, ModuleType::Grif4G) => Some(GRIF4G_CHARGE),
            (Self::Grf4, ModuleType::Grif4G) => Some(GRF4_GRIF4G_CHARGE),
        }
    }

    /// Maximum number of charge/CFD tuples in one fragment
    pub fn max_hits(&self) -> usize {
        match self {
            Self::Grf1 => 1,
            Self::Grf2 => 2,
            Self::Grf3 | Self::Grf4 => 4,
        }
    }

    /// In GRF4 a 0xf word is the first half of a PSD pair, everywhere else it reports
    /// a DAQ fault. The two are different firmware semantics and stay separate.
    pub fn fault_is_psd(&self) -> bool {
        matches!(self, Self::Grf4)
    }

    /// Value of the address field that marks a PPG record
    pub fn ppg_address(&self) -> u32 {
        self.header().address.max_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_widths() {
        assert_eq!(BankLayout::Grf1.header().address.width, 14);
        assert_eq!(BankLayout::Grf4.header().address.width, 16);
        assert_eq!(BankLayout::Grf1.ppg_address(), 0x3fff);
        assert_eq!(BankLayout::Grf2.ppg_address(), 0xffff);
    }

    #[test]
    fn test_charge_words_leave_tag_bit_clear() {
        for layout in BankLayout::ALL {
            for module in [ModuleType::Grif16, ModuleType::Grif4G] {
                let charge = layout.charge(module).unwrap();
                let mut cfd_mask = charge.cfd.mask();
                if let Some(high) = charge.int_length_high {
                    cfd_mask |= high.mask();
                }
                let charge_mask = charge.charge.mask() | charge.int_length_low.mask();
                assert_eq!(cfd_mask & 0x8000_0000, 0);
                assert_eq!(charge_mask & 0x8000_0000, 0);
                // the two fields of a word must not overlap
                assert_eq!(charge.charge.mask() & charge.int_length_low.mask(), 0);
            }
        }
    }

    #[test]
    fn test_integration_length() {
        let word_cfd = GRIF16_CHARGE.int_length_high.unwrap().insert(0, 0b10101);
        let word_charge = GRIF16_CHARGE.int_length_low.insert(0, 0b00011);
        assert_eq!(
            GRIF16_CHARGE.integration_length(word_cfd, word_charge),
            (0b10101 << 5) | 0b00011
        );
    }

    #[test]
    fn test_bank_names() {
        for layout in BankLayout::ALL {
            assert_eq!(BankLayout::from_bank_name(layout.bank_name()), Some(layout));
        }
        assert_eq!(BankLayout::from_bank_name("GRF5"), None);
    }
}
