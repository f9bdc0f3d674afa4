use super::error::DigitizerError;
use std::str::FromStr;

/// The digitizer family a channel is read out by.
///
/// Channel maps name digitizers with strings; they are resolved to this enum once when
/// the map is loaded so that the decoders never compare strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigitizerType {
    #[default]
    Grif16,
    Grif4G,
    Tig10,
    Tig64,
    Caen,
}

impl DigitizerType {
    /// Width in bits of the two's complement charge field written by the legacy
    /// TIG family. Other families use layout tables instead.
    pub fn legacy_charge_bits(&self) -> u32 {
        match self {
            Self::Tig64 => 22,
            _ => 26,
        }
    }
}

impl FromStr for DigitizerType {
    type Err = DigitizerError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered.starts_with("grif-16") || lowered.starts_with("grif16") {
            Ok(Self::Grif16)
        } else if lowered.starts_with("grif-4g") || lowered.starts_with("grif4g") {
            Ok(Self::Grif4G)
        } else if lowered.starts_with("tig10") {
            Ok(Self::Tig10)
        } else if lowered.starts_with("tig64") {
            Ok(Self::Tig64)
        } else if lowered.starts_with("caen") {
            Ok(Self::Caen)
        } else {
            Err(DigitizerError::Unknown(s.to_string()))
        }
    }
}

/// Module type field of a GRIFFIN-family header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Grif16,
    Grif4G,
    Scaler,
}

impl ModuleType {
    /// Returns None for module types outside the known set
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Grif16),
            2 => Some(Self::Grif4G),
            4 => Some(Self::Scaler),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Grif16 => 1,
            Self::Grif4G => 2,
            Self::Scaler => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digitizer_from_str() {
        assert_eq!(DigitizerType::from_str("TIG10").unwrap(), DigitizerType::Tig10);
        assert_eq!(DigitizerType::from_str("Tig64").unwrap(), DigitizerType::Tig64);
        assert_eq!(
            DigitizerType::from_str("GRIF-4G").unwrap(),
            DigitizerType::Grif4G
        );
        assert!(DigitizerType::from_str("MADC").is_err());
        assert_eq!(DigitizerType::Tig64.legacy_charge_bits(), 22);
        assert_eq!(DigitizerType::Tig10.legacy_charge_bits(), 26);
    }

    #[test]
    fn test_module_type() {
        assert_eq!(ModuleType::from_code(2), Some(ModuleType::Grif4G));
        assert_eq!(ModuleType::from_code(3), None);
        assert_eq!(ModuleType::Scaler.code(), 4);
    }
}
