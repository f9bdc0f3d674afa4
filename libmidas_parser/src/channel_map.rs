// The channel map is the only place the decoders learn anything about the detector
// setup. It is loaded once, never mutated during decoding, and shared between workers
// behind an Arc, so lookups need no locking.
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use fxhash::FxHashMap;

use super::digitizer::DigitizerType;
use super::error::ChannelMapError;

const ENTRIES_PER_LINE: usize = 5; //address, name, digitizer, detector type, time offset

/// What the registry knows about one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub digitizer: DigitizerType,
    pub detector_type: u8,
    /// Calibration time offset in timestamp units
    pub time_offset: i64,
}

/// Read-only lookup from a decoded hardware address to channel metadata
pub trait ChannelRegistry: Send + Sync {
    fn lookup(&self, address: u32) -> Option<&ChannelInfo>;
}

/// ChannelMap is the CSV backed ChannelRegistry.
///
/// The file has a header line, then one channel per row:
///
/// ```csv
/// address,name,digitizer,detector type,time offset
/// 0x0010,GRG01BN00A,GRIF-16,1,0
/// ```
///
/// Addresses can be given in decimal or as 0x-prefixed hex.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    map: FxHashMap<u32, ChannelInfo>,
}

impl ChannelMap {
    /// Create a new ChannelMap
    /// If the path is None, the map is empty and every lookup misses
    pub fn new(path: Option<&Path>) -> Result<Self, ChannelMapError> {
        match path {
            Some(p) => {
                let mut contents = String::new();
                let mut file = File::open(p)?;
                file.read_to_string(&mut contents)?;
                Self::parse(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse the CSV contents of a channel map
    pub fn parse(contents: &str) -> Result<Self, ChannelMapError> {
        let mut cm = ChannelMap::default();

        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(',').map(|e| e.trim()).collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat);
            }

            let address = parse_address(entries[0])?;
            let info = ChannelInfo {
                name: entries[1].to_string(),
                digitizer: DigitizerType::from_str(entries[2])?,
                detector_type: entries[3].parse()?,
                time_offset: entries[4].parse()?,
            };
            if cm.map.insert(address, info).is_some() {
                spdlog::warn!("Channel map lists address {address:#06x} more than once, keeping the last entry");
            }
        }

        Ok(cm)
    }

    /// Add or replace a channel
    pub fn insert(&mut self, address: u32, info: ChannelInfo) {
        self.map.insert(address, info);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl ChannelRegistry for ChannelMap {
    fn lookup(&self, address: u32) -> Option<&ChannelInfo> {
        self.map.get(&address)
    }
}

fn parse_address(entry: &str) -> Result<u32, ChannelMapError> {
    if let Some(hex) = entry
        .strip_prefix("0x")
        .or_else(|| entry.strip_prefix("0X"))
    {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(entry.parse()?)
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "address,name,digitizer,detector type,time offset
0x0010,GRG01BN00A,GRIF-16,1,0
0x0011,GRG01BN00B,GRIF-4G,1,-12
200,TIG01RN00A,TIG64,2,5
";

    #[test]
    fn test_parse_map() {
        let map = ChannelMap::parse(MAP).unwrap();
        assert_eq!(map.len(), 3);
        let info = map.lookup(0x11).unwrap();
        assert_eq!(info.digitizer, DigitizerType::Grif4G);
        assert_eq!(info.time_offset, -12);
        assert_eq!(map.lookup(200).unwrap().digitizer, DigitizerType::Tig64);
        assert!(map.lookup(0x12).is_none());
    }

    #[test]
    fn test_bad_map() {
        let bad = "address,name,digitizer,detector type,time offset\n0x10,A,GRIF-16\n";
        assert!(matches!(
            ChannelMap::parse(bad),
            Err(ChannelMapError::BadFileFormat)
        ));
        let bad = "address,name,digitizer,detector type,time offset\n0x10,A,XYZ,1,0\n";
        assert!(matches!(
            ChannelMap::parse(bad),
            Err(ChannelMapError::BadDigitizer(_))
        ));
    }

    #[test]
    fn test_map_from_file() {
        let path = std::env::temp_dir().join("midas_parser_test_channel_map.csv");
        std::fs::write(&path, MAP).unwrap();
        let map = ChannelMap::new(Some(&path)).unwrap();
        assert_eq!(map.len(), 3);
        std::fs::remove_file(&path).unwrap();
        assert!(ChannelMap::new(None).unwrap().is_empty());
    }
}
