//! Reader for bank dumps: little-endian streams of already located MIDAS banks.
//!
//! Each record is
//!
//! ```text
//! [event type u16][bank name 4 bytes][serial number u32][wall clock u32][n words u32][words u32...]
//! ```
//!
//! Consecutive records with the same serial number and event type are banks of the same
//! event and are gathered into one MidasEvent.
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use super::dispatcher::{Bank, MidasEvent};
use super::error::DumpError;
use super::words::DaqInfo;

/// Size of the record header in bytes
const RECORD_HEADER_SIZE: u64 = 18;

#[derive(Debug, Clone, PartialEq)]
struct DumpRecord {
    event_type: u16,
    serial_number: u32,
    wall_clock: u32,
    bank: Bank,
}

#[derive(Debug)]
pub struct BankDump<R: Read> {
    reader: R,
    size_bytes: u64,
    bytes_read: u64,
    pending: Option<DumpRecord>,
}

impl BankDump<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, DumpError> {
        if !path.exists() {
            return Err(DumpError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self::new(BufReader::new(file), size_bytes))
    }
}

impl<R: Read> BankDump<R> {
    pub fn new(reader: R, size_bytes: u64) -> Self {
        Self {
            reader,
            size_bytes,
            bytes_read: 0,
            pending: None,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fraction of the input read so far
    pub fn progress(&self) -> f32 {
        if self.size_bytes == 0 {
            1.0
        } else {
            self.bytes_read as f32 / self.size_bytes as f32
        }
    }

    /// The next event, or None once the input is exhausted
    pub fn next_event(&mut self) -> Result<Option<MidasEvent>, DumpError> {
        let first = match self.pending.take() {
            Some(record) => record,
            None => match self.read_record()? {
                Some(record) => record,
                None => return Ok(None),
            },
        };
        let daq = DaqInfo::from_unix(first.serial_number, first.wall_clock as i64);
        let mut event = MidasEvent {
            event_type: first.event_type,
            serial_number: first.serial_number,
            wall_clock: daq.wall_clock,
            banks: vec![first.bank],
        };
        while let Some(record) = self.read_record()? {
            if record.serial_number == event.serial_number && record.event_type == event.event_type
            {
                event.banks.push(record.bank);
            } else {
                self.pending = Some(record);
                break;
            }
        }
        Ok(Some(event))
    }

    fn read_record(&mut self) -> Result<Option<DumpRecord>, DumpError> {
        let event_type = match self.reader.read_u16::<LittleEndian>() {
            Ok(value) => value,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut name = [0u8; 4];
        self.reader.read_exact(&mut name).map_err(truncated)?;
        if !name.iter().all(|byte| byte.is_ascii_alphanumeric()) {
            return Err(DumpError::BadBankName(name));
        }
        let serial_number = self.reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let wall_clock = self.reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let n_words = self.reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let remaining = self
            .size_bytes
            .saturating_sub(self.bytes_read + RECORD_HEADER_SIZE);
        if 4 * n_words as u64 > remaining {
            return Err(DumpError::TruncatedEvent);
        }
        let mut words = vec![0u32; n_words];
        self.reader
            .read_u32_into::<LittleEndian>(&mut words)
            .map_err(truncated)?;
        self.bytes_read += RECORD_HEADER_SIZE + 4 * n_words as u64;

        // all bytes were checked to be ascii
        let name = String::from_utf8_lossy(&name).into_owned();
        Ok(Some(DumpRecord {
            event_type,
            serial_number,
            wall_clock,
            bank: Bank { name, words },
        }))
    }
}

fn truncated(e: std::io::Error) -> DumpError {
    if e.kind() == ErrorKind::UnexpectedEof {
        DumpError::TruncatedEvent
    } else {
        DumpError::IOError(e)
    }
}
