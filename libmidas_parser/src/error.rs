use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum DigitizerError {
    #[error("Found invalid digitizer type: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("ChannelMap failed to parse a digitizer type: {0}")]
    BadDigitizer(#[from] DigitizerError),
    #[error("ChannelMap was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("OutputRouter could not deliver to the {0} sink because its receiver was dropped")]
    SinkClosed(&'static str),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("BankDispatcher failed due to OutputRouter error: {0}")]
    RouterError(#[from] RouterError),
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Reading bank dump failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open bank dump because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Bank dump ended in the middle of an event")]
    TruncatedEvent,
    #[error("Bank dump contains an invalid bank name {0:?}")]
    BadBankName([u8; 4]),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Processor failed due to bank dump error: {0}")]
    DumpError(#[from] DumpError),
    #[error("Processor failed due to BankDispatcher error: {0}")]
    DispatchError(#[from] DispatchError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
