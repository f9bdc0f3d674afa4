use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Structure representing the application configuration. Contains pathing and decoder options
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_paths: Vec<PathBuf>,
    pub channel_map_path: Option<PathBuf>,
    pub record_waveforms: bool,
    pub ignore_missing_channel: bool,
    pub suppress_errors: bool,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. No inputs, decode everything
    fn default() -> Self {
        Self {
            input_paths: vec![],
            channel_map_path: None,
            record_waveforms: true,
            ignore_missing_channel: true,
            suppress_errors: false,
            n_threads: 1,
        }
    }
}

/// The subset of the configuration the decoders care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Keep waveform samples (they are skipped otherwise)
    pub record_waveforms: bool,
    /// If true, fragments from channels missing in the registry are decoded with
    /// defaults; if false they are dropped
    pub ignore_missing_channel: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Config::default().decoder_options()
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            record_waveforms: self.record_waveforms,
            ignore_missing_channel: self.ignore_missing_channel,
        }
    }

    /// Check that every input exists
    pub fn check_inputs(&self) -> Result<(), ConfigError> {
        match self.input_paths.iter().find(|path| !path.exists()) {
            Some(path) => Err(ConfigError::BadFilePath(path.clone())),
            None => Ok(()),
        }
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let mut config = Config::default();
        config.input_paths.push(PathBuf::from("/data/run_0001.dump"));
        config.n_threads = 4;
        config.record_waveforms = false;
        let path = std::env::temp_dir().join("midas_parser_test_config.yml");
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read, config);
        assert!(!read.decoder_options().record_waveforms);
        assert!(read.is_n_threads_valid());
    }

    #[test]
    fn test_missing_config() {
        let path = std::env::temp_dir().join("midas_parser_no_such_config.yml");
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_check_inputs() {
        let mut config = Config::default();
        assert!(config.check_inputs().is_ok());
        config
            .input_paths
            .push(std::env::temp_dir().join("midas_parser_no_such_input.dump"));
        assert!(config.check_inputs().is_err());
    }
}
