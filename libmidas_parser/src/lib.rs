//! # midas_parser
//!
//! midas_parser decodes the raw data banks written by the GRIFFIN/TIGRESS family of
//! data acquisitions into per-channel fragments, written in Rust. It takes the 32-bit
//! words of a located MIDAS bank, decodes them bit-exactly according to the digitizer
//! that wrote them, and routes the results to good, bad, PPG and scaler outputs.
//!
//! ## Installation
//!
//! The only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./midas_parser_cli` from the
//! top level repository. The binary is installed to your cargo install location
//! (typically something like `~/.cargo/bin/`). To use the CLI see the
//! `midas_parser_cli` README.
//!
//! ## Supported Banks
//!
//! Each physics event is decoded from exactly one bank, picked in this order:
//!
//! - `WFDN`: legacy TIG10/TIG64 digitizers
//! - `GRF4`, `GRF3`, `GRF2`, `GRF1`: GRIF-16 and GRIF-4G digitizers, one bank layout per
//! firmware generation. PPG, scaler and RF phase records travel in the same banks.
//! - `CAEN`: CAEN digitizers with DPP-PSD firmware
//! - `CPHA`: CAEN digitizers with DPP-PHA firmware
//! - `MADC`: Mesytec MADC-32, followed by the `EMMT` bank of the same crate if present
//! - `EMMT`: CAEN V1190 TDC
//!
//! A bank named `GRF` plus an unknown version is reported as a bad bank. Events that are
//! not physics events are skipped.
//!
//! ## Configuration
//!
//! The CLI is driven by a YAML configuration file:
//!
//! ```yml
//! input_paths:
//! - /path/to/run_01234.dump
//! channel_map_path: /path/to/channels.csv
//! record_waveforms: true
//! ignore_missing_channel: true
//! suppress_errors: false
//! n_threads: 1
//! ```
//!
//! - input_paths: bank dumps to decode. They are divided among the workers.
//! - channel_map_path: optional channel map. Without one, every lookup misses.
//! - record_waveforms: keep the waveform samples of each fragment
//! - ignore_missing_channel: if true, fragments of channels missing from the channel map
//! are decoded with defaults; if false they are dropped
//! - suppress_errors: do not log a word dump for every failed fragment
//! - n_threads: the number of parallel worker threads. Must be at least 1.
//!
//! ### Channel Map Format
//!
//! The channel map is a CSV file with a header line and the following columns:
//!
//! ```csv
//! address,name,digitizer,detector_type,time_offset
//! ```
//!
//! Addresses can be decimal or `0x` prefixed hex. The digitizer is one of `GRIF-16`,
//! `GRIF-4G`, `TIG10`, `TIG64` or `CAEN` (case is ignored).
//!
//! ## Output
//!
//! Decoded records are sent over `std::sync::mpsc` channels (see [router::Sinks]). A
//! record that fails to decode becomes a [fragment::BadFragment] holding the partial
//! fragment, the raw words and the index of the failing word. Log files contain the
//! status of the run and a word dump of every failure (unless suppressed).
pub mod caen;
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod digitizer;
pub mod dispatcher;
pub mod dump;
pub mod error;
pub mod fragment;
pub mod griffin;
pub mod layout;
pub mod madc;
pub mod outcome;
pub mod ppg;
pub mod process;
pub mod rf;
pub mod router;
pub mod scaler;
pub mod tdc;
pub mod tigress;
pub mod timestamp;
pub mod words;
pub mod worker_status;
