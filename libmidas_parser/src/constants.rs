/// MIDAS event type code of physics events
pub const PHYSICS_EVENT_TYPE: u16 = 1;

/// Diagnostics key used for PPG records
pub const PPG_DETECTOR_TYPE: i32 = -2;
/// Diagnostics key used for scaler records
pub const SCALER_DETECTOR_TYPE: i32 = -3;
/// Detector type a scaler module header carries when it holds RF phase coefficients
pub const RF_DETECTOR_TYPE: u32 = 0xf;

/// Base addresses of the digitizers that have no address in their data words
pub const CAEN_ADDRESS_BASE: u32 = 0xc000;
pub const MADC_ADDRESS_BASE: u32 = 0xd000;
pub const TDC_ADDRESS_BASE: u32 = 0xe000;

/// Detector types given to TDC and ADC fragments (they never carry one)
pub const MADC_DETECTOR_TYPE: u8 = 12;
pub const TDC_DETECTOR_TYPE: u8 = 13;

/// Channels per TDC board and per ADC module, used to build addresses
pub const TDC_CHANNELS_PER_BOARD: u32 = 128;
pub const MADC_CHANNELS_PER_MODULE: u32 = 32;

/// Sampling period of the generic digitizers in ns
pub const SAMPLE_PERIOD_NS: f64 = 10.0;
/// CFD values count 1/16 of a sample
pub const CFD_UNITS_PER_SAMPLE: f64 = 16.0;
