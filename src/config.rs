use serde::{Deserialize, Serialize};

/// Every tunable the builder and the matcher must agree on.
///
/// This is threaded by value through the whole pipeline; nothing in this
/// crate reads a tuning parameter from a global or an environment variable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// STFT window length in samples.
    pub n_fft: usize,
    /// STFT hop in samples.
    pub hop: usize,
    /// Neighborhood peak threshold, in dB.
    pub threshold_db: f32,
    /// Max target peaks paired with one anchor.
    pub fan_out: usize,
    /// Minimum allowed `Δt` between anchor and target, in frames.
    pub dt_min: u32,
    /// Maximum allowed `Δt` between anchor and target, in frames.
    pub dt_max: u32,
    /// Density ceiling: peaks kept per second of audio.
    pub peaks_per_second: f32,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        FingerprintConfig {
            n_fft: 2048,
            hop: 512,
            threshold_db: 20.0,
            fan_out: 15,
            dt_min: 1,
            dt_max: 200,
            peaks_per_second: 30.0,
        }
    }
}

impl FingerprintConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
