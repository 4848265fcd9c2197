use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::FingerprintConfig;
use crate::error::AudioError;

/// A log-magnitude spectrogram, `n_freq` frequency bins by `n_frames` time
/// frames, stored frame-major (`data[t * n_freq + f]`).
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub data: Vec<f32>,
    pub n_freq: usize,
    pub n_frames: usize,
}

impl Spectrogram {
    #[inline]
    pub fn get(&self, f: usize, t: usize) -> f32 {
        if f >= self.n_freq || t >= self.n_frames {
            f32::NEG_INFINITY
        } else {
            self.data[t * self.n_freq + f]
        }
    }
}

/// Periodic Hann window of length `n`, matching the convention STFT
/// implementations use for analysis windows (as opposed to the symmetric
/// window used for filter design).
fn hann_window(n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()
        })
        .collect()
}

/// Turn PCM samples into a log-magnitude spectrogram: Hann
/// window of length `n_fft`, hop `hop`, dB-normalized so the maximum cell
/// is 0 dB.
pub fn compute_spectrogram(
    samples: &[f32],
    cfg: &FingerprintConfig,
) -> Result<Spectrogram, AudioError> {
    if samples.len() < cfg.n_fft {
        return Err(AudioError::ShortInput {
            samples: samples.len(),
            n_fft: cfg.n_fft,
        });
    }
    if samples.iter().any(|s| !s.is_finite()) {
        return Err(AudioError::InvalidAudio);
    }

    let window = hann_window(cfg.n_fft);
    let n_freq = cfg.n_fft / 2 + 1;
    let n_frames = (samples.len() - cfg.n_fft) / cfg.hop + 1;

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(cfg.n_fft);

    let mut data = vec![0.0f32; n_freq * n_frames];
    let mut scratch = vec![Complex::new(0.0f32, 0.0f32); cfg.n_fft];
    let mut max_db = f32::NEG_INFINITY;

    for (t, frame_start) in (0..samples.len() - cfg.n_fft + 1).step_by(cfg.hop).enumerate() {
        for i in 0..cfg.n_fft {
            scratch[i] = Complex::new(samples[frame_start + i] * window[i], 0.0);
        }
        fft.process(&mut scratch);

        for f in 0..n_freq {
            let mag = scratch[f].norm();
            let db = 20.0 * (mag + 1e-10).log10();
            data[t * n_freq + f] = db;
            if db > max_db {
                max_db = db;
            }
        }
    }

    if max_db.is_finite() {
        for v in data.iter_mut() {
            *v -= max_db;
        }
    }

    Ok(Spectrogram {
        data,
        n_freq,
        n_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn short_input_errors() {
        let cfg = FingerprintConfig::default();
        let samples = vec![0.0f32; cfg.n_fft - 1];
        assert!(matches!(
            compute_spectrogram(&samples, &cfg),
            Err(AudioError::ShortInput { .. })
        ));
    }

    #[test]
    fn non_finite_errors() {
        let cfg = FingerprintConfig::default();
        let mut samples = vec![0.0f32; cfg.n_fft * 2];
        samples[10] = f32::NAN;
        assert!(matches!(
            compute_spectrogram(&samples, &cfg),
            Err(AudioError::InvalidAudio)
        ));
    }

    #[test]
    fn max_cell_is_zero_db() {
        let cfg = FingerprintConfig::default();
        let samples = sine(440.0, 44100.0, cfg.n_fft * 4);
        let spec = compute_spectrogram(&samples, &cfg).unwrap();
        let max = spec.data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!((max - 0.0).abs() < 1e-4);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let cfg = FingerprintConfig::default();
        let samples = sine(440.0, 44100.0, cfg.n_fft * 4);
        let a = compute_spectrogram(&samples, &cfg).unwrap();
        let b = compute_spectrogram(&samples, &cfg).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn frame_count_matches_formula() {
        let cfg = FingerprintConfig::default();
        let n = cfg.n_fft + cfg.hop * 9;
        let samples = vec![0.0f32; n];
        let spec = compute_spectrogram(&samples, &cfg).unwrap();
        assert_eq!(spec.n_frames, (n - cfg.n_fft) / cfg.hop + 1);
        assert_eq!(spec.n_freq, cfg.n_fft / 2 + 1);
    }
}
