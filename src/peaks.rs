use crate::config::FingerprintConfig;
use crate::spectral::Spectrogram;

/// A constellation point: frequency bin and time frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    pub freq_bin: u16,
    pub frame: u32,
}

const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Raster order used for the tie-break rule: time frame first, then
/// frequency bin.
#[inline]
fn precedes(f_a: usize, t_a: usize, f_b: usize, t_b: usize) -> bool {
    (t_a, f_a) < (t_b, f_b)
}

/// Extract constellation peaks: a 3x3-neighborhood local
/// maximum within `threshold_db` of its neighborhood, edges padded with
/// `-inf`, ties broken to the raster-order-first cell, then density
/// controlled to `peaks_per_second * duration`.
pub fn extract_peaks(spec: &Spectrogram, cfg: &FingerprintConfig, sample_rate: u32) -> Vec<Peak> {
    if spec.n_frames == 0 || spec.n_freq == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<(usize, usize, f32)> = Vec::new();

    for t in 0..spec.n_frames {
        for f in 0..spec.n_freq {
            let val = spec.get(f, t);
            if !val.is_finite() {
                continue;
            }

            let mut neighbor_max = f32::NEG_INFINITY;
            for (df, dt) in NEIGHBOR_OFFSETS {
                let nf = f as i64 + df as i64;
                let nt = t as i64 + dt as i64;
                if nf < 0 || nt < 0 {
                    continue;
                }
                let v = spec.get(nf as usize, nt as usize);
                if v > neighbor_max {
                    neighbor_max = v;
                }
            }

            let local_max = val.max(neighbor_max);
            if val != local_max {
                continue;
            }
            if local_max - val > cfg.threshold_db {
                continue;
            }

            // A cell in a perfectly flat region (every real neighbor equal,
            // e.g. a silent clip's all-zero-dB spectrogram) is not a peak:
            // it must actually dominate at least one real, in-grid neighbor
            // whose value is strictly lower. Out-of-grid padding (`-inf`)
            // doesn't count; otherwise every edge cell would look like it
            // dominates something.
            let mut has_lower_real_neighbor = false;
            // Raster-order tie-break: skip if an earlier neighbor ties us.
            let mut dominated = false;
            for (df, dt) in NEIGHBOR_OFFSETS {
                let nf = f as i64 + df as i64;
                let nt = t as i64 + dt as i64;
                if nf < 0 || nt < 0 || nf >= spec.n_freq as i64 || nt >= spec.n_frames as i64 {
                    continue;
                }
                let (nf, nt) = (nf as usize, nt as usize);
                let neighbor_val = spec.get(nf, nt);
                if neighbor_val < val {
                    has_lower_real_neighbor = true;
                } else if neighbor_val == val && precedes(nf, nt, f, t) {
                    dominated = true;
                    break;
                }
            }
            if dominated || !has_lower_real_neighbor {
                continue;
            }

            candidates.push((f, t, val));
        }
    }

    let duration_secs = (spec.n_frames as f32 * cfg.hop as f32) / sample_rate as f32;
    let ceiling = (cfg.peaks_per_second * duration_secs).round().max(0.0) as usize;

    if ceiling > 0 && candidates.len() > ceiling {
        candidates.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap()
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(ceiling);
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    }

    candidates
        .into_iter()
        .map(|(f, t, _)| Peak {
            freq_bin: f as u16,
            frame: t as u32,
        })
        .collect()
}
