use crate::config::FingerprintConfig;
use crate::peaks::Peak;

/// Pack an anchor/target frequency pair and their frame delta into a single
/// injective 64-bit key. A 32-bit (10/10/12-bit) layout cannot represent
/// `n_fft = 2048`'s 1025 frequency bins without losing information, so this
/// crate packs each of `f1`, `f2`, `dt` into its own 16-bit lane instead: wide
/// enough to never collide on valid inputs, at no storage cost since the
/// index's hash column is already a 64-bit integer.
#[inline]
pub fn encode_hash(f1: u16, f2: u16, dt: u16) -> u64 {
    ((f1 as u64) << 32) | ((f2 as u64) << 16) | (dt as u64)
}

#[inline]
pub fn decode_hash(hash: u64) -> (u16, u16, u16) {
    let f1 = (hash >> 32) as u16;
    let f2 = (hash >> 16) as u16;
    let dt = hash as u16;
    (f1, f2, dt)
}

/// Fan-out pairing: for each anchor, pair it with up to
/// `fan_out` later peaks whose `Δt` falls in `[dt_min, dt_max]`. The peak
/// list is assumed sorted by frame, so targets are a bounded forward scan.
/// Returns `(hash, anchor_offset)` pairs.
pub fn generate_hashes(peaks: &[Peak], cfg: &FingerprintConfig) -> Vec<(u64, u32)> {
    let mut out = Vec::with_capacity(peaks.len() * cfg.fan_out);

    for i in 0..peaks.len() {
        let anchor = peaks[i];
        let mut fanned = 0usize;

        for j in (i + 1)..peaks.len() {
            if fanned >= cfg.fan_out {
                break;
            }
            let target = peaks[j];
            let dt = target.frame - anchor.frame;
            if dt > cfg.dt_max {
                break; // peaks sorted by frame: delta only grows from here
            }
            if dt < cfg.dt_min {
                continue;
            }

            let hash = encode_hash(anchor.freq_bin, target.freq_bin, dt as u16);
            out.push((hash, anchor.frame));
            fanned += 1;
        }
    }

    out
}
