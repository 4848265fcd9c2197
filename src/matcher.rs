use std::collections::HashMap;
use std::path::Path;

use crate::audio::decode_file;
use crate::config::FingerprintConfig;
use crate::error::AudioError;
use crate::hashing::generate_hashes;
use crate::peaks::extract_peaks;
use crate::spectral::compute_spectrogram;
use crate::store::IndexStore;

/// Query hashes against one reference track's offset: `(track_id, Δ)`.
pub type VoteKey = (String, i64);

/// Minimum winning-bin vote count a caller should require before trusting a
/// match; below this, a handful of colliding hashes can't be told apart from
/// a genuine landmark spike.
pub const MIN_VOTES: u32 = 5;

/// Minimum ratio of the winning bin to the runner-up a caller should
/// require. A true match's votes concentrate in one `(track_id, Δ)` bin;
/// random collisions spread across many, so a low ratio means the top bin
/// isn't actually distinguished from the noise floor.
pub const MIN_CONFIDENCE_RATIO: f32 = 2.0;

/// Result of identifying a query clip.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub track_id: String,
    pub label: String,
    pub delta: i64,
    pub votes: u32,
    /// Ratio of the winning bin's votes to the runner-up's; `None` when
    /// there is no second bin to compare against.
    pub confidence_ratio: Option<f32>,
}

impl MatchResult {
    /// Whether this result clears [`MIN_VOTES`] and [`MIN_CONFIDENCE_RATIO`].
    /// A caller-facing surface (the CLI, a library caller) should treat a
    /// result that fails this check as "no match", not as a weak one.
    pub fn is_confident(&self) -> bool {
        self.votes >= MIN_VOTES
            && self.confidence_ratio.unwrap_or(f32::INFINITY) >= MIN_CONFIDENCE_RATIO
    }
}

/// Fingerprint PCM the same way ingestion does: spectrogram, peaks, hashes.
pub fn fingerprint(
    samples: &[f32],
    sample_rate: u32,
    cfg: &FingerprintConfig,
) -> Result<Vec<(u64, u32)>, AudioError> {
    let spec = compute_spectrogram(samples, cfg)?;
    let peaks = extract_peaks(&spec, cfg, sample_rate);
    Ok(generate_hashes(&peaks, cfg))
}

/// Build the `(track_id, Δ)` histogram from query hashes against the store's
/// postings.
pub fn vote_histogram(
    query_hashes: &[(u64, u32)],
    rows: &[(u64, String, u32)],
) -> HashMap<VoteKey, u32> {
    let mut by_hash: HashMap<u64, Vec<u32>> = HashMap::new();
    for (h, o_q) in query_hashes {
        by_hash.entry(*h).or_default().push(*o_q);
    }

    let mut votes: HashMap<VoteKey, u32> = HashMap::new();
    for (h, track_id, o_db) in rows {
        if let Some(query_offsets) = by_hash.get(h) {
            for o_q in query_offsets {
                let delta = *o_db as i64 - *o_q as i64;
                *votes.entry((track_id.clone(), delta)).or_insert(0) += 1;
            }
        }
    }
    votes
}

/// Pick the winning `(track_id, Δ)` bin, breaking ties by lexicographic
/// `track_id`, and compute the confidence ratio against the runner-up.
pub fn best_match(votes: &HashMap<VoteKey, u32>) -> Option<(VoteKey, u32, Option<f32>)> {
    let mut ranked: Vec<(&VoteKey, &u32)> = votes.iter().collect();
    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0 .0.cmp(&b.0 .0)));

    let (top_key, top_votes) = ranked[0];
    let runner_up = ranked.get(1).map(|(_, v)| **v);
    let ratio = runner_up.map(|r| *top_votes as f32 / r.max(1) as f32);

    Some((top_key.clone(), *top_votes, ratio))
}

/// Identify a query clip against a store, end to end.
pub fn identify(
    query_path: &Path,
    store: &IndexStore,
    cfg: &FingerprintConfig,
) -> Result<Option<MatchResult>, AudioError> {
    let decoded = decode_file(query_path)?;
    let query_hashes = fingerprint(&decoded.samples, decoded.sample_rate, cfg)?;

    let hashes: Vec<u64> = query_hashes.iter().map(|(h, _)| *h).collect();
    let rows = store
        .lookup(&hashes)
        .map_err(|e| AudioError::DecodeFailed(e.to_string()))?;

    let votes = vote_histogram(&query_hashes, &rows);
    let Some(((track_id, delta), top_votes, ratio)) = best_match(&votes) else {
        return Ok(None);
    };

    let label = store
        .track_label(&track_id)
        .map_err(|e| AudioError::DecodeFailed(e.to_string()))?
        .unwrap_or_else(|| track_id.clone());

    Ok(Some(MatchResult {
        track_id,
        label,
        delta,
        votes: top_votes,
        confidence_ratio: ratio,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_spikes_at_true_offset() {
        // True match: every pair displaced by the same delta.
        let query_hashes = vec![(1u64, 0u32), (2, 5), (3, 10)];
        let rows = vec![
            (1u64, "track_a".to_string(), 100u32),
            (2, "track_a".to_string(), 105),
            (3, "track_a".to_string(), 110),
            // Random collision on a different track, different delta each time.
            (1, "track_b".to_string(), 7),
        ];
        let votes = vote_histogram(&query_hashes, &rows);
        let (key, top, ratio) = best_match(&votes).unwrap();
        assert_eq!(key, ("track_a".to_string(), 100));
        assert_eq!(top, 3);
        assert_eq!(ratio, Some(3.0));
    }

    #[test]
    fn empty_votes_yield_no_match() {
        let votes = HashMap::new();
        assert!(best_match(&votes).is_none());
    }

    #[test]
    fn ties_break_by_lexicographic_track_id() {
        let mut votes = HashMap::new();
        votes.insert(("zebra".to_string(), 0i64), 5u32);
        votes.insert(("alpha".to_string(), 0i64), 5u32);
        let (key, _, _) = best_match(&votes).unwrap();
        assert_eq!(key.0, "alpha");
    }

    fn result(votes: u32, confidence_ratio: Option<f32>) -> MatchResult {
        MatchResult {
            track_id: "t".to_string(),
            label: "t.wav".to_string(),
            delta: 0,
            votes,
            confidence_ratio,
        }
    }

    #[test]
    fn strong_match_is_confident() {
        assert!(result(120, Some(6.0)).is_confident());
    }

    #[test]
    fn low_vote_count_is_not_confident_even_with_a_clean_ratio() {
        assert!(!result(1, Some(10.0)).is_confident());
    }

    #[test]
    fn low_confidence_ratio_is_not_confident_even_with_many_votes() {
        // A colliding tone's harmonics can rack up votes without ever
        // separating from the runner-up bin.
        assert!(!result(40, Some(1.2)).is_confident());
    }

    #[test]
    fn no_runner_up_bin_does_not_block_confidence() {
        assert!(result(50, None).is_confident());
    }
}
