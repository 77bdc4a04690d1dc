//! Score normalization and max-fusion for hybrid retrieval.

use std::collections::HashMap;

/// One scored result from a single retrieval modality.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<T> {
    /// Identity used to merge the same node seen by several modalities.
    pub key: String,
    pub score: f64,
    pub item: T,
}

/// Divide every score by the largest score in `hits`, so the best hit scores exactly `1.0`.
///
/// When the largest score is not positive every score becomes `0.0`.
#[must_use]
pub fn normalize_by_max<T>(mut hits: Vec<Hit<T>>) -> Vec<Hit<T>> {
    let max = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);
    if !(max.is_finite() && max > 0.0) {
        for hit in &mut hits {
            hit.score = 0.0;
        }
        return hits;
    }
    for hit in &mut hits {
        hit.score /= max;
    }
    hits
}

/// Normalize each scan, union them by key keeping the higher score, sort descending,
/// and keep the first `top_k`.
///
/// Ties keep first-seen order, vector hits before full-text hits.
#[must_use]
pub fn fuse_max<T>(vector: Vec<Hit<T>>, fulltext: Vec<Hit<T>>, top_k: usize) -> Vec<Hit<T>> {
    let mut fused: Vec<Hit<T>> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for hit in normalize_by_max(vector)
        .into_iter()
        .chain(normalize_by_max(fulltext))
    {
        match seen.get(&hit.key) {
            Some(&i) => {
                if hit.score > fused[i].score {
                    fused[i] = hit;
                }
            }
            None => {
                seen.insert(hit.key.clone(), fused.len());
                fused.push(hit);
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(top_k);
    fused
}
