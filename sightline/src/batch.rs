//! Parallel LOS computation over a candidate pair universe.

use crate::{LosValidator, ProbeSite, SightlineError};
use log::{debug, info};
use rayon::prelude::*;

/// An accepted pair with its confidence level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairOutcome {
    /// Index of the first site in the input slice.
    pub a: usize,
    /// Index of the second site in the input slice.
    pub b: usize,
    pub confidence: f64,
}

/// Runs `validator` over every candidate pair in parallel and returns
/// the accepted ones.
///
/// Workers share the read-only site list and surface data; each worker
/// accumulates into its own buffer and the merged result is sorted by
/// `(a, b)`, so the output is identical for any worker count. Pass
/// `workers = None` to use all available cores.
pub fn compute_pairs<V: LosValidator>(
    sites: &[ProbeSite],
    pairs: &[(usize, usize)],
    validator: &V,
    confidence_threshold: f64,
    workers: Option<usize>,
) -> Result<Vec<PairOutcome>, SightlineError> {
    let run = || -> Vec<PairOutcome> {
        let now = std::time::Instant::now();
        let mut accepted: Vec<PairOutcome> = pairs
            .par_iter()
            .filter_map(|&(a, b)| {
                let confidence = validator.confidence(&sites[a], &sites[b]);
                (confidence >= confidence_threshold).then_some(PairOutcome { a, b, confidence })
            })
            .collect();
        accepted.sort_by_key(|outcome| (outcome.a, outcome.b));
        debug!(
            "los sweep; pairs: {}, accepted: {}, exec: {:?}",
            pairs.len(),
            accepted.len(),
            now.elapsed()
        );
        accepted
    };

    let accepted = match workers {
        None => run(),
        Some(count) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(count)
                .build()
                .map_err(|e| SightlineError::WorkerPool(e.to_string()))?;
            pool.install(run)
        }
    };

    info!(
        "{} of {} candidate pairs have line of sight",
        accepted.len(),
        pairs.len()
    );
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::{compute_pairs, PairOutcome};
    use crate::{LosValidator, ProbeSite};

    /// Confidence falls off with site-index distance; deterministic and
    /// cheap, which is all these tests need.
    struct FakeValidator;

    impl LosValidator for FakeValidator {
        fn confidence(&self, site1: &ProbeSite, site2: &ProbeSite) -> f64 {
            let gap = (site2.x - site1.x).abs();
            (1.0 - gap / 100.0).max(0.0)
        }
    }

    fn sites(n: usize) -> Vec<ProbeSite> {
        (0..n)
            .map(|i| ProbeSite::new(i as f64 * 10.0, 0.0, 5.0))
            .collect()
    }

    fn all_pairs(n: usize) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for a in 0..n {
            for b in (a + 1)..n {
                pairs.push((a, b));
            }
        }
        pairs
    }

    #[test]
    fn test_threshold_filters_pairs() {
        let sites = sites(5);
        let pairs = all_pairs(5);
        let accepted = compute_pairs(&sites, &pairs, &FakeValidator, 0.8, Some(2)).unwrap();
        // Only adjacent sites (gap 10 -> confidence 0.9) survive 0.8.
        assert_eq!(
            accepted,
            vec![
                PairOutcome { a: 0, b: 1, confidence: 0.9 },
                PairOutcome { a: 1, b: 2, confidence: 0.9 },
                PairOutcome { a: 2, b: 3, confidence: 0.9 },
                PairOutcome { a: 3, b: 4, confidence: 0.9 },
            ]
        );
    }

    #[test]
    fn test_lower_threshold_never_shrinks_accepted_set() {
        let sites = sites(8);
        let pairs = all_pairs(8);
        let strict = compute_pairs(&sites, &pairs, &FakeValidator, 0.7, Some(2)).unwrap();
        let loose = compute_pairs(&sites, &pairs, &FakeValidator, 0.3, Some(2)).unwrap();
        assert!(strict.len() <= loose.len());
        for outcome in &strict {
            assert!(loose.iter().any(|o| (o.a, o.b) == (outcome.a, outcome.b)));
        }
    }

    #[test]
    fn test_worker_count_does_not_change_output() {
        let sites = sites(12);
        let pairs = all_pairs(12);
        let single = compute_pairs(&sites, &pairs, &FakeValidator, 0.5, Some(1)).unwrap();
        let many = compute_pairs(&sites, &pairs, &FakeValidator, 0.5, Some(4)).unwrap();
        assert_eq!(single, many);
    }
}
