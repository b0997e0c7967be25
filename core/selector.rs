//! Latency-weighted target selector.
//!
//! Picks among candidate nodes (or zones) using a product-of-others
//! probability weighting over the sliding-window response-log store: the
//! weight assigned to a candidate is large exactly when *every other*
//! candidate is slow, which concentrates probability mass on the fastest
//! nodes while keeping every node reachable whenever at least one other
//! node has shown non-zero latency.

use crate::store::ResponseLog;
use crate::Node;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

pub struct TargetSelector;

impl TargetSelector {
    /// Select a node from `candidates`, weighting by each node's in-window
    /// average response time for `fn_name` (identifier = node id).
    pub fn select_target<'n>(
        candidates: &[&'n Node],
        fn_name: &str,
        response_log: &ResponseLog,
    ) -> &'n Node {
        Self::select_by(candidates, fn_name, response_log, |n| n.id.as_str())
    }

    /// Select a node representing a zone, weighting by each zone's in-window
    /// average response time for `fn_name` (identifier = zone name).
    pub fn select_zone<'n>(
        candidates: &[&'n Node],
        fn_name: &str,
        response_log: &ResponseLog,
    ) -> &'n Node {
        Self::select_by(candidates, fn_name, response_log, |n| n.zone.as_str())
    }

    fn select_by<'n>(
        candidates: &[&'n Node],
        fn_name: &str,
        response_log: &ResponseLog,
        identifier: impl Fn(&Node) -> &str,
    ) -> &'n Node {
        assert!(!candidates.is_empty(), "select_by requires at least one candidate");
        if candidates.len() == 1 {
            return candidates[0];
        }

        let weights: Vec<f64> = candidates
            .iter()
            .map(|n| response_log.average(identifier(n), fn_name))
            .collect();

        let n = weights.len();
        let mut numerators = vec![0.0; n];
        for k in 0..n {
            let mut product = 1.0;
            for (i, w) in weights.iter().enumerate() {
                if i != k {
                    product *= w;
                }
            }
            numerators[k] = product;
        }

        let denominator: f64 = numerators.iter().sum();
        let any_negative = numerators.iter().any(|&x| x < 0.0);

        if denominator == 0.0 || any_negative {
            let idx = rand::thread_rng().gen_range(0..n);
            return candidates[idx];
        }

        let dist = WeightedIndex::new(&numerators)
            .expect("denominator > 0 and no negative numerators verified above");
        let idx = dist.sample(&mut rand::thread_rng());
        candidates[idx]
    }
}
