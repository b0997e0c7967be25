//! Tail-ratio dynamic architecture selector.
//!
//! Watches the P95/P50 latency ratio per `(fn_name, architecture)` and
//! derives a selection probability over `{centralized, federated,
//! decentralized}` via a two-stage soft/hard threshold, QPS-gated cascade:
//! federated only enters the mix once QPS crosses 0.5, centralized only
//! once it crosses 1.2 *and* federated's own ratio has degraded past its
//! soft threshold. Ratios are exponentially smoothed with an adaptive alpha
//! (a logistic function of how fast QPS is changing) so a single noisy
//! sample window can't flip the architecture back and forth.

use crate::Arch;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

const MIN_SAMPLES: usize = 10;
const SAMPLE_INTERVAL_SECS: f64 = 2.0;
const QPS_THRESHOLD_FED: f64 = 0.5;
const QPS_THRESHOLD_CEN: f64 = 1.2;
const ARCH_PERF_CAPACITY: usize = 100;
const QPS_LOG_CAPACITY: usize = 2;
const RECENT_TIMES_REPORTED: usize = 10;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Mutable scheduling thresholds, exposed to `/update_threshold`.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub c_soft_d2f: f64,
    pub c_hard_d2f: f64,
    pub c_soft_f2c: f64,
    pub c_hard_f2c: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            c_soft_d2f: 1.5,
            c_hard_d2f: 2.5,
            c_soft_f2c: 1.7,
            c_hard_f2c: 2.7,
        }
    }
}

/// Selection ratios over the three concrete architectures. Always sums to
/// 1.0 once normalized (barring the all-zero edge case handled upstream).
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchWeights {
    pub centralized: f64,
    pub federated: f64,
    pub decentralized: f64,
}

impl ArchWeights {
    fn get(&self, arch: Arch) -> f64 {
        match arch {
            Arch::Centralized => self.centralized,
            Arch::Federated => self.federated,
            Arch::Decentralized => self.decentralized,
            Arch::Dynamic => 0.0,
        }
    }

    fn to_json(self) -> Value {
        json!({
            "centralized": self.centralized,
            "federated": self.federated,
            "decentralized": self.decentralized,
        })
    }
}

struct FunctionState {
    ratios: ArchWeights,
    prev_r_l: HashMap<Arch, f64>,
    last_sample_time: HashMap<Arch, f64>,
    update_times: VecDeque<f64>,
    qps_log: VecDeque<f64>,
}

impl Default for FunctionState {
    fn default() -> Self {
        FunctionState {
            ratios: ArchWeights {
                centralized: 0.0,
                federated: 0.0,
                decentralized: 1.0,
            },
            prev_r_l: HashMap::new(),
            last_sample_time: HashMap::new(),
            update_times: VecDeque::new(),
            qps_log: VecDeque::new(),
        }
    }
}

pub struct TailRatioScheduler {
    thresholds: RwLock<Thresholds>,
    functions: Mutex<HashMap<String, FunctionState>>,
    arch_perf: Mutex<HashMap<Arch, VecDeque<f64>>>,
}

impl Default for TailRatioScheduler {
    fn default() -> Self {
        let mut arch_perf = HashMap::new();
        arch_perf.insert(Arch::Centralized, VecDeque::new());
        arch_perf.insert(Arch::Federated, VecDeque::new());
        arch_perf.insert(Arch::Decentralized, VecDeque::new());
        TailRatioScheduler {
            thresholds: RwLock::new(Thresholds::default()),
            functions: Mutex::new(HashMap::new()),
            arch_perf: Mutex::new(arch_perf),
        }
    }
}

impl TailRatioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute architecture ratios for `fn_name` given the current
    /// in-window durations (seconds) per architecture.
    pub fn update_ratios(
        &self,
        fn_name: &str,
        durations: &HashMap<Arch, Vec<f64>>,
    ) -> ArchWeights {
        let now = now_secs();
        let thresholds = *self.thresholds.read();
        let mut functions = self.functions.lock();
        let state = functions.entry(fn_name.to_string()).or_default();
        state.update_times.push_back(now);

        let mut r_prime = HashMap::new();
        for arch in [Arch::Centralized, Arch::Federated, Arch::Decentralized] {
            let empty = Vec::new();
            let samples = durations.get(&arch).unwrap_or(&empty);
            let last_sample = *state.last_sample_time.get(&arch).unwrap_or(&0.0);

            let r_l = if now - last_sample >= SAMPLE_INTERVAL_SECS && samples.len() >= MIN_SAMPLES {
                let p95 = percentile(samples, 95.0);
                let p50 = percentile(samples, 50.0);
                let r_l = if p50 > 0.0 { p95 / p50 } else { f64::INFINITY };

                state.prev_r_l.insert(arch, r_l);
                state.last_sample_time.insert(arch, now);

                let qps_now = state.update_times.len() as f64 / SAMPLE_INTERVAL_SECS;
                if state.qps_log.len() == QPS_LOG_CAPACITY {
                    state.qps_log.pop_front();
                }
                state.qps_log.push_back(qps_now);
                state.update_times.clear();

                r_l
            } else if samples.len() <= MIN_SAMPLES {
                1.0
            } else {
                *state.prev_r_l.get(&arch).unwrap_or(&1.0)
            };

            r_prime.insert(arch, r_l);
        }

        let new_ratios = Self::calculate_architecture_weights(&thresholds, &state.qps_log, &r_prime);
        let smoothed = Self::apply_smoothing(&state.ratios, &state.qps_log, new_ratios);

        let total = smoothed.centralized + smoothed.federated + smoothed.decentralized;
        if total > 0.0 {
            state.ratios = ArchWeights {
                centralized: round3(smoothed.centralized / total),
                federated: round3(smoothed.federated / total),
                decentralized: round3(smoothed.decentralized / total),
            };
        }

        state.ratios
    }

    fn calculate_architecture_weights(
        thresholds: &Thresholds,
        qps_log: &VecDeque<f64>,
        r_prime: &HashMap<Arch, f64>,
    ) -> ArchWeights {
        let qps_now = qps_log.back().copied().unwrap_or(0.0);

        let dec_r = *r_prime.get(&Arch::Decentralized).unwrap_or(&thresholds.c_soft_d2f);
        let fed_r = *r_prime.get(&Arch::Federated).unwrap_or(&thresholds.c_soft_f2c);

        let (fed_weight, cen_weight) = if qps_now >= QPS_THRESHOLD_FED {
            let fed_weight = map_r_to_weight(dec_r, thresholds.c_soft_d2f, thresholds.c_hard_d2f);
            let cen_weight = if qps_now >= QPS_THRESHOLD_CEN {
                map_r_to_weight(fed_r, thresholds.c_soft_f2c, thresholds.c_hard_f2c)
            } else {
                0.0
            };
            (fed_weight, cen_weight)
        } else {
            (0.0, 0.0)
        };

        let centralized = round3(cen_weight * fed_weight);
        let federated = round3(fed_weight - centralized);
        let decentralized = round3(1.0 - federated - centralized);

        ArchWeights {
            centralized,
            federated,
            decentralized,
        }
    }

    fn apply_smoothing(old: &ArchWeights, qps_log: &VecDeque<f64>, new: ArchWeights) -> ArchWeights {
        let alpha = if qps_log.len() < 2 {
            1.0
        } else {
            let a = qps_log[qps_log.len() - 1];
            let b = qps_log[qps_log.len() - 2];
            let delta_qps = (a - b).abs();
            0.1 + 0.8 * (1.0 / (1.0 + (-0.5 * (delta_qps - 5.0)).exp()))
        };

        ArchWeights {
            centralized: round3((1.0 - alpha) * old.centralized + alpha * new.centralized),
            federated: round3((1.0 - alpha) * old.federated + alpha * new.federated),
            decentralized: round3((1.0 - alpha) * old.decentralized + alpha * new.decentralized),
        }
    }

    /// Weighted-random pick of one architecture from `weights`. Falls back
    /// to decentralized when every weight is zero (or negative, which is
    /// clamped to zero first).
    pub fn select_arch(&self, weights: ArchWeights) -> Arch {
        let candidates = [Arch::Centralized, Arch::Federated, Arch::Decentralized];
        let clamped: Vec<f64> = candidates.iter().map(|a| weights.get(*a).max(0.0)).collect();

        if clamped.iter().sum::<f64>() == 0.0 {
            return Arch::Decentralized;
        }

        use rand::distributions::{Distribution, WeightedIndex};
        let dist = WeightedIndex::new(&clamped).expect("checked non-zero sum above");
        candidates[dist.sample(&mut rand::thread_rng())]
    }

    /// Record one end-to-end duration (seconds) attributed to `arch`.
    pub fn record_arch_perf(&self, arch: Arch, total_time: f64) {
        let mut perf = self.arch_perf.lock();
        if let Some(deque) = perf.get_mut(&arch) {
            if deque.len() == ARCH_PERF_CAPACITY {
                deque.pop_front();
            }
            deque.push_back(total_time);
        }
    }

    pub fn update_thresholds(&self, thresholds: Thresholds) {
        *self.thresholds.write() = thresholds;
    }

    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    /// Snapshot for `GET /arch_metrics`.
    pub fn metrics(&self) -> Value {
        let functions = self.functions.lock();
        let arch_ratios: HashMap<&str, Value> = functions
            .iter()
            .map(|(fn_name, state)| (fn_name.as_str(), state.ratios.to_json()))
            .collect();
        let qps_log: HashMap<&str, Vec<f64>> = functions
            .iter()
            .map(|(fn_name, state)| (fn_name.as_str(), state.qps_log.iter().copied().collect()))
            .collect();

        let perf = self.arch_perf.lock();
        let arch_performance: HashMap<&str, Value> = perf
            .iter()
            .map(|(arch, deque)| {
                let recent: Vec<f64> = deque
                    .iter()
                    .rev()
                    .take(RECENT_TIMES_REPORTED)
                    .rev()
                    .copied()
                    .collect();
                let avg = if deque.is_empty() {
                    0.0
                } else {
                    deque.iter().sum::<f64>() / deque.len() as f64
                };
                (
                    arch.as_str(),
                    json!({
                        "recent_times": recent,
                        "avg_time": avg,
                        "sample_count": deque.len(),
                    }),
                )
            })
            .collect();

        json!({
            "arch_ratios": arch_ratios,
            "arch_performance": arch_performance,
            "qps_log": qps_log,
        })
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn map_r_to_weight(r: f64, c_soft: f64, c_hard: f64) -> f64 {
    if r < c_soft {
        0.0
    } else if r > c_hard {
        1.0
    } else {
        (r - c_soft) / (c_hard - c_soft)
    }
}

/// Linear-interpolation percentile, matching `numpy.percentile`'s default.
fn percentile(data: &[f64], pct: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_known_values() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 1e-9);
        assert!((percentile(&data, 95.0) - 9.55).abs() < 1e-9);
    }

    #[test]
    fn cold_start_favors_decentralized() {
        let scheduler = TailRatioScheduler::new();
        let durations = HashMap::new();
        let weights = scheduler.update_ratios("hello", &durations);
        assert_eq!(weights.decentralized, 1.0);
        assert_eq!(weights.federated, 0.0);
        assert_eq!(weights.centralized, 0.0);
    }

    #[test]
    fn select_arch_all_zero_falls_back_to_decentralized() {
        let scheduler = TailRatioScheduler::new();
        let weights = ArchWeights {
            centralized: 0.0,
            federated: 0.0,
            decentralized: 0.0,
        };
        assert_eq!(scheduler.select_arch(weights), Arch::Decentralized);
    }

    #[test]
    fn select_arch_picks_from_nonzero_weights_only() {
        let scheduler = TailRatioScheduler::new();
        let weights = ArchWeights {
            centralized: 1.0,
            federated: 0.0,
            decentralized: 0.0,
        };
        for _ in 0..20 {
            assert_eq!(scheduler.select_arch(weights), Arch::Centralized);
        }
    }

    #[test]
    fn record_arch_perf_caps_at_capacity() {
        let scheduler = TailRatioScheduler::new();
        for i in 0..150 {
            scheduler.record_arch_perf(Arch::Centralized, i as f64);
        }
        let metrics = scheduler.metrics();
        let sample_count = metrics["arch_performance"]["centralized"]["sample_count"]
            .as_u64()
            .unwrap();
        assert_eq!(sample_count, ARCH_PERF_CAPACITY as u64);
    }

    #[test]
    fn map_r_to_weight_interpolates_between_thresholds() {
        assert_eq!(map_r_to_weight(1.0, 1.5, 2.5), 0.0);
        assert_eq!(map_r_to_weight(3.0, 1.5, 2.5), 1.0);
        assert!((map_r_to_weight(2.0, 1.5, 2.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cascade_engages_centralized_once_both_tails_degrade_and_qps_is_high() {
        let thresholds = Thresholds {
            c_soft_d2f: 1.1,
            c_hard_d2f: 1.2,
            c_soft_f2c: 1.1,
            c_hard_f2c: 1.2,
        };
        let mut qps_log = VecDeque::new();
        qps_log.push_back(1.5);
        let mut r_prime = HashMap::new();
        r_prime.insert(Arch::Decentralized, 1.5);
        r_prime.insert(Arch::Federated, 1.5);

        let weights = TailRatioScheduler::calculate_architecture_weights(&thresholds, &qps_log, &r_prime);
        assert_eq!(weights.centralized, 1.0);
        assert_eq!(weights.federated, 0.0);
        assert_eq!(weights.decentralized, 0.0);
    }

    #[test]
    fn update_thresholds_changes_subsequent_mapping() {
        let scheduler = TailRatioScheduler::new();
        scheduler.update_thresholds(Thresholds {
            c_soft_d2f: 1.0,
            c_hard_d2f: 2.0,
            c_soft_f2c: 1.0,
            c_hard_f2c: 2.0,
        });
        let t = scheduler.thresholds();
        assert_eq!(t.c_soft_d2f, 1.0);
        assert_eq!(t.c_hard_d2f, 2.0);
    }
}
