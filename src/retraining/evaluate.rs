//! Held-out evaluation and decision-threshold selection

use crate::types::ModelMetrics;

/// Default decision-threshold grid, 0.1 to 0.9 in steps of 0.1
pub fn default_threshold_grid() -> Vec<f64> {
    (1..=9).map(|i| i as f64 / 10.0).collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct Confusion {
    tp: usize,
    tn: usize,
    fp: usize,
    fn_: usize,
}

impl Confusion {
    fn at(probabilities: &[f64], labels: &[bool], threshold: f64) -> Self {
        let mut c = Confusion::default();
        for (&p, &actual) in probabilities.iter().zip(labels) {
            match (p >= threshold, actual) {
                (true, true) => c.tp += 1,
                (false, false) => c.tn += 1,
                (true, false) => c.fp += 1,
                (false, true) => c.fn_ += 1,
            }
        }
        c
    }

    fn ratio(num: usize, den: usize) -> f64 {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }

    fn precision(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    fn accuracy(&self) -> f64 {
        Self::ratio(self.tp + self.tn, self.tp + self.tn + self.fp + self.fn_)
    }
}

/// Area under the ROC curve via the rank statistic, averaging tied ranks.
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(probabilities: &[f64], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum += mean_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Metrics of `probabilities` at `threshold`.
pub fn evaluate(probabilities: &[f64], labels: &[bool], threshold: f64) -> ModelMetrics {
    let c = Confusion::at(probabilities, labels, threshold);
    ModelMetrics {
        accuracy: c.accuracy(),
        precision: c.precision(),
        recall: c.recall(),
        f1: c.f1(),
        roc_auc: roc_auc(probabilities, labels),
    }
}

/// Grid threshold with the highest F1; the lowest threshold wins ties.
pub fn best_threshold(probabilities: &[f64], labels: &[bool], grid: &[f64]) -> Option<(f64, f64)> {
    grid.iter().fold(None, |best, &t| {
        let f1 = Confusion::at(probabilities, labels, t).f1();
        match best {
            Some((_, best_f1)) if f1 <= best_f1 => best,
            _ => Some((t, f1)),
        }
    })
}
