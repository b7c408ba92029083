//! Stratified splitting and class rebalancing of training data

use rand::seq::SliceRandom;
use rand::Rng;

/// Split row indices into (train, test), keeping each class's share of the test partition.
///
/// Each class with at least two rows contributes at least one test row.
pub fn stratified_split<R: Rng>(labels: &[bool], test_size: f64, rng: &mut R) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [false, true] {
        let mut idx: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect();
        idx.shuffle(rng);

        let n = idx.len();
        let mut n_test = (n as f64 * test_size).round() as usize;
        if n >= 2 {
            n_test = n_test.clamp(1, n - 1);
        } else {
            n_test = 0;
        }
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Synthesize minority (fraud) rows until `fraud / legitimate >= ratio`.
///
/// Each synthetic row interpolates between a random minority row and one of
/// its `k` nearest minority neighbours. Nothing happens when the ratio is
/// already met or fewer than two minority rows exist.
pub fn smote<R: Rng>(
    rows: &mut Vec<Vec<f64>>,
    labels: &mut Vec<bool>,
    ratio: f64,
    k: usize,
    rng: &mut R,
) -> usize {
    let minority: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| l)
        .map(|(i, _)| i)
        .collect();
    let majority = labels.len() - minority.len();
    let target = (ratio * majority as f64 - 1e-9).ceil().max(0.0) as usize;

    if minority.len() < 2 || k == 0 || target <= minority.len() {
        return 0;
    }
    let k = k.min(minority.len() - 1);

    let neighbours: Vec<Vec<usize>> = minority
        .iter()
        .map(|&i| {
            let mut others: Vec<(f64, usize)> = minority
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| (squared_distance(&rows[i], &rows[j]), j))
                .collect();
            others.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            others.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect();

    let n_new = target - minority.len();
    for _ in 0..n_new {
        let pick = rng.gen_range(0..minority.len());
        let base = &rows[minority[pick]];
        let other = &rows[neighbours[pick][rng.gen_range(0..k)]];
        let gap: f64 = rng.gen();
        let synthetic = base
            .iter()
            .zip(other)
            .map(|(a, b)| a + gap * (b - a))
            .collect();
        rows.push(synthetic);
        labels.push(true);
    }
    n_new
}

/// Drop random majority (legitimate) rows until `fraud / legitimate >= ratio`.
pub fn undersample<R: Rng>(
    rows: Vec<Vec<f64>>,
    labels: Vec<bool>,
    ratio: f64,
    rng: &mut R,
) -> (Vec<Vec<f64>>, Vec<bool>) {
    let fraud = labels.iter().filter(|&&l| l).count();
    let legitimate = labels.len() - fraud;
    if fraud == 0 || ratio <= 0.0 {
        return (rows, labels);
    }
    let keep = ((fraud as f64 / ratio).floor() as usize).max(1);
    if keep >= legitimate {
        return (rows, labels);
    }

    let mut majority: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| !l)
        .map(|(i, _)| i)
        .collect();
    majority.shuffle(rng);
    let mut kept = vec![false; labels.len()];
    for &i in &majority[..keep] {
        kept[i] = true;
    }
    for (i, &l) in labels.iter().enumerate() {
        if l {
            kept[i] = true;
        }
    }

    rows.into_iter()
        .zip(labels)
        .zip(kept)
        .filter(|(_, k)| *k)
        .map(|(pair, _)| pair)
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn imbalanced(fraud: usize, legit: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..fraud {
            rows.push(vec![10.0 + i as f64, 1.0]);
            labels.push(true);
        }
        for i in 0..legit {
            rows.push(vec![i as f64 / 10.0, 0.0]);
            labels.push(false);
        }
        (rows, labels)
    }

    #[test]
    fn test_split_keeps_both_classes_in_test() {
        let (_, labels) = imbalanced(10, 90);
        let mut rng = StdRng::seed_from_u64(42);
        let (train, test) = stratified_split(&labels, 0.2, &mut rng);

        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| labels[i]).count(), 2);
        assert!(train.iter().all(|i| !test.contains(i)));
    }

    #[test]
    fn test_split_is_seeded() {
        let (_, labels) = imbalanced(7, 33);
        let a = stratified_split(&labels, 0.2, &mut StdRng::seed_from_u64(42));
        let b = stratified_split(&labels, 0.2, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_smote_reaches_ratio_inside_minority_hull() {
        let (mut rows, mut labels) = imbalanced(5, 100);
        let mut rng = StdRng::seed_from_u64(42);
        let added = smote(&mut rows, &mut labels, 0.3, 3, &mut rng);

        assert_eq!(added, 25);
        assert_eq!(labels.iter().filter(|&&l| l).count(), 30);
        for (row, _) in rows.iter().zip(&labels).filter(|(_, &l)| l) {
            assert!(row[0] >= 10.0 && row[0] <= 14.0);
            assert_eq!(row[1], 1.0);
        }
    }

    #[test]
    fn test_smote_skips_when_balanced_or_too_few() {
        let (mut rows, mut labels) = imbalanced(40, 100);
        assert_eq!(smote(&mut rows, &mut labels, 0.3, 3, &mut StdRng::seed_from_u64(1)), 0);

        let (mut rows, mut labels) = imbalanced(1, 100);
        assert_eq!(smote(&mut rows, &mut labels, 0.3, 3, &mut StdRng::seed_from_u64(1)), 0);
        assert_eq!(rows.len(), 101);
    }

    #[test]
    fn test_undersample_keeps_all_fraud() {
        let (rows, labels) = imbalanced(30, 100);
        let (rows, labels) = undersample(rows, labels, 0.7, &mut StdRng::seed_from_u64(42));
        let fraud = labels.iter().filter(|&&l| l).count();
        assert_eq!(fraud, 30);
        assert_eq!(labels.len() - fraud, 42);
        assert_eq!(rows.len(), labels.len());
    }

    proptest! {
        #[test]
        fn prop_rebalance_reaches_target(fraud in 2usize..30, legit in 30usize..300, seed in any::<u64>()) {
            let (mut rows, mut labels) = imbalanced(fraud, legit);
            let mut rng = StdRng::seed_from_u64(seed);
            smote(&mut rows, &mut labels, 0.3, 3, &mut rng);
            let (rows, labels) = undersample(rows, labels, 0.7, &mut rng);

            let f = labels.iter().filter(|&&l| l).count() as f64;
            let l = (labels.len() as f64) - f;
            prop_assert_eq!(rows.len(), labels.len());
            prop_assert!(f / l >= 0.7 - 1e-9);
        }
    }
}
