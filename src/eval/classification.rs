//! Full-pass binary classification scores over collected
//! (label, positive-probability) pairs.

/// Fraction of samples where `prob > threshold` agrees with `label == 1`.
pub fn accuracy_score(labels: &[usize], probs: &[f64], threshold: f64) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels.iter().zip(probs)
        .filter(|(&y, &p)| (p > threshold) == (y == 1))
        .count();
    correct as f64 / labels.len() as f64
}

/// Area under the ROC curve via the Mann-Whitney rank statistic, with tied
/// scores sharing their average rank.
///
/// Returns `None` when only one class is present, where AUC is undefined.
pub fn roc_auc(labels: &[usize], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|&&y| y == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tie group i..=j shares their mean.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if labels[k] == 1 {
                positive_rank_sum += rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_ranking() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]), Some(0.0));
    }

    #[test]
    fn ties_count_half() {
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), Some(0.5));
        // Known value: 3 of 4 pairs ordered correctly.
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]), Some(0.75));
    }

    #[test]
    fn single_class_has_no_auc() {
        assert_eq!(roc_auc(&[1, 1], &[0.2, 0.9]), None);
    }

    #[test]
    fn thresholded_accuracy() {
        assert_eq!(accuracy_score(&[0, 1, 1, 0], &[0.2, 0.7, 0.4, 0.5], 0.5), 0.75);
    }
}
