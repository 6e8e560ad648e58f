//! Evaluation metrics for the binary FRB/noise classifier.
//!
//! Once a model has produced hard predictions for the evaluation set, these
//! helpers partition the examples into confusion-matrix cells, derive the
//! usual summary scores, and slice the per-example SNR values by cell so
//! recall can be studied as a function of burst brightness.

use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised on malformed evaluation inputs.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("label arrays differ in length: {y_true} true vs {y_pred} predicted")]
    LengthMismatch { y_true: usize, y_pred: usize },

    #[error("SNR array has {snrs} values for {labels} labels")]
    SnrLengthMismatch { snrs: usize, labels: usize },

    #[error("labels must be 0 or 1, found {0} at index {1}")]
    InvalidLabel(u8, usize),
}

/// Guard against division by zero in ratio metrics, as the source pipeline
/// does.
const EPS: f64 = 1e-19;

// ---------------------------------------------------------------------------
// Outcome partition
// ---------------------------------------------------------------------------

/// Example indices partitioned by classification outcome.
#[derive(Clone, Debug, Default)]
pub struct ClassificationOutcomes {
    pub true_positives: Vec<usize>,
    pub false_positives: Vec<usize>,
    pub true_negatives: Vec<usize>,
    pub false_negatives: Vec<usize>,
}

impl ClassificationOutcomes {
    /// Total number of partitioned examples.
    pub fn total(&self) -> usize {
        self.true_positives.len()
            + self.false_positives.len()
            + self.true_negatives.len()
            + self.false_negatives.len()
    }
}

/// Partition example indices into TP/FP/TN/FN for binary labels.
///
/// Every index lands in exactly one cell, so the four index sets always
/// partition `0..y_true.len()`.
pub fn classification_results(
    y_true: &[u8],
    y_pred: &[u8],
) -> Result<ClassificationOutcomes, MetricsError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricsError::LengthMismatch {
            y_true: y_true.len(),
            y_pred: y_pred.len(),
        });
    }

    let mut outcomes = ClassificationOutcomes::default();
    for (i, (&truth, &pred)) in y_true.iter().zip(y_pred.iter()).enumerate() {
        if truth > 1 {
            return Err(MetricsError::InvalidLabel(truth, i));
        }
        if pred > 1 {
            return Err(MetricsError::InvalidLabel(pred, i));
        }
        match (truth, pred) {
            (1, 1) => outcomes.true_positives.push(i),
            (0, 1) => outcomes.false_positives.push(i),
            (0, 0) => outcomes.true_negatives.push(i),
            _ => outcomes.false_negatives.push(i),
        }
    }
    Ok(outcomes)
}

// ---------------------------------------------------------------------------
// SNR partition
// ---------------------------------------------------------------------------

/// Per-cell SNR values of the evaluated examples.
#[pyclass(get_all)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnrPartition {
    pub true_positives: Vec<f64>,
    pub false_positives: Vec<f64>,
    pub true_negatives: Vec<f64>,
    pub false_negatives: Vec<f64>,
}

#[pymethods]
impl SnrPartition {
    fn __repr__(&self) -> String {
        format!(
            "SnrPartition(TP={}, FP={}, TN={}, FN={})",
            self.true_positives.len(),
            self.false_positives.len(),
            self.true_negatives.len(),
            self.false_negatives.len(),
        )
    }
}

/// Slice per-example SNR values by classification outcome.
pub fn snr_partition(
    y_true: &[u8],
    y_pred: &[u8],
    snrs: &[f64],
) -> Result<SnrPartition, MetricsError> {
    if snrs.len() != y_true.len() {
        return Err(MetricsError::SnrLengthMismatch {
            snrs: snrs.len(),
            labels: y_true.len(),
        });
    }
    let outcomes = classification_results(y_true, y_pred)?;
    let pick = |idx: &[usize]| idx.iter().map(|&i| snrs[i]).collect();

    Ok(SnrPartition {
        true_positives: pick(&outcomes.true_positives),
        false_positives: pick(&outcomes.false_positives),
        true_negatives: pick(&outcomes.true_negatives),
        false_negatives: pick(&outcomes.false_negatives),
    })
}

// ---------------------------------------------------------------------------
// ConfusionMatrix
// ---------------------------------------------------------------------------

/// Binary-classifier confusion matrix, laid out `[[TP, FP], [FN, TN]]`.
#[pyclass(get_all)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
}

#[pymethods]
impl ConfusionMatrix {
    /// Build a confusion matrix from true and predicted binary labels.
    #[new]
    pub fn py_new(y_true: Vec<u8>, y_pred: Vec<u8>) -> PyResult<Self> {
        Self::from_labels(&y_true, &y_pred)
            .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
    }

    /// Number of evaluated examples.
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.false_negatives + self.true_negatives
    }

    /// Fraction of predictions that are correct.
    pub fn accuracy(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        (self.true_positives + self.true_negatives) as f64 / self.total() as f64
    }

    /// TP / (TP + FP).
    pub fn precision(&self) -> f64 {
        self.true_positives as f64 / ((self.true_positives + self.false_positives) as f64 + EPS)
    }

    /// TP / (TP + FN).
    pub fn recall(&self) -> f64 {
        self.true_positives as f64 / ((self.true_positives + self.false_negatives) as f64 + EPS)
    }

    /// Harmonic mean of precision and recall.
    pub fn fscore(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        2.0 * p * r / (p + r + EPS)
    }

    /// Serialise the matrix to a JSON string for interoperability.
    pub fn to_json(&self) -> PyResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        format!(
            "ConfusionMatrix([[{}, {}], [{}, {}]], accuracy={:.4})",
            self.true_positives,
            self.false_positives,
            self.false_negatives,
            self.true_negatives,
            self.accuracy(),
        )
    }
}

impl ConfusionMatrix {
    /// Build a confusion matrix from binary label slices (Rust-native
    /// interface).
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Result<Self, MetricsError> {
        let outcomes = classification_results(y_true, y_pred)?;
        Ok(Self {
            true_positives: outcomes.true_positives.len(),
            false_positives: outcomes.false_positives.len(),
            false_negatives: outcomes.false_negatives.len(),
            true_negatives: outcomes.true_negatives.len(),
        })
    }

    /// The matrix as nested counts, `[[TP, FP], [FN, TN]]`.
    pub fn counts(&self) -> [[usize; 2]; 2] {
        [
            [self.true_positives, self.false_positives],
            [self.false_negatives, self.true_negatives],
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const Y_TRUE: [u8; 8] = [1, 1, 1, 1, 0, 0, 0, 0];
    const Y_PRED: [u8; 8] = [1, 1, 1, 0, 0, 0, 1, 0];

    #[test]
    fn outcomes_partition_every_index() {
        let outcomes = classification_results(&Y_TRUE, &Y_PRED).unwrap();
        assert_eq!(outcomes.true_positives, vec![0, 1, 2]);
        assert_eq!(outcomes.false_negatives, vec![3]);
        assert_eq!(outcomes.false_positives, vec![6]);
        assert_eq!(outcomes.true_negatives, vec![4, 5, 7]);
        assert_eq!(outcomes.total(), Y_TRUE.len());
    }

    #[test]
    fn rejects_length_mismatch_and_bad_labels() {
        assert!(matches!(
            classification_results(&[1, 0], &[1]),
            Err(MetricsError::LengthMismatch { .. })
        ));
        assert!(matches!(
            classification_results(&[2, 0], &[1, 0]),
            Err(MetricsError::InvalidLabel(2, 0))
        ));
        assert!(matches!(
            classification_results(&[1, 0], &[1, 3]),
            Err(MetricsError::InvalidLabel(3, 1))
        ));
    }

    #[test]
    fn confusion_counts_sum_to_total() {
        let cm = ConfusionMatrix::from_labels(&Y_TRUE, &Y_PRED).unwrap();
        assert_eq!(cm.counts(), [[3, 1], [1, 3]]);
        assert_eq!(cm.total(), 8);
    }

    #[test]
    fn derived_scores_match_hand_computation() {
        let cm = ConfusionMatrix::from_labels(&Y_TRUE, &Y_PRED).unwrap();
        assert_relative_eq!(cm.accuracy(), 0.75, epsilon = 1e-12);
        assert_relative_eq!(cm.precision(), 0.75, epsilon = 1e-9);
        assert_relative_eq!(cm.recall(), 0.75, epsilon = 1e-9);
        assert_relative_eq!(cm.fscore(), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn perfect_and_empty_edge_cases() {
        let cm = ConfusionMatrix::from_labels(&[1, 0], &[1, 0]).unwrap();
        assert_relative_eq!(cm.accuracy(), 1.0, epsilon = 1e-12);

        let empty = ConfusionMatrix::from_labels(&[], &[]).unwrap();
        assert_eq!(empty.total(), 0);
        assert_eq!(empty.accuracy(), 0.0);
        // Degenerate ratios collapse to zero instead of dividing by zero.
        assert_eq!(empty.precision(), 0.0);
        assert_eq!(empty.fscore(), 0.0);
    }

    #[test]
    fn snr_values_follow_their_examples() {
        let snrs: Vec<f64> = (0..8).map(|i| 8.0 + i as f64).collect();
        let part = snr_partition(&Y_TRUE, &Y_PRED, &snrs).unwrap();
        assert_eq!(part.true_positives, vec![8.0, 9.0, 10.0]);
        assert_eq!(part.false_negatives, vec![11.0]);
        assert_eq!(part.false_positives, vec![14.0]);
        assert_eq!(part.true_negatives, vec![12.0, 13.0, 15.0]);

        assert!(matches!(
            snr_partition(&Y_TRUE, &Y_PRED, &snrs[..4]),
            Err(MetricsError::SnrLengthMismatch { .. })
        ));
    }
}
