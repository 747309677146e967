//! Vector distance math shared by every backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Distance metric used to rank stored vectors against a query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance, in `[0, inf)`.
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }

    /// Distance between two vectors of equal dimension.
    ///
    /// Returns `None` on dimension mismatch, empty input, or a zero-norm
    /// vector under the cosine metric.
    pub fn distance(&self, a: &[f64], b: &[f64]) -> Option<f64> {
        if a.is_empty() || a.len() != b.len() {
            return None;
        }
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => Some(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f64>()
                    .sqrt(),
            ),
        }
    }

    /// Similarity reported alongside a distance.
    pub fn distance_to_similarity(&self, distance: f64) -> f64 {
        match self {
            Self::Cosine => 1.0 - distance,
            Self::L2 => 1.0 / (1.0 + distance),
        }
    }

    /// Distance ceiling equivalent to a similarity floor.
    pub fn similarity_to_distance(&self, similarity: f64) -> f64 {
        match self {
            Self::Cosine => 1.0 - similarity,
            Self::L2 => 1.0 / similarity - 1.0,
        }
    }

    /// Whether `similarity` is a meaningful floor for this metric.
    pub fn accepts_threshold(&self, similarity: f64) -> bool {
        similarity.is_finite()
            && match self {
                Self::Cosine => (-1.0..=1.0).contains(&similarity),
                Self::L2 => similarity > 0.0 && similarity <= 1.0,
            }
    }
}

fn cosine_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let cos = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    Some(1.0 - cos)
}

/// Read a stored vector: a JSON array of numbers, or a string holding one
/// (the `[1,2,3]` text form).
pub fn parse_vector(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => items.iter().map(Value::as_f64).collect(),
        Value::String(text) => match serde_json::from_str::<Value>(text).ok()? {
            Value::Array(items) => items.iter().map(Value::as_f64).collect(),
            _ => None,
        },
        _ => None,
    }
}
