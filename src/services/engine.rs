//! Best-match identification over a store snapshot.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FaceError, Result};
use crate::services::store::{Profile, ProfileStore};
use crate::services::DistanceMetric;

/// Outcome of a successful identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Identification {
    /// The best similarity cleared the acceptance bound.
    Match { name: String, confidence: f32 },
    /// Nothing cleared the bound; carries the best similarity seen.
    NoMatch { best_similarity: f32 },
}

/// Finds the stored profile closest to a query embedding.
pub struct IdentificationEngine {
    store: Arc<ProfileStore>,
    metric: DistanceMetric,
    threshold: f32,
}

impl IdentificationEngine {
    /// `threshold` is the maximum acceptable distance; a match needs a
    /// similarity strictly greater than `1 - threshold`.
    pub fn new(store: Arc<ProfileStore>, metric: DistanceMetric, threshold: f32) -> Self {
        Self {
            store,
            metric,
            threshold,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Identify `query` against a fresh snapshot of the store.
    pub fn identify(&self, query: &[f32], model_id: &str) -> Result<Identification> {
        let snapshot = self.store.snapshot();
        let outcome = best_match(&snapshot, query, model_id, self.metric, self.threshold)?;
        match &outcome {
            Identification::Match { name, confidence } => {
                info!("Identified {} (confidence: {:.2})", name, confidence)
            }
            Identification::NoMatch { best_similarity } => {
                info!("No matching profile (best similarity: {:.2})", best_similarity)
            }
        }
        Ok(outcome)
    }
}

/// Scan `profiles` in order and keep the single highest similarity.
///
/// Profiles of another model are skipped. A same-model embedding of another
/// dimensionality fails the whole query with `ModelMismatch`. Ties keep the
/// first profile that reached the maximum.
pub fn best_match(
    profiles: &[Arc<Profile>],
    query: &[f32],
    model_id: &str,
    metric: DistanceMetric,
    threshold: f32,
) -> Result<Identification> {
    let mut best: Option<&str> = None;
    let mut best_similarity = 0.0f32;
    let mut skipped = 0usize;

    for profile in profiles {
        if profile.model_id != model_id {
            skipped += 1;
            continue;
        }
        for stored in &profile.embeddings {
            if stored.len() != query.len() {
                return Err(FaceError::ModelMismatch {
                    expected: format!("{} ({} dimensions)", model_id, query.len()),
                    found: format!("{} ({} dimensions)", profile.name, stored.len()),
                });
            }
            let similarity = metric.similarity(query, stored);
            if best.is_none() || similarity > best_similarity {
                best_similarity = similarity;
                best = Some(&profile.name);
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} profiles built with another model", skipped);
    }

    match best {
        Some(name) if best_similarity > 1.0 - threshold => Ok(Identification::Match {
            name: name.to_string(),
            confidence: best_similarity,
        }),
        _ => Ok(Identification::NoMatch { best_similarity }),
    }
}
