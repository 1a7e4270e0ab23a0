use std::cmp::Reverse;

use log::warn;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A single detected MS1 feature, one row of a `_ms1Peak.txt` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub mz: f64,
    pub intensity: f64,
    #[serde(rename = "RT")]
    pub rt: f64,
    #[serde(rename = "pTIC")]
    pub ptic: f64,
    pub charge: i32,
}

impl Feature {
    pub fn new(mz: f64, intensity: f64, rt: f64, ptic: f64, charge: i32) -> Self {
        Feature { mz, intensity, rt, ptic, charge }
    }
}

/// How pTIC values are treated when a table is reduced to its most intense features.
///
/// Upstream feature picking assigns pTIC over *all* detected features. Whether the
/// gate should instead see pTIC recomputed over only the retained features was never
/// settled, so both are offered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PticPolicy {
    /// keep the pTIC assigned at detection time
    #[default]
    Original,
    /// cumulative intensity fraction over the retained features, in RT order
    RecomputeOverRetained,
}

/// Flat per-feature arrays consumed by the scoring kernel.
#[derive(Clone, Debug)]
pub struct FeatureView {
    pub intensity: Vec<f64>,
    pub ptic: Vec<f64>,
}

impl FeatureView {
    pub fn len(&self) -> usize {
        self.ptic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptic.is_empty()
    }
}

/// All features detected in one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(features: Vec<Feature>) -> Self {
        FeatureTable { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn max_intensity(&self) -> Option<f64> {
        self.features
            .iter()
            .map(|f| OrderedFloat(f.intensity))
            .max()
            .map(|m| m.into_inner())
    }

    /// Intensities divided by the table's maximum intensity.
    ///
    /// Computed per run, so absolute scale differences between instruments do not leak
    /// into cross-run comparisons. A table without a positive maximum is returned unscaled.
    pub fn normalized_intensity(&self) -> Vec<f64> {
        match self.max_intensity() {
            Some(max) if max > 0.0 => self.features.iter().map(|f| f.intensity / max).collect(),
            _ => {
                if !self.is_empty() {
                    warn!("feature table has no positive intensity, leaving intensities unscaled");
                }
                self.features.iter().map(|f| f.intensity).collect()
            }
        }
    }

    /// Normalized intensity and pTIC as flat arrays, indexed like the table rows.
    pub fn scoring_view(&self) -> FeatureView {
        FeatureView {
            intensity: self.normalized_intensity(),
            ptic: self.features.iter().map(|f| f.ptic).collect(),
        }
    }

    /// Keeps features whose pTIC lies in `[min, max]`, preserving order.
    pub fn filter_ptic_range(&self, min: f64, max: f64) -> Self {
        FeatureTable {
            features: self
                .features
                .iter()
                .filter(|f| f.ptic >= min && f.ptic <= max)
                .cloned()
                .collect(),
        }
    }

    /// Keeps the `n` most intense features, returned sorted by m/z.
    ///
    /// # Arguments
    ///
    /// * `n` - number of features to retain
    /// * `policy` - whether pTIC is recomputed over the retained subset
    ///
    pub fn top_n_most_intense(&self, n: usize, policy: PticPolicy) -> Self {
        let mut kept = self.features.clone();
        kept.sort_by_key(|f| Reverse(OrderedFloat(f.intensity)));
        kept.truncate(n);

        if policy == PticPolicy::RecomputeOverRetained {
            kept.sort_by_key(|f| OrderedFloat(f.rt));
            let total: f64 = kept.iter().map(|f| f.intensity).sum();
            if total > 0.0 {
                let mut acc = 0.0;
                for f in kept.iter_mut() {
                    acc += f.intensity;
                    f.ptic = acc / total;
                }
            } else {
                warn!("retained features carry no intensity, keeping original pTIC");
            }
        }

        kept.sort_by_key(|f| OrderedFloat(f.mz));
        FeatureTable { features: kept }
    }
}
