//! Narrow interface to the genotype store.
//!
//! The pipeline only ever asks the store for the panel's variant list,
//! per-variant statistics and per-sample dosages.  `plink` holds the
//! production adapter that shells out to PLINK2.

pub mod plink;
#[cfg(test)]
pub mod canned;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::variants::PanelVariant;

/// Allele frequency and missingness of one panel variant in one sub-cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantStatistics {
    /// Panel identifier.
    pub variant_id: String,
    /// Frequency of the panel `allele2`.
    pub alt_allele_freq: Option<f64>,
    /// Number of allele observations.
    pub observation_count: Option<u64>,
    /// Fraction of samples without a call.
    pub missingness_rate: Option<f64>,
}

/// Dense per-sample dosages for a set of panel variants.
///
/// Dosages count copies of the panel `allele1`; `None` is a missing call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenotypeTable {
    /// Sample identifiers, in column order.
    pub samples: Vec<String>,
    /// Panel identifier to one dosage per sample.
    pub dosages: IndexMap<String, Vec<Option<u8>>>,
}

impl GenotypeTable {
    /// Dosages of one panel variant.
    pub fn get(&self, panel_id: &str) -> Option<&[Option<u8>]> {
        self.dosages.get(panel_id).map(|v| v.as_slice())
    }
}

/// Parse a raw dosage value; non-integral or out of range values are missing.
pub fn parse_dosage(value: &str) -> Option<u8> {
    match value.trim() {
        "" | "NA" | "." => None,
        value => value
            .parse::<f64>()
            .ok()
            .filter(|d| d.fract() == 0.0 && (0.0..=2.0).contains(d))
            .map(|d| d as u8),
    }
}

/// Access to a genotype dataset of one sub-cohort.
pub trait GenotypeStore {
    /// All variants of the panel.
    fn panel_variants(&self) -> Result<Vec<PanelVariant>, anyhow::Error>;

    /// Statistics for the given panel variants.
    fn extract_variants(&self, panel_ids: &[String])
        -> Result<Vec<VariantStatistics>, anyhow::Error>;

    /// Per-sample dosages for the given panel variants.
    fn export_genotypes(&self, panel_ids: &[String]) -> Result<GenotypeTable, anyhow::Error>;
}
