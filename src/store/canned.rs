//! In-memory genotype store for tests.

use indexmap::IndexMap;

use super::{GenotypeStore, GenotypeTable, VariantStatistics};
use crate::variants::PanelVariant;

/// Store answering from fixed tables.
#[derive(Debug, Clone, Default)]
pub struct CannedStore {
    pub panel: Vec<PanelVariant>,
    pub statistics: Vec<VariantStatistics>,
    pub genotypes: GenotypeTable,
}

impl CannedStore {
    /// Build from panel variants and `(statistics, dosages)` per variant.
    pub fn new(
        samples: &[&str],
        variants: Vec<(PanelVariant, VariantStatistics, Vec<Option<u8>>)>,
    ) -> Self {
        let mut result = Self {
            genotypes: GenotypeTable {
                samples: samples.iter().map(|s| s.to_string()).collect(),
                dosages: IndexMap::new(),
            },
            ..Default::default()
        };
        for (variant, stats, dosages) in variants {
            result
                .genotypes
                .dosages
                .insert(variant.panel_id.clone(), dosages);
            result.statistics.push(stats);
            result.panel.push(variant);
        }
        result
    }
}

impl GenotypeStore for CannedStore {
    fn panel_variants(&self) -> Result<Vec<PanelVariant>, anyhow::Error> {
        Ok(self.panel.clone())
    }

    fn extract_variants(
        &self,
        panel_ids: &[String],
    ) -> Result<Vec<VariantStatistics>, anyhow::Error> {
        Ok(self
            .statistics
            .iter()
            .filter(|s| panel_ids.contains(&s.variant_id))
            .cloned()
            .collect())
    }

    fn export_genotypes(&self, panel_ids: &[String]) -> Result<GenotypeTable, anyhow::Error> {
        Ok(GenotypeTable {
            samples: self.genotypes.samples.clone(),
            dosages: self
                .genotypes
                .dosages
                .iter()
                .filter(|(id, _)| panel_ids.contains(id))
                .map(|(id, d)| (id.clone(), d.clone()))
                .collect(),
        })
    }
}

/// Shorthand for a panel variant.
pub fn panel_variant(panel_id: &str, chrom: &str, pos: u64, a1: &str, a2: &str) -> PanelVariant {
    PanelVariant {
        panel_id: panel_id.to_string(),
        chrom: chrom.to_string(),
        pos,
        allele1: a1.to_string(),
        allele2: a2.to_string(),
    }
}

/// Shorthand for complete statistics.
pub fn statistics(panel_id: &str, freq: f64, obs: u64, missing: f64) -> VariantStatistics {
    VariantStatistics {
        variant_id: panel_id.to_string(),
        alt_allele_freq: Some(freq),
        observation_count: Some(obs),
        missingness_rate: Some(missing),
    }
}
