//! Implementation of the `combine` subcommand.
//!
//! Merges the per-population outputs of `extract` into one variant table and
//! one pair of carrier tables.  Each population is aligned to the allele
//! orientation under which a variant was first seen, statistics are pooled
//! weighted by observation count, and probes sharing coordinates and alleles
//! are collapsed to the one with the lowest missingness.

use std::{path::Path, time::Instant};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thousands::Separable;

use crate::{
    carriers::{concat, genotype, CarrierTable},
    common::{self, expand_labeled_paths, io::csv_writer, with_suffix, LabeledPath},
    err::CarriersError,
    extract::{read_var_info, VarInfoRecord},
    matching::MatchType,
};

/// What to do about a population whose extraction files are missing.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    clap::ValueEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MissingPopulationPolicy {
    /// Abort the whole combination.
    #[default]
    Fail,
    /// Leave the population out and record it as skipped.
    Skip,
}

/// Command line arguments for `combine` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Combine per-population carrier tables", long_about = None)]
pub struct Args {
    /// Population as `LABEL=OUTPUT_PREFIX` of `extract`, or `@path` to a file.
    #[clap(long = "population", required = true)]
    pub populations: Vec<String>,
    /// Prefix of the combined output files.
    #[clap(long)]
    pub path_output_prefix: String,
    /// Keep all probes even if they share coordinates and alleles.
    #[clap(long)]
    pub no_dedup: bool,
    /// Handling of populations with missing extraction files.
    #[clap(long, value_enum, default_value_t = MissingPopulationPolicy::Fail)]
    pub on_missing: MissingPopulationPolicy,
}

/// The `extract` output of one population.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationExtraction {
    pub label: String,
    pub var_info: Vec<VarInfoRecord>,
    pub carriers_int: CarrierTable<Option<u8>>,
    pub carriers_string: CarrierTable<String>,
}

impl PopulationExtraction {
    /// Load the files written by `extract` under `prefix`.
    pub fn load(label: &str, prefix: &str) -> Result<Self, anyhow::Error> {
        let paths = [
            with_suffix(prefix, "_var_info.csv"),
            with_suffix(prefix, "_carriers_int.csv"),
            with_suffix(prefix, "_carriers_string.csv"),
        ];
        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            return Err(CarriersError::MissingPopulation {
                label: label.to_string(),
                path: missing.display().to_string(),
            }
            .into());
        }
        let [path_var_info, path_int, path_string] = paths;

        let mut result = Self {
            label: label.to_string(),
            var_info: read_var_info(&path_var_info)?,
            carriers_int: CarrierTable::read(&path_int)?,
            carriers_string: CarrierTable::read(&path_string)?,
        };
        for population in result
            .carriers_int
            .rows
            .iter_mut()
            .map(|r| &mut r.population)
            .chain(result.carriers_string.rows.iter_mut().map(|r| &mut r.population))
        {
            *population = Some(label.to_string());
        }
        Ok(result)
    }
}

/// Statistics of one variant in one population, in combined orientation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStatistics {
    pub alt_allele_freq: Option<f64>,
    pub observation_count: Option<u64>,
    pub missingness_rate: Option<f64>,
}

/// One row of the combined variant table.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedVariantInfo {
    /// Metadata of the first population the variant was seen in.
    pub info: VarInfoRecord,
    /// Statistics by population label.
    pub populations: IndexMap<String, PopulationStatistics>,
    pub alt_allele_freq: Option<f64>,
    pub observation_count: Option<u64>,
    pub missingness_rate: Option<f64>,
    /// Highest missingness of any population.
    pub missingness_max: Option<f64>,
    /// Whether every contributing population confirmed the minor allele.
    pub minor_allele_confirmed: bool,
    /// Whether this probe represents a group of probes with equal alleles.
    pub used_for_dedup: bool,
}

impl CombinedVariantInfo {
    /// Pool per-population statistics, weighted by observation count.
    fn aggregate(&mut self) {
        let weighted = |value: fn(&PopulationStatistics) -> Option<f64>| {
            let (sum, weight) = self
                .populations
                .values()
                .filter_map(|s| {
                    let v = value(s).filter(|v| v.is_finite())?;
                    Some((v, s.observation_count?))
                })
                .fold((0.0, 0u64), |(sum, weight), (v, o)| {
                    (sum + v * o as f64, weight + o)
                });
            (weight > 0).then(|| sum / weight as f64)
        };
        let alt_allele_freq = weighted(|s| s.alt_allele_freq);
        let missingness_rate = weighted(|s| s.missingness_rate);

        self.alt_allele_freq = alt_allele_freq;
        self.missingness_rate = missingness_rate;
        self.missingness_max = self
            .populations
            .values()
            .filter_map(|s| s.missingness_rate.filter(|m| m.is_finite()))
            .max_by(f64::total_cmp);
        self.observation_count = self
            .populations
            .values()
            .filter_map(|s| s.observation_count)
            .fold(None, |acc, o| Some(acc.unwrap_or(0) + o));
    }

    fn dedup_key(&self) -> (&str, u64, &str, &str) {
        (
            &self.info.chrom,
            self.info.pos,
            &self.info.allele1,
            &self.info.allele2,
        )
    }
}

/// Whether a population took part in the combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationStatus {
    pub population: String,
    /// `included` or `skipped`.
    pub status: String,
    pub reason: Option<String>,
}

/// Output of `combine`.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub variants: Vec<CombinedVariantInfo>,
    pub carriers_string: CarrierTable<String>,
    pub carriers_int: CarrierTable<Option<u8>>,
    pub populations: Vec<PopulationStatus>,
}

/// Decide the orientation of `record` relative to `canonical`.
///
/// Returns whether the population's dosages must be inverted.
pub fn orientation(record: &VarInfoRecord, canonical: &VarInfoRecord) -> Result<bool, CarriersError> {
    let same_site = record.chrom == canonical.chrom && record.pos == canonical.pos;
    let alleles = |r: &VarInfoRecord| {
        let mut a = [r.ref_allele.clone(), r.alt_allele.clone()];
        a.sort();
        a
    };
    if !same_site || alleles(record) != alleles(canonical) {
        return Err(CarriersError::Unsafe(format!(
            "probe {} is {}:{} {}/{} in one population but {}:{} {}/{} in another",
            &record.id,
            &canonical.chrom,
            canonical.pos,
            &canonical.ref_allele,
            &canonical.alt_allele,
            &record.chrom,
            record.pos,
            &record.ref_allele,
            &record.alt_allele,
        )));
    }
    Ok(record.alt_allele != canonical.alt_allele)
}

/// Merge per-population extractions.
pub fn combine(
    extractions: &[PopulationExtraction],
    dedup: bool,
) -> Result<Combination, CarriersError> {
    if extractions.is_empty() {
        return Err(CarriersError::NoInputData("no population to combine".into()));
    }

    // Union of variants, aligned to first occurrence.
    let mut variants: IndexMap<String, CombinedVariantInfo> = IndexMap::new();
    let mut alignments = Vec::with_capacity(extractions.len());
    for extraction in extractions {
        // Panel ids whose alt allele is the combined ref allele, with the
        // population's alt allele.
        let mut inverted_ids: IndexMap<&str, &str> = IndexMap::new();
        for record in &extraction.var_info {
            let combined = variants
                .entry(record.id.clone())
                .or_insert_with(|| CombinedVariantInfo {
                    info: record.clone(),
                    populations: IndexMap::new(),
                    alt_allele_freq: None,
                    observation_count: None,
                    missingness_rate: None,
                    missingness_max: None,
                    minor_allele_confirmed: true,
                    used_for_dedup: false,
                });
            let inverted = orientation(record, &combined.info)?;
            if inverted {
                inverted_ids.insert(record.id.as_str(), record.alt_allele.as_str());
            }

            combined.minor_allele_confirmed &= record.minor_allele_confirmed;
            combined.populations.insert(
                extraction.label.clone(),
                PopulationStatistics {
                    alt_allele_freq: record
                        .alt_allele_freq
                        .filter(|f| f.is_finite())
                        .map(|f| if inverted { 1.0 - f } else { f }),
                    observation_count: record.observation_count,
                    missingness_rate: record.missingness_rate.filter(|m| m.is_finite()),
                },
            );
        }
        alignments.push(inverted_ids);
    }
    for v in variants.values_mut() {
        v.aggregate();
    }

    // Collapse probes sharing coordinates and alleles.
    let mut surviving = variants.keys().cloned().collect_vec();
    if dedup {
        let mut groups: IndexMap<(&str, u64, &str, &str), Vec<&CombinedVariantInfo>> =
            IndexMap::new();
        for v in variants.values() {
            groups.entry(v.dedup_key()).or_default().push(v);
        }
        let mut representatives = IndexSet::new();
        let mut used_for_dedup = IndexSet::new();
        for group in groups.values() {
            let best = group
                .iter()
                .enumerate()
                .min_by(|(i, a), (j, b)| match (a.missingness_rate, b.missingness_rate) {
                    (Some(x), Some(y)) => x.total_cmp(&y).then(i.cmp(j)),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => i.cmp(j),
                })
                .map(|(_, v)| v.info.id.clone());
            if let Some(best) = best {
                if group.len() > 1 {
                    tracing::debug!(
                        "keeping {} of {:?}",
                        &best,
                        group.iter().map(|v| v.info.id.as_str()).collect_vec()
                    );
                    used_for_dedup.insert(best.clone());
                }
                representatives.insert(best);
            }
        }
        surviving.retain(|id| representatives.contains(id));
        for id in &used_for_dedup {
            if let Some(v) = variants.get_mut(id) {
                v.used_for_dedup = true;
            }
        }
    }

    // Stack carrier tables in combined orientation.
    let mut ints = Vec::with_capacity(extractions.len());
    let mut strings = Vec::with_capacity(extractions.len());
    for (extraction, inverted_ids) in extractions.iter().zip(alignments.iter()) {
        let mut int_table = extraction.carriers_int.clone();
        let mut string_table = extraction.carriers_string.clone();
        for (id, from_alt) in inverted_ids {
            let Some(to_alt) = variants.get(*id).map(|v| v.info.alt_allele.as_str()) else {
                continue;
            };
            if let Some(col) = int_table.column(id) {
                for row in int_table.rows.iter_mut() {
                    row.values[col] = genotype::invert(row.values[col]);
                }
            }
            if let Some(col) = string_table.column(id) {
                for row in string_table.rows.iter_mut() {
                    row.values[col] = genotype::reorient(&row.values[col], from_alt, to_alt);
                }
            }
        }
        ints.push(int_table);
        strings.push(string_table);
    }

    let carriers_int = concat(&ints).select(&surviving);
    let carriers_string = concat(&strings).select(&surviving);
    let variants = surviving
        .iter()
        .filter_map(|id| variants.get(id).cloned())
        .collect_vec();

    Ok(Combination {
        variants,
        carriers_string,
        carriers_int,
        populations: extractions
            .iter()
            .map(|e| PopulationStatus {
                population: e.label.clone(),
                status: String::from("included"),
                reason: None,
            })
            .collect(),
    })
}

/// Load the extraction of every population, honoring `policy`.
pub fn load_populations(
    populations: &[LabeledPath],
    policy: MissingPopulationPolicy,
) -> Result<(Vec<PopulationExtraction>, Vec<PopulationStatus>), anyhow::Error> {
    let mut extractions = Vec::new();
    let mut skipped = Vec::new();
    for population in populations {
        match PopulationExtraction::load(&population.label, &population.path) {
            Ok(extraction) => extractions.push(extraction),
            Err(e) => {
                let is_missing = matches!(
                    e.downcast_ref::<CarriersError>(),
                    Some(CarriersError::MissingPopulation { .. })
                );
                if !is_missing || policy == MissingPopulationPolicy::Fail {
                    return Err(e);
                }
                tracing::warn!("skipping population: {}", e);
                skipped.push(PopulationStatus {
                    population: population.label.clone(),
                    status: String::from("skipped"),
                    reason: Some(e.to_string()),
                });
            }
        }
    }
    Ok((extractions, skipped))
}

impl Combination {
    /// Write all `<prefix>_*` files.
    pub fn write(&self, prefix: &str) -> Result<(), anyhow::Error> {
        self.write_var_info(with_suffix(prefix, "_var_info.csv"))?;
        self.carriers_string
            .write(with_suffix(prefix, "_carriers_string.csv"), true)?;
        self.carriers_int
            .write(with_suffix(prefix, "_carriers_int.csv"), true)?;

        let mut writer = csv_writer(with_suffix(prefix, "_populations.csv"))?;
        for status in &self.populations {
            writer.serialize(status)?;
        }
        writer.flush()?;

        Ok(())
    }

    fn write_var_info<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let labels = self
            .populations
            .iter()
            .filter(|p| p.reason.is_none())
            .map(|p| p.population.as_str())
            .collect_vec();
        let fmt_f64 = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        let fmt_u64 = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_default();
        let fmt_str = |v: &Option<String>| v.clone().unwrap_or_default();

        let mut writer = csv_writer(path.as_ref())?;
        let mut header = [
            "id",
            "variant_id",
            "snp_name",
            "snp_name_alt",
            "locus",
            "rsid",
            "ancestry",
            "chrom",
            "pos",
            "allele1",
            "allele2",
            "ref_allele",
            "alt_allele",
            "match_type",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect_vec();
        for prefix in ["alt_allele_freq", "observation_count", "missingness"] {
            header.extend(labels.iter().map(|l| format!("{}_{}", prefix, l)));
        }
        header.extend(
            [
                "alt_allele_freq",
                "observation_count",
                "missingness_rate",
                "missingness_max",
                "minor_allele_confirmed",
                "used_for_dedup",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        writer.write_record(&header)?;

        for v in &self.variants {
            let info = &v.info;
            let mut record = vec![
                info.id.clone(),
                info.variant_id.clone(),
                fmt_str(&info.snp_name),
                fmt_str(&info.snp_name_alt),
                fmt_str(&info.locus),
                fmt_str(&info.rsid),
                fmt_str(&info.ancestry),
                info.chrom.clone(),
                info.pos.to_string(),
                info.allele1.clone(),
                info.allele2.clone(),
                info.ref_allele.clone(),
                info.alt_allele.clone(),
                info.match_type.to_string(),
            ];
            let stats = labels
                .iter()
                .map(|l| v.populations.get(*l).cloned().unwrap_or_default())
                .collect_vec();
            record.extend(stats.iter().map(|s| fmt_f64(s.alt_allele_freq)));
            record.extend(stats.iter().map(|s| fmt_u64(s.observation_count)));
            record.extend(stats.iter().map(|s| fmt_f64(s.missingness_rate)));
            record.extend([
                fmt_f64(v.alt_allele_freq),
                fmt_u64(v.observation_count),
                fmt_f64(v.missingness_rate),
                fmt_f64(v.missingness_max),
                v.minor_allele_confirmed.to_string(),
                v.used_for_dedup.to_string(),
            ]);
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .map_err(|e| anyhow::anyhow!("could not flush {:?}: {}", path.as_ref(), e))?;

        Ok(())
    }
}

/// The columns of a combined `_var_info.csv` the validator needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedAlleles {
    pub id: String,
    pub ref_allele: String,
    pub alt_allele: String,
    pub match_type: MatchType,
}

/// Main entry point for `combine` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    common::trace_rss_now();

    let populations = expand_labeled_paths(&args.populations)?;
    tracing::info!("Loading {} population(s) ...", populations.len());
    let (extractions, skipped) = load_populations(&populations, args.on_missing)?;
    tracing::info!(
        "... loaded {} population(s), skipped {}",
        extractions.len(),
        skipped.len()
    );

    let before_combine = Instant::now();
    let mut combination = combine(&extractions, !args.no_dedup)?;
    combination.populations.extend(skipped);
    tracing::info!(
        "Combined {} variants and {} samples in {:?}",
        combination.variants.len().separate_with_commas(),
        combination.carriers_int.rows.len().separate_with_commas(),
        before_combine.elapsed()
    );

    if let Some(parent) = Path::new(&args.path_output_prefix).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("could not create {:?}: {}", parent, e))?;
        }
    }
    combination.write(&args.path_output_prefix)?;

    common::trace_rss_now();
    tracing::info!(
        "All of `combine` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
