//! Implementation of the `validate` subcommand.
//!
//! Re-derives every genotype string of a combined table from the integer
//! dosages of the per-population sources and reports cells that differ.

use std::time::Instant;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    carriers::{genotype, CarrierTable},
    combine::{CombinedAlleles, PopulationExtraction},
    common::{self, expand_labeled_paths, io::csv_reader, io::csv_writer, with_suffix},
    err::CarriersError,
};

/// Command line arguments for `validate` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Validate a combined carrier table", long_about = None)]
pub struct Args {
    /// Prefix of the combined files written by `combine`.
    #[clap(long)]
    pub path_combined_prefix: String,
    /// Population as `LABEL=OUTPUT_PREFIX` of `extract`, or `@path` to a file.
    #[clap(long = "population", required = true)]
    pub populations: Vec<String>,
    /// Restrict the check to these samples.
    #[clap(long)]
    pub sample: Vec<String>,
    /// Check at most this many samples per population.
    #[clap(long)]
    pub max_samples: Option<usize>,
    /// Optional path to write mismatches to (CSV).
    #[clap(long)]
    pub path_output: Option<String>,
}

/// A combined cell that does not match its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub sample: String,
    pub population: String,
    pub variant: String,
    pub expected: String,
    pub actual: String,
}

/// Compare `combined` against the sources it was built from.
///
/// With `samples`, only those samples are checked; `max_samples` limits the
/// number of checked samples per population.
pub fn validate(
    combined: &CarrierTable<String>,
    alleles: &[CombinedAlleles],
    sources: &[PopulationExtraction],
    samples: Option<&[String]>,
    max_samples: Option<usize>,
) -> Vec<Mismatch> {
    let alleles = alleles
        .iter()
        .map(|a| (a.id.as_str(), a))
        .collect::<IndexMap<_, _>>();
    let rows = combined
        .rows
        .iter()
        .map(|r| {
            (
                (r.population.as_deref().unwrap_or_default(), r.sample_id.as_str()),
                r,
            )
        })
        .collect::<IndexMap<_, _>>();

    let mut result = Vec::new();
    for source in sources {
        let source_alt = source
            .var_info
            .iter()
            .map(|v| (v.id.as_str(), v.alt_allele.as_str()))
            .collect::<IndexMap<_, _>>();

        let checked = source
            .carriers_int
            .rows
            .iter()
            .filter(|r| samples.map(|s| s.contains(&r.sample_id)).unwrap_or(true))
            .take(max_samples.unwrap_or(usize::MAX));
        for source_row in checked {
            let combined_row = rows.get(&(source.label.as_str(), source_row.sample_id.as_str()));
            for (col, variant) in combined.variant_ids.iter().enumerate() {
                let Some(combined_alleles) = alleles.get(variant.as_str()) else {
                    continue;
                };
                let dosage = source
                    .carriers_int
                    .column(variant)
                    .and_then(|c| source_row.values.get(c).copied().flatten());
                let inverted = source_alt
                    .get(variant.as_str())
                    .map(|alt| *alt != combined_alleles.alt_allele)
                    .unwrap_or(false);
                let dosage = if inverted {
                    genotype::invert(dosage)
                } else {
                    dosage
                };
                let expected = genotype::encode(dosage, &combined_alleles.alt_allele);
                let actual = combined_row
                    .and_then(|r| r.values.get(col))
                    .cloned()
                    .unwrap_or_default();

                if expected != actual {
                    result.push(Mismatch {
                        sample: source_row.sample_id.clone(),
                        population: source.label.clone(),
                        variant: variant.clone(),
                        expected,
                        actual,
                    });
                }
            }
        }
    }

    result
}

/// Main entry point for `validate` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let prefix = &args.path_combined_prefix;
    let combined = CarrierTable::<String>::read(with_suffix(prefix, "_carriers_string.csv"))?;
    let alleles = csv_reader(with_suffix(prefix, "_var_info.csv"), b',')?
        .deserialize()
        .collect::<Result<Vec<CombinedAlleles>, _>>()
        .map_err(|e| anyhow::anyhow!("problem reading combined variant info: {}", e))?;
    let sources = expand_labeled_paths(&args.populations)?
        .iter()
        .map(|p| PopulationExtraction::load(&p.label, &p.path))
        .collect::<Result<Vec<_>, _>>()?;
    common::trace_rss_now();

    let samples = (!args.sample.is_empty()).then_some(args.sample.as_slice());
    let mismatches = validate(&combined, &alleles, &sources, samples, args.max_samples);

    if let Some(path_output) = args.path_output.as_ref() {
        let mut writer = csv_writer(path_output)?;
        for mismatch in &mismatches {
            writer.serialize(mismatch)?;
        }
        writer.flush()?;
    }

    tracing::info!(
        "Validation of {} completed in {:?}",
        prefix,
        before_anything.elapsed()
    );
    if !mismatches.is_empty() {
        for m in mismatches.iter().take(10) {
            tracing::warn!(
                "  {}/{} at {}: expected {} but found {}",
                &m.population,
                &m.sample,
                &m.variant,
                &m.expected,
                &m.actual
            );
        }
        return Err(CarriersError::Unsafe(format!(
            "{} mismatching cell(s) in {} variant(s)",
            mismatches.len(),
            mismatches.iter().map(|m| &m.variant).unique().count()
        ))
        .into());
    }

    Ok(())
}
