//! Implementation of the `extract` subcommand.
//!
//! For each population the panel is matched against the reference list, the
//! matches are harmonized, and per-sample carrier tables are written next to
//! the variant information.

use std::{path::Path, time::Instant};

use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thousands::Separable;

use crate::{
    carriers::{genotype, CarrierRecord, CarrierTable},
    common::{
        self, expand_labeled_paths, io::csv_reader, io::csv_writer, with_suffix, ChromNames,
        LabeledPath,
    },
    err::CarriersError,
    harmonize::{harmonize, HarmonizedVariant},
    matching::{find_matches, MatchReport, MatchType},
    store::{
        plink::{Plink2Config, Plink2Store},
        GenotypeStore, GenotypeTable,
    },
    variants::reference::{self, NameCollisionPolicy, ReferenceSet},
};

/// Command line arguments for `extract` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Extract carriers per population", long_about = None)]
pub struct Args {
    /// Path to the reference variant list (CSV).
    #[clap(long)]
    pub path_reference: String,
    /// Population as `LABEL=PFILE_PREFIX`, or `@path` to a file with one per line.
    #[clap(long = "population", required = true)]
    pub populations: Vec<String>,
    /// Directory to write `<LABEL>_*` output files to.
    #[clap(long)]
    pub path_output_dir: String,
    /// How to handle a variant name used for different coordinates.
    #[clap(long, value_enum, default_value_t = NameCollisionPolicy::Exclude)]
    pub name_collision: NameCollisionPolicy,
    /// Set the number of threads to use, defaults to number of cores.
    #[clap(long)]
    pub num_threads: Option<usize>,

    #[command(flatten)]
    pub plink2: Plink2Config,
}

/// One row of `<prefix>_var_info.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfoRecord {
    /// Panel identifier, also the carrier table column.
    pub id: String,
    /// Reference coordinate key.
    pub variant_id: String,
    pub snp_name: Option<String>,
    pub snp_name_alt: Option<String>,
    pub locus: Option<String>,
    pub rsid: Option<String>,
    pub ancestry: Option<String>,
    pub chrom: String,
    pub pos: u64,
    pub allele1: String,
    pub allele2: String,
    pub ref_allele: String,
    pub alt_allele: String,
    pub match_type: MatchType,
    pub alt_allele_freq: Option<f64>,
    pub observation_count: Option<u64>,
    pub missingness_rate: Option<f64>,
    pub minor_allele_confirmed: bool,
}

impl From<&HarmonizedVariant> for VarInfoRecord {
    fn from(v: &HarmonizedVariant) -> Self {
        Self {
            id: v.panel_id.clone(),
            variant_id: v.variant_id.clone(),
            snp_name: v.label.clone(),
            snp_name_alt: v.label_alt.clone(),
            locus: v.locus.clone(),
            rsid: v.rsid.clone(),
            ancestry: v.ancestry_tag.clone(),
            chrom: v.chrom.clone(),
            pos: v.pos,
            allele1: v.allele1.clone(),
            allele2: v.allele2.clone(),
            ref_allele: v.ref_allele.clone(),
            alt_allele: v.alt_allele.clone(),
            match_type: v.match_type,
            alt_allele_freq: v.alt_allele_freq,
            observation_count: v.observation_count,
            missingness_rate: v.missingness_rate,
            minor_allele_confirmed: v.minor_allele_confirmed,
        }
    }
}

/// Read a `_var_info.csv` file.
pub fn read_var_info<P: AsRef<Path>>(path: P) -> Result<Vec<VarInfoRecord>, anyhow::Error> {
    let path = path.as_ref();
    let mut reader = csv_reader(path, b',')?;
    reader
        .deserialize()
        .collect::<Result<Vec<VarInfoRecord>, _>>()
        .map_err(|e| CarriersError::MalformedInput(format!("{}: {}", path.display(), e)).into())
}

/// One row of `<prefix>_match_info.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfoRecord {
    pub panel_id: String,
    /// Reference variants, `;`-separated for ambiguous matches.
    pub variant_id: String,
    /// Orientations, `;`-separated for ambiguous matches.
    pub match_type: String,
    /// `matched` or the reason for exclusion.
    pub status: String,
}

impl MatchInfoRecord {
    fn from_report(report: &MatchReport) -> Vec<Self> {
        let matched = report.matches.iter().map(|m| Self {
            panel_id: m.panel_id.clone(),
            variant_id: m.reference_variant_id.clone(),
            match_type: m.match_type.to_string(),
            status: String::from("matched"),
        });
        let ambiguous = report.ambiguous.iter().map(|a| Self {
            panel_id: a.panel_id.clone(),
            variant_id: a.reference_variant_ids.join(";"),
            match_type: a.orientations.iter().join(";"),
            status: a.reason.to_string(),
        });
        matched.chain(ambiguous).collect()
    }
}

/// Counts written to `<prefix>_summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub population: String,
    pub worker_version: String,
    pub panel_variants: usize,
    pub reference_variants: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched_references: usize,
    pub minor_allele_unconfirmed: usize,
    pub samples: usize,
}

/// Render both carrier views from the same raw dosages in one pass.
pub fn extract(
    harmonized: &[HarmonizedVariant],
    genotypes: &GenotypeTable,
    population: &str,
) -> Result<(CarrierTable<Option<u8>>, CarrierTable<String>), CarriersError> {
    let columns = harmonized
        .iter()
        .map(|v| {
            genotypes
                .get(&v.panel_id)
                .filter(|d| d.len() == genotypes.samples.len())
                .ok_or_else(|| {
                    CarriersError::Unsafe(format!(
                        "genotype store returned no or incomplete calls for {}",
                        &v.panel_id
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let variant_ids = harmonized.iter().map(|v| v.panel_id.clone()).collect_vec();
    let mut ints = CarrierTable {
        variant_ids: variant_ids.clone(),
        rows: Vec::with_capacity(genotypes.samples.len()),
    };
    let mut strings = CarrierTable {
        variant_ids,
        rows: Vec::with_capacity(genotypes.samples.len()),
    };

    for (i, sample) in genotypes.samples.iter().enumerate() {
        let mut int_values = Vec::with_capacity(harmonized.len());
        let mut string_values = Vec::with_capacity(harmonized.len());
        for (variant, column) in harmonized.iter().zip(columns.iter()) {
            let dosage = variant.dosage(column[i]);
            int_values.push(dosage);
            string_values.push(genotype::encode(dosage, &variant.alt_allele));
        }
        ints.rows.push(CarrierRecord {
            sample_id: sample.clone(),
            population: Some(population.to_string()),
            values: int_values,
        });
        strings.rows.push(CarrierRecord {
            sample_id: sample.clone(),
            population: Some(population.to_string()),
            values: string_values,
        });
    }

    Ok((ints, strings))
}

/// Outcome of running one population through the pipeline.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub report: MatchReport,
    pub harmonized: Vec<HarmonizedVariant>,
    pub carriers_int: CarrierTable<Option<u8>>,
    pub carriers_string: CarrierTable<String>,
    pub summary: Summary,
}

impl Extraction {
    /// Write all `<prefix>_*` files.
    pub fn write(&self, prefix: &str) -> Result<(), anyhow::Error> {
        let mut writer = csv_writer(with_suffix(prefix, "_var_info.csv"))?;
        for v in &self.harmonized {
            writer.serialize(VarInfoRecord::from(v))?;
        }
        writer.flush()?;

        self.carriers_int
            .write(with_suffix(prefix, "_carriers_int.csv"), false)?;
        self.carriers_string
            .write(with_suffix(prefix, "_carriers_string.csv"), false)?;

        let mut writer = csv_writer(with_suffix(prefix, "_match_info.csv"))?;
        for record in MatchInfoRecord::from_report(&self.report) {
            writer.serialize(record)?;
        }
        writer.flush()?;

        let path_summary = with_suffix(prefix, "_summary.json");
        std::fs::write(&path_summary, serde_json::to_string_pretty(&self.summary)?)
            .map_err(|e| anyhow::anyhow!("could not write {:?}: {}", path_summary, e))?;

        Ok(())
    }
}

/// Run matching, harmonization and extraction for one population.
pub fn process<S>(
    store: &S,
    reference: &ReferenceSet,
    chroms: &ChromNames,
    population: &str,
) -> Result<Extraction, anyhow::Error>
where
    S: GenotypeStore + ?Sized,
{
    let panel = store.panel_variants()?;
    tracing::debug!(
        "{}: {} panel variants",
        population,
        panel.len().separate_with_commas()
    );

    let report = find_matches(&panel, reference, chroms);
    if report.matches.is_empty() {
        return Err(CarriersError::NoInputData(format!(
            "no reference variant found in panel of population {}",
            population
        ))
        .into());
    }

    let panel_ids = report
        .matches
        .iter()
        .map(|m| m.panel_id.clone())
        .collect_vec();
    let stats = store.extract_variants(&panel_ids)?;
    let harmonized = harmonize(&panel, &report.matches, reference, &stats)?;
    let genotypes = store.export_genotypes(&panel_ids)?;
    let (carriers_int, carriers_string) = extract(&harmonized, &genotypes, population)?;

    let summary = Summary {
        population: population.to_string(),
        worker_version: common::worker_version().to_string(),
        panel_variants: panel.len(),
        reference_variants: reference.len(),
        matched: report.matches.len(),
        ambiguous: report.ambiguous.len(),
        unmatched_references: report.unmatched_references.len(),
        minor_allele_unconfirmed: harmonized
            .iter()
            .filter(|v| !v.minor_allele_confirmed)
            .count(),
        samples: genotypes.samples.len(),
    };

    Ok(Extraction {
        report,
        harmonized,
        carriers_int,
        carriers_string,
        summary,
    })
}

/// Process and write every population in parallel.
///
/// A failing population does not affect the output of the others; the
/// failed labels are reported together once all populations ran.
pub fn extract_populations<F>(
    populations: &[LabeledPath],
    reference: &ReferenceSet,
    chroms: &ChromNames,
    output_dir: &Path,
    open_store: F,
) -> Result<Vec<Summary>, anyhow::Error>
where
    F: Fn(&LabeledPath) -> Result<Box<dyn GenotypeStore>, anyhow::Error> + Sync,
{
    let results = populations
        .par_iter()
        .map(|population| {
            let before = Instant::now();
            let prefix = output_dir.join(&population.label).display().to_string();
            let result = open_store(population)
                .and_then(|store| process(store.as_ref(), reference, chroms, &population.label))
                .and_then(|extraction| {
                    extraction.write(&prefix)?;
                    Ok(extraction.summary)
                });
            match &result {
                Ok(summary) => tracing::info!(
                    "  {}: {} matched, {} ambiguous, {} samples in {:?}",
                    &population.label,
                    summary.matched,
                    summary.ambiguous,
                    summary.samples.separate_with_commas(),
                    before.elapsed()
                ),
                Err(e) => tracing::error!("  {}: extraction failed: {:#}", &population.label, e),
            }
            (population.label.as_str(), result)
        })
        .collect::<Vec<_>>();

    let failed = results
        .iter()
        .filter(|(_, result)| result.is_err())
        .map(|(label, _)| *label)
        .collect_vec();
    if !failed.is_empty() {
        anyhow::bail!("extraction failed for population(s) {}", failed.join(", "));
    }

    Ok(results
        .into_iter()
        .filter_map(|(_, result)| result.ok())
        .collect())
}

/// Main entry point for `extract` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    if let Some(num_threads) = args.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("building global Rayon thread pool failed: {}", e))?;
    }

    common::trace_rss_now();

    let populations = expand_labeled_paths(&args.populations)?;
    let chroms = ChromNames::default();

    tracing::info!("Loading reference variants ...");
    let reference = reference::load(&args.path_reference, args.name_collision, &chroms)?;
    tracing::info!(
        "... done loading {} reference variants",
        reference.len().separate_with_commas()
    );

    std::fs::create_dir_all(&args.path_output_dir).map_err(|e| {
        anyhow::anyhow!("could not create {}: {}", &args.path_output_dir, e)
    })?;

    tracing::info!("Extracting {} population(s) ...", populations.len());
    extract_populations(
        &populations,
        &reference,
        &chroms,
        Path::new(&args.path_output_dir),
        |population| {
            let store: Box<dyn GenotypeStore> = Box::new(Plink2Store::new(
                args.plink2.clone(),
                &population.path,
                chroms.clone(),
            )?);
            Ok(store)
        },
    )?;
    common::trace_rss_now();

    tracing::info!(
        "All of `extract` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

/// Two populations sharing one variant: `A` with `s1`/`s2` and `B` with `s3`.
#[cfg(test)]
pub(crate) fn write_two_populations(dir: &Path) -> Result<Vec<common::LabeledPath>, anyhow::Error> {
    use crate::store::canned::{panel_variant, statistics, CannedStore};
    use crate::variants::reference::reference_variant;

    let reference = ReferenceSet::new(
        vec![reference_variant("v", "1", 100, "A", "G")],
        NameCollisionPolicy::Exclude,
    )?;
    let stores = [
        (
            "A",
            CannedStore::new(
                &["s1", "s2"],
                vec![(
                    panel_variant("v", "1", 100, "A", "G"),
                    statistics("v", 0.25, 2, 0.0),
                    vec![Some(2), Some(1)],
                )],
            ),
        ),
        (
            "B",
            CannedStore::new(
                &["s3"],
                vec![(
                    panel_variant("v", "1", 100, "A", "G"),
                    statistics("v", 0.9, 1, 0.0),
                    vec![Some(0)],
                )],
            ),
        ),
    ];

    let mut result = Vec::new();
    for (label, store) in &stores {
        let prefix = dir.join(label).display().to_string();
        process(store, &reference, &ChromNames::default(), label)?.write(&prefix)?;
        result.push(common::LabeledPath {
            label: label.to_string(),
            path: prefix,
        });
    }
    Ok(result)
}
