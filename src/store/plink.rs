//! Genotype store backed by a PLINK2 fileset and the `plink2` executable.

use std::{
    cell::OnceCell,
    ffi::OsString,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{parse_dosage, GenotypeStore, GenotypeTable, VariantStatistics};
use crate::{
    common::{io::csv_reader, ChromNames},
    err::CarriersError,
    variants::{pvar, variant_key, PanelVariant},
};

/// Settings for invoking `plink2`.
#[derive(clap::Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plink2Config {
    /// Path to the `plink2` executable.
    #[arg(long = "plink2-binary", default_value = "plink2")]
    pub binary: String,
    /// Number of threads for each `plink2` call.
    #[arg(long = "plink2-threads")]
    pub threads: Option<usize>,
    /// Main workspace size in MiB for each `plink2` call.
    #[arg(long = "plink2-memory-mb")]
    pub memory_mb: Option<usize>,
    /// Additional argument passed on to every `plink2` call.
    #[arg(long = "plink2-arg", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,
}

impl Default for Plink2Config {
    fn default() -> Self {
        Self {
            binary: String::from("plink2"),
            threads: None,
            memory_mb: None,
            extra_args: Vec::new(),
        }
    }
}

/// Sample identifier from a `.traw` column header (`FID_IID`).
///
/// PLINK2 writes `0_<IID>` when the fileset has no family IDs.
pub fn sample_from_traw_column(column: &str) -> String {
    column.strip_prefix("0_").unwrap_or(column).to_string()
}

/// Read a tab-separated PLINK2 report with header line.
fn read_report(path: &Path) -> Result<(csv::StringRecord, Vec<csv::StringRecord>), anyhow::Error> {
    let mut reader = csv_reader(path, b'\t')?;
    let headers = reader.headers()?.clone();
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("problem reading {}: {}", path.display(), e))?;
    Ok((headers, records))
}

fn column(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize, anyhow::Error> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| anyhow::anyhow!("column {} not found in {}", name, path.display()))
}

/// Parse a rate; PLINK2 writes `NaN` when a variant has no observations.
fn parse_rate(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| f.is_finite())
}

/// Parse `.afreq` and optional `.vmiss` output into statistics.
fn read_statistics(afreq: &Path, vmiss: &Path) -> Result<Vec<VariantStatistics>, anyhow::Error> {
    let (headers, records) = read_report(afreq)?;
    let (col_id, col_freq, col_obs) = (
        column(&headers, "ID", afreq)?,
        column(&headers, "ALT_FREQS", afreq)?,
        column(&headers, "OBS_CT", afreq)?,
    );

    let mut result: IndexMap<String, VariantStatistics> = IndexMap::new();
    for record in &records {
        let id = record.get(col_id).unwrap_or_default().to_string();
        let stats = VariantStatistics {
            variant_id: id.clone(),
            // multi-allelic entries list one frequency per ALT allele
            alt_allele_freq: parse_rate(record.get(col_freq).and_then(|s| s.split(',').next())),
            observation_count: record.get(col_obs).and_then(|s| s.parse().ok()),
            missingness_rate: None,
        };
        result.insert(id, stats);
    }

    if vmiss.exists() {
        let (headers, records) = read_report(vmiss)?;
        let (col_id, col_miss) = (column(&headers, "ID", vmiss)?, column(&headers, "F_MISS", vmiss)?);
        for record in &records {
            if let Some(stats) = record.get(col_id).and_then(|id| result.get_mut(id)) {
                stats.missingness_rate = parse_rate(record.get(col_miss));
            }
        }
    } else {
        tracing::warn!(
            "missingness report {} not found, missingness stays undefined",
            vmiss.display()
        );
    }

    Ok(result.into_values().collect())
}

/// Parse a `.traw` export, re-orienting dosages to count the panel `allele1`.
fn read_traw(
    path: &Path,
    panel: &IndexMap<&str, &PanelVariant>,
) -> Result<GenotypeTable, anyhow::Error> {
    let (headers, records) = read_report(path)?;
    let (col_snp, col_counted) = (column(&headers, "SNP", path)?, column(&headers, "COUNTED", path)?);
    let first_sample = column(&headers, "ALT", path)? + 1;
    let samples = headers
        .iter()
        .skip(first_sample)
        .map(sample_from_traw_column)
        .collect::<Vec<_>>();

    let mut dosages = IndexMap::new();
    for record in &records {
        let id = record.get(col_snp).unwrap_or_default();
        let counted = record.get(col_counted).unwrap_or_default().to_uppercase();
        let variant = panel.get(id).ok_or_else(|| {
            CarriersError::Unsafe(format!("{} exported unknown variant {}", path.display(), id))
        })?;
        let invert = if counted == variant.allele1 {
            false
        } else if counted == variant.allele2 {
            true
        } else {
            return Err(CarriersError::Unsafe(format!(
                "counted allele {} of {} is neither {} nor {}",
                counted, id, variant.allele1, variant.allele2
            ))
            .into());
        };

        let values = record
            .iter()
            .skip(first_sample)
            .map(parse_dosage)
            .map(|d| if invert { d.map(|d| 2 - d) } else { d })
            .collect::<Vec<_>>();
        dosages.insert(id.to_string(), values);
    }

    Ok(GenotypeTable { samples, dosages })
}

/// A PLINK2 `pgen`/`pvar`/`psam` fileset.
#[derive(Debug)]
pub struct Plink2Store {
    config: Plink2Config,
    pfile: PathBuf,
    work_dir: tempfile::TempDir,
    chroms: ChromNames,
    panel: OnceCell<Vec<PanelVariant>>,
    /// Copy of the `.pvar` with filled in identifiers, if any were missing.
    pvar_with_ids: OnceCell<Option<PathBuf>>,
}

impl Plink2Store {
    /// Create a store for the fileset with prefix `pfile`.
    pub fn new(config: Plink2Config, pfile: &str, chroms: ChromNames) -> Result<Self, anyhow::Error> {
        let work_dir = tempfile::Builder::new()
            .prefix("carriers-plink2.")
            .tempdir()
            .map_err(|e| anyhow::anyhow!("could not create working directory: {}", e))?;
        tracing::debug!("plink2 working directory for {} is {:?}", pfile, work_dir.path());
        Ok(Self {
            config,
            pfile: PathBuf::from(pfile),
            work_dir,
            chroms,
            panel: OnceCell::new(),
            pvar_with_ids: OnceCell::new(),
        })
    }

    fn pvar_path(&self) -> PathBuf {
        let plain = PathBuf::from(format!("{}.pvar", self.pfile.display()));
        let gz = PathBuf::from(format!("{}.pvar.gz", self.pfile.display()));
        if !plain.exists() && gz.exists() {
            gz
        } else {
            plain
        }
    }

    fn panel(&self) -> Result<&[PanelVariant], anyhow::Error> {
        if let Some(panel) = self.panel.get() {
            return Ok(panel);
        }
        let panel = pvar::read(self.pvar_path(), &self.chroms)?;
        Ok(self.panel.get_or_init(|| panel))
    }

    /// Path to a `.pvar` whose identifiers equal the reported `panel_id`s.
    ///
    /// `None` if the fileset's own `.pvar` already has every identifier.
    fn pvar_with_ids(&self) -> Result<Option<&Path>, anyhow::Error> {
        if let Some(path) = self.pvar_with_ids.get() {
            return Ok(path.as_deref());
        }
        let missing = self
            .panel()?
            .iter()
            .filter(|v| v.panel_id == variant_key(&v.chrom, v.pos, &v.allele1, &v.allele2))
            .count();
        let path = if missing > 0 {
            let path = self.work_dir.path().join("panel.pvar");
            let filled = pvar::write_with_ids(self.pvar_path(), &path, &self.chroms)?;
            tracing::info!(
                "{}: filled in {} missing variant identifier(s)",
                self.pfile.display(),
                filled
            );
            Some(path)
        } else {
            None
        };
        Ok(self.pvar_with_ids.get_or_init(|| path).as_deref())
    }

    /// Arguments selecting the fileset.
    fn fileset_args(&self) -> Result<Vec<OsString>, anyhow::Error> {
        let pfile = self.pfile.as_os_str();
        Ok(match self.pvar_with_ids()? {
            Some(pvar) => {
                let with_ext = |ext: &str| {
                    let mut path = pfile.to_os_string();
                    path.push(ext);
                    path
                };
                vec![
                    "--pgen".into(),
                    with_ext(".pgen"),
                    "--pvar".into(),
                    pvar.as_os_str().to_os_string(),
                    "--psam".into(),
                    with_ext(".psam"),
                ]
            }
            None => vec!["--pfile".into(), pfile.to_os_string()],
        })
    }

    /// Run `plink2` on the given variants, returning the output prefix.
    fn run(&self, name: &str, panel_ids: &[String], flags: &[&str]) -> Result<PathBuf, anyhow::Error> {
        let ids_path = self.work_dir.path().join(format!("{name}.ids.txt"));
        {
            let mut ids_file = std::io::BufWriter::new(std::fs::File::create(&ids_path)?);
            for id in panel_ids {
                writeln!(ids_file, "{}", id)?;
            }
            ids_file.flush()?;
        }
        let out_prefix = self.work_dir.path().join(name);

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.fileset_args()?)
            .arg("--extract")
            .arg(&ids_path)
            .args(flags);
        if let Some(threads) = self.config.threads {
            cmd.arg("--threads").arg(threads.to_string());
        }
        if let Some(memory_mb) = self.config.memory_mb {
            cmd.arg("--memory").arg(memory_mb.to_string());
        }
        cmd.args(&self.config.extra_args).arg("--out").arg(&out_prefix);

        tracing::debug!("running {:?}", &cmd);
        let before = std::time::Instant::now();
        let output = cmd
            .output()
            .map_err(|e| anyhow::anyhow!("could not run {}: {}", &self.config.binary, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "plink2 on {} failed with {}: {}",
                self.pfile.display(),
                output.status,
                stderr.trim()
            );
        }
        tracing::debug!("... plink2 {} done in {:?}", name, before.elapsed());

        Ok(out_prefix)
    }
}

impl GenotypeStore for Plink2Store {
    fn panel_variants(&self) -> Result<Vec<PanelVariant>, anyhow::Error> {
        Ok(self.panel()?.to_vec())
    }

    fn extract_variants(
        &self,
        panel_ids: &[String],
    ) -> Result<Vec<VariantStatistics>, anyhow::Error> {
        let out = self.run("stats", panel_ids, &["--freq", "--missing", "variant-only"])?;
        read_statistics(
            &PathBuf::from(format!("{}.afreq", out.display())),
            &PathBuf::from(format!("{}.vmiss", out.display())),
        )
    }

    fn export_genotypes(&self, panel_ids: &[String]) -> Result<GenotypeTable, anyhow::Error> {
        let out = self.run("genotypes", panel_ids, &["--export", "Av"])?;
        let panel = self
            .panel()?
            .iter()
            .map(|v| (v.panel_id.as_str(), v))
            .collect::<IndexMap<_, _>>();
        read_traw(&PathBuf::from(format!("{}.traw", out.display())), &panel)
    }
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    #[rstest::rstest]
    #[case("0_S1", "S1")]
    #[case("FAM1_S1", "FAM1_S1")]
    #[case("S1", "S1")]
    fn sample_from_traw_column(#[case] column: &str, #[case] expected: &str) {
        assert_eq!(super::sample_from_traw_column(column), expected);
    }

    #[test]
    fn read_statistics_with_vmiss() -> Result<(), anyhow::Error> {
        let stats = read_statistics(
            Path::new("tests/store/plink/out.afreq"),
            Path::new("tests/store/plink/out.vmiss"),
        )?;

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].variant_id, "v1");
        assert!(approx_eq!(f64, stats[0].alt_allele_freq.unwrap(), 0.25, ulps = 2));
        assert_eq!(stats[0].observation_count, Some(4));
        assert!(approx_eq!(f64, stats[0].missingness_rate.unwrap(), 0.0, ulps = 2));
        assert_eq!(stats[1].alt_allele_freq, Some(0.75));
        assert_eq!(stats[1].missingness_rate, Some(0.5));

        Ok(())
    }

    #[test]
    fn read_statistics_without_vmiss() -> Result<(), anyhow::Error> {
        let stats = read_statistics(
            Path::new("tests/store/plink/out.afreq"),
            Path::new("tests/store/plink/does-not-exist.vmiss"),
        )?;

        assert!(stats.iter().all(|s| s.missingness_rate.is_none()));

        Ok(())
    }

    #[test]
    fn read_statistics_without_observations() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let afreq = tmp_dir.join("out.afreq");
        let vmiss = tmp_dir.join("out.vmiss");
        std::fs::write(
            &afreq,
            "#CHROM\tID\tREF\tALT\tALT_FREQS\tOBS_CT\n1\tv1\tA\tC\tNaN\t0\n1\tv2\tG\tT\t0.1\t8\n",
        )?;
        std::fs::write(
            &vmiss,
            "#CHROM\tID\tMISSING_CT\tOBS_CT\tF_MISS\n1\tv1\t0\t0\tnan\n1\tv2\t0\t4\t0\n",
        )?;

        let stats = read_statistics(&afreq, &vmiss)?;

        assert_eq!(stats[0].alt_allele_freq, None);
        assert_eq!(stats[0].observation_count, Some(0));
        assert_eq!(stats[0].missingness_rate, None);
        assert_eq!(stats[1].alt_allele_freq, Some(0.1));
        assert_eq!(stats[1].missingness_rate, Some(0.0));

        Ok(())
    }

    #[test]
    fn read_traw_reorients_counted_allele() -> Result<(), anyhow::Error> {
        let v1 = PanelVariant {
            panel_id: "v1".into(),
            chrom: "1".into(),
            pos: 10,
            allele1: "A".into(),
            allele2: "C".into(),
        };
        let v2 = PanelVariant {
            panel_id: "v2".into(),
            chrom: "1".into(),
            pos: 20,
            allele1: "G".into(),
            allele2: "T".into(),
        };
        let panel = IndexMap::from([("v1", &v1), ("v2", &v2)]);

        let table = read_traw(Path::new("tests/store/plink/out.traw"), &panel)?;

        assert_eq!(table.samples, vec!["S1", "S2"]);
        // v1 counts its allele1 already
        assert_eq!(table.get("v1"), Some([Some(2), Some(1)].as_slice()));
        // v2 counts allele2 (T), so dosages are flipped
        assert_eq!(table.get("v2"), Some([Some(2), None].as_slice()));

        Ok(())
    }

    #[test]
    fn read_traw_unknown_counted_allele() {
        let v1 = PanelVariant {
            panel_id: "v1".into(),
            chrom: "1".into(),
            pos: 10,
            allele1: "G".into(),
            allele2: "T".into(),
        };
        let v2 = v1.clone();
        let panel = IndexMap::from([("v1", &v1), ("v2", &v2)]);

        let err = read_traw(Path::new("tests/store/plink/out.traw"), &panel).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CarriersError>(),
            Some(CarriersError::Unsafe(_))
        ));
    }

    #[test]
    fn run_missing_binary_fails() -> Result<(), anyhow::Error> {
        let store = Plink2Store::new(
            Plink2Config {
                binary: String::from("/nonexistent/plink2"),
                ..Default::default()
            },
            "tests/variants/panel",
            ChromNames::default(),
        )?;

        assert!(store.extract_variants(&[String::from("v1")]).is_err());

        Ok(())
    }

    #[test]
    fn fileset_with_filled_in_identifiers() -> Result<(), anyhow::Error> {
        let store = Plink2Store::new(
            Plink2Config::default(),
            "tests/variants/panel",
            ChromNames::default(),
        )?;

        let args = store
            .fileset_args()?
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>();

        assert_eq!(args.len(), 6);
        assert_eq!(
            (args[0].as_str(), args[1].as_str()),
            ("--pgen", "tests/variants/panel.pgen")
        );
        assert_eq!(
            (args[4].as_str(), args[5].as_str()),
            ("--psam", "tests/variants/panel.psam")
        );
        assert_eq!(args[2], "--pvar");
        let ids = pvar::read(&args[3], &ChromNames::default())?
            .into_iter()
            .map(|v| v.panel_id)
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            store
                .panel_variants()?
                .into_iter()
                .map(|v| v.panel_id)
                .collect::<Vec<_>>()
        );
        assert!(std::fs::read_to_string(&args[3])?.contains("\t4:89828149:G:A\t"));

        Ok(())
    }

    #[test]
    fn fileset_with_complete_identifiers() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let pfile = tmp_dir.join("complete").display().to_string();
        std::fs::write(
            format!("{}.pvar", pfile),
            "#CHROM\tPOS\tID\tREF\tALT\n1\t10\tv1\tA\tC\n",
        )?;
        let store = Plink2Store::new(Plink2Config::default(), &pfile, ChromNames::default())?;

        assert_eq!(
            store.fileset_args()?,
            vec![OsString::from("--pfile"), OsString::from(&pfile)]
        );

        Ok(())
    }

    #[test]
    fn panel_variants_from_pvar() -> Result<(), anyhow::Error> {
        let store = Plink2Store::new(
            Plink2Config::default(),
            "tests/variants/panel",
            ChromNames::default(),
        )?;

        assert_eq!(store.panel_variants()?.len(), 4);

        Ok(())
    }
}
