//! Common functionality.

use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use indexmap::IndexMap;

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!("RSS now: {}", bytesize::ByteSize::b(rss)),
        Err(e) => tracing::trace!("could not determine RSS: {}", e),
    }
}

/// Definition of canonical chromosome names.
pub const CHROMS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "M",
];

/// Build mapping of chromosome names to chromosome counts.
pub fn build_chrom_map() -> IndexMap<String, usize> {
    let mut result = IndexMap::new();
    for (i, &chrom_name) in CHROMS.iter().enumerate() {
        result.insert(chrom_name.to_owned(), i);
        result.insert(format!("chr{chrom_name}"), i);
    }
    result.insert("x".to_owned(), 22);
    result.insert("y".to_owned(), 23);
    result.insert("chrx".to_owned(), 22);
    result.insert("chry".to_owned(), 23);
    result.insert("mt".to_owned(), 24);
    result.insert("m".to_owned(), 24);
    result.insert("chrmt".to_owned(), 24);
    result.insert("chrm".to_owned(), 24);
    result.insert("MT".to_owned(), 24);
    result.insert("chrMT".to_owned(), 24);
    result
}

/// Canonical chromosome names and their sort rank.
///
/// Names not in `CHROMS` keep their spelling minus a `chr` prefix and sort
/// after all canonical chromosomes.
#[derive(Debug, Clone)]
pub struct ChromNames {
    map: IndexMap<String, usize>,
}

impl Default for ChromNames {
    fn default() -> Self {
        Self {
            map: build_chrom_map(),
        }
    }
}

impl ChromNames {
    /// Return the canonical spelling of `name`.
    pub fn canonicalize(&self, name: &str) -> String {
        let name = name.trim();
        match self.map.get(name) {
            Some(idx) => CHROMS[*idx].to_string(),
            None => name
                .strip_prefix("chr")
                .unwrap_or(name)
                .to_string(),
        }
    }

    /// Sort rank of a canonical chromosome name.
    pub fn rank(&self, canonical: &str) -> usize {
        self.map.get(canonical).copied().unwrap_or(CHROMS.len())
    }
}

/// One `LABEL=PATH` pair as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledPath {
    /// Population label, e.g., `EUR`.
    pub label: String,
    /// Path or path prefix belonging to the population.
    pub path: String,
}

impl std::str::FromStr for LabeledPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, path) = s
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected LABEL=PATH but got {:?}", s))?;
        let (label, path) = (label.trim(), path.trim());
        if label.is_empty() || path.is_empty() {
            anyhow::bail!("empty label or path in {:?}", s);
        }
        Ok(Self {
            label: label.to_string(),
            path: shellexpand::tilde(path).into_owned(),
        })
    }
}

/// Expand `@file` arguments into the `LABEL=PATH` lines of that file.
pub fn expand_labeled_paths(args: &[String]) -> Result<Vec<LabeledPath>, anyhow::Error> {
    let mut result: Vec<LabeledPath> = Vec::new();
    for arg in args {
        if let Some(path) = arg.strip_prefix('@') {
            let path = shellexpand::tilde(path).into_owned();
            for line in io::read_lines(&path)
                .map_err(|e| anyhow::anyhow!("could not read population list {}: {}", path, e))?
            {
                let line = line?;
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    result.push(line.parse()?);
                }
            }
        } else {
            result.push(arg.parse()?);
        }
    }

    let mut seen = std::collections::HashSet::new();
    for item in &result {
        if !seen.insert(item.label.as_str()) {
            anyhow::bail!("population label {} given more than once", &item.label);
        }
    }
    Ok(result)
}

/// Build the path `{prefix}{suffix}`.
pub fn with_suffix(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}{suffix}"))
}

/// Return the version of the `carriers-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case("1", "1")]
    #[case("chr1", "1")]
    #[case("chrX", "X")]
    #[case("x", "X")]
    #[case("MT", "M")]
    #[case("chrM", "M")]
    #[case(" 12 ", "12")]
    #[case("chrUn_KI270302v1", "Un_KI270302v1")]
    fn canonicalize(#[case] name: &str, #[case] expected: &str) {
        let names = super::ChromNames::default();
        assert_eq!(names.canonicalize(name), expected);
    }

    #[test]
    fn rank_orders_known_before_unknown() {
        let names = super::ChromNames::default();
        assert!(names.rank("2") < names.rank("10"));
        assert!(names.rank("22") < names.rank("X"));
        assert!(names.rank("M") < names.rank("Un_KI270302v1"));
    }

    #[rstest::rstest]
    #[case("EUR=/data/eur", "EUR", "/data/eur")]
    #[case(" AFR = out/afr ", "AFR", "out/afr")]
    fn labeled_path_from_str(#[case] s: &str, #[case] label: &str, #[case] path: &str) {
        let actual: super::LabeledPath = s.parse().unwrap();
        assert_eq!(actual.label, label);
        assert_eq!(actual.path, path);
    }

    #[rstest::rstest]
    #[case("EUR")]
    #[case("=path")]
    #[case("EUR=")]
    fn labeled_path_from_str_invalid(#[case] s: &str) {
        assert!(s.parse::<super::LabeledPath>().is_err());
    }

    #[test]
    fn expand_labeled_paths_at_file() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let list = tmp_dir.join("pops.txt");
        std::fs::write(&list, "# populations\nAFR=out/AFR\n\nEUR=out/EUR\n")?;

        let actual = super::expand_labeled_paths(&[
            format!("@{}", list.display()),
            String::from("AMR=out/AMR"),
        ])?;

        let labels = actual.iter().map(|p| p.label.as_str()).collect::<Vec<_>>();
        assert_eq!(labels, vec!["AFR", "EUR", "AMR"]);

        Ok(())
    }

    #[test]
    fn expand_labeled_paths_duplicate_label() {
        let res = super::expand_labeled_paths(&[
            String::from("EUR=a"),
            String::from("EUR=b"),
        ]);
        assert!(res.is_err());
    }
}
