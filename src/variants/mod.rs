//! Variant definitions shared by matching, harmonization and extraction.

pub mod pvar;
pub mod reference;

use serde::{Deserialize, Serialize};

/// Complement of a single nucleotide, `None` for anything but `ACGT`.
pub fn complement_base(base: u8) -> Option<u8> {
    match base {
        b'A' => Some(b'T'),
        b'T' => Some(b'A'),
        b'C' => Some(b'G'),
        b'G' => Some(b'C'),
        _ => None,
    }
}

/// Allele as read from the opposite strand.
///
/// Multi-base alleles are reverse complemented; alleles with non-nucleotide
/// symbols (e.g., `-` or `I`/`D` codes) have no strand flip.
pub fn flip_allele(allele: &str) -> Option<String> {
    allele
        .bytes()
        .rev()
        .map(complement_base)
        .collect::<Option<Vec<_>>>()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|s| !s.is_empty())
}

/// Whether the allele pair reads the same on both strands (A/T, C/G, ...).
pub fn is_palindromic(allele1: &str, allele2: &str) -> bool {
    flip_allele(allele1).as_deref() == Some(allele2)
}

/// Normalized coordinate key `chrom:pos:allele1:allele2`.
pub fn variant_key(chrom: &str, pos: u64, allele1: &str, allele2: &str) -> String {
    format!("{}:{}:{}:{}", chrom, pos, allele1, allele2)
}

/// Position key `chrom:pos` used for indexing.
pub fn position_key(chrom: &str, pos: u64) -> String {
    format!("{}:{}", chrom, pos)
}

/// One entry of the caller's list of variants of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceVariant {
    /// Normalized coordinate key, see `variant_key`.
    pub variant_id: String,
    /// Canonical chromosome name.
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    /// First allele, upper case.
    pub allele1: String,
    /// Second allele, upper case.
    pub allele2: String,
    /// Human readable variant name (`snp_name`).
    pub label: Option<String>,
    /// Second name for the same coordinates.
    pub label_alt: Option<String>,
    /// Gene or locus name.
    pub locus: Option<String>,
    /// dbSNP identifier.
    pub rsid: Option<String>,
    /// Ancestry the variant was reported for.
    pub ancestry_tag: Option<String>,
}

/// A variant as present in the genotype panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelVariant {
    /// Identifier inside the panel, e.g., an array probe name.
    pub panel_id: String,
    /// Canonical chromosome name.
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    /// Panel reference allele (`REF`).
    pub allele1: String,
    /// Panel alternative allele (`ALT`).
    pub allele2: String,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case("A", Some("T"))]
    #[case("C", Some("G"))]
    #[case("AC", Some("GT"))]
    #[case("AGT", Some("ACT"))]
    #[case("-", None)]
    #[case("I", None)]
    #[case("", None)]
    fn flip_allele(#[case] allele: &str, #[case] expected: Option<&str>) {
        assert_eq!(super::flip_allele(allele).as_deref(), expected);
    }

    #[rstest::rstest]
    #[case("A", "T", true)]
    #[case("C", "G", true)]
    #[case("G", "C", true)]
    #[case("A", "C", false)]
    #[case("A", "G", false)]
    #[case("AT", "A", false)]
    fn is_palindromic(#[case] a1: &str, #[case] a2: &str, #[case] expected: bool) {
        assert_eq!(super::is_palindromic(a1, a2), expected);
    }

    #[test]
    fn keys() {
        assert_eq!(super::variant_key("12", 40309225, "A", "C"), "12:40309225:A:C");
        assert_eq!(super::position_key("X", 5), "X:5");
    }
}
