//! Conversion between dosages and diploid genotype strings.
//!
//! Dosages count copies of the wild-type allele.  The lookup is
//!
//! | dosage  | string          |
//! |---------|-----------------|
//! | 2       | `WT/WT`         |
//! | 1       | `WT/<alt>`      |
//! | 0       | `<alt>/<alt>`   |
//! | missing | `./.`           |

/// Label of the wild-type allele in genotype strings.
pub const WILD_TYPE: &str = "WT";
/// Genotype string of a missing call.
pub const MISSING_GENOTYPE: &str = "./.";
/// Cell value of a missing dosage in integer tables.
pub const MISSING_DOSAGE: &str = "NA";

/// Render a dosage as diploid genotype string.
pub fn encode(dosage: Option<u8>, alt_allele: &str) -> String {
    match dosage {
        Some(2) => format!("{}/{}", WILD_TYPE, WILD_TYPE),
        Some(1) => format!("{}/{}", WILD_TYPE, alt_allele),
        Some(0) => format!("{}/{}", alt_allele, alt_allele),
        _ => MISSING_GENOTYPE.to_string(),
    }
}

/// Inverse of `encode`; anything not produced by `encode` is missing.
pub fn decode(genotype: &str, alt_allele: &str) -> Option<u8> {
    let (first, second) = genotype.trim().split_once('/')?;
    match (first == WILD_TYPE, second == WILD_TYPE) {
        (true, true) => Some(2),
        (true, false) if second == alt_allele => Some(1),
        (false, false) if first == alt_allele && second == alt_allele => Some(0),
        _ => None,
    }
}

/// Dosage of the other allele of a bi-allelic site.
pub fn invert(dosage: Option<u8>) -> Option<u8> {
    dosage.filter(|d| *d <= 2).map(|d| 2 - d)
}

/// Re-express a genotype string with the other allele as wild type.
///
/// `from_alt` is the alt allele the string was encoded with, `to_alt` the
/// alt allele of the target orientation.
pub fn reorient(genotype: &str, from_alt: &str, to_alt: &str) -> String {
    encode(invert(decode(genotype, from_alt)), to_alt)
}

/// Render a dosage for integer tables.
pub fn format_dosage(dosage: Option<u8>) -> String {
    match dosage {
        Some(d) => d.to_string(),
        None => MISSING_DOSAGE.to_string(),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[rstest::rstest]
    #[case(Some(2), "WT/WT")]
    #[case(Some(1), "WT/A")]
    #[case(Some(0), "A/A")]
    #[case(None, "./.")]
    #[case(Some(3), "./.")]
    fn encode_lookup(#[case] dosage: Option<u8>, #[case] expected: &str) {
        assert_eq!(encode(dosage, "A"), expected);
    }

    #[rstest::rstest]
    #[case("A")]
    #[case("TTAG")]
    fn decode_inverts_encode(#[case] alt: &str) {
        for d in 0..=2u8 {
            assert_eq!(decode(&encode(Some(d), alt), alt), Some(d));
        }
        assert_eq!(decode(&encode(None, alt), alt), None);
    }

    #[rstest::rstest]
    #[case("A/WT")]
    #[case("G/G")]
    #[case("WT/G")]
    #[case("WT")]
    #[case("")]
    fn decode_foreign_strings(#[case] genotype: &str) {
        assert_eq!(decode(genotype, "A"), None);
    }

    #[rstest::rstest]
    #[case("WT/WT", "C/C")]
    #[case("WT/A", "WT/C")]
    #[case("A/A", "WT/WT")]
    #[case("./.", "./.")]
    fn reorient(#[case] genotype: &str, #[case] expected: &str) {
        assert_eq!(super::reorient(genotype, "A", "C"), expected);
    }

    #[test]
    fn format_dosage() {
        assert_eq!(super::format_dosage(Some(0)), "0");
        assert_eq!(super::format_dosage(None), "NA");
    }
}
