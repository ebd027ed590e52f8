//! Rewriting of matched panel variants into the reference orientation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    err::CarriersError,
    matching::{MatchRecord, MatchType},
    store::VariantStatistics,
    variants::{reference::ReferenceSet, PanelVariant, ReferenceVariant},
};

/// A matched panel variant in reference orientation.
///
/// `allele1`/`allele2` are the reference alleles in reference order.  Of
/// these, `alt_allele` is the counted allele, i.e., the cohort-minor one when
/// statistics were available, and `ref_allele` the wild type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizedVariant {
    /// Identifier inside the panel.
    pub panel_id: String,
    /// Key of the matched reference variant.
    pub variant_id: String,
    pub label: Option<String>,
    pub label_alt: Option<String>,
    pub locus: Option<String>,
    pub rsid: Option<String>,
    pub ancestry_tag: Option<String>,
    pub chrom: String,
    pub pos: u64,
    pub allele1: String,
    pub allele2: String,
    pub ref_allele: String,
    pub alt_allele: String,
    pub match_type: MatchType,
    /// Whether raw store dosages (copies of panel `allele1`) must be
    /// replaced by `2 - d` to count copies of `ref_allele`.
    pub dosage_inverted: bool,
    /// Frequency of `alt_allele`.
    pub alt_allele_freq: Option<f64>,
    pub observation_count: Option<u64>,
    pub missingness_rate: Option<f64>,
    /// `false` if `alt_allele` could not be verified to be the minor allele.
    pub minor_allele_confirmed: bool,
}

impl HarmonizedVariant {
    /// Orient `panel` according to `match_type` and designate the minor allele.
    pub fn new(
        panel: &PanelVariant,
        reference: &ReferenceVariant,
        match_type: MatchType,
        stats: Option<&VariantStatistics>,
    ) -> Self {
        // Frequency in the store is that of the panel allele2; after a swap,
        // the panel allele2 is the reference allele1.
        let mut dosage_inverted = match_type.is_swapped();
        let mut alt_allele_freq = stats
            .and_then(|s| s.alt_allele_freq)
            .filter(|f| f.is_finite())
            .map(|f| if dosage_inverted { 1.0 - f } else { f });
        let (mut ref_allele, mut alt_allele) = (&reference.allele1, &reference.allele2);

        if let Some(freq) = alt_allele_freq.filter(|f| *f > 0.5) {
            std::mem::swap(&mut ref_allele, &mut alt_allele);
            alt_allele_freq = Some(1.0 - freq);
            dosage_inverted = !dosage_inverted;
        }

        let minor_allele_confirmed = alt_allele_freq.is_some();
        if !minor_allele_confirmed {
            tracing::warn!(
                "no allele frequency for {}, minor allele of {} is unconfirmed",
                &panel.panel_id,
                &reference.variant_id
            );
        }

        Self {
            panel_id: panel.panel_id.clone(),
            variant_id: reference.variant_id.clone(),
            label: reference.label.clone(),
            label_alt: reference.label_alt.clone(),
            locus: reference.locus.clone(),
            rsid: reference.rsid.clone(),
            ancestry_tag: reference.ancestry_tag.clone(),
            chrom: reference.chrom.clone(),
            pos: reference.pos,
            allele1: reference.allele1.clone(),
            allele2: reference.allele2.clone(),
            ref_allele: ref_allele.clone(),
            alt_allele: alt_allele.clone(),
            match_type,
            dosage_inverted,
            alt_allele_freq,
            observation_count: stats.and_then(|s| s.observation_count),
            missingness_rate: stats
                .and_then(|s| s.missingness_rate)
                .filter(|f| f.is_finite()),
            minor_allele_confirmed,
        }
    }

    /// Convert a raw store dosage into copies of `ref_allele`.
    pub fn dosage(&self, raw: Option<u8>) -> Option<u8> {
        raw.filter(|d| *d <= 2)
            .map(|d| if self.dosage_inverted { 2 - d } else { d })
    }
}

/// Harmonize all accepted matches, in match order.
pub fn harmonize(
    panel: &[PanelVariant],
    matches: &[MatchRecord],
    reference: &ReferenceSet,
    stats: &[VariantStatistics],
) -> Result<Vec<HarmonizedVariant>, CarriersError> {
    let panel = panel
        .iter()
        .map(|v| (v.panel_id.as_str(), v))
        .collect::<IndexMap<_, _>>();
    let stats = stats
        .iter()
        .map(|s| (s.variant_id.as_str(), s))
        .collect::<IndexMap<_, _>>();

    matches
        .iter()
        .map(|record| {
            let pv = panel.get(record.panel_id.as_str()).ok_or_else(|| {
                CarriersError::Unsafe(format!("matched unknown panel variant {}", &record.panel_id))
            })?;
            let rv = reference.get(&record.reference_variant_id).ok_or_else(|| {
                CarriersError::Unsafe(format!(
                    "matched unknown reference variant {}",
                    &record.reference_variant_id
                ))
            })?;
            Ok(HarmonizedVariant::new(
                pv,
                rv,
                record.match_type,
                stats.get(record.panel_id.as_str()).copied(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        store::canned::{panel_variant, statistics},
        variants::reference::{reference_variant, NameCollisionPolicy},
    };

    #[rstest::rstest]
    // panel A>C counts A, store reports C at 0.2
    #[case(("A", "C"), ("A", "C"), MatchType::Exact, 0.2, ("A", "C"), false, 0.2)]
    #[case(("A", "C"), ("C", "A"), MatchType::Swap, 0.2, ("A", "C"), false, 0.2)]
    #[case(("A", "C"), ("C", "A"), MatchType::Swap, 0.7, ("C", "A"), true, 0.3)]
    #[case(("A", "C"), ("T", "G"), MatchType::Flip, 0.2, ("T", "G"), false, 0.2)]
    #[case(("A", "C"), ("G", "T"), MatchType::FlipSwap, 0.2, ("T", "G"), false, 0.2)]
    #[case(("A", "C"), ("A", "C"), MatchType::Exact, 0.9, ("C", "A"), true, 0.1)]
    #[case(("A", "C"), ("A", "C"), MatchType::Exact, 0.5, ("A", "C"), false, 0.5)]
    fn orientation_and_minor_allele(
        #[case] panel: (&str, &str),
        #[case] reference: (&str, &str),
        #[case] match_type: MatchType,
        #[case] store_freq: f64,
        #[case] expected_ref_alt: (&str, &str),
        #[case] expected_inverted: bool,
        #[case] expected_freq: f64,
    ) {
        let pv = panel_variant("p", "1", 10, panel.0, panel.1);
        let rv = reference_variant("x", "1", 10, reference.0, reference.1);
        let stats = statistics("p", store_freq, 100, 0.0);

        let hv = HarmonizedVariant::new(&pv, &rv, match_type, Some(&stats));

        assert_eq!((hv.allele1.as_str(), hv.allele2.as_str()), reference);
        assert_eq!(
            (hv.ref_allele.as_str(), hv.alt_allele.as_str()),
            expected_ref_alt
        );
        assert_eq!(hv.dosage_inverted, expected_inverted);
        assert!(approx_eq!(
            f64,
            hv.alt_allele_freq.unwrap(),
            expected_freq,
            epsilon = 1e-12
        ));
        assert!(hv.minor_allele_confirmed);
    }

    #[test]
    fn dosage_counts_wild_type() {
        // panel G>A counts G; reference lists A>G so the panel is swapped.
        let pv = panel_variant("p", "1", 10, "G", "A");
        let rv = reference_variant("x", "1", 10, "A", "G");
        let stats = statistics("p", 0.9, 10, 0.0);
        let hv = HarmonizedVariant::new(&pv, &rv, MatchType::Swap, Some(&stats));

        // A is the wild type with frequency 0.9; the store counts G.
        assert_eq!(hv.ref_allele, "A");
        assert_eq!(hv.alt_allele, "G");
        assert!(hv.dosage_inverted);
        assert_eq!(hv.dosage(Some(2)), Some(0));
        assert_eq!(hv.dosage(Some(0)), Some(2));
        assert_eq!(hv.dosage(None), None);
    }

    #[tracing_test::traced_test]
    #[test]
    fn missing_statistics_are_unconfirmed() {
        let pv = panel_variant("p", "1", 10, "A", "C");
        let rv = reference_variant("x", "1", 10, "C", "A");

        let hv = HarmonizedVariant::new(&pv, &rv, MatchType::Swap, None);

        assert!(!hv.minor_allele_confirmed);
        assert_eq!(hv.alt_allele_freq, None);
        assert_eq!(hv.alt_allele, "A");
        assert!(hv.dosage_inverted);
        assert_eq!(hv.dosage(Some(0)), Some(2));
        assert!(logs_contain("minor allele of 1:10:C:A is unconfirmed"));
    }

    #[test]
    fn non_finite_frequency_is_unconfirmed() {
        let pv = panel_variant("p", "1", 10, "A", "C");
        let rv = reference_variant("x", "1", 10, "A", "C");
        let stats = VariantStatistics {
            variant_id: String::from("p"),
            alt_allele_freq: Some(f64::NAN),
            observation_count: Some(0),
            missingness_rate: Some(f64::NAN),
        };

        let hv = HarmonizedVariant::new(&pv, &rv, MatchType::Exact, Some(&stats));

        assert!(!hv.minor_allele_confirmed);
        assert_eq!(hv.alt_allele_freq, None);
        assert_eq!(hv.missingness_rate, None);
        assert_eq!(hv.observation_count, Some(0));
        assert_eq!((hv.ref_allele.as_str(), hv.alt_allele.as_str()), ("A", "C"));
        assert!(!hv.dosage_inverted);
    }

    #[test]
    fn harmonize_in_match_order() -> Result<(), anyhow::Error> {
        let panel = vec![
            panel_variant("p1", "1", 10, "A", "C"),
            panel_variant("p2", "1", 20, "G", "T"),
        ];
        let reference = ReferenceSet::new(
            vec![
                reference_variant("x", "1", 10, "A", "C"),
                reference_variant("y", "1", 20, "T", "G"),
            ],
            NameCollisionPolicy::Exclude,
        )?;
        let matches = vec![
            MatchRecord {
                panel_id: "p2".into(),
                reference_variant_id: "1:20:T:G".into(),
                match_type: MatchType::Swap,
            },
            MatchRecord {
                panel_id: "p1".into(),
                reference_variant_id: "1:10:A:C".into(),
                match_type: MatchType::Exact,
            },
        ];
        let stats = vec![statistics("p1", 0.1, 4, 0.0)];

        let result = harmonize(&panel, &matches, &reference, &stats)?;

        assert_eq!(
            result.iter().map(|v| v.panel_id.as_str()).collect::<Vec<_>>(),
            vec!["p2", "p1"]
        );
        assert_eq!(result[0].label.as_deref(), Some("y"));
        assert!(!result[0].minor_allele_confirmed);
        assert!(result[1].minor_allele_confirmed);

        Ok(())
    }

    #[test]
    fn harmonize_unknown_panel_variant() {
        let reference = ReferenceSet::new(
            vec![reference_variant("x", "1", 10, "A", "C")],
            NameCollisionPolicy::Exclude,
        )
        .unwrap();
        let matches = vec![MatchRecord {
            panel_id: "nope".into(),
            reference_variant_id: "1:10:A:C".into(),
            match_type: MatchType::Exact,
        }];

        assert!(matches!(
            harmonize(&[], &matches, &reference, &[]),
            Err(CarriersError::Unsafe(_))
        ));
    }
}
