//! Matching of genotype panel variants against the reference list.
//!
//! Both sets are joined on `chrom:pos`.  Each candidate pair is tested under
//! the four orientation hypotheses; a pair is accepted only when exactly one
//! of them holds and the allele pair is not palindromic.  Panel variants are
//! visited in `(chrom, pos, panel_id)` order so that the report is stable.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    common::ChromNames,
    variants::{
        flip_allele, is_palindromic, position_key, reference::ReferenceSet, PanelVariant,
        ReferenceVariant,
    },
};

/// Orientation of a panel variant relative to its reference variant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchType {
    /// Same alleles, same order.
    Exact,
    /// Same alleles, opposite order.
    Swap,
    /// Complemented alleles, same order.
    Flip,
    /// Complemented alleles, opposite order.
    FlipSwap,
}

impl MatchType {
    /// Whether the panel's allele order is reversed.
    pub fn is_swapped(self) -> bool {
        matches!(self, MatchType::Swap | MatchType::FlipSwap)
    }

    /// Whether the panel reads the opposite strand.
    pub fn is_flipped(self) -> bool {
        matches!(self, MatchType::Flip | MatchType::FlipSwap)
    }

    /// Whether the hypothesis holds for the given allele pairs.
    fn holds(self, panel: (&str, &str), reference: (&str, &str)) -> bool {
        let (p1, p2) = if self.is_flipped() {
            match (flip_allele(panel.0), flip_allele(panel.1)) {
                (Some(p1), Some(p2)) => (p1, p2),
                _ => return false,
            }
        } else {
            (panel.0.to_string(), panel.1.to_string())
        };
        if self.is_swapped() {
            p1 == reference.1 && p2 == reference.0
        } else {
            p1 == reference.0 && p2 == reference.1
        }
    }
}

const ALL_MATCH_TYPES: [MatchType; 4] = [
    MatchType::Exact,
    MatchType::Swap,
    MatchType::Flip,
    MatchType::FlipSwap,
];

/// All orientation hypotheses under which `panel` equals `reference`.
pub fn orientations(panel: &PanelVariant, reference: &ReferenceVariant) -> Vec<MatchType> {
    if panel.chrom != reference.chrom || panel.pos != reference.pos {
        return Vec::new();
    }
    ALL_MATCH_TYPES
        .iter()
        .copied()
        .filter(|t| {
            t.holds(
                (&panel.allele1, &panel.allele2),
                (&reference.allele1, &reference.allele2),
            )
        })
        .collect()
}

/// An accepted match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub panel_id: String,
    pub reference_variant_id: String,
    pub match_type: MatchType,
}

/// Why a candidate match was excluded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AmbiguityReason {
    /// The allele pair reads the same on both strands.
    Palindromic,
    /// More than one orientation hypothesis holds.
    MultipleOrientations,
    /// The panel variant is consistent with more than one reference variant.
    MultipleReferences,
    /// The panel identifier is used by more than one panel variant.
    DuplicatePanelId,
}

/// A panel variant flagged and excluded from harmonization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousMatch {
    pub panel_id: String,
    pub reference_variant_ids: Vec<String>,
    pub orientations: Vec<MatchType>,
    pub reason: AmbiguityReason,
}

/// Result of matching a panel against the reference list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// Accepted matches, one per panel variant.
    pub matches: Vec<MatchRecord>,
    /// Candidates that could not be oriented safely.
    pub ambiguous: Vec<AmbiguousMatch>,
    /// Reference variants without any candidate in the panel.
    pub unmatched_references: Vec<String>,
}

/// Match `panel` against `reference`.
pub fn find_matches(
    panel: &[PanelVariant],
    reference: &ReferenceSet,
    chroms: &ChromNames,
) -> MatchReport {
    let mut by_position: IndexMap<String, Vec<&ReferenceVariant>> = IndexMap::new();
    for v in reference.iter() {
        by_position
            .entry(position_key(&v.chrom, v.pos))
            .or_default()
            .push(v);
    }

    let ordered = panel
        .iter()
        .sorted_by(|a, b| {
            (chroms.rank(&a.chrom), a.pos, &a.panel_id).cmp(&(
                chroms.rank(&b.chrom),
                b.pos,
                &b.panel_id,
            ))
        })
        .collect_vec();

    // Matches are keyed by panel id, so a repeated id cannot be told apart.
    let duplicated = panel
        .iter()
        .map(|v| v.panel_id.as_str())
        .duplicates()
        .collect::<IndexSet<_>>();

    let mut report = MatchReport::default();
    let mut touched: IndexSet<String> = IndexSet::new();
    let mut flagged: IndexSet<&str> = IndexSet::new();
    for pv in ordered {
        let Some(candidates) = by_position.get(&position_key(&pv.chrom, pv.pos)) else {
            continue;
        };
        let hits = candidates
            .iter()
            .map(|rv| (*rv, orientations(pv, rv)))
            .filter(|(_, types)| !types.is_empty())
            .collect_vec();
        for (rv, _) in &hits {
            touched.insert(rv.variant_id.clone());
        }

        if !hits.is_empty() && duplicated.contains(pv.panel_id.as_str()) {
            if flagged.insert(pv.panel_id.as_str()) {
                tracing::warn!("excluding {}: panel identifier is not unique", &pv.panel_id);
                report.ambiguous.push(AmbiguousMatch {
                    panel_id: pv.panel_id.clone(),
                    reference_variant_ids: hits
                        .iter()
                        .map(|(rv, _)| rv.variant_id.clone())
                        .collect(),
                    orientations: hits
                        .iter()
                        .flat_map(|(_, t)| t.iter().copied())
                        .unique()
                        .collect(),
                    reason: AmbiguityReason::DuplicatePanelId,
                });
            }
            continue;
        }

        match hits.as_slice() {
            [] => (),
            [(rv, types)] => {
                let reason = if is_palindromic(&rv.allele1, &rv.allele2) {
                    Some(AmbiguityReason::Palindromic)
                } else if types.len() > 1 {
                    Some(AmbiguityReason::MultipleOrientations)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    tracing::warn!(
                        "excluding {} against {}: {} ({:?})",
                        &pv.panel_id,
                        &rv.variant_id,
                        reason,
                        types
                    );
                    report.ambiguous.push(AmbiguousMatch {
                        panel_id: pv.panel_id.clone(),
                        reference_variant_ids: vec![rv.variant_id.clone()],
                        orientations: types.clone(),
                        reason,
                    });
                } else {
                    report.matches.push(MatchRecord {
                        panel_id: pv.panel_id.clone(),
                        reference_variant_id: rv.variant_id.clone(),
                        match_type: types[0],
                    });
                }
            }
            _ => {
                let ids = hits.iter().map(|(rv, _)| rv.variant_id.clone()).collect_vec();
                tracing::warn!(
                    "excluding {}: consistent with several reference variants {:?}",
                    &pv.panel_id,
                    &ids
                );
                report.ambiguous.push(AmbiguousMatch {
                    panel_id: pv.panel_id.clone(),
                    reference_variant_ids: ids,
                    orientations: hits.iter().flat_map(|(_, t)| t.iter().copied()).unique().collect(),
                    reason: AmbiguityReason::MultipleReferences,
                });
            }
        }
    }

    report.unmatched_references = reference
        .iter()
        .filter(|v| !touched.contains(&v.variant_id))
        .map(|v| v.variant_id.clone())
        .collect();

    tracing::debug!(
        "matched {} panel variants, {} ambiguous, {} reference variants unmatched",
        report.matches.len(),
        report.ambiguous.len(),
        report.unmatched_references.len()
    );
    report
}
