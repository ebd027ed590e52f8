//! Loading of the reference list of variants of interest.

use std::path::Path;

use indexmap::IndexMap;
use itertools::Itertools;

use super::{variant_key, ReferenceVariant};
use crate::{
    common::{io::csv_reader, ChromNames},
    err::CarriersError,
};

/// What to do when one variant name is used for different coordinates.
#[derive(
    clap::ValueEnum,
    serde::Serialize,
    serde::Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NameCollisionPolicy {
    /// Drop all variants carrying the colliding name.
    #[default]
    Exclude,
    /// Keep the variant that was listed first.
    KeepFirst,
}

/// Raw row of the reference CSV file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RawRecord {
    snp_name: Option<String>,
    snp_name_alt: Option<String>,
    locus: Option<String>,
    rsid: Option<String>,
    hg38: Option<String>,
    chrom: Option<String>,
    pos: Option<String>,
    a1: Option<String>,
    a2: Option<String>,
    ancestry: Option<String>,
}

/// The loaded, de-duplicated reference list, indexed by `variant_id`.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    variants: IndexMap<String, ReferenceVariant>,
}

impl ReferenceSet {
    /// Build from variants, merging rows with identical coordinates and
    /// resolving name collisions according to `policy`.
    pub fn new(
        rows: Vec<ReferenceVariant>,
        policy: NameCollisionPolicy,
    ) -> Result<Self, CarriersError> {
        if rows.is_empty() {
            return Err(CarriersError::NoInputData(
                "reference variant list is empty".into(),
            ));
        }

        let mut variants: IndexMap<String, ReferenceVariant> = IndexMap::new();
        for row in rows {
            if let Some(existing) = variants.get_mut(&row.variant_id) {
                tracing::debug!(
                    "merging duplicate reference entry for {}",
                    &row.variant_id
                );
                if existing.label_alt.is_none() && row.label.is_some() && row.label != existing.label
                {
                    existing.label_alt = row.label.clone();
                }
            } else {
                variants.insert(row.variant_id.clone(), row);
            }
        }

        // Names that point to more than one coordinate.
        let mut by_label: IndexMap<String, Vec<String>> = IndexMap::new();
        for v in variants.values() {
            if let Some(label) = v.label.as_ref() {
                by_label
                    .entry(label.clone())
                    .or_default()
                    .push(v.variant_id.clone());
            }
        }
        let colliding = by_label
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .collect::<IndexMap<_, _>>();

        for (label, ids) in &colliding {
            tracing::warn!(
                "variant name {} is used for different coordinates {:?} ({})",
                label,
                ids,
                policy
            );
        }

        let dropped = match policy {
            NameCollisionPolicy::Exclude => colliding.values().flatten().cloned().collect_vec(),
            NameCollisionPolicy::KeepFirst => colliding
                .values()
                .flat_map(|ids| ids.iter().skip(1))
                .cloned()
                .collect_vec(),
        };
        for id in &dropped {
            variants.shift_remove(id);
        }

        if variants.is_empty() {
            return Err(CarriersError::NoInputData(
                "no reference variants left after resolving name collisions".into(),
            ));
        }
        Ok(Self { variants })
    }

    /// Look up a variant by its `variant_id`.
    pub fn get(&self, variant_id: &str) -> Option<&ReferenceVariant> {
        self.variants.get(variant_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceVariant> {
        self.variants.values()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse `chrom:pos:allele1:allele2`, ignoring embedded whitespace.
pub fn parse_coordinate(
    value: &str,
    chroms: &ChromNames,
) -> Result<(String, u64, String, String), CarriersError> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let parts = cleaned.split(':').collect_vec();
    if let [chrom, pos, allele1, allele2] = parts.as_slice() {
        build_coordinate(chrom, pos, allele1, allele2)
            .map(|(chrom, pos, a1, a2)| (chroms.canonicalize(&chrom), pos, a1, a2))
            .map_err(|reason| {
                CarriersError::MalformedInput(format!("invalid coordinate {:?}: {}", value, reason))
            })
    } else {
        Err(CarriersError::MalformedInput(format!(
            "invalid coordinate {:?}: expected chrom:pos:allele1:allele2",
            value
        )))
    }
}

fn build_coordinate(
    chrom: &str,
    pos: &str,
    allele1: &str,
    allele2: &str,
) -> Result<(String, u64, String, String), String> {
    let chrom = chrom.trim();
    if chrom.is_empty() {
        return Err("empty chromosome".into());
    }
    let pos = pos
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid position {:?}: {}", pos, e))?;
    let (allele1, allele2) = (allele1.trim().to_uppercase(), allele2.trim().to_uppercase());
    if allele1.is_empty() || allele2.is_empty() {
        return Err("empty allele".into());
    }
    Ok((chrom.to_string(), pos, allele1, allele2))
}

/// Load the reference CSV at `path`.
pub fn load<P>(
    path: P,
    policy: NameCollisionPolicy,
    chroms: &ChromNames,
) -> Result<ReferenceSet, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut reader = csv_reader(path, b',')?;

    let headers = reader.headers()?.clone();
    let has = |name: &str| headers.iter().any(|h| h == name);
    let use_hg38 = has("hg38");
    if !use_hg38 && !(has("chrom") && has("pos") && has("a1") && has("a2")) {
        return Err(CarriersError::MalformedInput(format!(
            "reference list {} lacks coordinate columns; expected `hg38` or `chrom`, `pos`, `a1`, `a2`",
            path.display()
        ))
        .into());
    }

    let mut rows = Vec::new();
    for (i, record) in reader.deserialize::<RawRecord>().enumerate() {
        let line_no = i + 2;
        let record = record
            .map_err(|e| anyhow::anyhow!("problem reading {}:{}: {}", path.display(), line_no, e))?;
        let coordinate = if use_hg38 {
            match non_empty(record.hg38) {
                Some(hg38) => parse_coordinate(&hg38, chroms),
                None => {
                    tracing::warn!("skipping {}:{} without hg38 coordinate", path.display(), line_no);
                    continue;
                }
            }
        } else {
            build_coordinate(
                record.chrom.as_deref().unwrap_or_default(),
                record.pos.as_deref().unwrap_or_default(),
                record.a1.as_deref().unwrap_or_default(),
                record.a2.as_deref().unwrap_or_default(),
            )
            .map(|(chrom, pos, a1, a2)| (chroms.canonicalize(&chrom), pos, a1, a2))
            .map_err(|reason| {
                CarriersError::MalformedInput(format!("{}:{}: {}", path.display(), line_no, reason))
            })
        }?;

        let (chrom, pos, allele1, allele2) = coordinate;
        rows.push(ReferenceVariant {
            variant_id: variant_key(&chrom, pos, &allele1, &allele2),
            chrom,
            pos,
            allele1,
            allele2,
            label: non_empty(record.snp_name),
            label_alt: non_empty(record.snp_name_alt),
            locus: non_empty(record.locus),
            rsid: non_empty(record.rsid),
            ancestry_tag: non_empty(record.ancestry),
        });
    }

    tracing::debug!("read {} reference rows from {}", rows.len(), path.display());
    Ok(ReferenceSet::new(rows, policy)?)
}

#[cfg(test)]
pub(crate) fn reference_variant(
    label: &str,
    chrom: &str,
    pos: u64,
    allele1: &str,
    allele2: &str,
) -> ReferenceVariant {
    ReferenceVariant {
        variant_id: variant_key(chrom, pos, allele1, allele2),
        chrom: chrom.into(),
        pos,
        allele1: allele1.into(),
        allele2: allele2.into(),
        label: Some(label.into()).filter(|s: &String| !s.is_empty()),
        label_alt: None,
        locus: None,
        rsid: None,
        ancestry_tag: None,
    }
}
