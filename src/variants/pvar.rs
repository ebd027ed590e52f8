//! Reading of PLINK2 `.pvar` variant tables.

use std::{
    io::{BufRead, Write},
    path::Path,
};

use itertools::Itertools;

use super::{variant_key, PanelVariant};
use crate::common::{
    io::{open_read_maybe_gz, open_write_maybe_gz},
    ChromNames,
};

/// Column layout of a variant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    chrom: usize,
    pos: usize,
    id: usize,
    ref_allele: usize,
    alt_allele: usize,
}

impl Columns {
    /// Header-less files use the `.bim` order `CHROM ID CM POS ALT REF`.
    const BIM: Columns = Columns {
        chrom: 0,
        id: 1,
        pos: 3,
        alt_allele: 4,
        ref_allele: 5,
    };

    fn from_header(line: &str) -> Result<Self, anyhow::Error> {
        let names = line.split('\t').map(|s| s.trim()).collect_vec();
        let idx = |name: &str| {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or_else(|| anyhow::anyhow!("pvar header lacks column {}: {:?}", name, line))
        };
        Ok(Self {
            chrom: idx("#CHROM")?,
            pos: idx("POS")?,
            id: idx("ID")?,
            ref_allele: idx("REF")?,
            alt_allele: idx("ALT")?,
        })
    }

    fn max(&self) -> usize {
        [self.pos, self.id, self.ref_allele, self.alt_allele]
            .into_iter()
            .fold(self.chrom, usize::max)
    }
}

/// Parse one data line; the flag tells whether the identifier was synthesized.
fn parse_line(
    fields: &[&str],
    columns: Columns,
    chroms: &ChromNames,
    path: &Path,
    line_no: usize,
) -> Result<(PanelVariant, bool), anyhow::Error> {
    if fields.len() <= columns.max() {
        anyhow::bail!(
            "{}:{}: expected at least {} columns but found {}",
            path.display(),
            line_no,
            columns.max() + 1,
            fields.len()
        );
    }

    let chrom = chroms.canonicalize(fields[columns.chrom]);
    let pos = fields[columns.pos].trim().parse::<u64>().map_err(|e| {
        anyhow::anyhow!("{}:{}: invalid position: {}", path.display(), line_no, e)
    })?;
    let allele1 = fields[columns.ref_allele].trim().to_uppercase();
    let allele2 = fields[columns.alt_allele].trim().to_uppercase();
    let (panel_id, synthesized) = match fields[columns.id].trim() {
        "" | "." => (variant_key(&chrom, pos, &allele1, &allele2), true),
        id => (id.to_string(), false),
    };

    Ok((
        PanelVariant {
            panel_id,
            chrom,
            pos,
            allele1,
            allele2,
        },
        synthesized,
    ))
}

/// Read all variants from a `.pvar` (or `.pvar.gz`) file.
///
/// Variants without identifier get their coordinate key as `panel_id`.
pub fn read<P>(path: P, chroms: &ChromNames) -> Result<Vec<PanelVariant>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let reader = open_read_maybe_gz(path)
        .map_err(|e| anyhow::anyhow!("could not open {} for reading: {}", path.display(), e))?;

    let mut columns: Option<Columns> = None;
    let mut result = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with("##") || line.trim().is_empty() {
            continue;
        } else if line.starts_with("#CHROM") {
            columns = Some(Columns::from_header(&line)?);
            continue;
        }
        let columns = *columns.get_or_insert(Columns::BIM);

        let fields = line.split('\t').collect_vec();
        let (variant, _) = parse_line(&fields, columns, chroms, path, i + 1)?;
        result.push(variant);
    }

    tracing::debug!("read {} panel variants from {}", result.len(), path.display());
    Ok(result)
}

/// Copy the variant table at `src` to a `.pvar` at `dst`, filling in the
/// identifiers that `read` synthesizes.
///
/// Header-less input is written with a `#CHROM POS ID REF ALT` header.
/// Returns the number of filled in identifiers.
pub fn write_with_ids<P, Q>(src: P, dst: Q, chroms: &ChromNames) -> Result<usize, anyhow::Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let reader = open_read_maybe_gz(src)
        .map_err(|e| anyhow::anyhow!("could not open {} for reading: {}", src.display(), e))?;
    let mut writer = open_write_maybe_gz(dst)
        .map_err(|e| anyhow::anyhow!("could not open {} for writing: {}", dst.display(), e))?;

    let mut columns: Option<Columns> = None;
    let mut bim = false;
    let mut filled = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        } else if line.starts_with("##") {
            writeln!(writer, "{}", line)?;
            continue;
        } else if line.starts_with("#CHROM") {
            columns = Some(Columns::from_header(&line)?);
            writeln!(writer, "{}", line)?;
            continue;
        }
        if columns.is_none() {
            bim = true;
            writeln!(writer, "#CHROM\tPOS\tID\tREF\tALT")?;
        }
        let columns = *columns.get_or_insert(Columns::BIM);

        let mut fields = line.split('\t').collect_vec();
        let (variant, synthesized) = parse_line(&fields, columns, chroms, src, i + 1)?;
        if synthesized {
            filled += 1;
            fields[columns.id] = variant.panel_id.as_str();
        }
        if bim {
            fields = vec![
                fields[columns.chrom],
                fields[columns.pos],
                fields[columns.id],
                fields[columns.ref_allele],
                fields[columns.alt_allele],
            ];
        }
        writeln!(writer, "{}", fields.join("\t"))?;
    }
    writer
        .flush()
        .map_err(|e| anyhow::anyhow!("could not flush {}: {}", dst.display(), e))?;

    tracing::debug!("filled in {} identifiers writing {}", filled, dst.display());
    Ok(filled)
}
