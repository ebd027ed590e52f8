//! Per-sample carrier tables in integer and string representation.

pub mod genotype;

use std::path::Path;

use indexmap::IndexSet;

use crate::{
    common::io::{csv_reader, csv_writer},
    err::CarriersError,
    store::parse_dosage,
};

/// Header of the sample column.
pub const SAMPLE_COLUMN: &str = "IID";
/// Header of the population column in combined tables.
pub const ANCESTRY_COLUMN: &str = "ancestry";

/// A cell value of a carrier table.
pub trait CarrierValue: Clone + std::fmt::Debug + PartialEq {
    /// Value of a sample without call or a variant absent from a population.
    fn missing() -> Self;
    fn parse(value: &str) -> Self;
    fn render(&self) -> String;
}

impl CarrierValue for Option<u8> {
    fn missing() -> Self {
        None
    }

    fn parse(value: &str) -> Self {
        parse_dosage(value)
    }

    fn render(&self) -> String {
        genotype::format_dosage(*self)
    }
}

impl CarrierValue for String {
    fn missing() -> Self {
        genotype::MISSING_GENOTYPE.to_string()
    }

    fn parse(value: &str) -> Self {
        match value.trim() {
            "" => Self::missing(),
            value => value.to_string(),
        }
    }

    fn render(&self) -> String {
        self.clone()
    }
}

/// One sample's row.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierRecord<T> {
    pub sample_id: String,
    /// Population label; only written in combined tables.
    pub population: Option<String>,
    /// One value per column of the owning table.
    pub values: Vec<T>,
}

/// Samples by variants, columns keyed by panel identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierTable<T> {
    pub variant_ids: Vec<String>,
    pub rows: Vec<CarrierRecord<T>>,
}

impl<T> Default for CarrierTable<T> {
    fn default() -> Self {
        Self {
            variant_ids: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl<T: CarrierValue> CarrierTable<T> {
    /// Column index of a variant.
    pub fn column(&self, variant_id: &str) -> Option<usize> {
        self.variant_ids.iter().position(|id| id == variant_id)
    }

    /// Value of one cell.
    pub fn get(&self, sample_id: &str, variant_id: &str) -> Option<&T> {
        let col = self.column(variant_id)?;
        self.rows
            .iter()
            .find(|r| r.sample_id == sample_id)
            .and_then(|r| r.values.get(col))
    }

    /// Project onto `variant_ids`; columns not present become missing.
    pub fn select(&self, variant_ids: &[String]) -> Self {
        let cols = variant_ids.iter().map(|id| self.column(id)).collect::<Vec<_>>();
        Self {
            variant_ids: variant_ids.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|r| CarrierRecord {
                    sample_id: r.sample_id.clone(),
                    population: r.population.clone(),
                    values: cols
                        .iter()
                        .map(|c| c.and_then(|c| r.values.get(c).cloned()).unwrap_or_else(T::missing))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Write as CSV; the `ancestry` column is written if `with_ancestry`.
    pub fn write<P: AsRef<Path>>(&self, path: P, with_ancestry: bool) -> Result<(), anyhow::Error> {
        let mut writer = csv_writer(path.as_ref())?;

        let mut header = vec![SAMPLE_COLUMN];
        if with_ancestry {
            header.push(ANCESTRY_COLUMN);
        }
        header.extend(self.variant_ids.iter().map(|s| s.as_str()));
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.sample_id.clone()];
            if with_ancestry {
                record.push(row.population.clone().unwrap_or_default());
            }
            record.extend(row.values.iter().map(|v| v.render()));
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .map_err(|e| anyhow::anyhow!("could not flush {:?}: {}", path.as_ref(), e))?;

        Ok(())
    }

    /// Read a table written by `write`.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let mut reader = csv_reader(path, b',')?;
        let headers = reader.headers()?.clone();
        if headers.get(0) != Some(SAMPLE_COLUMN) {
            return Err(CarriersError::MalformedInput(format!(
                "{} does not start with an {} column",
                path.display(),
                SAMPLE_COLUMN
            ))
            .into());
        }
        let with_ancestry = headers.get(1) == Some(ANCESTRY_COLUMN);
        let first_value = if with_ancestry { 2 } else { 1 };

        let mut result = Self {
            variant_ids: headers.iter().skip(first_value).map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        };
        for record in reader.records() {
            let record = record?;
            result.rows.push(CarrierRecord {
                sample_id: record.get(0).unwrap_or_default().to_string(),
                population: if with_ancestry {
                    record.get(1).map(|s| s.to_string()).filter(|s| !s.is_empty())
                } else {
                    None
                },
                values: record.iter().skip(first_value).map(T::parse).collect(),
            });
        }

        Ok(result)
    }
}

/// Stack tables row-wise over the union of their columns.
///
/// Columns are ordered by first appearance; cells of variants a table lacks
/// are filled with `T::missing()`.
pub fn concat<T: CarrierValue>(tables: &[CarrierTable<T>]) -> CarrierTable<T> {
    let mut columns: IndexSet<String> = IndexSet::new();
    for table in tables {
        for id in &table.variant_ids {
            columns.insert(id.clone());
        }
    }
    let variant_ids = columns.into_iter().collect::<Vec<_>>();

    CarrierTable {
        rows: tables
            .iter()
            .flat_map(|t| t.select(&variant_ids).rows)
            .collect(),
        variant_ids,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn table<T: CarrierValue>(ids: &[&str], rows: Vec<(&str, Option<&str>, Vec<T>)>) -> CarrierTable<T> {
        CarrierTable {
            variant_ids: ids.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|(sample, pop, values)| CarrierRecord {
                    sample_id: sample.to_string(),
                    population: pop.map(|p| p.to_string()),
                    values,
                })
                .collect(),
        }
    }

    #[test]
    fn write_int_table() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("carriers_int.csv");
        let t = table(&["v1", "v2"], vec![("s1", Some("EUR"), vec![Some(2u8), None])]);

        t.write(&path, false)?;
        insta::assert_snapshot!(std::fs::read_to_string(&path)?, @r###"
        IID,v1,v2
        s1,2,NA
        "###);

        t.write(&path, true)?;
        insta::assert_snapshot!(std::fs::read_to_string(&path)?, @r###"
        IID,ancestry,v1,v2
        s1,EUR,2,NA
        "###);

        Ok(())
    }

    #[test]
    fn read_back_string_table() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("carriers_string.csv");
        let t = table(
            &["v1"],
            vec![
                ("s1", Some("EUR"), vec![String::from("WT/A")]),
                ("s2", Some("AFR"), vec![String::from("./.")]),
            ],
        );

        t.write(&path, true)?;
        let read = CarrierTable::<String>::read(&path)?;

        assert_eq!(read, t);
        assert_eq!(read.get("s1", "v1").map(|s| s.as_str()), Some("WT/A"));

        Ok(())
    }

    #[test]
    fn read_without_iid_fails() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("bad.csv");
        std::fs::write(&path, "sample,v1\ns1,2\n")?;

        let err = CarrierTable::<Option<u8>>::read(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CarriersError>(),
            Some(CarriersError::MalformedInput(_))
        ));

        Ok(())
    }

    #[test]
    fn concat_fills_missing() {
        let a = table(&["v1", "v2"], vec![("s1", Some("A"), vec![Some(2u8), Some(1)])]);
        let b = table(&["v2", "v3"], vec![("s2", Some("B"), vec![Some(0u8), Some(1)])]);

        let c = concat(&[a, b]);

        assert_eq!(c.variant_ids, vec!["v1", "v2", "v3"]);
        assert_eq!(c.rows[0].values, vec![Some(2), Some(1), None]);
        assert_eq!(c.rows[1].values, vec![None, Some(0), Some(1)]);
        assert_eq!(c.rows[1].population.as_deref(), Some("B"));
    }
}
