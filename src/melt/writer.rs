use crate::error::{MeltError, Result};
use crate::melt::mapping::TableLayout;
use crate::melt::report::ReportTable;
use crate::melt::types::{Row, TableSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap()
});

/// Load metadata for one written table, persisted next to its CSV file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub incremental: bool,
    pub primary_key: Vec<String>,
    pub columns: Vec<String>,
}

/// Writes tables to `<output_dir>/<table>.csv`, one file per table
pub struct TableSink {
    output_dir: PathBuf,
    incremental: bool,
    manifests: BTreeMap<String, Manifest>,
}

impl TableSink {
    pub fn new<P: AsRef<Path>>(output_dir: P, incremental: bool) -> Result<Self> {
        std::fs::create_dir_all(output_dir.as_ref())?;

        Ok(TableSink {
            output_dir: output_dir.as_ref().to_path_buf(),
            incremental,
            manifests: BTreeMap::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.output_dir.join(format!("{}.csv", table))
    }

    /// Write rows of one table in `columns` order.
    ///
    /// When the file exists and `append` is set, rows are appended without a
    /// header, in the column order of the header already on disk. Columns the
    /// file lacks are merged into that header and earlier rows are rewritten
    /// with empty cells for them. Otherwise the file is (re)created with a
    /// header row. Cells for columns a row does not carry are written empty.
    /// Returns the number of rows written.
    pub fn write(
        &mut self,
        table: &str,
        rows: &[Row],
        columns: &[String],
        primary_key: &[String],
        append: bool,
    ) -> Result<usize> {
        if !TABLE_NAME_REGEX.is_match(table) {
            return Err(MeltError::config(format!("invalid table name: {:?}", table)));
        }

        let path = self.table_path(table);
        let existing = if append && path.exists() {
            Some(read_header(&path)?)
        } else {
            None
        };

        let columns = match &existing {
            Some(header) => {
                let merged = merge_columns(header, columns);
                if merged.len() > header.len() {
                    log::warn!(
                        "Table {} gained columns {:?}, rewriting existing rows",
                        table,
                        merged.iter().filter(|c| !header.contains(*c)).collect::<Vec<_>>()
                    );
                    rewrite_columns(&path, header, &merged)?;
                }
                merged
            }
            None => columns.to_vec(),
        };
        let appending = existing.is_some();

        let file = if appending {
            OpenOptions::new().append(true).open(&path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !appending {
            writer.write_record(&columns)?;
        }
        for row in rows {
            writer.write_record(columns.iter().map(|c| row.get(c).unwrap_or("")))?;
        }
        writer.flush()?;

        log::info!(
            "Table output: {} ({} rows, {})",
            path.display(),
            rows.len(),
            if appending { "appended" } else { "created" }
        );

        let primary_key = match self.manifests.get(table) {
            Some(previous) if appending => merge_columns(&previous.primary_key, primary_key),
            _ => primary_key.to_vec(),
        };
        self.manifests.insert(
            table.to_string(),
            Manifest {
                incremental: self.incremental,
                primary_key,
                columns,
            },
        );

        Ok(rows.len())
    }

    /// Write every table melted from an entity endpoint
    pub fn write_tables(&mut self, tables: &TableSet, layout: &TableLayout) -> Result<usize> {
        let mut written = 0;
        for table in tables.iter() {
            let columns = match layout.get(&table.name) {
                Some(spec) => spec.columns.clone(),
                None => discovered_columns(&table.rows),
            };
            written += self.write(
                &table.name,
                &table.rows,
                &columns,
                layout.primary_key(&table.name),
                true,
            )?;
        }
        Ok(written)
    }

    pub fn write_report(&mut self, report: &ReportTable) -> Result<usize> {
        self.write(
            &report.name,
            &report.rows,
            &report.columns,
            &report.primary_key,
            true,
        )
    }

    pub fn manifest(&self, table: &str) -> Option<&Manifest> {
        self.manifests.get(table)
    }

    pub fn manifests(&self) -> impl Iterator<Item = (&str, &Manifest)> {
        self.manifests.iter().map(|(name, m)| (name.as_str(), m))
    }

    /// Persist `<table>.csv.manifest` for every table written so far
    pub fn write_manifests(&self) -> Result<()> {
        for (table, manifest) in &self.manifests {
            let path = self.output_dir.join(format!("{}.csv.manifest", table));
            let mut file = std::fs::File::create(&path)?;
            serde_json::to_writer(&mut file, manifest)?;
            file.flush()?;
            log::debug!("Manifest output: {}", path.display());
        }
        Ok(())
    }
}

fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// `existing` followed by the columns of `incoming` it lacks, each new column
/// placed right after the incoming column that precedes it
fn merge_columns(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    let mut anchor: Option<usize> = None;
    for column in incoming {
        match merged.iter().position(|c| c == column) {
            Some(idx) => anchor = Some(idx),
            None => {
                let idx = anchor.map_or(0, |a| a + 1);
                merged.insert(idx, column.clone());
                anchor = Some(idx);
            }
        }
    }
    merged
}

/// Rewrite a table file under a wider header, leaving new cells empty
fn rewrite_columns(path: &Path, header: &[String], columns: &[String]) -> Result<()> {
    let records = csv::Reader::from_path(path)?
        .into_records()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let positions: Vec<Option<usize>> = columns
        .iter()
        .map(|c| header.iter().position(|h| h == c))
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(columns)?;
    for record in &records {
        writer.write_record(
            positions
                .iter()
                .map(|pos| pos.and_then(|i| record.get(i)).unwrap_or("")),
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Union of row columns in first-seen order
fn discovered_columns(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}
