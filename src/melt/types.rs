use std::collections::HashMap;
use uuid::Uuid;

/// One output row: destination column name to cell text, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Row { cells: Vec::new() }
    }

    /// Set a cell, replacing any previous value for the same column
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Column names in the order they were first set
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// All rows produced for one named table
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub rows: Vec<Row>,
}

/// Accumulator of rows per table, keeping tables in discovery order
#[derive(Debug, Default)]
pub struct TableSet {
    tables: Vec<Table>,
    index: HashMap<String, usize>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table without adding rows. Returns it for appending.
    pub fn ensure(&mut self, name: &str) -> &mut Table {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.tables.push(Table {
                    name: name.to_string(),
                    rows: Vec::new(),
                });
                self.index.insert(name.to_string(), self.tables.len() - 1);
                self.tables.len() - 1
            }
        };
        &mut self.tables[idx]
    }

    pub fn push(&mut self, name: &str, row: Row) {
        self.ensure(name).rows.push(row);
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.index.get(name).map(|&idx| &self.tables[idx])
    }

    /// Rows of a table, empty when the table was never seen
    pub fn rows(&self, name: &str) -> &[Row] {
        self.get(name).map(|t| t.rows.as_slice()).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn into_tables(self) -> Vec<Table> {
        self.tables
    }
}

/// Source of opaque join keys linking a parent row to its nested table rows
pub trait KeyGenerator {
    fn next_key(&mut self, table: &str) -> String;
}

impl<K: KeyGenerator + ?Sized> KeyGenerator for &mut K {
    fn next_key(&mut self, table: &str) -> String {
        (**self).next_key(table)
    }
}

/// Random keys, `<table>-<uuid hex>`
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeys;

impl KeyGenerator for UuidKeys {
    fn next_key(&mut self, table: &str) -> String {
        format!("{}-{}", table, Uuid::new_v4().simple())
    }
}

/// Deterministic keys, `<table>-1`, `<table>-2`, ... (counter shared across tables)
#[derive(Debug, Default, Clone)]
pub struct SequentialKeys {
    counter: u64,
}

impl SequentialKeys {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for SequentialKeys {
    fn next_key(&mut self, table: &str) -> String {
        self.counter += 1;
        format!("{}-{}", table, self.counter)
    }
}

/// Configuration for the melting process
#[derive(Debug, Clone)]
pub struct MeltConfig {
    /// Column injected into nested tables holding the parent's join key
    pub parent_key_column: String,

    /// Buffered entity records that trigger an early flatten-and-write
    pub flush_threshold: usize,

    /// Records requested per entity page
    pub page_size: usize,

    /// Whether written tables are flagged incremental in their manifest
    pub incremental: bool,
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            parent_key_column: String::from("parent_table"),
            flush_threshold: 5_000,
            page_size: 1_000,
            incremental: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_replaces_in_place() {
        let mut row = Row::new().with("a", "1").with("b", "2");
        row.set("a", "3");

        assert_eq!(row.get("a"), Some("3"));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_table_set_keeps_discovery_order() {
        let mut tables = TableSet::new();
        tables.ensure("Invoice");
        tables.push("Line", Row::new().with("x", "1"));
        tables.push("Invoice", Row::new().with("id", "1"));

        assert_eq!(tables.table_names(), vec!["Invoice", "Line"]);
        assert_eq!(tables.row_count(), 2);
        assert!(tables.rows("missing").is_empty());
    }

    #[test]
    fn test_sequential_keys() {
        let mut keys = SequentialKeys::new();
        assert_eq!(keys.next_key("Line"), "Line-1");
        assert_eq!(keys.next_key("Tax"), "Tax-2");
    }

    #[test]
    fn test_uuid_keys_are_unique() {
        let mut keys = UuidKeys;
        let a = keys.next_key("Line");
        let b = keys.next_key("Line");
        assert!(a.starts_with("Line-"));
        assert_ne!(a, b);
    }
}
