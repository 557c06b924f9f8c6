use crate::melt::mapping::{FieldNode, TableMapping};
use crate::melt::types::{KeyGenerator, Row, TableSet};
use serde_json::Value;

/// Mapping-driven melter turning entity records into linked tables
pub struct TreeWalker<'m, K: KeyGenerator> {
    endpoint: String,
    mapping: &'m TableMapping,
    keys: K,
}

impl<'m, K: KeyGenerator> TreeWalker<'m, K> {
    pub fn new(endpoint: impl Into<String>, mapping: &'m TableMapping, keys: K) -> Self {
        TreeWalker {
            endpoint: endpoint.into(),
            mapping,
            keys,
        }
    }

    /// Melt a batch of records. The root table is named after the endpoint
    /// and is present in the output even when `records` is empty.
    pub fn flatten(&mut self, records: &[Value]) -> TableSet {
        let mut tables = TableSet::new();
        self.flatten_into(records, &mut tables);
        tables
    }

    /// Melt a batch of records into an existing accumulator
    pub fn flatten_into(&mut self, records: &[Value], tables: &mut TableSet) {
        let endpoint = self.endpoint.clone();
        let mapping = self.mapping;
        tables.ensure(&endpoint);

        for record in records {
            self.walk(&endpoint, mapping, record, None, tables);
        }
    }

    /// Build one row for `table` from `data`, recursing into nested tables
    fn walk(
        &mut self,
        table: &str,
        mapping: &TableMapping,
        data: &Value,
        parent_key: Option<&str>,
        tables: &mut TableSet,
    ) {
        // Nested tables are registered before their children so discovery
        // order stays depth-first.
        tables.ensure(table);

        let mut row = Row::new();
        for field in &mapping.fields {
            match field {
                FieldNode::Column {
                    path, destination, ..
                } => {
                    let value = path.resolve(data).map(cell_text).unwrap_or_default();
                    row.set(destination.as_str(), value);
                }
                FieldNode::Table {
                    path,
                    destination,
                    mapping: child,
                } => {
                    let key = match path.resolve(data) {
                        Some(nested) if has_rows(nested) => {
                            let key = self.keys.next_key(destination);
                            self.walk_nested(destination, child, nested, &key, tables);
                            key
                        }
                        _ => String::new(),
                    };
                    row.set(destination.as_str(), key);
                }
                FieldNode::ParentKey { destination } => {
                    row.set(destination.as_str(), parent_key.unwrap_or_default());
                }
            }
        }

        tables.push(table, row);
    }

    fn walk_nested(
        &mut self,
        table: &str,
        mapping: &TableMapping,
        nested: &Value,
        key: &str,
        tables: &mut TableSet,
    ) {
        match nested {
            Value::Array(items) => {
                for item in items {
                    self.walk(table, mapping, item, Some(key), tables);
                }
            }
            _ => self.walk(table, mapping, nested, Some(key), tables),
        }
    }
}

/// Whether a nested value produces any child rows
fn has_rows(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        _ => false,
    }
}

/// Text written to a CSV cell for a JSON value
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
