//! Declarative mapping schemas for entity endpoints
//!
//! A mapping document describes, per endpoint, how a QuickBooks entity maps
//! onto one root table and any number of nested tables:
//!
//! ```json
//! {
//!   "Invoice": {
//!     "Id": {"type": "column", "mapping": {"destination": "id", "primaryKey": true}},
//!     "CustomerRef.value": {"type": "column", "mapping": {"destination": "customer_id"}},
//!     "Line": {"type": "table", "destination": "Invoice_Line", "tableMapping": {
//!       "Id": {"type": "column", "mapping": {"destination": "id"}}
//!     }}
//!   }
//! }
//! ```
//!
//! The document is validated once on load. Every nested table receives an
//! injected [`FieldNode::ParentKey`] column linking its rows back to the
//! parent row, so the walker never has to patch the schema mid-traversal.

use crate::error::{MeltError, Result};
use crate::melt::types::MeltConfig;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Dotted path into a JSON object, e.g. `CustomerRef.value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        FieldPath(path.split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Follow the path through nested objects.
    ///
    /// Returns `None` when a segment is missing or when an intermediate
    /// value is not an object (arrays are not indexable by name).
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| current.as_object()?.get(segment))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// One node of a table mapping
#[derive(Debug, Clone, PartialEq)]
pub enum FieldNode {
    /// Leaf value copied into the current table
    Column {
        path: FieldPath,
        destination: String,
        primary_key: bool,
    },
    /// Nested object or array emitted as its own table
    Table {
        path: FieldPath,
        destination: String,
        mapping: TableMapping,
    },
    /// Join key bound by the enclosing table at flatten time
    ParentKey { destination: String },
}

impl FieldNode {
    /// Column name this node occupies in its own table
    pub fn destination(&self) -> &str {
        match self {
            FieldNode::Column { destination, .. }
            | FieldNode::Table { destination, .. }
            | FieldNode::ParentKey { destination } => destination,
        }
    }
}

/// Ordered field nodes describing one table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMapping {
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawNode {
    Column {
        mapping: RawColumn,
    },
    Table {
        destination: String,
        #[serde(rename = "tableMapping")]
        table_mapping: Map<String, Value>,
    },
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    destination: String,
    #[serde(default, rename = "primaryKey")]
    primary_key: bool,
}

impl TableMapping {
    /// Parse and validate a table mapping object.
    ///
    /// `parent_key` is the injected join column for nested tables, `None` for
    /// an endpoint's root table. `context` names the location for error messages.
    pub fn from_json(
        raw: &Map<String, Value>,
        parent_key: Option<&str>,
        config: &MeltConfig,
        context: &str,
    ) -> Result<Self> {
        let mut fields = Vec::with_capacity(raw.len() + 1);

        for (source, node) in raw {
            let location = format!("{}.{}", context, source);
            if source.is_empty() {
                return Err(MeltError::config(format!("{}: empty source path", context)));
            }

            let raw_node: RawNode = serde_json::from_value(node.clone()).map_err(|e| {
                MeltError::config(format!("{}: invalid mapping node: {}", location, e))
            })?;

            let field = match raw_node {
                RawNode::Column { mapping } => {
                    check_destination(&mapping.destination, &location)?;
                    FieldNode::Column {
                        path: FieldPath::parse(source),
                        destination: mapping.destination,
                        primary_key: mapping.primary_key,
                    }
                }
                RawNode::Table {
                    destination,
                    table_mapping,
                } => {
                    check_destination(&destination, &location)?;
                    let child = TableMapping::from_json(
                        &table_mapping,
                        Some(&config.parent_key_column),
                        config,
                        &location,
                    )?;
                    FieldNode::Table {
                        path: FieldPath::parse(source),
                        destination,
                        mapping: child,
                    }
                }
            };
            fields.push(field);
        }

        if let Some(parent_key) = parent_key {
            fields.push(FieldNode::ParentKey {
                destination: parent_key.to_string(),
            });
        }

        Ok(TableMapping { fields })
    }
}

fn check_destination(destination: &str, location: &str) -> Result<()> {
    if destination.trim().is_empty() {
        return Err(MeltError::config(format!("{}: empty destination", location)));
    }
    Ok(())
}

/// Mappings for every supported endpoint
#[derive(Debug, Clone, Default)]
pub struct MappingCatalog {
    endpoints: HashMap<String, TableMapping>,
}

impl MappingCatalog {
    pub fn from_json(document: &Value, config: &MeltConfig) -> Result<Self> {
        let Some(root) = document.as_object() else {
            return Err(MeltError::config("mapping document must be a JSON object"));
        };

        let mut endpoints = HashMap::with_capacity(root.len());
        for (endpoint, mapping) in root {
            let Some(mapping) = mapping.as_object() else {
                return Err(MeltError::config(format!(
                    "{}: endpoint mapping must be a JSON object",
                    endpoint
                )));
            };
            let table = TableMapping::from_json(mapping, None, config, endpoint)?;
            endpoints.insert(endpoint.clone(), table);
        }

        Ok(MappingCatalog { endpoints })
    }

    pub fn from_reader<R: Read>(reader: R, config: &MeltConfig) -> Result<Self> {
        let document: Value = serde_json::from_reader(reader)?;
        Self::from_json(&document, config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P, config: &MeltConfig) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file), config)
    }

    /// Mapping for an endpoint; unknown endpoints are a configuration error
    pub fn get(&self, endpoint: &str) -> Result<&TableMapping> {
        self.endpoints.get(endpoint).ok_or_else(|| {
            MeltError::config(format!("no mapping defined for endpoint {}", endpoint))
        })
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint)
    }
}

/// Column order and primary key of one output table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
}

/// Static per-table column and primary key registry for one endpoint.
///
/// Derived from the mapping alone, never from data.
#[derive(Debug, Clone, Default)]
pub struct TableLayout {
    tables: Vec<TableSpec>,
}

impl TableLayout {
    pub fn from_mapping(endpoint: &str, mapping: &TableMapping) -> Self {
        let mut layout = TableLayout::default();
        layout.collect(endpoint, mapping);
        layout
    }

    fn collect(&mut self, table: &str, mapping: &TableMapping) {
        let idx = match self.tables.iter().position(|t| t.name == table) {
            Some(idx) => idx,
            None => {
                self.tables.push(TableSpec {
                    name: table.to_string(),
                    ..TableSpec::default()
                });
                self.tables.len() - 1
            }
        };

        for field in &mapping.fields {
            let destination = field.destination().to_string();
            let spec = &mut self.tables[idx];
            if !spec.columns.contains(&destination) {
                spec.columns.push(destination.clone());
            }

            match field {
                FieldNode::Column {
                    primary_key: true, ..
                }
                | FieldNode::ParentKey { .. } => {
                    if !spec.primary_key.contains(&destination) {
                        spec.primary_key.push(destination);
                    }
                }
                FieldNode::Table {
                    destination,
                    mapping,
                    ..
                } => self.collect(destination, mapping),
                FieldNode::Column { .. } => {}
            }
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == table)
    }

    pub fn primary_key(&self, table: &str) -> &[String] {
        self.get(table).map(|t| t.primary_key.as_slice()).unwrap_or(&[])
    }

    pub fn columns(&self, table: &str) -> &[String] {
        self.get(table).map(|t| t.columns.as_slice()).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice_catalog() -> MappingCatalog {
        let document = json!({
            "Invoice": {
                "Id": {"type": "column", "mapping": {"destination": "id", "primaryKey": true}},
                "CustomerRef.value": {"type": "column", "mapping": {"destination": "customer_id"}},
                "Line": {"type": "table", "destination": "Invoice_Line", "tableMapping": {
                    "Id": {"type": "column", "mapping": {"destination": "line_id", "primaryKey": true}},
                    "Amount": {"type": "column", "mapping": {"destination": "amount"}}
                }}
            }
        });
        MappingCatalog::from_json(&document, &MeltConfig::default()).unwrap()
    }

    #[test]
    fn test_resolve_dotted_path() {
        let data = json!({"a": {"b": 5}, "list": [1, 2]});

        assert_eq!(FieldPath::parse("a.b").resolve(&data), Some(&json!(5)));
        assert_eq!(FieldPath::parse("a.c").resolve(&data), None);
        assert_eq!(FieldPath::parse("z").resolve(&data), None);
        assert_eq!(FieldPath::parse("a.b.c").resolve(&data), None);
        assert_eq!(FieldPath::parse("list.0").resolve(&data), None);
    }

    #[test]
    fn test_nested_table_gets_parent_key() {
        let catalog = invoice_catalog();
        let invoice = catalog.get("Invoice").unwrap();

        // root table has no injected key
        assert!(!invoice
            .fields
            .iter()
            .any(|f| matches!(f, FieldNode::ParentKey { .. })));

        let FieldNode::Table { mapping, .. } = &invoice.fields[2] else {
            panic!("Expected table node");
        };
        let injected: Vec<_> = mapping
            .fields
            .iter()
            .filter(|f| matches!(f, FieldNode::ParentKey { .. }))
            .collect();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].destination(), "parent_table");
    }

    #[test]
    fn test_primary_key_registry() {
        let document = json!({
            "Account": {"Id": {"type": "column", "mapping": {"destination": "id", "primaryKey": true}}}
        });
        let catalog = MappingCatalog::from_json(&document, &MeltConfig::default()).unwrap();
        let layout = TableLayout::from_mapping("Account", catalog.get("Account").unwrap());

        assert_eq!(layout.primary_key("Account"), &["id".to_string()]);
    }

    #[test]
    fn test_layout_covers_nested_tables() {
        let catalog = invoice_catalog();
        let layout = TableLayout::from_mapping("Invoice", catalog.get("Invoice").unwrap());

        assert_eq!(layout.columns("Invoice"), &["id", "customer_id", "Invoice_Line"]);
        assert_eq!(layout.primary_key("Invoice"), &["id"]);
        assert_eq!(
            layout.columns("Invoice_Line"),
            &["line_id", "amount", "parent_table"]
        );
        assert_eq!(layout.primary_key("Invoice_Line"), &["line_id", "parent_table"]);
    }

    #[test]
    fn test_unknown_node_type_is_config_error() {
        let document = json!({
            "Invoice": {"Id": {"type": "blob", "mapping": {"destination": "id"}}}
        });
        let err = MappingCatalog::from_json(&document, &MeltConfig::default()).unwrap_err();

        assert!(matches!(err, MeltError::Config(_)));
        assert!(err.to_string().contains("Invoice.Id"));
    }

    #[test]
    fn test_unknown_endpoint_is_config_error() {
        let catalog = invoice_catalog();
        assert!(matches!(catalog.get("Bill"), Err(MeltError::Config(_))));
    }
}
