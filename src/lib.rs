//! # qbo-furnace - QuickBooks Online extraction toolkit
//!
//! Melts QuickBooks Online API payloads into flat CSV tables.
//!
//! ## Modules
//!
//! - **melt**: mapping-driven entity melting, report flattening and the CSV table sink
//! - **extract**: run driver over a pluggable fetch layer
//! - **config**: run configuration and date macros
//!
//! ## Quick Start
//!
//! ```rust
//! use qbo_furnace::melt::{MappingCatalog, MeltConfig, SequentialKeys, TreeWalker};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mapping = json!({
//!     "Invoice": {
//!         "Id": {"type": "column", "mapping": {"destination": "id", "primaryKey": true}},
//!         "Line": {"type": "table", "destination": "Invoice_Line", "tableMapping": {
//!             "Amount": {"type": "column", "mapping": {"destination": "amount"}}
//!         }}
//!     }
//! });
//! let catalog = MappingCatalog::from_json(&mapping, &MeltConfig::default())?;
//!
//! let records = vec![json!({"Id": "7", "Line": [{"Amount": 10}, {"Amount": 20}]})];
//! let mut walker = TreeWalker::new("Invoice", catalog.get("Invoice")?, SequentialKeys::new());
//! let tables = walker.flatten(&records);
//!
//! // Invoice: one row, Invoice_Line = "Invoice_Line-1"
//! // Invoice_Line: two rows sharing parent_table = "Invoice_Line-1"
//! assert_eq!(tables.rows("Invoice_Line").len(), 2);
//! # Ok(())
//! # }
//! ```

use serde_json::Value;

pub mod config;
pub mod error;
pub mod extract;
pub mod melt;

// Re-export commonly used types for convenience
pub use config::{DateRange, EndpointSpec, ExtractorConfig, InputTable, RunPlan};
pub use error::{FetchError, MeltError, Result};
pub use extract::{Extractor, QuickBooksSource, ReplaySource};
pub use melt::{
    KeyGenerator, MappingCatalog, MeltConfig, ReportFlattener, TableSink, TreeWalker, UuidKeys,
};

/// Melt one batch of entity records and write every resulting table.
/// Returns the number of rows written.
pub fn melt_entities<K: KeyGenerator>(
    catalog: &MappingCatalog,
    endpoint: &str,
    records: &[Value],
    keys: K,
    sink: &mut TableSink,
) -> Result<usize> {
    let mapping = catalog.get(endpoint)?;
    let layout = melt::TableLayout::from_mapping(endpoint, mapping);
    let tables = TreeWalker::new(endpoint, mapping, keys).flatten(records);
    sink.write_tables(&tables, &layout)
}
