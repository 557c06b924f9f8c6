//! JSON melting - flatten QuickBooks payloads into relational tables
//!
//! Entity records are walked against a declarative field mapping, every
//! nested list becoming its own table joined back to its parent through a
//! generated key. Report payloads are melted into one row per leaf with
//! positional label columns.

pub mod mapping;
pub mod pnl;
pub mod report;
pub mod types;
pub mod walker;
pub mod writer;

pub use mapping::{FieldNode, FieldPath, MappingCatalog, TableLayout, TableMapping, TableSpec};
pub use pnl::{ClassBreakdown, ClassRef, ClassRows};
pub use report::{AccountingMethod, ReportFlattener, ReportPolicy, ReportTable};
pub use types::{KeyGenerator, MeltConfig, Row, SequentialKeys, Table, TableSet, UuidKeys};
pub use walker::TreeWalker;
pub use writer::{Manifest, TableSink};
