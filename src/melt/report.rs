//! Flattening of QuickBooks report payloads
//!
//! Reports arrive as a tree of `Rows.Row` nodes. Sections nest other rows
//! under a header label, data rows carry a label and an amount. The melter
//! walks the tree and gives every nesting level its own positional column
//! (`Col_1`, `Col_2`, ...), so the column set is only known once the whole
//! report has been visited.

use crate::error::{MeltError, Result};
use crate::melt::types::Row;
use crate::melt::walker::cell_text;
use serde_json::Value;
use std::fmt;

/// Column holding the amount of a report row; always written last
pub const VALUE_COLUMN: &str = "value";

/// Column holding the query text of a `CustomQuery` result
pub const QUERY_COLUMN: &str = "query";

pub const CUSTOM_QUERY: &str = "CustomQuery";

const HEADER_COLUMNS: [&str; 3] = ["ReportName", "StartPeriod", "EndPeriod"];

static NULL: Value = Value::Null;

/// Reports whose layout does not fit the label/amount grid
pub const UNDECOMPOSABLE_REPORTS: &[&str] = &[
    "CashFlow",
    "ProfitAndLossDetail",
    "TransactionList",
    "GeneralLedger",
    "TrialBalance",
];

/// Reports fetched once per accounting method
pub const DUAL_METHOD_REPORTS: &[&str] = &[
    "ProfitAndLoss",
    "ProfitAndLossDetail",
    "GeneralLedger",
    "BalanceSheet",
    "TrialBalance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingMethod {
    Accrual,
    Cash,
}

impl AccountingMethod {
    pub const ALL: [AccountingMethod; 2] = [AccountingMethod::Accrual, AccountingMethod::Cash];

    /// Value of the `accounting_method` report parameter
    pub fn api_value(self) -> &'static str {
        match self {
            AccountingMethod::Accrual => "Accrual",
            AccountingMethod::Cash => "Cash",
        }
    }

    /// Suffix used in output table names
    pub fn as_str(self) -> &'static str {
        match self {
            AccountingMethod::Accrual => "accrual",
            AccountingMethod::Cash => "cash",
        }
    }
}

impl fmt::Display for AccountingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountingMethod {
    type Err = MeltError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "accrual" => Ok(AccountingMethod::Accrual),
            "cash" => Ok(AccountingMethod::Cash),
            other => Err(MeltError::config(format!("unknown accounting method: {}", other))),
        }
    }
}

pub fn requires_accounting_method(report: &str) -> bool {
    DUAL_METHOD_REPORTS.contains(&report)
}

/// `<Report>` or `<Report>_<method>`
pub fn report_table_name(report: &str, method: Option<AccountingMethod>) -> String {
    match method {
        Some(method) => format!("{}_{}", report, method),
        None => report.to_string(),
    }
}

/// How a report payload is turned into rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPolicy {
    /// Recursive label/amount grid with discovered `Col_N` columns
    Grid,
    /// Single row keyed by report name and period, whole payload as text
    Opaque,
    /// Single row keyed by the query text, whole payload as text
    CustomQuery,
}

impl ReportPolicy {
    pub fn for_report(report: &str) -> Self {
        if report == CUSTOM_QUERY {
            ReportPolicy::CustomQuery
        } else if UNDECOMPOSABLE_REPORTS.contains(&report) {
            ReportPolicy::Opaque
        } else {
            ReportPolicy::Grid
        }
    }
}

/// Identifying fields of a report's `Header` object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    pub report_name: String,
    pub start_period: String,
    pub end_period: String,
    pub time: Option<String>,
}

impl ReportHeader {
    pub fn from_payload(report: &str, payload: &Value) -> Result<Self> {
        let Some(header) = payload.get("Header").filter(|h| h.is_object()) else {
            return Err(MeltError::shape(report, "Header is missing. Unable to parse request."));
        };

        let field = |name: &str| -> Result<String> {
            header
                .get(name)
                .map(cell_text)
                .ok_or_else(|| MeltError::shape(report, format!("Header.{} is missing", name)))
        };

        Ok(ReportHeader {
            report_name: field("ReportName")?,
            start_period: field("StartPeriod")?,
            end_period: field("EndPeriod")?,
            time: header.get("Time").map(cell_text),
        })
    }

    /// Row prefix shared by every row of the report
    fn context_row(&self) -> Row {
        Row::new()
            .with(HEADER_COLUMNS[0], self.report_name.as_str())
            .with(HEADER_COLUMNS[1], self.start_period.as_str())
            .with(HEADER_COLUMNS[2], self.end_period.as_str())
    }
}

/// Columns in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    columns: Vec<String>,
}

impl ColumnSet {
    pub fn with(mut self, column: &str) -> Self {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.columns
    }

    /// Final column order with `value` last, and the primary key (all but `value`)
    pub fn finalize(self) -> (Vec<String>, Vec<String>) {
        let primary_key: Vec<String> = self
            .columns
            .into_iter()
            .filter(|c| c != VALUE_COLUMN)
            .collect();
        let mut columns = primary_key.clone();
        columns.push(VALUE_COLUMN.to_string());
        (columns, primary_key)
    }
}

/// Melted report ready for a table sink
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub rows: Vec<Row>,
}

/// Shape of one `Rows.Row` node
#[derive(Debug)]
enum RowNode<'a> {
    /// Group label at this level, then a label and an amount
    GroupedLeaf {
        group: &'a Value,
        col_data: &'a [Value],
    },
    /// Header label at this level, children one level deeper
    Section { label: &'a Value, rows: &'a [Value] },
    /// Label and amount
    DataLeaf { col_data: &'a [Value] },
    Unrecognized(&'static str),
}

impl<'a> RowNode<'a> {
    fn classify(node: &'a Value) -> Self {
        let kind = node.get("type").and_then(Value::as_str);
        let group = node.get("group");

        match (kind, group) {
            (None, Some(group)) => match col_data(node) {
                Some(col_data) => RowNode::GroupedLeaf { group, col_data },
                None => RowNode::Unrecognized("grouped row without ColData"),
            },
            (Some("Section"), group) => {
                if let Some(header) = node.get("Header") {
                    match col_data(header).and_then(|cd| cd.first()) {
                        Some(first) => RowNode::Section {
                            label: first.get("value").unwrap_or(&NULL),
                            rows: child_rows(node),
                        },
                        None => RowNode::Unrecognized("section Header without ColData"),
                    }
                } else if let Some(group) = group {
                    match node.get("Summary").and_then(col_data) {
                        Some(col_data) => RowNode::GroupedLeaf { group, col_data },
                        None => RowNode::Unrecognized("grouped section without Summary"),
                    }
                } else {
                    RowNode::Unrecognized("section without Header or group")
                }
            }
            (Some("Data"), _) => match col_data(node) {
                Some(col_data) => RowNode::DataLeaf { col_data },
                None => RowNode::Unrecognized("data row without ColData"),
            },
            _ => match col_data(node) {
                Some(col_data) => RowNode::DataLeaf { col_data },
                None => RowNode::Unrecognized("no type found within the row"),
            },
        }
    }
}

fn col_data(node: &Value) -> Option<&[Value]> {
    node.get("ColData")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
}

/// `Rows.Row` of a node, empty when absent
fn child_rows(node: &Value) -> &[Value] {
    node.get("Rows")
        .and_then(|rows| rows.get("Row"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn label_column(depth: usize) -> String {
    format!("Col_{}", depth)
}

/// Melter for a single report payload
#[derive(Debug, Clone)]
pub struct ReportFlattener {
    report: String,
    method: Option<AccountingMethod>,
    query: String,
    policy: ReportPolicy,
}

impl ReportFlattener {
    pub fn new(report: impl Into<String>) -> Self {
        let report = report.into();
        let policy = ReportPolicy::for_report(&report);
        ReportFlattener {
            report,
            method: None,
            query: String::new(),
            policy,
        }
    }

    pub fn with_accounting_method(mut self, method: AccountingMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Query text recorded for `CustomQuery` results
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_policy(mut self, policy: ReportPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReportPolicy {
        self.policy
    }

    pub fn table_name(&self) -> String {
        report_table_name(&self.report, self.method)
    }

    pub fn flatten(&self, payload: &Value) -> Result<ReportTable> {
        match self.policy {
            ReportPolicy::Grid => self.flatten_grid(payload),
            ReportPolicy::Opaque => self.flatten_opaque(payload),
            ReportPolicy::CustomQuery => Ok(self.flatten_custom_query(payload)),
        }
    }

    fn flatten_grid(&self, payload: &Value) -> Result<ReportTable> {
        let header = ReportHeader::from_payload(&self.report, payload)?;
        let context = header.context_row();
        let columns = HEADER_COLUMNS
            .iter()
            .fold(ColumnSet::default(), |set, c| set.with(c));

        let nodes = child_rows(payload);
        if nodes.is_empty() {
            log::debug!("Report {} has no rows", self.report);
        }

        let (rows, columns) = self.flatten_rows(nodes, &context, 1, columns)?;
        let (columns, primary_key) = columns.finalize();

        Ok(ReportTable {
            name: self.table_name(),
            columns,
            primary_key,
            rows,
        })
    }

    fn flatten_rows(
        &self,
        nodes: &[Value],
        context: &Row,
        depth: usize,
        columns: ColumnSet,
    ) -> Result<(Vec<Row>, ColumnSet)> {
        nodes
            .iter()
            .try_fold((Vec::new(), columns), |(mut rows, columns), node| {
                let (produced, columns) = self.flatten_node(node, context, depth, columns)?;
                rows.extend(produced);
                Ok((rows, columns))
            })
    }

    fn flatten_node(
        &self,
        node: &Value,
        context: &Row,
        depth: usize,
        columns: ColumnSet,
    ) -> Result<(Vec<Row>, ColumnSet)> {
        let label = label_column(depth);

        match RowNode::classify(node) {
            RowNode::GroupedLeaf { group, col_data } => {
                let next = label_column(depth + 1);
                let row = context
                    .clone()
                    .with(label.as_str(), cell_text(group))
                    .with(next.as_str(), self.col_value(col_data, 0)?)
                    .with(VALUE_COLUMN, self.col_value(col_data, 1)?);
                let columns = columns.with(&label).with(&next).with(VALUE_COLUMN);
                Ok((vec![row], columns))
            }
            RowNode::Section { label: title, rows } => {
                let context = context.clone().with(label.as_str(), cell_text(title));
                self.flatten_rows(rows, &context, depth + 1, columns.with(&label))
            }
            RowNode::DataLeaf { col_data } => {
                let row = context
                    .clone()
                    .with(label.as_str(), self.col_value(col_data, 0)?)
                    .with(VALUE_COLUMN, self.col_value(col_data, 1)?);
                let columns = columns.with(&label).with(VALUE_COLUMN);
                Ok((vec![row], columns))
            }
            RowNode::Unrecognized(reason) => Err(MeltError::shape(
                &self.report,
                format!("{} at depth {}. Please validate the data.", reason, depth),
            )),
        }
    }

    fn col_value(&self, col_data: &[Value], idx: usize) -> Result<String> {
        col_data
            .get(idx)
            .map(|cell| cell.get("value").map(cell_text).unwrap_or_default())
            .ok_or_else(|| {
                MeltError::shape(
                    &self.report,
                    format!(
                        "expected at least {} ColData entries, found {}",
                        idx + 1,
                        col_data.len()
                    ),
                )
            })
    }

    fn flatten_opaque(&self, payload: &Value) -> Result<ReportTable> {
        let header = ReportHeader::from_payload(&self.report, payload)?;
        log::info!(
            "Report {} cannot be decomposed, storing it as a single cell",
            self.report
        );

        let row = header.context_row().with(VALUE_COLUMN, payload.to_string());
        let primary_key: Vec<String> = HEADER_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut columns = primary_key.clone();
        columns.push(VALUE_COLUMN.to_string());

        Ok(ReportTable {
            name: self.table_name(),
            columns,
            primary_key,
            rows: vec![row],
        })
    }

    fn flatten_custom_query(&self, payload: &Value) -> ReportTable {
        let row = Row::new()
            .with(QUERY_COLUMN, self.query.as_str())
            .with(VALUE_COLUMN, payload.to_string());

        ReportTable {
            name: self.table_name(),
            columns: vec![QUERY_COLUMN.to_string(), VALUE_COLUMN.to_string()],
            primary_key: Vec::new(),
            rows: vec![row],
        }
    }
}
