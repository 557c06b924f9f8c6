//! Per-class Profit and Loss breakdown
//!
//! `ProfitAndLossQuery` is not a QuickBooks report of its own: the P&L is
//! fetched once per class and every labelled node (data rows, section
//! headers, section summaries) becomes one row tagged with the class. When
//! the report is summarized by a period or dimension, each amount column
//! becomes its own row carrying the column title and the account category.

use crate::error::{MeltError, Result};
use crate::melt::report::AccountingMethod;
use crate::melt::types::Row;
use crate::melt::walker::cell_text;
use serde_json::Value;

pub const PNL_QUERY: &str = "ProfitAndLossQuery";

/// Class used when the company has no classes defined
pub const TOTAL_CLASS: &str = "Total";

const PLAIN_COLUMNS: &[&str] = &[
    "class",
    "name",
    "value",
    "obj_type",
    "obj_group",
    "start_date",
    "end_date",
];
const PLAIN_PRIMARY_KEY: &[&str] = &["class", "name", "obj_type", "start_date", "end_date"];

const SUMMARIZED_COLUMNS: &[&str] = &[
    "class",
    "name",
    "value",
    "obj_type",
    "obj_group",
    "category_name",
    "category_id",
    "start_date",
    "end_date",
    "summarize_by",
    "currency",
];
const SUMMARIZED_PRIMARY_KEY: &[&str] = &[
    "class",
    "name",
    "obj_type",
    "category_id",
    "start_date",
    "end_date",
];

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Output columns and primary key for the plain or summarized layout
pub fn pnl_layout(summarized: bool) -> (Vec<String>, Vec<String>) {
    if summarized {
        (owned(SUMMARIZED_COLUMNS), owned(SUMMARIZED_PRIMARY_KEY))
    } else {
        (owned(PLAIN_COLUMNS), owned(PLAIN_PRIMARY_KEY))
    }
}

/// `ProfitAndLossQuery_<method>[_<summarize_by>]`
pub fn pnl_table_name(method: AccountingMethod, summarize_by: Option<&str>) -> String {
    match summarize_by {
        Some(by) => format!("{}_{}_{}", PNL_QUERY, method, by),
        None => format!("{}_{}", PNL_QUERY, method),
    }
}

/// A QuickBooks class the P&L is broken down by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    pub id: Option<String>,
    pub name: String,
}

/// Classes from a `select * from Class` query response, or [`TOTAL_CLASS`]
pub fn classes(query_response: &Value) -> Vec<ClassRef> {
    let found: Vec<ClassRef> = query_response
        .get("Class")
        .and_then(Value::as_array)
        .map(|classes| {
            classes
                .iter()
                .filter_map(|c| {
                    let name = c.get("Name").and_then(Value::as_str)?;
                    (!name.is_empty()).then(|| ClassRef {
                        id: c.get("Id").map(cell_text).filter(|id| !id.is_empty()),
                        name: name.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if found.is_empty() {
        log::warn!("API returned no Classes, the P&L query will return the total");
        return vec![ClassRef {
            id: None,
            name: TOTAL_CLASS.to_string(),
        }];
    }
    found
}

/// Rows melted from one class's P&L payload
#[derive(Debug, Clone, Default)]
pub struct ClassRows {
    pub summarize_by: Option<String>,
    pub rows: Vec<Row>,
}

/// Melter for the P&L of a single class
#[derive(Debug, Clone)]
pub struct ClassBreakdown {
    class_name: String,
    start_date: String,
    end_date: String,
}

struct Summarized {
    by: String,
    currency: String,
    titles: Vec<String>,
}

impl ClassBreakdown {
    pub fn new(
        class_name: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
    ) -> Self {
        ClassBreakdown {
            class_name: class_name.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
        }
    }

    pub fn flatten(&self, payload: &Value) -> Result<ClassRows> {
        let Some(header) = payload.get("Header") else {
            return Err(MeltError::shape(PNL_QUERY, "Header is missing. Unable to parse request."));
        };

        let summarized = header
            .get("SummarizeColumnsBy")
            .and_then(Value::as_str)
            .filter(|by| !by.is_empty())
            .map(|by| Summarized {
                by: by.to_string(),
                currency: header.get("Currency").map(cell_text).unwrap_or_default(),
                titles: column_titles(payload),
            });

        let mut rows = Vec::new();
        for node in report_rows(payload) {
            self.visit(node, summarized.as_ref(), &mut rows)?;
        }

        Ok(ClassRows {
            summarize_by: summarized.map(|s| s.by),
            rows,
        })
    }

    fn visit(
        &self,
        node: &Value,
        summarized: Option<&Summarized>,
        rows: &mut Vec<Row>,
    ) -> Result<()> {
        let obj_type = node.get("type").map(cell_text).unwrap_or_default();
        let obj_group = node.get("group").map(cell_text).unwrap_or_default();

        if let Some(col_data) = node.get("ColData").and_then(Value::as_array) {
            match summarized {
                Some(s) => {
                    let first = col_data.first().ok_or_else(empty_col_data)?;
                    let category_name = first.get("value").map(cell_text).unwrap_or_default();
                    let category_id = first.get("id").map(cell_text).unwrap_or_default();
                    for (title, cell) in s.titles.iter().zip(col_data) {
                        if title.is_empty() {
                            continue;
                        }
                        let value = cell.get("value").map(cell_text).unwrap_or_default();
                        let row = self
                            .base_row(title, value, &obj_type, &obj_group)
                            .with("category_name", category_name.as_str())
                            .with("category_id", category_id.as_str());
                        rows.push(with_summary(row, s));
                    }
                }
                None => {
                    let (name, value) = name_and_value(col_data)?;
                    rows.push(self.base_row(&name, value, &obj_type, &obj_group));
                }
            }
        }

        for key in ["Header", "Summary"] {
            if let Some(col_data) = node
                .get(key)
                .and_then(|n| n.get("ColData"))
                .and_then(Value::as_array)
            {
                let (name, value) = name_and_value(col_data)?;
                let row = self.base_row(&name, value, &obj_type, &obj_group);
                rows.push(match summarized {
                    Some(s) => {
                        with_summary(row.with("category_name", "").with("category_id", ""), s)
                    }
                    None => row,
                });
            }
        }

        if let Some(children) = node
            .get("Rows")
            .and_then(|r| r.get("Row"))
            .and_then(Value::as_array)
        {
            for child in children {
                self.visit(child, summarized, rows)?;
            }
        }

        Ok(())
    }

    fn base_row(&self, name: &str, value: String, obj_type: &str, obj_group: &str) -> Row {
        Row::new()
            .with("class", self.class_name.as_str())
            .with("name", name)
            .with("value", value)
            .with("obj_type", obj_type)
            .with("obj_group", obj_group)
            .with("start_date", self.start_date.as_str())
            .with("end_date", self.end_date.as_str())
    }
}

fn with_summary(row: Row, summarized: &Summarized) -> Row {
    row.with("summarize_by", summarized.by.as_str())
        .with("currency", summarized.currency.as_str())
}

fn empty_col_data() -> MeltError {
    MeltError::shape(PNL_QUERY, "ColData is empty")
}

/// Label and amount of a node; a missing amount is written empty
fn name_and_value(col_data: &[Value]) -> Result<(String, String)> {
    let name = col_data
        .first()
        .ok_or_else(empty_col_data)?
        .get("value")
        .map(cell_text)
        .unwrap_or_default();
    let value = col_data
        .get(1)
        .and_then(|c| c.get("value"))
        .map(cell_text)
        .unwrap_or_default();
    Ok((name, value))
}

fn column_titles(payload: &Value) -> Vec<String> {
    payload
        .get("Columns")
        .and_then(|c| c.get("Column"))
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .map(|c| c.get("ColTitle").map(cell_text).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

fn report_rows(payload: &Value) -> &[Value] {
    payload
        .get("Rows")
        .and_then(|r| r.get("Row"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
