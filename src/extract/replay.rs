//! Offline source replaying previously captured API responses
//!
//! Layout of the capture directory:
//!
//! - `<Entity>.json`: a list of records, or a `{"QueryResponse": {"<Entity>": [...]}}` response
//! - `<Report>_<method>.json` or `<Report>.json`: a report payload
//!
//! Queries are answered from the entity file named in their `from` clause,
//! or from `CustomQuery.json` when no such file was captured.

use super::{EntityPage, QuickBooksSource, ReportRequest};
use crate::error::FetchError;
use crate::melt::report::CUSTOM_QUERY;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

static FROM_CLAUSE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfrom\s+(\w+)").unwrap());

pub struct ReplaySource {
    dir: PathBuf,
    entities: HashMap<String, Vec<Value>>,
}

impl ReplaySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        ReplaySource {
            dir: dir.as_ref().to_path_buf(),
            entities: HashMap::new(),
        }
    }

    fn read_json(&self, name: &str) -> Result<Value, FetchError> {
        let path = self.dir.join(format!("{}.json", name));
        let bytes = std::fs::read(&path)
            .map_err(|e| FetchError::new(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::new(format!("{}: {}", path.display(), e)))
    }

    /// Records of an entity, loaded once and cached for later pages
    fn records(&mut self, entity: &str) -> Result<&[Value], FetchError> {
        if !self.entities.contains_key(entity) {
            let document = self.read_json(entity)?;
            let records = entity_records(entity, document)?;
            log::debug!("Replaying {} {} records", records.len(), entity);
            self.entities.insert(entity.to_string(), records);
        }
        Ok(self
            .entities
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

fn entity_records(entity: &str, document: Value) -> Result<Vec<Value>, FetchError> {
    let list = match document {
        Value::Array(items) => return Ok(items),
        Value::Object(mut fields) => match fields.remove("QueryResponse") {
            Some(Value::Object(mut response)) => response.remove(entity),
            _ => fields.remove(entity),
        },
        _ => None,
    };

    match list {
        Some(Value::Array(items)) => Ok(items),
        None => Ok(Vec::new()),
        Some(_) => Err(FetchError::new(format!("{} records are not a list", entity))),
    }
}

impl QuickBooksSource for ReplaySource {
    fn fetch_entity_page(
        &mut self,
        endpoint: &str,
        start_position: u64,
        max_results: u64,
    ) -> Result<EntityPage, FetchError> {
        let records = self.records(endpoint)?;
        let skip = start_position.saturating_sub(1) as usize;
        Ok(EntityPage {
            records: records
                .iter()
                .skip(skip)
                .take(max_results as usize)
                .cloned()
                .collect(),
            total_count: records.len() as u64,
        })
    }

    fn fetch_report(&mut self, request: &ReportRequest) -> Result<Value, FetchError> {
        if let Some(method) = request.accounting_method {
            let name = format!("{}_{}", request.report, method);
            if self.dir.join(format!("{}.json", name)).exists() {
                return self.read_json(&name);
            }
        }
        self.read_json(&request.report)
    }

    fn query(&mut self, query: &str) -> Result<Value, FetchError> {
        let entity = FROM_CLAUSE_REGEX
            .captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|entity| self.dir.join(format!("{}.json", entity)).exists());

        let Some(entity) = entity else {
            if self.dir.join(format!("{}.json", CUSTOM_QUERY)).exists() {
                return self.read_json(CUSTOM_QUERY);
            }
            return Err(FetchError::new(format!("cannot replay query: {}", query)));
        };

        let records = self.records(&entity)?.to_vec();
        let mut response = Map::new();
        response.insert(entity, Value::Array(records));
        Ok(Value::Object(response))
    }
}
