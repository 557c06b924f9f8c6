//! Run driver over the QuickBooks fetch layer
//!
//! The fetch layer (HTTP, OAuth token refresh, retry and rate limiting)
//! lives outside this crate behind [`QuickBooksSource`]. The extractor asks
//! it for one payload at a time, melts it and appends the rows to the table
//! sink before asking for the next one.

pub mod replay;

pub use replay::ReplaySource;

use crate::config::{DateRange, EndpointSpec, RunPlan, DATE_FORMAT};
use crate::error::{FetchError, MeltError, Result};
use crate::melt::mapping::{MappingCatalog, TableLayout};
use crate::melt::pnl::{self, ClassBreakdown, PNL_QUERY};
use crate::melt::report::{
    requires_accounting_method, AccountingMethod, ReportFlattener, ReportPolicy, CUSTOM_QUERY,
};
use crate::melt::types::{KeyGenerator, MeltConfig, Row};
use crate::melt::walker::TreeWalker;
use crate::melt::writer::TableSink;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

const CLASS_QUERY: &str = "select * from Class";

const GENERAL_LEDGER: &str = "GeneralLedger";

/// Columns requested for `GeneralLedger`, whose default layout omits most of them
pub const GENERAL_LEDGER_COLUMNS: &str = "klass_name,account_name,account_num,chk_print_state,\
create_by,create_date,cust_name,doc_num,emp_name,inv_date,is_adj,is_ap_paid,is_ar_paid,\
is_cleared,item_name,last_mod_by,last_mod_date,memo,name,quantity,rate,split_acc,tx_date,\
txn_type,vend_name,net_amount,tax_amount,tax_code,dept_name,subt_nat_amount,rbal_nat_amount,\
debt_amt,credit_amt";

/// One page of entity records
#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    pub records: Vec<Value>,
    /// Total number of records the endpoint holds
    pub total_count: u64,
}

/// Parameters of a single report request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub report: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub accounting_method: Option<AccountingMethod>,
    /// Extra query parameters such as `summarize_column_by` or `class`
    pub params: BTreeMap<String, String>,
}

impl ReportRequest {
    pub fn new(report: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        ReportRequest {
            report: report.into(),
            start_date,
            end_date,
            accounting_method: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_accounting_method(mut self, method: AccountingMethod) -> Self {
        self.accounting_method = Some(method);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Query string parameters as QuickBooks expects them
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("start_date".to_string(), self.start_date.format(DATE_FORMAT).to_string()),
            ("end_date".to_string(), self.end_date.format(DATE_FORMAT).to_string()),
        ];
        if let Some(method) = self.accounting_method {
            params.push(("accounting_method".to_string(), method.api_value().to_string()));
        }
        params.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// Contract of the external fetch layer.
///
/// Implementations own authentication, retries and rate limiting. Any
/// failure is reported as a [`FetchError`] and aborts the run.
pub trait QuickBooksSource {
    /// Records of an entity endpoint starting at the 1-based `start_position`
    fn fetch_entity_page(
        &mut self,
        endpoint: &str,
        start_position: u64,
        max_results: u64,
    ) -> std::result::Result<EntityPage, FetchError>;

    fn fetch_report(&mut self, request: &ReportRequest) -> std::result::Result<Value, FetchError>;

    /// Run a query and return its `QueryResponse` object
    fn query(&mut self, query: &str) -> std::result::Result<Value, FetchError>;
}

/// Drives a whole extraction run, one payload at a time
pub struct Extractor<'a, S: QuickBooksSource, K: KeyGenerator> {
    source: S,
    catalog: &'a MappingCatalog,
    sink: TableSink,
    config: MeltConfig,
    keys: K,
}

impl<'a, S: QuickBooksSource, K: KeyGenerator> Extractor<'a, S, K> {
    pub fn new(
        source: S,
        catalog: &'a MappingCatalog,
        sink: TableSink,
        config: MeltConfig,
        keys: K,
    ) -> Self {
        Extractor {
            source,
            catalog,
            sink,
            config,
            keys,
        }
    }

    pub fn sink(&self) -> &TableSink {
        &self.sink
    }

    pub fn into_sink(self) -> TableSink {
        self.sink
    }

    /// Extract every endpoint of the plan, then persist manifests.
    ///
    /// The first failure aborts the run; tables already written stay on disk.
    pub fn run(&mut self, plan: &RunPlan) -> Result<()> {
        self.run_all(std::slice::from_ref(plan))
    }

    /// Extract several plans in order into the same tables, then persist
    /// manifests once
    pub fn run_all(&mut self, plans: &[RunPlan]) -> Result<()> {
        // Unknown entity endpoints fail before anything is fetched
        for spec in plans.iter().flat_map(|plan| &plan.endpoints) {
            if let EndpointSpec::Entity(endpoint) = spec {
                self.catalog.get(endpoint)?;
            }
        }

        for plan in plans {
            self.run_plan(plan)?;
        }

        self.sink.write_manifests()
    }

    fn run_plan(&mut self, plan: &RunPlan) -> Result<()> {
        for spec in &plan.endpoints {
            match spec {
                EndpointSpec::Entity(endpoint) => {
                    self.extract_entities(endpoint)?;
                }
                EndpointSpec::Report(report) => {
                    self.extract_report(report, &plan.dates, plan.custom_query.as_deref())?;
                }
                EndpointSpec::ProfitAndLossQuery => {
                    self.extract_pnl_query(&plan.dates, plan.summarize_column_by.as_deref())?;
                }
            }
        }
        Ok(())
    }

    /// Page through an entity endpoint. Returns the number of rows written
    /// across all of its tables.
    pub fn extract_entities(&mut self, endpoint: &str) -> Result<usize> {
        let catalog = self.catalog;
        let mapping = catalog.get(endpoint)?;
        let layout = TableLayout::from_mapping(endpoint, mapping);
        let mut walker = TreeWalker::new(endpoint, mapping, &mut self.keys);

        let page_size = self.config.page_size.max(1) as u64;
        let mut start_position = 1;
        let mut buffer: Vec<Value> = Vec::new();
        let mut written = 0;
        let mut requests = 0;

        log::info!("Fetching endpoint {}", endpoint);
        loop {
            let page = self
                .source
                .fetch_entity_page(endpoint, start_position, page_size)?;
            requests += 1;

            if page.total_count == 0 {
                if requests == 1 {
                    log::info!("There are no returns for {}", endpoint);
                    return Ok(0);
                }
                log::warn!("{} reported no records at position {}", endpoint, start_position);
                break;
            }

            buffer.extend(page.records);
            if buffer.len() > self.config.flush_threshold {
                log::info!(
                    "Writing {} records from {} endpoint to output file.",
                    buffer.len(),
                    endpoint
                );
                written += self.sink.write_tables(&walker.flatten(&buffer), &layout)?;
                buffer.clear();
            }

            start_position += page_size;
            if start_position > page.total_count {
                break;
            }
        }

        if !buffer.is_empty() {
            written += self.sink.write_tables(&walker.flatten(&buffer), &layout)?;
        }
        log::debug!("Number of requests for {}: {}", endpoint, requests);

        Ok(written)
    }

    /// Fetch and melt one report, once per accounting method where required
    pub fn extract_report(
        &mut self,
        report: &str,
        dates: &DateRange,
        query: Option<&str>,
    ) -> Result<usize> {
        if ReportPolicy::for_report(report) == ReportPolicy::CustomQuery {
            return self.extract_custom_query(query);
        }

        let (start, end) = dates.require(report)?;
        log::info!("Fetching endpoint {} with date range: {} - {}", report, start, end);

        let methods: Vec<Option<AccountingMethod>> = if requires_accounting_method(report) {
            AccountingMethod::ALL.iter().copied().map(Some).collect()
        } else {
            vec![None]
        };

        let mut written = 0;
        for method in methods {
            let mut request = ReportRequest::new(report, start, end);
            if report == GENERAL_LEDGER {
                request = request.with_param("columns", GENERAL_LEDGER_COLUMNS);
            }
            let mut flattener = ReportFlattener::new(report);
            if let Some(method) = method {
                request = request.with_accounting_method(method);
                flattener = flattener.with_accounting_method(method);
            }

            let payload = self.source.fetch_report(&request)?;
            if is_empty_payload(&payload) {
                log::info!("Report {} returned no data", flattener.table_name());
                continue;
            }

            let table = flattener.flatten(&payload)?;
            written += self.sink.write_report(&table)?;
        }

        Ok(written)
    }

    fn extract_custom_query(&mut self, query: Option<&str>) -> Result<usize> {
        let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
            return Err(MeltError::config("Please enter query for CustomQuery."));
        };
        log::debug!("Input Custom Query: {}", query);

        let payload = self.source.query(query)?;
        if is_empty_payload(&payload) {
            log::info!("{} returned no data", CUSTOM_QUERY);
            return Ok(0);
        }

        let table = ReportFlattener::new(CUSTOM_QUERY)
            .with_query(query)
            .flatten(&payload)?;
        self.sink.write_report(&table)
    }

    /// Profit and Loss broken down by class, accrual and cash
    pub fn extract_pnl_query(
        &mut self,
        dates: &DateRange,
        summarize_column_by: Option<&str>,
    ) -> Result<usize> {
        let (start, end) = dates.require(PNL_QUERY)?;
        let start_text = start.format(DATE_FORMAT).to_string();
        let end_text = end.format(DATE_FORMAT).to_string();

        let classes = pnl::classes(&self.source.query(CLASS_QUERY)?);
        log::info!(
            "Found Classes: {:?}",
            classes.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
        );

        let mut results: Vec<(AccountingMethod, Vec<Row>)> =
            AccountingMethod::ALL.iter().map(|m| (*m, Vec::new())).collect();
        let mut summarize_by: Option<String> = None;

        for class in &classes {
            log::info!("Processing class: {}", class.name);
            let breakdown =
                ClassBreakdown::new(class.name.as_str(), start_text.as_str(), end_text.as_str());

            for (method, rows) in results.iter_mut() {
                let mut request = ReportRequest::new("ProfitAndLoss", start, end)
                    .with_accounting_method(*method);
                if let Some(by) = summarize_column_by {
                    request = request.with_param("summarize_column_by", by);
                }
                if let Some(id) = &class.id {
                    request = request.with_param("class", id.as_str());
                }

                let payload = self.source.fetch_report(&request)?;
                let class_rows = breakdown.flatten(&payload)?;
                if summarize_by.is_none() {
                    summarize_by = class_rows.summarize_by;
                }
                rows.extend(class_rows.rows);
            }
        }

        let (columns, primary_key) = pnl::pnl_layout(summarize_by.is_some());
        let mut written = 0;
        for (method, rows) in &results {
            let table = pnl::pnl_table_name(*method, summarize_by.as_deref());
            log::info!("Saving pnl_report results to {}.", table);
            written += self.sink.write(&table, rows, &columns, &primary_key, true)?;
        }

        Ok(written)
    }
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractorConfig, InputTable};
    use crate::melt::types::SequentialKeys;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// In-memory source recording every request it serves
    #[derive(Default)]
    struct FakeSource {
        entities: BTreeMap<String, Vec<Value>>,
        reports: VecDeque<Value>,
        queries: BTreeMap<String, Value>,
        page_requests: Rc<RefCell<Vec<(u64, u64)>>>,
        report_requests: Rc<RefCell<Vec<ReportRequest>>>,
        fail_reports: bool,
        /// Report an empty endpoint on every page after the first
        empty_after_first_page: bool,
    }

    impl QuickBooksSource for FakeSource {
        fn fetch_entity_page(
            &mut self,
            endpoint: &str,
            start_position: u64,
            max_results: u64,
        ) -> std::result::Result<EntityPage, FetchError> {
            self.page_requests.borrow_mut().push((start_position, max_results));
            if self.empty_after_first_page && start_position > 1 {
                return Ok(EntityPage::default());
            }
            let all = self.entities.get(endpoint).cloned().unwrap_or_default();
            let records = all
                .iter()
                .skip(start_position as usize - 1)
                .take(max_results as usize)
                .cloned()
                .collect();
            Ok(EntityPage {
                records,
                total_count: all.len() as u64,
            })
        }

        fn fetch_report(
            &mut self,
            request: &ReportRequest,
        ) -> std::result::Result<Value, FetchError> {
            if self.fail_reports {
                return Err(FetchError::new("401 Unauthorized"));
            }
            self.report_requests.borrow_mut().push(request.clone());
            self.reports
                .pop_front()
                .ok_or_else(|| FetchError::new("no more reports"))
        }

        fn query(&mut self, query: &str) -> std::result::Result<Value, FetchError> {
            self.queries
                .get(query)
                .cloned()
                .ok_or_else(|| FetchError::new(format!("unexpected query {}", query)))
        }
    }

    fn catalog() -> MappingCatalog {
        let document = json!({
            "Item": {
                "Id": {"type": "column", "mapping": {"destination": "id", "primaryKey": true}},
                "Name": {"type": "column", "mapping": {"destination": "name"}}
            }
        });
        MappingCatalog::from_json(&document, &MeltConfig::default()).unwrap()
    }

    fn items(n: usize) -> Vec<Value> {
        (1..=n).map(|i| json!({"Id": i.to_string(), "Name": format!("item {}", i)})).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn read(dir: &TempDir, table: &str) -> String {
        std::fs::read_to_string(dir.path().join(format!("{}.csv", table))).unwrap()
    }

    #[test]
    fn test_paginates_and_flushes() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource::default();
        source.entities.insert("Item".into(), items(7));
        let pages = source.page_requests.clone();

        let config = MeltConfig {
            page_size: 3,
            flush_threshold: 4,
            ..MeltConfig::default()
        };
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor = Extractor::new(source, &catalog, sink, config, SequentialKeys::new());

        let written = extractor.extract_entities("Item").unwrap();

        assert_eq!(written, 7);
        assert_eq!(*pages.borrow(), vec![(1, 3), (4, 3), (7, 3)]);
        let content = read(&dir, "Item");
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "id,name");
        assert_eq!(lines[7], "7,item 7");
    }

    #[test]
    fn test_later_empty_page_keeps_buffered_records() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource {
            empty_after_first_page: true,
            ..FakeSource::default()
        };
        source.entities.insert("Item".into(), items(5));

        let config = MeltConfig {
            page_size: 3,
            ..MeltConfig::default()
        };
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor = Extractor::new(source, &catalog, sink, config, SequentialKeys::new());

        assert_eq!(extractor.extract_entities("Item").unwrap(), 3);
        assert_eq!(read(&dir, "Item").lines().count(), 4);
    }

    #[test]
    fn test_empty_endpoint_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor = Extractor::new(
            FakeSource::default(),
            &catalog,
            sink,
            MeltConfig::default(),
            SequentialKeys::new(),
        );

        assert_eq!(extractor.extract_entities("Item").unwrap(), 0);
        assert!(!dir.path().join("Item.csv").exists());
    }

    #[test]
    fn test_unknown_endpoint_fails_before_fetch() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let source = FakeSource::default();
        let pages = source.page_requests.clone();
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let plan = RunPlan {
            endpoints: vec![
                EndpointSpec::Entity("Item".into()),
                EndpointSpec::Entity("Bill".into()),
            ],
            dates: DateRange::default(),
            summarize_column_by: None,
            custom_query: None,
        };

        assert!(matches!(extractor.run(&plan), Err(MeltError::Config(_))));
        assert!(pages.borrow().is_empty());
    }

    #[test]
    fn test_dual_method_report() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource::default();
        for amount in ["100", "80"] {
            source.reports.push_back(json!({
                "Header": {"ReportName": "ProfitAndLoss", "StartPeriod": "2024-01-01", "EndPeriod": "2024-01-31"},
                "Rows": {"Row": [{"type": "Data", "ColData": [{"value": "Revenue"}, {"value": amount}]}]}
            }));
        }
        let requests = source.report_requests.clone();
        let sink = TableSink::new(dir.path(), true).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let dates = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        extractor.extract_report("ProfitAndLoss", &dates, None).unwrap();

        let methods: Vec<_> = requests.borrow().iter().map(|r| r.accounting_method).collect();
        assert_eq!(methods, vec![Some(AccountingMethod::Accrual), Some(AccountingMethod::Cash)]);
        assert_eq!(
            read(&dir, "ProfitAndLoss_accrual"),
            "ReportName,StartPeriod,EndPeriod,Col_1,value\n\
             ProfitAndLoss,2024-01-01,2024-01-31,Revenue,100\n"
        );
        assert!(read(&dir, "ProfitAndLoss_cash").ends_with("Revenue,80\n"));

        let manifest = extractor.sink().manifest("ProfitAndLoss_cash").unwrap();
        assert!(manifest.incremental);
        assert_eq!(manifest.primary_key, vec!["ReportName", "StartPeriod", "EndPeriod", "Col_1"]);
    }

    #[test]
    fn test_report_requires_dates() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor = Extractor::new(
            FakeSource::default(),
            &catalog,
            sink,
            MeltConfig::default(),
            SequentialKeys::new(),
        );

        let err = extractor
            .extract_report("BalanceSheet", &DateRange::default(), None)
            .unwrap_err();
        assert!(matches!(err, MeltError::Config(_)));
    }

    #[test]
    fn test_fetch_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let source = FakeSource {
            fail_reports: true,
            ..FakeSource::default()
        };
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let dates = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        let err = extractor.extract_report("CashFlow", &dates, None).unwrap_err();
        assert!(matches!(err, MeltError::Fetch(_)));
    }

    #[test]
    fn test_custom_query() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource::default();
        source
            .queries
            .insert("select * from Vendor".into(), json!({"Vendor": [{"Id": "1"}]}));
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let dates = DateRange::default();
        assert!(extractor.extract_report(CUSTOM_QUERY, &dates, None).is_err());
        extractor
            .extract_report(CUSTOM_QUERY, &dates, Some("select * from Vendor"))
            .unwrap();

        let content = read(&dir, CUSTOM_QUERY);
        assert!(content.starts_with("query,value\nselect * from Vendor,"));
    }

    #[test]
    fn test_pnl_query_per_class() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource::default();
        source.queries.insert(
            CLASS_QUERY.into(),
            json!({"Class": [{"Id": "1", "Name": "East"}, {"Id": "2", "Name": "West"}]}),
        );
        for _ in 0..4 {
            source.reports.push_back(json!({
                "Header": {"ReportName": "ProfitAndLoss"},
                "Rows": {"Row": [{"type": "Data", "ColData": [{"value": "Sales"}, {"value": "5"}]}]}
            }));
        }
        let requests = source.report_requests.clone();
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let dates = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        extractor.extract_pnl_query(&dates, None).unwrap();

        let classes: Vec<_> = requests
            .borrow()
            .iter()
            .map(|r| r.params.get("class").cloned().unwrap_or_default())
            .collect();
        assert_eq!(classes, vec!["1", "1", "2", "2"]);

        let cash = read(&dir, "ProfitAndLossQuery_cash");
        assert_eq!(
            cash,
            "class,name,value,obj_type,obj_group,start_date,end_date\n\
             East,Sales,5,Data,,2024-01-01,2024-01-31\n\
             West,Sales,5,Data,,2024-01-01,2024-01-31\n"
        );
        assert!(dir.path().join("ProfitAndLossQuery_accrual.csv").exists());
    }

    #[test]
    fn test_general_ledger_requests_columns() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource::default();
        for _ in 0..2 {
            source.reports.push_back(json!({
                "Header": {"ReportName": "GeneralLedger", "StartPeriod": "2024-01-01", "EndPeriod": "2024-01-31"},
                "Rows": {"Row": []}
            }));
        }
        let requests = source.report_requests.clone();
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let dates = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        extractor.extract_report("GeneralLedger", &dates, None).unwrap();

        let requests = requests.borrow();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            let columns = request.params.get("columns").unwrap();
            assert!(columns.starts_with("klass_name,account_name,"));
            assert!(columns.ends_with(",debt_amt,credit_amt"));
        }
    }

    #[test]
    fn test_non_ledger_report_has_no_columns_param() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let mut source = FakeSource::default();
        source.reports.push_back(json!({
            "Header": {"ReportName": "CashFlow", "StartPeriod": "2024-01-01", "EndPeriod": "2024-01-31"}
        }));
        let requests = source.report_requests.clone();
        let sink = TableSink::new(dir.path(), false).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());

        let dates = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        extractor.extract_report("CashFlow", &dates, None).unwrap();
        assert!(requests.borrow()[0].params.is_empty());
    }

    fn balance_sheet(start: &str, end: &str, row: Value) -> Value {
        json!({
            "Header": {"ReportName": "BalanceSheet", "StartPeriod": start, "EndPeriod": end},
            "Rows": {"Row": [row]}
        })
    }

    #[test]
    fn test_input_table_rows_accumulate_into_one_table() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let config = ExtractorConfig::from_json(
            &json!({"companyid": "77", "endpoints": [], "destination": {}}),
        )
        .unwrap();
        let input = "PK,report,start_date,end_date,segment_data_by\n\
                     77,BalanceSheet,2024-01-01,2024-01-31,\n\
                     77,BalanceSheet,2024-02-01,2024-02-29,\n";
        let table = InputTable::from_reader(input.as_bytes()).unwrap();
        let plans = config.input_table_plans(&table, date(2024, 3, 1)).unwrap();

        let flat = json!({"type": "Data", "ColData": [{"value": "Cash"}, {"value": "5"}]});
        let nested = json!({
            "type": "Section",
            "Header": {"ColData": [{"value": "Assets"}]},
            "Rows": {"Row": [{"type": "Data", "ColData": [{"value": "Bank"}, {"value": "9"}]}]}
        });
        let mut source = FakeSource::default();
        for _ in AccountingMethod::ALL {
            source.reports.push_back(balance_sheet("2024-01-01", "2024-01-31", flat.clone()));
        }
        for _ in AccountingMethod::ALL {
            source.reports.push_back(balance_sheet("2024-02-01", "2024-02-29", nested.clone()));
        }
        let requests = source.report_requests.clone();

        let sink = TableSink::new(dir.path(), table.forces_incremental()).unwrap();
        let mut extractor =
            Extractor::new(source, &catalog, sink, MeltConfig::default(), SequentialKeys::new());
        extractor.run_all(&plans).unwrap();

        let starts: Vec<_> = requests.borrow().iter().map(|r| r.start_date).collect();
        assert_eq!(
            starts,
            vec![date(2024, 1, 1), date(2024, 1, 1), date(2024, 2, 1), date(2024, 2, 1)]
        );
        assert_eq!(
            read(&dir, "BalanceSheet_cash"),
            "ReportName,StartPeriod,EndPeriod,Col_1,Col_2,value\n\
             BalanceSheet,2024-01-01,2024-01-31,Cash,,5\n\
             BalanceSheet,2024-02-01,2024-02-29,Assets,Bank,9\n"
        );
        let manifest = std::fs::read_to_string(dir.path().join("BalanceSheet_cash.csv.manifest"))
            .unwrap();
        assert!(manifest.contains("\"incremental\":true"));
    }

    #[test]
    fn test_query_params() {
        let request = ReportRequest::new("BalanceSheet", date(2024, 1, 1), date(2024, 3, 31))
            .with_accounting_method(AccountingMethod::Cash)
            .with_param("summarize_column_by", "Month");

        assert_eq!(
            request.query_params(),
            vec![
                ("start_date".to_string(), "2024-01-01".to_string()),
                ("end_date".to_string(), "2024-03-31".to_string()),
                ("accounting_method".to_string(), "Cash".to_string()),
                ("summarize_column_by".to_string(), "Month".to_string()),
            ]
        );
    }
}
