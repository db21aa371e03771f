//! Turns an uploaded transaction log into one row per customer.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::AppError;

const REQUIRED_COLUMNS: [&str; 4] = ["CustomerID", "Quantity", "UnitPrice", "InvoiceNo"];
const OUTPUT_HEADER: [&str; 5] = ["CustomerID", "Monetary", "Frequency", "TotalQuantity", "Country"];

#[derive(Debug, Error)]
pub enum TabularError {
    #[error("the uploaded file is empty")]
    Empty,

    #[error("the uploaded file is missing the required column {0}")]
    MissingColumn(&'static str),

    #[error("the uploaded file has no usable rows")]
    NoUsableRows,

    #[error("could not read the uploaded file: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not write aggregated data: {0}")]
    Write(String),
}

impl From<TabularError> for AppError {
    fn from(err: TabularError) -> Self {
        AppError::EmptyOrMalformedInput(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAggregate {
    pub customer_id: String,
    pub monetary: f64,
    pub invoices: HashSet<String>,
    pub total_quantity: f64,
    pub country: String,
}

impl CustomerAggregate {
    pub fn frequency(&self) -> usize {
        self.invoices.len()
    }
}

struct Columns {
    customer: usize,
    quantity: usize,
    unit_price: usize,
    invoice: usize,
    country: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, TabularError> {
        let position = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let required = |name: &'static str| position(name).ok_or(TabularError::MissingColumn(name));

        let [customer, quantity, unit_price, invoice] = REQUIRED_COLUMNS;
        Ok(Self {
            customer: required(customer)?,
            quantity: required(quantity)?,
            unit_price: required(unit_price)?,
            invoice: required(invoice)?,
            country: position("Country"),
        })
    }
}

/// Picks the most frequent of `;`, `,` and tab on the header line.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = (b',', 0);
    for candidate in [b';', b',', b'\t'] {
        let count = header_line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Parses decimal text written as `10.50`, `10,50`, `1.234,56` or `1,234.56`.
/// When both separators appear, the last one is the decimal mark.
pub fn parse_locale_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = match (trimmed.rfind(','), trimmed.rfind('.')) {
        (Some(comma), Some(dot)) if dot > comma => trimmed.replace(',', ""),
        (Some(_), _) => trimmed.replace('.', "").replace(',', "."),
        (None, _) => trimmed.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Groups rows by customer in first-seen order. Rows without a customer key
/// or with unreadable numbers are skipped.
pub fn aggregate(text: &str) -> Result<Vec<CustomerAggregate>, TabularError> {
    let text = text.trim_start_matches('\u{feff}');
    let header_line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(TabularError::Empty)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(header_line))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns = Columns::locate(reader.headers()?)?;

    let mut order: Vec<CustomerAggregate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let key = field(columns.customer);
        let quantity = parse_locale_decimal(field(columns.quantity));
        let price = parse_locale_decimal(field(columns.unit_price));
        let (Some(quantity), Some(price)) = (quantity, price) else {
            skipped += 1;
            continue;
        };
        if key.is_empty() {
            skipped += 1;
            continue;
        }

        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            order.push(CustomerAggregate {
                customer_id: key.to_string(),
                monetary: 0.0,
                invoices: HashSet::new(),
                total_quantity: 0.0,
                country: columns
                    .country
                    .map(|i| field(i).to_string())
                    .unwrap_or_default(),
            });
            order.len() - 1
        });

        let entry = &mut order[slot];
        entry.monetary += quantity * price;
        entry.total_quantity += quantity;
        let invoice = field(columns.invoice);
        if !invoice.is_empty() {
            entry.invoices.insert(invoice.to_string());
        }
    }

    debug!(customers = order.len(), skipped, "aggregated transaction rows");
    if order.is_empty() {
        return Err(TabularError::NoUsableRows);
    }
    Ok(order)
}

fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Comma-delimited rendering with the aggregate header.
pub fn render(rows: &[CustomerAggregate]) -> Result<String, TabularError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(OUTPUT_HEADER)?;
    for row in rows {
        writer.write_record([
            row.customer_id.clone(),
            format!("{:.2}", row.monetary),
            row.frequency().to_string(),
            format_quantity(row.total_quantity),
            row.country.clone(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TabularError::Write(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TabularError::Write(e.to_string()))
}

/// Aggregate and render in one step; the result becomes the cluster data.
#[instrument(skip_all, fields(input_len = text.len()))]
pub fn preprocess(text: &str) -> Result<String, TabularError> {
    render(&aggregate(text)?)
}
