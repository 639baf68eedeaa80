//! The streaming parse loop: peek, detect, map headers, validate rows,
//! emit batches.

use crate::detect::{detect_delimiter, Delimiter};
use crate::input::{detect_encoding, LossyTranscoder};
use crate::mapping::{CanonicalField, ColumnMapping};
use crate::{ParseError, DEFAULT_BATCH_SIZE};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use models::{IntegrationId, Part, Price};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::Ordering;

/// Row errors kept per file; anything beyond this is counted but dropped.
pub const MAX_ROW_ERRORS: usize = 100;

const PEEK_LEN: usize = 1 << 16; // 64KiB

/// Fields stamped onto every record produced from one file.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub integration_id: IntegrationId,
    pub integration_name: String,
    /// Currency assumed for prices, feeds rarely carry one per row.
    pub currency: String,
    pub now: DateTime<Utc>,
}

/// One rejected row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based data row number, not counting the header.
    pub row: u64,
    pub message: String,
}

/// What a completed parse reports back.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Records emitted through `on_batch`.
    pub records: u64,
    /// Rows rejected by validation or malformed CSV.
    pub skipped: u64,
    /// The first `MAX_ROW_ERRORS` row errors.
    pub errors: Vec<RowError>,
    pub delimiter: Delimiter,
    /// True when malformed bytes were replaced during transcoding.
    pub lossy_encoding: bool,
}

/// Streams `path`, validating and mapping each row, and hands records to
/// `on_batch` in chunks of at most `batch_size`. Row-level failures are
/// collected on the outcome; only I/O failures and a failing `on_batch`
/// abort the file.
#[tracing::instrument(skip(mapping, ctx, on_batch), fields(path = %path.display()))]
pub fn parse_file<F>(
    path: &Path,
    mapping: &ColumnMapping,
    ctx: &RecordContext,
    batch_size: usize,
    mut on_batch: F,
) -> Result<ParseOutcome, ParseError>
where
    F: FnMut(Vec<Part>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
{
    let batch_size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };

    let mut file = File::open(path)?;
    let mut peek = vec![0u8; PEEK_LEN];
    let mut peeked = 0usize;
    while peeked < peek.len() {
        let n = file.read(&mut peek[peeked..])?;
        if n == 0 {
            break;
        }
        peeked += n;
    }
    peek.truncate(peeked);

    let encoding = detect_encoding(&peek);
    let rest = io::Read::chain(io::Cursor::new(peek.clone()), file);

    // Everything funnels through the lossy transcoder, UTF-8 included: it
    // strips the BOM and replaces malformed bytes instead of failing the
    // file. A separate transcode of the peeked prefix feeds delimiter
    // detection.
    let transcoder = LossyTranscoder::new(Box::new(rest), encoding);
    let lossy_flag = transcoder.replacement_flag();
    let reader: Box<dyn Read> = Box::new(transcoder);

    let mut peek_transcoder = LossyTranscoder::new(Box::new(io::Cursor::new(peek)), encoding);
    let mut utf8_peek = Vec::new();
    peek_transcoder.read_to_end(&mut utf8_peek)?;

    let mut outcome = ParseOutcome {
        records: 0,
        skipped: 0,
        errors: Vec::new(),
        delimiter: Delimiter::Comma,
        lossy_encoding: false,
    };

    if utf8_peek.iter().all(|b| b.is_ascii_whitespace()) {
        // Nothing to parse; an empty feed file is not an error.
        return Ok(outcome);
    }

    outcome.delimiter = detect_delimiter(&utf8_peek);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(outcome.delimiter.byte())
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ParseError::MissingHeader);
    }

    let columns: Vec<Option<CanonicalField>> =
        headers.iter().map(|h| mapping.resolve(h)).collect();
    if !columns.contains(&Some(CanonicalField::PartNumber)) {
        return Err(ParseError::NoPartNumberColumn { headers });
    }
    tracing::debug!(?headers, ?columns, "resolved file headers");

    let mut batch: Vec<Part> = Vec::with_capacity(batch_size);
    let mut record = csv::StringRecord::new();
    let mut row_num = 0u64;
    loop {
        match csv_reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                row_num += 1;
                reject(&mut outcome, row_num, format!("malformed row: {err}"));
                continue;
            }
        }
        row_num += 1;

        match build_part(&record, &headers, &columns, ctx) {
            Ok(part) => {
                batch.push(part);
                outcome.records += 1;
                if batch.len() >= batch_size {
                    on_batch(std::mem::take(&mut batch)).map_err(ParseError::Sink)?;
                    batch.reserve(batch_size);
                }
            }
            Err(message) => reject(&mut outcome, row_num, message),
        }
    }
    if !batch.is_empty() {
        on_batch(batch).map_err(ParseError::Sink)?;
    }

    outcome.lossy_encoding = lossy_flag.load(Ordering::Relaxed);
    if outcome.lossy_encoding {
        tracing::warn!(
            path = %path.display(),
            "malformed bytes were replaced while transcoding"
        );
    }
    Ok(outcome)
}

fn reject(outcome: &mut ParseOutcome, row: u64, message: String) {
    outcome.skipped += 1;
    if outcome.errors.len() < MAX_ROW_ERRORS {
        outcome.errors.push(RowError { row, message });
    }
}

fn build_part(
    record: &csv::StringRecord,
    headers: &[String],
    columns: &[Option<CanonicalField>],
    ctx: &RecordContext,
) -> Result<Part, String> {
    let mut part_number = String::new();
    let mut description = String::new();
    let mut brand = String::new();
    let mut supplier = String::new();
    let mut price: Option<Price> = None;
    let mut quantity = 0u64;
    let mut delivery_days = None;
    let mut weight = None;
    let mut condition = None;
    let mut uom = None;
    let mut category = None;
    let mut subcategory = None;
    let mut origin = None;
    let mut attributes = BTreeMap::new();

    for (idx, column) in columns.iter().enumerate() {
        let Some(value) = record.get(idx) else {
            continue;
        };
        let value = value.trim();
        match column {
            Some(CanonicalField::PartNumber) => part_number = value.to_uppercase(),
            Some(CanonicalField::Description) => description = value.to_string(),
            Some(CanonicalField::Brand) => brand = value.to_string(),
            Some(CanonicalField::Supplier) => supplier = value.to_string(),
            Some(CanonicalField::Price) => {
                if !value.is_empty() {
                    let amount = parse_price(value)
                        .ok_or_else(|| format!("invalid price {value:?}"))?;
                    price = Some(Price {
                        amount,
                        currency: ctx.currency.clone(),
                    });
                }
            }
            Some(CanonicalField::Quantity) => {
                if !value.is_empty() {
                    quantity = parse_quantity(value)
                        .ok_or_else(|| format!("invalid quantity {value:?}"))?;
                }
            }
            Some(CanonicalField::DeliveryDays) => {
                delivery_days = value.parse::<u32>().ok();
            }
            Some(CanonicalField::Weight) => {
                weight = value.parse::<f64>().ok().filter(|w| *w >= 0.0);
            }
            Some(CanonicalField::Condition) => condition = non_empty(value),
            Some(CanonicalField::Uom) => uom = non_empty(value),
            Some(CanonicalField::Category) => category = non_empty(value),
            Some(CanonicalField::Subcategory) => subcategory = non_empty(value),
            Some(CanonicalField::Origin) => origin = non_empty(value),
            None => {
                let header = &headers[idx];
                if !header.is_empty() && !value.is_empty() {
                    attributes.insert(
                        header.clone(),
                        serde_json::Value::String(value.to_string()),
                    );
                }
            }
        }
    }

    if part_number.is_empty() {
        return Err("missing part number".to_string());
    }

    Ok(Part {
        part_number,
        description,
        brand,
        supplier,
        price,
        quantity,
        delivery_days,
        weight,
        condition,
        uom,
        category,
        subcategory,
        origin,
        attributes,
        integration_id: ctx.integration_id,
        integration_name: ctx.integration_name.clone(),
        imported_at: ctx.now,
        last_updated: ctx.now,
    })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(crate) fn parse_price(value: &str) -> Option<BigDecimal> {
    let cleaned = value.replace(' ', "");
    // Commas are either thousands separators ("2,450.00") or a decimal
    // comma ("2450,00"); a comma followed by one or two digits at the end,
    // with no dot anywhere, reads as the latter.
    let cleaned = if cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        match cleaned.rsplit_once(',') {
            Some((int, frac)) if (1..=2).contains(&frac.len()) => {
                format!("{}.{frac}", int.replace(',', ""))
            }
            _ => cleaned.replace(',', ""),
        }
    };
    let amount = BigDecimal::from_str(&cleaned).ok()?;
    if amount < BigDecimal::from(0) {
        return None;
    }
    Some(amount)
}

pub(crate) fn parse_quantity(value: &str) -> Option<u64> {
    if let Ok(n) = value.parse::<u64>() {
        return Some(n);
    }
    // Some exports write integral quantities as decimals ("15.0").
    let f = value.parse::<f64>().ok()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(content).expect("write temp file");
        file
    }

    fn ctx() -> RecordContext {
        RecordContext {
            integration_id: IntegrationId::new(),
            integration_name: "Acme".to_string(),
            currency: "USD".to_string(),
            now: Utc::now(),
        }
    }

    fn parse_all(content: &[u8]) -> (ParseOutcome, Vec<Part>) {
        let file = write_temp(content);
        let mut parts = Vec::new();
        let outcome = parse_file(
            file.path(),
            &ColumnMapping::default(),
            &ctx(),
            DEFAULT_BATCH_SIZE,
            |batch| {
                parts.extend(batch);
                Ok(())
            },
        )
        .expect("parse failed");
        (outcome, parts)
    }

    #[test]
    fn parses_a_typical_feed_file() {
        let (outcome, parts) = parse_all(
            b"partNumber,description,brand,supplier,price,quantity\n\
              8471474,HYDRAULIC PUMP,BOSCH,ACME,2450.00,15\n\
              8471474,HYDRAULIC PUMP HD,SKF,NORDIC,3250.00,5\n\
              3461928,FUEL INJECTOR,DENSO,ACME,875.00,25\n",
        );
        assert_eq!(outcome.records, 3);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.delimiter, Delimiter::Comma);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].part_number, "8471474");
        assert_eq!(parts[0].brand, "BOSCH");
        assert_eq!(
            parts[0].price.as_ref().unwrap().amount,
            BigDecimal::from_str("2450.00").unwrap()
        );
        assert_eq!(parts[2].quantity, 25);
    }

    #[test]
    fn part_numbers_are_uppercased() {
        let (_, parts) = parse_all(b"sku,qty\nab-123x,4\n");
        assert_eq!(parts[0].part_number, "AB-123X");
    }

    #[test]
    fn rows_without_part_numbers_are_skipped_with_errors() {
        let (outcome, parts) = parse_all(
            b"partNumber,price\n\
              A1,10.00\n\
              ,20.00\n\
              A3,30.00\n",
        );
        assert_eq!(outcome.records, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 2);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn invalid_prices_and_quantities_are_row_errors() {
        let (outcome, parts) = parse_all(
            b"partNumber,price,quantity\n\
              A1,not-a-price,1\n\
              A2,-5.00,1\n\
              A3,10.00,minus\n\
              A4,10.00,3\n",
        );
        assert_eq!(outcome.records, 1);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(parts[0].part_number, "A4");
    }

    #[test]
    fn decimal_commas_and_thousands_separators_parse() {
        let (_, parts) = parse_all(b"partNumber;price\nA1;2450,00\nA2;2,450.00\nA3;99,5\n");
        let prices: Vec<_> = parts
            .iter()
            .map(|p| p.price.as_ref().unwrap().amount.clone())
            .collect();
        assert_eq!(
            prices,
            vec![
                BigDecimal::from_str("2450.00").unwrap(),
                BigDecimal::from_str("2450.00").unwrap(),
                BigDecimal::from_str("99.5").unwrap(),
            ]
        );
    }

    #[test]
    fn empty_price_and_quantity_use_defaults() {
        let (_, parts) = parse_all(b"partNumber,price,quantity\nA1,,\n");
        assert_eq!(parts[0].price, None);
        assert_eq!(parts[0].quantity, 0);
    }

    #[test]
    fn quantities_with_zero_fraction_are_accepted() {
        let (_, parts) = parse_all(b"partNumber,quantity\nA1,15.0\n");
        assert_eq!(parts[0].quantity, 15);
    }

    #[test]
    fn unknown_columns_are_preserved_as_attributes() {
        let (_, parts) = parse_all(
            b"partNumber,warehouse,shelf\n\
              A1,STOCKHOLM,B-14\n",
        );
        assert_eq!(
            parts[0].attributes.get("warehouse"),
            Some(&serde_json::Value::String("STOCKHOLM".to_string()))
        );
        assert_eq!(
            parts[0].attributes.get("shelf"),
            Some(&serde_json::Value::String("B-14".to_string()))
        );
    }

    #[test]
    fn semicolon_files_are_detected() {
        let (outcome, parts) = parse_all(
            b"partNumber;description;price\n\
              A1;BRAKE PAD;45.50\n\
              A2;BRAKE DISC;89.00\n",
        );
        assert_eq!(outcome.delimiter, Delimiter::Semicolon);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].description, "BRAKE DISC");
    }

    #[test]
    fn quoted_fields_with_embedded_newlines_parse() {
        let (_, parts) = parse_all(
            b"partNumber,description\n\
              A1,\"LINE ONE\r\nLINE TWO\"\n",
        );
        assert_eq!(parts[0].description, "LINE ONE\r\nLINE TWO");
    }

    #[test]
    fn utf8_bom_is_tolerated() {
        let mut content = vec![0xEF, 0xBB, 0xBF];
        content.extend_from_slice(b"partNumber,qty\nA1,2\n");
        let (outcome, parts) = parse_all(&content);
        assert_eq!(outcome.records, 1);
        assert_eq!(parts[0].part_number, "A1");
        assert_eq!(parts[0].quantity, 2);
    }

    #[test]
    fn utf16_file_is_transcoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "partNumber,description\nA1,PUMP\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (outcome, parts) = parse_all(&bytes);
        assert_eq!(outcome.records, 1);
        assert!(!outcome.lossy_encoding);
        assert_eq!(parts[0].description, "PUMP");
    }

    #[test]
    fn empty_file_reports_zero_records() {
        let (outcome, parts) = parse_all(b"");
        assert_eq!(outcome.records, 0);
        assert_eq!(outcome.skipped, 0);
        assert!(parts.is_empty());
    }

    #[test]
    fn header_only_file_reports_zero_records() {
        let (outcome, parts) = parse_all(b"partNumber,price\n");
        assert_eq!(outcome.records, 0);
        assert!(parts.is_empty());
    }

    #[test]
    fn missing_part_number_column_is_a_file_error() {
        let file = write_temp(b"price,quantity\n1.00,2\n");
        let err = parse_file(
            file.path(),
            &ColumnMapping::default(),
            &ctx(),
            DEFAULT_BATCH_SIZE,
            |_| Ok(()),
        )
        .expect_err("should fail");
        assert!(matches!(err, ParseError::NoPartNumberColumn { .. }));
    }

    #[test]
    fn batches_are_emitted_at_the_requested_size() {
        let mut content = b"partNumber\n".to_vec();
        for i in 0..25 {
            content.extend_from_slice(format!("P{i}\n").as_bytes());
        }
        let file = write_temp(&content);
        let mut batch_sizes = Vec::new();
        parse_file(file.path(), &ColumnMapping::default(), &ctx(), 10, |batch| {
            batch_sizes.push(batch.len());
            Ok(())
        })
        .expect("parse failed");
        assert_eq!(batch_sizes, vec![10, 10, 5]);
    }

    #[test]
    fn later_rows_keep_parsing_after_row_errors() {
        let mut content = b"partNumber,price\n".to_vec();
        for i in 0..150 {
            content.extend_from_slice(format!(",{i}.00\n").as_bytes());
        }
        content.extend_from_slice(b"GOOD,1.00\n");
        let (outcome, parts) = parse_all(&content);
        assert_eq!(outcome.records, 1);
        assert_eq!(outcome.skipped, 150);
        // The error list is bounded.
        assert_eq!(outcome.errors.len(), MAX_ROW_ERRORS);
        assert_eq!(parts[0].part_number, "GOOD");
    }
}
