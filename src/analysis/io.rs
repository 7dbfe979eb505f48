// Reading benchmark dumps into the loosely-typed record form the analyzers take

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Read a JSON array of records. A single object is accepted as one record.
pub fn read_records_json<R: Read>(reader: R) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_reader(reader)
        .map_err(|e| Error::RecordError(format!("invalid JSON: {}", e)))?;

    match value {
        Value::Array(records) => Ok(records),
        Value::Object(_) => Ok(vec![value]),
        other => Err(Error::RecordError(format!(
            "expected an array of records, found {}",
            kind(&other)
        ))),
    }
}

/// Read CSV with a header row. Numeric cells become JSON numbers, empty
/// cells are left out, anything else stays a string.
pub fn read_records_csv<R: Read>(reader: R) -> Result<Vec<Value>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| Error::RecordError(e.to_string()))?
        .clone();

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row.map_err(|e| Error::RecordError(e.to_string()))?;

        let mut map = Map::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            if cell.is_empty() {
                continue;
            }
            map.insert(header.to_string(), cell_value(cell));
        }
        records.push(Value::Object(map));
    }

    Ok(records)
}

/// Load records from a file, choosing the format by extension (`.csv` or JSON)
pub fn load_records(path: &Path) -> Result<Vec<Value>> {
    let reader = BufReader::new(File::open(path)?);

    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        read_records_csv(reader)
    } else {
        read_records_json(reader)
    }
}

fn cell_value(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
