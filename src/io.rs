//! CSV import and export.
//!
//! Traces are read from a table with one column per channel (the header holds the channel keys).
//! Events are written as one row per event, the header being the union of all row keys.
use csv::{ReaderBuilder, Writer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, TauError};
use crate::signal::StimulusOnset;

/// Read one trace per column, keyed by the column header.
pub fn read_traces<R: Read>(reader: R) -> Result<Vec<(String, Vec<f64>)>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let keys = rdr
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<String>>();
    let mut columns = vec![Vec::new(); keys.len()];

    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        for (col, field) in record.iter().enumerate() {
            let value = field.parse::<f64>().map_err(|_| {
                TauError::InvalidTrace(format!(
                    "Row {}, column {}: cannot parse {:?} as a number",
                    row + 1,
                    keys[col],
                    field
                ))
            })?;
            columns[col].push(value);
        }
    }

    Ok(keys.into_iter().zip(columns).collect())
}

/// Read one trace per column from a file.
pub fn read_traces_csv<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<f64>)>> {
    read_traces(std::fs::File::open(path)?)
}

/// Read a stimulus onset table with columns `start`, `end` and `info`.
pub fn read_stimulus_onsets<R: Read>(reader: R) -> Result<Vec<StimulusOnset>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    rdr.deserialize::<StimulusOnset>()
        .map(|record| record.map_err(TauError::from))
        .collect()
}

/// Read a one-row metadata table; numeric fields become numbers, the others strings.
pub fn read_metadata<R: Read>(reader: R) -> Result<BTreeMap<String, Value>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let keys = rdr.headers()?.clone();
    let record = rdr.records().next().transpose()?.ok_or_else(|| {
        TauError::IOError("The metadata table has no data row".to_string())
    })?;

    Ok(keys
        .iter()
        .zip(record.iter())
        .map(|(k, v)| {
            let value = match v.parse::<f64>() {
                Ok(x) if x.is_finite() => Value::from(x),
                _ => Value::from(v),
            };
            (k.to_string(), value)
        })
        .collect())
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

/// Write the rows as a table. The columns are `roi` and `event` (if present), followed by every other
/// key in alphabetical order; missing values are left empty.
pub fn write_rows<W: Write>(writer: W, rows: &[BTreeMap<String, Value>]) -> Result<()> {
    let mut columns = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<std::collections::BTreeSet<String>>()
        .into_iter()
        .collect::<Vec<String>>();
    for (pos, key) in ["roi", "event"].iter().enumerate() {
        if let Some(i) = columns.iter().position(|c| c == key) {
            let key = columns.remove(i);
            columns.insert(pos.min(columns.len()), key);
        }
    }

    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(&columns)?;
    for row in rows {
        wtr.write_record(columns.iter().map(|c| cell(row.get(c))))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the event rows to a file.
pub fn write_events_csv<P: AsRef<Path>>(path: P, rows: &[BTreeMap<String, Value>]) -> Result<()> {
    write_rows(std::fs::File::create(path)?, rows)
}

/// Write the flagged channel keys to a file, one per row under a `roi` header.
pub fn write_flags_csv<P: AsRef<Path>>(path: P, keys: &[&str]) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    wtr.write_record(["roi"])?;
    for key in keys {
        wtr.write_record([key])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_traces() {
        let data = "roi_0, roi_1\n1.0, 2.5\n2.0, -1\n3.5, 0\n";
        let traces = read_traces(data.as_bytes()).unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0], ("roi_0".to_string(), vec![1.0, 2.0, 3.5]));
        assert_eq!(traces[1], ("roi_1".to_string(), vec![2.5, -1.0, 0.0]));

        let data = "a,b\n1.0,x\n";
        assert!(matches!(
            read_traces(data.as_bytes()),
            Err(TauError::InvalidTrace(_))
        ));
    }

    #[test]
    fn test_read_onsets_and_metadata() {
        let data = "start,end,info\n0.5,1.0,flash\n2.0,2.5,tone\n";
        let onsets = read_stimulus_onsets(data.as_bytes()).unwrap();
        assert_eq!(onsets.len(), 2);
        assert_eq!(onsets[1].info, "tone");
        assert_eq!(onsets[0].end, 1.0);

        let data = "animal,age\nmouse_3,42\n";
        let meta = read_metadata(data.as_bytes()).unwrap();
        assert_eq!(meta["animal"], Value::from("mouse_3"));
        assert_eq!(meta["age"], Value::from(42.0));
        assert!(read_metadata("animal\n".as_bytes()).is_err());
    }

    #[test]
    fn test_write_rows() {
        let rows = vec![
            BTreeMap::from([
                ("tau_rise".to_string(), Value::from(0.5)),
                ("roi".to_string(), Value::from("a")),
                ("event".to_string(), Value::from(0)),
            ]),
            BTreeMap::from([
                ("roi".to_string(), Value::from("b")),
                ("event".to_string(), Value::from(0)),
                ("fit_rise_tau".to_string(), Value::Null),
            ]),
        ];
        let mut out = Vec::new();
        write_rows(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<&str>>();
        assert_eq!(lines[0], "roi,event,fit_rise_tau,tau_rise");
        assert_eq!(lines[1], "a,0,,0.5");
        assert_eq!(lines[2], "b,0,,");
    }

    #[test]
    fn test_write_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flags.csv");
        write_flags_csv(&path, &["roi_2", "roi_5"]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "roi\nroi_2\nroi_5\n");
    }
}
