use std::collections::HashMap;
use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::config::MeterConfig;
use crate::models::{LineFormat, MeterReading, ReadingRecord};

pub mod utils;

/// Field layout of the rtlamr csv output
pub const CSV_FIELD_COUNT: usize = 10;
pub const CSV_TIME_FIELD: usize = 0;
pub const CSV_ID_FIELD: usize = 6;
pub const CSV_VALUE_FIELD: usize = 7;

/// Accepted keys for the meter id inside the json `Message` object
pub const JSON_ID_KEYS: [&str; 2] = ["EndpointID", "ID"];

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Received result with unexpected number of fields: {0}")]
    FieldCount(usize),
    #[error("Received result with an empty {0} field")]
    EmptyField(&'static str),
    #[error("Received invalid json: {0}")]
    InvalidJson(String),
    #[error("Received result with unexpected meter id: {0}")]
    UnknownMeter(String),
    #[error("Received line that is not valid UTF-8: {0}")]
    Encoding(String),
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::UnknownMeter(_) => "unknown-meter",
            _ => "parse",
        }
    }
}

impl LineFormat {
    /// Decodes one line of decoder output.
    ///
    /// `Ok(None)` is a well formed line that carries no reading.
    pub fn decode(&self, line: &str) -> Result<Option<ReadingRecord>, ParseError> {
        match self {
            LineFormat::Csv => decode_csv(line),
            LineFormat::Json => decode_json(line),
        }
    }
}

fn decode_csv(line: &str) -> Result<Option<ReadingRecord>, ParseError> {
    let flds: Vec<&str> = line.trim_end().split(',').collect();

    /* proper scm+ results have 10 fields */
    if flds.len() != CSV_FIELD_COUNT {
        return Err(ParseError::FieldCount(flds.len()));
    }

    let meter_id = flds[CSV_ID_FIELD].trim();
    if meter_id.is_empty() {
        return Err(ParseError::EmptyField("meter id"));
    }

    let raw_value = flds[CSV_VALUE_FIELD].trim();
    if raw_value.is_empty() {
        return Err(ParseError::EmptyField("consumption"));
    }

    let timestamp = flds[CSV_TIME_FIELD].trim();

    return Ok(Some(ReadingRecord {
        meter_id: meter_id.to_string(),
        raw_value: raw_value.to_string(),
        timestamp: if timestamp.is_empty() { None } else { Some(timestamp.to_string()) },
    }));
}

fn decode_json(line: &str) -> Result<Option<ReadingRecord>, ParseError> {
    let doc: Value = serde_json::from_str(line.trim())
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    if !doc.is_object() {
        return Err(ParseError::InvalidJson("top level is not an object".to_string()));
    }

    let message = match doc.get("Message") {
        Some(m) if m.is_object() => m,
        _ => {
            debug!("No message object in decoder output");
            return Ok(None);
        }
    };

    let meter_id = JSON_ID_KEYS.iter().find_map(|key| utils::json_scalar(message.get(*key)));
    let raw_value = utils::json_scalar(message.get("Consumption"));

    let (meter_id, raw_value) = match (meter_id, raw_value) {
        (Some(id), Some(value)) => (id, value),
        _ => {
            debug!("Message without meter id or consumption");
            return Ok(None);
        }
    };

    return Ok(Some(ReadingRecord {
        meter_id,
        raw_value,
        timestamp: doc.get("Time").and_then(Value::as_str).map(str::to_string),
    }));
}

/// Turns decoder lines into readings of configured meters
pub struct StreamParser {
    format: LineFormat,
    meters: HashMap<String, MeterConfig>,
}

impl StreamParser {
    pub fn new(format: LineFormat, meters: &[MeterConfig]) -> Self {
        return StreamParser {
            format,
            meters: meters.iter().map(|m| (m.id.clone(), m.clone())).collect(),
        }
    }

    /// Looks up the owning meter and applies its format mask
    pub fn resolve(&self, record: ReadingRecord) -> Result<MeterReading, ParseError> {
        let meter = match self.meters.get(&record.meter_id) {
            Some(m) => m,
            None => return Err(ParseError::UnknownMeter(record.meter_id)),
        };

        let value = match &meter.format {
            Some(mask) => utils::apply_format(mask, &record.raw_value),
            None => record.raw_value.clone(),
        };

        return Ok(MeterReading {
            meter_name: meter.display_name(),
            meter_id: record.meter_id,
            raw_value: record.raw_value,
            value,
            timestamp: record.timestamp,
        });
    }

    pub fn parse_line(&self, line: &str) -> Result<Option<MeterReading>, ParseError> {
        return match self.format.decode(line)? {
            Some(record) => self.resolve(record).map(Some),
            None => Ok(None),
        };
    }

    /// Same as [`StreamParser::parse_line`] for a raw line as read from the pipe
    pub fn parse_bytes(&self, raw: &[u8]) -> Result<Option<MeterReading>, ParseError> {
        let line = match std::str::from_utf8(raw) {
            Ok(l) => l.trim_end_matches(['\r', '\n']),
            Err(e) => return Err(ParseError::Encoding(e.to_string())),
        };
        return self.parse_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter(id: &str, format: Option<&str>) -> MeterConfig {
        return MeterConfig {
            id: id.to_string(),
            protocol: "scm".to_string(),
            name: None,
            unit_of_measurement: None,
            icon: None,
            format: format.map(str::to_string),
        }
    }

    const CSV_LINE: &str = "2020-01-01 00:00:00,0,0,0,0,0,12345678,042,0,0";

    #[test]
    fn test_csv_reading() {
        let parser = StreamParser::new(LineFormat::Csv, &[meter("12345678", None)]);
        let reading = parser.parse_line(CSV_LINE).unwrap().unwrap();
        assert_eq!(reading.meter_id, "12345678");
        assert_eq!(reading.value, "042");
        assert_eq!(reading.meter_name, "meter_12345678");
        assert_eq!(reading.timestamp.as_deref(), Some("2020-01-01 00:00:00"));
    }

    #[test]
    fn test_csv_trailing_newline() {
        let record = LineFormat::Csv.decode(&format!("{CSV_LINE}\r\n")).unwrap().unwrap();
        assert_eq!(record.raw_value, "042");
    }

    #[test]
    fn test_raw_bytes() {
        let parser = StreamParser::new(LineFormat::Csv, &[meter("12345678", None)]);
        let reading = parser.parse_bytes(format!("{CSV_LINE}\r\n").as_bytes()).unwrap().unwrap();
        assert_eq!(reading.value, "042");

        let err = parser.parse_bytes(b"\xff\xfe garbage\n").unwrap_err();
        assert!(matches!(err, ParseError::Encoding(_)));
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_csv_wrong_field_count() {
        let parser = StreamParser::new(LineFormat::Csv, &[meter("12345678", None)]);
        assert_eq!(parser.parse_line("a,b,c,d,e,f,12345678,042"), Err(ParseError::FieldCount(8)));
        assert_eq!(parser.parse_line(""), Err(ParseError::FieldCount(1)));
        assert_eq!(parser.parse_line(&format!("{CSV_LINE},extra")), Err(ParseError::FieldCount(11)));
    }

    #[test]
    fn test_csv_empty_id() {
        assert_eq!(LineFormat::Csv.decode("t,0,0,0,0,0,,042,0,0"), Err(ParseError::EmptyField("meter id")));
    }

    #[test]
    fn test_unknown_meter() {
        let parser = StreamParser::new(LineFormat::Csv, &[meter("1", None)]);
        let err = parser.parse_line(CSV_LINE).unwrap_err();
        assert_eq!(err, ParseError::UnknownMeter("12345678".to_string()));
        assert_eq!(err.kind(), "unknown-meter");
    }

    #[test]
    fn test_json_endpoint_id_with_format() {
        let parser = StreamParser::new(LineFormat::Json, &[meter("12345678", Some("####"))]);
        let reading = parser
            .parse_line(r#"{"Message":{"EndpointID":"12345678","Consumption":"7"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(reading.value, "0007");
        assert_eq!(reading.raw_value, "7");
        assert_eq!(reading.meter_name, "meter_12345678");
        assert_eq!(reading.timestamp, None);
    }

    #[test]
    fn test_json_numeric_id_and_time() {
        let line = r#"{"Time":"2024-03-01T10:00:00Z","Type":"SCM","Message":{"ID":12345678,"Type":7,"Consumption":1234}}"#;
        let record = LineFormat::Json.decode(line).unwrap().unwrap();
        assert_eq!(record.meter_id, "12345678");
        assert_eq!(record.raw_value, "1234");
        assert_eq!(record.timestamp.as_deref(), Some("2024-03-01T10:00:00Z"));
    }

    #[test]
    fn test_json_without_reading() {
        assert_eq!(LineFormat::Json.decode(r#"{"Message":{"Consumption":7}}"#), Ok(None));
        assert_eq!(LineFormat::Json.decode(r#"{"Message":{"ID":1}}"#), Ok(None));
        assert_eq!(LineFormat::Json.decode(r#"{"Time":"now"}"#), Ok(None));
    }

    #[test]
    fn test_json_malformed() {
        assert!(matches!(LineFormat::Json.decode("{\"Message\":"), Err(ParseError::InvalidJson(_))));
        assert!(matches!(LineFormat::Json.decode("[1,2]"), Err(ParseError::InvalidJson(_))));
    }
}
