use serde::{Deserialize, Serialize};


/// Output format rtlamr is asked for with `-format=`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    #[default]
    Csv,
    Json,
}

impl LineFormat {
    pub fn to_string(&self) -> String {
        match self {
            LineFormat::Csv => "csv".to_string(),
            LineFormat::Json => "json".to_string(),
        }
    }
}

/// One reading as it was found in a single decoder line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingRecord {
    pub meter_id: String,
    pub raw_value: String,
    pub timestamp: Option<String>,
}

/// A reading that belongs to a configured meter, ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterReading {
    pub meter_id: String,
    /// `name` of the meter or `meter_<id>`
    pub meter_name: String,
    pub raw_value: String,
    /// Raw value with the meter's format mask applied
    pub value: String,
    pub timestamp: Option<String>,
}
