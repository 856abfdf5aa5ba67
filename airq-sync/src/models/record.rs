//! Sensor record model
//!
//! A [`Record`] is one hour of pollutant readings, built by the quality gate from a raw
//! upstream row and consumed by exactly one upload attempt. Every pollutant key is always
//! present on the wire; an absent value is sent as `null`, never as a blank string.

use airq_common::time::parse_iso_utc;
use airq_common::HourBucket;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Remote-store key carrying the detection timestamp
pub const DETECTED_AT_KEY: &str = "detectedAtUtc";

/// Upstream key carrying the local observation time
pub const SOURCE_TIME_KEY: &str = "日期時間";

/// The ten pollutants reported each hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    Nmhc,
    Thc,
    Ch4,
    So2,
    O3,
    Nox,
    No,
    Co,
    Co2,
}

impl Pollutant {
    pub const ALL: [Pollutant; 10] = [
        Pollutant::Pm25,
        Pollutant::Nmhc,
        Pollutant::Thc,
        Pollutant::Ch4,
        Pollutant::So2,
        Pollutant::O3,
        Pollutant::Nox,
        Pollutant::No,
        Pollutant::Co,
        Pollutant::Co2,
    ];

    /// Key in the upstream source's JSON
    pub fn source_key(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM25",
            Pollutant::Nmhc => "NMHC",
            Pollutant::Thc => "THC",
            Pollutant::Ch4 => "CH4",
            Pollutant::So2 => "SO2",
            Pollutant::O3 => "O3",
            Pollutant::Nox => "NOX",
            Pollutant::No => "NO",
            Pollutant::Co => "CO",
            Pollutant::Co2 => "CO2",
        }
    }

    /// Key in the remote store's JSON
    pub fn remote_key(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm_25",
            Pollutant::Nmhc => "nmhc",
            Pollutant::Thc => "thc",
            Pollutant::Ch4 => "ch4",
            Pollutant::So2 => "so2",
            Pollutant::O3 => "o3",
            Pollutant::Nox => "nox",
            Pollutant::No => "no",
            Pollutant::Co => "co",
            Pollutant::Co2 => "co2",
        }
    }
}

/// Pollutant values for one hour; `None` is an explicit absence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    pub pm_25: Option<f64>,
    pub nmhc: Option<f64>,
    pub thc: Option<f64>,
    pub ch4: Option<f64>,
    pub so2: Option<f64>,
    pub o3: Option<f64>,
    pub nox: Option<f64>,
    pub no: Option<f64>,
    pub co: Option<f64>,
    pub co2: Option<f64>,
}

impl Readings {
    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm25 => self.pm_25,
            Pollutant::Nmhc => self.nmhc,
            Pollutant::Thc => self.thc,
            Pollutant::Ch4 => self.ch4,
            Pollutant::So2 => self.so2,
            Pollutant::O3 => self.o3,
            Pollutant::Nox => self.nox,
            Pollutant::No => self.no,
            Pollutant::Co => self.co,
            Pollutant::Co2 => self.co2,
        }
    }

    pub fn set(&mut self, pollutant: Pollutant, value: Option<f64>) {
        let slot = match pollutant {
            Pollutant::Pm25 => &mut self.pm_25,
            Pollutant::Nmhc => &mut self.nmhc,
            Pollutant::Thc => &mut self.thc,
            Pollutant::Ch4 => &mut self.ch4,
            Pollutant::So2 => &mut self.so2,
            Pollutant::O3 => &mut self.o3,
            Pollutant::Nox => &mut self.nox,
            Pollutant::No => &mut self.no,
            Pollutant::Co => &mut self.co,
            Pollutant::Co2 => &mut self.co2,
        };
        *slot = value;
    }
}

/// One normalized hourly observation
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub hour: HourBucket,
    pub readings: Readings,
}

/// Wire shape of a record submitted to the remote store
#[derive(Debug, Clone, Serialize)]
pub struct SubmitPayload<'a> {
    #[serde(rename = "detectedAtUtc")]
    pub detected_at_utc: String,
    #[serde(flatten)]
    pub readings: &'a Readings,
}

impl Record {
    pub fn new(hour: HourBucket, readings: Readings) -> Self {
        Self { hour, readings }
    }

    /// Dedup key: `YYYY-MM-DDTHH:MM:SSZ`
    pub fn normalized_timestamp(&self) -> String {
        self.hour.normalized_utc()
    }

    pub fn payload(&self) -> SubmitPayload<'_> {
        SubmitPayload {
            detected_at_utc: self.hour.detected_at_utc(),
            readings: &self.readings,
        }
    }

    /// Validate a hand-prepared JSON record
    ///
    /// Every required key must be present. Values may be numbers or `null`; blank strings
    /// and any other shape are rejected. The timestamp must already sit on an hour boundary.
    pub fn from_json(value: &Value) -> SyncResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::Validation("record must be a JSON object".to_string()))?;

        let missing: Vec<&str> = std::iter::once(DETECTED_AT_KEY)
            .chain(Pollutant::ALL.iter().map(|p| p.remote_key()))
            .filter(|k| !object.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::Validation(format!("Missing keys: {}", missing.join(", "))));
        }

        let blank: Vec<&str> = std::iter::once(DETECTED_AT_KEY)
            .chain(Pollutant::ALL.iter().map(|p| p.remote_key()))
            .filter(|k| matches!(object.get(*k), Some(Value::String(s)) if s.trim().is_empty()))
            .collect();
        if !blank.is_empty() {
            return Err(SyncError::Validation(format!(
                "Blank string not allowed in fields: {}",
                blank.join(", ")
            )));
        }

        let detected = object
            .get(DETECTED_AT_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation(format!("{} must be a string", DETECTED_AT_KEY)))?;
        let instant = parse_iso_utc(detected)
            .map_err(|e| SyncError::Validation(format!("{}: {}", DETECTED_AT_KEY, e)))?;
        let hour = HourBucket::floor_utc(instant);
        if hour.to_utc() != instant {
            return Err(SyncError::Validation(format!(
                "{} is not on an hour boundary: {}",
                DETECTED_AT_KEY, detected
            )));
        }

        let mut readings = Readings::default();
        for pollutant in Pollutant::ALL {
            let key = pollutant.remote_key();
            let parsed = match object.get(key) {
                Some(Value::Null) | None => None,
                Some(Value::Number(n)) => n.as_f64(),
                Some(other) => {
                    return Err(SyncError::Validation(format!(
                        "{} must be a number or null, got {}",
                        key, other
                    )))
                }
            };
            readings.set(pollutant, parsed);
        }

        Ok(Self::new(hour, readings))
    }
}

/// One element of the upstream source's JSON array
///
/// Values arrive as strings or numbers; [`RawSourceRow::value`] converts them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSourceRow {
    #[serde(rename = "日期時間", default)]
    pub observed_at: Option<String>,
    #[serde(rename = "PM25", default)]
    pub pm25: Option<Value>,
    #[serde(rename = "NMHC", default)]
    pub nmhc: Option<Value>,
    #[serde(rename = "THC", default)]
    pub thc: Option<Value>,
    #[serde(rename = "CH4", default)]
    pub ch4: Option<Value>,
    #[serde(rename = "SO2", default)]
    pub so2: Option<Value>,
    #[serde(rename = "O3", default)]
    pub o3: Option<Value>,
    #[serde(rename = "NOX", default)]
    pub nox: Option<Value>,
    #[serde(rename = "NO", default)]
    pub no: Option<Value>,
    #[serde(rename = "CO", default)]
    pub co: Option<Value>,
    #[serde(rename = "CO2", default)]
    pub co2: Option<Value>,
}

impl RawSourceRow {
    fn raw(&self, pollutant: Pollutant) -> Option<&Value> {
        match pollutant {
            Pollutant::Pm25 => self.pm25.as_ref(),
            Pollutant::Nmhc => self.nmhc.as_ref(),
            Pollutant::Thc => self.thc.as_ref(),
            Pollutant::Ch4 => self.ch4.as_ref(),
            Pollutant::So2 => self.so2.as_ref(),
            Pollutant::O3 => self.o3.as_ref(),
            Pollutant::Nox => self.nox.as_ref(),
            Pollutant::No => self.no.as_ref(),
            Pollutant::Co => self.co.as_ref(),
            Pollutant::Co2 => self.co2.as_ref(),
        }
    }

    /// Numeric value of a pollutant, or `None` for blank / `na` / `nan` / `null` / `none` /
    /// unparsable input
    pub fn value(&self, pollutant: Pollutant) -> Option<f64> {
        let parsed = match self.raw(pollutant)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() || matches!(s.to_ascii_lowercase().as_str(), "na" | "nan" | "null" | "none")
                {
                    None
                } else {
                    s.parse::<f64>().ok()
                }
            }
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }

    /// All ten values converted; quality rules are not applied here
    pub fn readings(&self) -> Readings {
        let mut readings = Readings::default();
        for pollutant in Pollutant::ALL {
            readings.set(pollutant, self.value(pollutant));
        }
        readings
    }
}
