//! InfluxDB line protocol output formatter.

use crate::event::MatchEvent;
use crate::output::EventFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// Escape commas, equals signs and spaces in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        // empty tag values are not allowed by the protocol
        if value.is_empty() {
            continue;
        }
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape_tag(key), value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(time) = data_point.timestamp {
        // Pre-epoch timestamps are written without a timestamp so the server assigns one.
        if let Ok(since_epoch) = time.duration_since(SystemTime::UNIX_EPOCH) {
            write!(fmt, " {}", since_epoch.as_nanos())?;
        }
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape_measurement(&self.measurement))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

/// InfluxDB line protocol formatter.
///
/// Tags identify the beacon and campaign (`address`, `campaign`, `campaign_id`,
/// `uuid`); fields carry the signal data (`rssi`, and `distance` when known) and
/// the campaign `website` when it has one.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Create a new InfluxDB formatter.
    ///
    /// # Arguments
    /// * `measurement_name` - The measurement name to use in the line protocol
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, event: &MatchEvent) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("address".to_string(), event.address.clone());
        tags.insert("campaign".to_string(), event.campaign.name.clone());
        tags.insert("campaign_id".to_string(), event.campaign.id.clone());
        tags.insert("uuid".to_string(), event.identifier.to_string());
        tags
    }

    fn field_set(&self, event: &MatchEvent) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("rssi".into(), FieldValue::Integer(i64::from(event.rssi)));
        if let Some(distance) = event.distance {
            fields.insert("distance".into(), FieldValue::Float(distance));
        }
        if !event.campaign.website.is_empty() {
            fields.insert(
                "website".into(),
                FieldValue::String(event.campaign.website.clone()),
            );
        }
        fields
    }

    fn to_data_point(&self, event: &MatchEvent) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(event),
            field_set: self.field_set(event),
            timestamp: Some(event.timestamp),
        }
    }
}

impl EventFormatter for InfluxDbFormatter {
    fn format(&self, event: &MatchEvent) -> String {
        format!("{}", self.to_data_point(event))
    }
}
