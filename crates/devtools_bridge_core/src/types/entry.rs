use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Debug, Level::Info, Level::Warn, Level::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact lowercase names only, matching how entries deserialize.
impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown log level '{s}'"))
    }
}

/// Timestamp exactly as the target emitted it: epoch millis or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryTimestamp {
    Numeric(serde_json::Number),
    Text(String),
}

impl EntryTimestamp {
    pub fn now() -> Self {
        Self::Text(Utc::now().to_rfc3339())
    }
}

/// One structured diagnostic event, in the shape the target writes after the marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: EntryTimestamp,
    pub level: Level,
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: Level, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: EntryTimestamp::now(),
            level,
            source: source.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A [`LogEntry`] plus the arrival metadata the collector assigns.
///
/// `seq` is the arrival index and is the authoritative ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedEntry {
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: LogEntry,
}

impl CapturedEntry {
    pub fn level(&self) -> Level {
        self.entry.level
    }

    pub fn source(&self) -> &str {
        &self.entry.source
    }
}

/// Verbatim record of one line from the feed, written only when raw capture is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLine {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_round_trips_through_str() {
        for level in Level::ALL {
            assert_eq!(level.as_str().parse::<Level>(), Ok(level));
        }
        assert!("fatal".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_text_and_serde_agree_on_case() {
        assert!("WARN".parse::<Level>().is_err());
        assert!(serde_json::from_value::<Level>(json!("WARN")).is_err());
        assert_eq!("warn".parse::<Level>(), Ok(Level::Warn));
        assert_eq!(serde_json::from_value::<Level>(json!("warn")).unwrap(), Level::Warn);
    }

    #[test]
    fn test_log_entry_accepts_numeric_and_text_timestamps() {
        let numeric: LogEntry = serde_json::from_value(json!({
            "timestamp": 1700000000123_u64,
            "level": "info",
            "source": "A",
            "message": "ready"
        }))
        .expect("numeric timestamp should parse");
        assert_eq!(
            numeric.timestamp,
            EntryTimestamp::Numeric(serde_json::Number::from(1700000000123_u64))
        );
        assert!(numeric.data.is_none());

        let text: LogEntry = serde_json::from_value(json!({
            "timestamp": "2024-05-01T10:00:00.000Z",
            "level": "error",
            "source": "B",
            "message": "boom",
            "data": {"code": 7}
        }))
        .expect("text timestamp should parse");
        assert_eq!(text.level, Level::Error);
        assert_eq!(text.data, Some(json!({"code": 7})));
    }

    #[test]
    fn test_log_entry_rejects_missing_fields_and_unknown_levels() {
        assert!(serde_json::from_value::<LogEntry>(json!({
            "timestamp": 1, "level": "info", "source": "A"
        }))
        .is_err());
        assert!(serde_json::from_value::<LogEntry>(json!({
            "timestamp": 1, "level": "fatal", "source": "A", "message": "m"
        }))
        .is_err());
    }

    #[test]
    fn test_captured_entry_serializes_flat_with_arrival_metadata() {
        let captured = CapturedEntry {
            seq: 3,
            received_at: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            entry: LogEntry {
                timestamp: EntryTimestamp::Text("t".into()),
                level: Level::Warn,
                source: "A".into(),
                message: "slow".into(),
                data: None,
            },
        };

        let value = serde_json::to_value(&captured).unwrap();
        assert_eq!(value["seq"], 3);
        assert_eq!(value["receivedAt"], "2024-05-01T10:00:00Z");
        assert_eq!(value["level"], "warn");
        assert_eq!(value["source"], "A");
        assert!(value.get("data").is_none());
    }
}
