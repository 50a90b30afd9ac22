mod csv;
mod json;

use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::Event;
use crate::processor::Submitter;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read csv record: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("failed to decode json event: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Metadata stamped on every produced event.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Properties {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sourcetype: Option<String>,
}

impl Properties {
    pub fn event(&self, body: Value) -> Event {
        Event::new(body)
            .with_host(self.host.clone())
            .with_source(self.source.clone())
            .with_sourcetype(self.sourcetype.clone())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Csv,
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "csv" => Ok(Format::Csv),
            "json" => Ok(Format::Json),
            _ => Err(format!("unknown format {text:?}, expected csv or json")),
        }
    }
}

/// Decode events from `reader` and feed them into the pipeline.
///
/// Blocking, meant to run on a blocking thread; back-pressure from the
/// pipeline is felt here as a stalled submit. Stops early and without
/// error once the pipeline has closed. Returns the number of events
/// produced.
pub fn produce<R: Read>(
    format: Format,
    reader: R,
    properties: &Properties,
    submitter: &Submitter,
) -> Result<u64, SourceError> {
    match format {
        Format::Csv => csv::produce(reader, properties, submitter),
        Format::Json => json::produce(reader, properties, submitter),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn properties_stamp_metadata() {
        let properties = Properties {
            host: Some("web-01".into()),
            source: Some("/var/log/app.log".into()),
            sourcetype: None,
        };

        let event = properties.event(json!({ "k": "v" }));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["host"], "web-01");
        assert_eq!(value["source"], "/var/log/app.log");
        assert!(value.get("sourcetype").is_none());
    }

    #[test]
    fn format_from_str() {
        assert_eq!("csv".parse::<Format>().unwrap(), Format::Csv);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!("yaml".parse::<Format>().is_err());
    }
}
