use std::io::Read;

use csv::ReaderBuilder;
use serde_json::{Map, Value};

use super::{Properties, SourceError};
use crate::processor::Submitter;

/// Produce one event per CSV record, with the header row mapped onto
/// the record's fields as the event body.
pub(super) fn produce<R: Read>(
    reader: R,
    properties: &Properties,
    submitter: &Submitter,
) -> Result<u64, SourceError> {
    let mut reader = ReaderBuilder::new().from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut produced = 0u64;
    for result in reader.records() {
        let record = result?;

        let mut body = Map::with_capacity(record.len());
        for (name, field) in headers.iter().zip(record.iter()) {
            body.insert(name.to_string(), Value::String(field.to_string()));
        }

        if submitter
            .blocking_submit(properties.event(Value::Object(body)))
            .is_err()
        {
            debug!(message = "pipeline closed, stopping csv producer", produced);

            return Ok(produced);
        }

        produced += 1;
    }

    debug!(message = "csv input exhausted", produced);

    Ok(produced)
}
