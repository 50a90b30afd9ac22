use std::io::Read;

use serde_json::{Deserializer, Value};

use super::{Properties, SourceError};
use crate::processor::Submitter;

/// Produce one event per JSON value from a stream of concatenated or
/// whitespace-separated values.
pub(super) fn produce<R: Read>(
    reader: R,
    properties: &Properties,
    submitter: &Submitter,
) -> Result<u64, SourceError> {
    let stream = Deserializer::from_reader(reader).into_iter::<Value>();

    let mut produced = 0u64;
    for result in stream {
        let body = result?;

        if submitter.blocking_submit(properties.event(body)).is_err() {
            debug!(message = "pipeline closed, stopping json producer", produced);

            return Ok(produced);
        }

        produced += 1;
    }

    debug!(message = "json input exhausted", produced);

    Ok(produced)
}
