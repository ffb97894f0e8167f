use tracing::info;

use crate::domain::ReadRecord;
use crate::error::KiraError;

/// Builds the processing queue: every forward read, then every reverse read,
/// each in file order. With a checkpoint, everything up to and including the
/// checkpointed header is dropped.
pub fn work_queue(
    forward: Vec<ReadRecord>,
    reverse: Vec<ReadRecord>,
    checkpoint: Option<&str>,
) -> Result<Vec<ReadRecord>, KiraError> {
    let mut queue = forward;
    queue.extend(reverse);

    let Some(last_done) = checkpoint else {
        return Ok(queue);
    };

    let position = queue
        .iter()
        .position(|read| read.header == last_done)
        .ok_or_else(|| KiraError::Resume(last_done.to_string()))?;
    let remainder = queue.split_off(position + 1);
    match remainder.first() {
        Some(next) => info!(
            checkpoint = last_done,
            next = %next.header,
            skipped = queue.len(),
            "resuming after checkpoint"
        ),
        None => info!(checkpoint = last_done, "checkpoint is at the last read; nothing left"),
    }
    Ok(remainder)
}
