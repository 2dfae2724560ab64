use crate::types::error::BskyrmError;
use crate::types::{DeleteIntent, WorkUnit};

/// Group `intents` into units of at most `batch_size`, preserving order.
///
/// The last unit may be shorter. An empty intent list yields no units.
pub fn partition(
    intents: &[DeleteIntent],
    batch_size: usize,
) -> Result<Vec<WorkUnit>, BskyrmError> {
    if batch_size == 0 {
        return Err(BskyrmError::InvalidConfig(
            "Batch size must be at least 1.".to_string(),
        ));
    }

    Ok(intents
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| WorkUnit {
            index,
            intents: chunk.to_vec(),
        })
        .collect())
}
