/*!
 * Batch edits over an existing subtitle list.
 *
 * - `grouping`: batch slicing and request grouping of selected batches
 * - `executor`: fix-timestamps / retranslate / proofread requests with splice-back
 */

pub mod executor;
pub mod grouping;

pub use executor::{BatchExecutor, BatchMode, BatchOutcome, BatchRequest, BatchSettings};
pub use grouping::{batch_count, group_selected_batches};
