//! Line channel to the ECU process

mod lines;
mod process;
mod traits;

pub use lines::{LossyLineCodec, DEFAULT_MAX_LINE_LENGTH};
pub use process::ProcessChannel;
pub use traits::{LineChannel, LineStream, MockChannel, StopOutcome};
