//! Implements [`SessionParams`], which configures a [`crate::InferenceSession`]

use std::cmp::min;

/// Context and batch capacity used for chat sessions, sized to cover long
/// conversations on-device.
pub const DEFAULT_CONTEXT_LENGTH: u32 = 10_240;

/// The largest number of worker threads a session will request from the engine.
pub const MAX_THREADS: u32 = 8;

/// Session-specific parameters.
#[derive(Clone, Debug)]
pub struct SessionParams {
    /// Text context capacity in tokens; also the hard upper bound on the cursor.
    pub n_ctx: u32,

    /// Prompt processing maximum batch size.
    pub n_batch: u32,

    /// Number of threads to use for generation.
    pub n_threads: u32,

    /// Number of threads to use for batch processing.
    pub n_threads_batch: u32,
}

impl Default for SessionParams {
    fn default() -> Self {
        let threads = min(num_cpus::get() as u32, MAX_THREADS).max(1);

        Self {
            n_ctx: DEFAULT_CONTEXT_LENGTH,
            n_batch: DEFAULT_CONTEXT_LENGTH,
            n_threads: threads,
            n_threads_batch: threads,
        }
    }
}
