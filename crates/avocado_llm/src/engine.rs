//! The boundary to the native inference runtime.
//!
//! The numeric side of inference — weight loading, the forward pass, KV-cache storage,
//! detokenization tables — is provided by a native library and treated as a black box.
//! This module defines the two traits that box it in: [`EngineBackend`] creates a decode
//! context from a GGUF file on disk, and [`InferenceEngine`] is the per-context handle
//! the [`crate::InferenceSession`] drives.
//!
//! Everything an engine returns is plain data (token ids, logits, byte pieces), so the
//! rest of the crate contains no `unsafe` and no FFI types.

use std::path::{Path, PathBuf};

use derive_more::{Deref, DerefMut};
use thiserror::Error;

use crate::batch::TokenBatch;
use crate::session::SessionParams;
use crate::Token;

/// An error that occurred inside the native runtime.
///
/// Native libraries typically log useful information before failing; those logs are
/// forwarded to this crate's [`tracing`] handler by the backend implementation.
///
/// [tracing]: https://docs.rs/tracing/latest/tracing/
#[derive(Error, Debug)]
pub enum EngineError {
    /// Converting input text into tokens failed.
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    /// A single forward pass over a batch failed.
    #[error("decode failed (status {0})")]
    Decode(i32),

    /// An internal assertion failed in the native runtime; check `tracing` output.
    #[error("internal runtime failure: {0}")]
    Internal(String),
}

/// An error raised while loading a model.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    /// The given path couldn't be loaded because it doesn't exist on the filesystem.
    #[error("Path does not exist: {0}")]
    DoesNotExist(PathBuf),

    /// The native runtime rejected the file or could not allocate a context for it.
    #[error("The backend couldn't load the provided model: {0}")]
    Backend(#[from] EngineError),
}

/// The logits produced for one batch position: one score per vocabulary entry.
#[derive(Clone, Debug, Deref, DerefMut)]
pub struct Logits(pub Vec<f32>);

/// Parameters controlling how model weights are loaded.
#[derive(Clone, Debug)]
pub struct ModelParams {
    /// Number of layers to offload to the GPU.
    ///
    /// If this number is bigger than the amount of model layers, all layers are offloaded.
    pub n_gpu_layers: u32,

    /// Use mmap if possible.
    pub use_mmap: bool,

    /// Force the system to keep the model in RAM.
    pub use_mlock: bool,

    /// Only load the vocabulary, no weights.
    pub vocab_only: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: u32::MAX,
            use_mmap: true,
            use_mlock: false,
            vocab_only: false,
        }
    }
}

impl ModelParams {
    /// Parameters for simulated or emulated hardware, where GPU offload produces
    /// incorrect results and must be forced off.
    pub fn emulated() -> Self {
        Self {
            n_gpu_layers: 0,
            ..Self::default()
        }
    }
}

/// A loaded model plus one allocated decode context, as exposed by the native runtime.
///
/// A session calls these in a strict sequence: `tokenize`, one prefill [`decode`][d],
/// then alternating [`logits`][l]/`decode` for each generated token. Implementations
/// may assume calls are serialized; the owning [`crate::InferenceSession`] guarantees it.
///
/// [d]: InferenceEngine::decode
/// [l]: InferenceEngine::logits
pub trait InferenceEngine: Send {
    /// Converts `text` into a vector of tokens that are valid input for this model,
    /// optionally prepending the beginning-of-sequence marker.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EngineError>;

    /// Runs one forward pass over `batch`, extending the KV cache at the batch's
    /// positions. Logits afterwards correspond to the last position flagged in `batch`.
    fn decode(&mut self, batch: &TokenBatch) -> Result<(), EngineError>;

    /// The logits produced by the most recent successful [`decode`][InferenceEngine::decode].
    fn logits(&self) -> Logits;

    /// The byte-string representation of `token` in this model's vocabulary.
    ///
    /// The returned bytes typically encode UTF-8 text but may end mid code point;
    /// see [`crate::session::TokenDecoder`].
    fn token_bytes(&self, token: Token) -> Vec<u8>;

    /// The size of this model's vocabulary, in tokens.
    fn vocab_size(&self) -> usize;

    /// The beginning-of-sequence (BOS) token for this model.
    fn bos_token(&self) -> Token;

    /// The end-of-sequence (EOS) token for this model.
    fn eos_token(&self) -> Token;

    /// The newline token for this model.
    fn nl_token(&self) -> Token;

    /// Whether `token` ends generation for this model (EOS or an equivalent
    /// end-of-turn marker).
    fn is_end_of_generation(&self, token: Token) -> bool;

    /// Clears the KV cache without releasing the context, so the same loaded model can
    /// serve an unrelated prompt.
    fn clear_cache(&mut self);
}

/// A factory for [`InferenceEngine`]s: the native runtime's model-loading entry point.
pub trait EngineBackend {
    /// Loads model weights from `path` and allocates a decode context sized by
    /// `session_params`.
    ///
    /// Fails if the file is missing or corrupt, or if the context cannot be allocated.
    fn load(
        &self,
        path: &Path,
        model_params: &ModelParams,
        session_params: &SessionParams,
    ) -> Result<Box<dyn InferenceEngine>, ModelLoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulated_params_disable_gpu_offload() {
        let params = ModelParams::emulated();
        assert_eq!(params.n_gpu_layers, 0);
        assert!(params.use_mmap);
    }
}
