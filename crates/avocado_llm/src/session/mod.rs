//! Functionality for the [`InferenceSession`] struct

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, trace, warn};

use crate::batch::TokenBatch;
use crate::engine::{EngineBackend, EngineError, InferenceEngine, ModelLoadError, ModelParams};
use crate::standard_sampler::{Sampler, StandardSampler, TokenData};
use crate::Token;

mod completion;
mod params;
mod token_decoder;

pub use completion::FragmentHandle;
pub use params::*;
pub use token_decoder::TokenDecoder;

/// How many decode calls may fail back to back before the session gives up.
///
/// A single failed forward pass is recovered by emitting an empty fragment and retrying
/// on the next step; repeated failures indicate the context is wedged and must surface
/// as a terminal error instead of stalling the caller forever.
pub(crate) const MAX_DECODE_FAILURES: u32 = 3;

/// An error raised while feeding or stepping an [`InferenceSession`].
#[derive(Error, Debug)]
pub enum ContextError {
    /// Converting the prompt into tokens failed inside the engine.
    #[error("tokenization failed: {0}")]
    TokenizationFailed(EngineError),

    /// The tokenized prompt leaves no room in the context to generate anything.
    ///
    /// Callers should truncate the conversation or warn the user; proceeding would
    /// overrun the fixed-size batch.
    #[error("prompt is {token_count} tokens but the context only holds {capacity}")]
    PromptTooLong {
        /// Number of tokens the prompt produced.
        token_count: usize,

        /// The session's configured context capacity.
        capacity: usize,
    },

    /// The engine's forward pass failed repeatedly and the session was marked done.
    #[error("decoding failed {failures} consecutive time(s): {source}")]
    DecodeFailed {
        /// How many decode calls failed in a row.
        failures: u32,

        /// The last engine error.
        source: EngineError,
    },

    /// [`InferenceSession::completion_step`] was called before any prompt was submitted.
    #[error("no prompt has been submitted to this session")]
    NoPrompt,
}

/// A text-generation session over one loaded model context.
///
/// All decode state (batch, KV-cache cursor, pending UTF-8 bytes) sits behind a single
/// mutex, making every native call sequential no matter how many clones of the handle
/// exist; a separate atomic flag carries cooperative cancellation so [`mark_done`][m]
/// never waits on an in-flight decode.
///
/// Cloning is cheap and shares the underlying context. The native context is released
/// once the last clone drops.
///
/// [m]: InferenceSession::mark_done
#[derive(Clone)]
pub struct InferenceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    /// All mutable decode state; one lock holder at a time is the whole concurrency
    /// story of this type.
    state: Mutex<SessionState>,

    /// Set on natural end of generation or cancellation; readable without the lock.
    done: AtomicBool,

    /// The parameters this session was created with.
    params: SessionParams,
}

struct SessionState {
    engine: Box<dyn InferenceEngine>,
    batch: TokenBatch,
    sampler: Box<dyn Sampler + Send>,
    decoder: TokenDecoder,

    /// Prompt plus generated tokens, in order; also the penalty lookback source.
    tokens: Vec<Token>,

    /// Next write position in the context. Never exceeds `params.n_ctx`.
    n_cur: usize,

    /// Number of single-token decode steps taken for the current prompt.
    n_decode: usize,

    decode_failures: u32,
}

impl SessionState {
    fn reset(&mut self) {
        self.tokens.clear();
        self.decoder.clear();
        self.batch.clear();
        self.engine.clear_cache();
        self.n_cur = 0;
        self.n_decode = 0;
        self.decode_failures = 0;
    }
}

impl InferenceSession {
    /// Loads model weights from `path` through `backend` and allocates a fresh decode
    /// context for them.
    ///
    /// When switching models, drop (or [`unload`][InferenceSession::unload]) the old
    /// session *before* calling this: contexts for multi-billion-parameter models are
    /// large, and two must never be resident at once.
    pub fn create_context(
        backend: &dyn EngineBackend,
        path: impl AsRef<Path>,
        model_params: ModelParams,
        params: SessionParams,
    ) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ModelLoadError::DoesNotExist(path.into()));
        }

        info!("Loading model \"{}\"", path.to_string_lossy());

        let engine = backend.load(path, &model_params, &params)?;
        let batch = TokenBatch::new(params.n_batch as usize);

        Ok(Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    engine,
                    batch,
                    sampler: Box::new(StandardSampler::default()),
                    decoder: TokenDecoder::new(),
                    tokens: Vec::new(),
                    n_cur: 0,
                    n_decode: 0,
                    decode_failures: 0,
                }),
                done: AtomicBool::new(false),
                params,
            }),
        })
    }

    /// Replaces the sampler used for subsequent steps.
    pub fn set_sampler(&self, sampler: impl Sampler + Send + 'static) {
        self.inner.state.lock().unwrap().sampler = Box::new(sampler);
    }

    /// Tokenizes `prompt` and runs the prefill decode, leaving the session ready for
    /// repeated [`completion_step`][InferenceSession::completion_step] calls.
    ///
    /// This resets any previous completion on the same context. The whole prompt is
    /// submitted as one batch with only the final position flagged to produce sampling
    /// logits; this is the expensive step and should run off the UI thread.
    pub fn completion_init(&self, prompt: &str) -> Result<(), ContextError> {
        let mut guard = self.inner.state.lock().unwrap();
        let state = &mut *guard;

        state.reset();
        self.inner.done.store(false, Ordering::SeqCst);

        trace!("Tokenizing prompt");
        let tokens = state
            .engine
            .tokenize(prompt, true)
            .map_err(ContextError::TokenizationFailed)?;

        if tokens.is_empty() {
            return Err(ContextError::NoPrompt);
        }

        let n_ctx = self.inner.params.n_ctx as usize;
        let n_batch = self.inner.params.n_batch as usize;

        // The prompt must fit a single prefill batch and still leave at least one
        // position to generate into.
        if tokens.len() >= n_ctx || tokens.len() > n_batch {
            let capacity = n_ctx.min(n_batch);
            warn!(
                "Prompt of {} tokens exceeds the session's capacity of {capacity}",
                tokens.len()
            );
            return Err(ContextError::PromptTooLong {
                token_count: tokens.len(),
                capacity,
            });
        }

        info!("Submitting a prompt of {} tokens", tokens.len());

        state.batch.clear();
        for (i, token) in tokens.iter().enumerate() {
            state.batch.add(*token, i, false);
        }
        state.batch.set_logits(tokens.len() - 1, true);

        state.engine.decode(&state.batch).map_err(|e| {
            error!("Prompt decode failed: {e}");
            ContextError::DecodeFailed {
                failures: 1,
                source: e,
            }
        })?;

        state.n_cur = tokens.len();
        state.tokens = tokens;

        Ok(())
    }

    /// Samples one token, decodes it into text, and advances the context by one
    /// position.
    ///
    /// The returned fragment is always complete UTF-8 and may be empty: either the
    /// token's bytes end mid code point (a later step emits them), or the step hit
    /// end of generation, or a single decode failure was absorbed. Check
    /// [`is_done`][InferenceSession::is_done] after each call.
    pub fn completion_step(&self) -> Result<String, ContextError> {
        if self.is_done() {
            // Cancelled (or already finished): drop any half-decoded bytes.
            self.inner.state.lock().unwrap().decoder.clear();
            return Ok(String::new());
        }

        let mut guard = self.inner.state.lock().unwrap();
        let state = &mut *guard;

        if state.tokens.is_empty() {
            return Err(ContextError::NoPrompt);
        }

        let logits = state.engine.logits();
        let candidates: Vec<TokenData> = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| TokenData {
                id: id as i32,
                logit,
                p: 0.0,
            })
            .collect();

        let nl_token = state.engine.nl_token();
        let token = state.sampler.sample(candidates, &state.tokens, nl_token);

        let n_ctx = self.inner.params.n_ctx as usize;
        if state.engine.is_end_of_generation(token) || state.n_cur >= n_ctx {
            info!("Generation complete after {} decoded tokens", state.n_decode);
            self.inner.done.store(true, Ordering::SeqCst);
            return Ok(state.decoder.flush().unwrap_or_default());
        }

        let piece = state.engine.token_bytes(token);
        let fragment = state.decoder.add_token(&piece);

        state.batch.clear();
        state.batch.add(token, state.n_cur, true);
        state.tokens.push(token);
        state.n_cur += 1;
        state.n_decode += 1;

        match state.engine.decode(&state.batch) {
            Ok(()) => state.decode_failures = 0,
            Err(e) => {
                state.decode_failures += 1;
                error!("Failed to decode context: {e}");

                if state.decode_failures >= MAX_DECODE_FAILURES {
                    self.inner.done.store(true, Ordering::SeqCst);
                    return Err(ContextError::DecodeFailed {
                        failures: state.decode_failures,
                        source: e,
                    });
                }
            }
        }

        Ok(fragment)
    }

    /// Whether generation has ended, naturally or by cancellation.
    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    /// Cooperatively cancels the current completion.
    ///
    /// The generation loop observes the flag at the top of its next step, so callers
    /// must tolerate up to one further decode before it takes effect. Pending partial
    /// bytes are discarded as soon as the state lock is free.
    pub fn mark_done(&self) {
        self.inner.done.store(true, Ordering::SeqCst);

        if let Ok(mut state) = self.inner.state.try_lock() {
            state.decoder.clear();
        }
    }

    /// Drops the running token list, the pending byte buffer, and the engine's KV
    /// cache, without releasing the model or context. Used between independent prompts
    /// on the same loaded model.
    pub fn clear(&self) {
        self.inner.state.lock().unwrap().reset();
    }

    /// Releases this handle to the native context.
    ///
    /// The context itself is freed once the last clone drops; call this on the previous
    /// session *before* creating a new one when switching models.
    pub fn unload(self) {
        drop(self);
    }

    /// Starts a generation worker feeding decoded fragments through the returned
    /// handle.
    ///
    /// [`completion_init`][InferenceSession::completion_init] must have succeeded
    /// first. Dropping the handle stops the worker after at most one further step.
    pub fn start_completing(&self) -> FragmentHandle {
        let (tx, rx) = unbounded_channel();
        let session = self.clone();

        info!(
            "Generating completions with {} tokens of history",
            self.context_size()
        );

        thread::spawn(move || {
            while !session.is_done() {
                match session.completion_step() {
                    Ok(fragment) => {
                        if !fragment.is_empty() && tx.send(fragment).is_err() {
                            warn!("Completion handle dropped, stopping generation");
                            session.mark_done();
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Completion step failed: {e}");
                        break;
                    }
                }
            }
        });

        FragmentHandle::new(rx, self.clone())
    }

    /// Returns the parameters this session was created with.
    pub fn params(&self) -> &SessionParams {
        &self.inner.params
    }

    /// The number of tokens currently in this session's context.
    pub fn context_size(&self) -> usize {
        self.inner.state.lock().unwrap().tokens.len()
    }
}

impl fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceSession")
            .field("params", &self.inner.params)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
