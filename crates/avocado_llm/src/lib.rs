//! The inference core of an on-device chat assistant: a safe, predictable wrapper around a
//! native LLM runtime for consumer hardware.
//!
//! The native runtime (a llama.cpp-style library exposing context creation, tokenization,
//! batched decoding, and detokenization) is consumed strictly through the [`engine`]
//! traits; everything above that boundary lives here:
//!
//! * [`InferenceSession`] — owns one loaded model context and exposes a sequential,
//!   cancellable, token-by-token text-generation loop with UTF-8-safe detokenization.
//! * [`StandardSampler`] — the fixed candidate-filtering pipeline used to pick each
//!   next token from the model's logits.
//! * [`CompletionService`] — renders role-tagged [`ChatMessage`]s through a per-model
//!   [`template::ChatTemplate`] and streams decoded fragments back to the caller.
//! * [`catalog`] — the static model table with derived memory/CPU cost estimates.
//!
//! To get started, load a model through an [`engine::EngineBackend`] and drive a session:
//!
//! ```no_run
//! use avocado_llm::{CompletionService, ChatMessage};
//! use avocado_llm::engine::{EngineBackend, ModelParams};
//! use avocado_llm::session::SessionParams;
//!
//! fn run(backend: &dyn EngineBackend) -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = avocado_llm::catalog::find("gemma-2-2b-it-Q4_K_M").unwrap();
//!     let mut service = CompletionService::new();
//!     service.load_model(
//!         backend,
//!         spec,
//!         "/models/gemma-2-2b-it-Q4_K_M.gguf",
//!         ModelParams::default(),
//!         SessionParams::default(),
//!     )?;
//!
//!     let messages = vec![
//!         ChatMessage::system("You are helpful"),
//!         ChatMessage::user("Hi"),
//!     ];
//!
//!     let mut completion = service.start_chat_completion(&messages)?;
//!     while let Some(fragment) = completion.next_fragment() {
//!         print!("{fragment}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Fragments arrive in generation order and are always valid UTF-8; a token whose bytes
//! end mid code point is held back until a later token completes it.
//!
//! All diagnostics are routed through [`tracing`][tracing]. If you're getting stuck,
//! setting up a `tracing` subscriber should be at the top of your troubleshooting list.
//!
//! [tracing]: https://docs.rs/tracing/latest/tracing/

#![warn(missing_docs)]

mod batch;
pub mod catalog;
pub mod completion;
pub mod engine;
pub mod message;
pub mod session;
pub mod standard_sampler;
pub mod template;

pub use batch::TokenBatch;
pub use completion::{CompletionError, CompletionService};
pub use engine::{EngineError, ModelLoadError};
pub use message::{ChatMessage, Role};
pub use session::{ContextError, FragmentHandle, InferenceSession};
pub use standard_sampler::{Sampler, StandardSampler};

/// A single token produced or consumed by a model, without its associated context.
///
/// On its own this is just a vocabulary index; an [`engine::InferenceEngine`] is needed
/// to map it to (possibly partial) UTF-8 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Token(pub i32);
