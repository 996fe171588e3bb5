//! The chat-level completion service.
//!
//! [`CompletionService`] owns at most one loaded model at a time and turns whole
//! conversations into streamed completions: it renders the message list through the
//! model's [`ChatTemplate`], submits the prompt, and drives the generation loop on a
//! worker thread.

use std::path::Path;
use std::thread;

use thiserror::Error;
use tracing::{error, info};

use crate::catalog::ModelSpec;
use crate::engine::{EngineBackend, ModelLoadError, ModelParams};
use crate::message::ChatMessage;
use crate::session::{ContextError, FragmentHandle, InferenceSession, SessionParams};
use crate::template::ChatTemplate;

/// An error raised by [`CompletionService`].
#[derive(Error, Debug)]
pub enum CompletionError {
    /// A completion was requested before any model was loaded.
    #[error("no model is loaded")]
    NoModelLoaded,

    /// Loading model weights or allocating the context failed.
    #[error("failed to load model: {0}")]
    Load(#[from] ModelLoadError),

    /// Feeding the rendered prompt into the context failed.
    #[error("failed to start completion: {0}")]
    Context(#[from] ContextError),
}

/// Runs chat completions against the currently loaded model.
///
/// Only one model is resident at a time; [`load_model`][CompletionService::load_model]
/// releases the previous context before acquiring the next so peak memory never holds
/// two models.
pub struct CompletionService {
    session: Option<InferenceSession>,
    template: Option<ChatTemplate>,
}

impl CompletionService {
    /// A service with no model loaded.
    pub fn new() -> Self {
        Self {
            session: None,
            template: None,
        }
    }

    /// Loads the model described by `spec` from `path`, replacing any previous one.
    ///
    /// Any completion running on the previous model is cancelled and its context
    /// released before the new weights are read.
    pub fn load_model(
        &mut self,
        backend: &dyn EngineBackend,
        spec: &ModelSpec,
        path: impl AsRef<Path>,
        model_params: ModelParams,
        session_params: SessionParams,
    ) -> Result<(), CompletionError> {
        // Release before acquire: two contexts must never be resident at once.
        if let Some(previous) = self.session.take() {
            previous.mark_done();
            previous.unload();
        }
        self.template = None;

        let session =
            InferenceSession::create_context(backend, path, model_params, session_params)?;

        info!("Model \"{}\" ready for completions", spec.name);

        self.session = Some(session);
        self.template = Some(spec.template);

        Ok(())
    }

    /// Whether a model is currently loaded.
    pub fn has_model(&self) -> bool {
        self.session.is_some()
    }

    /// Renders `messages` through the loaded model's template and streams the reply
    /// through callbacks.
    ///
    /// `result_handler` receives each non-empty fragment in order on a worker thread;
    /// `on_complete` runs exactly once when generation ends, whether it finished
    /// naturally, was cancelled, or failed mid-stream. Neither callback is invoked when
    /// this function returns an error.
    pub fn chat_completion(
        &self,
        messages: &[ChatMessage],
        mut result_handler: impl FnMut(String) + Send + 'static,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<(), CompletionError> {
        let (session, prompt) = self.prepare(messages)?;

        thread::spawn(move || {
            if let Err(e) = session.completion_init(&prompt) {
                error!("Failed to submit prompt: {e}");
                on_complete();
                return;
            }

            while !session.is_done() {
                match session.completion_step() {
                    Ok(fragment) => {
                        if !fragment.is_empty() {
                            result_handler(fragment);
                        }
                    }
                    Err(e) => {
                        error!("Completion failed: {e}");
                        break;
                    }
                }
            }

            on_complete();
        });

        Ok(())
    }

    /// Renders `messages` and streams the reply through a [`FragmentHandle`].
    ///
    /// The prompt prefill also runs on the worker, so this returns immediately; drop
    /// the handle (or call [`FragmentHandle::stop`]) to cancel.
    pub fn start_chat_completion(
        &self,
        messages: &[ChatMessage],
    ) -> Result<FragmentHandle, CompletionError> {
        let (session, prompt) = self.prepare(messages)?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = FragmentHandle::new(rx, session.clone());

        thread::spawn(move || {
            if let Err(e) = session.completion_init(&prompt) {
                error!("Failed to submit prompt: {e}");
                return;
            }

            while !session.is_done() {
                match session.completion_step() {
                    Ok(fragment) => {
                        if !fragment.is_empty() && tx.send(fragment).is_err() {
                            session.mark_done();
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Completion failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(handle)
    }

    /// Cancels the completion currently running, if any.
    pub fn stop_completion(&self) {
        if let Some(session) = &self.session {
            session.mark_done();
        }
    }

    /// Cancels any running completion and releases the loaded model.
    pub fn unload_model(&mut self) {
        if let Some(session) = self.session.take() {
            session.mark_done();
            session.unload();
        }
        self.template = None;
    }

    fn prepare(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(InferenceSession, String), CompletionError> {
        let session = self
            .session
            .as_ref()
            .ok_or(CompletionError::NoModelLoaded)?
            .clone();
        let template = self.template.ok_or(CompletionError::NoModelLoaded)?;

        Ok((session, template.render(messages)))
    }
}

impl Default for CompletionService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_without_a_model_is_a_typed_error() {
        let service = CompletionService::new();
        let messages = [ChatMessage::user("hi")];

        let err = service
            .chat_completion(&messages, |_| {}, || {})
            .unwrap_err();
        assert!(matches!(err, CompletionError::NoModelLoaded));

        let err = service.start_chat_completion(&messages).unwrap_err();
        assert!(matches!(err, CompletionError::NoModelLoaded));

        assert!(!service.has_model());
    }
}
