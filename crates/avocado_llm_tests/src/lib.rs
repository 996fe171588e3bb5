//! Integration tests for [`avocado_llm`].
//!
//! The native runtime is stood in for by [`ScriptedEngine`], a deterministic
//! [`InferenceEngine`] that replays a fixed sequence of byte pieces: after every decode
//! its logits overwhelmingly favor the next scripted piece, then the end-of-sequence
//! token. This keeps the full service/session/sampler/decoder stack under test without
//! model weights.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use avocado_llm::engine::{
    EngineBackend, EngineError, InferenceEngine, Logits, ModelLoadError, ModelParams,
};
use avocado_llm::session::SessionParams;
use avocado_llm::{Token, TokenBatch};

/// Beginning-of-sequence token id used by [`ScriptedEngine`].
pub const BOS: Token = Token(1);

/// End-of-sequence token id used by [`ScriptedEngine`].
pub const EOS: Token = Token(2);

/// Newline token id used by [`ScriptedEngine`].
pub const NL: Token = Token(3);

/// First vocabulary id assigned to scripted pieces.
pub const PIECE_BASE: i32 = 8;

/// A deterministic engine that emits a scripted byte sequence and then stops.
pub struct ScriptedEngine {
    pieces: Vec<Vec<u8>>,
    step: usize,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InferenceEngine for ScriptedEngine {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        if add_bos {
            tokens.push(BOS);
        }
        // One opaque token per character; ids sit far outside the vocabulary so they
        // never collide with scripted candidates.
        tokens.extend(text.chars().map(|c| Token(10_000 + (c as i32 % 100))));
        Ok(tokens)
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<(), EngineError> {
        if batch.tokens() == 1 {
            let id = batch.token_ids()[0].0;
            if id >= PIECE_BASE && (id - PIECE_BASE) < self.pieces.len() as i32 {
                self.step = (id - PIECE_BASE) as usize + 1;
            }
        }
        Ok(())
    }

    fn logits(&self) -> Logits {
        let mut logits = vec![0.0; self.vocab_size()];
        if self.step < self.pieces.len() {
            logits[(PIECE_BASE as usize) + self.step] = 100.0;
        } else {
            logits[EOS.0 as usize] = 100.0;
        }
        Logits(logits)
    }

    fn token_bytes(&self, token: Token) -> Vec<u8> {
        let idx = token.0 - PIECE_BASE;
        if idx >= 0 && (idx as usize) < self.pieces.len() {
            self.pieces[idx as usize].clone()
        } else {
            Vec::new()
        }
    }

    fn vocab_size(&self) -> usize {
        PIECE_BASE as usize + self.pieces.len()
    }

    fn bos_token(&self) -> Token {
        BOS
    }

    fn eos_token(&self) -> Token {
        EOS
    }

    fn nl_token(&self) -> Token {
        NL
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token == EOS
    }

    fn clear_cache(&mut self) {
        self.step = 0;
    }
}

/// A backend handing out [`ScriptedEngine`]s and counting how many are alive, so tests
/// can assert that at most one context is ever resident.
pub struct ScriptedBackend {
    pieces: Vec<Vec<u8>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// A backend whose engines will generate `pieces` in order.
    pub fn new(pieces: &[&[u8]]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| p.to_vec()).collect(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many engines created by this backend are currently alive.
    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl EngineBackend for ScriptedBackend {
    fn load(
        &self,
        _path: &Path,
        _model_params: &ModelParams,
        _session_params: &SessionParams,
    ) -> Result<Box<dyn InferenceEngine>, ModelLoadError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            pieces: self.pieces.clone(),
            step: 0,
            live: Arc::clone(&self.live),
        }))
    }
}

/// Creates an empty stand-in GGUF file and returns its path.
pub fn model_file() -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "avocado-llm-integration-{}-{}.gguf",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::write(&path, b"stub").unwrap();
    path
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    use avocado_llm::{ChatMessage, CompletionError, CompletionService, ModelLoadError};
    use futures::StreamExt;

    use super::*;

    const PIECES: &[&[u8]] = &[b"Hello", b", ", b"world", b"!"];
    const REPLY: &str = "Hello, world!";

    fn loaded_service(backend: &ScriptedBackend) -> CompletionService {
        let spec = avocado_llm::catalog::find("gemma-2-2b-it-Q4_K_M").unwrap();
        let mut service = CompletionService::new();
        service
            .load_model(
                backend,
                spec,
                model_file(),
                ModelParams::default(),
                SessionParams::default(),
            )
            .unwrap();
        service
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("Hi"),
        ]
    }

    #[test]
    fn completion_without_a_loaded_model_is_rejected() {
        let service = CompletionService::new();

        let err = service
            .chat_completion(&conversation(), |_| {}, || {})
            .unwrap_err();

        assert!(matches!(err, CompletionError::NoModelLoaded));
    }

    #[test]
    fn loading_a_missing_file_fails_without_a_context() {
        let backend = ScriptedBackend::new(PIECES);
        let spec = avocado_llm::catalog::find("gemma-2-2b-it-Q4_K_M").unwrap();
        let mut service = CompletionService::new();

        let err = service
            .load_model(
                &backend,
                spec,
                "/definitely/not/a/model.gguf",
                ModelParams::default(),
                SessionParams::default(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            CompletionError::Load(ModelLoadError::DoesNotExist(_))
        ));
        assert!(!service.has_model());
        assert_eq!(backend.live_engines(), 0);
    }

    #[test]
    fn callbacks_deliver_the_whole_reply_and_complete_once() {
        let backend = ScriptedBackend::new(PIECES);
        let service = loaded_service(&backend);

        let collected = Arc::new(Mutex::new(String::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        let sink = Arc::clone(&collected);
        let counter = Arc::clone(&completions);
        service
            .chat_completion(
                &conversation(),
                move |fragment| sink.lock().unwrap().push_str(&fragment),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    done_tx.send(()).unwrap();
                },
            )
            .unwrap();

        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(collected.lock().unwrap().as_str(), REPLY);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_complete_fires_even_when_the_prompt_cannot_fit() {
        let backend = ScriptedBackend::new(PIECES);
        let spec = avocado_llm::catalog::find("gemma-2-2b-it-Q4_K_M").unwrap();
        let mut service = CompletionService::new();
        service
            .load_model(
                &backend,
                spec,
                model_file(),
                ModelParams::default(),
                // Far too small for any rendered conversation.
                SessionParams {
                    n_ctx: 4,
                    n_batch: 4,
                    ..SessionParams::default()
                },
            )
            .unwrap();

        let fragments = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        let counter = Arc::clone(&fragments);
        service
            .chat_completion(
                &conversation(),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                move || done_tx.send(()).unwrap(),
            )
            .unwrap();

        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(fragments.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancellation_still_completes_exactly_once() {
        let backend = ScriptedBackend::new(PIECES);
        let service = loaded_service(&backend);

        let completions = Arc::new(AtomicUsize::new(0));
        let (first_tx, first_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let counter = Arc::clone(&completions);
        service
            .chat_completion(
                &conversation(),
                move |_| {
                    // Only the first send succeeds; later fragments are ignored.
                    let _ = first_tx.send(());
                },
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    done_tx.send(()).unwrap();
                },
            )
            .unwrap();

        first_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        service.stop_completion();

        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_streams_the_same_reply_as_callbacks() {
        let backend = ScriptedBackend::new(PIECES);
        let service = loaded_service(&backend);

        let mut handle = service.start_chat_completion(&conversation()).unwrap();
        let mut streamed = String::new();
        while let Some(fragment) = handle.next_fragment() {
            streamed.push_str(&fragment);
        }

        assert_eq!(streamed, REPLY);
    }

    #[test]
    fn stopping_a_stream_ends_it_early() {
        let backend = ScriptedBackend::new(PIECES);
        let service = loaded_service(&backend);

        let mut handle = service.start_chat_completion(&conversation()).unwrap();
        let mut collected = String::new();

        collected.push_str(&handle.next_fragment().unwrap());
        handle.stop();

        // Fragments already in flight may still arrive, then the channel closes.
        while let Some(fragment) = handle.next_fragment() {
            collected.push_str(&fragment);
        }

        assert!(REPLY.starts_with(&collected));
    }

    #[test]
    fn switching_models_never_keeps_two_contexts_resident() {
        let backend = ScriptedBackend::new(PIECES);
        let spec = avocado_llm::catalog::find("gemma-2-2b-it-Q4_K_M").unwrap();
        let mut service = CompletionService::new();

        for _ in 0..3 {
            service
                .load_model(
                    &backend,
                    spec,
                    model_file(),
                    ModelParams::default(),
                    SessionParams::default(),
                )
                .unwrap();
            assert_eq!(backend.live_engines(), 1);
        }

        service.unload_model();
        assert_eq!(backend.live_engines(), 0);
        assert!(!service.has_model());
    }

    #[tokio::test]
    async fn handle_works_as_an_async_stream() {
        let backend = ScriptedBackend::new(PIECES);
        let service = loaded_service(&backend);

        let mut handle = service.start_chat_completion(&conversation()).unwrap();
        let mut streamed = String::new();

        // Fully qualified: the handle is also an `Iterator`, and a bare `.next()`
        // would be ambiguous with `StreamExt` in scope.
        while let Some(fragment) = StreamExt::next(&mut handle).await {
            streamed.push_str(&fragment);
        }

        assert_eq!(streamed, REPLY);
    }
}
