//! Chat prompt rendering for the supported model families.

use std::fmt::Write;

use crate::message::ChatMessage;

/// Renders a conversation into the control-token format a model family was trained on.
///
/// Rendering is a pure function of the message list: roles and contents are
/// interpolated verbatim with no trimming, escaping, or reordering, and the result
/// always ends with the family's assistant-turn opener so the model continues as the
/// assistant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatTemplate {
    /// Llama 3 instruct format (`<|start_header_id|>` headers).
    Llama3,

    /// Gemma format (`<start_of_turn>` markers; the assistant role is spelled `model`).
    Gemma,

    /// ChatML (`<|im_start|>` markers), used by Qwen among others.
    ChatMl,

    /// IBM Granite format (`<|start_of_role|>` markers).
    Granite,
}

impl ChatTemplate {
    /// Renders `messages` into a single prompt string.
    pub fn render(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();

        for message in messages {
            let role = message.role;
            let content = &message.content;

            // Infallible writes into a String.
            let _ = match self {
                ChatTemplate::Llama3 => write!(
                    prompt,
                    "<|start_header_id|>{role}<|end_header_id|>{content}<|eot_id|>"
                ),
                ChatTemplate::Gemma => write!(
                    prompt,
                    "<start_of_turn>{role}\n{content}\n<end_of_turn>"
                ),
                ChatTemplate::ChatMl => write!(
                    prompt,
                    "<|im_start|>{role}\n{content}<|im_end|>"
                ),
                ChatTemplate::Granite => write!(
                    prompt,
                    "<|start_of_role|>{role}<|end_of_role|>{content}<|end_of_text|>"
                ),
            };
        }

        prompt.push_str(match self {
            ChatTemplate::Llama3 => "<|start_header_id|>assistant<|end_header_id|>\n",
            ChatTemplate::Gemma => "<start_of_turn>model\n",
            ChatTemplate::ChatMl => "<|im_start|>assistant\n",
            ChatTemplate::Granite => "<|start_of_role|>assistant<|end_of_role|>",
        });

        prompt
    }
}
