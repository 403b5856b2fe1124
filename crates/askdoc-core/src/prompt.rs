//! Prompt assembly for the answering model.
//!
//! The prompt has four sections, always present and always in this order:
//! system instruction, context, chat history, question. An empty context or
//! history still produces its section header so the model can see that no
//! material was supplied.
//!
//! The history serialization (`"{role}: {content}"` lines) is part of the
//! model-facing contract. Changing it changes model behavior.

use crate::models::Turn;

/// Marker the model is instructed to emit when context does not answer the
/// question.
pub const UNKNOWN_ANSWER: &str = "I don't know.";

/// Default upper bound on answer length, in words.
pub const DEFAULT_MAX_ANSWER_WORDS: usize = 20;

/// Separator placed between context blocks.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Builds the single instruction block sent to the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAssembler {
    pub max_answer_words: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            max_answer_words: DEFAULT_MAX_ANSWER_WORDS,
        }
    }
}

impl PromptAssembler {
    pub fn new(max_answer_words: usize) -> Self {
        Self { max_answer_words }
    }

    /// The fixed system instruction section.
    pub fn instruction(&self) -> String {
        format!(
            "You are a helpful assistant.\n\
             Answer ONLY from the provided context and chat history.\n\
             If the question is not answerable from context, say \"{}\"\n\
             Keep answers concise (max {} words).",
            UNKNOWN_ANSWER, self.max_answer_words
        )
    }

    /// Assemble the prompt.
    ///
    /// `context_blocks` are joined with a blank line, in the order given.
    /// `history_text` is inserted verbatim and `question` is not altered.
    pub fn assemble<S: AsRef<str>>(
        &self,
        context_blocks: &[S],
        history_text: &str,
        question: &str,
    ) -> String {
        let context = context_blocks
            .iter()
            .map(|b| b.as_ref())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        format!(
            "{}\n\nContext:\n{}\n\nChat history:\n{}\n\nQuestion: {}",
            self.instruction(),
            context,
            history_text,
            question
        )
    }
}

/// Serialize history as `"{role}: {content}"` lines in insertion order.
pub fn render_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_appear_in_fixed_order() {
        let prompt = PromptAssembler::default().assemble(
            &["chunk one", "chunk two"],
            "user: hi\nassistant: hello",
            "What is in section 2?",
        );
        let instr = prompt.find("You are a helpful assistant.").unwrap();
        let ctx = prompt.find("Context:\n").unwrap();
        let hist = prompt.find("Chat history:\n").unwrap();
        let q = prompt.find("Question: What is in section 2?").unwrap();
        assert!(instr < ctx && ctx < hist && hist < q);
        assert!(prompt.contains("chunk one\n\nchunk two"));
        assert!(prompt.ends_with("Question: What is in section 2?"));
    }

    #[test]
    fn empty_sections_are_kept() {
        let empty: [&str; 0] = [];
        let prompt = PromptAssembler::default().assemble(&empty, "", "Why?");
        assert!(prompt.contains("Context:\n\n\nChat history:\n\n\nQuestion: Why?"));
    }

    #[test]
    fn instruction_carries_refusal_and_length_bound() {
        let prompt = PromptAssembler::new(35).assemble(&["c"], "", "q");
        assert!(prompt.contains(UNKNOWN_ANSWER));
        assert!(prompt.contains("max 35 words"));
    }

    #[test]
    fn deterministic() {
        let a = PromptAssembler::default();
        assert_eq!(a.assemble(&["x"], "h", "q"), a.assemble(&["x"], "h", "q"));
    }

    #[test]
    fn history_renders_role_lines() {
        let turns = vec![Turn::user("What?"), Turn::assistant("That.")];
        assert_eq!(render_history(&turns), "user: What?\nassistant: That.");
        assert_eq!(render_history(&[]), "");
    }
}
