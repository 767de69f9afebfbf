use std::path::Path;
use std::sync::Arc;

use tracing::info;

use askdesk_core::config::AssistantConfig;
use askdesk_core::{KnowledgeChunk, Turn, TurnRole};
use askdesk_llm::{Message, Prompt};

use crate::error::PromptError;

/// Where retrieved context is spliced into the instruction template.
pub const CONTEXT_PLACEHOLDER: &str = "<<<context>>>";

const DEFAULT_TEMPLATE: &str = "\
You are the help desk assistant of the institution. Answer the user's question \
using only the reference excerpts below. Be brief and friendly, answer in the \
language of the question, and say so plainly when the excerpts do not contain \
the answer. Never invent dates, fees or contact details.

Reference excerpts:
<<<context>>>";

const NO_CONTEXT: &str =
    "(No reference excerpt matched this question. Tell the user you don't have that information \
and suggest contacting the help desk.)";

/// Assembles the bounded prompt: template + context, recent turns, question.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
    history_turns: usize,
}

impl PromptBuilder {
    pub fn new(template: impl Into<String>, history_turns: usize) -> Result<Self, PromptError> {
        let template = template.into();
        if !template.contains(CONTEXT_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder("(inline)".into()));
        }
        Ok(Self { template, history_turns })
    }

    pub fn with_default_template(history_turns: usize) -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            history_turns,
        }
    }

    /// Use the configured template file if any, otherwise the built-in one.
    pub fn from_config(cfg: &AssistantConfig) -> Result<Self, PromptError> {
        match &cfg.prompt_template_path {
            Some(path) => Self::from_file(path, cfg.prompt_history_turns),
            None => Ok(Self::with_default_template(cfg.prompt_history_turns)),
        }
    }

    pub fn from_file(path: &Path, history_turns: usize) -> Result<Self, PromptError> {
        let template = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if !template.contains(CONTEXT_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder(path.display().to_string()));
        }
        info!(path = %path.display(), "prompt template loaded");
        Ok(Self { template, history_turns })
    }

    pub fn build(&self, question: &str, history: &[Turn], context: &[Arc<KnowledgeChunk>]) -> Prompt {
        let rendered = if context.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            render_context(context)
        };

        let skip = history.len().saturating_sub(self.history_turns);
        let history = history[skip..]
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => Message::user(turn.content.clone()),
                TurnRole::Assistant => Message::assistant(turn.content.clone()),
            })
            .collect();

        Prompt {
            system: self.template.replace(CONTEXT_PLACEHOLDER, &rendered),
            history,
            question: question.to_string(),
        }
    }
}

fn render_context(context: &[Arc<KnowledgeChunk>]) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] ({}) {}", i + 1, chunk.source_doc, chunk.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn chunk(id: &str, doc: &str, text: &str) -> Arc<KnowledgeChunk> {
        Arc::new(KnowledgeChunk {
            chunk_id: id.into(),
            text: text.into(),
            dense_vector: vec![],
            sparse_terms: Default::default(),
            source_doc: doc.into(),
            offset: 0,
            source_updated_at: None,
            token_count: 0,
        })
    }

    #[test]
    fn context_is_numbered_with_sources() {
        let builder = PromptBuilder::with_default_template(4);
        let prompt = builder.build(
            "When does enrollment close?",
            &[],
            &[chunk("a", "calendar.pdf", "Enrollment closes March 15."), chunk("b", "fees.pdf", "Fees are due in April.")],
        );
        assert!(prompt.system.contains("[1] (calendar.pdf) Enrollment closes March 15."));
        assert!(prompt.system.contains("[2] (fees.pdf) Fees are due in April."));
        assert!(!prompt.system.contains(CONTEXT_PLACEHOLDER));
        assert_eq!(prompt.question, "When does enrollment close?");
    }

    #[test]
    fn empty_context_uses_no_context_note() {
        let prompt = PromptBuilder::with_default_template(4).build("hi", &[], &[]);
        assert!(prompt.system.contains("No reference excerpt matched"));
    }

    #[test]
    fn history_is_trimmed_to_most_recent_turns() {
        let history: Vec<Turn> = (0..6)
            .map(|i| if i % 2 == 0 { Turn::user(format!("q{i}")) } else { Turn::assistant(format!("a{i}")) })
            .collect();
        let prompt = PromptBuilder::with_default_template(2).build("next", &history, &[]);
        assert_eq!(prompt.history.len(), 2);
        assert_eq!(prompt.history[0].content, "q4");
        assert_eq!(prompt.history[1].content, "a5");
        // system + 2 history + question
        assert_eq!(prompt.to_messages().len(), 4);
    }

    #[test]
    fn template_file_must_have_placeholder() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(good, "Use these notes:\n{CONTEXT_PLACEHOLDER}").unwrap();
        assert!(PromptBuilder::from_file(good.path(), 4).is_ok());

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "No placeholder here").unwrap();
        assert!(matches!(
            PromptBuilder::from_file(bad.path(), 4),
            Err(PromptError::MissingPlaceholder(_))
        ));

        assert!(matches!(
            PromptBuilder::from_file(Path::new("/definitely/missing.txt"), 4),
            Err(PromptError::Read { .. })
        ));
    }
}
