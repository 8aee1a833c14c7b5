//! Sliding-window context assembly.
//!
//! Builds the message list for the next model call from a conversation
//! history and a token budget:
//!
//! 1. The newest history message (the current user turn) is always included
//! 2. Older messages are prepended one at a time, newest first
//! 3. The walk stops at the first message whose addition pushes
//!    `[system] + window` over the budget; everything older is excluded
//!
//! The budget is soft at the floor: the system message and the newest
//! message are returned even when the pair alone exceeds it.
//!
//! # Determinism
//!
//! Assembly is pure apart from `tokenize_fn`: identical inputs always produce
//! identical outputs and the history is never mutated. Token counts are not
//! memoized, so a build costs up to one tokenization per history message.

use parley_core::error::{ContextError, EngineError};
use parley_core::message::{Message, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The assembled context, ready for a generation call.
#[derive(Debug, Clone)]
pub struct BoundedContext {
    /// `[system] + sliding window`, oldest first; the last entry is the
    /// newest history message.
    pub messages: Vec<Message>,
    pub metadata: ContextMetadata,
}

/// What the assembler kept and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Token count of the returned messages.
    pub total_tokens: usize,
    /// Configured token budget.
    pub budget: usize,
    /// Prior (non-seed) messages available in the history.
    pub prior_available: usize,
    /// Prior messages that made it into the window.
    pub prior_included: usize,
    /// True when system + newest message alone exceed the budget.
    pub over_budget: bool,
}

impl ContextMetadata {
    pub fn prior_dropped(&self) -> usize {
        self.prior_available - self.prior_included
    }
}

/// Sliding-window assembler bound to one token budget.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    budget: usize,
}

impl ContextAssembler {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Assemble `[system_message] + window` from `history`.
    ///
    /// System-role entries in `history` are skipped; `system_message` is the
    /// only system message in the output.
    pub fn assemble<F>(
        &self,
        history: &[Message],
        system_message: &Message,
        mut tokenize_fn: F,
    ) -> Result<BoundedContext, ContextError>
    where
        F: FnMut(&[Message]) -> Result<usize, EngineError>,
    {
        let turns: Vec<&Message> = history.iter().filter(|m| m.role != Role::System).collect();
        let (seed, prior) = turns.split_last().ok_or(ContextError::EmptyHistory)?;

        let mut messages = vec![system_message.clone(), (*seed).clone()];
        let mut total_tokens = tokenize_fn(&messages)?;
        let over_budget = total_tokens > self.budget;
        if over_budget {
            warn!(
                tokens = total_tokens,
                budget = self.budget,
                "System prompt and newest message exceed the token budget"
            );
        }

        let mut prior_included = 0;
        for candidate in prior.iter().rev() {
            messages.insert(1, (*candidate).clone());
            let tokens = tokenize_fn(&messages)?;
            if tokens > self.budget {
                messages.remove(1);
                break;
            }
            total_tokens = tokens;
            prior_included += 1;
        }

        let metadata = ContextMetadata {
            total_tokens,
            budget: self.budget,
            prior_available: prior.len(),
            prior_included,
            over_budget,
        };

        debug!(
            total_tokens,
            budget = self.budget,
            included = prior_included,
            dropped = metadata.prior_dropped(),
            "Context assembled"
        );

        Ok(BoundedContext { messages, metadata })
    }
}

/// Build the token-bounded message list for the next turn.
///
/// Shorthand for [`ContextAssembler::assemble`] returning only the messages.
pub fn build_context<F>(
    history: &[Message],
    system_message: &Message,
    token_budget: usize,
    tokenize_fn: F,
) -> Result<Vec<Message>, ContextError>
where
    F: FnMut(&[Message]) -> Result<usize, EngineError>,
{
    ContextAssembler::new(token_budget)
        .assemble(history, system_message, tokenize_fn)
        .map(|context| context.messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per whitespace-separated word.
    fn word_count(messages: &[Message]) -> Result<usize, EngineError> {
        Ok(messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum())
    }

    fn system() -> Message {
        Message::system("You are Bob.")
    }

    fn long_history() -> Vec<Message> {
        vec![
            Message::user("one two three"),
            Message::assistant("four five"),
            Message::user("six seven eight nine"),
            Message::assistant("ten"),
            Message::user("eleven twelve"),
        ]
    }

    #[test]
    fn empty_prior_history_yields_system_and_seed() {
        let history = vec![Message::user("Hi")];
        let context = build_context(&history, &system(), 2048, word_count).unwrap();
        assert_eq!(context, vec![system(), Message::user("Hi")]);
    }

    #[test]
    fn empty_history_is_an_error() {
        let result = build_context(&[], &system(), 2048, word_count);
        assert!(matches!(result, Err(ContextError::EmptyHistory)));
    }

    #[test]
    fn history_system_entries_are_not_duplicated() {
        let history = vec![
            Message::system("You are Bob."),
            Message::user("Hi"),
            Message::assistant("Hello"),
            Message::user("Again"),
        ];
        let context = build_context(&history, &system(), 2048, word_count).unwrap();
        let systems = context.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
        assert_eq!(context[0], system());
        assert_eq!(context.len(), 4);
    }

    #[test]
    fn everything_fits_under_a_large_budget() {
        let history = long_history();
        let context = build_context(&history, &system(), 1000, word_count).unwrap();
        assert_eq!(context.len(), history.len() + 1);
        assert_eq!(&context[1..], history.as_slice());
    }

    #[test]
    fn window_is_a_contiguous_suffix() {
        // system(3) + "eleven twelve"(2) + "ten"(1) + 4 = 10
        let history = long_history();
        let context = build_context(&history, &system(), 9, word_count).unwrap();
        assert_eq!(
            context,
            vec![system(), Message::assistant("ten"), Message::user("eleven twelve")]
        );
    }

    #[test]
    fn walk_stops_at_first_rejection() {
        // "four five" would fit after the long message is rejected, but the
        // window must stay contiguous.
        let history = vec![
            Message::assistant("four five"),
            Message::user("a b c d e f g h i j"),
            Message::user("Hi"),
        ];
        let context = build_context(&history, &system(), 8, word_count).unwrap();
        assert_eq!(context, vec![system(), Message::user("Hi")]);
    }

    #[test]
    fn newest_message_is_always_last() {
        let history = long_history();
        for budget in 0..30 {
            let context = build_context(&history, &system(), budget, word_count).unwrap();
            assert_eq!(context.last(), history.last());
            assert_eq!(context[0], system());
        }
    }

    #[test]
    fn floor_is_kept_when_it_exceeds_the_budget() {
        let history = vec![Message::user("a much longer opening message")];
        let context = ContextAssembler::new(2)
            .assemble(&history, &system(), word_count)
            .unwrap();
        assert_eq!(context.messages.len(), 2);
        assert!(context.metadata.over_budget);
        assert_eq!(context.metadata.total_tokens, 8);
    }

    #[test]
    fn smaller_budget_never_includes_more() {
        let history = long_history();
        let mut previous = usize::MAX;
        for budget in (0..30).rev() {
            let context = ContextAssembler::new(budget)
                .assemble(&history, &system(), word_count)
                .unwrap();
            assert!(context.metadata.prior_included <= previous);
            assert!(context.metadata.over_budget || context.metadata.total_tokens <= budget);
            previous = context.metadata.prior_included;
        }
    }

    #[test]
    fn assembly_is_idempotent() {
        let history = long_history();
        let snapshot = history.clone();
        let first = build_context(&history, &system(), 9, word_count).unwrap();
        let second = build_context(&history, &system(), 9, word_count).unwrap();
        assert_eq!(first, second);
        assert_eq!(history, snapshot);
    }

    #[test]
    fn metadata_counts_drops() {
        let context = ContextAssembler::new(9)
            .assemble(&long_history(), &system(), word_count)
            .unwrap();
        assert_eq!(context.metadata.prior_available, 4);
        assert_eq!(context.metadata.prior_included, 1);
        assert_eq!(context.metadata.prior_dropped(), 3);
        assert_eq!(context.metadata.total_tokens, 6);
        assert!(!context.metadata.over_budget);
    }

    #[test]
    fn tokenizer_failure_propagates() {
        let failing = |_: &[Message]| -> Result<usize, EngineError> {
            Err(EngineError::Tokenization("vocab missing".into()))
        };
        let result = build_context(&[Message::user("Hi")], &system(), 10, failing);
        assert!(matches!(result, Err(ContextError::Tokenization(_))));
    }

    #[test]
    fn tokenizes_once_per_candidate() {
        let mut calls = 0;
        let counting = |messages: &[Message]| {
            calls += 1;
            word_count(messages)
        };
        build_context(&long_history(), &system(), 1000, counting).unwrap();
        // floor + four prior candidates
        assert_eq!(calls, 5);
    }
}
