//! Folding a streamed chat answer into the conversation it belongs to.
//!
//! After every fragment the last assistant message is overwritten with the
//! text received so far and the whole message list is handed to a
//! [`SnapshotSink`]. Fragments are applied strictly in arrival order.

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use codescope_core::error::CodeScopeError;
use codescope_core::types::{Message, Role};

/// Text shown in place of an answer that failed before any of it arrived.
pub const STREAM_FAILURE_MESSAGE: &str =
    "Sorry, I couldn't get an answer from the server. Please check the backend and try again.";

/// Receives a snapshot of the conversation after each applied fragment.
pub trait SnapshotSink: Send {
    fn publish(&mut self, messages: &[Message]) -> Result<(), CodeScopeError>;
}

impl<F> SnapshotSink for F
where
    F: FnMut(&[Message]) -> Result<(), CodeScopeError> + Send,
{
    fn publish(&mut self, messages: &[Message]) -> Result<(), CodeScopeError> {
        self(messages)
    }
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The stream closed normally.
    Completed { content: String, fragments: usize },
    /// The connection failed after some text arrived; that text is kept.
    Partial {
        content: String,
        fragments: usize,
        error: CodeScopeError,
    },
    /// The connection failed before any text arrived.
    Failed { error: CodeScopeError },
}

impl StreamOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed { .. } => "completed",
            StreamOutcome::Partial { .. } => "partial",
            StreamOutcome::Failed { .. } => "failed",
        }
    }

    pub fn fragments(&self) -> usize {
        match self {
            StreamOutcome::Completed { fragments, .. }
            | StreamOutcome::Partial { fragments, .. } => *fragments,
            StreamOutcome::Failed { .. } => 0,
        }
    }

    /// Final text of the assistant message.
    pub fn content(&self) -> &str {
        match self {
            StreamOutcome::Completed { content, .. } | StreamOutcome::Partial { content, .. } => {
                content
            }
            StreamOutcome::Failed { .. } => STREAM_FAILURE_MESSAGE,
        }
    }
}

/// Result of [`accumulate`].
#[derive(Debug)]
pub struct Accumulation {
    /// The final message list, ending with the frozen assistant message.
    pub messages: Vec<Message>,
    pub outcome: StreamOutcome,
    /// Snapshots the sink refused. They are logged, never retried.
    pub publish_failures: usize,
}

/// Consume `stream` into the last assistant message of `messages`.
///
/// If `messages` does not end with an assistant message, an empty
/// placeholder is appended first. Empty fragments are skipped and do not
/// produce a snapshot.
pub async fn accumulate<S>(
    mut stream: S,
    mut messages: Vec<Message>,
    sink: &mut (dyn SnapshotSink + '_),
) -> Accumulation
where
    S: Stream<Item = Result<String, CodeScopeError>> + Unpin,
{
    if !matches!(messages.last(), Some(m) if m.role == Role::Assistant) {
        messages.push(Message::placeholder());
    }
    let slot = messages.len() - 1;

    let mut buffer = String::new();
    let mut fragments = 0usize;
    let mut publish_failures = 0usize;
    let mut failure = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                if fragment.is_empty() {
                    continue;
                }
                buffer.push_str(&fragment);
                fragments += 1;
                messages[slot].content.clone_from(&buffer);
                if let Err(e) = sink.publish(&messages) {
                    warn!(error = %e, fragment = fragments, "Failed to publish answer snapshot");
                    publish_failures += 1;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let outcome = match failure {
        None => StreamOutcome::Completed {
            content: buffer,
            fragments,
        },
        Some(error) if fragments > 0 => {
            warn!(error = %error, fragments, "Answer stream broke; keeping partial answer");
            StreamOutcome::Partial {
                content: buffer,
                fragments,
                error,
            }
        }
        Some(error) => {
            warn!(error = %error, "Answer stream failed before any text arrived");
            messages[slot].content = STREAM_FAILURE_MESSAGE.to_string();
            if let Err(e) = sink.publish(&messages) {
                warn!(error = %e, "Failed to publish failure snapshot");
                publish_failures += 1;
            }
            StreamOutcome::Failed { error }
        }
    };

    debug!(
        outcome = outcome.label(),
        fragments = outcome.fragments(),
        publish_failures,
        "Answer stream finished"
    );

    Accumulation {
        messages,
        outcome,
        publish_failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(items: &[&str]) -> Vec<Result<String, CodeScopeError>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    fn base() -> Vec<Message> {
        vec![Message::user("question"), Message::placeholder()]
    }

    #[tokio::test]
    async fn test_three_fragments_make_hello_world_with_three_snapshots() {
        let mut snapshots: Vec<String> = Vec::new();
        let mut sink = |messages: &[Message]| -> Result<(), CodeScopeError> {
            snapshots.push(messages.last().unwrap().content.clone());
            Ok(())
        };

        let result = accumulate(
            futures::stream::iter(fragments(&["Hel", "lo wor", "ld"])),
            base(),
            &mut sink,
        )
        .await;

        assert_eq!(result.messages.last().unwrap().content, "Hello world");
        assert!(matches!(
            result.outcome,
            StreamOutcome::Completed { ref content, fragments: 3 } if content == "Hello world"
        ));
        assert_eq!(snapshots, vec!["Hel", "Hello wor", "Hello world"]);
    }

    #[tokio::test]
    async fn test_every_snapshot_is_prefix_concatenation() {
        let parts = ["fn ", "main", "() ", "{", "}", "\n", "ü", "✓"];
        let mut snapshots: Vec<String> = Vec::new();
        let mut sink = |messages: &[Message]| -> Result<(), CodeScopeError> {
            snapshots.push(messages.last().unwrap().content.clone());
            Ok(())
        };

        accumulate(futures::stream::iter(fragments(&parts)), base(), &mut sink).await;

        for (k, snapshot) in snapshots.iter().enumerate() {
            assert_eq!(snapshot, &parts[..=k].concat());
        }
        assert_eq!(snapshots.len(), parts.len());
    }

    #[tokio::test]
    async fn test_earlier_messages_are_untouched() {
        let history = vec![
            Message::user("first"),
            Message::assistant("first answer"),
            Message::user("second"),
            Message::placeholder(),
        ];
        let mut seen_prefixes_intact = true;
        let expected = history[..3].to_vec();
        let mut sink = |messages: &[Message]| -> Result<(), CodeScopeError> {
            seen_prefixes_intact &= messages[..3] == expected[..];
            Ok(())
        };

        let result = accumulate(
            futures::stream::iter(fragments(&["a", "b"])),
            history,
            &mut sink,
        )
        .await;
        assert!(seen_prefixes_intact);
        assert_eq!(result.messages.len(), 4);
        assert_eq!(result.messages[3].content, "ab");
    }

    #[tokio::test]
    async fn test_missing_placeholder_is_added() {
        let mut sink = |_: &[Message]| -> Result<(), CodeScopeError> { Ok(()) };
        let result = accumulate(
            futures::stream::iter(fragments(&["x"])),
            vec![Message::user("q")],
            &mut sink,
        )
        .await;
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[1].role, Role::Assistant);
        assert_eq!(result.messages[1].content, "x");
    }

    #[tokio::test]
    async fn test_failure_before_first_fragment_writes_failure_message() {
        let mut publishes = 0;
        let mut sink = |messages: &[Message]| -> Result<(), CodeScopeError> {
            publishes += 1;
            assert_eq!(messages.last().unwrap().content, STREAM_FAILURE_MESSAGE);
            Ok(())
        };

        let items = vec![Err(CodeScopeError::Network("connection reset".into()))];
        let result = accumulate(futures::stream::iter(items), base(), &mut sink).await;

        assert_eq!(publishes, 1);
        assert!(matches!(result.outcome, StreamOutcome::Failed { .. }));
        assert_eq!(result.messages[1].content, STREAM_FAILURE_MESSAGE);
        assert_eq!(result.outcome.content(), STREAM_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_failure_after_partial_content_keeps_it() {
        let mut publishes = 0;
        let mut sink = |_: &[Message]| -> Result<(), CodeScopeError> {
            publishes += 1;
            Ok(())
        };

        let items = vec![
            Ok("partial ".to_string()),
            Ok("answer".to_string()),
            Err(CodeScopeError::Network("connection reset".into())),
            Ok("never applied".to_string()),
        ];
        let result = accumulate(futures::stream::iter(items), base(), &mut sink).await;

        assert_eq!(publishes, 2);
        assert_eq!(result.messages[1].content, "partial answer");
        assert!(matches!(
            result.outcome,
            StreamOutcome::Partial { fragments: 2, .. }
        ));
        assert_eq!(result.outcome.label(), "partial");
    }

    #[tokio::test]
    async fn test_empty_fragments_do_not_publish() {
        let mut publishes = 0;
        let mut sink = |_: &[Message]| -> Result<(), CodeScopeError> {
            publishes += 1;
            Ok(())
        };
        let result = accumulate(
            futures::stream::iter(fragments(&["", "a", ""])),
            base(),
            &mut sink,
        )
        .await;
        assert_eq!(publishes, 1);
        assert_eq!(result.outcome.fragments(), 1);
    }

    #[tokio::test]
    async fn test_sink_failures_are_counted_not_fatal() {
        let mut sink = |_: &[Message]| -> Result<(), CodeScopeError> {
            Err(CodeScopeError::Storage("disk full".into()))
        };
        let result = accumulate(
            futures::stream::iter(fragments(&["a", "b"])),
            base(),
            &mut sink,
        )
        .await;
        assert_eq!(result.publish_failures, 2);
        assert_eq!(result.outcome.content(), "ab");
    }
}
