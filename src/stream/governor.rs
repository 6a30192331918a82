//! Stream governance
//!
//! Consumes the model's live fragment stream and enforces the early-stop and
//! fallback policy: stop on a generated user-turn marker, on a raw character
//! ceiling, or on a silent stream that never produces visible output.
//! Waiting for the next fragment is the turn's only suspension point.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::error::ModelError;

/// Governs one turn's fragment stream. Construct once per session; each
/// `govern` call owns its per-turn state and discards it at turn end.
pub struct StreamGovernor {
    config: StreamConfig,
    user_turn_markers: Vec<String>,
}

/// Per-turn accumulation state.
struct TurnState {
    raw: String,
    raw_chars: usize,
    visible_output_emitted: bool,
    silent_chars: usize,
    stop: bool,
}

impl StreamGovernor {
    pub fn new(config: StreamConfig, user_name: &str) -> Self {
        // Newline-anchored variants of the user-turn marker plus the raw
        // card placeholder, matching what runaway generations produce.
        let user_turn_markers = vec![
            format!("\n{}:", user_name),
            format!("\n{}:", user_name.to_uppercase()),
            format!("\n{}:", user_name.to_lowercase()),
            "\n{{user}}".to_string(),
        ];
        Self {
            config,
            user_turn_markers,
        }
    }

    /// Drive the stream to completion, early stop, failure, or cancellation.
    ///
    /// Forwarded fragments go to `sink` verbatim once visible output has
    /// started; leading whitespace is suppressed. `first_content` fires at
    /// most once, on the first fragment, a cancellation, or a stream error.
    /// Returns `None` only for cancellation — callers must not record a
    /// history turn in that case. Otherwise returns the full raw text
    /// forwarded (or the configured fallback), pre-cleanup.
    pub async fn govern(
        &self,
        mut fragments: mpsc::Receiver<Result<String, ModelError>>,
        sink: Option<mpsc::UnboundedSender<String>>,
        mut first_content: Option<oneshot::Sender<()>>,
        cancel: CancellationToken,
    ) -> Option<String> {
        let mut state = TurnState {
            raw: String::new(),
            raw_chars: 0,
            visible_output_emitted: false,
            silent_chars: 0,
            stop: false,
        };

        loop {
            // Cancellation must win over a pending fragment, or an already
            // cancelled turn could still complete and reach history.
            let fragment = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    raise_first_content(&mut first_content);
                    debug!("Stream cancelled by caller; discarding turn");
                    return None;
                }
                fragment = fragments.recv() => fragment,
            };

            match fragment {
                None => break,
                Some(Err(e)) => {
                    raise_first_content(&mut first_content);
                    warn!("Streaming failed ({}); emitting fallback response", e);
                    return Some(self.emit_fallback(&mut state, &sink));
                }
                Some(Ok(chunk)) => {
                    raise_first_content(&mut first_content);
                    state.raw.push_str(&chunk);
                    state.raw_chars += chunk.chars().count();

                    if !state.stop
                        && self
                            .user_turn_markers
                            .iter()
                            .any(|marker| state.raw.contains(marker.as_str()))
                    {
                        warn!("Stopping stream early after detecting generated user-turn marker");
                        state.stop = true;
                    }
                    if !state.stop
                        && self.config.max_stream_chars > 0
                        && state.raw_chars >= self.config.max_stream_chars
                    {
                        warn!(
                            "Stopping stream early after reaching max_stream_chars={}",
                            self.config.max_stream_chars
                        );
                        state.stop = true;
                    }
                    if !state.visible_output_emitted && chunk.trim().is_empty() {
                        state.silent_chars += chunk.chars().count();
                        if !state.stop
                            && self.config.max_silent_stream_chars > 0
                            && state.silent_chars >= self.config.max_silent_stream_chars
                        {
                            warn!(
                                "Stopping stream early after {} silent chars without visible output",
                                state.silent_chars
                            );
                            state.stop = true;
                        }
                    }

                    emit_text(&mut state, &sink, &chunk);

                    if state.stop {
                        break;
                    }
                }
            }
        }

        if !state.visible_output_emitted {
            return Some(self.emit_fallback(&mut state, &sink));
        }
        Some(state.raw)
    }

    fn emit_fallback(
        &self,
        state: &mut TurnState,
        sink: &Option<mpsc::UnboundedSender<String>>,
    ) -> String {
        let fallback = self.config.empty_stream_fallback.clone();
        emit_text(state, sink, &fallback);
        fallback
    }
}

fn raise_first_content(first_content: &mut Option<oneshot::Sender<()>>) {
    if let Some(tx) = first_content.take() {
        let _ = tx.send(());
    }
}

/// Forward a fragment, suppressing leading whitespace until the first
/// visible content. A dropped sink receiver is not an error.
fn emit_text(state: &mut TurnState, sink: &Option<mpsc::UnboundedSender<String>>, text: &str) {
    let text = if state.visible_output_emitted {
        text
    } else {
        text.trim_start()
    };
    if text.is_empty() {
        return;
    }
    if !text.trim().is_empty() {
        state.visible_output_emitted = true;
    }
    if let Some(sink) = sink {
        let _ = sink.send(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> StreamGovernor {
        StreamGovernor::new(StreamConfig::default(), "User")
    }

    fn governor_with(config: StreamConfig) -> StreamGovernor {
        StreamGovernor::new(config, "User")
    }

    async fn run_fragments(
        gov: &StreamGovernor,
        fragments: Vec<Result<&str, ModelError>>,
    ) -> (Option<String>, Vec<String>) {
        let (tx, rx) = mpsc::channel(16);
        for fragment in fragments {
            tx.send(fragment.map(str::to_string)).await.unwrap();
        }
        drop(tx);
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let result = gov
            .govern(rx, Some(sink_tx), None, CancellationToken::new())
            .await;
        let mut forwarded = Vec::new();
        while let Ok(text) = sink_rx.try_recv() {
            forwarded.push(text);
        }
        (result, forwarded)
    }

    #[tokio::test]
    async fn test_plain_stream_passes_through() {
        let gov = governor();
        let (result, forwarded) = run_fragments(&gov, vec![Ok("Hello there.")]).await;
        assert_eq!(result.as_deref(), Some("Hello there."));
        assert_eq!(forwarded.concat(), "Hello there.");
    }

    #[tokio::test]
    async fn test_user_marker_stops_stream() {
        let gov = governor();
        let (result, _) = run_fragments(&gov, vec![Ok("Hello.\nUser: x"), Ok(" more")]).await;
        // The marker-completing fragment is kept; nothing after it is read.
        assert_eq!(result.as_deref(), Some("Hello.\nUser: x"));
    }

    #[tokio::test]
    async fn test_char_ceiling_stops_stream() {
        let gov = governor_with(StreamConfig {
            max_stream_chars: 10,
            ..StreamConfig::default()
        });
        let (result, _) =
            run_fragments(&gov, vec![Ok("0123456789"), Ok("never consumed")]).await;
        assert_eq!(result.as_deref(), Some("0123456789"));
    }

    #[tokio::test]
    async fn test_silent_stream_falls_back() {
        let gov = governor_with(StreamConfig {
            max_silent_stream_chars: 8,
            ..StreamConfig::default()
        });
        let (result, forwarded) =
            run_fragments(&gov, vec![Ok("    "), Ok("\n\n\n\n"), Ok("unreached")]).await;
        let fallback = StreamConfig::default().empty_stream_fallback;
        assert_eq!(result.as_deref(), Some(fallback.as_str()));
        assert_eq!(forwarded.concat(), fallback);
    }

    #[tokio::test]
    async fn test_leading_whitespace_suppressed() {
        let gov = governor();
        let (result, forwarded) = run_fragments(&gov, vec![Ok("  \n"), Ok("  Hi"), Ok(" there")]).await;
        assert_eq!(forwarded.concat(), "Hi there");
        // The raw return keeps every received fragment.
        assert_eq!(result.as_deref(), Some("  \n  Hi there"));
    }

    #[tokio::test]
    async fn test_stream_error_emits_fallback() {
        let gov = governor();
        let (result, forwarded) = run_fragments(
            &gov,
            vec![Ok("partial"), Err(ModelError::StreamInterrupted("gone".to_string()))],
        )
        .await;
        let fallback = StreamConfig::default().empty_stream_fallback;
        assert_eq!(result.as_deref(), Some(fallback.as_str()));
        assert!(forwarded.concat().ends_with(&fallback));
    }

    #[tokio::test]
    async fn test_empty_stream_emits_fallback() {
        let gov = governor();
        let (result, _) = run_fragments(&gov, vec![]).await;
        assert_eq!(
            result.as_deref(),
            Some(StreamConfig::default().empty_stream_fallback.as_str())
        );
    }

    #[tokio::test]
    async fn test_char_ceiling_counts_chars_not_bytes() {
        let gov = governor_with(StreamConfig {
            max_stream_chars: 10,
            ..StreamConfig::default()
        });
        // Eight two-byte chars: sixteen bytes but only eight of the ten
        // allowed chars, so the stream must survive into the next fragment.
        let (result, _) =
            run_fragments(&gov, vec![Ok("éééééééé"), Ok("ab"), Ok("never consumed")]).await;
        assert_eq!(result.as_deref(), Some("ééééééééab"));
    }

    #[tokio::test]
    async fn test_cancellation_beats_pending_fragment() {
        let gov = governor();
        // A fragment is already queued when the token is cancelled; the
        // cancelled turn must still yield no result, every time.
        for _ in 0..64 {
            let (tx, rx) = mpsc::channel(1);
            tx.send(Ok("queued before cancel".to_string())).await.unwrap();
            let cancel = CancellationToken::new();
            cancel.cancel();
            assert!(gov.govern(rx, None, None, cancel).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_no_result() {
        let gov = governor();
        let (_tx, rx) = mpsc::channel::<Result<String, ModelError>>(1);
        let (first_tx, first_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = gov.govern(rx, None, Some(first_tx), cancel).await;
        assert!(result.is_none());
        // First-content still fires so waiting indicators are released.
        assert!(first_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_first_content_fires_once_on_first_fragment() {
        let gov = governor();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("Hello".to_string())).await.unwrap();
        tx.send(Ok(" again".to_string())).await.unwrap();
        drop(tx);
        let (first_tx, first_rx) = oneshot::channel();
        let result = gov
            .govern(rx, None, Some(first_tx), CancellationToken::new())
            .await;
        assert_eq!(result.as_deref(), Some("Hello again"));
        assert!(first_rx.await.is_ok());
    }
}
