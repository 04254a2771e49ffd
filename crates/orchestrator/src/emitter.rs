use std::time::Duration;

use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::events::ProgressEvent;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Wraps a `ProgressEvent` stream into wire-format SSE frames:
/// `event: <kind>\ndata: <json>\n\n`, interleaving `: keep-alive\n\n` comment
/// frames on a 5s cadence while the underlying stream is pending. Mirrors
/// the `while not future.done(): yield keep-alive; sleep(5)` loop the
/// original service used, reimplemented without a polling sleep: the
/// keep-alive ticker and the event stream are raced with `select!`.
pub struct StreamingEventEmitter<S> {
    events: S,
    cancel: CancellationToken,
}

impl<S> StreamingEventEmitter<S>
where
    S: Stream<Item = ProgressEvent> + Unpin,
{
    pub fn new(events: S, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Drains the wrapped stream into wire frames until it's exhausted or
    /// the cancellation token fires (client disconnect). No events are
    /// emitted after cancellation.
    pub async fn run(mut self, mut sink: impl FnMut(String) -> bool) {
        let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        keep_alive.tick().await; // first tick fires immediately; discard it

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return;
                }
                next = self.events.next() => {
                    match next {
                        Some(event) => {
                            if !sink(frame(&event)) {
                                return;
                            }
                        }
                        None => return,
                    }
                }
                _ = keep_alive.tick() => {
                    if !sink(": keep-alive\n\n".to_string()) {
                        return;
                    }
                }
            }
        }
    }
}

fn frame(event: &ProgressEvent) -> String {
    format!("event: {}\ndata: {}\n\n", event.kind(), event.data_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Phase, ProgressData};
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test]
    async fn frames_events_in_order_and_stops_at_end() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(ProgressEvent::Progress(ProgressData {
            index: Some(1),
            status: "generating",
            current: Some(1),
            total: Some(1),
            phase: Phase::Cover,
            message: None,
        }))
        .await
        .unwrap();
        drop(tx);

        let emitter = StreamingEventEmitter::new(ReceiverStream::new(rx), CancellationToken::new());
        let mut frames = Vec::new();
        emitter
            .run(|frame| {
                frames.push(frame);
                true
            })
            .await;

        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("event: progress\n"));
    }

    #[tokio::test]
    async fn stops_immediately_once_cancelled() {
        let (_tx, rx) = tokio::sync::mpsc::channel::<ProgressEvent>(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let emitter = StreamingEventEmitter::new(ReceiverStream::new(rx), cancel);
        let mut frames = Vec::new();
        emitter
            .run(|frame| {
                frames.push(frame);
                true
            })
            .await;

        assert!(frames.is_empty());
    }
}
