//! Per-channel background task: establish the backend feed, fan events out
//! to observers, and reconnect with bounded exponential backoff.

use crate::backend::Backend;
use crate::descriptor::Filter;
use crate::error::ChannelError;
use crate::event::FeedMessage;
use crate::event_handlers::{DisconnectReason, EventHandlers};
use crate::options::ChannelOptions;
use crate::registry::FanOut;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Capacity of the event channel between the backend feed and the channel
/// task. When full, the backend side is backpressured.
const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Drive one change-feed channel until the registry shuts it down.
///
/// Establishment failures are retried with exponential backoff up to
/// `options.max_retry_attempts`; after that a persistent
/// [`ChannelError`] is fanned out and the task parks until shutdown, leaving
/// observers on their last-known snapshots. A feed that drops after being
/// established re-enters the retry loop (attempt counter reset), with
/// `Down`/`Restored` notices around the gap.
pub(crate) async fn run_feed(
    backend: Arc<dyn Backend>,
    resource: String,
    filter: Filter,
    fan_out: FanOut,
    options: ChannelOptions,
    handlers: EventHandlers,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;
    let mut was_connected = false;

    loop {
        let (event_tx, mut event_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let establish = backend.subscribe(&resource, &filter, event_tx);
        let established = tokio::select! {
            _ = &mut shutdown => return,
            result = establish => result,
        };

        match established {
            Ok(handle) => {
                attempt = 0;
                log::info!("change feed established for '{}'", resource);
                handlers.emit_connect();
                if was_connected {
                    fan_out.send(FeedMessage::Restored).await;
                }
                was_connected = true;

                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            handle.stop();
                            return;
                        }
                        event = event_rx.recv() => match event {
                            Some(event) => fan_out.send(FeedMessage::Event(event)).await,
                            None => break,
                        }
                    }
                }

                // Backend side hung up.
                drop(handle);
                handlers.emit_disconnect(DisconnectReason::new(format!(
                    "change feed for '{}' ended",
                    resource
                )));
                if !options.auto_reconnect {
                    let error =
                        ChannelError::persistent(format!("change feed for '{}' ended", resource));
                    fan_out.send(FeedMessage::Down(error)).await;
                    let _ = shutdown.await;
                    return;
                }
                fan_out
                    .send(FeedMessage::Down(ChannelError::recoverable(format!(
                        "change feed for '{}' lost, reconnecting",
                        resource
                    ))))
                    .await;
            }
            Err(error) => {
                attempt += 1;
                handlers.emit_error(&error);
                if attempt >= options.max_retry_attempts {
                    log::warn!(
                        "change feed for '{}' unavailable after {} attempts: {}",
                        resource,
                        attempt,
                        error
                    );
                    let persistent = ChannelError::persistent(format!(
                        "change feed for '{}' unavailable after {} attempts: {}",
                        resource, attempt, error
                    ));
                    fan_out.send(FeedMessage::Down(persistent)).await;
                    let _ = shutdown.await;
                    return;
                }

                let delay = options.retry_delay_ms(attempt);
                log::info!(
                    "retrying change feed for '{}' in {}ms (attempt {})",
                    resource,
                    delay,
                    attempt + 1
                );
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
            }
        }
    }
}
