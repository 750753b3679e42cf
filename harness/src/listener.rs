//! Bounded consumption of a subscription stream.

use std::num::NonZeroUsize;

use futures_util::{pin_mut, StreamExt};
use log::*;
use tokio::time::Instant;

use crate::error::Error;
use crate::operation::Operation;
use crate::outcome::{event_name, round_millis, Event, SubscriptionOutcome, Termination};
use crate::session::Session;

/// Collects up to `target` events of `operation` on `session`.
///
/// Stops as soon as `target` events arrived and asks the server to release the
/// subscription. A stream that ends or fails earlier is not an error: whatever
/// was captured is returned along with the reason consumption stopped.
pub async fn listen(
    session: &mut Session,
    operation: &Operation,
    target: NonZeroUsize,
) -> Result<SubscriptionOutcome, Error> {
    let label = session.label().to_string();
    let mut events = Vec::with_capacity(target.get());
    let start = Instant::now();

    info!("[{label}] listening for {} '{}' event(s)", target, operation.name());

    let termination = {
        let stream = session.subscribe(operation);
        pin_mut!(stream);

        loop {
            match stream.next().await {
                Some(Ok(payload)) => {
                    let elapsed_ms = round_millis(start.elapsed());
                    let name = event_name(&payload)
                        .unwrap_or(operation.name())
                        .to_string();
                    debug!("[{label}] event '{name}' after {elapsed_ms} ms");
                    events.push(Event {
                        name,
                        payload,
                        elapsed_ms,
                    });
                    if events.len() >= target.get() {
                        break Termination::TargetReached;
                    }
                }
                Some(Err(err)) => break Termination::StreamFailed(err.to_string()),
                None => break Termination::StreamEnded,
            }
        }
    };

    match &termination {
        Termination::TargetReached => {
            if let Err(err) = session.stop_subscriptions().await {
                warn!("[{label}] could not stop '{}' after the last event: {err}", operation.name());
            }
        }
        Termination::StreamEnded => warn!(
            "[{label}] '{}' ended after {} of {} event(s)",
            operation.name(),
            events.len(),
            target
        ),
        Termination::StreamFailed(reason) => warn!(
            "[{label}] '{}' failed after {} of {} event(s): {reason}",
            operation.name(),
            events.len(),
            target
        ),
    }

    Ok(SubscriptionOutcome {
        elapsed_ms: events.last().map(|event| event.elapsed_ms),
        events,
        termination,
    })
}
