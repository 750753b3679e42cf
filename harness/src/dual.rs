//! Two sessions, one listening and one acting, joined under a single deadline.
//!
//! The listener subscribes on its own session while the trigger, after a grace
//! period, runs the operation expected to produce the event. The grace period
//! only makes it likely that the subscription is registered first: the server
//! gives no readiness signal, so a slow registration can still miss the event.

use std::num::NonZeroUsize;
use std::time::Duration;

use log::*;
use tokio::time::{sleep, timeout};

use crate::auth::Principal;
use crate::error::{Error, ErrorKind};
use crate::listener::listen;
use crate::operation::Operation;
use crate::outcome::DualOutcome;
use crate::retry::{retry, BackoffPolicy};
use crate::session::{Session, SessionTarget};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A subscription and the number of events the listener waits for.
#[derive(Clone, Debug)]
pub struct SubscriptionSpec {
    pub operation: Operation,
    pub expected_events: NonZeroUsize,
}

impl SubscriptionSpec {
    /// Expects a single event.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            expected_events: NonZeroUsize::MIN,
        }
    }

    pub fn expecting(mut self, expected_events: NonZeroUsize) -> Self {
        self.expected_events = expected_events;
        self
    }
}

pub struct DualSessionHarness {
    target: SessionTarget,
    deadline: Duration,
    grace_period: Duration,
    backoff: BackoffPolicy,
}

impl DualSessionHarness {
    pub fn new(target: SessionTarget) -> Self {
        Self {
            target,
            deadline: DEFAULT_DEADLINE,
            grace_period: DEFAULT_GRACE_PERIOD,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Subscribes as `listener`, triggers as `trigger`, and returns both outcomes.
    ///
    /// Opening the sessions and joining them is retried as a unit on transient
    /// transport errors. Opening and joining are each bounded by the deadline;
    /// missing it fails with [`ErrorKind::DeadlineExceeded`] and is never retried.
    pub async fn run(
        &self,
        listener: &Principal,
        trigger: &Principal,
        subscription: &SubscriptionSpec,
        trigger_operation: &Operation,
    ) -> Result<DualOutcome, Error> {
        retry(&self.backoff, || {
            self.run_once(listener, trigger, subscription, trigger_operation)
        })
        .await
    }

    async fn run_once(
        &self,
        listener: &Principal,
        trigger: &Principal,
        subscription: &SubscriptionSpec,
        trigger_operation: &Operation,
    ) -> Result<DualOutcome, Error> {
        let (mut listener_session, mut trigger_session) = self
            .open_sessions(listener, trigger, subscription.operation.name())
            .await?;

        let result = self
            .join(
                &mut listener_session,
                &mut trigger_session,
                subscription,
                trigger_operation,
            )
            .await;

        release(&mut listener_session).await;
        release(&mut trigger_session).await;
        result
    }

    /// Opens the listener's and then the trigger's session, both within the deadline.
    async fn open_sessions(
        &self,
        listener: &Principal,
        trigger: &Principal,
        name: &str,
    ) -> Result<(Session, Session), Error> {
        let opening = async {
            let mut listener_session = Session::open(&self.target, listener, "listener").await?;
            match Session::open(&self.target, trigger, "trigger").await {
                Ok(trigger_session) => Ok::<_, Error>((listener_session, trigger_session)),
                Err(err) => {
                    release(&mut listener_session).await;
                    Err(err)
                }
            }
        };

        match timeout(self.deadline, opening).await {
            Ok(opened) => opened,
            Err(_) => {
                error!("Sessions for '{name}' not ready within {:?}", self.deadline);
                Err(Error::new(
                    ErrorKind::DeadlineExceeded,
                    format!("sessions for '{name}' not ready within {:?}", self.deadline),
                ))
            }
        }
    }

    async fn join(
        &self,
        listener_session: &mut Session,
        trigger_session: &mut Session,
        subscription: &SubscriptionSpec,
        trigger_operation: &Operation,
    ) -> Result<DualOutcome, Error> {
        let listening = listen(
            listener_session,
            &subscription.operation,
            subscription.expected_events,
        );
        let triggering = async {
            sleep(self.grace_period).await;
            trigger_session.execute(trigger_operation).await
        };

        match timeout(self.deadline, async { tokio::try_join!(listening, triggering) }).await {
            Ok(Ok((subscription, trigger))) => Ok(DualOutcome {
                subscription,
                trigger,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                let name = subscription.operation.name();
                error!("No '{name}' event within {:?}", self.deadline);
                Err(Error::new(
                    ErrorKind::DeadlineExceeded,
                    format!("subscription '{name}' got no events within {:?}", self.deadline),
                ))
            }
        }
    }
}

/// Closes `session`, logging rather than returning any failure.
async fn release(session: &mut Session) {
    let closed = timeout(CLOSE_TIMEOUT, session.close()).await;
    match closed {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("[{}] failed to close session: {err}", session.label()),
        Err(_) => warn!("[{}] session did not close within {:?}", session.label(), CLOSE_TIMEOUT),
    }
}
