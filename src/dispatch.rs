//! Fan-out of decoded judgments to subscribers
//!
//! Subscribers run synchronously, in registration order, on the caller's
//! task. A subscriber that returns an error or panics is logged and skipped;
//! the rest still run.

use crate::model::RefereeResult;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// A judgment consumer
pub type Handler = Box<dyn Fn(&RefereeResult) -> anyhow::Result<()>>;

/// Identifies a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    name: String,
    handler: Handler,
}

/// A subscriber that failed during one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFailure {
    pub id: SubscriptionId,
    pub name: String,
    pub message: String,
    pub panicked: bool,
}

/// What happened during one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that completed without error
    pub delivered: usize,
    pub failures: Vec<SubscriberFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub struct ConfidenceDispatcher {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl fmt::Debug for ConfidenceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfidenceDispatcher")
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ConfidenceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. `name` only appears in logs and reports.
    pub fn subscribe<F>(&mut self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&RefereeResult) -> anyhow::Result<()> + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        tracing::debug!(%id, %name, "Subscriber registered");
        self.subscribers.push(Subscriber {
            id,
            name,
            handler: Box::new(handler),
        });
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `result` to every subscriber
    pub fn dispatch(&self, result: &RefereeResult) -> DispatchReport {
        let mut report = DispatchReport::default();

        for subscriber in &self.subscribers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(result)));
            let failure = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => SubscriberFailure {
                    id: subscriber.id,
                    name: subscriber.name.clone(),
                    message: format!("{:#}", e),
                    panicked: false,
                },
                Err(payload) => SubscriberFailure {
                    id: subscriber.id,
                    name: subscriber.name.clone(),
                    message: panic_message(payload.as_ref()),
                    panicked: true,
                },
            };
            tracing::error!(
                subscriber = %failure.name,
                id = %failure.id,
                panicked = failure.panicked,
                "Subscriber failed: {}",
                failure.message
            );
            report.failures.push(failure);
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "subscriber panicked".to_string()
    }
}
