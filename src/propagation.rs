//! Fan-out of outbound messages to friends.
//!
//! Every broadcast becomes one delivery task per target pod.  Tasks run
//! concurrently, each with its own timeout, and a failing or panicking task
//! never affects its siblings.  The caller gets a [`Dispatch`] it may await
//! for a [`FanoutReport`] or simply drop: delivery carries on either way.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{PodError, Result};
use crate::transport::PodClient;
use crate::types::{JoinRequest, LeaveRequest, PodUrl, Propagation};

/// What a broadcast sends to each target.
#[derive(Debug, Clone)]
pub enum Outbound {
    Propagate(Propagation),
    Announce(JoinRequest),
    Leave(LeaveRequest),
}

impl Outbound {
    fn describe(&self) -> String {
        match self {
            Outbound::Propagate(Propagation::Publish { video, .. }) => format!("publish of {}", video.id),
            Outbound::Propagate(Propagation::Remove { id, .. }) => format!("removal of {id}"),
            Outbound::Announce(request) => format!("announce of {}", request.url),
            Outbound::Leave(request) => format!("leave of {}", request.url),
        }
    }
}

/// Per-target outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FanoutReport {
    pub delivered: Vec<PodUrl>,
    pub failed: Vec<(PodUrl, String)>,
}

impl FanoutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handle on a running broadcast.
#[must_use = "call .detach() to let the broadcast run unobserved"]
pub struct Dispatch {
    handle: JoinHandle<FanoutReport>,
}

impl Dispatch {
    /// Wait for every delivery of this broadcast to finish.
    pub async fn report(self) -> FanoutReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Broadcast supervisor failed: {}", e);
                FanoutReport::default()
            }
        }
    }

    pub fn detach(self) {}
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct Propagator {
    client: Arc<dyn PodClient>,
    limiter: Arc<Semaphore>,
    timeout: Duration,
    in_flight: Arc<InFlight>,
}

impl Propagator {
    /// `concurrency` caps simultaneous outbound calls across all broadcasts.
    pub fn new(client: Arc<dyn PodClient>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            client,
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn client(&self) -> &Arc<dyn PodClient> {
        &self.client
    }

    /// Number of broadcasts not yet finished.
    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Send `outbound` to every pod in `targets`, concurrently.
    pub fn broadcast(&self, targets: Vec<PodUrl>, outbound: Outbound) -> Dispatch {
        let guard = InFlightGuard::enter(&self.in_flight);
        let client = Arc::clone(&self.client);
        let limiter = Arc::clone(&self.limiter);
        let timeout = self.timeout;
        let outbound = Arc::new(outbound);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let mut tasks = JoinSet::new();
            for target in targets {
                let client = Arc::clone(&client);
                let limiter = Arc::clone(&limiter);
                let outbound = Arc::clone(&outbound);
                tasks.spawn(async move {
                    let outcome = deliver(client.as_ref(), &limiter, timeout, &target, &outbound).await;
                    (target, outcome)
                });
            }

            let mut report = FanoutReport::default();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((target, Ok(()))) => {
                        debug!("Delivered {} to {}", outbound.describe(), target);
                        report.delivered.push(target);
                    }
                    Ok((target, Err(e))) => {
                        warn!("Delivery of {} to {} failed: {}", outbound.describe(), target, e);
                        report.failed.push((target, e.to_string()));
                    }
                    Err(e) => warn!("Delivery task for {} panicked: {}", outbound.describe(), e),
                }
            }
            report
        });

        Dispatch { handle }
    }

    /// Resolve once no broadcast from this propagator is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn deliver(
    client: &dyn PodClient,
    limiter: &Semaphore,
    timeout: Duration,
    target: &PodUrl,
    outbound: &Outbound,
) -> Result<()> {
    let _permit = limiter
        .acquire()
        .await
        .map_err(|_| PodError::Protocol {
            pod: target.clone(),
            reason: "delivery limiter closed".into(),
        })?;
    let call = async {
        match outbound {
            Outbound::Propagate(message) => client.propagate(target, message).await,
            Outbound::Announce(request) => client.announce(target, request).await,
            Outbound::Leave(request) => client.leave(target, request).await,
        }
    };
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| PodError::Timeout(timeout))?
}
