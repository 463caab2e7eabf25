//! Polling for pod failures reported asynchronously by Kubernetes
//!
//! Mount failures never come back from the create call. The kubelet reports
//! them later as namespace events (`FailedMount`) or as pod conditions, so
//! the watcher re-reads both on a fixed tick until the expected text shows up.

use std::time::Duration;

use async_trait::async_trait;
use kube::api::ListParams;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{KubeClient, PodRef};
use crate::error::{E2eError, Result};

/// Interval between two polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Source of human-readable failure messages for a pod
#[async_trait]
pub trait PodErrorSource: Send + Sync {
    /// Messages of events whose involved object is the pod
    async fn event_messages(&self, pod: &PodRef) -> Result<Vec<String>>;

    /// Messages of the pod's status conditions
    async fn condition_messages(&self, pod: &PodRef) -> Result<Vec<String>>;
}

#[async_trait]
impl PodErrorSource for KubeClient {
    async fn event_messages(&self, pod: &PodRef) -> Result<Vec<String>> {
        let params = ListParams::default().fields(&format!("involvedObject.name={}", pod.name));
        let events = self.events(&pod.namespace).list(&params).await?;
        Ok(events
            .items
            .into_iter()
            .filter_map(|event| event.message)
            .collect())
    }

    async fn condition_messages(&self, pod: &PodRef) -> Result<Vec<String>> {
        let Some(current) = self.pods(&pod.namespace).get_opt(&pod.name).await? else {
            return Ok(Vec::new());
        };
        Ok(current
            .status
            .and_then(|status| status.conditions)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|condition| condition.message)
            .collect())
    }
}

/// Where a match was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Found {
    Event,
    Condition,
}

/// Block until `pattern` appears in an event or condition of `pod`.
///
/// Returns `PollTimeout` if it never shows up within `timeout` and
/// `Cancelled` if `cancel` fires first. A failed API call on one tick is
/// logged and retried on the next.
pub async fn wait_for_pod_error<S>(
    source: &S,
    pod: &PodRef,
    pattern: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: PodErrorSource + ?Sized,
{
    info!("Waiting up to {:?} for pod {} to report {:?}", timeout, pod, pattern);

    let deadline = Instant::now() + timeout;
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let cancelled = || E2eError::Cancelled { pod: pod.to_string() };
    let timed_out = || E2eError::PollTimeout {
        pod: pod.to_string(),
        pattern: pattern.to_string(),
        timeout,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep_until(deadline) => return Err(timed_out()),
            _ = ticker.tick() => {}
        }

        // A hung API call must not outlive the deadline or the token
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep_until(deadline) => return Err(timed_out()),
            polled = poll_once(source, pod, pattern) => polled,
        };

        match polled {
            Ok(Some(found)) => {
                info!("Pod {} reported {:?} via {:?}", pod, pattern, found);
                return Ok(());
            }
            Ok(None) => debug!("Pod {} has not reported {:?} yet", pod, pattern),
            Err(e) => warn!("Polling pod {} failed, retrying: {}", pod, e),
        }
    }
}

async fn poll_once<S>(source: &S, pod: &PodRef, pattern: &str) -> Result<Option<Found>>
where
    S: PodErrorSource + ?Sized,
{
    let events = source.event_messages(pod).await?;
    if events.iter().any(|m| m.contains(pattern)) {
        return Ok(Some(Found::Event));
    }

    let conditions = source.condition_messages(pod).await?;
    if conditions.iter().any(|m| m.contains(pattern)) {
        return Ok(Some(Found::Condition));
    }

    Ok(None)
}
