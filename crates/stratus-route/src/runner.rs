//! Background loops feeding route messages into a bounded channel
//!
//! Sends wait for capacity, so a slow consumer slows collection down instead
//! of losing messages. Both loops stop once the receiving side is dropped.

use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, Event};
use stratus_common::model::RouteMessage;
use stratus_common::watch::WatchCache;
use stratus_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Collector, RouteChangeHandler};

async fn send_all(messages: Vec<RouteMessage>, tx: &mpsc::Sender<RouteMessage>) -> Result<()> {
    for message in messages {
        tx.send(message)
            .await
            .map_err(|_| Error::ChannelClosed("route message".to_string()))?;
    }
    Ok(())
}

/// Re-announce every live route each `interval`
pub async fn run_collector(
    collector: Collector,
    tx: mpsc::Sender<RouteMessage>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(interval_secs = interval.as_secs(), "route collector started");

    loop {
        ticker.tick().await;
        let messages = match collector.collect().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "route collection failed");
                continue;
            }
        };
        debug!(count = messages.len(), "collected route messages");
        if let Err(e) = send_all(messages, &tx).await {
            info!(reason = %e, "route collector stopped");
            return;
        }
    }
}

/// Translate StatefulSet and pod watch streams into route change messages
///
/// Returns when both streams end or the channel closes.
pub async fn run_change_watcher<S, P>(
    handler: RouteChangeHandler,
    statefulsets: S,
    pods: P,
    tx: mpsc::Sender<RouteMessage>,
) where
    S: Stream<Item = std::result::Result<Event<StatefulSet>, watcher::Error>>,
    P: Stream<Item = std::result::Result<Event<Pod>, watcher::Error>>,
{
    let mut statefulsets = std::pin::pin!(statefulsets);
    let mut pods = std::pin::pin!(pods);
    let mut statefulset_cache = WatchCache::<StatefulSet>::new();
    let mut pod_cache = WatchCache::<Pod>::new();

    info!("route change watcher started");

    loop {
        let messages = tokio::select! {
            Some(event) = statefulsets.next() => {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "statefulset watch error");
                        continue;
                    }
                };
                let mut messages = Vec::new();
                for change in statefulset_cache.apply(event) {
                    match handler.handle_statefulset(change).await {
                        Ok(m) => messages.extend(m),
                        Err(e) => warn!(error = %e, "failed to handle statefulset change"),
                    }
                }
                messages
            }
            Some(event) = pods.next() => {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "pod watch error");
                        continue;
                    }
                };
                let mut messages = Vec::new();
                for change in pod_cache.apply(event) {
                    match handler.handle_pod(change).await {
                        Ok(m) => messages.extend(m),
                        Err(e) => warn!(error = %e, "failed to handle pod change"),
                    }
                }
                messages
            }
            else => break,
        };

        if let Err(e) = send_all(messages, &tx).await {
            info!(reason = %e, "route change watcher stopped");
            return;
        }
    }

    info!("route change watcher stopped");
}
