// Copyright (c) 2026 vlink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Frame fanout: one decoded frame, N isolated sinks.
//!
//! Built on a broadcast channel: each sink owns a bounded receiver
//! (depth 256), so a slow sink lags and sheds its *oldest* frames
//! without ever blocking the receiver or its sibling sinks. Per-sink
//! ordering follows production order; nothing is guaranteed across
//! sinks.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use vlink_core::error::VlinkResult;
use vlink_core::TelemetryFrame;

/// Per-sink queue depth.
pub const SINK_QUEUE_DEPTH: usize = 256;

/// Delivery counters for one sink.
#[derive(Debug)]
pub struct SinkStats {
    pub name: String,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl SinkStats {
    fn new(name: &str) -> Self {
        SinkStats {
            name: name.to_string(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct FrameFanout {
    tx: broadcast::Sender<Arc<TelemetryFrame>>,
    stats: parking_lot::Mutex<Vec<Arc<SinkStats>>>,
}

impl Default for FrameFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFanout {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SINK_QUEUE_DEPTH);
        FrameFanout {
            tx,
            stats: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Deliver a frame to every registered sink. Never blocks.
    pub fn publish(&self, frame: TelemetryFrame) {
        // Send fails only with zero receivers; that is a valid idle state.
        let _ = self.tx.send(Arc::new(frame));
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.tx.receiver_count()
    }

    #[must_use]
    pub fn stats(&self) -> Vec<Arc<SinkStats>> {
        self.stats.lock().clone()
    }

    /// Register a sink. The handler runs on its own task; its errors
    /// are counted and logged, never propagated. The task drains its
    /// queue and exits once the fanout is dropped.
    pub fn spawn_sink<F, Fut>(&self, name: &str, mut handler: F) -> (Arc<SinkStats>, JoinHandle<()>)
    where
        F: FnMut(Arc<TelemetryFrame>) -> Fut + Send + 'static,
        Fut: Future<Output = VlinkResult<()>> + Send,
    {
        let stats = Arc::new(SinkStats::new(name));
        self.stats.lock().push(stats.clone());
        let mut rx = self.tx.subscribe();
        let sink_stats = stats.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        match handler(frame).await {
                            Ok(()) => {
                                sink_stats.delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                sink_stats.failed.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(sink=%sink_stats.name, error=%err, "sink failed for frame");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        sink_stats.dropped.fetch_add(n, Ordering::Relaxed);
                        tracing::warn!(sink=%sink_stats.name, lagged=%n, "sink shed oldest frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(sink=%sink_stats.name, "sink drained and stopped");
        });
        (stats, handle)
    }
}
