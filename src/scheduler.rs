//! # Periodic Transport Scheduler
//!
//! Drives a transport's delivery cycle on two independent fixed-rate
//! timers: a send task running `send_messages` followed by
//! `invoke_callbacks`, and a receive task running `handle_message`. The
//! tick body is awaited inline, so successive firings of the same task
//! never overlap; a firing that comes due mid-execution is deferred until
//! the running one completes. The two tasks run concurrently with each
//! other.
//!
//! Tick errors are logged and absorbed. Connectivity failures need no
//! handling here because the transport keeps the affected packets staged
//! for the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// Owns the two periodic tasks for one open transport.
#[derive(Debug)]
pub struct TransportScheduler {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handles: Vec<JoinHandle<()>>,
}

impl TransportScheduler {
    /// Spawns the send and receive tasks against the transport.
    pub fn start(
        transport: Arc<dyn Transport>,
        send_period: Duration,
        receive_period: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        info!(
            protocol = %transport.protocol(),
            send_period_ms = send_period.as_millis() as u64,
            receive_period_ms = receive_period.as_millis() as u64,
            "🚀 Transport scheduler started"
        );

        let send_handle = tokio::spawn(run_send_task(
            Arc::clone(&transport),
            send_period,
            Arc::clone(&running),
            Arc::clone(&shutdown),
        ));
        let receive_handle = tokio::spawn(run_receive_task(
            transport,
            receive_period,
            Arc::clone(&running),
            Arc::clone(&shutdown),
        ));

        Self {
            running,
            shutdown,
            handles: vec![send_handle, receive_handle],
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops both tasks and waits for their current tick, if any, to
    /// finish.
    pub async fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task did not shut down cleanly");
            }
        }
        info!("✅ Transport scheduler stopped");
    }
}

async fn run_send_task(
    transport: Arc<dyn Transport>,
    period: Duration,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while running.load(Ordering::Acquire) {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                if let Err(e) = transport.send_messages().await {
                    warn!(error = %e, "⚠️ Send tick failed; queued messages are retained");
                }
                if let Err(e) = transport.invoke_callbacks().await {
                    warn!(error = %e, "⚠️ Callback tick failed");
                }
            }
        }
    }
    debug!("Send task stopped");
}

async fn run_receive_task(
    transport: Arc<dyn Transport>,
    period: Duration,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while running.load(Ordering::Acquire) {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {
                if let Err(e) = transport.handle_message().await {
                    warn!(error = %e, "⚠️ Receive tick failed");
                }
            }
        }
    }
    debug!("Receive task stopped");
}
