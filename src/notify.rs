//! Fire-and-forget side effects of booking changes.
//!
//! The engine pushes [`Dispatch`] values into a broadcast channel after a
//! change is durable; a separate task drains them into a [`DispatchSink`].
//! Sending never blocks, and a slow consumer loses the oldest entries
//! instead of stalling bookings.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use ulid::Ulid;

use crate::observability;
use crate::status::BookingStatus;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    BookingCompleted,
}

impl NotificationKind {
    /// Notification owed for entering `status`, if any.
    pub fn for_status(status: BookingStatus) -> Option<Self> {
        match status {
            BookingStatus::Confirmed => Some(NotificationKind::BookingConfirmed),
            BookingStatus::Completed => Some(NotificationKind::BookingCompleted),
            BookingStatus::CanceledByClient | BookingStatus::CanceledByPartner => {
                Some(NotificationKind::BookingCancelled)
            }
            BookingStatus::Pending | BookingStatus::InProgress | BookingStatus::NoShow => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::BookingCreated => "booking_created",
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::BookingCompleted => "booking_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Notify {
        booking_id: Ulid,
        service_point_id: Ulid,
        kind: NotificationKind,
    },
    RecalculateMetrics {
        service_point_id: Ulid,
    },
}

impl Dispatch {
    fn label(&self) -> &'static str {
        match self {
            Dispatch::Notify { kind, .. } => kind.as_str(),
            Dispatch::RecalculateMetrics { .. } => "recalculate_metrics",
        }
    }
}

pub struct NotifyHub {
    tx: broadcast::Sender<Dispatch>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Dispatch> {
        self.tx.subscribe()
    }

    /// No-op when nobody is subscribed.
    pub fn send(&self, dispatch: Dispatch) {
        let label = dispatch.label();
        if self.tx.send(dispatch).is_ok() {
            metrics::counter!(observability::DISPATCHES_TOTAL, "kind" => label).increment(1);
        }
    }
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver of dispatched side effects (mailer, push, metrics job).
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn notify(&self, booking_id: Ulid, kind: NotificationKind) -> Result<(), SinkError>;
    async fn recalculate_metrics(&self, service_point_id: Ulid) -> Result<(), SinkError>;
}

/// Logs every dispatch and does nothing else.
pub struct LogSink;

#[async_trait]
impl DispatchSink for LogSink {
    async fn notify(&self, booking_id: Ulid, kind: NotificationKind) -> Result<(), SinkError> {
        info!("notify {} for booking {booking_id}", kind.as_str());
        Ok(())
    }

    async fn recalculate_metrics(&self, service_point_id: Ulid) -> Result<(), SinkError> {
        info!("recalculate metrics for service point {service_point_id}");
        Ok(())
    }
}

/// Drain `rx` into `sink` until the hub is dropped. Sink failures are logged
/// and never retried.
pub async fn run_dispatcher(mut rx: broadcast::Receiver<Dispatch>, sink: Arc<dyn DispatchSink>) {
    loop {
        let dispatch = match rx.recv().await {
            Ok(d) => d,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("dispatcher lagged, {missed} dispatches dropped");
                metrics::counter!(observability::DISPATCHES_DROPPED_TOTAL).increment(missed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let result = match &dispatch {
            Dispatch::Notify {
                booking_id, kind, ..
            } => sink.notify(*booking_id, *kind).await,
            Dispatch::RecalculateMetrics { service_point_id } => {
                sink.recalculate_metrics(*service_point_id).await
            }
        };
        if let Err(e) = result {
            warn!("dispatch {} failed: {e}", dispatch.label());
        }
    }
}
