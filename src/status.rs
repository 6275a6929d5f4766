//! Booking lifecycle states and the transition table.
//!
//! The set of states is closed and the legal moves are compiled in. Display
//! metadata (description, color, sort order) lives separately in
//! [`StatusCatalog`], keyed by the same variant, so it can be changed at
//! runtime without touching the state machine.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    CanceledByClient,
    CanceledByPartner,
    NoShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    Confirm,
    StartService,
    Complete,
    CancelByClient,
    CancelByPartner,
    MarkNoShow,
}

/// Runtime grouping used by capacity counting and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGroup {
    Active,
    Completed,
    Canceled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::CanceledByClient,
        BookingStatus::CanceledByPartner,
        BookingStatus::NoShow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::CanceledByClient => "canceled_by_client",
            BookingStatus::CanceledByPartner => "canceled_by_partner",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn group(self) -> StatusGroup {
        match self {
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress => {
                StatusGroup::Active
            }
            BookingStatus::Completed => StatusGroup::Completed,
            BookingStatus::CanceledByClient
            | BookingStatus::CanceledByPartner
            | BookingStatus::NoShow => StatusGroup::Canceled,
        }
    }

    /// Whether a booking in this status holds a post for its window.
    /// No-shows are grouped with cancellations and free their post.
    pub fn occupies_capacity(self) -> bool {
        self.group() != StatusGroup::Canceled
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::CanceledByClient
                | BookingStatus::CanceledByPartner
                | BookingStatus::NoShow
        )
    }

    /// Target of `event` from this status, if the move is in the table.
    pub fn target(self, event: BookingEvent) -> Option<BookingStatus> {
        use BookingEvent as E;
        use BookingStatus as S;
        match (self, event) {
            (S::Pending, E::Confirm) => Some(S::Confirmed),
            (S::Confirmed, E::StartService) => Some(S::InProgress),
            (S::Confirmed | S::InProgress, E::Complete) => Some(S::Completed),
            (S::Pending | S::Confirmed, E::CancelByClient) => Some(S::CanceledByClient),
            (S::Pending | S::Confirmed, E::CancelByPartner) => Some(S::CanceledByPartner),
            (S::Confirmed, E::MarkNoShow) => Some(S::NoShow),
            _ => None,
        }
    }

    /// The `may_<event>?` predicate.
    pub fn may(self, event: BookingEvent) -> bool {
        self.target(event).is_some()
    }

    pub fn fire(self, event: BookingEvent) -> Result<BookingStatus, TransitionNotAllowed> {
        self.target(event).ok_or(TransitionNotAllowed { from: self, event })
    }

    /// Events that are legal from this status, in declaration order.
    pub fn allowed_events(self) -> Vec<BookingEvent> {
        BookingEvent::ALL
            .into_iter()
            .filter(|e| self.may(*e))
            .collect()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl BookingEvent {
    pub const ALL: [BookingEvent; 6] = [
        BookingEvent::Confirm,
        BookingEvent::StartService,
        BookingEvent::Complete,
        BookingEvent::CancelByClient,
        BookingEvent::CancelByPartner,
        BookingEvent::MarkNoShow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BookingEvent::Confirm => "confirm",
            BookingEvent::StartService => "start_service",
            BookingEvent::Complete => "complete",
            BookingEvent::CancelByClient => "cancel_by_client",
            BookingEvent::CancelByPartner => "cancel_by_partner",
            BookingEvent::MarkNoShow => "mark_no_show",
        }
    }
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transition not allowed: {event} from {from}")]
pub struct TransitionNotAllowed {
    pub from: BookingStatus,
    pub event: BookingEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMeta {
    pub description: String,
    pub color: String,
    pub sort_order: u32,
}

impl StatusMeta {
    pub fn default_for(status: BookingStatus) -> Self {
        let (description, color) = match status {
            BookingStatus::Pending => ("Awaiting confirmation", "#FFC107"),
            BookingStatus::Confirmed => ("Confirmed by the service point", "#2196F3"),
            BookingStatus::InProgress => ("Service in progress", "#9C27B0"),
            BookingStatus::Completed => ("Service completed", "#4CAF50"),
            BookingStatus::CanceledByClient => ("Canceled by the client", "#F44336"),
            BookingStatus::CanceledByPartner => ("Canceled by the partner", "#E91E63"),
            BookingStatus::NoShow => ("Client did not show up", "#795548"),
        };
        let sort_order = BookingStatus::ALL
            .iter()
            .position(|s| *s == status)
            .map_or(0, |p| p as u32 + 1);
        Self {
            description: description.to_string(),
            color: color.to_string(),
            sort_order,
        }
    }
}

/// Display metadata per status. Rows are provisioned with defaults the first
/// time they are read, so a missing row never blocks a transition.
pub struct StatusCatalog {
    rows: DashMap<BookingStatus, StatusMeta>,
}

impl Default for StatusCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCatalog {
    pub fn new() -> Self {
        Self { rows: DashMap::new() }
    }

    pub fn meta(&self, status: BookingStatus) -> StatusMeta {
        self.rows
            .entry(status)
            .or_insert_with(|| {
                tracing::debug!("provisioning default status row for {status}");
                StatusMeta::default_for(status)
            })
            .value()
            .clone()
    }

    pub fn set(&self, status: BookingStatus, meta: StatusMeta) {
        self.rows.insert(status, meta);
    }

    pub fn is_provisioned(&self, status: BookingStatus) -> bool {
        self.rows.contains_key(&status)
    }

    /// Explicitly stored rows, for WAL compaction.
    pub fn overrides(&self) -> Vec<(BookingStatus, StatusMeta)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|e| *e.value() != StatusMeta::default_for(*e.key()))
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rows.sort_by_key(|(_, m)| m.sort_order);
        rows
    }
}
