use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::command::Command;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: availability checks. Labels: result.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "tireslot_availability_checks_total";

/// Histogram: availability check latency in seconds.
pub const AVAILABILITY_CHECK_DURATION_SECONDS: &str = "tireslot_availability_check_duration_seconds";

pub const BOOKINGS_CREATED_TOTAL: &str = "tireslot_bookings_created_total";

/// Counter: bookings refused by availability. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "tireslot_bookings_rejected_total";

/// Counter: lifecycle transitions. Labels: event.
pub const TRANSITIONS_TOTAL: &str = "tireslot_transitions_total";

/// Counter: bookings moved to a new date or window.
pub const RESCHEDULES_TOTAL: &str = "tireslot_reschedules_total";

/// Counter: queued notifications and metric recomputations. Labels: kind.
pub const DISPATCHES_TOTAL: &str = "tireslot_dispatches_total";

/// Counter: dispatches lost to a lagging consumer.
pub const DISPATCHES_DROPPED_TOTAL: &str = "tireslot_dispatches_dropped_total";

// ── Driver ──────────────────────────────────────────────────────

/// Counter: commands handled. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "tireslot_requests_total";

/// Histogram: command latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "tireslot_request_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

pub const WAL_FLUSH_DURATION_SECONDS: &str = "tireslot_wal_flush_duration_seconds";

/// Histogram: events per group commit.
pub const WAL_FLUSH_BATCH_SIZE: &str = "tireslot_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateServicePoint(_) => "create_service_point",
        Command::SetPointStatus { .. } => "set_point_status",
        Command::SetOfferedCategories { .. } => "set_offered_categories",
        Command::AddPost { .. } => "add_post",
        Command::UpdatePost { .. } => "update_post",
        Command::SetScheduleTemplate { .. } => "set_schedule_template",
        Command::SetScheduleException { .. } => "set_schedule_exception",
        Command::RemoveScheduleException { .. } => "remove_schedule_exception",
        Command::RegisterService { .. } => "register_service",
        Command::SetStatusMeta { .. } => "set_status_meta",
        Command::ResolveWindow { .. } => "resolve_window",
        Command::PostsFor { .. } => "posts_for",
        Command::CheckAvailability(_) => "check_availability",
        Command::NextAvailableSlot { .. } => "next_available_slot",
        Command::DaySlots { .. } => "day_slots",
        Command::CreateBooking { .. } => "create_booking",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::Transition { .. } => "transition",
        Command::MayTransition { .. } => "may_transition",
        Command::AddLineItem { .. } => "add_line_item",
        Command::RemoveLineItem { .. } => "remove_line_item",
        Command::UpdateTotalPrice { .. } => "update_total_price",
        Command::AttachReview { .. } => "attach_review",
        Command::GetBooking { .. } => "get_booking",
        Command::ListBookings { .. } => "list_bookings",
        Command::ClientBookings { .. } => "client_bookings",
        Command::GetPoint { .. } => "get_point",
        Command::StatusMeta { .. } => "status_meta",
    }
}
