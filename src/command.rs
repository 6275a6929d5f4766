//! JSON-lines command surface. One JSON object per line, tagged by `"op"`.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::AvailabilityQuery;
use crate::model::*;
use crate::status::{BookingEvent, BookingStatus, StatusMeta};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateServicePoint(NewServicePoint),
    SetPointStatus {
        service_point_id: Ulid,
        status: PointStatus,
    },
    SetOfferedCategories {
        service_point_id: Ulid,
        categories: BTreeSet<Ulid>,
    },
    AddPost {
        service_point_id: Ulid,
        post: NewPost,
    },
    UpdatePost {
        service_point_id: Ulid,
        post_id: Ulid,
        update: PostUpdate,
    },
    SetScheduleTemplate {
        service_point_id: Ulid,
        template: ScheduleTemplate,
    },
    SetScheduleException {
        service_point_id: Ulid,
        exception: ScheduleException,
    },
    RemoveScheduleException {
        service_point_id: Ulid,
        date: NaiveDate,
    },
    RegisterService {
        name: String,
        #[serde(default)]
        category_id: Option<Ulid>,
        base_price: Decimal,
    },
    SetStatusMeta {
        status: BookingStatus,
        meta: StatusMeta,
    },
    ResolveWindow {
        service_point_id: Ulid,
        date: NaiveDate,
    },
    PostsFor {
        service_point_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        category_id: Option<Ulid>,
    },
    CheckAvailability(AvailabilityQuery),
    NextAvailableSlot {
        service_point_id: Ulid,
        date: NaiveDate,
        #[serde(default, with = "hhmm::option")]
        preferred_time: Option<NaiveTime>,
        #[serde(default)]
        duration_minutes: Option<Minutes>,
        #[serde(default)]
        category_id: Option<Ulid>,
    },
    DaySlots {
        service_point_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        category_id: Option<Ulid>,
    },
    CreateBooking {
        booking: NewBooking,
        #[serde(default)]
        policy: ValidationPolicy,
    },
    RescheduleBooking {
        booking_id: Ulid,
        booking_date: NaiveDate,
        #[serde(with = "hhmm")]
        start_time: NaiveTime,
        #[serde(default, with = "hhmm::option")]
        end_time: Option<NaiveTime>,
        #[serde(default)]
        policy: ValidationPolicy,
    },
    Transition {
        booking_id: Ulid,
        event: BookingEvent,
        #[serde(default)]
        reason: Option<String>,
    },
    MayTransition {
        booking_id: Ulid,
        event: BookingEvent,
    },
    AddLineItem {
        booking_id: Ulid,
        service: ServiceRequest,
    },
    RemoveLineItem {
        booking_id: Ulid,
        item_id: Ulid,
    },
    UpdateTotalPrice {
        booking_id: Ulid,
    },
    AttachReview {
        booking_id: Ulid,
        rating: u8,
        #[serde(default)]
        comment: Option<String>,
    },
    GetBooking {
        booking_id: Ulid,
    },
    ListBookings {
        service_point_id: Ulid,
        date: NaiveDate,
    },
    ClientBookings {
        client_id: Ulid,
    },
    GetPoint {
        service_point_id: Ulid,
    },
    StatusMeta {
        status: BookingStatus,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parse one input line. Blank lines are `Empty`, not parse errors.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}
