use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::status::{BookingStatus, StatusMeta};

/// Whole minutes; every duration in the booking domain is minute-grained.
pub type Minutes = u32;

/// Half-open time-of-day interval `[start, end)` on a single calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// `[start, start + minutes)`, or `None` if that would run past midnight.
    pub fn starting_at(start: NaiveTime, minutes: Minutes) -> Option<Self> {
        if minutes == 0 {
            return None;
        }
        let (end, wrapped) = start.overflowing_add_signed(TimeDelta::minutes(minutes as i64));
        if wrapped != 0 {
            return None;
        }
        Self::try_new(start, end)
    }

    pub fn duration_minutes(&self) -> Minutes {
        (self.end - self.start).num_minutes() as Minutes
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// `HH:MM` serde for `NaiveTime`. Seconds are accepted on input and dropped
/// on output.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(t: &NaiveTime) -> String {
        t.format("%H:%M").to_string()
    }

    pub fn parse(s: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(s, "%H:%M").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(|e| serde::de::Error::custom(format!("bad time {raw:?}: {e}")))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => s.serialize_some(&super::format(t)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| {
                    super::parse(&raw)
                        .map_err(|e| serde::de::Error::custom(format!("bad time {raw:?}: {e}")))
                })
                .transpose()
        }
    }
}

// ── Calendar ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }

    /// Monday = 0.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-weekday working flags of a post's custom schedule. Days missing from
/// the input map are non-working; at least one day must be working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<DayOfWeek, bool>", into = "BTreeMap<DayOfWeek, bool>")]
pub struct WorkingDays([bool; 7]);

impl WorkingDays {
    pub fn only(days: &[DayOfWeek]) -> Result<Self, String> {
        Self::try_from(days.iter().map(|d| (*d, true)).collect::<BTreeMap<_, _>>())
    }

    pub fn works_on(&self, day: DayOfWeek) -> bool {
        self.0[day.index()]
    }
}

impl TryFrom<BTreeMap<DayOfWeek, bool>> for WorkingDays {
    type Error = String;

    fn try_from(map: BTreeMap<DayOfWeek, bool>) -> Result<Self, Self::Error> {
        let mut days = [false; 7];
        for (day, working) in map {
            days[day.index()] = working;
        }
        if !days.contains(&true) {
            return Err("working_days must mark at least one working day".into());
        }
        Ok(Self(days))
    }
}

impl From<WorkingDays> for BTreeMap<DayOfWeek, bool> {
    fn from(w: WorkingDays) -> Self {
        DayOfWeek::ALL.iter().map(|d| (*d, w.works_on(*d))).collect()
    }
}

/// Nominal working window of a service point or post on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayWindow {
    Closed,
    Open(Span),
}

impl DayWindow {
    pub fn is_closed(&self) -> bool {
        matches!(self, DayWindow::Closed)
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            DayWindow::Closed => None,
            DayWindow::Open(span) => Some(*span),
        }
    }

    pub fn admits(&self, request: &Span) -> bool {
        self.span().is_some_and(|w| w.contains_span(request))
    }
}

// ── Service points and posts ─────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    #[default]
    Active,
    TemporarilyClosed,
    Closed,
    Maintenance,
    Suspended,
}

impl PointStatus {
    pub fn accepts_bookings(self) -> bool {
        self == PointStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePoint {
    pub id: Ulid,
    pub partner_id: Ulid,
    pub name: String,
    pub city_id: Option<Ulid>,
    pub location: Option<GeoLocation>,
    pub default_slot_duration: Minutes,
    pub status: PointStatus,
    /// Categories whose services are offered here.
    pub offered_categories: BTreeSet<Ulid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSchedule {
    pub working_days: WorkingDays,
    pub custom_hours: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePost {
    pub id: Ulid,
    pub service_point_id: Ulid,
    pub post_number: u32,
    pub name: String,
    pub slot_duration: Minutes,
    pub active: bool,
    pub category_id: Option<Ulid>,
    pub custom_schedule: Option<CustomSchedule>,
}

impl ServicePost {
    pub fn has_custom_schedule(&self) -> bool {
        self.custom_schedule.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    pub day: DayOfWeek,
    pub is_working_day: bool,
    #[serde(default, with = "hhmm::option")]
    pub opening_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    pub closing_time: Option<NaiveTime>,
}

impl ScheduleTemplate {
    pub fn working(day: DayOfWeek, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            day,
            is_working_day: true,
            opening_time: Some(open),
            closing_time: Some(close),
        }
    }

    pub fn day_off(day: DayOfWeek) -> Self {
        Self {
            day,
            is_working_day: false,
            opening_time: None,
            closing_time: None,
        }
    }

    pub fn window(&self) -> DayWindow {
        match (self.is_working_day, self.opening_time, self.closing_time) {
            (true, Some(open), Some(close)) => {
                Span::try_new(open, close).map_or(DayWindow::Closed, DayWindow::Open)
            }
            _ => DayWindow::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleException {
    pub date: NaiveDate,
    pub is_closed: bool,
    #[serde(default, with = "hhmm::option")]
    pub opening_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    pub closing_time: Option<NaiveTime>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ScheduleException {
    pub fn closed(date: NaiveDate) -> Self {
        Self {
            date,
            is_closed: true,
            opening_time: None,
            closing_time: None,
            reason: None,
        }
    }

    pub fn custom_hours(date: NaiveDate, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            date,
            is_closed: false,
            opening_time: Some(open),
            closing_time: Some(close),
            reason: None,
        }
    }

    pub fn window(&self) -> DayWindow {
        if self.is_closed {
            return DayWindow::Closed;
        }
        match (self.opening_time, self.closing_time) {
            (Some(open), Some(close)) => {
                Span::try_new(open, close).map_or(DayWindow::Closed, DayWindow::Open)
            }
            _ => DayWindow::Closed,
        }
    }
}

fn default_slot_duration() -> Minutes {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewServicePoint {
    pub partner_id: Ulid,
    pub name: String,
    #[serde(default)]
    pub city_id: Option<Ulid>,
    #[serde(default)]
    pub location: Option<GeoLocation>,
    #[serde(default = "default_slot_duration")]
    pub default_slot_duration: Minutes,
    #[serde(default)]
    pub status: PointStatus,
    #[serde(default)]
    pub offered_categories: BTreeSet<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub post_number: u32,
    /// Defaults to "Post <number>".
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to the point's default slot duration.
    #[serde(default)]
    pub slot_duration: Option<Minutes>,
    #[serde(default)]
    pub category_id: Option<Ulid>,
    #[serde(default)]
    pub custom_schedule: Option<CustomSchedule>,
}

/// Partial post update. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slot_duration: Option<Minutes>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub category_id: Option<Ulid>,
    #[serde(default)]
    pub clear_category: bool,
    #[serde(default)]
    pub custom_schedule: Option<CustomSchedule>,
    #[serde(default)]
    pub clear_custom_schedule: bool,
}

/// Catalog entry used for line-item price fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: Ulid,
    pub name: String,
    pub category_id: Option<Ulid>,
    pub base_price: Decimal,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: Ulid,
    /// Owner; `None` for cars registered without a client account.
    #[serde(default)]
    pub client_id: Option<Ulid>,
    #[serde(default)]
    pub car_type_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Ulid,
    pub service_id: Ulid,
    pub price: Decimal,
    pub quantity: u32,
}

impl LineItem {
    pub fn total_price(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub service_point_id: Ulid,
    pub client_id: Option<Ulid>,
    pub car: Option<Car>,
    pub category_id: Option<Ulid>,
    pub booking_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub cancellation_reason: Option<String>,
    pub recipient: Contact,
    pub notes: Option<String>,
    pub line_items: Vec<LineItem>,
    pub total_price: Decimal,
    pub review: Option<Review>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    /// Guest bookings carry no client account, only recipient contacts.
    pub fn is_guest(&self) -> bool {
        self.client_id.is_none()
    }

    pub fn line_items_total(&self) -> Decimal {
        self.line_items.iter().map(LineItem::total_price).sum()
    }

    /// Recompute `total_price` from line items and return it.
    pub fn update_total_price(&mut self) -> Decimal {
        self.total_price = self.line_items_total();
        self.total_price
    }
}

/// A requested line item; the price is resolved when `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub service_id: Ulid,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<Decimal>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub service_point_id: Ulid,
    #[serde(default)]
    pub client_id: Option<Ulid>,
    #[serde(default)]
    pub car: Option<Car>,
    #[serde(default)]
    pub category_id: Option<Ulid>,
    pub booking_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    /// Defaults to `start_time` plus the point's default slot duration.
    #[serde(default, with = "hhmm::option")]
    pub end_time: Option<NaiveTime>,
    /// Initial status; anything but `pending` needs `skip_status_validation`.
    #[serde(default)]
    pub status: Option<BookingStatus>,
    pub recipient: Contact,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceRequest>,
}

/// Explicit bypass switches for booking validation. Passed at every call
/// site instead of living in process-wide state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    #[serde(default)]
    pub skip_availability_check: bool,
    #[serde(default)]
    pub skip_status_validation: bool,
}

impl ValidationPolicy {
    pub fn strict() -> Self {
        Self::default()
    }

    /// Fixture/import path: skip both capacity and status checks.
    pub fn bypass_all() -> Self {
        Self {
            skip_availability_check: true,
            skip_status_validation: true,
        }
    }
}

// ── WAL record format ────────────────────────────────────────────

/// Every durable mutation. Flat, one variant per change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PointCreated {
        point: ServicePoint,
    },
    PointStatusChanged {
        id: Ulid,
        status: PointStatus,
    },
    OfferedCategoriesSet {
        id: Ulid,
        categories: BTreeSet<Ulid>,
    },
    PostUpserted {
        post: ServicePost,
    },
    TemplateSet {
        point_id: Ulid,
        template: ScheduleTemplate,
    },
    ExceptionSet {
        point_id: Ulid,
        exception: ScheduleException,
    },
    ExceptionRemoved {
        point_id: Ulid,
        date: NaiveDate,
    },
    ServiceRegistered {
        service: ServiceInfo,
    },
    StatusMetaSet {
        status: BookingStatus,
        meta: StatusMeta,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        point_id: Ulid,
        date: NaiveDate,
        span: Span,
        at: DateTime<Utc>,
    },
    BookingTransitioned {
        id: Ulid,
        point_id: Ulid,
        to: BookingStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    LineItemAdded {
        booking_id: Ulid,
        point_id: Ulid,
        item: LineItem,
        at: DateTime<Utc>,
    },
    LineItemRemoved {
        booking_id: Ulid,
        point_id: Ulid,
        item_id: Ulid,
        at: DateTime<Utc>,
    },
    ReviewAttached {
        point_id: Ulid,
        review: Review,
    },
}

impl Event {
    /// The service point whose state this event mutates, if any.
    pub fn point_id(&self) -> Option<Ulid> {
        match self {
            Event::PointCreated { point } => Some(point.id),
            Event::PointStatusChanged { id, .. } | Event::OfferedCategoriesSet { id, .. } => Some(*id),
            Event::PostUpserted { post } => Some(post.service_point_id),
            Event::TemplateSet { point_id, .. }
            | Event::ExceptionSet { point_id, .. }
            | Event::ExceptionRemoved { point_id, .. }
            | Event::BookingRescheduled { point_id, .. }
            | Event::BookingTransitioned { point_id, .. }
            | Event::LineItemAdded { point_id, .. }
            | Event::LineItemRemoved { point_id, .. }
            | Event::ReviewAttached { point_id, .. } => Some(*point_id),
            Event::BookingCreated { booking } => Some(booking.service_point_id),
            Event::ServiceRegistered { .. } | Event::StatusMetaSet { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Externally observable answer of an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub available: bool,
    pub total_posts: u32,
    pub occupied_posts: u32,
    pub available_posts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Raw capacity figures for one window. `available_posts` may be negative
/// internally; callers only ever see it clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub total_posts: u32,
    pub occupied_posts: u32,
}

impl Capacity {
    pub fn available_posts(&self) -> i64 {
        self.total_posts as i64 - self.occupied_posts as i64
    }

    pub fn has_room(&self) -> bool {
        self.available_posts() > 0
    }
}

/// A post together with its resolved working window for a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostWindow {
    pub post_id: Ulid,
    pub post_number: u32,
    pub slot_duration: Minutes,
    pub has_custom_schedule: bool,
    pub window: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub available_posts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn span_basics() {
        let s = Span::new(t(10, 0), t(10, 30));
        assert_eq!(s.duration_minutes(), 30);
        assert!(s.contains_instant(t(10, 0)));
        assert!(s.contains_instant(t(10, 29)));
        assert!(!s.contains_instant(t(10, 30))); // half-open
    }

    #[test]
    fn span_overlap_is_strict() {
        let a = Span::new(t(9, 0), t(10, 0));
        let b = Span::new(t(9, 30), t(10, 30));
        let c = Span::new(t(10, 0), t(11, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_starting_at_refuses_midnight_wrap() {
        assert_eq!(
            Span::starting_at(t(17, 30), 30),
            Some(Span::new(t(17, 30), t(18, 0)))
        );
        assert_eq!(Span::starting_at(t(23, 45), 30), None);
        assert_eq!(Span::starting_at(t(10, 0), 0), None);
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(t(9, 0), t(18, 0));
        assert!(outer.contains_span(&Span::new(t(9, 0), t(9, 30))));
        assert!(outer.contains_span(&Span::new(t(17, 30), t(18, 0))));
        assert!(!outer.contains_span(&Span::new(t(17, 45), t(18, 15))));
        assert!(!outer.contains_span(&Span::new(t(8, 45), t(9, 15))));
    }

    #[test]
    fn day_of_week_from_date() {
        // 2024-01-01 was a Monday.
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(DayOfWeek::of(monday), DayOfWeek::Monday);
        assert_eq!(DayOfWeek::of(monday.succ_opt().unwrap()), DayOfWeek::Tuesday);
        assert_eq!(DayOfWeek::Sunday.index(), 6);
    }

    #[test]
    fn working_days_require_one_working_day() {
        let json = r#"{"monday": false}"#;
        assert!(serde_json::from_str::<WorkingDays>(json).is_err());

        let json = r#"{"monday": false, "tuesday": true}"#;
        let days: WorkingDays = serde_json::from_str(json).unwrap();
        assert!(!days.works_on(DayOfWeek::Monday));
        assert!(days.works_on(DayOfWeek::Tuesday));
        assert!(!days.works_on(DayOfWeek::Sunday));
    }

    #[test]
    fn working_days_reject_unknown_keys() {
        let json = r#"{"funday": true}"#;
        assert!(serde_json::from_str::<WorkingDays>(json).is_err());
    }

    #[test]
    fn custom_hours_parse_hhmm() {
        let json = r#"{"working_days": {"friday": true}, "custom_hours": {"start": "08:00", "end": "12:30"}}"#;
        let schedule: CustomSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.custom_hours, Span::new(t(8, 0), t(12, 30)));
        let back = serde_json::to_value(schedule).unwrap();
        assert_eq!(back["custom_hours"]["end"], "12:30");
    }

    #[test]
    fn template_window_requires_both_times() {
        let tpl = ScheduleTemplate::working(DayOfWeek::Monday, t(9, 0), t(18, 0));
        assert_eq!(tpl.window(), DayWindow::Open(Span::new(t(9, 0), t(18, 0))));
        let broken = ScheduleTemplate {
            closing_time: None,
            ..tpl
        };
        assert!(broken.window().is_closed());
        assert!(ScheduleTemplate::day_off(DayOfWeek::Sunday).window().is_closed());
    }

    #[test]
    fn line_item_totals() {
        let mut booking_items = vec![
            LineItem {
                id: Ulid::new(),
                service_id: Ulid::new(),
                price: Decimal::new(500, 0),
                quantity: 2,
            },
            LineItem {
                id: Ulid::new(),
                service_id: Ulid::new(),
                price: Decimal::new(300, 0),
                quantity: 1,
            },
        ];
        assert_eq!(booking_items[0].total_price(), Decimal::new(1000, 0));
        let sum: Decimal = booking_items.iter().map(LineItem::total_price).sum();
        assert_eq!(sum, Decimal::new(1300, 0));
        booking_items.clear();
        let empty: Decimal = booking_items.iter().map(LineItem::total_price).sum();
        assert_eq!(empty, Decimal::ZERO);
    }

    #[test]
    fn event_survives_wal_codec() {
        let event = Event::TemplateSet {
            point_id: Ulid::new(),
            template: ScheduleTemplate::working(DayOfWeek::Friday, t(8, 0), t(20, 0)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
