use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// A capacity-holding booking on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub booking_id: Ulid,
    pub span: Span,
    pub category_id: Option<Ulid>,
}

/// Everything the engine knows about one service point. Guarded by a single
/// `RwLock`; the write guard is the critical section for booking inserts.
#[derive(Debug, Clone)]
pub struct PointState {
    pub point: ServicePoint,
    /// Ordered by `post_number`.
    pub posts: Vec<ServicePost>,
    /// Indexed by `DayOfWeek::index()`.
    pub templates: [Option<ScheduleTemplate>; 7],
    pub exceptions: BTreeMap<NaiveDate, ScheduleException>,
    pub bookings: HashMap<Ulid, Booking>,
    /// Per date, only bookings whose status occupies capacity, sorted by
    /// `span.start`.
    ledger: BTreeMap<NaiveDate, Vec<LedgerEntry>>,
}

impl PointState {
    pub fn new(point: ServicePoint) -> Self {
        Self {
            point,
            posts: Vec::new(),
            templates: [None; 7],
            exceptions: BTreeMap::new(),
            bookings: HashMap::new(),
            ledger: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.point.id
    }

    /// Derived post count: active posts only.
    pub fn posts_count(&self) -> usize {
        self.posts.iter().filter(|p| p.active).count()
    }

    pub fn post(&self, id: Ulid) -> Option<&ServicePost> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn post_by_number(&self, number: u32) -> Option<&ServicePost> {
        self.posts.iter().find(|p| p.post_number == number)
    }

    pub fn template(&self, day: DayOfWeek) -> Option<&ScheduleTemplate> {
        self.templates[day.index()].as_ref()
    }

    /// Insert or replace a post, keeping `post_number` order.
    pub fn upsert_post(&mut self, post: ServicePost) {
        if let Some(pos) = self.posts.iter().position(|p| p.id == post.id) {
            self.posts.remove(pos);
        }
        let pos = self
            .posts
            .binary_search_by_key(&post.post_number, |p| p.post_number)
            .unwrap_or_else(|e| e);
        self.posts.insert(pos, post);
    }

    // ── Ledger ───────────────────────────────────────────────

    pub fn bookings_held_on(&self, date: NaiveDate) -> usize {
        self.ledger.get(&date).map_or(0, Vec::len)
    }

    fn hold(&mut self, booking: &Booking) {
        if !booking.status.occupies_capacity() {
            return;
        }
        let entry = LedgerEntry {
            booking_id: booking.id,
            span: booking.span(),
            category_id: booking.category_id,
        };
        let day = self.ledger.entry(booking.booking_date).or_default();
        let pos = day
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, entry);
    }

    fn release(&mut self, date: NaiveDate, booking_id: Ulid) {
        if let Some(day) = self.ledger.get_mut(&date) {
            day.retain(|e| e.booking_id != booking_id);
            if day.is_empty() {
                self.ledger.remove(&date);
            }
        }
    }

    /// Capacity-holding bookings on `date` whose span overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &LedgerEntry> {
        let day = self.ledger.get(&date).map_or(&[][..], Vec::as_slice);
        let right_bound = day.partition_point(|e| e.span.start < query.end);
        day[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// All bookings on `date` regardless of status, ordered by start time.
    pub fn bookings_on(&self, date: NaiveDate) -> Vec<&Booking> {
        let mut out: Vec<&Booking> = self
            .bookings
            .values()
            .filter(|b| b.booking_date == date)
            .collect();
        out.sort_by_key(|b| (b.start_time, b.id));
        out
    }

    // ── Event application ────────────────────────────────────

    /// Apply an already-persisted event. No validation happens here; the
    /// caller checked everything before the WAL append.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::PointCreated { .. } | Event::ServiceRegistered { .. } | Event::StatusMetaSet { .. } => {}
            Event::PointStatusChanged { status, .. } => {
                self.point.status = *status;
            }
            Event::OfferedCategoriesSet { categories, .. } => {
                self.point.offered_categories = categories.clone();
            }
            Event::PostUpserted { post } => self.upsert_post(post.clone()),
            Event::TemplateSet { template, .. } => {
                self.templates[template.day.index()] = Some(*template);
            }
            Event::ExceptionSet { exception, .. } => {
                self.exceptions.insert(exception.date, exception.clone());
            }
            Event::ExceptionRemoved { date, .. } => {
                self.exceptions.remove(date);
            }
            Event::BookingCreated { booking } => {
                self.hold(booking);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingRescheduled { id, date, span, at, .. } => {
                let Some(old_date) = self.bookings.get(id).map(|b| b.booking_date) else {
                    return;
                };
                self.release(old_date, *id);
                if let Some(b) = self.bookings.get_mut(id) {
                    b.booking_date = *date;
                    b.start_time = span.start;
                    b.end_time = span.end;
                    b.updated_at = *at;
                }
                if let Some(b) = self.bookings.get(id).cloned() {
                    self.hold(&b);
                }
            }
            Event::BookingTransitioned { id, to, reason, at, .. } => {
                let Some(b) = self.bookings.get_mut(id) else {
                    return;
                };
                b.status = *to;
                b.updated_at = *at;
                if reason.is_some() {
                    b.cancellation_reason = reason.clone();
                }
                let date = b.booking_date;
                if !to.occupies_capacity() {
                    self.release(date, *id);
                }
            }
            Event::LineItemAdded { booking_id, item, at, .. } => {
                if let Some(b) = self.bookings.get_mut(booking_id) {
                    b.line_items.push(item.clone());
                    b.update_total_price();
                    b.updated_at = *at;
                }
            }
            Event::LineItemRemoved { booking_id, item_id, at, .. } => {
                if let Some(b) = self.bookings.get_mut(booking_id) {
                    b.line_items.retain(|i| i.id != *item_id);
                    b.update_total_price();
                    b.updated_at = *at;
                }
            }
            Event::ReviewAttached { review, .. } => {
                if let Some(b) = self.bookings.get_mut(&review.booking_id) {
                    b.review = Some(review.clone());
                }
            }
        }
    }

    /// Minimal event list that recreates this point, for WAL compaction.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::PointCreated { point: self.point.clone() }];
        for post in &self.posts {
            events.push(Event::PostUpserted { post: post.clone() });
        }
        for template in self.templates.iter().flatten() {
            events.push(Event::TemplateSet {
                point_id: self.id(),
                template: *template,
            });
        }
        for exception in self.exceptions.values() {
            events.push(Event::ExceptionSet {
                point_id: self.id(),
                exception: exception.clone(),
            });
        }
        let mut bookings: Vec<&Booking> = self.bookings.values().collect();
        bookings.sort_by_key(|b| b.id);
        for booking in bookings {
            events.push(Event::BookingCreated { booking: booking.clone() });
        }
        events
    }
}
