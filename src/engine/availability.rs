use chrono::{NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_SCAN_STEPS;
use crate::model::*;

use super::capacity::capacity;
use super::schedule::{post_window, resolve_window, serves_category};
use super::store::PointState;
use super::Unavailability;

/// Inputs of an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub service_point_id: Ulid,
    pub date: NaiveDate,
    #[serde(alias = "time", with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: Minutes,
    #[serde(default)]
    pub category_id: Option<Ulid>,
    #[serde(default)]
    pub exclude_booking_id: Option<Ulid>,
}

/// Outcome of checking one window: the raw counts plus the first failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Evaluation {
    pub capacity: Capacity,
    pub verdict: Result<(), Unavailability>,
}

impl Evaluation {
    pub fn report(&self) -> AvailabilityReport {
        AvailabilityReport {
            available: self.verdict.is_ok(),
            total_posts: self.capacity.total_posts,
            occupied_posts: self.capacity.occupied_posts,
            available_posts: self.capacity.available_posts().max(0) as u32,
            reason: self.verdict.err().map(|u| u.reason().to_string()),
        }
    }
}

/// Decide whether `request` on `date` can take one more booking. Steps run in
/// order and the first failure wins.
pub(crate) fn evaluate(
    ps: &PointState,
    date: NaiveDate,
    request: Option<Span>,
    category: Option<Ulid>,
    exclude: Option<Ulid>,
) -> Evaluation {
    let empty = Capacity {
        total_posts: 0,
        occupied_posts: 0,
    };
    let fail = |capacity, why| Evaluation {
        capacity,
        verdict: Err(why),
    };

    if !ps.point.status.accepts_bookings() || ps.posts_count() == 0 {
        return fail(empty, Unavailability::PointNotAccepting);
    }
    // A request running past midnight never fits a single-day window.
    let Some(request) = request else {
        return fail(empty, Unavailability::OutsideWorkingHours);
    };
    let point_window = resolve_window(ps, date);
    if !point_window.admits(&request) {
        return fail(empty, Unavailability::OutsideWorkingHours);
    }

    let eligible: Vec<&ServicePost> = ps
        .posts
        .iter()
        .filter(|p| p.active && serves_category(ps, p, category))
        .collect();
    if eligible.is_empty() {
        return fail(empty, Unavailability::NoPostsForCategory);
    }
    if !eligible
        .iter()
        .any(|p| post_window(p, date, point_window).admits(&request))
    {
        return fail(empty, Unavailability::OutsideWorkingHours);
    }

    let counted = capacity(ps, date, &request, category, exclude);
    if !counted.has_room() {
        return fail(counted, Unavailability::AllPostsOccupied);
    }
    Evaluation {
        capacity: counted,
        verdict: Ok(()),
    }
}

/// Grid step for slot scans: the shortest slot among eligible active posts,
/// falling back to the point's default.
pub(crate) fn slot_step(ps: &PointState, category: Option<Ulid>) -> Minutes {
    ps.posts
        .iter()
        .filter(|p| p.active && serves_category(ps, p, category))
        .map(|p| p.slot_duration)
        .min()
        .unwrap_or(ps.point.default_slot_duration)
        .max(1)
}

/// Candidate start times `step` apart whose `duration`-long span still ends
/// by closing. The scan begins at `from`, never before opening.
fn grid(window: Span, step: Minutes, duration: Minutes, from: Option<NaiveTime>) -> Vec<Span> {
    let mut out = Vec::new();
    let mut cursor = from.map_or(window.start, |f| f.max(window.start));
    for _ in 0..MAX_SCAN_STEPS {
        let Some(span) = Span::starting_at(cursor, duration) else {
            break;
        };
        if span.end > window.end {
            break;
        }
        out.push(span);
        let (next, wrapped) = cursor.overflowing_add_signed(TimeDelta::minutes(step as i64));
        if wrapped != 0 {
            break;
        }
        cursor = next;
    }
    out
}

/// Earliest start that passes [`evaluate`], scanning forward from
/// `preferred` (or opening) in slot-sized steps.
pub(crate) fn next_available_slot(
    ps: &PointState,
    date: NaiveDate,
    preferred: Option<NaiveTime>,
    duration: Option<Minutes>,
    category: Option<Ulid>,
) -> Option<NaiveTime> {
    let window = resolve_window(ps, date).span()?;
    let step = slot_step(ps, category);
    let duration = duration.unwrap_or(step);
    grid(window, step, duration, preferred)
        .into_iter()
        .find(|span| evaluate(ps, date, Some(*span), category, None).verdict.is_ok())
        .map(|span| span.start)
}

/// Every grid slot of the day with its free-post count.
pub(crate) fn day_slots(ps: &PointState, date: NaiveDate, category: Option<Ulid>) -> Vec<SlotInfo> {
    let Some(window) = resolve_window(ps, date).span() else {
        return Vec::new();
    };
    let step = slot_step(ps, category);
    grid(window, step, step, None)
        .into_iter()
        .map(|span| {
            let eval = evaluate(ps, date, Some(span), category, None);
            SlotInfo {
                start_time: span.start,
                end_time: span.end,
                available_posts: if eval.verdict.is_ok() {
                    eval.capacity.available_posts().max(0) as u32
                } else {
                    0
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::BookingStatus;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::BTreeSet;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn state(posts: u32) -> PointState {
        let mut ps = PointState::new(ServicePoint {
            id: Ulid::new(),
            partner_id: Ulid::new(),
            name: "West".into(),
            city_id: None,
            location: None,
            default_slot_duration: 30,
            status: PointStatus::Active,
            offered_categories: BTreeSet::new(),
            created_at: Utc::now(),
        });
        ps.templates[0] = Some(ScheduleTemplate::working(DayOfWeek::Monday, t(9, 0), t(18, 0)));
        for n in 1..=posts {
            ps.upsert_post(ServicePost {
                id: Ulid::new(),
                service_point_id: ps.id(),
                post_number: n,
                name: format!("Bay {n}"),
                slot_duration: 30,
                active: true,
                category_id: None,
                custom_schedule: None,
            });
        }
        ps
    }

    fn hold(ps: &mut PointState, span: Span) {
        let booking = Booking {
            id: Ulid::new(),
            service_point_id: ps.id(),
            client_id: None,
            car: None,
            category_id: None,
            booking_date: monday(),
            start_time: span.start,
            end_time: span.end,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Pending,
            cancellation_reason: None,
            recipient: Contact {
                first_name: "Taras".into(),
                last_name: "Bondar".into(),
                phone: "+380931112233".into(),
                email: None,
            },
            notes: None,
            line_items: Vec::new(),
            total_price: Decimal::ZERO,
            review: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        ps.apply(&Event::BookingCreated { booking });
    }

    fn at(start: NaiveTime, minutes: Minutes) -> Option<Span> {
        Span::starting_at(start, minutes)
    }

    #[test]
    fn free_window_is_available() {
        let ps = state(1);
        let eval = evaluate(&ps, monday(), at(t(10, 0), 30), None, None);
        assert_eq!(
            eval.report(),
            AvailabilityReport {
                available: true,
                total_posts: 1,
                occupied_posts: 0,
                available_posts: 1,
                reason: None,
            }
        );
    }

    #[test]
    fn window_edges() {
        let ps = state(1);
        assert!(evaluate(&ps, monday(), at(t(9, 0), 30), None, None).verdict.is_ok());
        assert!(evaluate(&ps, monday(), at(t(17, 30), 30), None, None).verdict.is_ok());
        assert_eq!(
            evaluate(&ps, monday(), at(t(17, 45), 30), None, None).verdict,
            Err(Unavailability::OutsideWorkingHours)
        );
        assert_eq!(
            evaluate(&ps, monday(), at(t(8, 45), 30), None, None).verdict,
            Err(Unavailability::OutsideWorkingHours)
        );
        assert_eq!(
            evaluate(&ps, monday(), None, None, None).verdict,
            Err(Unavailability::OutsideWorkingHours)
        );
    }

    #[test]
    fn inactive_point_refuses_first() {
        let mut ps = state(1);
        ps.point.status = PointStatus::Maintenance;
        assert_eq!(
            evaluate(&ps, monday(), at(t(10, 0), 30), None, None).verdict,
            Err(Unavailability::PointNotAccepting)
        );
        let empty = state(0);
        assert_eq!(
            evaluate(&empty, monday(), at(t(10, 0), 30), None, None).verdict,
            Err(Unavailability::PointNotAccepting)
        );
    }

    #[test]
    fn unknown_category_has_no_posts() {
        let ps = state(2);
        assert_eq!(
            evaluate(&ps, monday(), at(t(10, 0), 30), Some(Ulid::new()), None).verdict,
            Err(Unavailability::NoPostsForCategory)
        );
    }

    #[test]
    fn occupied_report_is_clamped() {
        let mut ps = state(1);
        let span = Span::new(t(10, 0), t(10, 30));
        hold(&mut ps, span);
        hold(&mut ps, span);
        let report = evaluate(&ps, monday(), Some(span), None, None).report();
        assert!(!report.available);
        assert_eq!(report.occupied_posts, 2);
        assert_eq!(report.available_posts, 0);
        assert_eq!(report.reason.as_deref(), Some("all posts occupied"));
    }

    #[test]
    fn next_slot_skips_taken_windows() {
        let mut ps = state(1);
        hold(&mut ps, Span::new(t(9, 0), t(10, 0)));
        assert_eq!(
            next_available_slot(&ps, monday(), None, None, None),
            Some(t(10, 0))
        );
        assert_eq!(
            next_available_slot(&ps, monday(), Some(t(12, 10)), None, None),
            Some(t(12, 10))
        );
        // An early preference starts the scan at opening.
        assert_eq!(
            next_available_slot(&ps, monday(), Some(t(7, 0)), None, None),
            Some(t(10, 0))
        );
    }

    #[test]
    fn next_slot_steps_from_preferred_time() {
        let mut ps = state(1);
        hold(&mut ps, Span::new(t(12, 0), t(13, 0)));
        // 12:10, 12:40 collide; 13:10 is the first free step.
        assert_eq!(
            next_available_slot(&ps, monday(), Some(t(12, 10)), Some(30), None),
            Some(t(13, 10))
        );
    }

    #[test]
    fn next_slot_none_when_day_full_or_closed() {
        let mut ps = state(1);
        hold(&mut ps, Span::new(t(9, 0), t(18, 0)));
        assert_eq!(next_available_slot(&ps, monday(), None, None, None), None);
        let tuesday = monday().succ_opt().unwrap();
        assert_eq!(next_available_slot(&ps, tuesday, None, None, None), None);
    }

    #[test]
    fn next_slot_respects_duration() {
        let mut ps = state(1);
        hold(&mut ps, Span::new(t(10, 0), t(10, 30)));
        // 90 minutes from 09:00 would collide at 10:00.
        assert_eq!(
            next_available_slot(&ps, monday(), None, Some(90), None),
            Some(t(10, 30))
        );
        assert_eq!(
            next_available_slot(&ps, monday(), Some(t(17, 0)), Some(90), None),
            None
        );
    }

    #[test]
    fn day_slots_cover_the_window() {
        let mut ps = state(2);
        hold(&mut ps, Span::new(t(9, 0), t(9, 30)));
        let slots = day_slots(&ps, monday(), None);
        assert_eq!(slots.len(), 18);
        assert_eq!(slots[0].start_time, t(9, 0));
        assert_eq!(slots[0].available_posts, 1);
        assert_eq!(slots[1].available_posts, 2);
        assert_eq!(slots.last().unwrap().end_time, t(18, 0));
    }

    #[test]
    fn slot_step_uses_shortest_post() {
        let mut ps = state(1);
        let mut quick = ps.posts[0].clone();
        quick.id = Ulid::new();
        quick.post_number = 2;
        quick.slot_duration = 15;
        ps.upsert_post(quick);
        assert_eq!(slot_step(&ps, None), 15);
        assert_eq!(slot_step(&state(0), None), 30);
    }
}
