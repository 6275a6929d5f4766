use chrono::{DateTime, NaiveDate, Utc};
use ulid::Ulid;

use crate::model::*;

use super::schedule::{post_window, resolve_window, serves_category};
use super::store::PointState;
use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.duration_minutes() > crate::limits::MAX_BOOKING_DURATION_MIN {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// Counts posts open for `request` and eligible for `category` against every
/// capacity-holding booking that overlaps it, whatever its category.
pub(crate) fn capacity(
    ps: &PointState,
    date: NaiveDate,
    request: &Span,
    category: Option<Ulid>,
    exclude: Option<Ulid>,
) -> Capacity {
    let point_window = resolve_window(ps, date);
    let total_posts = ps
        .posts
        .iter()
        .filter(|p| {
            p.active
                && serves_category(ps, p, category)
                && post_window(p, date, point_window).admits(request)
        })
        .count() as u32;
    let occupied_posts = ps
        .overlapping(date, request)
        .filter(|e| Some(e.booking_id) != exclude)
        .count() as u32;
    Capacity {
        total_posts,
        occupied_posts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::BookingStatus;
    use chrono::NaiveTime;
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
            name: "East".into(),
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

    fn book(ps: &mut PointState, span: Span, category: Option<Ulid>, status: BookingStatus) -> Ulid {
        let booking = Booking {
            id: Ulid::new(),
            service_point_id: ps.id(),
            client_id: None,
            car: None,
            category_id: category,
            booking_date: monday(),
            start_time: span.start,
            end_time: span.end,
            status,
            payment_status: PaymentStatus::Pending,
            cancellation_reason: None,
            recipient: Contact {
                first_name: "Olena".into(),
                last_name: "Koval".into(),
                phone: "+380671234567".into(),
                email: None,
            },
            notes: None,
            line_items: Vec::new(),
            total_price: Decimal::ZERO,
            review: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = booking.id;
        ps.apply(&Event::BookingCreated { booking });
        id
    }

    #[test]
    fn counts_overlapping_only() {
        let mut ps = state(2);
        book(&mut ps, Span::new(t(9, 0), t(10, 0)), None, BookingStatus::Pending);
        book(&mut ps, Span::new(t(10, 0), t(10, 30)), None, BookingStatus::Confirmed);

        let c = capacity(&ps, monday(), &Span::new(t(9, 30), t(10, 0)), None, None);
        assert_eq!((c.total_posts, c.occupied_posts), (2, 1));
        let c = capacity(&ps, monday(), &Span::new(t(9, 45), t(10, 15)), None, None);
        assert_eq!(c.occupied_posts, 2);
        assert!(!c.has_room());
    }

    #[test]
    fn excluded_booking_does_not_count() {
        let mut ps = state(1);
        let id = book(&mut ps, Span::new(t(10, 0), t(10, 30)), None, BookingStatus::Pending);
        let request = Span::new(t(10, 0), t(10, 30));
        assert!(!capacity(&ps, monday(), &request, None, None).has_room());
        assert!(capacity(&ps, monday(), &request, None, Some(id)).has_room());
    }

    #[test]
    fn no_show_and_cancellations_free_posts() {
        let mut ps = state(1);
        let span = Span::new(t(11, 0), t(11, 30));
        book(&mut ps, span, None, BookingStatus::NoShow);
        book(&mut ps, span, None, BookingStatus::CanceledByPartner);
        assert!(capacity(&ps, monday(), &span, None, None).has_room());
        book(&mut ps, span, None, BookingStatus::Completed);
        assert!(!capacity(&ps, monday(), &span, None, None).has_room());
    }

    #[test]
    fn overbooked_window_goes_negative() {
        let mut ps = state(1);
        let span = Span::new(t(12, 0), t(12, 30));
        book(&mut ps, span, None, BookingStatus::Pending);
        book(&mut ps, span, None, BookingStatus::Pending);
        let c = capacity(&ps, monday(), &span, None, None);
        assert_eq!(c.available_posts(), -1);
    }

    #[test]
    fn closed_posts_are_not_counted() {
        let mut ps = state(2);
        let mut custom = ps.posts[1].clone();
        custom.custom_schedule = Some(CustomSchedule {
            working_days: WorkingDays::only(&[DayOfWeek::Saturday]).unwrap(),
            custom_hours: Span::new(t(9, 0), t(18, 0)),
        });
        ps.upsert_post(custom);
        let c = capacity(&ps, monday(), &Span::new(t(10, 0), t(10, 30)), None, None);
        assert_eq!(c.total_posts, 1);
    }

    #[test]
    fn bookings_of_any_category_hold_posts() {
        let mut ps = state(3);
        let tyres = Ulid::new();
        let wash = Ulid::new();
        let mut pinned = ps.posts[0].clone();
        pinned.category_id = Some(tyres);
        ps.upsert_post(pinned);
        ps.point.offered_categories.insert(wash);
        let span = Span::new(t(10, 0), t(10, 30));

        // Tyres reach only the pinned bay; wash is offered on all three.
        let c = capacity(&ps, monday(), &span, Some(tyres), None);
        assert_eq!((c.total_posts, c.occupied_posts), (1, 0));
        let c = capacity(&ps, monday(), &span, Some(wash), None);
        assert_eq!(c.total_posts, 3);

        book(&mut ps, span, Some(wash), BookingStatus::Pending);
        book(&mut ps, span, Some(wash), BookingStatus::Pending);
        let c = capacity(&ps, monday(), &span, Some(tyres), None);
        assert_eq!((c.total_posts, c.occupied_posts), (1, 2));
        assert_eq!(c.available_posts(), -1);
        let c = capacity(&ps, monday(), &span, Some(wash), None);
        assert_eq!(c.available_posts(), 1);
    }
}
