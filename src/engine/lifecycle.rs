use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Dispatch, NotificationKind};
use crate::observability;
use crate::status::{BookingEvent, BookingStatus, StatusGroup};

use super::availability::evaluate;
use super::capacity::{now, validate_span};
use super::schedule::offers_category;
use super::store::PointState;
use super::{Engine, EngineError, ValidationErrors};

fn check_contact(errors: &mut ValidationErrors, contact: &Contact) {
    for (field, value) in [
        ("recipient.first_name", &contact.first_name),
        ("recipient.last_name", &contact.last_name),
    ] {
        if value.trim().is_empty() {
            errors.add(field, "is required");
        } else if value.len() > MAX_NAME_LEN {
            errors.add(field, format!("must be at most {MAX_NAME_LEN} bytes"));
        }
    }
    if contact.phone.trim().is_empty() {
        errors.add("recipient.phone", "is required");
    } else if contact.phone.len() > MAX_PHONE_LEN {
        errors.add("recipient.phone", format!("must be at most {MAX_PHONE_LEN} bytes"));
    }
    if let Some(email) = contact.email.as_deref()
        && !email.is_empty()
        && !email.contains('@')
    {
        errors.add("recipient.email", "is not an email address");
    }
}

/// Field checks that need no service point state.
fn check_new_booking(new: &NewBooking, policy: ValidationPolicy) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    check_contact(&mut errors, &new.recipient);
    if let (Some(car), Some(client)) = (new.car, new.client_id)
        && car.client_id != Some(client)
    {
        errors.add("car", "does not belong to the client");
    }
    if let Some(status) = new.status
        && status != BookingStatus::Pending
        && !policy.skip_status_validation
    {
        errors.add("status", "new bookings start as pending");
    }
    if new.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
        errors.add("notes", format!("must be at most {MAX_NOTE_LEN} bytes"));
    }
    if let Some(end) = new.end_time
        && end <= new.start_time
    {
        errors.add("end_time", "must be after start_time");
    }
    errors
}

fn booking_span(
    errors: &mut ValidationErrors,
    start: NaiveTime,
    end: Option<NaiveTime>,
    default_minutes: Minutes,
) -> Option<Span> {
    match end {
        Some(end) => Span::try_new(start, end),
        None => {
            let span = Span::starting_at(start, default_minutes);
            if span.is_none() {
                errors.add("end_time", "default slot would run past midnight");
            }
            span
        }
    }
}

fn reject(why: super::Unavailability) -> EngineError {
    metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => why.label()).increment(1);
    EngineError::Unavailable(why)
}

fn booking_of(ps: &PointState, id: Ulid) -> Result<&Booking, EngineError> {
    ps.bookings.get(&id).ok_or(EngineError::NotFound(id))
}

impl Engine {
    /// Price requested services. Explicit prices win, then the price list,
    /// then the service's base price. Runs before any lock is taken.
    async fn price_line_items(
        &self,
        point_id: Ulid,
        requests: &[ServiceRequest],
        errors: &mut ValidationErrors,
    ) -> Vec<LineItem> {
        let mut items = Vec::with_capacity(requests.len());
        for req in requests {
            if req.quantity == 0 || req.quantity > MAX_LINE_ITEM_QUANTITY {
                errors.add(
                    "services",
                    format!("quantity for {} must be 1..={MAX_LINE_ITEM_QUANTITY}", req.service_id),
                );
                continue;
            }
            let price = match req.price {
                Some(price) => Some(price),
                None => match self.prices.price_for(req.service_id, point_id).await {
                    Some(price) => Some(price),
                    None => self.services.get(&req.service_id).map(|s| s.base_price),
                },
            };
            match price {
                None => errors.add("services", format!("unknown service {}", req.service_id)),
                Some(price) if price.is_sign_negative() => {
                    errors.add("services", format!("price for {} must not be negative", req.service_id))
                }
                Some(price) => items.push(LineItem {
                    id: Ulid::new(),
                    service_id: req.service_id,
                    price,
                    quantity: req.quantity,
                }),
            }
        }
        items
    }

    /// Validate, check availability unless `policy` skips it, and persist a
    /// new booking. The check and the insert share the point's write lock,
    /// so of two racing requests for the last post exactly one succeeds.
    pub async fn create_booking(
        &self,
        new: NewBooking,
        policy: ValidationPolicy,
    ) -> Result<Booking, EngineError> {
        if new.services.len() > MAX_LINE_ITEMS {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let mut errors = check_new_booking(&new, policy);
        let line_items = self
            .price_line_items(new.service_point_id, &new.services, &mut errors)
            .await;

        let mut guard = self.point_write(new.service_point_id).await?;
        if let Some(category) = new.category_id
            && !offers_category(&guard, category)
        {
            errors.add("category_id", "is not offered at this service point");
        }
        let span = booking_span(
            &mut errors,
            new.start_time,
            new.end_time,
            guard.point.default_slot_duration,
        );
        errors.into_result()?;
        let Some(span) = span else {
            return Err(EngineError::invalid("end_time", "must be after start_time"));
        };
        validate_span(&span)?;
        if guard.bookings_held_on(new.booking_date) >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this date"));
        }

        if !policy.skip_availability_check {
            let eval = evaluate(&guard, new.booking_date, Some(span), new.category_id, None);
            if let Err(why) = eval.verdict {
                debug!(
                    "booking refused at {} on {} {}-{}: {why}",
                    new.service_point_id,
                    new.booking_date,
                    hhmm::format(&span.start),
                    hhmm::format(&span.end)
                );
                return Err(reject(why));
            }
        }

        let status = new.status.unwrap_or(BookingStatus::Pending);
        self.statuses.meta(status);
        let at = now();
        let mut booking = Booking {
            id: Ulid::new(),
            service_point_id: new.service_point_id,
            client_id: new.client_id,
            car: new.car,
            category_id: new.category_id,
            booking_date: new.booking_date,
            start_time: span.start,
            end_time: span.end,
            status,
            payment_status: PaymentStatus::Pending,
            cancellation_reason: None,
            recipient: new.recipient,
            notes: new.notes,
            line_items,
            total_price: Decimal::ZERO,
            review: None,
            created_at: at,
            updated_at: at,
        };
        booking.update_total_price();

        self.persist_and_apply(&mut guard, Event::BookingCreated {
            booking: booking.clone(),
        })
        .await?;
        drop(guard);

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {} created at {} on {} {}-{} ({})",
            booking.id,
            booking.service_point_id,
            booking.booking_date,
            hhmm::format(&booking.start_time),
            hhmm::format(&booking.end_time),
            booking.status
        );
        self.dispatch(Dispatch::Notify {
            booking_id: booking.id,
            service_point_id: booking.service_point_id,
            kind: NotificationKind::BookingCreated,
        });
        Ok(booking)
    }

    /// Move a pending or confirmed booking. Availability is re-checked with
    /// the booking itself excluded. `end_time` defaults to keeping the
    /// current duration.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: Option<NaiveTime>,
        policy: ValidationPolicy,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.booking_write(id).await?;
        let current = booking_of(&guard, id)?;
        if !matches!(current.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::invalid(
                "status",
                format!("a {} booking cannot be rescheduled", current.status),
            ));
        }
        let span = match end_time {
            Some(end) => Span::try_new(start_time, end)
                .ok_or_else(|| EngineError::invalid("end_time", "must be after start_time"))?,
            None => Span::starting_at(start_time, current.span().duration_minutes())
                .ok_or_else(|| EngineError::invalid("start_time", "booking would run past midnight"))?,
        };
        validate_span(&span)?;
        let category = current.category_id;

        if !policy.skip_availability_check {
            let eval = evaluate(&guard, date, Some(span), category, Some(id));
            if let Err(why) = eval.verdict {
                return Err(reject(why));
            }
        }

        let point_id = guard.id();
        self.persist_and_apply(&mut guard, Event::BookingRescheduled {
            id,
            point_id,
            date,
            span,
            at: now(),
        })
        .await?;
        let updated = booking_of(&guard, id)?.clone();
        metrics::counter!(observability::RESCHEDULES_TOTAL).increment(1);
        info!(
            "booking {id} moved to {date} {}-{}",
            hhmm::format(&span.start),
            hhmm::format(&span.end)
        );
        Ok(updated)
    }

    /// The `may_<event>?` predicate for a stored booking.
    pub async fn may_fire(&self, id: Ulid, event: BookingEvent) -> Result<bool, EngineError> {
        let point_id = self.point_of_booking(id)?;
        let guard = self.point_read(point_id).await?;
        Ok(booking_of(&guard, id)?.status.may(event))
    }

    /// Apply a lifecycle event. Illegal moves leave the booking untouched.
    /// `reason` is kept only for cancellations.
    pub async fn fire(
        &self,
        id: Ulid,
        event: BookingEvent,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_NOTE_LEN) {
            return Err(EngineError::invalid(
                "reason",
                format!("must be at most {MAX_NOTE_LEN} bytes"),
            ));
        }
        let mut guard = self.booking_write(id).await?;
        let from = booking_of(&guard, id)?.status;
        let to = from.fire(event)?;
        let reason = match to {
            BookingStatus::CanceledByClient | BookingStatus::CanceledByPartner => reason,
            _ => None,
        };
        self.statuses.meta(to);

        let point_id = guard.id();
        self.persist_and_apply(&mut guard, Event::BookingTransitioned {
            id,
            point_id,
            to,
            reason,
            at: now(),
        })
        .await?;
        let updated = booking_of(&guard, id)?.clone();
        drop(guard);

        metrics::counter!(observability::TRANSITIONS_TOTAL, "event" => event.name()).increment(1);
        info!("booking {id}: {from} -> {to} on {event}");
        if let Some(kind) = NotificationKind::for_status(to) {
            self.dispatch(Dispatch::Notify {
                booking_id: id,
                service_point_id: point_id,
                kind,
            });
        }
        if to.group() != StatusGroup::Active {
            self.dispatch(Dispatch::RecalculateMetrics {
                service_point_id: point_id,
            });
        }
        Ok(updated)
    }

    pub async fn confirm(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.fire(id, BookingEvent::Confirm, None).await
    }

    pub async fn start_service(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.fire(id, BookingEvent::StartService, None).await
    }

    pub async fn complete(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.fire(id, BookingEvent::Complete, None).await
    }

    pub async fn cancel_by_client(&self, id: Ulid, reason: Option<String>) -> Result<Booking, EngineError> {
        self.fire(id, BookingEvent::CancelByClient, reason).await
    }

    pub async fn cancel_by_partner(&self, id: Ulid, reason: Option<String>) -> Result<Booking, EngineError> {
        self.fire(id, BookingEvent::CancelByPartner, reason).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.fire(id, BookingEvent::MarkNoShow, None).await
    }

    // ── Line items ───────────────────────────────────────────

    pub async fn add_line_item(
        &self,
        booking_id: Ulid,
        request: ServiceRequest,
    ) -> Result<Booking, EngineError> {
        let point_id = self.point_of_booking(booking_id)?;
        let mut errors = ValidationErrors::new();
        let mut items = self
            .price_line_items(point_id, std::slice::from_ref(&request), &mut errors)
            .await;
        errors.into_result()?;
        let Some(item) = items.pop() else {
            return Err(EngineError::invalid("services", "nothing to add"));
        };

        let mut guard = self.booking_write(booking_id).await?;
        let booking = booking_of(&guard, booking_id)?;
        if booking.status.group() == StatusGroup::Canceled {
            return Err(EngineError::invalid("status", "booking is canceled"));
        }
        if booking.line_items.len() >= MAX_LINE_ITEMS {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        self.persist_and_apply(&mut guard, Event::LineItemAdded {
            booking_id,
            point_id,
            item,
            at: now(),
        })
        .await?;
        Ok(booking_of(&guard, booking_id)?.clone())
    }

    pub async fn remove_line_item(&self, booking_id: Ulid, item_id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.booking_write(booking_id).await?;
        if !booking_of(&guard, booking_id)?
            .line_items
            .iter()
            .any(|i| i.id == item_id)
        {
            return Err(EngineError::NotFound(item_id));
        }
        let point_id = guard.id();
        self.persist_and_apply(&mut guard, Event::LineItemRemoved {
            booking_id,
            point_id,
            item_id,
            at: now(),
        })
        .await?;
        Ok(booking_of(&guard, booking_id)?.clone())
    }

    /// Sum of `price * quantity` over the booking's line items. Every
    /// line-item change already stores this total; recomputing is idempotent.
    pub async fn update_total_price(&self, booking_id: Ulid) -> Result<Decimal, EngineError> {
        let point_id = self.point_of_booking(booking_id)?;
        let guard = self.point_read(point_id).await?;
        Ok(booking_of(&guard, booking_id)?.line_items_total())
    }

    // ── Reviews ──────────────────────────────────────────────

    pub async fn attach_review(
        &self,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        let mut errors = ValidationErrors::new();
        if !(1..=5).contains(&rating) {
            errors.add("rating", "must be between 1 and 5");
        }
        if comment.as_ref().is_some_and(|c| c.len() > MAX_NOTE_LEN) {
            errors.add("comment", format!("must be at most {MAX_NOTE_LEN} bytes"));
        }
        errors.into_result()?;

        let mut guard = self.booking_write(booking_id).await?;
        let booking = booking_of(&guard, booking_id)?;
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::ReviewNotAllowed("booking is not completed"));
        }
        if booking.review.is_some() {
            return Err(EngineError::ReviewNotAllowed("booking already has a review"));
        }
        let review = Review {
            id: Ulid::new(),
            booking_id,
            rating,
            comment,
            created_at: now(),
        };
        let point_id = guard.id();
        self.persist_and_apply(&mut guard, Event::ReviewAttached {
            point_id,
            review: review.clone(),
        })
        .await?;
        drop(guard);

        self.dispatch(Dispatch::RecalculateMetrics {
            service_point_id: point_id,
        });
        Ok(review)
    }
}
