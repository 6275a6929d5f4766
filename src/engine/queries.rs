use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::status::{BookingStatus, StatusMeta};

use super::availability::{self, evaluate, AvailabilityQuery};
use super::capacity::capacity;
use super::schedule;
use super::{Engine, EngineError};

impl Engine {
    pub async fn resolve_window(&self, point_id: Ulid, date: NaiveDate) -> Result<DayWindow, EngineError> {
        let guard = self.point_read(point_id).await?;
        Ok(schedule::resolve_window(&guard, date))
    }

    pub async fn posts_for(
        &self,
        point_id: Ulid,
        date: NaiveDate,
        category_id: Option<Ulid>,
    ) -> Result<Vec<PostWindow>, EngineError> {
        let guard = self.point_read(point_id).await?;
        Ok(schedule::posts_for(&guard, date, category_id))
    }

    /// Eligible open posts minus overlapping bookings. May be zero or negative.
    pub async fn available_posts(
        &self,
        point_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        category_id: Option<Ulid>,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<i64, EngineError> {
        let span = Span::try_new(start, end)
            .ok_or_else(|| EngineError::invalid("end_time", "must be after start_time"))?;
        let guard = self.point_read(point_id).await?;
        Ok(capacity(&guard, date, &span, category_id, exclude_booking_id).available_posts())
    }

    pub async fn check_availability(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<AvailabilityReport, EngineError> {
        if query.duration_minutes == 0 {
            return Err(EngineError::invalid("duration_minutes", "must be positive"));
        }
        let started = Instant::now();
        let guard = self.point_read(query.service_point_id).await?;
        let span = Span::starting_at(query.start_time, query.duration_minutes);
        let eval = evaluate(
            &guard,
            query.date,
            span,
            query.category_id,
            query.exclude_booking_id,
        );
        drop(guard);

        let report = eval.report();
        let result = match eval.verdict {
            Ok(()) => "available",
            Err(why) => why.label(),
        };
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "result" => result).increment(1);
        metrics::histogram!(observability::AVAILABILITY_CHECK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(
            "availability {} {} {}+{}m: {result} ({}/{} occupied)",
            query.service_point_id,
            query.date,
            hhmm::format(&query.start_time),
            query.duration_minutes,
            report.occupied_posts,
            report.total_posts
        );
        Ok(report)
    }

    /// Earliest bookable start at or after `preferred_time` (or opening time).
    pub async fn find_next_available_slot(
        &self,
        point_id: Ulid,
        date: NaiveDate,
        preferred_time: Option<NaiveTime>,
        duration_minutes: Option<Minutes>,
        category_id: Option<Ulid>,
    ) -> Result<Option<NaiveTime>, EngineError> {
        if duration_minutes == Some(0) {
            return Err(EngineError::invalid("duration_minutes", "must be positive"));
        }
        let guard = self.point_read(point_id).await?;
        Ok(availability::next_available_slot(
            &guard,
            date,
            preferred_time,
            duration_minutes,
            category_id,
        ))
    }

    pub async fn day_slots(
        &self,
        point_id: Ulid,
        date: NaiveDate,
        category_id: Option<Ulid>,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let guard = self.point_read(point_id).await?;
        Ok(availability::day_slots(&guard, date, category_id))
    }

    pub async fn get_point(&self, id: Ulid) -> Result<ServicePoint, EngineError> {
        Ok(self.point_read(id).await?.point.clone())
    }

    /// All posts of a point, inactive ones included.
    pub async fn list_posts(&self, point_id: Ulid) -> Result<Vec<ServicePost>, EngineError> {
        Ok(self.point_read(point_id).await?.posts.clone())
    }

    pub async fn list_points(&self) -> Vec<ServicePoint> {
        let shared: Vec<_> = self.points.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for ps in shared {
            out.push(ps.read().await.point.clone());
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let point_id = self.point_of_booking(id)?;
        let guard = self.point_read(point_id).await?;
        guard.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every booking on `date`, any status, ordered by start time.
    pub async fn bookings_on(&self, point_id: Ulid, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let guard = self.point_read(point_id).await?;
        Ok(guard.bookings_on(date).into_iter().cloned().collect())
    }

    pub async fn bookings_for_client(&self, client_id: Ulid) -> Vec<Booking> {
        let shared: Vec<_> = self.points.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            out.extend(
                guard
                    .bookings
                    .values()
                    .filter(|b| b.client_id == Some(client_id))
                    .cloned(),
            );
        }
        out.sort_by_key(|b| (b.booking_date, b.start_time, b.id));
        out
    }

    pub fn status_meta(&self, status: BookingStatus) -> StatusMeta {
        self.statuses.meta(status)
    }

    pub fn service(&self, id: Ulid) -> Option<ServiceInfo> {
        self.services.get(&id).map(|e| e.value().clone())
    }
}
