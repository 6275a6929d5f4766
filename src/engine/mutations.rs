use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::status::{BookingStatus, StatusMeta};

use super::capacity::now;
use super::{Engine, EngineError, PointState, ValidationErrors};

fn check_name(errors: &mut ValidationErrors, field: &'static str, name: &str) {
    if name.trim().is_empty() {
        errors.add(field, "is required");
    } else if name.len() > MAX_NAME_LEN {
        errors.add(field, format!("must be at most {MAX_NAME_LEN} bytes"));
    }
}

fn check_slot_duration(errors: &mut ValidationErrors, field: &'static str, minutes: Minutes) {
    if !(MIN_SLOT_DURATION_MIN..=MAX_SLOT_DURATION_MIN).contains(&minutes) {
        errors.add(
            field,
            format!("must be between {MIN_SLOT_DURATION_MIN} and {MAX_SLOT_DURATION_MIN} minutes"),
        );
    }
}

fn check_hours(
    errors: &mut ValidationErrors,
    open: Option<chrono::NaiveTime>,
    close: Option<chrono::NaiveTime>,
) {
    match (open, close) {
        (Some(open), Some(close)) if close > open => {}
        (Some(_), Some(_)) => errors.add("closing_time", "must be after opening_time"),
        (None, _) => errors.add("opening_time", "is required on working days"),
        (_, None) => errors.add("closing_time", "is required on working days"),
    }
}

/// Post invariants that depend on the sibling posts.
fn check_post(errors: &mut ValidationErrors, ps: &PointState, post: &ServicePost) {
    if post.post_number == 0 {
        errors.add("post_number", "must be positive");
    } else if ps
        .post_by_number(post.post_number)
        .is_some_and(|other| other.id != post.id)
    {
        errors.add("post_number", format!("{} is already used", post.post_number));
    }
    check_name(errors, "name", &post.name);
    check_slot_duration(errors, "slot_duration", post.slot_duration);
    if let Some(custom) = &post.custom_schedule
        && custom.custom_hours.start >= custom.custom_hours.end
    {
        errors.add("custom_schedule.custom_hours", "start must be before end");
    }
}

impl Engine {
    pub async fn create_service_point(&self, new: NewServicePoint) -> Result<ServicePoint, EngineError> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, "name", &new.name);
        check_slot_duration(&mut errors, "default_slot_duration", new.default_slot_duration);
        errors.into_result()?;
        if self.points.len() >= MAX_SERVICE_POINTS {
            return Err(EngineError::LimitExceeded("too many service points"));
        }

        let point = ServicePoint {
            id: Ulid::new(),
            partner_id: new.partner_id,
            name: new.name,
            city_id: new.city_id,
            location: new.location,
            default_slot_duration: new.default_slot_duration,
            status: new.status,
            offered_categories: new.offered_categories,
            created_at: now(),
        };

        let _serial = self.catalog_lock.lock().await;
        self.wal_append(&Event::PointCreated { point: point.clone() }).await?;
        self.points.insert(
            point.id,
            Arc::new(RwLock::new(PointState::new(point.clone()))),
        );
        info!("service point {} created ({})", point.id, point.name);
        Ok(point)
    }

    pub async fn set_point_status(&self, id: Ulid, status: PointStatus) -> Result<(), EngineError> {
        let mut guard = self.point_write(id).await?;
        if guard.point.status == status {
            return Ok(());
        }
        self.persist_and_apply(&mut guard, Event::PointStatusChanged { id, status })
            .await?;
        info!("service point {id} status now {status:?}");
        Ok(())
    }

    pub async fn set_offered_categories(
        &self,
        id: Ulid,
        categories: BTreeSet<Ulid>,
    ) -> Result<(), EngineError> {
        let mut guard = self.point_write(id).await?;
        self.persist_and_apply(&mut guard, Event::OfferedCategoriesSet { id, categories })
            .await
    }

    pub async fn add_post(&self, point_id: Ulid, new: NewPost) -> Result<ServicePost, EngineError> {
        let mut guard = self.point_write(point_id).await?;
        if guard.posts.len() >= MAX_POSTS_PER_POINT {
            return Err(EngineError::LimitExceeded("too many posts"));
        }
        let post = ServicePost {
            id: Ulid::new(),
            service_point_id: point_id,
            post_number: new.post_number,
            name: new
                .name
                .unwrap_or_else(|| format!("Post {}", new.post_number)),
            slot_duration: new
                .slot_duration
                .unwrap_or(guard.point.default_slot_duration),
            active: true,
            category_id: new.category_id,
            custom_schedule: new.custom_schedule,
        };
        let mut errors = ValidationErrors::new();
        check_post(&mut errors, &guard, &post);
        errors.into_result()?;

        self.persist_and_apply(&mut guard, Event::PostUpserted { post: post.clone() })
            .await?;
        info!("post #{} added to service point {point_id}", post.post_number);
        Ok(post)
    }

    /// Posts are never deleted; deactivate them with `active: Some(false)`.
    pub async fn update_post(
        &self,
        point_id: Ulid,
        post_id: Ulid,
        update: PostUpdate,
    ) -> Result<ServicePost, EngineError> {
        let mut guard = self.point_write(point_id).await?;
        let mut post = guard
            .post(post_id)
            .cloned()
            .ok_or(EngineError::NotFound(post_id))?;
        if let Some(name) = update.name {
            post.name = name;
        }
        if let Some(minutes) = update.slot_duration {
            post.slot_duration = minutes;
        }
        if let Some(active) = update.active {
            post.active = active;
        }
        if update.clear_category {
            post.category_id = None;
        } else if update.category_id.is_some() {
            post.category_id = update.category_id;
        }
        if update.clear_custom_schedule {
            post.custom_schedule = None;
        } else if update.custom_schedule.is_some() {
            post.custom_schedule = update.custom_schedule;
        }
        let mut errors = ValidationErrors::new();
        check_post(&mut errors, &guard, &post);
        errors.into_result()?;

        self.persist_and_apply(&mut guard, Event::PostUpserted { post: post.clone() })
            .await?;
        Ok(post)
    }

    pub async fn set_schedule_template(
        &self,
        point_id: Ulid,
        template: ScheduleTemplate,
    ) -> Result<(), EngineError> {
        let mut errors = ValidationErrors::new();
        if template.is_working_day {
            check_hours(&mut errors, template.opening_time, template.closing_time);
        }
        errors.into_result()?;
        let mut guard = self.point_write(point_id).await?;
        self.persist_and_apply(&mut guard, Event::TemplateSet { point_id, template })
            .await
    }

    /// Insert or replace the exception for `exception.date`.
    pub async fn set_schedule_exception(
        &self,
        point_id: Ulid,
        exception: ScheduleException,
    ) -> Result<(), EngineError> {
        let mut errors = ValidationErrors::new();
        if !exception.is_closed {
            check_hours(&mut errors, exception.opening_time, exception.closing_time);
        }
        if exception.reason.as_ref().is_some_and(|r| r.len() > MAX_NOTE_LEN) {
            errors.add("reason", format!("must be at most {MAX_NOTE_LEN} bytes"));
        }
        errors.into_result()?;
        let mut guard = self.point_write(point_id).await?;
        self.persist_and_apply(&mut guard, Event::ExceptionSet { point_id, exception })
            .await
    }

    /// Returns false when there was no exception for `date`.
    pub async fn remove_schedule_exception(
        &self,
        point_id: Ulid,
        date: NaiveDate,
    ) -> Result<bool, EngineError> {
        let mut guard = self.point_write(point_id).await?;
        if !guard.exceptions.contains_key(&date) {
            return Ok(false);
        }
        self.persist_and_apply(&mut guard, Event::ExceptionRemoved { point_id, date })
            .await?;
        Ok(true)
    }

    pub async fn register_service(
        &self,
        name: String,
        category_id: Option<Ulid>,
        base_price: Decimal,
    ) -> Result<ServiceInfo, EngineError> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, "name", &name);
        if base_price.is_sign_negative() {
            errors.add("base_price", "must not be negative");
        }
        errors.into_result()?;
        let service = ServiceInfo {
            id: Ulid::new(),
            name,
            category_id,
            base_price,
        };
        self.persist_catalog(Event::ServiceRegistered {
            service: service.clone(),
        })
        .await?;
        Ok(service)
    }

    pub async fn set_status_meta(&self, status: BookingStatus, meta: StatusMeta) -> Result<(), EngineError> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, "description", &meta.description);
        if meta.color.trim().is_empty() {
            errors.add("color", "is required");
        }
        errors.into_result()?;
        self.persist_catalog(Event::StatusMetaSet { status, meta }).await
    }
}
