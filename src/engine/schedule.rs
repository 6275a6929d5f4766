use chrono::NaiveDate;
use ulid::Ulid;

use super::store::PointState;
use crate::model::*;

/// Nominal window of the service point on `date`. A date exception wins over
/// the weekly template; a missing template row means closed.
pub fn resolve_window(ps: &PointState, date: NaiveDate) -> DayWindow {
    if let Some(exception) = ps.exceptions.get(&date) {
        return exception.window();
    }
    ps.template(DayOfWeek::of(date))
        .map_or(DayWindow::Closed, ScheduleTemplate::window)
}

/// Window of one post on `date`. A custom schedule replaces the point window
/// entirely, including exceptions.
pub fn post_window(post: &ServicePost, date: NaiveDate, point_window: DayWindow) -> DayWindow {
    match &post.custom_schedule {
        Some(custom) if custom.working_days.works_on(DayOfWeek::of(date)) => {
            DayWindow::Open(custom.custom_hours)
        }
        Some(_) => DayWindow::Closed,
        None => point_window,
    }
}

/// Whether `post` may serve a booking of `category`: the post is pinned to
/// it, or the point offers it.
pub fn serves_category(ps: &PointState, post: &ServicePost, category: Option<Ulid>) -> bool {
    let Some(wanted) = category else {
        return true;
    };
    post.category_id == Some(wanted) || ps.point.offered_categories.contains(&wanted)
}

/// Active posts eligible for `category`, ordered by post number, each with
/// its resolved window for `date`.
pub fn posts_for(ps: &PointState, date: NaiveDate, category: Option<Ulid>) -> Vec<PostWindow> {
    let point_window = resolve_window(ps, date);
    ps.posts
        .iter()
        .filter(|p| p.active && serves_category(ps, p, category))
        .map(|p| PostWindow {
            post_id: p.id,
            post_number: p.post_number,
            slot_duration: p.slot_duration,
            has_custom_schedule: p.has_custom_schedule(),
            window: post_window(p, date, point_window).span(),
        })
        .collect()
}

/// Whether the point offers `category` at all: pinned on some active post or
/// listed among offered categories.
pub fn offers_category(ps: &PointState, category: Ulid) -> bool {
    ps.point.offered_categories.contains(&category)
        || ps
            .posts
            .iter()
            .any(|p| p.active && p.category_id == Some(category))
}
