//! Executes [`Command`]s against an [`Engine`] and frames the replies as
//! JSON lines: `{"ok":true,"data":...}` or `{"ok":false,"error":{...}}`.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::command::{parse_command, Command, CommandError};
use crate::engine::{Engine, EngineError};
use crate::model::{hhmm, DayWindow};
use crate::observability;

pub struct Driver {
    engine: Arc<Engine>,
}

fn data(value: impl Serialize) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::WalError(format!("encode reply: {e}")))
}

fn error_kind(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::Validation(_) => "validation",
        EngineError::Unavailable(_) => "unavailable",
        EngineError::TransitionNotAllowed(_) => "transition_not_allowed",
        EngineError::ReviewNotAllowed(_) => "review_not_allowed",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "internal",
    }
}

fn engine_err(e: &EngineError) -> Value {
    let mut body = json!({
        "kind": error_kind(e),
        "message": e.to_string(),
    });
    match e {
        EngineError::Validation(fields) => body["fields"] = json!(fields),
        EngineError::Unavailable(why) => body["reason"] = json!(why.reason()),
        _ => {}
    }
    json!({ "ok": false, "error": body })
}

fn command_err(e: &CommandError) -> Value {
    json!({ "ok": false, "error": { "kind": "bad_command", "message": e.to_string() } })
}

fn window_json(window: DayWindow) -> Value {
    match window {
        DayWindow::Closed => json!({ "closed": true, "open": null, "close": null }),
        DayWindow::Open(span) => json!({
            "closed": false,
            "open": hhmm::format(&span.start),
            "close": hhmm::format(&span.end),
        }),
    }
}

impl Driver {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn execute(&self, cmd: Command) -> Result<Value, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::CreateServicePoint(new) => data(engine.create_service_point(new).await?),
            Command::SetPointStatus {
                service_point_id,
                status,
            } => {
                engine.set_point_status(service_point_id, status).await?;
                Ok(Value::Null)
            }
            Command::SetOfferedCategories {
                service_point_id,
                categories,
            } => {
                engine
                    .set_offered_categories(service_point_id, categories)
                    .await?;
                Ok(Value::Null)
            }
            Command::AddPost {
                service_point_id,
                post,
            } => data(engine.add_post(service_point_id, post).await?),
            Command::UpdatePost {
                service_point_id,
                post_id,
                update,
            } => data(engine.update_post(service_point_id, post_id, update).await?),
            Command::SetScheduleTemplate {
                service_point_id,
                template,
            } => {
                engine
                    .set_schedule_template(service_point_id, template)
                    .await?;
                Ok(Value::Null)
            }
            Command::SetScheduleException {
                service_point_id,
                exception,
            } => {
                engine
                    .set_schedule_exception(service_point_id, exception)
                    .await?;
                Ok(Value::Null)
            }
            Command::RemoveScheduleException {
                service_point_id,
                date,
            } => {
                let removed = engine
                    .remove_schedule_exception(service_point_id, date)
                    .await?;
                Ok(json!({ "removed": removed }))
            }
            Command::RegisterService {
                name,
                category_id,
                base_price,
            } => data(engine.register_service(name, category_id, base_price).await?),
            Command::SetStatusMeta { status, meta } => {
                engine.set_status_meta(status, meta).await?;
                Ok(Value::Null)
            }
            Command::ResolveWindow {
                service_point_id,
                date,
            } => Ok(window_json(engine.resolve_window(service_point_id, date).await?)),
            Command::PostsFor {
                service_point_id,
                date,
                category_id,
            } => data(engine.posts_for(service_point_id, date, category_id).await?),
            Command::CheckAvailability(query) => data(engine.check_availability(&query).await?),
            Command::NextAvailableSlot {
                service_point_id,
                date,
                preferred_time,
                duration_minutes,
                category_id,
            } => {
                let slot = engine
                    .find_next_available_slot(
                        service_point_id,
                        date,
                        preferred_time,
                        duration_minutes,
                        category_id,
                    )
                    .await?;
                Ok(json!({ "start_time": slot.as_ref().map(hhmm::format) }))
            }
            Command::DaySlots {
                service_point_id,
                date,
                category_id,
            } => data(engine.day_slots(service_point_id, date, category_id).await?),
            Command::CreateBooking { booking, policy } => {
                data(engine.create_booking(booking, policy).await?)
            }
            Command::RescheduleBooking {
                booking_id,
                booking_date,
                start_time,
                end_time,
                policy,
            } => data(
                engine
                    .reschedule_booking(booking_id, booking_date, start_time, end_time, policy)
                    .await?,
            ),
            Command::Transition {
                booking_id,
                event,
                reason,
            } => data(engine.fire(booking_id, event, reason).await?),
            Command::MayTransition { booking_id, event } => {
                Ok(json!({ "allowed": engine.may_fire(booking_id, event).await? }))
            }
            Command::AddLineItem {
                booking_id,
                service,
            } => data(engine.add_line_item(booking_id, service).await?),
            Command::RemoveLineItem {
                booking_id,
                item_id,
            } => data(engine.remove_line_item(booking_id, item_id).await?),
            Command::UpdateTotalPrice { booking_id } => {
                let total = engine.update_total_price(booking_id).await?;
                Ok(json!({ "total_price": total.to_string() }))
            }
            Command::AttachReview {
                booking_id,
                rating,
                comment,
            } => data(engine.attach_review(booking_id, rating, comment).await?),
            Command::GetBooking { booking_id } => data(engine.get_booking(booking_id).await?),
            Command::ListBookings {
                service_point_id,
                date,
            } => data(engine.bookings_on(service_point_id, date).await?),
            Command::ClientBookings { client_id } => {
                data(engine.bookings_for_client(client_id).await)
            }
            Command::GetPoint { service_point_id } => {
                data(engine.get_point(service_point_id).await?)
            }
            Command::StatusMeta { status } => data(engine.status_meta(status)),
        }
    }

    /// Handle one input line. Blank lines produce no reply.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(CommandError::Empty) => return None,
            Err(e) => {
                debug!("rejecting input line: {e}");
                metrics::counter!(observability::REQUESTS_TOTAL, "command" => "unknown", "status" => "bad_command")
                    .increment(1);
                return Some(command_err(&e));
            }
        };

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute(cmd).await;
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        let (status, reply) = match result {
            Ok(value) => ("ok", json!({ "ok": true, "data": value })),
            Err(e) => {
                if !e.is_rejection() {
                    error!("{label} failed: {e}");
                }
                (error_kind(&e), engine_err(&e))
            }
        };
        metrics::counter!(observability::REQUESTS_TOTAL, "command" => label, "status" => status)
            .increment(1);
        Some(reply)
    }

    /// Read commands until EOF, writing one reply line per command.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(reply) = self.handle_line(&line).await {
                let mut out = reply.to_string();
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}
