use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::command::{self, Command};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{COMMAND_DURATION_SECONDS, COMMANDS_TOTAL, command_label};

/// Serve one client: read JSON requests line by line, answer each with one JSON line.
///
/// Malformed requests get a `bad_request` response and the connection stays
/// open; an over-long line or an I/O failure ends the connection.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let response = error_response("bad_request", "request line too long", None);
                framed.send(response.to_string()).await?;
                return Err(LinesCodecError::MaxLineLengthExceeded);
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&engine, &line).await;
        framed.send(response.to_string()).await?;
    }
    Ok(())
}

/// Parse and execute a single request line, producing its response object.
pub async fn handle_line(engine: &Engine, line: &str) -> Value {
    let cmd = match command::parse_command(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::debug!("rejected request: {e}");
            return error_response("bad_request", &e.to_string(), None);
        }
    };

    let label = command_label(&cmd);
    let start = Instant::now();
    let result = execute_command(engine, cmd).await;
    metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => "ok").increment(1);
            json!({ "ok": true, "data": data })
        }
        Err(e) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => e.code()).increment(1);
            error_response(e.code(), &e.to_string(), error_detail(&e))
        }
    }
}

fn data<T: Serialize>(value: T) -> Value {
    json!(value)
}

async fn execute_command(engine: &Engine, cmd: Command) -> Result<Value, EngineError> {
    match cmd {
        Command::CreateEvent {
            title,
            description,
            start,
            end,
        } => {
            let id = engine.create_event(title, description, start, end).await?;
            Ok(json!({ "id": id }))
        }
        Command::UpdateEvent {
            id,
            title,
            description,
            start,
            end,
        } => {
            engine
                .update_event(id, title, description, start, end)
                .await?;
            Ok(data(engine.get_event(id).await?))
        }
        Command::DeleteEvent { id } => {
            engine.delete_event(id).await?;
            Ok(json!({ "id": id }))
        }
        Command::GetEvent { id } => Ok(data(engine.get_event(id).await?)),
        Command::ListEvents => Ok(data(engine.list_events().await)),
        Command::CreateResource {
            name,
            resource_type,
        } => {
            let id = engine.create_resource(name, resource_type).await?;
            Ok(json!({ "id": id }))
        }
        Command::UpdateResource {
            id,
            name,
            resource_type,
        } => {
            engine.update_resource(id, name, resource_type).await?;
            Ok(data(engine.get_resource(id).await?))
        }
        Command::DeleteResource { id } => {
            engine.delete_resource(id).await?;
            Ok(json!({ "id": id }))
        }
        Command::GetResource { id } => Ok(data(engine.get_resource(id).await?)),
        Command::ListResources => Ok(data(engine.list_resources().await)),
        Command::Allocate {
            event_id,
            resource_id,
        } => {
            let id = engine.allocate(event_id, resource_id).await?;
            Ok(json!({ "id": id }))
        }
        Command::Deallocate { id } => {
            let resource_id = engine.deallocate(id).await?;
            Ok(json!({ "id": id, "resource_id": resource_id }))
        }
        Command::GetAllocation { id } => Ok(data(engine.get_allocation(id).await?)),
        Command::ListAllocations {
            resource_id,
            event_id,
        } => match (resource_id, event_id) {
            (Some(rid), _) => Ok(data(engine.allocations_for_resource(rid).await?)),
            (None, Some(eid)) => Ok(data(engine.allocations_for_event(eid).await?)),
            (None, None) => Ok(data(engine.list_allocations().await)),
        },
        Command::FindConflict {
            resource_id,
            start,
            end,
            exclude_event_id,
        } => {
            let conflict = engine
                .find_conflict(resource_id, start, end, exclude_event_id)
                .await?;
            Ok(json!({ "conflict": conflict }))
        }
        Command::ListConflicts => Ok(data(engine.list_all_conflicts().await)),
        Command::Utilization {
            resource_ids,
            start_date,
            end_date,
        } => {
            let rows = engine
                .utilization_report(resource_ids.as_deref(), start_date, end_date)
                .await?;
            Ok(data(rows))
        }
    }
}

/// Structured payload for errors that implicate other entities.
fn error_detail(e: &EngineError) -> Option<Value> {
    match e {
        EngineError::NotFound(id) => Some(json!({ "id": id })),
        EngineError::DuplicateAllocation {
            event_id,
            resource_id,
        } => Some(json!({ "event_id": event_id, "resource_id": resource_id })),
        EngineError::SchedulingConflict {
            resource_id,
            resource_name,
            conflicting,
        } => Some(json!({
            "resource_id": resource_id,
            "resource_name": resource_name,
            "conflicting": conflicting,
        })),
        _ => None,
    }
}

fn error_response(code: &str, message: &str, detail: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(detail) = detail {
        error["detail"] = detail;
    }
    json!({ "ok": false, "error": error })
}
