//! Thin HTTP transport over the command interface.
//!
//! Handlers translate JSON bodies into commands and results back into JSON;
//! the state blob passes through opaque in both directions.  Each accepted
//! turn is persisted before the response leaves the process.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use iris_core::{Command, CommandResult, ConsultationState};
use iris_dialogue::{DialogueManager, TurnStore};

#[derive(Clone)]
struct AppState {
    manager: Arc<DialogueManager>,
    store: Arc<TurnStore>,
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    consultation_id: String,
    state_blob: Value,
    user_input: String,
}

#[derive(Debug, Deserialize)]
struct FinalizeRequest {
    state_blob: Value,
}

pub async fn serve(
    bind_addr: &str,
    manager: Arc<DialogueManager>,
    store: Arc<TurnStore>,
) -> Result<()> {
    let app = Router::new()
        .route("/start", post(start))
        .route("/turn", post(turn))
        .route("/finalize", post(finalize))
        .with_state(AppState { manager, store });

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind_addr, "transport listening");
    axum::serve(listener, app).await?;
    Ok(())
}

type HttpResult = std::result::Result<Json<Value>, (StatusCode, Json<Value>)>;

async fn start(State(app): State<AppState>) -> HttpResult {
    let result = app.manager.handle(Command::Start).await.map_err(internal)?;
    match result {
        CommandResult::Turn(turn) => {
            app.store
                .save_turn(&turn.turn_metadata.consultation_id, &turn.state)
                .map_err(internal)?;
            Ok(Json(json!({
                "consultation_id": turn.turn_metadata.consultation_id,
                "first_question": turn.system_output,
                "state_blob": turn.state.to_json(),
            })))
        }
        CommandResult::Illegal(illegal) => Err(rejected(&illegal.reason)),
        CommandResult::Final(_) => Err(internal(anyhow::anyhow!("unexpected final report"))),
    }
}

async fn turn(State(app): State<AppState>, Json(request): Json<TurnRequest>) -> HttpResult {
    let command = Command::UserTurn {
        user_input: request.user_input,
        state: ConsultationState::from_json(request.state_blob),
    };
    let result = app.manager.handle(command).await.map_err(internal)?;
    match result {
        CommandResult::Turn(turn) => {
            app.store
                .save_turn(&request.consultation_id, &turn.state)
                .map_err(internal)?;
            Ok(Json(json!({
                "system_output": turn.system_output,
                "state_blob": turn.state.to_json(),
                "debug": turn.debug,
                "turn_metadata": turn.turn_metadata,
                "consultation_complete": turn.consultation_complete,
            })))
        }
        CommandResult::Illegal(illegal) => Err(rejected(&illegal.reason)),
        CommandResult::Final(_) => Err(internal(anyhow::anyhow!("unexpected final report"))),
    }
}

async fn finalize(State(app): State<AppState>, Json(request): Json<FinalizeRequest>) -> HttpResult {
    let command = Command::Finalize {
        state: ConsultationState::from_json(request.state_blob),
    };
    let result = app.manager.handle(command).await.map_err(internal)?;
    match result {
        CommandResult::Final(report) => Ok(Json(json!({
            "json_path": report.json_path,
            "summary_path": report.summary_path,
            "consultation_id": report.consultation_id,
            "total_episodes": report.total_episodes,
        }))),
        CommandResult::Illegal(illegal) => Err(rejected(&illegal.reason)),
        CommandResult::Turn(_) => Err(internal(anyhow::anyhow!("unexpected turn result"))),
    }
}

fn rejected(reason: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": reason})))
}

fn internal(err: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!(%err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
}
