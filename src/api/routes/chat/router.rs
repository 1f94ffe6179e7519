//! Router for the chat API

use std::sync::{Arc, RwLock};

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response, sse::Event, sse::KeepAlive, sse::Sse},
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::public;
use crate::ai::chat::{ChatSession, SubmitOutcome, TurnEvent};
use crate::api::public::ApiError;
use crate::api::state::{AppState, SharedSession};
use crate::anthropic::CompletionEndpoint;

type SharedState = Arc<RwLock<AppState>>;

fn credential_required() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        "Please enter your Anthropic API key to continue.",
    )
        .into_response()
}

fn session_not_found(id: &Uuid) -> Response {
    (StatusCode::NOT_FOUND, format!("Chat session {} not found", id)).into_response()
}

fn turn_in_progress(id: &Uuid) -> Response {
    (
        StatusCode::CONFLICT,
        format!("Chat session {} is still responding", id),
    )
        .into_response()
}

/// Blocks every chat route until an API key has been supplied
async fn require_credential(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let has_key = state
        .read()
        .expect("Unable to read share state")
        .api_key
        .is_some();
    if !has_key {
        return credential_required();
    }
    next.run(request).await
}

/// Streams turn events to the client until the session unsubscribes
fn event_stream(rx: mpsc::UnboundedReceiver<TurnEvent>) -> Response {
    let sse_stream = UnboundedReceiverStream::new(rx).map(|event| Event::default().json_data(event));

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default().text("keep-alive"))
        .into_response()
}

fn find_session(
    state: &SharedState,
    id: &Uuid,
) -> Option<(SharedSession, Arc<dyn CompletionEndpoint>)> {
    state.read().expect("Unable to read share state").session(id)
}

/// Start a new chat session
async fn create_session(
    State(state): State<SharedState>,
    Json(payload): Json<public::CreateSessionRequest>,
) -> Result<Response, ApiError> {
    let mut shared_state = state.write().expect("Unable to write shared state");
    let Some(api_key) = shared_state.api_key.clone() else {
        return Ok(credential_required());
    };

    let mut config = shared_state.config.session_config(api_key);
    if let Some(model) = payload.model {
        config.model = model;
    }
    let session = ChatSession::new(config)?;
    let session_id = session.id();
    shared_state
        .sessions
        .insert(session_id, Arc::new(tokio::sync::Mutex::new(session)));

    Ok((
        StatusCode::CREATED,
        Json(public::CreateSessionResponse { session_id }),
    )
        .into_response())
}

/// Get the messages of a chat session. Waits for an active turn to
/// finish.
async fn chat_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let Some((session, _)) = find_session(&state, &id) else {
        return Ok(session_not_found(&id));
    };
    let session = session.lock().await;

    Ok(Json(public::ChatSessionResponse {
        session_id: session.id(),
        model: session.model(),
        state: session.turn_state(),
        messages: session.display_view(),
    })
    .into_response())
}

/// Have the assistant greet the user and stream the greeting
async fn introduce_handler(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let Some((session, endpoint)) = find_session(&state, &id) else {
        return Ok(session_not_found(&id));
    };
    let Ok(mut session) = session.try_lock_owned() else {
        return Ok(turn_in_progress(&id));
    };
    if session.is_introduced() {
        return Ok((
            StatusCode::CONFLICT,
            format!("Chat session {} has already started", id),
        )
            .into_response());
    }

    let rx = session.subscribe();
    tokio::spawn(async move {
        session.introduce(endpoint.as_ref()).await;
        session.unsubscribe();
    });

    Ok(event_stream(rx))
}

/// Add a message to a chat session and stream the response
async fn chat_handler(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<public::ChatRequest>,
) -> Result<Response, ApiError> {
    let Some((session, endpoint)) = find_session(&state, &id) else {
        return Ok(session_not_found(&id));
    };
    // Only one turn at a time. A submission that arrives while a turn
    // holds the lock is dropped.
    let Ok(mut session) = session.try_lock_owned() else {
        return Ok(turn_in_progress(&id));
    };

    if let Some(model) = payload.model {
        session.set_model(model);
    }
    let rx = session.subscribe();
    let greet_first = match session.submit_user_turn(&payload.message) {
        SubmitOutcome::Accepted => false,
        SubmitOutcome::NotIntroduced => true,
        SubmitOutcome::Ignored => {
            session.unsubscribe();
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        SubmitOutcome::Busy => {
            session.unsubscribe();
            return Ok(turn_in_progress(&id));
        }
    };

    tokio::spawn(async move {
        // The greeting streams ahead of the reply on the same response
        if greet_first {
            session.introduce(endpoint.as_ref()).await;
            session.submit_user_turn(&payload.message);
        }
        session.run_streaming_turn(endpoint.as_ref()).await;
        session.unsubscribe();
    });

    Ok(event_stream(rx))
}

/// End a chat session and discard its messages
async fn delete_session(State(state): State<SharedState>, Path(id): Path<Uuid>) -> Response {
    let removed = state
        .write()
        .expect("Unable to write shared state")
        .sessions
        .remove(&id);

    match removed {
        Some(_) => {
            tracing::info!("Discarded chat session {}", id);
            StatusCode::NO_CONTENT.into_response()
        }
        None => session_not_found(&id),
    }
}

/// Create the chat router
pub fn router(shared_state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/{id}", get(chat_session).post(chat_handler).delete(delete_session))
        .route("/{id}/introduce", post(introduce_handler))
        .route_layer(middleware::from_fn_with_state(
            shared_state,
            require_credential,
        ))
}
