// handlers.rs
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CreatePollRequest, ListParams, Poll, PollResults, VoteReceipt, VoteRequest};
use crate::services;
use crate::state::SharedState;

/// `Json` body whose rejections come back as `AppError`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Address a vote is attributed to. Taken from `X-Forwarded-For` only when
/// the deployment says the proxy in front of us can be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIp(pub Option<String>);

impl FromRequestParts<SharedState> for VoterIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());

            if let Some(ip) = forwarded {
                return Ok(VoterIp(Some(ip.to_string())));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(VoterIp(peer))
    }
}

/// Create a poll
pub async fn create_poll(
    State(state): State<SharedState>,
    AppJson(request): AppJson<CreatePollRequest>,
) -> Result<(StatusCode, Json<Poll>), AppError> {
    let poll = services::create_poll(state.store.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// List polls, newest first
pub async fn list_polls(
    State(state): State<SharedState>,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<Vec<Poll>>, AppError> {
    let polls = services::list_polls(state.store.as_ref(), params).await?;
    Ok(Json(polls))
}

pub async fn get_poll(
    State(state): State<SharedState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Poll>, AppError> {
    let poll = services::get_poll(state.store.as_ref(), id).await?;
    Ok(Json(poll))
}

/// Vote for one or more options
pub async fn vote(
    State(state): State<SharedState>,
    VoterIp(voter_ip): VoterIp,
    AppJson(request): AppJson<VoteRequest>,
) -> Result<(StatusCode, Json<VoteReceipt>), AppError> {
    let receipt = services::submit_vote(
        state.store.as_ref(),
        request,
        voter_ip,
        state.config.one_vote_per_ip,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_results(
    State(state): State<SharedState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<PollResults>, AppError> {
    let results = services::get_results(state.store.as_ref(), id).await?;
    Ok(Json(results))
}

pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
