// services.rs
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    CreatePollRequest, ListParams, NewSubmission, Poll, PollResults, VoteReceipt, VoteRequest,
};
use crate::poll::{requested_indices, tally, validate_poll, validate_selection};
use crate::store::PollStore;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

pub async fn create_poll(
    store: &dyn PollStore,
    request: CreatePollRequest,
) -> Result<Poll, AppError> {
    let new_poll = validate_poll(request)?;
    let poll = store.insert_poll(new_poll).await?;

    info!(
        poll_id = %poll.id,
        poll_type = poll.options.poll_type().as_str(),
        options = poll.option_count(),
        "Poll created"
    );

    Ok(poll)
}

pub async fn get_poll(store: &dyn PollStore, id: Uuid) -> Result<Poll, AppError> {
    store.get_poll(id).await?.ok_or(AppError::NotFound)
}

pub async fn list_polls(store: &dyn PollStore, params: ListParams) -> Result<Vec<Poll>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    store.list_polls(limit, offset).await
}

/// Validates a vote against its poll and records it as one transaction.
pub async fn submit_vote(
    store: &dyn PollStore,
    request: VoteRequest,
    voter_ip: Option<String>,
    reject_repeat_voter: bool,
) -> Result<VoteReceipt, AppError> {
    let poll = get_poll(store, request.poll_id).await?;
    let indices = requested_indices(&request)?;
    let option_indices = validate_selection(&poll, &indices)?;

    if reject_repeat_voter && voter_ip.is_none() {
        return Err(AppError::MissingVoterAddress);
    }

    let receipt = store
        .record_votes(NewSubmission {
            poll_id: poll.id,
            option_indices,
            voter_ip,
            reject_repeat_voter,
        })
        .await?;

    info!(
        poll_id = %poll.id,
        submission_id = %receipt.submission_id,
        recorded = receipt.recorded,
        "Vote recorded"
    );

    Ok(receipt)
}

pub async fn get_results(store: &dyn PollStore, id: Uuid) -> Result<PollResults, AppError> {
    let poll = get_poll(store, id).await?;
    let counts = store.vote_counts(poll.id, poll.option_count()).await?;
    Ok(tally(poll, &counts))
}
