// src/store/memory.rs
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{materialize, votes_for, PollStore};
use crate::error::AppError;
use crate::models::{NewPoll, NewSubmission, OptionCount, Poll, Vote, VoteCounts, VoteReceipt};

#[derive(Default)]
struct Tables {
    polls: Vec<Poll>,
    votes: Vec<Vote>,
}

/// Process-local store for handler tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vote_rows(&self) -> Vec<Vote> {
        self.tables.lock().unwrap().votes.clone()
    }

    /// Appends a row without any checks, e.g. one pointing past the options.
    pub fn push_raw_vote(&self, vote: Vote) {
        self.tables.lock().unwrap().votes.push(vote);
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, AppError> {
        let poll = materialize(poll);
        self.tables.lock().unwrap().polls.push(poll.clone());
        Ok(poll)
    }

    async fn get_poll(&self, id: Uuid) -> Result<Option<Poll>, AppError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.polls.iter().find(|p| p.id == id).cloned())
    }

    async fn list_polls(&self, limit: i64, offset: i64) -> Result<Vec<Poll>, AppError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .polls
            .iter()
            .rev()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn record_votes(&self, submission: NewSubmission) -> Result<VoteReceipt, AppError> {
        let mut tables = self.tables.lock().unwrap();

        if !tables.polls.iter().any(|p| p.id == submission.poll_id) {
            return Err(AppError::NotFound);
        }

        if submission.reject_repeat_voter {
            if let Some(ip) = &submission.voter_ip {
                let seen = tables
                    .votes
                    .iter()
                    .any(|v| v.poll_id == submission.poll_id && v.voter_ip.as_ref() == Some(ip));
                if seen {
                    return Err(AppError::AlreadyVoted);
                }
            }
        }

        let (submission_id, votes) = votes_for(&submission);
        let recorded = votes.len();
        tables.votes.extend(votes);

        Ok(VoteReceipt {
            recorded,
            submission_id,
        })
    }

    async fn vote_counts(
        &self,
        poll_id: Uuid,
        option_count: usize,
    ) -> Result<VoteCounts, AppError> {
        let tables = self.tables.lock().unwrap();

        let mut grouped: BTreeMap<i32, i64> = BTreeMap::new();
        let mut submissions = HashSet::new();
        for vote in tables.votes.iter().filter(|v| v.poll_id == poll_id) {
            *grouped.entry(vote.option_index).or_insert(0) += 1;
            if usize::try_from(vote.option_index).is_ok_and(|i| i < option_count) {
                submissions.insert(vote.submission_id);
            }
        }

        Ok(VoteCounts {
            per_option: grouped
                .into_iter()
                .map(|(option_index, votes)| OptionCount {
                    option_index,
                    votes,
                })
                .collect(),
            submissions: submissions.len() as i64,
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
