// src/store.rs
//! Persistence for polls and votes.
//!
//! Expected schema (provisioned outside this service):
//!
//! ```sql
//! CREATE TABLE polls (
//!     id UUID PRIMARY KEY,
//!     question TEXT NOT NULL,
//!     poll_type TEXT NOT NULL CHECK (poll_type IN ('text', 'image')),
//!     options JSONB NOT NULL,
//!     allow_multiple_selections BOOLEAN NOT NULL DEFAULT FALSE,
//!     max_selections INTEGER,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE votes (
//!     id UUID PRIMARY KEY,
//!     poll_id UUID NOT NULL REFERENCES polls(id),
//!     submission_id UUID NOT NULL,
//!     option_index INTEGER NOT NULL,
//!     voter_ip TEXT,
//!     voted_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE INDEX votes_poll_id_idx ON votes (poll_id);
//! ```
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    NewPoll, NewSubmission, OptionCount, Poll, PollOptions, PollType, Vote, VoteCounts,
    VoteReceipt,
};

#[async_trait]
pub trait PollStore: Send + Sync {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, AppError>;

    async fn get_poll(&self, id: Uuid) -> Result<Option<Poll>, AppError>;

    /// Newest first.
    async fn list_polls(&self, limit: i64, offset: i64) -> Result<Vec<Poll>, AppError>;

    /// Writes every row of the submission, or none of them.
    async fn record_votes(&self, submission: NewSubmission) -> Result<VoteReceipt, AppError>;

    /// Grouped row counts for every stored index. Only submissions with at
    /// least one row inside `0..option_count` are counted as submissions.
    async fn vote_counts(&self, poll_id: Uuid, option_count: usize)
        -> Result<VoteCounts, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

/// Timestamps at the precision `TIMESTAMPTZ` keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Builds a stored poll from a validated definition.
pub(crate) fn materialize(poll: NewPoll) -> Poll {
    let now = now();
    Poll {
        id: Uuid::new_v4(),
        question: poll.question,
        options: poll.options,
        allow_multiple_selections: poll.allow_multiple_selections,
        max_selections: poll.max_selections,
        created_at: now,
        updated_at: now,
    }
}

/// One row per selected index, sharing a submission id and timestamp.
pub(crate) fn votes_for(submission: &NewSubmission) -> (Uuid, Vec<Vote>) {
    let submission_id = Uuid::new_v4();
    let voted_at = now();
    let votes = submission
        .option_indices
        .iter()
        .map(|&option_index| Vote {
            id: Uuid::new_v4(),
            poll_id: submission.poll_id,
            submission_id,
            option_index,
            voter_ip: submission.voter_ip.clone(),
            voted_at,
        })
        .collect();
    (submission_id, votes)
}

#[derive(Debug, sqlx::FromRow)]
struct PollRow {
    id: Uuid,
    question: String,
    poll_type: String,
    options: Json<serde_json::Value>,
    allow_multiple_selections: bool,
    max_selections: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PollRow> for Poll {
    type Error = AppError;

    fn try_from(row: PollRow) -> Result<Self, Self::Error> {
        let poll_type = PollType::parse(&row.poll_type).ok_or_else(|| {
            AppError::CorruptRecord(format!(
                "poll {} has unknown poll_type {:?}",
                row.id, row.poll_type
            ))
        })?;

        let options = PollOptions::from_json(poll_type, row.options.0).map_err(|e| {
            AppError::CorruptRecord(format!("poll {} has unreadable options: {e}", row.id))
        })?;

        Ok(Poll {
            id: row.id,
            question: row.question,
            options,
            allow_multiple_selections: row.allow_multiple_selections,
            max_selections: row.max_selections.and_then(|m| u32::try_from(m).ok()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const POLL_COLUMNS: &str = "id, question, poll_type, options, allow_multiple_selections, \
                            max_selections, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollStore for PgStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, AppError> {
        let poll = materialize(poll);

        sqlx::query(
            r#"
            INSERT INTO polls (id, question, poll_type, options, allow_multiple_selections,
                               max_selections, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(poll.id)
        .bind(&poll.question)
        .bind(poll.options.poll_type().as_str())
        .bind(Json(&poll.options))
        .bind(poll.allow_multiple_selections)
        .bind(poll.max_selections.and_then(|m| i32::try_from(m).ok()))
        .bind(poll.created_at)
        .bind(poll.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(poll)
    }

    async fn get_poll(&self, id: Uuid) -> Result<Option<Poll>, AppError> {
        let row = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Poll::try_from).transpose()
    }

    async fn list_polls(&self, limit: i64, offset: i64) -> Result<Vec<Poll>, AppError> {
        sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Poll::try_from)
        .collect()
    }

    async fn record_votes(&self, submission: NewSubmission) -> Result<VoteReceipt, AppError> {
        // Dropping `tx` on any early return rolls the whole submission back.
        let mut tx = self.pool.begin().await?;

        // Repeat-voter checks need submissions for the same poll serialized.
        let lock = if submission.reject_repeat_voter {
            "SELECT id FROM polls WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT id FROM polls WHERE id = $1 FOR SHARE"
        };

        let poll_exists = sqlx::query(lock)
            .bind(submission.poll_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if !poll_exists {
            return Err(AppError::NotFound);
        }

        if submission.reject_repeat_voter {
            if let Some(voter_ip) = &submission.voter_ip {
                let already_voted =
                    sqlx::query("SELECT 1 FROM votes WHERE poll_id = $1 AND voter_ip = $2 LIMIT 1")
                        .bind(submission.poll_id)
                        .bind(voter_ip)
                        .fetch_optional(&mut *tx)
                        .await?
                        .is_some();

                if already_voted {
                    return Err(AppError::AlreadyVoted);
                }
            }
        }

        let (submission_id, votes) = votes_for(&submission);

        for vote in &votes {
            sqlx::query(
                r#"
                INSERT INTO votes (id, poll_id, submission_id, option_index, voter_ip, voted_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(vote.id)
            .bind(vote.poll_id)
            .bind(vote.submission_id)
            .bind(vote.option_index)
            .bind(&vote.voter_ip)
            .bind(vote.voted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(poll_id = %submission.poll_id, %submission_id, rows = votes.len(), "Votes committed");

        Ok(VoteReceipt {
            recorded: votes.len(),
            submission_id,
        })
    }

    async fn vote_counts(
        &self,
        poll_id: Uuid,
        option_count: usize,
    ) -> Result<VoteCounts, AppError> {
        // One statement, so the per-option counts and the submission count
        // come from the same snapshot.
        let rows = sqlx::query(
            r#"
            SELECT option_index,
                   COUNT(*) AS vote_count,
                   (SELECT COUNT(DISTINCT submission_id)
                    FROM votes
                    WHERE poll_id = $1 AND option_index >= 0 AND option_index < $2) AS submissions
            FROM votes
            WHERE poll_id = $1
            GROUP BY option_index
            ORDER BY option_index
            "#,
        )
        .bind(poll_id)
        .bind(i32::try_from(option_count).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await?;

        let submissions = rows
            .first()
            .map(|row| row.try_get::<i64, _>("submissions"))
            .transpose()?
            .unwrap_or(0);

        let per_option = rows
            .iter()
            .map(|row| {
                Ok(OptionCount {
                    option_index: row.try_get("option_index")?,
                    votes: row.try_get("vote_count")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(VoteCounts {
            per_option,
            submissions,
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageOption;

    fn row(poll_type: &str, options: serde_json::Value) -> PollRow {
        let now = Utc::now();
        PollRow {
            id: Uuid::new_v4(),
            question: "Which cat?".to_string(),
            poll_type: poll_type.to_string(),
            options: Json(options),
            allow_multiple_selections: true,
            max_selections: Some(2),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn image_rows_decode_into_image_options() {
        let poll = Poll::try_from(row(
            "image",
            serde_json::json!([
                { "image_url": "a.png", "caption": "Tabby" },
                { "image_url": "b.png" }
            ]),
        ))
        .unwrap();

        let PollOptions::Image(images) = &poll.options else {
            panic!("expected image options");
        };
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].caption.as_deref(), Some("Tabby"));
        assert_eq!(poll.max_selections, Some(2));
    }

    #[test]
    fn unknown_poll_type_is_a_corrupt_record() {
        let err = Poll::try_from(row("video", serde_json::json!(["a", "b"]))).unwrap_err();
        assert!(matches!(err, AppError::CorruptRecord(_)));
    }

    #[test]
    fn mismatched_option_shape_is_a_corrupt_record() {
        let err = Poll::try_from(row("text", serde_json::json!([{ "image_url": "a.png" }])))
            .unwrap_err();
        assert!(matches!(err, AppError::CorruptRecord(_)));
    }

    #[test]
    fn submission_rows_share_id_and_timestamp() {
        let submission = NewSubmission {
            poll_id: Uuid::new_v4(),
            option_indices: vec![0, 2],
            voter_ip: Some("10.0.0.1".to_string()),
            reject_repeat_voter: false,
        };
        let (submission_id, votes) = votes_for(&submission);

        assert_eq!(votes.len(), 2);
        assert!(votes.iter().all(|v| v.submission_id == submission_id));
        assert_eq!(votes[0].voted_at, votes[1].voted_at);
        assert_ne!(votes[0].id, votes[1].id);
        assert_eq!(
            votes.iter().map(|v| v.option_index).collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    // The tests below run the Postgres store against a scratch database
    // created by `sqlx::test`. Run them with DATABASE_URL set and `--ignored`.

    const SCHEMA: &str = r#"
        CREATE TABLE polls (
            id UUID PRIMARY KEY,
            question TEXT NOT NULL,
            poll_type TEXT NOT NULL CHECK (poll_type IN ('text', 'image')),
            options JSONB NOT NULL,
            allow_multiple_selections BOOLEAN NOT NULL DEFAULT FALSE,
            max_selections INTEGER,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );

        CREATE TABLE votes (
            id UUID PRIMARY KEY,
            poll_id UUID NOT NULL REFERENCES polls(id),
            submission_id UUID NOT NULL,
            option_index INTEGER NOT NULL,
            voter_ip TEXT,
            voted_at TIMESTAMPTZ NOT NULL
        );

        CREATE INDEX votes_poll_id_idx ON votes (poll_id);
    "#;

    async fn pg_store(pool: PgPool) -> PgStore {
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();
        PgStore::new(pool)
    }

    async fn text_poll(store: &PgStore, labels: &[&str]) -> Poll {
        store
            .insert_poll(NewPoll {
                question: "Toppings?".to_string(),
                options: PollOptions::Text(labels.iter().map(|l| l.to_string()).collect()),
                allow_multiple_selections: true,
                max_selections: None,
            })
            .await
            .unwrap()
    }

    async fn stored_votes(store: &PgStore, poll_id: Uuid) -> Vec<(Uuid, i32, Option<String>)> {
        sqlx::query_as(
            "SELECT submission_id, option_index, voter_ip FROM votes \
             WHERE poll_id = $1 ORDER BY option_index",
        )
        .bind(poll_id)
        .fetch_all(&store.pool)
        .await
        .unwrap()
    }

    fn submission(poll_id: Uuid, indices: &[i32], ip: &str, reject: bool) -> NewSubmission {
        NewSubmission {
            poll_id,
            option_indices: indices.to_vec(),
            voter_ip: Some(ip.to_string()),
            reject_repeat_voter: reject,
        }
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn pg_multi_index_submission_shares_one_id(pool: PgPool) {
        let store = pg_store(pool).await;
        let poll = text_poll(&store, &["Ham", "Olive", "Basil"]).await;

        let receipt = store
            .record_votes(submission(poll.id, &[0, 2], "10.0.0.1", false))
            .await
            .unwrap();
        assert_eq!(receipt.recorded, 2);

        let rows = stored_votes(&store, poll.id).await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(id, _, _)| *id == receipt.submission_id));
        assert_eq!(rows.iter().map(|(_, i, _)| *i).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(rows[0].2.as_deref(), Some("10.0.0.1"));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn pg_repeat_voter_leaves_rows_untouched(pool: PgPool) {
        let store = pg_store(pool).await;
        let poll = text_poll(&store, &["Red", "Blue"]).await;

        store
            .record_votes(submission(poll.id, &[0, 1], "203.0.113.9", true))
            .await
            .unwrap();

        let err = store
            .record_votes(submission(poll.id, &[1], "203.0.113.9", true))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyVoted));
        assert_eq!(stored_votes(&store, poll.id).await.len(), 2);

        // Repeats are fine when the check is off.
        store
            .record_votes(submission(poll.id, &[1], "203.0.113.9", false))
            .await
            .unwrap();
        assert_eq!(stored_votes(&store, poll.id).await.len(), 3);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn pg_unknown_poll_writes_nothing(pool: PgPool) {
        let store = pg_store(pool).await;

        let err = store
            .record_votes(submission(Uuid::new_v4(), &[0], "10.0.0.1", false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM votes")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn pg_failed_insert_rolls_back_the_submission(pool: PgPool) {
        let store = pg_store(pool).await;
        let poll = text_poll(&store, &["Red", "Blue"]).await;
        sqlx::query("ALTER TABLE votes ADD CHECK (option_index < 1)")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store
            .record_votes(submission(poll.id, &[0, 1], "10.0.0.1", false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(stored_votes(&store, poll.id).await.is_empty());
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn pg_vote_counts_match_stored_rows(pool: PgPool) {
        let store = pg_store(pool).await;
        let poll = text_poll(&store, &["Ham", "Olive", "Basil"]).await;
        let other = text_poll(&store, &["Yes", "No"]).await;

        let ballots: [(&[i32], &str); 3] =
            [(&[0, 1], "10.0.0.1"), (&[1], "10.0.0.2"), (&[1, 2], "10.0.0.3")];
        for (indices, ip) in ballots {
            store
                .record_votes(submission(poll.id, indices, ip, false))
                .await
                .unwrap();
        }
        store
            .record_votes(submission(other.id, &[0], "10.0.0.1", false))
            .await
            .unwrap();

        // A row past the options, in its own submission.
        sqlx::query(
            "INSERT INTO votes (id, poll_id, submission_id, option_index, voted_at) \
             VALUES ($1, $2, $3, 7, now())",
        )
        .bind(Uuid::new_v4())
        .bind(poll.id)
        .bind(Uuid::new_v4())
        .execute(&store.pool)
        .await
        .unwrap();

        let counts = store.vote_counts(poll.id, poll.option_count()).await.unwrap();
        assert_eq!(
            counts.per_option,
            vec![
                OptionCount { option_index: 0, votes: 1 },
                OptionCount { option_index: 1, votes: 3 },
                OptionCount { option_index: 2, votes: 1 },
                OptionCount { option_index: 7, votes: 1 },
            ]
        );
        assert_eq!(counts.submissions, 3);

        let rows = stored_votes(&store, poll.id).await;
        let counted: i64 = counts.per_option.iter().map(|c| c.votes).sum();
        assert_eq!(counted, rows.len() as i64);

        let results = crate::poll::tally(poll, &counts);
        let summed: i64 = results.results.iter().map(|r| r.votes).sum();
        assert_eq!(summed, results.total_votes);
        assert_eq!(results.total_votes, 5);
        assert_eq!(results.ignored_votes, 1);
        assert_eq!(results.total_submissions, 3);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn pg_image_poll_reads_back_as_stored(pool: PgPool) {
        let store = pg_store(pool).await;
        let inserted = store
            .insert_poll(NewPoll {
                question: "Which cat?".to_string(),
                options: PollOptions::Image(vec![
                    ImageOption {
                        image_url: "https://img/a.png".to_string(),
                        caption: Some("Tabby".to_string()),
                    },
                    ImageOption {
                        image_url: "https://img/b.png".to_string(),
                        caption: None,
                    },
                ]),
                allow_multiple_selections: true,
                max_selections: Some(1),
            })
            .await
            .unwrap();

        let fetched = store.get_poll(inserted.id).await.unwrap();
        assert_eq!(fetched.as_ref(), Some(&inserted));

        let listed = store.list_polls(10, 0).await.unwrap();
        assert_eq!(listed, vec![inserted]);
    }
}
