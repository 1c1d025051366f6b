// models.rs
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOption {
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    Text,
    Image,
}

impl PollType {
    pub fn as_str(self) -> &'static str {
        match self {
            PollType::Text => "text",
            PollType::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(PollType::Text),
            "image" => Some(PollType::Image),
            _ => None,
        }
    }
}

/// The ordered, index-addressed choices of a poll. A poll carries exactly one
/// of the two representations.
///
/// Serializes to its storage form: a bare array of strings or of image objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PollOptions {
    Text(Vec<String>),
    Image(Vec<ImageOption>),
}

impl PollOptions {
    pub fn len(&self) -> usize {
        match self {
            PollOptions::Text(labels) => labels.len(),
            PollOptions::Image(images) => images.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn poll_type(&self) -> PollType {
        match self {
            PollOptions::Text(_) => PollType::Text,
            PollOptions::Image(_) => PollType::Image,
        }
    }

    pub fn label(&self, index: usize) -> Option<OptionLabel> {
        match self {
            PollOptions::Text(labels) => labels.get(index).cloned().map(OptionLabel::Text),
            PollOptions::Image(images) => images.get(index).cloned().map(OptionLabel::Image),
        }
    }

    pub fn from_json(
        poll_type: PollType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match poll_type {
            PollType::Text => PollOptions::Text(serde_json::from_value(value)?),
            PollType::Image => PollOptions::Image(serde_json::from_value(value)?),
        })
    }
}

/// One option as it appears in a results listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionLabel {
    Text(String),
    Image(ImageOption),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub options: PollOptions,
    pub allow_multiple_selections: bool,
    pub max_selections: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}

impl Serialize for Poll {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Poll", 8)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("question", &self.question)?;
        state.serialize_field("poll_type", &self.options.poll_type())?;
        match &self.options {
            PollOptions::Text(labels) => state.serialize_field("options", labels)?,
            PollOptions::Image(images) => state.serialize_field("image_options", images)?,
        }
        state.serialize_field("allow_multiple_selections", &self.allow_multiple_selections)?;
        if let Some(max) = self.max_selections {
            state.serialize_field("max_selections", &max)?;
        } else {
            state.skip_field("max_selections")?;
        }
        state.serialize_field("created_at", &self.created_at)?;
        state.serialize_field("updated_at", &self.updated_at)?;
        state.end()
    }
}

/// A validated poll definition that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub question: String,
    pub options: PollOptions,
    pub allow_multiple_selections: bool,
    pub max_selections: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    #[serde(default)]
    pub question: Option<String>,
    pub options: Option<Vec<String>>,
    pub image_options: Option<Vec<ImageOption>>,
    #[serde(default)]
    pub allow_multiple_selections: bool,
    pub max_selections: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub poll_id: Uuid,
    pub option_index: Option<i64>,
    pub option_indices: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    pub recorded: usize,
    pub submission_id: Uuid,
}

/// A checked selection, ready to be written as one row per index.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub poll_id: Uuid,
    pub option_indices: Vec<i32>,
    pub voter_ip: Option<String>,
    pub reject_repeat_voter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub submission_id: Uuid,
    pub option_index: i32,
    pub voter_ip: Option<String>,
    pub voted_at: DateTime<Utc>,
}

/// Aggregated row count for one option index (from query)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionCount {
    pub option_index: i32,
    pub votes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteCounts {
    pub per_option: Vec<OptionCount>,
    pub submissions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionResult {
    pub option: OptionLabel,
    pub votes: i64,
    pub percentage: f64,
}

/// `total_votes` counts one per selected option, so on multi-select polls it
/// can exceed `total_submissions`. Rows past the poll's options land in
/// `ignored_votes`, and a submission made only of such rows is not counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResults {
    pub poll: Poll,
    pub results: Vec<OptionResult>,
    #[serde(rename = "totalVotes")]
    pub total_votes: i64,
    #[serde(rename = "totalSubmissions")]
    pub total_submissions: i64,
    #[serde(rename = "ignoredVotes", skip_serializing_if = "is_zero")]
    pub ignored_votes: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
