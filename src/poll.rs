// src/poll.rs
//! Poll definition checks, vote selection rules and result aggregation.
//!
//! Everything here is pure: the store hands in rows, these functions decide.
use std::collections::HashSet;

use tracing::warn;

use crate::error::{AppError, ValidationError};
use crate::models::{
    CreatePollRequest, ImageOption, NewPoll, OptionResult, Poll, PollOptions, PollResults,
    VoteCounts, VoteRequest,
};

pub const MIN_OPTIONS: usize = 2;

/// Checks a creation request and normalizes it into a storable poll.
pub fn validate_poll(request: CreatePollRequest) -> Result<NewPoll, ValidationError> {
    let question = request.question.as_deref().unwrap_or_default().trim();
    if question.is_empty() {
        return Err(ValidationError::MissingQuestion);
    }

    let labels = request.options.filter(|o| !o.is_empty());
    let images = request.image_options.filter(|o| !o.is_empty());

    let options = match (labels, images) {
        (Some(_), Some(_)) => return Err(ValidationError::AmbiguousOptions),
        (None, None) => return Err(ValidationError::InsufficientOptions),
        (Some(labels), None) => {
            if labels.len() < MIN_OPTIONS {
                return Err(ValidationError::InsufficientOptions);
            }
            let labels: Vec<String> = labels.iter().map(|l| l.trim().to_string()).collect();
            if labels.iter().any(String::is_empty) {
                return Err(ValidationError::EmptyOptionLabel);
            }
            PollOptions::Text(labels)
        }
        (None, Some(images)) => {
            if images.len() < MIN_OPTIONS {
                return Err(ValidationError::InsufficientOptions);
            }
            let images: Vec<ImageOption> = images.into_iter().map(normalize_image).collect();
            if images.iter().any(|image| image.image_url.is_empty()) {
                return Err(ValidationError::MissingImageReference);
            }
            PollOptions::Image(images)
        }
    };

    // A bound only means something when several options may be picked.
    let max_selections = if request.allow_multiple_selections {
        match request.max_selections {
            None => None,
            Some(max) => Some(
                u32::try_from(max)
                    .ok()
                    .filter(|m| *m >= 1 && (*m as usize) <= options.len())
                    .ok_or(ValidationError::InvalidMaxSelections)?,
            ),
        }
    } else {
        None
    };

    Ok(NewPoll {
        question: question.to_string(),
        options,
        allow_multiple_selections: request.allow_multiple_selections,
        max_selections,
    })
}

fn normalize_image(image: ImageOption) -> ImageOption {
    let caption = image
        .caption
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    ImageOption {
        image_url: image.image_url.trim().to_string(),
        caption,
    }
}

/// Pulls the raw indices out of a vote request. Exactly one of the two
/// fields must be present.
pub fn requested_indices(request: &VoteRequest) -> Result<Vec<i64>, AppError> {
    match (request.option_index, &request.option_indices) {
        (Some(index), None) => Ok(vec![index]),
        (None, Some(indices)) => Ok(indices.clone()),
        (Some(_), Some(_)) => Err(AppError::InvalidSelection(
            "provide option_index or option_indices, not both".to_string(),
        )),
        (None, None) => Err(AppError::InvalidSelection("no option selected".to_string())),
    }
}

/// Checks a selection against the poll's configuration: bounds first, then
/// cardinality.
pub fn validate_selection(poll: &Poll, indices: &[i64]) -> Result<Vec<i32>, AppError> {
    let option_count = poll.option_count();

    let mut checked = Vec::with_capacity(indices.len());
    for &index in indices {
        let valid = i32::try_from(index)
            .ok()
            .filter(|i| usize::try_from(*i).is_ok_and(|i| i < option_count))
            .ok_or(AppError::OutOfRange {
                index,
                option_count,
            })?;
        checked.push(valid);
    }

    if checked.is_empty() {
        return Err(AppError::InvalidSelection("no option selected".to_string()));
    }

    if !poll.allow_multiple_selections {
        if checked.len() != 1 {
            return Err(AppError::InvalidSelection(
                "this poll accepts exactly one option".to_string(),
            ));
        }
        return Ok(checked);
    }

    let distinct: HashSet<i32> = checked.iter().copied().collect();
    if distinct.len() != checked.len() {
        return Err(AppError::InvalidSelection(
            "option indices must be distinct".to_string(),
        ));
    }

    if let Some(max) = poll.max_selections {
        if checked.len() > max as usize {
            return Err(AppError::InvalidSelection(format!(
                "this poll accepts at most {max} options"
            )));
        }
    }

    Ok(checked)
}

/// Share of `total`, in percent, rounded to two decimal places.
pub fn percentage(votes: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (votes as f64 * 100.0 / total as f64 * 100.0).round() / 100.0
}

/// Pairs grouped vote counts with the poll's options by position.
///
/// Counts for indices the poll does not have are left out of the totals and
/// reported as `ignored_votes`.
pub fn tally(poll: Poll, counts: &VoteCounts) -> PollResults {
    let mut votes = vec![0i64; poll.option_count()];
    let mut ignored = 0i64;

    for count in &counts.per_option {
        match usize::try_from(count.option_index)
            .ok()
            .and_then(|i| votes.get_mut(i))
        {
            Some(slot) => *slot += count.votes,
            None => ignored += count.votes,
        }
    }

    if ignored > 0 {
        warn!(poll_id = %poll.id, ignored, "Vote rows reference options the poll does not have");
    }

    let total_votes: i64 = votes.iter().sum();

    let results = votes
        .iter()
        .enumerate()
        .filter_map(|(index, &count)| {
            poll.options.label(index).map(|option| OptionResult {
                option,
                votes: count,
                percentage: percentage(count, total_votes),
            })
        })
        .collect();

    PollResults {
        poll,
        results,
        total_votes,
        total_submissions: counts.submissions,
        ignored_votes: ignored,
    }
}
