//! Parsers for free-text step input.
//!
//! Each parser takes the step it is validating for so a failure can be
//! reported against that step and the caller can re-prompt it unchanged.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use balloteer_types::{ActorId, Attachment, CommunityId, FlowInput, PromptStep};

use crate::error::ConversationError;

/// Recorded reason when the admin skips the reason step.
pub const UNSPECIFIED_REASON: &str = "unspecified";

/// Whether the text is the "skip" sentinel (`skip` or `/skip`, any case).
pub fn is_skip(raw: &str) -> bool {
    let trimmed = raw.trim();
    let word = trimmed.strip_prefix('/').unwrap_or(trimmed);
    word.eq_ignore_ascii_case("skip")
}

/// The text of a text input.
pub fn text(step: PromptStep, input: &FlowInput) -> Result<&str, ConversationError> {
    match input {
        FlowInput::Text { text } => Ok(text.as_str()),
        FlowInput::Attachment { .. } | FlowInput::Community { .. } | FlowInput::Voter { .. } => {
            Err(ConversationError::invalid(step, "expected a text answer"))
        }
    }
}

/// Non-empty trimmed text.
pub fn non_empty(step: PromptStep, input: &FlowInput) -> Result<String, ConversationError> {
    let trimmed = text(step, input)?.trim();
    if trimmed.is_empty() {
        return Err(ConversationError::invalid(step, "answer must not be empty"));
    }
    Ok(trimmed.to_owned())
}

/// A strictly positive integer.
pub fn positive(step: PromptStep, input: &FlowInput) -> Result<u64, ConversationError> {
    let raw = text(step, input)?.trim();
    match raw.parse::<u64>() {
        Ok(0) => Err(ConversationError::invalid(step, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(_) => Err(ConversationError::invalid(
            step,
            format!("`{raw}` is not a positive whole number"),
        )),
    }
}

/// A positive integer, or `None` for "skip".
pub fn positive_or_skip(
    step: PromptStep,
    input: &FlowInput,
) -> Result<Option<u64>, ConversationError> {
    if is_skip(text(step, input)?) {
        return Ok(None);
    }
    positive(step, input).map(Some)
}

/// Comma-separated option labels: trimmed, empties dropped, at least two,
/// all distinct, at most `max`.
pub fn options(
    step: PromptStep,
    input: &FlowInput,
    max: usize,
) -> Result<Vec<String>, ConversationError> {
    let labels: Vec<String> = text(step, input)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    if labels.len() < 2 {
        return Err(ConversationError::invalid(
            step,
            "give at least two options separated by commas",
        ));
    }
    if labels.len() > max {
        return Err(ConversationError::invalid(
            step,
            format!("at most {max} options are allowed"),
        ));
    }
    let mut seen = BTreeSet::new();
    if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
        return Err(ConversationError::invalid(
            step,
            format!("option `{dup}` appears twice"),
        ));
    }
    Ok(labels)
}

/// A duration in minutes turned into an absolute deadline.
pub fn deadline(
    step: PromptStep,
    input: &FlowInput,
    now: DateTime<Utc>,
    max_minutes: u64,
) -> Result<DateTime<Utc>, ConversationError> {
    let minutes = positive(step, input)?;
    if minutes > max_minutes {
        return Err(ConversationError::invalid(
            step,
            format!("duration may not exceed {max_minutes} minutes"),
        ));
    }
    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| ConversationError::invalid(step, "duration is out of range"))
}

/// An uploaded attachment, or `None` for "skip".
pub fn attachment_or_skip(
    step: PromptStep,
    input: &FlowInput,
) -> Result<Option<Attachment>, ConversationError> {
    match input {
        FlowInput::Attachment { attachment } => Ok(Some(attachment.clone())),
        FlowInput::Text { text } if is_skip(text) => Ok(None),
        FlowInput::Text { .. } | FlowInput::Community { .. } | FlowInput::Voter { .. } => Err(
            ConversationError::invalid(step, "upload a document or answer skip"),
        ),
    }
}

/// A community picked from the offered list.
pub fn community(step: PromptStep, input: &FlowInput) -> Result<CommunityId, ConversationError> {
    match input {
        FlowInput::Community { community_id } => Ok(*community_id),
        FlowInput::Text { .. } | FlowInput::Attachment { .. } | FlowInput::Voter { .. } => Err(
            ConversationError::invalid(step, "pick a community from the list"),
        ),
    }
}

/// A voter picked from the offered list.
pub fn voter(step: PromptStep, input: &FlowInput) -> Result<ActorId, ConversationError> {
    match input {
        FlowInput::Voter { voter_id } => Ok(*voter_id),
        FlowInput::Text { .. } | FlowInput::Attachment { .. } | FlowInput::Community { .. } => {
            Err(ConversationError::invalid(step, "pick a voter from the list"))
        }
    }
}

/// Free-text reason; "skip" records [`UNSPECIFIED_REASON`].
pub fn reason(step: PromptStep, input: &FlowInput) -> Result<String, ConversationError> {
    if is_skip(text(step, input)?) {
        return Ok(UNSPECIFIED_REASON.to_owned());
    }
    non_empty(step, input)
}
