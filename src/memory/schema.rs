//! Outbound contract check for `ResponseEnvelope`.
//!
//! A failure here means the pipeline is miswired; callers log it and fail
//! the request rather than returning a partial envelope.

use std::collections::HashSet;

use crate::error::ContractError;
use crate::memory::synthesizer::MAX_RESPONSE_ITEMS;
use crate::memory::types::{Confidence, ResponseEnvelope};

const MAX_ITEM_PARTICIPANTS: usize = 8;

/// Validate an envelope against the outbound contract.
pub fn validate_response(envelope: &ResponseEnvelope) -> Result<(), ContractError> {
    if envelope.items.len() > MAX_RESPONSE_ITEMS {
        return Err(ContractError::TooManyItems {
            count: envelope.items.len(),
            max: MAX_RESPONSE_ITEMS,
        });
    }

    if envelope.items.is_empty() {
        if envelope
            .fallback_message
            .as_deref()
            .is_none_or(|m| m.trim().is_empty())
        {
            return Err(ContractError::MissingFallbackMessage);
        }
        if envelope.confidence != Confidence::Low {
            return Err(ContractError::ConfidenceMismatch {
                confidence: envelope.confidence.as_str().to_string(),
            });
        }
    }

    let mut seen = HashSet::new();
    for (index, item) in envelope.items.iter().enumerate() {
        let invalid = |reason: &str| ContractError::InvalidItem {
            index,
            reason: reason.to_string(),
        };
        if item.source_id.trim().is_empty() {
            return Err(invalid("source_id is empty"));
        }
        if item.title.trim().is_empty() {
            return Err(invalid("title is empty"));
        }
        if !item.score.is_finite() || !(0.0..=1.0).contains(&item.score) {
            return Err(invalid("score must be a finite number in [0, 1]"));
        }
        if item.participants.len() > MAX_ITEM_PARTICIPANTS {
            return Err(invalid("too many participants"));
        }
        if !seen.insert(item.source_id.as_str()) {
            return Err(ContractError::DuplicateItem {
                source_id: item.source_id.clone(),
            });
        }
    }

    Ok(())
}
