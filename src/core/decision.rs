//! Admission decisions returned by the completion service for a template.

use serde::{Deserialize, Serialize};

use crate::core::BoardError;
use crate::util::text::extract_json_object;

/// Score assigned by the conservative fallback decision.
pub const FALLBACK_PRIORITY_SCORE: u8 = 50;

/// Whether a template should spawn an instance this tick, and how urgently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Create an instance now.
    pub should_create_instance: bool,
    /// Ranking score in `0..=100`.
    pub priority_score: u8,
    /// Minutes until the template is evaluated again.
    #[serde(default)]
    pub cooldown_minutes: Option<u64>,
    /// Model explanation.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl AdmissionDecision {
    /// Non-admitting decision used when the model's answer cannot be trusted.
    #[must_use]
    pub fn fallback(cooldown_secs: u64) -> Self {
        Self {
            should_create_instance: false,
            priority_score: FALLBACK_PRIORITY_SCORE,
            cooldown_minutes: Some(cooldown_secs.div_ceil(60)),
            reasoning: Some("decision unavailable; deferring".into()),
        }
    }

    /// Cooldown in seconds, or `default_secs` if the decision named none.
    #[must_use]
    pub fn cooldown_secs(&self, default_secs: u64) -> u64 {
        self.cooldown_minutes
            .map_or(default_secs, |m| m.saturating_mul(60))
    }
}

/// Raw shape accepted from the model before validation.
#[derive(Debug, Deserialize)]
struct RawDecision {
    should_create_instance: bool,
    priority_score: f64,
    #[serde(default)]
    cooldown_minutes: Option<f64>,
    #[serde(default, alias = "reason")]
    reasoning: Option<String>,
}

/// Parse and validate a decision from free model output.
///
/// The first balanced JSON object in the text is used; anything after it is
/// ignored. The score must be a finite number in `0..=100`; a cooldown must
/// be non-negative.
pub fn parse_decision(text: &str) -> Result<AdmissionDecision, BoardError> {
    let candidate = extract_json_object(text)
        .ok_or_else(|| BoardError::MalformedResponse("no JSON object in response".into()))?;
    let raw: RawDecision = serde_json::from_str(candidate)
        .map_err(|e| BoardError::MalformedResponse(format!("decision schema: {e}")))?;

    if !raw.priority_score.is_finite() || !(0.0..=100.0).contains(&raw.priority_score) {
        return Err(BoardError::MalformedResponse(format!(
            "priority_score {} outside 0..=100",
            raw.priority_score
        )));
    }
    let cooldown_minutes = match raw.cooldown_minutes {
        None => None,
        Some(m) if m.is_finite() && m >= 0.0 => Some(float_to_u64(m.ceil())),
        Some(m) => {
            return Err(BoardError::MalformedResponse(format!(
                "cooldown_minutes {m} is not a non-negative number"
            )));
        }
    };

    Ok(AdmissionDecision {
        should_create_instance: raw.should_create_instance,
        priority_score: float_to_u8(raw.priority_score.round()),
        cooldown_minutes,
        reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn float_to_u8(value: f64) -> u8 {
    value.clamp(0.0, 100.0) as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn float_to_u64(value: f64) -> u64 {
    value.max(0.0) as u64
}
