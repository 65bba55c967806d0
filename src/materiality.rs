//! Materiality gate: asks the model whether a release could move the stock.
//!
//! Cheap by construction: only the first few hundred characters are sent
//! and the answer is a three-field JSON object. A response that cannot be
//! read is treated as material so that nothing is dropped on a parse hiccup.

use crate::error::CompletionError;
use crate::llm::CompletionPool;
use crate::models::MaterialityAssessment;
use crate::utils::{looks_truncated, normalize_whitespace, outermost_json_object, truncate_chars, truncate_for_log};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const FAIL_OPEN_SCORE: f64 = 0.5;
const FAIL_OPEN_REASON: &str = "Parse failure - defaulting to material";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MaterialitySettings {
    /// Run the assessment at all.
    pub enabled: bool,
    /// Skip storing releases judged immaterial. When false the verdict is
    /// only attached to the stored article.
    pub drop_immaterial: bool,
    pub material_threshold: f64,
    pub borderline_threshold: f64,
    pub max_text_length: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for MaterialitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            drop_immaterial: false,
            material_threshold: 0.6,
            borderline_threshold: 0.4,
            max_text_length: 500,
            temperature: 0.05,
            max_tokens: 256,
        }
    }
}

pub struct MaterialityFilter {
    pool: Arc<CompletionPool>,
    settings: MaterialitySettings,
}

impl MaterialityFilter {
    pub fn new(pool: Arc<CompletionPool>, settings: MaterialitySettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &MaterialitySettings {
        &self.settings
    }

    /// Score a release. Pool failures are returned; unreadable answers are not.
    #[instrument(level = "debug", skip_all, fields(%title))]
    pub async fn assess(&self, title: &str, text: &str) -> Result<MaterialityAssessment, CompletionError> {
        let excerpt = normalize_whitespace(text);
        let excerpt = truncate_chars(&excerpt, self.settings.max_text_length);
        let prompt = build_prompt(title, excerpt);

        let completion = self
            .pool
            .call(&prompt, Some(self.settings.temperature), Some(self.settings.max_tokens))
            .await?;

        let assessment = self.parse_response(&completion.text);
        debug!(
            model = %completion.model,
            score = assessment.score,
            material = assessment.is_material,
            borderline = assessment.is_borderline,
            "Materiality assessed"
        );
        Ok(assessment)
    }

    fn parse_response(&self, output: &str) -> MaterialityAssessment {
        let parsed = outermost_json_object(output)
            .ok_or_else(|| "no JSON object in response".to_string())
            .and_then(|json| {
                serde_json::from_str::<Value>(json).map_err(|e| {
                    if looks_truncated(&e) {
                        "response truncated".to_string()
                    } else {
                        e.to_string()
                    }
                })
            })
            .and_then(|value| {
                if value.is_object() {
                    Ok(value)
                } else {
                    Err("response is not an object".to_string())
                }
            });

        let value = match parsed {
            Ok(v) => v,
            Err(reason) => {
                warn!(%reason, output = %truncate_for_log(output, 200), "Unreadable materiality response; treating as material");
                return MaterialityAssessment {
                    score: FAIL_OPEN_SCORE,
                    is_material: true,
                    is_borderline: false,
                    reason: FAIL_OPEN_REASON.to_string(),
                };
            }
        };

        let score = number(value.get("materiality_score"))
            .unwrap_or(FAIL_OPEN_SCORE)
            .clamp(0.0, 1.0);
        let is_material = score >= self.settings.material_threshold;
        let is_borderline = !is_material && score >= self.settings.borderline_threshold;
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("No reason provided")
            .to_string();

        MaterialityAssessment {
            score,
            is_material,
            is_borderline,
            reason,
        }
    }
}

/// Accept both `0.8` and `"0.8"`; models are not consistent about it.
fn number(value: Option<&Value>) -> Option<f64> {
    let n: f64 = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn build_prompt(title: &str, excerpt: &str) -> String {
    format!(
        r#"You are a financial materiality analyst. Decide whether this press release describes a MATERIAL event that could meaningfully move the issuer's stock price or change its business fundamentals.

MATERIAL events: earnings results, changes to revenue or profit guidance, mergers and acquisitions, executive departures or appointments, FDA or other regulatory approvals and rejections, activist investor campaigns, large contract wins or losses, restructurings and layoffs, significant litigation, debt or equity offerings, clinical trial readouts, spin-offs, share buybacks, dividend changes.

IMMATERIAL events: marketing campaigns, conference appearances, webinars, CSR or sustainability reports, routine hiring, awards, minor partnerships, holiday greetings, product updates with no financial impact.

TITLE: {title}

EXCERPT:
{excerpt}

Respond ONLY with JSON in exactly this shape:
{{"materiality_score": 0.85, "is_material": true, "reason": "One short sentence"}}"#
    )
}
