//! Free text to [`DonationRecord`].
//!
//! One prompt goes to the model with the record schema as the response format.
//! The answer is parsed and validated here, never trusted: anything outside the
//! closed vocabularies or with an inverted pickup window is a schema violation,
//! which earns a bounded number of corrective re-prompts before failing outward.

use std::sync::Arc;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tera::{Context, Tera};
use thiserror::Error;

use foodlink_core::config::AppConfig;
use foodlink_core::domain::donation::{
    DonationRecord, FoodType, Handling, PickupWindow, Quantity, QuantityUnit,
};
use foodlink_core::errors::ApplicationError;

use crate::cues;
use crate::llm::{CompletionRequest, LlmClient, LlmError, PromptMessage, ResponseSchema};

pub const RESPONSE_SCHEMA_NAME: &str = "donation_record";

const INSTRUCTIONS_TEMPLATE: &str = "donation_extraction";
const CORRECTION_TEMPLATE: &str = "donation_correction";

const TIMESTAMP_FORMATS: &[&str] =
    &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("donation details failed validation after {attempts} attempt(s): {reason}")]
    SchemaViolation { reason: String, attempts: u32 },
    #[error("language model unavailable after {attempts} attempt(s): {source}")]
    Gateway {
        #[source]
        source: LlmError,
        attempts: u32,
    },
    #[error("extraction prompt could not be rendered: {0}")]
    Prompt(String),
}

impl From<ExtractionError> for ApplicationError {
    fn from(value: ExtractionError) -> Self {
        match value {
            ExtractionError::SchemaViolation { reason, .. } => Self::SchemaViolation(reason),
            ExtractionError::Gateway { source, .. } => Self::Integration(source.to_string()),
            ExtractionError::Prompt(reason) => Self::Configuration(reason),
        }
    }
}

impl From<tera::Error> for ExtractionError {
    fn from(value: tera::Error) -> Self {
        Self::Prompt(value.to_string())
    }
}

#[derive(Serialize)]
struct HintContext {
    start: String,
    end: String,
}

pub struct DonationExtractor {
    llm: Arc<dyn LlmClient>,
    templates: Tera,
    max_reprompts: u32,
}

impl DonationExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, max_reprompts: u32) -> Result<Self, ExtractionError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(vec![
            (INSTRUCTIONS_TEMPLATE, include_str!("prompts/donation_extraction.md")),
            (CORRECTION_TEMPLATE, include_str!("prompts/donation_correction.md")),
        ])?;
        Ok(Self { llm, templates, max_reprompts })
    }

    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, ExtractionError> {
        Self::new(llm, config.extraction.max_reprompts)
    }

    /// Extracts against today's local date.
    pub async fn extract_now(&self, text: &str) -> Result<DonationRecord, ExtractionError> {
        self.extract(text, Local::now().date_naive()).await
    }

    pub async fn extract(
        &self,
        text: &str,
        reference_date: NaiveDate,
    ) -> Result<DonationRecord, ExtractionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::SchemaViolation {
                reason: "donation text is empty".to_string(),
                attempts: 0,
            });
        }

        let system = self.render_instructions(text, reference_date)?;
        let mut messages = vec![PromptMessage::Human(text.to_string())];
        let mut attempts = 0;
        let mut reprompts = 0;
        // One gateway retry per extraction, on top of the re-prompt budget.
        let mut gateway_failure: Option<LlmError> = None;

        tracing::debug!(
            event_name = "agent.extraction.started",
            reference_date = %reference_date,
            max_reprompts = self.max_reprompts,
            "extracting donation details"
        );

        loop {
            attempts += 1;
            let request = CompletionRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: Vec::new(),
                response_schema: Some(ResponseSchema {
                    name: RESPONSE_SCHEMA_NAME.to_string(),
                    schema: donation_schema(),
                }),
            };

            let completion = match self.llm.complete(request).await {
                Ok(completion) => completion,
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.extraction.gateway_failed",
                        attempt = attempts,
                        error = %error,
                        "language model call failed during extraction"
                    );
                    if let Some(first) = gateway_failure.take() {
                        return Err(ExtractionError::Gateway { source: first, attempts });
                    }
                    gateway_failure = Some(error);
                    continue;
                }
            };

            let raw = completion.final_text().unwrap_or_default().to_string();
            match parse_record(&raw) {
                Ok(record) => {
                    let record = cues::reconcile(record, text, reference_date);
                    tracing::info!(
                        event_name = "agent.extraction.completed",
                        attempt = attempts,
                        food_type = record.food_type.label(),
                        unit = record.quantity.unit.label(),
                        "donation details extracted"
                    );
                    return Ok(record);
                }
                Err(reason) => {
                    tracing::warn!(
                        event_name = "agent.extraction.schema_violation",
                        attempt = attempts,
                        reason = %reason,
                        "model output rejected"
                    );
                    if reprompts >= self.max_reprompts {
                        return Err(ExtractionError::SchemaViolation { reason, attempts });
                    }
                    reprompts += 1;
                    messages.push(PromptMessage::Agent(raw));
                    messages.push(PromptMessage::Human(self.render_correction(&reason)?));
                }
            }
        }
    }

    fn render_instructions(
        &self,
        text: &str,
        reference_date: NaiveDate,
    ) -> Result<String, ExtractionError> {
        let hint = cues::pickup_hint(text, reference_date).map(|window| HintContext {
            start: window.start.format("%Y-%m-%dT%H:%M").to_string(),
            end: window.end.format("%Y-%m-%dT%H:%M").to_string(),
        });
        let tomorrow = reference_date.checked_add_days(Days::new(1)).unwrap_or(reference_date);

        let mut context = Context::new();
        context.insert("reference_date", &reference_date.format("%Y-%m-%d").to_string());
        context.insert("tomorrow", &tomorrow.format("%Y-%m-%d").to_string());
        context.insert("food_types", &labels(FoodType::ALL.map(|kind| kind.label())));
        context.insert("units", &labels(QuantityUnit::ALL.map(|unit| unit.label())));
        context.insert("hint", &hint);
        Ok(self.templates.render(INSTRUCTIONS_TEMPLATE, &context)?)
    }

    fn render_correction(&self, violation: &str) -> Result<String, ExtractionError> {
        let mut context = Context::new();
        context.insert("violation", violation);
        Ok(self.templates.render(CORRECTION_TEMPLATE, &context)?)
    }
}

/// JSON schema handed to the model as the response format.
pub fn donation_schema() -> Value {
    let food_types: Vec<&str> = FoodType::ALL.iter().map(FoodType::label).collect();
    let units: Vec<&str> = QuantityUnit::ALL.iter().map(QuantityUnit::label).collect();
    let flag = json!({"type": "boolean"});
    let timestamp = json!({"type": "string", "description": "ISO 8601 local datetime"});

    json!({
        "type": "object",
        "properties": {
            "food_type": {"type": "string", "enum": food_types},
            "quantity": {
                "type": "object",
                "properties": {
                    "amount": {"type": "number"},
                    "unit": {"type": "string", "enum": units},
                },
                "required": ["amount", "unit"],
                "additionalProperties": false,
            },
            "pickup_window": {
                "type": "object",
                "properties": {"start": timestamp, "end": timestamp},
                "required": ["start", "end"],
                "additionalProperties": false,
            },
            "handling": {
                "type": "object",
                "properties": {
                    "refrigeration": flag,
                    "freezing": flag,
                    "fragile": flag,
                    "heavyLifting": flag,
                },
                "required": ["refrigeration", "freezing", "fragile", "heavyLifting"],
                "additionalProperties": false,
            },
            "notes": {"type": ["string", "null"]},
        },
        "required": ["food_type", "quantity", "pickup_window", "handling", "notes"],
        "additionalProperties": false,
    })
}

/// Parses and validates one model answer. The error is the violation text fed
/// back to the model on a re-prompt.
fn parse_record(raw: &str) -> Result<DonationRecord, String> {
    let body = json_body(raw).ok_or_else(|| "the reply did not contain a JSON object".to_string())?;
    let value: Value =
        serde_json::from_str(body).map_err(|error| format!("the reply is not valid JSON: {error}"))?;
    let object = value.as_object().ok_or_else(|| "the reply must be a JSON object".to_string())?;

    let food_type = {
        let label = string_field(object, &["food_type", "foodType"], "food_type")?;
        FoodType::from_label(label).ok_or_else(|| {
            format!("food_type '{label}' is not one of {}", labels(FoodType::ALL.map(|k| k.label())))
        })?
    };

    let quantity = {
        let quantity = object_field(object, &["quantity"], "quantity")?;
        let amount = amount_field(quantity)?;
        let label = string_field(quantity, &["unit"], "quantity.unit")?;
        let unit = QuantityUnit::from_label(label).ok_or_else(|| {
            format!(
                "quantity.unit '{label}' is not one of {}",
                labels(QuantityUnit::ALL.map(|u| u.label()))
            )
        })?;
        Quantity::new(amount, unit).map_err(|error| error.to_string())?
    };

    let pickup_window = {
        let window = object_field(object, &["pickup_window", "pickupWindow"], "pickup_window")?;
        let start = timestamp_field(window, &["start", "startTime", "start_time"], "start")?;
        let end = timestamp_field(window, &["end", "endTime", "end_time"], "end")?;
        PickupWindow::new(start, end).map_err(|error| error.to_string())?
    };

    let handling = match first_present(object, &["handling"]) {
        None => Handling::default(),
        Some(Value::Object(flags)) => Handling {
            refrigeration: flag_field(flags, &["refrigeration"], "refrigeration")?,
            freezing: flag_field(flags, &["freezing"], "freezing")?,
            fragile: flag_field(flags, &["fragile"], "fragile")?,
            heavy_lifting: flag_field(flags, &["heavyLifting", "heavy_lifting"], "heavyLifting")?,
        },
        Some(_) => return Err("handling must be an object of booleans".to_string()),
    };

    let notes = match first_present(object, &["notes"]) {
        None => None,
        Some(Value::String(notes)) => Some(notes.trim().to_string()).filter(|n| !n.is_empty()),
        Some(_) => return Err("notes must be a string or null".to_string()),
    };

    Ok(DonationRecord { food_type, quantity, pickup_window, handling, notes })
}

/// The `{...}` span of a reply, tolerating code fences and surrounding prose.
fn json_body(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn labels<const N: usize>(values: [&str; N]) -> String {
    values.iter().map(|value| format!("\"{value}\"")).collect::<Vec<_>>().join(", ")
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| object.get(*key)).find(|value| !value.is_null())
}

fn string_field<'a>(
    object: &'a Map<String, Value>,
    keys: &[&str],
    name: &str,
) -> Result<&'a str, String> {
    match first_present(object, keys) {
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(format!("{name} must be a string")),
        None => Err(format!("{name} is missing")),
    }
}

fn object_field<'a>(
    object: &'a Map<String, Value>,
    keys: &[&str],
    name: &str,
) -> Result<&'a Map<String, Value>, String> {
    match first_present(object, keys) {
        Some(Value::Object(value)) => Ok(value),
        Some(_) => Err(format!("{name} must be an object")),
        None => Err(format!("{name} is missing")),
    }
}

fn amount_field(quantity: &Map<String, Value>) -> Result<f64, String> {
    let amount = match first_present(quantity, &["amount"]) {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(_) => None,
        None => return Err("quantity.amount is missing".to_string()),
    };
    amount.ok_or_else(|| "quantity.amount must be a number".to_string())
}

fn timestamp_field(
    window: &Map<String, Value>,
    keys: &[&str],
    name: &str,
) -> Result<NaiveDateTime, String> {
    let value = string_field(window, keys, &format!("pickup_window.{name}"))?;
    parse_timestamp(value)
        .ok_or_else(|| format!("pickup_window.{name} '{value}' is not an ISO 8601 datetime"))
}

fn flag_field(flags: &Map<String, Value>, keys: &[&str], name: &str) -> Result<bool, String> {
    match first_present(flags, keys) {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(_) => Err(format!("handling.{name} must be true or false")),
    }
}

/// Offsets are dropped: the wall-clock time the donor named is what matters.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    let value = value.trim_end_matches('Z');
    TIMESTAMP_FORMATS.iter().find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}
