//! Prompt text and lenient response parsing.
//!
//! Model output is untrusted. Parsing keeps every well-formed item and drops
//! the rest with a warning; plans are validated again by the caller.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_plan::MetricValue;
use tally_protocol::{DatasetProfile, KpiProposal, KpiSummary, ReportDraft};
use tracing::warn;

use super::LlmError;

pub(crate) fn proposal_system_prompt(count: usize) -> String {
    format!(
        r#"You are a senior data analyst. Propose up to {count} actionable KPIs for the business.
Return a JSON object with key "kpis" whose value is a list of KPI objects.
Each KPI object must have these fields:
  name (string), description (string), rationale (string), formula (string),
  target (string or null), unit (string or null),
  plan: {{
    metric: one of [sum, avg, count, count_distinct, ratio, pct_change],
    column: string or null,
    numerator_column: string or null,
    denominator_column: string or null,
    filters: [] (list of {{column, operator, value}}),
    group_by: [] (list of column names),
    time_column: string or null,
    time_window_days: integer or null
  }}
Filters must use ONLY these operators: [eq, ne, gt, gte, lt, lte, in, contains].
The "in" operator takes a list value.
sum, avg and count_distinct require column. ratio requires numerator_column and denominator_column.
pct_change requires time_column and compares the second half of the window with the first.
For mix or segment KPIs include group_by so a breakdown is stored.
Only reference columns that exist in the schema."#
    )
}

pub(crate) const BUSINESS_MODEL_SYSTEM_PROMPT: &str = r#"You are an expert business analyst.
Summarize the business model in 2-3 concise sentences based on the description and dataset schema.
Return a JSON object with a single key "summary" whose value is the summary string."#;

pub(crate) const REPORT_SYSTEM_PROMPT: &str = r#"You are a management consultant. Analyse the KPI results and produce a structured advisory report.
Focus on business shortcomings, market and operational risks, and forward-looking forecasts.
Do not speculate about KPI calculation quality or data processing.
Return a JSON object with these keys:
  business_model_summary (string),
  risks: [{title, description, severity (low|medium|high)}],
  compliance_notes: [{regulation, observation, action_required (bool)}],
  forecasts: [{kpi_name, horizon_days (int), trend (up|down|flat), narrative}],
  recommendations: [{title, description, requires_approval (bool)}].
Set requires_approval to true for any recommendation that commits spend, changes pricing,
or affects customers directly."#;

/// One line per column: name, dtype, flags and a few samples.
pub(crate) fn schema_summary(profile: &DatasetProfile) -> String {
    let mut lines = vec![format!(
        "Rows: {}, Columns: {}",
        profile.row_count, profile.column_count
    )];
    for col in &profile.columns {
        let mut tags = Vec::new();
        if col.is_date {
            tags.push("date".to_string());
        }
        if col.is_id {
            tags.push("id".to_string());
        }
        if col.null_pct > 0.0 {
            tags.push(format!("{}% null", col.null_pct));
        }
        let tag = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        let samples: Vec<&str> = col.sample_values.iter().take(3).map(String::as_str).collect();
        lines.push(format!(
            "  {} ({}){} sample: {:?}",
            col.name, col.dtype, tag, samples
        ));
    }
    lines.join("\n")
}

pub(crate) fn business_model_user_prompt(
    profile: &DatasetProfile,
    business_description: &str,
) -> String {
    format!(
        "Business description: {}\n\nDataset schema:\n{}",
        business_description,
        schema_summary(profile)
    )
}

pub(crate) fn proposal_user_prompt(
    profile: &DatasetProfile,
    business_description: &str,
    business_model: &str,
) -> String {
    format!(
        "Business description: {}\n\nBusiness model summary: {}\n\nDataset schema:\n{}",
        business_description,
        business_model,
        schema_summary(profile)
    )
}

pub(crate) fn report_user_prompt(
    kpis: &[KpiSummary],
    business_description: &str,
    business_model: &str,
) -> String {
    let kpi_text: Vec<String> = kpis
        .iter()
        .map(|kpi| {
            let value = match kpi.value {
                Some(MetricValue::Number(v)) => v.to_string(),
                Some(MetricValue::NoData) => "no data".to_string(),
                None => "not computed".to_string(),
            };
            let label = kpi
                .value_label
                .as_deref()
                .map(|l| format!(" ({l})"))
                .unwrap_or_default();
            format!(
                "- {}: {}{} {} (target: {})",
                kpi.name,
                value,
                label,
                kpi.unit.as_deref().unwrap_or(""),
                kpi.target.as_deref().unwrap_or("n/a")
            )
        })
        .collect();
    format!(
        "Business description: {}\n\nBusiness model summary: {}\n\nKPI results:\n{}",
        business_description,
        business_model,
        kpi_text.join("\n")
    )
}

/// Extract the business-model summary. A bare string is accepted too.
pub(crate) fn parse_business_model(response: Value) -> Result<String, LlmError> {
    let summary = match response {
        Value::Object(mut map) => match map.remove("summary") {
            Some(Value::String(summary)) => summary,
            _ => match map.remove("business_model_summary") {
                Some(Value::String(summary)) => summary,
                _ => String::new(),
            },
        },
        Value::String(summary) => summary,
        _ => String::new(),
    };
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(LlmError::InvalidResponse(
            "business model response has no summary".to_string(),
        ));
    }
    Ok(summary.to_string())
}

/// Numbers where strings are expected become strings; whole floats where
/// integers are expected become integers.
fn normalize_proposal(item: &mut Value) {
    for key in ["target", "unit"] {
        let replacement = match item.get(key) {
            Some(Value::Number(n)) => Value::String(n.to_string()),
            _ => continue,
        };
        if let Some(slot) = item.get_mut(key) {
            *slot = replacement;
        }
    }
    if let Some(days) = item
        .get_mut("plan")
        .and_then(|plan| plan.get_mut("time_window_days"))
    {
        if let Some(f) = days.as_f64() {
            if f.fract() == 0.0 && days.as_i64().is_none() {
                *days = Value::from(f as i64);
            }
        }
    }
}

/// Extract proposals from a model response, dropping malformed entries.
pub(crate) fn parse_proposals(response: Value) -> Result<Vec<KpiProposal>, LlmError> {
    let items = match response {
        Value::Object(mut map) => match map.remove("kpis") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(LlmError::InvalidResponse(
                    "response has no \"kpis\" list".to_string(),
                ))
            }
        },
        Value::Array(items) => items,
        other => {
            return Err(LlmError::InvalidResponse(format!(
                "expected a JSON object, got {other}"
            )))
        }
    };

    let mut proposals = Vec::with_capacity(items.len());
    for (index, mut item) in items.into_iter().enumerate() {
        normalize_proposal(&mut item);
        match serde_json::from_value::<KpiProposal>(item) {
            Ok(proposal) => proposals.push(proposal),
            Err(e) => warn!(index, error = %e, "Dropping malformed KPI proposal"),
        }
    }
    Ok(proposals)
}

fn parse_items<T: DeserializeOwned>(map: &mut serde_json::Map<String, Value>, key: &str) -> Vec<T> {
    let Some(Value::Array(items)) = map.remove(key) else {
        return Vec::new();
    };
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(section = key, index, error = %e, "Dropping malformed report item");
                None
            }
        })
        .collect()
}

/// Extract a report draft, keeping every well-formed section item.
pub(crate) fn parse_report(response: Value) -> Result<ReportDraft, LlmError> {
    let Value::Object(mut map) = response else {
        return Err(LlmError::InvalidResponse(
            "report response is not a JSON object".to_string(),
        ));
    };
    let business_model_summary = match map.remove("business_model_summary") {
        Some(Value::String(summary)) => summary,
        _ => String::new(),
    };
    Ok(ReportDraft {
        business_model_summary,
        risks: parse_items(&mut map, "risks"),
        compliance_notes: parse_items(&mut map, "compliance_notes"),
        forecasts: parse_items(&mut map, "forecasts"),
        recommendations: parse_items(&mut map, "recommendations"),
    })
}
