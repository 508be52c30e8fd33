//! End-of-call report model and structured-output mapping.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::campaign::model::CapturedValue;
use crate::voice::client::{Artifact, CallRecord, StructuredOutputResult};

pub const END_OF_CALL_REPORT: &str = "end-of-call-report";

/// One server message from the voice platform. Only end-of-call reports are
/// acted on.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReport {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub ended_reason: Option<String>,
    #[serde(default)]
    pub call: Option<CallRecord>,
    #[serde(default)]
    pub artifact: Option<Artifact>,
}

/// Reports arrive wrapped as `{"message": {...}}`; bare reports are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { message: CallReport },
    Bare(CallReport),
}

impl CallReport {
    /// Parse a webhook body. `None` for anything that is not a JSON object.
    pub fn parse(body: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Envelope>(body).ok()? {
            Envelope::Wrapped { message } => Some(message),
            Envelope::Bare(report) => Some(report),
        }
    }

    /// Build a report from a call fetched from the platform.
    pub fn from_call(call: CallRecord) -> Self {
        Self {
            kind: Some(END_OF_CALL_REPORT.to_string()),
            ended_reason: call.ended_reason.clone(),
            artifact: call.artifact.clone(),
            call: Some(call),
        }
    }

    pub fn is_end_of_call(&self) -> bool {
        self.kind.as_deref() == Some(END_OF_CALL_REPORT)
    }

    /// Ended reason from the report, else from the call.
    pub fn ended_reason(&self) -> Option<&str> {
        self.ended_reason
            .as_deref()
            .or_else(|| self.call.as_ref().and_then(|c| c.ended_reason.as_deref()))
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Report-level artifact, else the call's.
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact
            .as_ref()
            .or_else(|| self.call.as_ref().and_then(|c| c.artifact.as_ref()))
    }
}

/// Map the first object-valued structured output onto the declared capture keys.
///
/// Undeclared keys are dropped and absent keys are skipped. Finite numbers,
/// strings, and nulls keep their type; anything else is stored as its JSON text.
pub fn map_structured_outputs(
    outputs: Option<&BTreeMap<String, StructuredOutputResult>>,
    keys: &[String],
) -> BTreeMap<String, CapturedValue> {
    let Some(result) = outputs
        .into_iter()
        .flat_map(|o| o.values())
        .find_map(|o| o.result.as_ref().and_then(Value::as_object))
    else {
        return BTreeMap::new();
    };

    keys.iter()
        .filter_map(|key| {
            let value = match result.get(key)? {
                Value::Null => CapturedValue::Null,
                Value::String(s) => CapturedValue::Text(s.clone()),
                Value::Number(n) => match n.as_f64().filter(|f| f.is_finite()) {
                    Some(f) => CapturedValue::Number(f),
                    None => CapturedValue::Text(n.to_string()),
                },
                other => CapturedValue::Text(other.to_string()),
            };
            Some((key.clone(), value))
        })
        .collect()
}
