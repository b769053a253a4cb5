use serde::{Deserialize, Serialize};

use crate::endpoint::headers;
use crate::envelope::TransportResponse;
use crate::error::{ProtocolError, ProtocolResult};

/// Availability of one build host, as reported by a probe or piggybacked
/// on a build result. Lower scores mean less load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub hostname: String,
    pub score: f64,
}

impl Availability {
    /// Parse a probe response, falling back to the `chosen-host` header
    /// when the body does not name the host.
    pub fn from_response(response: &TransportResponse) -> ProtocolResult<Self> {
        let mut availability: Availability = serde_json::from_slice(&response.body)
            .map_err(|e| ProtocolError::MalformedResult(e.to_string()))?;
        if availability.host.is_empty() {
            availability.host = response
                .header(headers::CHOSEN_HOST)
                .ok_or_else(|| ProtocolError::MalformedResult("probe response names no host".into()))?
                .to_string();
        }
        if availability.hostname.is_empty() {
            availability.hostname = availability.host.clone();
        }
        Ok(availability)
    }
}

/// Structured outcome of a submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<Availability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_nano: Option<u64>,
}

impl BuildResult {
    pub const SUCCESS: &'static str = "success";

    pub fn success() -> Self {
        Self {
            code: Self::SUCCESS.into(),
            message: None,
            availability: None,
            time_nano: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }

    /// Parse a response body. Returns `None` when the body is not a
    /// structured result.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    /// Human-readable message, if any.
    pub fn message_text(&self) -> Option<String> {
        self.message.as_ref().map(|m| match m {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}
