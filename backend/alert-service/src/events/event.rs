use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Pub/sub event category. Channel routing is a pure function of this type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ViolationDetected,
    ScoreChanged,
    ThresholdBreach,
    AssessmentCompleted,
    RemediationCompleted,
    CertificationExpiring,
    SystemHealth,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ViolationDetected => "violation_detected",
            EventType::ScoreChanged => "score_changed",
            EventType::ThresholdBreach => "threshold_breach",
            EventType::AssessmentCompleted => "assessment_completed",
            EventType::RemediationCompleted => "remediation_completed",
            EventType::CertificationExpiring => "certification_expiring",
            EventType::SystemHealth => "system_health",
        }
    }

    /// Fixed type -> bucket table; types outside it land in `general`.
    pub fn bucket(&self) -> &'static str {
        match self {
            EventType::ViolationDetected => "violations",
            EventType::ScoreChanged => "scores",
            EventType::ThresholdBreach => "thresholds",
            EventType::AssessmentCompleted => "assessments",
            EventType::RemediationCompleted => "remediations",
            EventType::CertificationExpiring => "certifications",
            _ => "general",
        }
    }
}

/// Flat JSON envelope carried over the pub/sub transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            model_id: None,
            model_name: None,
            payload: Map::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Channel this event routes to: `<prefix>:<bucket>`.
    pub fn channel(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.event_type.bucket())
    }

    /// Reserved catch-all channel that receives every event.
    pub fn all_channel(prefix: &str) -> String {
        format!("{prefix}:all")
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_routing_follows_the_type_table() {
        let cases = [
            (EventType::AssessmentCompleted, "compliance:assessments"),
            (EventType::ViolationDetected, "compliance:violations"),
            (EventType::RemediationCompleted, "compliance:remediations"),
            (EventType::ScoreChanged, "compliance:scores"),
            (EventType::ThresholdBreach, "compliance:thresholds"),
            (EventType::CertificationExpiring, "compliance:certifications"),
            (EventType::SystemHealth, "compliance:general"),
        ];

        for (event_type, expected) in cases {
            let event = Event::new(event_type, "test");
            assert_eq!(event.channel("compliance"), expected);
        }
    }

    #[test]
    fn all_channel_is_prefix_scoped() {
        assert_eq!(Event::all_channel("compliance"), "compliance:all");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let mut payload = Map::new();
        payload.insert("risk_score".into(), 72.5.into());

        let event = Event::new(EventType::AssessmentCompleted, "compliance_engine")
            .with_model("model_001", "Lead Scoring AI")
            .with_payload(payload);

        let json = event.to_json().unwrap();
        let decoded = Event::from_json(&json).unwrap();

        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.event_type, EventType::AssessmentCompleted);
        assert_eq!(decoded.model_id.as_deref(), Some("model_001"));
        assert_eq!(decoded.payload["risk_score"], 72.5);
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        assert!(Event::from_json("{not json").is_err());
        assert!(Event::from_json(r#"{"event_id":"x"}"#).is_err());
    }
}
