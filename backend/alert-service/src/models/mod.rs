use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Alert category raised by the compliance engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ViolationDetected,
    ScoreChanged,
    ThresholdBreach,
    AssessmentCompleted,
    RemediationCompleted,
    CertificationExpiring,
    SystemHealth,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ViolationDetected => "violation_detected",
            AlertType::ScoreChanged => "score_changed",
            AlertType::ThresholdBreach => "threshold_breach",
            AlertType::AssessmentCompleted => "assessment_completed",
            AlertType::RemediationCompleted => "remediation_completed",
            AlertType::CertificationExpiring => "certification_expiring",
            AlertType::SystemHealth => "system_health",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::High => "high",
            AlertSeverity::Medium => "medium",
            AlertSeverity::Low => "low",
            AlertSeverity::Info => "info",
        }
    }
}

/// A notable occurrence distributed to dashboard clients and recipients.
///
/// Immutable after creation; only `acknowledged` flips, via the manager's
/// explicit acknowledge operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regulation: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            model_id: None,
            model_name: None,
            regulation: None,
            timestamp: Utc::now(),
            data: Map::new(),
            acknowledged: false,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_regulation(mut self, regulation: impl Into<String>) -> Self {
        self.regulation = Some(regulation.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_defaults() {
        let alert = Alert::new(
            AlertType::ScoreChanged,
            AlertSeverity::Medium,
            "Score Changed",
            "Compliance score moved",
        );

        assert!(!alert.acknowledged);
        assert!(alert.model_id.is_none());
        assert!(alert.data.is_empty());
        assert!(!alert.id.is_empty());
    }

    #[test]
    fn alert_serializes_snake_case_wire_names() {
        let alert = Alert::new(
            AlertType::ViolationDetected,
            AlertSeverity::High,
            "Data Retention Policy Violation",
            "Training data retained beyond the retention period",
        )
        .with_model("model_001", "Lead Scoring AI")
        .with_regulation("gdpr");

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["alert_type"], "violation_detected");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["regulation"], "gdpr");
    }

    #[test]
    fn severity_as_str_round_trips() {
        for severity in [
            AlertSeverity::Critical,
            AlertSeverity::High,
            AlertSeverity::Medium,
            AlertSeverity::Low,
            AlertSeverity::Info,
        ] {
            let encoded = serde_json::to_string(&severity).unwrap();
            assert_eq!(encoded.trim_matches('"'), severity.as_str());
        }
    }
}
