//! Control-bus payloads

use crate::bus::topics;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Reason {0:?} is not a dialogue event")]
    NotDialogue(String),

    #[error("Not a session toggle topic: {0}")]
    NotToggle(String),
}

/// Raw session-control body; every field optional so that incomplete
/// messages can be told apart from malformed JSON
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionControlBody {
    site_id: Option<String>,
    reason: Option<String>,
}

/// A dialogue session toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub site_id: String,
    pub reason: String,
    pub is_toggle_on: bool,
}

impl ControlMessage {
    /// Parse a session-control publication.
    ///
    /// The toggle direction comes from the last topic level
    /// (`toggleOn` / `toggleOff`).
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self, MessageError> {
        let is_toggle_on = match topic.rsplit('/').next() {
            Some(topics::TOGGLE_ON) => true,
            Some(topics::TOGGLE_OFF) => false,
            _ => return Err(MessageError::NotToggle(topic.to_string())),
        };

        let body: SessionControlBody = serde_json::from_slice(payload)?;
        let site_id = non_empty(body.site_id).ok_or(MessageError::MissingField("siteId"))?;
        let reason = non_empty(body.reason).ok_or(MessageError::MissingField("reason"))?;

        if !is_dialogue_reason(&reason) {
            return Err(MessageError::NotDialogue(reason));
        }

        Ok(Self {
            site_id,
            reason,
            is_toggle_on,
        })
    }
}

/// Empty strings count as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Dialogue-class reasons mention `dialogue` anywhere (e.g. `dialogueSession`)
pub fn is_dialogue_reason(reason: &str) -> bool {
    reason.contains("dialogue")
}

/// Published on `detection/{model}/detected` when a filter fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub model_id: String,
    pub model_version: Option<String>,
    pub model_type: Option<String>,
    pub current_sensitivity: f32,
    pub site_id: String,
    pub session_id: Option<String>,
    pub send_audio_captured: Option<bool>,
    pub lang: Option<String>,
    pub custom_entities: Option<serde_json::Value>,
}

impl DetectionEvent {
    pub fn new(model_id: impl Into<String>, current_sensitivity: f32, site_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            model_version: None,
            model_type: None,
            current_sensitivity,
            site_id: site_id.into(),
            session_id: None,
            send_audio_captured: None,
            lang: None,
            custom_entities: None,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Dialogue result observed by the monitor
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub site_id: Option<String>,
    #[serde(default)]
    pub text: String,
    pub likelihood: Option<f64>,
}

impl SessionResult {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_toggle_off() {
        let message = ControlMessage::parse(
            "session-control/toggleOff",
            br#"{"siteId":"kitchen","reason":"dialogueSession"}"#,
        )
        .unwrap();

        assert_eq!(message.site_id, "kitchen");
        assert_eq!(message.reason, "dialogueSession");
        assert!(!message.is_toggle_on);
    }

    #[test]
    fn test_parse_toggle_on_ignores_extra_fields() {
        let message = ControlMessage::parse(
            "session-control/toggleOn",
            br#"{"siteId":"bathroom","reason":"dialogueSession","sessionId":"abc"}"#,
        )
        .unwrap();

        assert!(message.is_toggle_on);
        assert_eq!(message.site_id, "bathroom");
    }

    #[test]
    fn test_incomplete_messages_are_rejected() {
        assert!(matches!(
            ControlMessage::parse("session-control/toggleOff", br#"{"reason":"dialogueSession"}"#),
            Err(MessageError::MissingField("siteId"))
        ));
        assert!(matches!(
            ControlMessage::parse("session-control/toggleOff", br#"{"siteId":"kitchen"}"#),
            Err(MessageError::MissingField("reason"))
        ));
        assert!(matches!(
            ControlMessage::parse(
                "session-control/toggleOff",
                br#"{"siteId":"kitchen","reason":"playAudio"}"#
            ),
            Err(MessageError::NotDialogue(_))
        ));
    }

    #[test]
    fn test_empty_fields_count_as_missing() {
        assert!(matches!(
            ControlMessage::parse(
                "session-control/toggleOff",
                br#"{"siteId":"","reason":"dialogueSession"}"#
            ),
            Err(MessageError::MissingField("siteId"))
        ));
        assert!(matches!(
            ControlMessage::parse("session-control/toggleOn", br#"{"siteId":"kitchen","reason":""}"#),
            Err(MessageError::MissingField("reason"))
        ));
        assert!(matches!(
            ControlMessage::parse("session-control/toggleOff", br#"{"siteId":null,"reason":"dialogueSession"}"#),
            Err(MessageError::MissingField("siteId"))
        ));
    }

    #[test]
    fn test_dialogue_anywhere_in_reason() {
        let message = ControlMessage::parse(
            "session-control/toggleOff",
            br#"{"siteId":"kitchen","reason":"endOfdialogueSession"}"#,
        )
        .unwrap();
        assert_eq!(message.reason, "endOfdialogueSession");

        assert!(is_dialogue_reason("dialogueSession"));
        assert!(!is_dialogue_reason("Dialogue"));
        assert!(!is_dialogue_reason("ttsSay"));
    }

    #[test]
    fn test_malformed_json_and_topics() {
        assert!(matches!(
            ControlMessage::parse("session-control/toggleOff", b"{not json"),
            Err(MessageError::Json(_))
        ));
        assert!(matches!(
            ControlMessage::parse("session-control/startSession", br#"{}"#),
            Err(MessageError::NotToggle(_))
        ));
    }

    #[test]
    fn test_detection_event_unused_fields_are_null() {
        let event = DetectionEvent::new("alexa", 0.5, "kitchen");
        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "modelId": "alexa",
                "modelVersion": null,
                "modelType": null,
                "currentSensitivity": 0.5,
                "siteId": "kitchen",
                "sessionId": null,
                "sendAudioCaptured": null,
                "lang": null,
                "customEntities": null
            })
        );
    }

    #[test]
    fn test_session_result() {
        let result =
            SessionResult::parse(br#"{"siteId":"kitchen","text":"turn on the lights","likelihood":0.92}"#)
                .unwrap();

        assert_eq!(result.site_id.as_deref(), Some("kitchen"));
        assert_eq!(result.text, "turn on the lights");
        assert_eq!(result.likelihood, Some(0.92));
    }
}
