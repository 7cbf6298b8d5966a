use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events a subscriber sends to the synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CollabClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        assessment_id: String,
        question_id: String,
        candidate_id: String,
    },
    CodeChange {
        code: String,
    },
    WhiteboardChange {
        whiteboard: Vec<Value>,
    },
}

/// Events the synchronizer sends to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CollabServerEvent {
    LoadInitialState {
        code: String,
        whiteboard: Vec<Value>,
    },
    CodeUpdate {
        code: String,
    },
    WhiteboardUpdate {
        whiteboard: Vec<Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_deserializes_camel_case_fields() {
        let raw = json!({
            "type": "join-room",
            "assessmentId": "a-1",
            "questionId": "q-7",
            "candidateId": "u-42"
        });
        let event: CollabClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            CollabClientEvent::JoinRoom {
                assessment_id,
                question_id,
                candidate_id,
            } => {
                assert_eq!(assessment_id, "a-1");
                assert_eq!(question_id, "q-7");
                assert_eq!(candidate_id, "u-42");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_code_change_round_trips_tag() {
        let event = CollabClientEvent::CodeChange {
            code: "print(1)".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "code-change");
        assert_eq!(value["code"], "print(1)");
    }

    #[test]
    fn test_load_initial_state_serializes_as_kebab_case() {
        let event = CollabServerEvent::LoadInitialState {
            code: "// Start coding here...".to_string(),
            whiteboard: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "load-initial-state");
        assert!(value["whiteboard"].as_array().unwrap().is_empty());
    }
}
