use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Byte counts for a single layer or step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
}

/// Structured error reported in-band by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// One line of a pull, push or build progress stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_detail: Option<ProgressDetail>,
    /// Build output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    /// Free-form payload, e.g. `{"ID": "sha256:..."}` after a build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_nano: Option<i64>,
}

impl ProgressEvent {
    /// Event carrying only a status line.
    pub fn from_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    /// The engine-reported failure, if this event carries one.
    pub fn error_message(&self) -> Option<&str> {
        self.error_detail
            .as_ref()
            .map(|d| d.message.as_str())
            .filter(|m| !m.is_empty())
            .or(self.error.as_deref())
    }

    /// `aux.ID`, the image id a build produced.
    pub fn aux_id(&self) -> Option<&str> {
        self.aux.as_ref()?.get("ID")?.as_str()
    }

    /// Single-line rendering used by console followers, if the event has
    /// anything to show.
    pub fn display_line(&self) -> Option<String> {
        if let Some(status) = &self.status {
            let mut line = status.clone();
            if let Some(progress) = self.progress.as_deref().filter(|p| !p.is_empty()) {
                line.push(' ');
                line.push_str(progress);
            }
            return Some(line);
        }
        if let Some(stream) = &self.stream {
            return Some(stream.trim_end_matches('\n').to_string());
        }
        self.aux_id().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pull_line() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"status":"Downloading","progressDetail":{"current":1024,"total":4096},"progress":"[==>  ]","id":"a1b2"}"#,
        )
        .unwrap();
        assert_eq!(event.status.as_deref(), Some("Downloading"));
        assert_eq!(event.progress_detail.as_ref().and_then(|d| d.total), Some(4096));
        assert_eq!(event.display_line().unwrap(), "Downloading [==>  ]");
    }

    #[test]
    fn error_detail_wins_over_error() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"error":"short","errorDetail":{"message":"manifest unknown"}}"#,
        )
        .unwrap();
        assert_eq!(event.error_message(), Some("manifest unknown"));

        let event: ProgressEvent = serde_json::from_str(r#"{"error":"only this"}"#).unwrap();
        assert_eq!(event.error_message(), Some("only this"));
    }

    #[test]
    fn build_stream_and_aux_lines() {
        let event: ProgressEvent = serde_json::from_str(r#"{"stream":"Step 1/2 : FROM alpine\n"}"#).unwrap();
        assert_eq!(event.display_line().unwrap(), "Step 1/2 : FROM alpine");

        let event: ProgressEvent = serde_json::from_str(r#"{"aux":{"ID":"sha256:abc"}}"#).unwrap();
        assert_eq!(event.aux_id(), Some("sha256:abc"));
        assert_eq!(event.display_line().unwrap(), "sha256:abc");

        assert_eq!(ProgressEvent::default().display_line(), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let event: ProgressEvent = serde_json::from_str(r#"{"status":"a","somethingNew":1}"#).unwrap();
        assert_eq!(event, ProgressEvent::from_status("a"));
    }
}
