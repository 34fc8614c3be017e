//! Frames the relay itself produces or rewrites.

use avatar_playback::{AUDIO_PATH_PREFIX, ServerFrame};
use serde_json::Value;

use crate::error::RelayError;

/// Reason sent to a client whose message could not be forwarded.
pub const BACKEND_UNAVAILABLE: &str = "backend service is temporarily unavailable";

/// First frame on every new upstream connection.
pub fn handshake() -> String {
    serde_json::json!({
        "type": "handshake",
        "protocol": "websocket",
        "version": "13",
    })
    .to_string()
}

/// Add a resolvable `audioUrl` next to a string `audioFile`.
pub fn annotate_media(frame: &mut Value) {
    let Some(object) = frame.as_object_mut() else {
        return;
    };
    let url = match object.get("audioFile") {
        Some(Value::String(file)) => format!("{AUDIO_PATH_PREFIX}{file}"),
        _ => return,
    };
    object.insert("audioUrl".to_string(), Value::String(url));
}

/// Parse, annotate and re-serialize one upstream text frame.
pub fn prepare_upstream_frame(text: &str) -> Result<String, RelayError> {
    let mut frame: Value = serde_json::from_str(text)?;
    annotate_media(&mut frame);
    Ok(frame.to_string())
}

pub fn error_frame(message: &str) -> Result<String, RelayError> {
    Ok(serde_json::to_string(&ServerFrame::error(message))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_shape() {
        let v: Value = serde_json::from_str(&handshake()).unwrap();
        assert_eq!(
            v,
            json!({"type": "handshake", "protocol": "websocket", "version": "13"})
        );
    }

    #[test]
    fn audio_file_gets_url() {
        let out = prepare_upstream_frame(
            r#"{"type":"reply","message":"嗯","audioFile":"x1.wav","partIndex":0}"#,
        )
        .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["audioUrl"], "/audio/x1.wav");
        assert_eq!(v["audioFile"], "x1.wav");
        assert_eq!(v["message"], "嗯");
        assert_eq!(v["partIndex"], 0);
    }

    #[test]
    fn frames_without_audio_pass_through() {
        let mut v = json!({"type": "reply", "message": "hi"});
        annotate_media(&mut v);
        assert!(v.get("audioUrl").is_none());

        let mut v = json!({"type": "reply", "audioFile": null});
        annotate_media(&mut v);
        assert!(v.get("audioUrl").is_none());

        let mut v = json!(["not", "an", "object"]);
        annotate_media(&mut v);
        assert_eq!(v, json!(["not", "an", "object"]));
    }

    #[test]
    fn unparseable_frame_is_error() {
        assert!(matches!(
            prepare_upstream_frame("<html>"),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn error_frame_decodes_as_server_error() {
        let text = error_frame(BACKEND_UNAVAILABLE).unwrap();
        assert_eq!(
            ServerFrame::decode(&text).unwrap(),
            ServerFrame::error(BACKEND_UNAVAILABLE)
        );
    }
}
