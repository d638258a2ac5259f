use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::relay::OutwardEvent;

pub const CONTENT_TYPE: &str = "text/event-stream";

pub fn event_payload(event: &OutwardEvent) -> serde_json::Value {
    match event {
        OutwardEvent::Token(text) => json!({ "token": text }),
        OutwardEvent::Done => json!({ "done": true }),
        OutwardEvent::Error(message) => json!({ "error": message }),
    }
}

/// One wire frame: `data: <json>\n\n`. The JSON encoder escapes newlines, so
/// a frame never spans more than one `data:` line.
pub fn encode_frame(event: &OutwardEvent) -> Bytes {
    Bytes::from(format!("data: {}\n\n", event_payload(event)))
}

/// Turns the relay's receiver into a streaming response.
///
/// Every event becomes its own body chunk, so hyper writes it out as soon as
/// it is produced. When the client goes away hyper drops the body, which
/// drops the receiver and lets the relay see the closed channel.
pub fn stream_response(events: mpsc::Receiver<OutwardEvent>) -> Response {
    let frames = ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(encode_frame(&event)));

    let mut response = Response::new(Body::from_stream(frames));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// Parses the `data:` payloads back out of an SSE body. Used by the CLI and
/// by tests.
pub fn decode_frames(body: &str) -> Vec<serde_json::Value> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shapes() {
        assert_eq!(
            encode_frame(&OutwardEvent::Token("Ol".into())),
            Bytes::from("data: {\"token\":\"Ol\"}\n\n")
        );
        assert_eq!(encode_frame(&OutwardEvent::Done), Bytes::from("data: {\"done\":true}\n\n"));
        assert_eq!(
            encode_frame(&OutwardEvent::Error("falhou".into())),
            Bytes::from("data: {\"error\":\"falhou\"}\n\n")
        );
    }

    #[test]
    fn test_multiline_token_stays_one_frame() {
        let frame = encode_frame(&OutwardEvent::Token("a\n\nb".into()));
        let text = std::str::from_utf8(&frame).unwrap();
        assert_eq!(text.matches("\n\n").count(), 1);
        assert_eq!(decode_frames(text), vec![json!({ "token": "a\n\nb" })]);
    }

    #[tokio::test]
    async fn test_stream_response_headers_and_body() {
        let (tx, rx) = mpsc::channel(1);
        let response = stream_response(rx);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        tokio::spawn(async move {
            tx.send(OutwardEvent::Token("Hi".into())).await.unwrap();
            tx.send(OutwardEvent::Done).await.unwrap();
        });

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let frames = decode_frames(std::str::from_utf8(&body).unwrap());
        assert_eq!(frames, vec![json!({ "token": "Hi" }), json!({ "done": true })]);
    }
}
