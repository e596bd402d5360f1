use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{ sse::{ Event, Sse }, IntoResponse, Response },
};
use futures::StreamExt;
use log::warn;
use std::convert::Infallible;

use super::api::{ json_error, AppState };

/// `POST /chat`: relays the conversation upstream and streams deltas back as
/// server-sent events. Every failure after this point is an `error` event on
/// a 200 stream.
pub async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    if let Some(limiter) = &state.chat_limiter {
        if limiter.check().is_err() {
            warn!("Chat rate limit exceeded");
            return json_error(StatusCode::TOO_MANY_REQUESTS, "Too many chat requests. Try again shortly.", None);
        }
    }

    let events = state.relay
        .relay_body(&body)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));
    Sse::new(events).into_response()
}
