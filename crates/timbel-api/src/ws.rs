//! WebSocket handler for real-time event streaming.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use timbel_core::events::{Event, Topic};
use timbel_core::ports::EventStream;
use timbel_trace::subscription_span;
use tracing::{Instrument, Span, debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::ApiQuery;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub pipeline: Option<String>,
    pub project: Option<String>,
}

impl WsParams {
    /// Initial topics; no filter means everything.
    fn topics(&self) -> Result<BTreeSet<String>, ApiError> {
        let mut channels = BTreeSet::new();
        if let Some(pipeline) = &self.pipeline {
            let id = pipeline
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("Invalid pipeline id '{}'", pipeline)))?;
            channels.insert(Topic::Pipeline(id).to_string());
        }
        if let Some(project) = &self.project {
            channels.insert(Topic::Project(project.clone()).to_string());
        }
        if channels.is_empty() {
            channels.insert(Topic::Global.to_string());
        }
        Ok(channels)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Event { channel: String, event: Event },
    Subscribed { channels: Vec<String> },
    Unsubscribed { channels: Vec<String> },
    Pong,
    Error { message: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<WsParams>,
) -> Result<Response, ApiError> {
    let channels = params.topics()?;
    let client_id = Uuid::new_v4().to_string();
    let span = subscription_span(&client_id);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, channels).instrument(span)))
}

/// One connected client. Rebuilds its bus subscription whenever the channel
/// set changes; an empty set receives nothing until the next subscribe.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, mut channels: BTreeSet<String>) {
    let mut events = subscribe(&state, &channels).await;
    let initial = ServerMessage::Subscribed {
        channels: channels.iter().cloned().collect(),
    };
    if !send(&mut socket, &initial).await {
        return;
    }
    debug!("WebSocket client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { channels: requested }) => {
                        match parse_channels(&requested) {
                            Ok(parsed) => {
                                channels.extend(parsed);
                                events = subscribe(&state, &channels).await;
                                ServerMessage::Subscribed { channels: requested }
                            }
                            Err(message) => ServerMessage::Error { message },
                        }
                    }
                    Ok(ClientMessage::Unsubscribe { channels: requested }) => {
                        match remove_channels(&mut channels, &requested) {
                            Ok(()) => {
                                events = subscribe(&state, &channels).await;
                                ServerMessage::Unsubscribed { channels: requested }
                            }
                            Err(message) => ServerMessage::Error { message },
                        }
                    }
                    Ok(ClientMessage::Ping) => ServerMessage::Pong,
                    Err(e) => ServerMessage::Error {
                        message: format!("Invalid message: {}", e),
                    },
                };

                if !send(&mut socket, &reply).await {
                    break;
                }
            }
            event = next_event(&mut events) => {
                match event {
                    Some(event) => {
                        let message = ServerMessage::Event {
                            channel: channel_for(&channels, &event),
                            event,
                        };
                        if !send(&mut socket, &message).await {
                            break;
                        }
                    }
                    // Bus closed; keep serving control messages.
                    None => events = None,
                }
            }
        }
    }

    debug!("WebSocket client disconnected");
}

fn parse_channels(requested: &[String]) -> Result<Vec<String>, String> {
    requested
        .iter()
        .map(|c| {
            c.parse::<Topic>()
                .map(|topic| topic.to_string())
                .map_err(|e| e.to_string())
        })
        .collect()
}

/// Drop `requested` from the set, spelled either way `parse_channels` accepts.
fn remove_channels(channels: &mut BTreeSet<String>, requested: &[String]) -> Result<(), String> {
    for channel in parse_channels(requested)? {
        channels.remove(&channel);
    }
    Ok(())
}

async fn subscribe(state: &AppState, channels: &BTreeSet<String>) -> Option<EventStream> {
    let topics: Vec<Topic> = channels.iter().filter_map(|c| c.parse().ok()).collect();
    Span::current().record("topics", tracing::field::debug(channels));
    if topics.is_empty() {
        return None;
    }

    match state.event_bus.subscribe(topics).await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Failed to subscribe WebSocket client");
            None
        }
    }
}

async fn next_event(events: &mut Option<EventStream>) -> Option<Event> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// The most specific subscribed channel the event matched.
fn channel_for(channels: &BTreeSet<String>, event: &Event) -> String {
    let candidates = [
        Topic::Pipeline(event.pipeline_id()),
        Topic::Project(event.project_id().to_string()),
        Topic::Global,
    ];
    candidates
        .iter()
        .map(|topic| topic.to_string())
        .find(|channel| channels.contains(channel))
        .unwrap_or_else(|| Topic::Global.to_string())
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to serialize WebSocket message");
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_default_to_global() {
        let channels = WsParams::default().topics().unwrap();
        assert_eq!(channels.into_iter().collect::<Vec<_>>(), vec!["global"]);
    }

    #[test]
    fn test_params_reject_bad_pipeline_id() {
        let params = WsParams {
            pipeline: Some("not-an-id".into()),
            project: None,
        };
        assert!(params.topics().is_err());
    }

    #[test]
    fn test_parse_channels() {
        let parsed = parse_channels(&["global".into(), "project:shop".into()]).unwrap();
        assert_eq!(parsed, vec!["global", "project:shop"]);
        assert!(parse_channels(&["bogus:1".into()]).is_err());
    }

    #[test]
    fn test_unsubscribe_matches_subscribe_spelling() {
        let bare = format!("pipeline:{}", Uuid::now_v7());
        let mut channels: BTreeSet<String> =
            parse_channels(&[bare.clone(), "global".into()]).unwrap().into_iter().collect();
        assert!(!channels.contains(&bare));

        remove_channels(&mut channels, &[bare]).unwrap();
        assert_eq!(channels.iter().cloned().collect::<Vec<_>>(), vec!["global"]);

        assert!(remove_channels(&mut channels, &["bogus:1".into()]).is_err());
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn test_client_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"subscribe","channels":["global"]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { .. }));
        let msg: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));
    }
}
