//! Glue between the realtime voice client and the engine.
//!
//! The client itself (transport, session, prompting) lives elsewhere. This module only
//! models the handful of server events that move audio or arbitration state, and routes
//! them: audio deltas into [`StreamingPlaybackEngine::add_16bit_pcm`], item status into
//! the arbiter, speech start into a barge-in plus interrupt.

use crate::engine::StreamingPlaybackEngine;
use crate::error::EngineResult;
use crate::pcm::PcmBuffer;
use copilot_core::ItemStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Conversation item as carried by output-item events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerItem {
    pub id: String,
    #[serde(default)]
    pub status: Option<ItemStatus>,
}

/// Server events the copilot reacts to. Everything else deserialises to `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        item_id: String,
        /// Base64 PCM16.
        delta: String,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: ServerItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: ServerItem },
    #[serde(other)]
    Other,
}

/// A client-side `conversation.updated` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationUpdate {
    pub item_id: String,
    pub status: Option<ItemStatus>,
    pub audio_delta: Option<PcmBuffer>,
}

/// What the caller should do after an event was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutcome {
    /// Audio was queued.
    Queued { samples: usize },
    /// Audio arrived for an interrupted track and was dropped.
    Suppressed,
    /// The current response was cut; tell the server where playback stopped.
    CancelResponse {
        track_id: String,
        offset_samples: u64,
    },
    Handled,
    Ignored,
}

/// Feeds realtime events into a connected engine.
#[derive(Clone)]
pub struct CopilotBridge {
    engine: Arc<StreamingPlaybackEngine>,
}

impl CopilotBridge {
    pub fn new(engine: Arc<StreamingPlaybackEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<StreamingPlaybackEngine> {
        &self.engine
    }

    /// Status first, then audio, matching the order the client reports them.
    pub fn on_conversation_updated(&self, update: ConversationUpdate) -> EngineResult<BridgeOutcome> {
        if let Some(status) = update.status {
            self.engine.set_item_status_for(&update.item_id, status);
        }
        let Some(delta) = update.audio_delta else {
            return Ok(BridgeOutcome::Handled);
        };
        match self.engine.add_16bit_pcm(delta, Some(&update.item_id))? {
            Some(samples) => Ok(BridgeOutcome::Queued {
                samples: samples.len(),
            }),
            None => Ok(BridgeOutcome::Suppressed),
        }
    }

    /// The user started talking: pause the background immediately.
    pub fn on_speech_started(&self) {
        self.engine.arbiter().on_speech_started();
    }

    /// The client cut the in-flight response. Returns where the track stopped, if any.
    pub async fn on_interrupted(&self) -> BridgeOutcome {
        match self.engine.interrupt().await {
            Some(offset) => match offset.track_id {
                Some(track_id) => {
                    info!("✂️ Cancel response {} at {} samples", track_id, offset.offset_samples);
                    BridgeOutcome::CancelResponse {
                        track_id,
                        offset_samples: offset.offset_samples,
                    }
                }
                None => BridgeOutcome::Handled,
            },
            None => BridgeOutcome::Handled,
        }
    }

    pub async fn handle_server_event(&self, event: ServerEvent) -> EngineResult<BridgeOutcome> {
        match event {
            ServerEvent::SpeechStarted { .. } => {
                self.on_speech_started();
                Ok(self.on_interrupted().await)
            }
            ServerEvent::AudioDelta { item_id, delta } => {
                self.on_conversation_updated(ConversationUpdate {
                    item_id,
                    status: None,
                    audio_delta: Some(PcmBuffer::Base64(delta)),
                })
            }
            ServerEvent::OutputItemAdded { item } | ServerEvent::OutputItemDone { item } => {
                self.on_conversation_updated(ConversationUpdate {
                    item_id: item.id,
                    status: item.status,
                    audio_delta: None,
                })
            }
            ServerEvent::Other => Ok(BridgeOutcome::Ignored),
        }
    }

    /// Parse one server event from JSON and handle it.
    pub async fn handle_server_json(&self, raw: &str) -> EngineResult<BridgeOutcome> {
        let event: ServerEvent = serde_json::from_str(raw)?;
        debug!(?event, "server event");
        self.handle_server_event(event).await
    }
}
