//! The real-time render node: per-track PCM16 queues mixed into one output.
//!
//! A [`StreamProcessor`] lives on the audio thread and talks to the engine only through
//! its [`PipelinePort`] (two unbounded channels). `process()` never blocks: it drains
//! pending commands with `try_recv`, copies samples, and does queue bookkeeping.
//!
//! Lifecycle of one pipeline:
//!
//! ```text
//!  Write ──→ queued ──→ rendering ──→ chunk done ──→ StopByCompletion { drained? }
//!                                        │
//!                         all queues empty after start
//!                                        ↓
//!                          close port, drain, emit Stop
//! ```

use crate::analyser::AnalyserTap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Engine → renderer messages
#[derive(Debug, Clone)]
pub enum RenderCommand {
    /// Append a chunk to a track's queue.
    Write { track_id: String, samples: Arc<[i16]> },
    /// Report how far the most recently written track has rendered; with `interrupt`,
    /// discard everything still queued for it.
    Offset { request_id: Uuid, interrupt: bool },
}

/// Renderer → engine messages
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// The pipeline tore itself down.
    Stop {
        /// Samples rendered per track by this pipeline.
        rendered: Vec<(String, u64)>,
        /// Chunks that reached the port after the final drain decision, in arrival order.
        requeue: Vec<(String, Arc<[i16]>)>,
    },
    /// Answer to [`RenderCommand::Offset`].
    Offset {
        request_id: Uuid,
        track_id: Option<String>,
        offset: u64,
        interrupted: bool,
    },
    /// One chunk of `track_id` finished playing. `drained` is true when nothing else is
    /// queued for that track.
    StopByCompletion { track_id: String, drained: bool },
}

/// Engine-side end of a pipeline's message channel.
#[derive(Debug)]
pub struct PipelinePort {
    pub commands: mpsc::UnboundedSender<RenderCommand>,
    pub events: mpsc::UnboundedReceiver<RenderEvent>,
}

/// Assistant-voice gain shared between the session and every pipeline it starts.
///
/// Stored as `f32` bits in an atomic so the audio thread reads it without locking.
#[derive(Debug, Clone)]
pub struct GainNode(Arc<AtomicU32>);

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self(Arc::new(AtomicU32::new(gain.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct TrackQueue {
    id: String,
    chunks: VecDeque<Arc<[i16]>>,
    cursor: usize,
    rendered: u64,
}

impl TrackQueue {
    fn new(id: String) -> Self {
        Self {
            id,
            chunks: VecDeque::new(),
            cursor: 0,
            rendered: 0,
        }
    }
}

/// Mixes queued PCM16 tracks into mono `f32` output.
#[derive(Debug)]
pub struct StreamProcessor {
    commands: mpsc::UnboundedReceiver<RenderCommand>,
    events: mpsc::UnboundedSender<RenderEvent>,
    tracks: Vec<TrackQueue>,
    interrupted: Vec<String>,
    last_written: Option<String>,
    has_started: bool,
    stopped: bool,
}

impl StreamProcessor {
    /// Create a processor and the port the engine uses to drive it.
    pub fn channel() -> (Self, PipelinePort) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let processor = Self {
            commands: command_rx,
            events: event_tx,
            tracks: Vec::new(),
            interrupted: Vec::new(),
            last_written: None,
            has_started: false,
            stopped: false,
        };
        let port = PipelinePort {
            commands: command_tx,
            events: event_rx,
        };
        (processor, port)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Render one quantum into `out`. Returns `false` once the pipeline has stopped.
    pub fn process(&mut self, out: &mut [f32]) -> bool {
        out.fill(0.0);
        if self.stopped {
            return false;
        }

        while let Ok(command) = self.commands.try_recv() {
            self.handle(command);
        }

        if self.mix_into(out) {
            self.has_started = true;
            return true;
        }
        if !self.has_started {
            return true;
        }

        // Queues ran dry after playback began: close the port so late writes are
        // refused at the sender, then hand back anything that slipped in.
        self.commands.close();
        let mut requeue = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RenderCommand::Write { track_id, samples } => {
                    if !self.is_interrupted(&track_id) && !samples.is_empty() {
                        requeue.push((track_id, samples));
                    }
                }
                offset @ RenderCommand::Offset { .. } => self.handle(offset),
            }
        }
        self.stopped = true;
        let rendered = self
            .tracks
            .iter()
            .map(|t| (t.id.clone(), t.rendered))
            .collect();
        let _ = self.events.send(RenderEvent::Stop { rendered, requeue });
        false
    }

    fn handle(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::Write { track_id, samples } => {
                if self.is_interrupted(&track_id) || samples.is_empty() {
                    return;
                }
                self.last_written = Some(track_id.clone());
                match self.tracks.iter_mut().find(|t| t.id == track_id) {
                    Some(track) => track.chunks.push_back(samples),
                    None => {
                        let mut track = TrackQueue::new(track_id);
                        track.chunks.push_back(samples);
                        self.tracks.push(track);
                    }
                }
            }
            RenderCommand::Offset {
                request_id,
                interrupt,
            } => {
                let track_id = self.last_written.clone();
                let offset = track_id
                    .as_deref()
                    .and_then(|id| self.tracks.iter().find(|t| t.id == id))
                    .map(|t| t.rendered)
                    .unwrap_or(0);
                let interrupted = interrupt && track_id.is_some();
                if interrupt {
                    if let Some(id) = track_id.as_deref() {
                        self.interrupt_track(id);
                    }
                    // An interrupted pipeline with nothing else to play winds down.
                    self.has_started = true;
                }
                let _ = self.events.send(RenderEvent::Offset {
                    request_id,
                    track_id,
                    offset,
                    interrupted,
                });
            }
        }
    }

    fn interrupt_track(&mut self, track_id: &str) {
        if !self.is_interrupted(track_id) {
            self.interrupted.push(track_id.to_string());
        }
        if let Some(track) = self.tracks.iter_mut().find(|t| t.id == track_id) {
            track.chunks.clear();
            track.cursor = 0;
        }
    }

    fn is_interrupted(&self, track_id: &str) -> bool {
        self.interrupted.iter().any(|id| id == track_id)
    }

    /// Sum every track's next samples into `out`; returns whether anything was rendered.
    fn mix_into(&mut self, out: &mut [f32]) -> bool {
        let mut rendered_any = false;
        for track in &mut self.tracks {
            let mut written = 0;
            while written < out.len() {
                let Some(chunk) = track.chunks.front() else {
                    break;
                };
                let take = (out.len() - written).min(chunk.len() - track.cursor);
                let source = &chunk[track.cursor..track.cursor + take];
                for (dst, &sample) in out[written..written + take].iter_mut().zip(source) {
                    *dst += sample as f32 / 32768.0;
                }
                written += take;
                track.cursor += take;
                track.rendered += take as u64;
                rendered_any = true;

                if track.cursor >= chunk.len() {
                    track.chunks.pop_front();
                    track.cursor = 0;
                    let _ = self.events.send(RenderEvent::StopByCompletion {
                        track_id: track.id.clone(),
                        drained: track.chunks.is_empty(),
                    });
                }
            }
        }
        if rendered_any {
            for sample in out.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
        rendered_any
    }
}

/// Everything one pipeline runs on the audio thread: processor, analysis tap, gain.
#[derive(Debug)]
pub struct RenderNode {
    processor: StreamProcessor,
    tap: Option<AnalyserTap>,
    gain: GainNode,
}

impl RenderNode {
    pub fn new(processor: StreamProcessor, tap: Option<AnalyserTap>, gain: GainNode) -> Self {
        Self {
            processor,
            tap,
            gain,
        }
    }

    /// Fill `out` with the next quantum of mono output. The analysis tap sees the signal
    /// before gain, so muting does not blank the visualiser.
    pub fn render(&mut self, out: &mut [f32]) -> bool {
        let alive = self.processor.process(out);
        if let Some(tap) = &self.tap {
            tap.push(out);
        }
        let gain = self.gain.get();
        if gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(port: &PipelinePort, track: &str, samples: &[i16]) {
        port.commands
            .send(RenderCommand::Write {
                track_id: track.to_string(),
                samples: samples.to_vec().into(),
            })
            .unwrap();
    }

    fn drain(port: &mut PipelinePort) -> Vec<RenderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = port.events.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn idle_processor_stays_alive_and_silent() {
        let (mut processor, mut port) = StreamProcessor::channel();
        let mut out = [1.0f32; 8];
        assert!(processor.process(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(drain(&mut port).is_empty());
    }

    #[test]
    fn chunks_render_in_append_order_across_quanta() {
        let (mut processor, mut port) = StreamProcessor::channel();
        write(&port, "a", &[16384, 16384, 16384]);
        write(&port, "a", &[-16384, -16384]);

        let mut out = [0.0f32; 4];
        assert!(processor.process(&mut out));
        assert_eq!(out, [0.5, 0.5, 0.5, -0.5]);

        let events = drain(&mut port);
        assert_eq!(
            events,
            vec![RenderEvent::StopByCompletion {
                track_id: "a".to_string(),
                drained: false
            }]
        );

        assert!(processor.process(&mut out));
        assert_eq!(out, [-0.5, 0.0, 0.0, 0.0]);
        assert_eq!(
            drain(&mut port),
            vec![RenderEvent::StopByCompletion {
                track_id: "a".to_string(),
                drained: true
            }]
        );

        // Next quantum finds nothing left and tears down.
        assert!(!processor.process(&mut out));
        match drain(&mut port).pop() {
            Some(RenderEvent::Stop { rendered, requeue }) => {
                assert_eq!(rendered, vec![("a".to_string(), 5)]);
                assert!(requeue.is_empty());
            }
            other => panic!("expected stop, got {other:?}"),
        }
        assert!(processor.is_stopped());
    }

    #[test]
    fn tracks_are_summed_not_time_sliced() {
        let (mut processor, port) = StreamProcessor::channel();
        write(&port, "a", &[8192, 8192]);
        write(&port, "b", &[8192, 8192]);
        let mut out = [0.0f32; 2];
        processor.process(&mut out);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn mix_is_clamped() {
        let (mut processor, port) = StreamProcessor::channel();
        write(&port, "a", &[i16::MAX]);
        write(&port, "b", &[i16::MAX]);
        let mut out = [0.0f32; 1];
        processor.process(&mut out);
        assert_eq!(out, [1.0]);
    }

    #[test]
    fn offset_reports_last_written_track() {
        let (mut processor, mut port) = StreamProcessor::channel();
        write(&port, "item_1", &[0; 10]);
        let mut out = [0.0f32; 4];
        processor.process(&mut out);

        let request_id = Uuid::new_v4();
        port.commands
            .send(RenderCommand::Offset {
                request_id,
                interrupt: false,
            })
            .unwrap();
        processor.process(&mut out);
        let offset = drain(&mut port)
            .into_iter()
            .find(|e| matches!(e, RenderEvent::Offset { .. }))
            .unwrap();
        assert_eq!(
            offset,
            RenderEvent::Offset {
                request_id,
                track_id: Some("item_1".to_string()),
                offset: 4,
                interrupted: false,
            }
        );
    }

    #[test]
    fn interrupt_discards_queued_and_later_chunks() {
        let (mut processor, mut port) = StreamProcessor::channel();
        write(&port, "item_1", &[1000; 8]);
        let mut out = [0.0f32; 2];
        processor.process(&mut out);

        port.commands
            .send(RenderCommand::Offset {
                request_id: Uuid::new_v4(),
                interrupt: true,
            })
            .unwrap();
        write(&port, "item_1", &[1000; 8]);

        // Nothing left to play: the interrupted pipeline stops immediately.
        assert!(!processor.process(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        let events = drain(&mut port);
        assert!(matches!(
            events.first(),
            Some(RenderEvent::Offset {
                offset: 2,
                interrupted: true,
                ..
            })
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RenderEvent::StopByCompletion { .. })));
        assert!(matches!(events.last(), Some(RenderEvent::Stop { .. })));
    }

    #[test]
    fn interrupt_leaves_other_tracks_playing() {
        let (mut processor, mut port) = StreamProcessor::channel();
        write(&port, "narration", &[8192; 4]);
        write(&port, "answer", &[8192; 4]);
        port.commands
            .send(RenderCommand::Offset {
                request_id: Uuid::new_v4(),
                interrupt: true,
            })
            .unwrap();
        let mut out = [0.0f32; 4];
        assert!(processor.process(&mut out));
        assert_eq!(out, [0.25; 4]);
        let events = drain(&mut port);
        assert!(events.contains(&RenderEvent::StopByCompletion {
            track_id: "narration".to_string(),
            drained: true
        }));
    }

    #[test]
    fn render_node_applies_gain_after_tap() {
        let (processor, port) = StreamProcessor::channel();
        write(&port, "a", &[16384; 4]);
        let gain = GainNode::new(0.0);
        let mut node = RenderNode::new(processor, None, gain.clone());
        let mut out = [0.0f32; 4];
        assert!(node.render(&mut out));
        assert_eq!(out, [0.0; 4]);

        gain.set(1.0);
        write(&port, "a", &[16384; 4]);
        node.render(&mut out);
        assert_eq!(out, [0.5; 4]);
    }
}
