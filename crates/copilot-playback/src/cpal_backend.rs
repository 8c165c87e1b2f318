//! Output through the system's default audio device.

use crate::backend::{RenderBackend, RendererHandle};
use crate::error::{ConnectError, EngineError, EngineResult};
use crate::renderer::RenderNode;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tracing::{info, warn};

/// Plays pipelines on the default output device.
///
/// Each pipeline gets its own stream on a dedicated thread (cpal's `Stream` is `!Send`
/// on some platforms). The stream lives until the node stops or the handle is dropped.
#[derive(Default)]
pub struct CpalBackend {
    config: Mutex<Option<StreamConfig>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the available output devices.
    pub fn list_output_devices() -> EngineResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| EngineError::AudioDevice(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

fn probe(sample_rate: u32) -> Result<StreamConfig, String> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| "No output device available".to_string())?;
    info!(
        "🔊 Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?
        .filter(|range| range.sample_format() == SampleFormat::F32)
        .find(|range| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        })
        .ok_or_else(|| format!("device has no f32 output at {sample_rate} Hz"))?;

    Ok(StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    })
}

#[async_trait]
impl RenderBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    async fn open(&self, sample_rate: u32) -> Result<(), ConnectError> {
        let config = tokio::task::spawn_blocking(move || probe(sample_rate))
            .await
            .map_err(|e| ConnectError::ModuleLoadFailed(e.to_string()))?
            .map_err(ConnectError::ModuleLoadFailed)?;
        info!("🔧 Output config: {:?}", config);
        *self.config.lock() = Some(config);
        Ok(())
    }

    fn spawn(&self, node: RenderNode) -> EngineResult<Box<dyn RendererHandle>> {
        let config = self.config.lock().clone().ok_or(EngineError::NotConnected)?;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        thread::Builder::new()
            .name("copilot-render".to_string())
            .spawn(move || {
                let stream = match build_stream(&config, node) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Parked until the handle drops its sender.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalHandle {
                stop: Some(stop_tx),
            })),
            Ok(Err(e)) => Err(EngineError::AudioStream(e)),
            Err(_) => Err(EngineError::AudioStream(
                "render thread exited before starting".to_string(),
            )),
        }
    }

    fn close(&self) {
        *self.config.lock() = None;
    }
}

fn build_stream(config: &StreamConfig, node: RenderNode) -> EngineResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| EngineError::AudioDevice("No output device available".to_string()))?;
    let channels = config.channels.max(1) as usize;
    let mut node = Some(node);
    let mut mono: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            mono.resize(frames, 0.0);
            match node.as_mut() {
                Some(active) => {
                    if !active.render(&mut mono) {
                        node = None;
                    }
                }
                None => mono.fill(0.0),
            }
            for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(sample);
            }
        },
        move |err| {
            warn!("Audio output stream error: {}", err);
        },
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

struct CpalHandle {
    stop: Option<std_mpsc::Sender<()>>,
}

impl RendererHandle for CpalHandle {
    fn stop(&mut self) {
        self.stop.take();
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
