//! Frequency analysis of the assistant voice, for visualisation.
//!
//! The render thread pushes every output quantum into a ring buffer through an
//! [`AnalyserTap`]. Readers compute a windowed FFT over the most recent `fft_size`
//! samples with temporal smoothing, then either return raw bins or fold them into
//! musical-note buckets.

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Base frequencies of the eighth octave, C8 through B8.
const OCTAVE_8_FREQUENCIES: [f32; 12] = [
    4186.01, 4434.92, 4698.63, 4978.03, 5274.04, 5587.65, 5919.91, 6271.93, 6644.88, 7040.0,
    7458.62, 7902.13,
];

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Range kept for the voice bucket set.
const VOICE_MIN_HZ: f32 = 32.0;
const VOICE_MAX_HZ: f32 = 2000.0;

/// How bins are grouped in [`FrequencyData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    /// One value per FFT bin.
    #[default]
    Frequency,
    /// Peak per note, C1 through B8.
    Music,
    /// Peak per note within the speaking range.
    Voice,
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frequency" => Ok(AnalysisKind::Frequency),
            "music" => Ok(AnalysisKind::Music),
            "voice" => Ok(AnalysisKind::Voice),
            other => Err(format!("unknown analysis type: {other}")),
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisKind::Frequency => "frequency",
            AnalysisKind::Music => "music",
            AnalysisKind::Voice => "voice",
        };
        f.write_str(s)
    }
}

/// Normalised spectrum snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyData {
    /// Levels in `[0, 1]`.
    pub values: Vec<f32>,
    /// Centre (or note) frequency of each value, in Hz.
    pub frequencies: Vec<f32>,
    pub labels: Vec<String>,
}

#[derive(Debug)]
struct AnalyserState {
    ring: Vec<f32>,
    write_index: usize,
    smoothed: Vec<f32>,
}

/// Render-thread handle that feeds the analyser.
#[derive(Debug, Clone)]
pub struct AnalyserTap {
    state: Arc<Mutex<AnalyserState>>,
}

impl AnalyserTap {
    /// Append a quantum of samples. Skips the quantum rather than wait on a reader.
    pub fn push(&self, samples: &[f32]) {
        let Some(mut state) = self.state.try_lock() else {
            return;
        };
        let len = state.ring.len();
        for &sample in samples {
            let index = state.write_index;
            state.ring[index] = sample;
            state.write_index = (index + 1) % len;
        }
    }
}

struct Note {
    frequency: f32,
    label: String,
}

fn note_table() -> Vec<Note> {
    (1..=8)
        .flat_map(|octave| {
            let divisor = 2f32.powi(8 - octave);
            OCTAVE_8_FREQUENCIES
                .iter()
                .zip(NOTE_NAMES)
                .map(move |(&base, name)| Note {
                    frequency: base / divisor,
                    label: format!("{name}{octave}"),
                })
        })
        .collect()
}

/// Spectrum analyser with Web-Audio-style smoothing and decibel output.
pub struct FrequencyAnalyzer {
    sample_rate: u32,
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    state: Arc<Mutex<AnalyserState>>,
    music_notes: Vec<Note>,
    voice_notes: Vec<Note>,
}

impl fmt::Debug for FrequencyAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl FrequencyAnalyzer {
    /// `fft_size` is rounded up to a power of two (minimum 32).
    pub fn new(sample_rate: u32, fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Blackman, alpha = 0.16
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        let music_notes = note_table();
        let voice_notes = note_table()
            .into_iter()
            .filter(|note| note.frequency > VOICE_MIN_HZ && note.frequency < VOICE_MAX_HZ)
            .collect();

        Self {
            sample_rate,
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            fft,
            window,
            state: Arc::new(Mutex::new(AnalyserState {
                ring: vec![0.0; fft_size],
                write_index: 0,
                smoothed: vec![0.0; fft_size / 2],
            })),
            music_notes,
            voice_notes,
        }
    }

    pub fn tap(&self) -> AnalyserTap {
        AnalyserTap {
            state: Arc::clone(&self.state),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Width of one bin in Hz.
    pub fn frequency_step(&self) -> f32 {
        (self.sample_rate as f32 / 2.0) / self.frequency_bin_count() as f32
    }

    /// Smoothed spectrum in dBFS, one value per bin. Silent bins are `-inf`.
    pub fn get_float_frequency_data(&self) -> Vec<f32> {
        let len = self.fft_size;
        let mut buffer: Vec<Complex<f32>> = {
            let state = self.state.lock();
            let start = state.write_index;
            (0..len)
                .map(|i| {
                    let sample = state.ring[(start + i) % len];
                    Complex::new(sample * self.window[i], 0.0)
                })
                .collect()
        };
        // The tap keeps writing while the transform runs.
        self.fft.process(&mut buffer);

        let tau = self.smoothing;
        let scale = 1.0 / len as f32;
        let mut state = self.state.lock();
        state
            .smoothed
            .iter_mut()
            .zip(&buffer)
            .map(|(previous, bin)| {
                let magnitude = bin.norm() * scale;
                *previous = tau * *previous + (1.0 - tau) * magnitude;
                20.0 * previous.log10()
            })
            .collect()
    }

    /// Current spectrum grouped by `kind`, each value normalised from
    /// `[min_decibels, max_decibels]` onto `[0, 1]`.
    pub fn get_frequencies(
        &self,
        kind: AnalysisKind,
        min_decibels: f32,
        max_decibels: f32,
    ) -> FrequencyData {
        let data = self.get_float_frequency_data();
        let step = self.frequency_step();

        let (raw, frequencies, labels) = match kind {
            AnalysisKind::Frequency => {
                let frequencies: Vec<f32> = (0..data.len()).map(|i| i as f32 * step).collect();
                let labels = frequencies.iter().map(|f| format!("{f:.2} Hz")).collect();
                (data, frequencies, labels)
            }
            AnalysisKind::Music => aggregate(&data, step, &self.music_notes, min_decibels),
            AnalysisKind::Voice => aggregate(&data, step, &self.voice_notes, min_decibels),
        };

        let range = max_decibels - min_decibels;
        let values = raw
            .into_iter()
            .map(|db| {
                if range <= 0.0 {
                    return 0.0;
                }
                let v = (db - min_decibels) / range;
                if v.is_nan() {
                    0.0
                } else {
                    v.clamp(0.0, 1.0)
                }
            })
            .collect();

        FrequencyData {
            values,
            frequencies,
            labels,
        }
    }
}

/// Fold bins into note buckets: each bin lands in the highest note strictly below it.
fn aggregate(
    data: &[f32],
    step: f32,
    notes: &[Note],
    floor_db: f32,
) -> (Vec<f32>, Vec<f32>, Vec<String>) {
    let mut peaks = vec![floor_db; notes.len()];
    for (i, &amplitude) in data.iter().enumerate() {
        let frequency = i as f32 * step;
        if let Some(n) = notes.iter().rposition(|note| frequency > note.frequency) {
            peaks[n] = peaks[n].max(amplitude);
        }
    }
    let frequencies = notes.iter().map(|n| n.frequency).collect();
    let labels = notes.iter().map(|n| n.label.clone()).collect();
    (peaks, frequencies, labels)
}
