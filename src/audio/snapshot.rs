use super::looper::LoopState;
use super::metronome::{MetronomePosition, Quantize};
use super::OpType;

/// Per-loop summary in an [`EngineSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct LoopView {
    pub state: LoopState,
    pub length_samples: i64,
    pub length_in_bars: f64,
    pub layer_count: usize,
    pub active_layer_count: usize,
    pub play_position: i64,
    pub speed: f64,
    pub reversed: bool,
}

/// A scheduled operation waiting for its boundary.
#[derive(Debug, Clone, Copy)]
pub struct PendingOpView {
    pub loop_idx: usize,
    pub op: OpType,
    pub execute_sample: i64,
}

/// Per-input-channel level summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelView {
    pub peak: f32,
    pub live: bool,
}

/// Read-only engine state for non-real-time consumers (TUI, logging).
///
/// Published once per audio block under a try-lock, so a snapshot is at most
/// one block stale. Consumers clone it out under a blocking lock on their
/// own thread; the audio thread never blocks on it.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub position: MetronomePosition,
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub loops: Vec<LoopView>,
    pub pending_ops: Vec<PendingOpView>,
    pub channels: Vec<ChannelView>,
    pub is_recording: bool,
    pub recording_loop_idx: Option<usize>,
    pub default_quantize: Quantize,
    pub lookback_bars: u32,
    pub click_enabled: bool,
    pub midi_sync_enabled: bool,
    pub input_monitoring: bool,
    /// Recent engine messages, oldest first.
    pub messages: Vec<String>,
}

impl EngineSnapshot {
    /// First empty loop slot, if any.
    pub fn next_empty_slot(&self) -> Option<usize> {
        self.loops.iter().position(|l| l.state == LoopState::Empty)
    }

    pub fn active_loop_count(&self) -> usize {
        self.loops
            .iter()
            .filter(|l| l.state != LoopState::Empty)
            .count()
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }
}
