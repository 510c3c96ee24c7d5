pub mod click;
pub mod engine;
pub mod input_channel;
pub mod looper;
pub mod metronome;
pub mod midi_clock;
pub mod pending;
pub mod queue;
pub mod ring_buffer;
pub mod snapshot;
pub mod stream;
pub mod stretch;

pub use click::Click;
pub use engine::{EngineHandle, LoopEngine};
pub use input_channel::InputChannel;
pub use looper::{Loop, LoopLayer, LoopState};
pub use metronome::{Metronome, MetronomePosition, Quantize};
pub use midi_clock::MidiClock;
pub use queue::{command_channel, CommandReceiver, CommandSender};
pub use ring_buffer::RingBuffer;
pub use snapshot::{ChannelView, EngineSnapshot, LoopView, PendingOpView};
pub use stream::AudioStream;
pub use stretch::TimeStretcher;

/// Construction-time engine settings. Runtime-settable knobs (quantize,
/// lookback, click, monitoring, ...) live on [`EngineHandle`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_loops: usize,
    pub max_lookback_bars: u32,
    pub sample_rate: f64,
    /// Slowest tempo the lookback ring must accommodate. Determines ring
    /// buffer capacity, so it cannot change after construction.
    pub min_bpm: f64,
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub num_input_channels: usize,
    pub live_threshold: f32,
    pub live_window_ms: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_loops: 8,
            max_lookback_bars: 8,
            sample_rate: 44100.0,
            min_bpm: 60.0,
            bpm: 120.0,
            beats_per_bar: 4,
            num_input_channels: 1,
            live_threshold: 0.0,
            live_window_ms: 500,
        }
    }
}

/// Operations that can be scheduled against a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    CaptureLoop,
    Record,
    StopRecord,
    Mute,
    Unmute,
    ToggleMute,
    Reverse,
    StartOverdub,
    StopOverdub,
    UndoLayer,
    RedoLayer,
    SetSpeed,
    ClearLoop,
}

impl OpType {
    pub fn description(&self) -> &'static str {
        match self {
            OpType::CaptureLoop => "Capture Loop",
            OpType::Record => "Record",
            OpType::StopRecord => "Stop Record",
            OpType::Mute => "Mute",
            OpType::Unmute => "Unmute",
            OpType::ToggleMute => "Toggle Mute",
            OpType::Reverse => "Reverse",
            OpType::StartOverdub => "Start Overdub",
            OpType::StopOverdub => "Stop Overdub",
            OpType::UndoLayer => "Undo Layer",
            OpType::RedoLayer => "Redo Layer",
            OpType::SetSpeed => "Set Speed",
            OpType::ClearLoop => "Clear",
        }
    }
}

/// Command sent from the control thread to the audio thread. Commands are
/// plain scalars so the queue never touches the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    ScheduleOp {
        op: OpType,
        loop_idx: usize,
        quantize: Quantize,
    },
    CaptureLoop {
        loop_idx: usize,
        quantize: Quantize,
        lookback_bars: u32,
    },
    Record {
        loop_idx: usize,
        quantize: Quantize,
    },
    StopRecord {
        loop_idx: usize,
        quantize: Quantize,
    },
    SetSpeed {
        loop_idx: usize,
        quantize: Quantize,
        speed: f64,
    },
    SetBpm {
        value: f64,
    },
    CancelPending,
}

/// Callbacks fired from the audio thread. Keep them cheap; `on_message`
/// and `on_state_changed` only fire on state transitions.
#[derive(Default)]
pub struct EngineCallbacks {
    pub on_state_changed: Option<Box<dyn FnMut() + Send>>,
    pub on_message: Option<Box<dyn FnMut(&str) + Send>>,
    pub on_beat: Option<Box<dyn FnMut(&MetronomePosition) + Send>>,
    pub on_bar: Option<Box<dyn FnMut(&MetronomePosition) + Send>>,
}

/// Sink for raw MIDI status bytes (0xF8 clock, 0xFA start, 0xFC stop).
pub type MidiSink = Box<dyn FnMut(u8) + Send>;
