use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use super::click::Click;
use super::input_channel::InputChannel;
use super::looper::Loop;
use super::metronome::{Metronome, Quantize};
use super::midi_clock::MidiClock;
use super::pending::{
    MuteOp, OverdubOp, PendingCapture, PendingMute, PendingOverdub, PendingRecord, PendingSpeed,
    PendingTimedOp, PendingUndo, RecordOp, UndoDirection,
};
use super::queue::{command_channel, CommandReceiver, CommandSender};
use super::snapshot::{ChannelView, EngineSnapshot, LoopView, PendingOpView};
use super::{EngineCallbacks, EngineCommand, EngineSettings, MidiSink, OpType};

/// Recent messages kept for snapshot consumers.
const MAX_MESSAGES: usize = 32;

fn quantize_to_u8(q: Quantize) -> u8 {
    match q {
        Quantize::Free => 0,
        Quantize::Beat => 1,
        Quantize::Bar => 2,
    }
}

fn quantize_from_u8(v: u8) -> Quantize {
    match v {
        0 => Quantize::Free,
        1 => Quantize::Beat,
        _ => Quantize::Bar,
    }
}

/// An in-progress classic recording, accumulating the live mix in real time.
struct ActiveRecording {
    loop_index: usize,
    buffer: Vec<f32>,
    #[allow(dead_code)]
    start_sample: i64,
}

/// State shared between the audio thread and control-side consumers.
/// Hot flags are atomics; the snapshot sits behind a mutex the audio thread
/// only ever try-locks. Scalar runtime settings are atomics written by the
/// control thread and read once per block by the audio thread.
struct EngineShared {
    snapshot: Mutex<EngineSnapshot>,
    is_recording: AtomicBool,
    recording_loop_idx: AtomicI64,
    live_channel_mask: AtomicU64,

    default_quantize: AtomicU8,
    lookback_bars: AtomicU32,
    crossfade_samples: AtomicU32,
    latency_compensation: AtomicU64,
    input_monitoring: AtomicBool,
    live_threshold: AtomicU32,
    click_enabled: AtomicBool,
    click_volume: AtomicU32,
    midi_sync_enabled: AtomicBool,
}

/// Central engine managing loops, lookback ring buffers, the metronome, and
/// quantized operations.
///
/// Owned and driven by the audio thread: the host calls
/// [`process_block`](Self::process_block) from its audio callback. The
/// control side keeps the paired [`EngineHandle`].
pub struct LoopEngine {
    metronome: Metronome,
    click: Click,
    midi_clock: MidiClock,
    input_channels: Vec<InputChannel>,
    /// Per channel: sample index when the live threshold was last exceeded.
    /// Updated once per block; lets capture decide channel inclusion in O(1).
    last_breach_sample: Vec<i64>,
    loops: Vec<Loop>,
    active_recording: Option<ActiveRecording>,

    sample_rate: f64,
    max_lookback_bars: u32,

    // Runtime settings, re-read from `shared` at each block start
    live_threshold: f32,
    crossfade_samples: i64,
    latency_compensation: i64,
    input_monitoring: bool,
    lookback_bars: u32,

    callbacks: EngineCallbacks,
    bpm_changed: Option<Box<dyn FnMut(f64) + Send>>,

    commands: CommandReceiver,
    shared: Arc<EngineShared>,

    messages: VecDeque<String>,
    messages_seq: u64,
    published_messages_seq: u64,
}

impl LoopEngine {
    /// Build an engine and its control-side handle. The lookback ring on
    /// each input channel is sized for `max_lookback_bars` at the slowest
    /// expected tempo and never reallocated.
    pub fn new(settings: EngineSettings) -> (LoopEngine, EngineHandle) {
        let max_loops = settings.max_loops.clamp(1, 64);
        let max_lookback_bars = settings.max_lookback_bars.clamp(1, 64);
        let num_channels = settings.num_input_channels.max(1);
        let sample_rate = settings.sample_rate;

        let ring_capacity =
            (max_lookback_bars as f64 * 4.0 * (60.0 / settings.min_bpm) * sample_rate).ceil()
                as usize;
        let activity_window =
            (sample_rate * settings.live_window_ms as f64 / 1000.0) as usize;

        let input_channels = (0..num_channels)
            .map(|_| InputChannel::new(ring_capacity, activity_window))
            .collect();

        let loops = (0..max_loops)
            .map(|i| {
                let mut lp = Loop::new(i);
                lp.set_sample_rate(sample_rate);
                lp
            })
            .collect();

        let shared = Arc::new(EngineShared {
            snapshot: Mutex::new(EngineSnapshot::default()),
            is_recording: AtomicBool::new(false),
            recording_loop_idx: AtomicI64::new(-1),
            live_channel_mask: AtomicU64::new(0),
            default_quantize: AtomicU8::new(quantize_to_u8(Quantize::Bar)),
            lookback_bars: AtomicU32::new(1),
            crossfade_samples: AtomicU32::new(256),
            latency_compensation: AtomicU64::new(0),
            input_monitoring: AtomicBool::new(false),
            live_threshold: AtomicU32::new(settings.live_threshold.to_bits()),
            click_enabled: AtomicBool::new(true),
            click_volume: AtomicU32::new(0.5f32.to_bits()),
            midi_sync_enabled: AtomicBool::new(false),
        });

        let (sender, receiver) = command_channel();

        let engine = LoopEngine {
            metronome: Metronome::new(settings.bpm, settings.beats_per_bar, sample_rate),
            click: Click::new(sample_rate),
            midi_clock: MidiClock::new(settings.bpm, sample_rate),
            input_channels,
            last_breach_sample: vec![i64::MIN; num_channels],
            loops,
            active_recording: None,
            sample_rate,
            max_lookback_bars,
            live_threshold: settings.live_threshold,
            crossfade_samples: 256,
            latency_compensation: 0,
            input_monitoring: false,
            lookback_bars: 1,
            callbacks: EngineCallbacks::default(),
            bpm_changed: None,
            commands: receiver,
            shared: Arc::clone(&shared),
            messages: VecDeque::with_capacity(MAX_MESSAGES),
            messages_seq: 0,
            published_messages_seq: 0,
        };

        let handle = EngineHandle {
            sender,
            shared,
            max_loops,
            max_lookback_bars,
        };

        (engine, handle)
    }

    pub fn set_callbacks(&mut self, callbacks: EngineCallbacks) {
        self.callbacks = callbacks;
    }

    /// Hook invoked on the audio thread whenever the tempo changes, after
    /// the metronome and MIDI clock have been updated.
    pub fn set_bpm_changed_callback(&mut self, cb: Box<dyn FnMut(f64) + Send>) {
        self.bpm_changed = Some(cb);
    }

    pub fn set_midi_sink(&mut self, sink: MidiSink) {
        self.midi_clock.set_sink(sink);
    }

    /// Process one block of audio. `inputs` holds one slice per input
    /// channel (missing channels read as silence); `output` is the mono sum
    /// of all playing loops, the click, and optionally the monitored input.
    pub fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32]) {
        self.sync_settings();
        self.drain_commands();

        let num_channels = self.input_channels.len();

        for i in 0..output.len() {
            // Feed each input channel and build the mono mix of live ones
            let mut live_mix = 0.0f32;
            for ch in 0..num_channels {
                let sample = inputs
                    .get(ch)
                    .and_then(|buf| buf.get(i))
                    .copied()
                    .unwrap_or(0.0);
                self.input_channels[ch].write_sample(sample);
                if self.input_channels[ch].is_live(self.live_threshold) {
                    live_mix += sample;
                }
            }

            if let Some(rec) = self.active_recording.as_mut() {
                rec.buffer.push(live_mix);
            }

            let current_sample = self.metronome.position().total_samples;
            for idx in 0..self.loops.len() {
                if self.loops[idx].has_pending_ops() {
                    self.flush_due_ops(idx, current_sample);
                }
            }

            let mut out = 0.0f32;
            for lp in &mut self.loops {
                if !lp.is_empty() {
                    out += lp.process_sample();
                    if lp.is_recording() {
                        lp.record_sample(live_mix);
                    }
                }
            }

            out += self.click.next_sample();

            if self.input_monitoring {
                out += live_mix;
            }

            output[i] = out;

            let (metronome, click, callbacks) =
                (&mut self.metronome, &mut self.click, &mut self.callbacks);
            metronome.advance(1, |pos, is_bar| {
                click.trigger(pos.beat == 0);
                if let Some(cb) = callbacks.on_beat.as_mut() {
                    cb(pos);
                }
                if is_bar {
                    if let Some(cb) = callbacks.on_bar.as_mut() {
                        cb(pos);
                    }
                }
            });
            self.midi_clock.advance(1);
        }

        // Refresh the live bitmask and per-channel breach timestamps
        let current_sample = self.metronome.position().total_samples;
        let mut mask = 0u64;
        for ch in 0..num_channels.min(64) {
            if self.input_channels[ch].is_live(self.live_threshold) {
                mask |= 1u64 << ch;
                self.last_breach_sample[ch] = current_sample;
            }
        }
        self.shared.live_channel_mask.store(mask, Ordering::Relaxed);

        self.publish_snapshot();
    }

    fn sync_settings(&mut self) {
        let shared = &self.shared;
        self.live_threshold = f32::from_bits(shared.live_threshold.load(Ordering::Relaxed));
        self.crossfade_samples = shared.crossfade_samples.load(Ordering::Relaxed) as i64;
        self.latency_compensation = shared.latency_compensation.load(Ordering::Relaxed) as i64;
        self.input_monitoring = shared.input_monitoring.load(Ordering::Relaxed);
        self.lookback_bars = shared.lookback_bars.load(Ordering::Relaxed);
        self.click.set_enabled(shared.click_enabled.load(Ordering::Relaxed));
        self.click
            .set_volume(f32::from_bits(shared.click_volume.load(Ordering::Relaxed)));

        let midi_on = shared.midi_sync_enabled.load(Ordering::Relaxed);
        if midi_on != self.midi_clock.is_enabled() {
            self.midi_clock.set_enabled(midi_on);
        }
    }

    fn execute_sample_for(&self, quantize: Quantize) -> i64 {
        let total = self.metronome.position().total_samples;
        match quantize {
            Quantize::Free => total,
            _ => total + self.metronome.samples_until_boundary(quantize),
        }
    }

    fn drain_commands(&mut self) {
        while let Some(cmd) = self.commands.pop() {
            match cmd {
                EngineCommand::ScheduleOp {
                    op,
                    loop_idx,
                    quantize,
                } => {
                    if loop_idx >= self.loops.len() {
                        continue;
                    }
                    let execute_sample = self.execute_sample_for(quantize);
                    let ps = self.loops[loop_idx].pending_mut();
                    match op {
                        OpType::Mute => {
                            ps.mute = Some(PendingMute {
                                execute_sample,
                                quantize,
                                op: MuteOp::Mute,
                            });
                        }
                        OpType::Unmute => {
                            ps.mute = Some(PendingMute {
                                execute_sample,
                                quantize,
                                op: MuteOp::Unmute,
                            });
                        }
                        OpType::ToggleMute => {
                            ps.mute = Some(PendingMute {
                                execute_sample,
                                quantize,
                                op: MuteOp::Toggle,
                            });
                        }
                        OpType::Reverse => {
                            ps.reverse = Some(PendingTimedOp {
                                execute_sample,
                                quantize,
                            });
                        }
                        OpType::StartOverdub => {
                            ps.overdub = Some(PendingOverdub {
                                execute_sample,
                                quantize,
                                op: OverdubOp::Start,
                            });
                        }
                        OpType::StopOverdub => {
                            ps.overdub = Some(PendingOverdub {
                                execute_sample,
                                quantize,
                                op: OverdubOp::Stop,
                            });
                        }
                        OpType::UndoLayer => match ps.undo.as_mut() {
                            Some(u) if u.direction == UndoDirection::Undo => u.count += 1,
                            _ => {
                                ps.undo = Some(PendingUndo {
                                    execute_sample,
                                    quantize,
                                    direction: UndoDirection::Undo,
                                    count: 1,
                                });
                            }
                        },
                        OpType::RedoLayer => match ps.undo.as_mut() {
                            Some(u) if u.direction == UndoDirection::Redo => u.count += 1,
                            _ => {
                                ps.undo = Some(PendingUndo {
                                    execute_sample,
                                    quantize,
                                    direction: UndoDirection::Redo,
                                    count: 1,
                                });
                            }
                        },
                        OpType::ClearLoop => {
                            ps.clear = Some(PendingTimedOp {
                                execute_sample,
                                quantize,
                            });
                        }
                        // These arrive as dedicated command variants
                        OpType::CaptureLoop
                        | OpType::Record
                        | OpType::StopRecord
                        | OpType::SetSpeed => {}
                    }
                }
                EngineCommand::CaptureLoop {
                    loop_idx,
                    quantize,
                    lookback_bars,
                } => {
                    if loop_idx >= self.loops.len() {
                        continue;
                    }
                    let execute_sample = self.execute_sample_for(quantize);
                    let lookback_samples =
                        (lookback_bars as f64 * self.metronome.samples_per_bar()).round() as i64;
                    self.loops[loop_idx].pending_mut().capture = Some(PendingCapture {
                        execute_sample,
                        quantize,
                        lookback_samples,
                    });
                }
                EngineCommand::Record { loop_idx, quantize } => {
                    if loop_idx >= self.loops.len() {
                        continue;
                    }
                    let execute_sample = self.execute_sample_for(quantize);
                    self.loops[loop_idx].pending_mut().record = Some(PendingRecord {
                        execute_sample,
                        quantize,
                        op: RecordOp::Start,
                    });
                }
                EngineCommand::StopRecord { loop_idx, quantize } => {
                    if loop_idx >= self.loops.len() {
                        continue;
                    }
                    let execute_sample = self.execute_sample_for(quantize);
                    self.loops[loop_idx].pending_mut().record = Some(PendingRecord {
                        execute_sample,
                        quantize,
                        op: RecordOp::Stop,
                    });
                }
                EngineCommand::SetSpeed {
                    loop_idx,
                    quantize,
                    speed,
                } => {
                    if loop_idx >= self.loops.len() {
                        continue;
                    }
                    let execute_sample = self.execute_sample_for(quantize);
                    self.loops[loop_idx].pending_mut().speed = Some(PendingSpeed {
                        execute_sample,
                        quantize,
                        speed,
                    });
                }
                EngineCommand::SetBpm { value } => {
                    self.metronome.set_bpm(value);
                    self.midi_clock.set_bpm(value);
                    let bpm = self.metronome.bpm();
                    if let Some(cb) = self.bpm_changed.as_mut() {
                        cb(bpm);
                    }
                    for lp in &mut self.loops {
                        if !lp.is_empty() {
                            lp.set_current_bpm(bpm);
                        }
                    }
                }
                EngineCommand::CancelPending => {
                    for lp in &mut self.loops {
                        lp.clear_pending_ops();
                    }
                }
            }
        }
    }

    /// Fire every due slot on one loop. Firing order is fixed: clear first
    /// (cancelling everything else), then capture, record, mute, overdub,
    /// reverse, speed, undo.
    fn flush_due_ops(&mut self, idx: usize, current_sample: i64) {
        let due = |s: i64| s <= current_sample;

        if self.loops[idx]
            .pending()
            .clear
            .map_or(false, |op| due(op.execute_sample))
        {
            let lp = &mut self.loops[idx];
            lp.clear();
            lp.clear_pending_ops();
            self.push_message(format!("Loop {} cleared", idx));
            self.state_changed();
            return;
        }

        if let Some(cap) = self.loops[idx]
            .pending_mut()
            .capture
            .take_if(|c| due(c.execute_sample))
        {
            self.fulfill_capture(idx, cap);
        }

        if let Some(rec) = self.loops[idx]
            .pending_mut()
            .record
            .take_if(|r| due(r.execute_sample))
        {
            match rec.op {
                RecordOp::Start => self.fulfill_record(idx),
                RecordOp::Stop => self.fulfill_stop_record(idx),
            }
        }

        if let Some(m) = self.loops[idx]
            .pending_mut()
            .mute
            .take_if(|m| due(m.execute_sample))
        {
            let lp = &mut self.loops[idx];
            let muted = match m.op {
                MuteOp::Mute => {
                    lp.mute();
                    true
                }
                MuteOp::Unmute => {
                    lp.play();
                    false
                }
                MuteOp::Toggle => {
                    lp.toggle_mute();
                    lp.is_muted()
                }
            };
            self.push_message(format!(
                "Loop {} {}",
                idx,
                if muted { "muted" } else { "unmuted" }
            ));
            self.state_changed();
        }

        if let Some(od) = self.loops[idx]
            .pending_mut()
            .overdub
            .take_if(|o| due(o.execute_sample))
        {
            let lp = &mut self.loops[idx];
            let msg = match od.op {
                OverdubOp::Start => {
                    lp.start_overdub();
                    format!("Loop {} overdub started", idx)
                }
                OverdubOp::Stop => {
                    lp.stop_overdub();
                    format!("Loop {} overdub stopped", idx)
                }
            };
            self.push_message(msg);
            self.state_changed();
        }

        if self.loops[idx]
            .pending_mut()
            .reverse
            .take_if(|r| due(r.execute_sample))
            .is_some()
        {
            let lp = &mut self.loops[idx];
            lp.toggle_reverse();
            let reversed = lp.is_reversed();
            self.push_message(format!(
                "Loop {} {}",
                idx,
                if reversed { "reversed" } else { "forward" }
            ));
            self.state_changed();
        }

        if let Some(sp) = self.loops[idx]
            .pending_mut()
            .speed
            .take_if(|s| due(s.execute_sample))
        {
            self.loops[idx].set_speed(sp.speed);
            let actual = self.loops[idx].speed();
            self.push_message(format!("Loop {} speed {:.2}x", idx, actual));
            self.state_changed();
        }

        if let Some(u) = self.loops[idx]
            .pending_mut()
            .undo
            .take_if(|u| due(u.execute_sample))
        {
            let lp = &mut self.loops[idx];
            for _ in 0..u.count {
                match u.direction {
                    UndoDirection::Undo => lp.undo_layer(),
                    UndoDirection::Redo => lp.redo_layer(),
                }
            }
            let verb = match u.direction {
                UndoDirection::Undo => "undone",
                UndoDirection::Redo => "redone",
            };
            self.push_message(format!("Loop {} {} layer(s) {}", idx, u.count, verb));
            self.state_changed();
        }
    }

    fn fulfill_capture(&mut self, idx: usize, cap: PendingCapture) {
        let mut lookback = cap.lookback_samples;
        if lookback <= 0 {
            lookback =
                (self.lookback_bars as f64 * self.metronome.samples_per_bar()).round() as i64;
        }

        for ch in &self.input_channels {
            lookback = lookback.min(ch.ring().available());
        }
        if lookback <= 0 {
            self.push_message("No audio to capture".to_string());
            return;
        }

        let capture_len = lookback as usize;

        // Read from further back than the lookback itself so captured audio
        // lines up with the metronome despite device round-trip latency.
        let samples_ago = lookback + self.latency_compensation;
        let current_sample = self.metronome.position().total_samples;
        let capture_start_sample = current_sample - samples_ago;

        // A channel is included if it crossed the live threshold at any
        // point during the capture window; the last-breach timestamp makes
        // that an O(1) test instead of a scan of the captured segment.
        let mut audio = vec![0.0f32; capture_len];
        let mut channel_audio = vec![0.0f32; capture_len];
        let mut live_count = 0;
        for ch_idx in 0..self.input_channels.len() {
            let had_activity = self.live_threshold <= 0.0
                || self.last_breach_sample[ch_idx] >= capture_start_sample;
            if had_activity {
                self.input_channels[ch_idx]
                    .ring()
                    .read_from_past(&mut channel_audio, samples_ago);
                for (acc, &s) in audio.iter_mut().zip(channel_audio.iter()) {
                    *acc += s;
                }
                live_count += 1;
            }
        }

        if live_count == 0 {
            self.push_message("No live input channels to capture".to_string());
            return;
        }

        let bpm = self.metronome.bpm();
        let bars = lookback as f64 / self.metronome.samples_per_bar();
        let crossfade = self.crossfade_samples;

        let lp = &mut self.loops[idx];
        lp.load_from_capture(audio);
        lp.set_crossfade_samples(crossfade);
        lp.set_length_in_bars(bars);
        lp.set_recorded_bpm(bpm);
        lp.set_current_bpm(bpm);

        self.push_message(format!(
            "Loop {} captured ({} bars, {} ch)",
            idx,
            bars.round() as i64,
            live_count
        ));
        self.state_changed();
    }

    fn fulfill_record(&mut self, idx: usize) {
        if let Some(rec) = &self.active_recording {
            let msg = format!("Already recording on Loop {}", rec.loop_index);
            self.push_message(msg);
            return;
        }

        self.loops[idx].clear();

        self.active_recording = Some(ActiveRecording {
            loop_index: idx,
            buffer: Vec::new(),
            start_sample: self.metronome.position().total_samples,
        });
        self.shared.is_recording.store(true, Ordering::Relaxed);
        self.shared
            .recording_loop_idx
            .store(idx as i64, Ordering::Relaxed);

        self.push_message(format!("Loop {} recording...", idx));
        self.state_changed();
    }

    fn fulfill_stop_record(&mut self, idx: usize) {
        let Some(rec) = &self.active_recording else {
            self.push_message("No active recording".to_string());
            return;
        };

        let rec_idx = rec.loop_index;
        if rec_idx != idx {
            self.push_message(format!("Stop ignored: recording is on Loop {}", rec_idx));
            return;
        }

        let mut buffer = match self.active_recording.take() {
            Some(rec) => rec.buffer,
            None => return,
        };
        self.shared.is_recording.store(false, Ordering::Relaxed);
        self.shared.recording_loop_idx.store(-1, Ordering::Relaxed);

        // The first latency_compensation samples were already in the
        // hardware pipeline when recording began; trim them so the loop
        // content aligns with the metronome.
        if self.latency_compensation > 0 && buffer.len() as i64 > self.latency_compensation {
            buffer.drain(..self.latency_compensation as usize);
        }

        if buffer.is_empty() {
            self.push_message("No audio recorded".to_string());
            return;
        }

        let bpm = self.metronome.bpm();
        let bars = buffer.len() as f64 / self.metronome.samples_per_bar();
        let crossfade = self.crossfade_samples;

        let lp = &mut self.loops[idx];
        lp.load_from_capture(buffer);
        lp.set_crossfade_samples(crossfade);
        lp.set_length_in_bars(bars);
        lp.set_recorded_bpm(bpm);
        lp.set_current_bpm(bpm);

        self.push_message(format!("Loop {} recorded ({:.1} bars)", idx, bars));
        self.state_changed();
    }

    fn publish_snapshot(&mut self) {
        let Ok(mut snap) = self.shared.snapshot.try_lock() else {
            return;
        };

        snap.position = self.metronome.position();
        snap.bpm = self.metronome.bpm();
        snap.beats_per_bar = self.metronome.beats_per_bar();

        snap.loops.clear();
        for lp in &self.loops {
            snap.loops.push(LoopView {
                state: lp.state(),
                length_samples: lp.length_samples(),
                length_in_bars: lp.length_in_bars(),
                layer_count: lp.layer_count(),
                active_layer_count: lp.active_layer_count(),
                play_position: lp.play_position(),
                speed: lp.speed(),
                reversed: lp.is_reversed(),
            });
        }

        snap.pending_ops.clear();
        for (idx, lp) in self.loops.iter().enumerate() {
            let ps = lp.pending();
            if let Some(c) = ps.capture {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: OpType::CaptureLoop,
                    execute_sample: c.execute_sample,
                });
            }
            if let Some(r) = ps.record {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: match r.op {
                        RecordOp::Start => OpType::Record,
                        RecordOp::Stop => OpType::StopRecord,
                    },
                    execute_sample: r.execute_sample,
                });
            }
            if let Some(m) = ps.mute {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: match m.op {
                        MuteOp::Mute => OpType::Mute,
                        MuteOp::Unmute => OpType::Unmute,
                        MuteOp::Toggle => OpType::ToggleMute,
                    },
                    execute_sample: m.execute_sample,
                });
            }
            if let Some(o) = ps.overdub {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: match o.op {
                        OverdubOp::Start => OpType::StartOverdub,
                        OverdubOp::Stop => OpType::StopOverdub,
                    },
                    execute_sample: o.execute_sample,
                });
            }
            if let Some(r) = ps.reverse {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: OpType::Reverse,
                    execute_sample: r.execute_sample,
                });
            }
            if let Some(s) = ps.speed {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: OpType::SetSpeed,
                    execute_sample: s.execute_sample,
                });
            }
            if let Some(u) = ps.undo {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: match u.direction {
                        UndoDirection::Undo => OpType::UndoLayer,
                        UndoDirection::Redo => OpType::RedoLayer,
                    },
                    execute_sample: u.execute_sample,
                });
            }
            if let Some(c) = ps.clear {
                snap.pending_ops.push(PendingOpView {
                    loop_idx: idx,
                    op: OpType::ClearLoop,
                    execute_sample: c.execute_sample,
                });
            }
        }

        snap.channels.clear();
        for ch in &self.input_channels {
            snap.channels.push(ChannelView {
                peak: ch.peak_level(),
                live: ch.is_live(self.live_threshold),
            });
        }

        snap.is_recording = self.active_recording.is_some();
        snap.recording_loop_idx = self.active_recording.as_ref().map(|r| r.loop_index);
        snap.default_quantize =
            quantize_from_u8(self.shared.default_quantize.load(Ordering::Relaxed));
        snap.lookback_bars = self.lookback_bars;
        snap.click_enabled = self.click.is_enabled();
        snap.midi_sync_enabled = self.midi_clock.is_enabled();
        snap.input_monitoring = self.input_monitoring;

        if self.published_messages_seq != self.messages_seq {
            snap.messages.clear();
            snap.messages.extend(self.messages.iter().cloned());
            self.published_messages_seq = self.messages_seq;
        }
    }

    fn push_message(&mut self, msg: String) {
        if let Some(cb) = self.callbacks.on_message.as_mut() {
            cb(&msg);
        }
        if self.messages.len() == MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(msg);
        self.messages_seq += 1;
    }

    fn state_changed(&mut self) {
        if let Some(cb) = self.callbacks.on_state_changed.as_mut() {
            cb();
        }
    }

    // Accessors

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    pub fn loop_at(&self, idx: usize) -> &Loop {
        &self.loops[idx]
    }

    pub fn max_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn max_lookback_bars(&self) -> u32 {
        self.max_lookback_bars
    }

    pub fn num_input_channels(&self) -> usize {
        self.input_channels.len()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn active_loop_count(&self) -> usize {
        self.loops.iter().filter(|l| !l.is_empty()).count()
    }

    pub fn is_recording(&self) -> bool {
        self.active_recording.is_some()
    }

    pub fn recording_loop_index(&self) -> Option<usize> {
        self.active_recording.as_ref().map(|r| r.loop_index)
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.back().map(String::as_str)
    }
}

/// Control-side companion to [`LoopEngine`]: the single command producer
/// plus snapshot and settings access. Safe to use from any non-audio thread,
/// but commands must come from one thread at a time (single producer).
pub struct EngineHandle {
    sender: CommandSender,
    shared: Arc<EngineShared>,
    max_loops: usize,
    max_lookback_bars: u32,
}

impl EngineHandle {
    /// Push a raw command. Returns false if the queue is full (the command
    /// is dropped and counted).
    pub fn enqueue_command(&mut self, cmd: EngineCommand) -> bool {
        self.sender.push(cmd)
    }

    pub fn schedule_op(&mut self, op: OpType, loop_idx: usize, quantize: Quantize) -> bool {
        self.enqueue_command(EngineCommand::ScheduleOp {
            op,
            loop_idx,
            quantize,
        })
    }

    /// Capture the lookback buffer into a loop. `loop_idx: None` targets the
    /// first empty slot; `lookback_bars: None` uses the configured lookback.
    pub fn schedule_capture_loop(
        &mut self,
        loop_idx: Option<usize>,
        quantize: Quantize,
        lookback_bars: Option<u32>,
    ) -> bool {
        let Some(idx) = self.resolve_loop_idx(loop_idx) else {
            log::warn!("capture: no empty loop slot available");
            return false;
        };
        let bars = lookback_bars.unwrap_or_else(|| self.lookback_bars());
        self.enqueue_command(EngineCommand::CaptureLoop {
            loop_idx: idx,
            quantize,
            lookback_bars: bars,
        })
    }

    pub fn schedule_record(&mut self, loop_idx: Option<usize>, quantize: Quantize) -> bool {
        let Some(idx) = self.resolve_loop_idx(loop_idx) else {
            log::warn!("record: no empty loop slot available");
            return false;
        };
        self.enqueue_command(EngineCommand::Record {
            loop_idx: idx,
            quantize,
        })
    }

    pub fn schedule_stop_record(&mut self, loop_idx: usize, quantize: Quantize) -> bool {
        self.enqueue_command(EngineCommand::StopRecord { loop_idx, quantize })
    }

    pub fn schedule_set_speed(&mut self, loop_idx: usize, speed: f64, quantize: Quantize) -> bool {
        self.enqueue_command(EngineCommand::SetSpeed {
            loop_idx,
            quantize,
            speed,
        })
    }

    pub fn set_bpm(&mut self, bpm: f64) -> bool {
        self.enqueue_command(EngineCommand::SetBpm { value: bpm })
    }

    pub fn cancel_pending(&mut self) -> bool {
        self.enqueue_command(EngineCommand::CancelPending)
    }

    fn resolve_loop_idx(&self, loop_idx: Option<usize>) -> Option<usize> {
        match loop_idx {
            Some(idx) if idx < self.max_loops => Some(idx),
            Some(_) => None,
            None => self.snapshot().next_empty_slot(),
        }
    }

    /// Clone out the most recently published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.shared
            .snapshot
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn max_loops(&self) -> usize {
        self.max_loops
    }

    pub fn max_lookback_bars(&self) -> u32 {
        self.max_lookback_bars
    }

    pub fn dropped_commands(&self) -> u64 {
        self.sender.dropped()
    }

    // Runtime settings

    pub fn set_default_quantize(&self, q: Quantize) {
        self.shared
            .default_quantize
            .store(quantize_to_u8(q), Ordering::Relaxed);
    }

    pub fn default_quantize(&self) -> Quantize {
        quantize_from_u8(self.shared.default_quantize.load(Ordering::Relaxed))
    }

    /// Set the capture lookback, clamped to `[1, max_lookback_bars]`.
    /// Returns the value actually set.
    pub fn set_lookback_bars(&self, bars: u32) -> u32 {
        let clamped = bars.clamp(1, self.max_lookback_bars);
        self.shared
            .lookback_bars
            .store(clamped, Ordering::Relaxed);
        clamped
    }

    pub fn lookback_bars(&self) -> u32 {
        self.shared.lookback_bars.load(Ordering::Relaxed)
    }

    pub fn set_crossfade_samples(&self, samples: u32) {
        self.shared
            .crossfade_samples
            .store(samples, Ordering::Relaxed);
    }

    pub fn crossfade_samples(&self) -> u32 {
        self.shared.crossfade_samples.load(Ordering::Relaxed)
    }

    pub fn set_latency_compensation(&self, samples: u64) {
        self.shared
            .latency_compensation
            .store(samples, Ordering::Relaxed);
    }

    pub fn latency_compensation(&self) -> u64 {
        self.shared.latency_compensation.load(Ordering::Relaxed)
    }

    pub fn set_input_monitoring(&self, on: bool) {
        self.shared.input_monitoring.store(on, Ordering::Relaxed);
    }

    pub fn input_monitoring(&self) -> bool {
        self.shared.input_monitoring.load(Ordering::Relaxed)
    }

    pub fn set_live_threshold(&self, threshold: f32) {
        self.shared
            .live_threshold
            .store(threshold.to_bits(), Ordering::Relaxed);
    }

    pub fn live_threshold(&self) -> f32 {
        f32::from_bits(self.shared.live_threshold.load(Ordering::Relaxed))
    }

    pub fn set_click_enabled(&self, on: bool) {
        self.shared.click_enabled.store(on, Ordering::Relaxed);
    }

    pub fn click_enabled(&self) -> bool {
        self.shared.click_enabled.load(Ordering::Relaxed)
    }

    pub fn set_click_volume(&self, volume: f32) {
        self.shared
            .click_volume
            .store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn click_volume(&self) -> f32 {
        f32::from_bits(self.shared.click_volume.load(Ordering::Relaxed))
    }

    pub fn set_midi_sync_enabled(&self, on: bool) {
        self.shared.midi_sync_enabled.store(on, Ordering::Relaxed);
    }

    pub fn midi_sync_enabled(&self) -> bool {
        self.shared.midi_sync_enabled.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.shared.is_recording.load(Ordering::Relaxed)
    }

    pub fn recording_loop_idx(&self) -> Option<usize> {
        let idx = self.shared.recording_loop_idx.load(Ordering::Relaxed);
        (idx >= 0).then_some(idx as usize)
    }

    pub fn live_channel_mask(&self) -> u64 {
        self.shared.live_channel_mask.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::looper::LoopState;

    fn settings(channels: usize) -> EngineSettings {
        EngineSettings {
            max_loops: 8,
            max_lookback_bars: 4,
            sample_rate: 48000.0,
            min_bpm: 60.0,
            bpm: 120.0,
            beats_per_bar: 4,
            num_input_channels: channels,
            live_threshold: 0.0,
            live_window_ms: 500,
        }
    }

    fn new_engine() -> (LoopEngine, EngineHandle) {
        LoopEngine::new(settings(1))
    }

    fn feed(engine: &mut LoopEngine, input: &[f32]) {
        let mut out = vec![0.0; input.len()];
        engine.process_block(&[input], &mut out);
    }

    fn feed_silence(engine: &mut LoopEngine, mut n: usize) {
        let zeros = vec![0.0f32; 4096];
        while n > 0 {
            let take = n.min(zeros.len());
            feed(engine, &zeros[..take]);
            n -= take;
        }
    }

    fn ramp_value(k: usize) -> f32 {
        (k % 1000) as f32 / 1000.0
    }

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(ramp_value).collect()
    }

    fn feed_ramp(engine: &mut LoopEngine, start: usize, len: usize) {
        let mut fed = 0;
        while fed < len {
            let take = (len - fed).min(4096);
            feed(engine, &ramp(start + fed, take));
            fed += take;
        }
    }

    #[test]
    fn test_immediate_capture() {
        // 48 kHz, 120 BPM: one bar = 96000 samples
        let (mut engine, mut handle) = new_engine();

        feed_ramp(&mut engine, 0, 200000);
        assert!(handle.schedule_capture_loop(Some(0), Quantize::Free, Some(2)));
        feed(&mut engine, &ramp(200000, 64));

        let lp = engine.loop_at(0);
        assert_eq!(lp.state(), LoopState::Playing);
        assert_eq!(lp.length_samples(), 192000);
        assert!((lp.length_in_bars() - 2.0).abs() < 1e-9);

        // Base layer holds the last 192000 samples written at fire time:
        // the capture fired at sample 200000, right after that sample's
        // input landed in the ring.
        let base = &lp.layers()[0].audio;
        let expected = ramp(8001, 192000);
        assert_eq!(base, &expected);
    }

    #[test]
    fn test_capture_lookback_clamped_to_available() {
        let (mut engine, mut handle) = new_engine();
        feed_ramp(&mut engine, 0, 5000);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(2));
        feed(&mut engine, &ramp(5000, 1));

        let lp = engine.loop_at(0);
        assert_eq!(lp.length_samples(), 5001);
        assert!((lp.length_in_bars() - 5001.0 / 96000.0).abs() < 1e-9);
    }

    #[test]
    fn test_capture_aborts_without_live_channels() {
        let (mut engine, mut handle) = LoopEngine::new(EngineSettings {
            live_threshold: 0.5,
            ..settings(1)
        });
        feed_silence(&mut engine, 4096);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        feed_silence(&mut engine, 16);

        assert!(engine.loop_at(0).is_empty());
        assert_eq!(engine.last_message(), Some("No live input channels to capture"));
    }

    #[test]
    fn test_quantized_mute_last_wins() {
        let (mut engine, mut handle) = new_engine();

        // Give loop 0 content so mute is observable
        feed_ramp(&mut engine, 0, 4096);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        feed_silence(&mut engine, 16);
        assert!(engine.loop_at(0).is_playing());

        feed_silence(&mut engine, 10000 - 4112);
        handle.schedule_op(OpType::ToggleMute, 0, Quantize::Bar);
        feed_silence(&mut engine, 20000);
        handle.schedule_op(OpType::Mute, 0, Quantize::Bar);
        feed_silence(&mut engine, 4096);

        // One pending op in the mute slot, the later one
        let pending = engine.loop_at(0).pending();
        assert_eq!(pending.mute.unwrap().op, MuteOp::Mute);
        assert_eq!(pending.mute.unwrap().execute_sample, 96000);

        feed_silence(&mut engine, 96000 - 34112 + 16);
        assert_eq!(engine.loop_at(0).state(), LoopState::Muted);
        assert!(!engine.loop_at(0).has_pending_ops());
    }

    #[test]
    fn test_reverse_slot_last_wins_deadline() {
        let (mut engine, mut handle) = new_engine();
        feed_silence(&mut engine, 10000);

        handle.schedule_op(OpType::Reverse, 0, Quantize::Beat);
        handle.schedule_op(OpType::Reverse, 0, Quantize::Bar);
        feed_silence(&mut engine, 16);

        // Only the bar-quantized deadline remains
        let pending = engine.loop_at(0).pending();
        assert_eq!(pending.reverse.unwrap().execute_sample, 96000);
    }

    #[test]
    fn test_deadline_fixed_despite_tempo_change() {
        let (mut engine, mut handle) = new_engine();
        feed_silence(&mut engine, 10000);

        handle.schedule_op(OpType::Reverse, 0, Quantize::Bar);
        handle.set_bpm(240.0);
        feed_silence(&mut engine, 85999); // total 95999

        assert!(!engine.loop_at(0).is_reversed());
        feed_silence(&mut engine, 2); // crosses sample 96000
        assert!(engine.loop_at(0).is_reversed());
    }

    #[test]
    fn test_classic_record_with_latency_trim() {
        let (mut engine, mut handle) = new_engine();
        handle.set_latency_compensation(1000);

        handle.schedule_record(Some(2), Quantize::Free);
        feed(&mut engine, &[1.0]); // record fires here, nothing captured yet
        assert!(engine.is_recording());
        assert_eq!(engine.recording_loop_index(), Some(2));
        assert!(handle.is_recording());

        feed(&mut engine, &vec![1.0f32; 999]);
        feed(&mut engine, &vec![0.5f32; 49000]);
        handle.schedule_stop_record(2, Quantize::Free);
        feed(&mut engine, &[0.5]);

        assert!(!engine.is_recording());
        assert!(!handle.is_recording());

        let lp = engine.loop_at(2);
        assert_eq!(lp.state(), LoopState::Playing);
        assert_eq!(lp.length_samples(), 49000);
        let base = &lp.layers()[0].audio;
        assert_eq!(base[0], 0.5);
        assert!(base.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_record_rejected_while_recording() {
        let (mut engine, mut handle) = new_engine();
        handle.schedule_record(Some(0), Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.recording_loop_index(), Some(0));

        handle.schedule_record(Some(1), Quantize::Free);
        feed_silence(&mut engine, 16);

        assert_eq!(engine.recording_loop_index(), Some(0));
        assert_eq!(engine.last_message(), Some("Already recording on Loop 0"));
    }

    #[test]
    fn test_stop_record_mismatch_ignored() {
        let (mut engine, mut handle) = new_engine();
        handle.schedule_record(Some(0), Quantize::Free);
        feed_silence(&mut engine, 16);

        handle.schedule_stop_record(3, Quantize::Free);
        feed_silence(&mut engine, 16);

        assert!(engine.is_recording());
        assert_eq!(engine.last_message(), Some("Stop ignored: recording is on Loop 0"));
    }

    #[test]
    fn test_out_of_range_index_dropped() {
        let (mut engine, mut handle) = new_engine();
        handle.enqueue_command(EngineCommand::ScheduleOp {
            op: OpType::Reverse,
            loop_idx: 99,
            quantize: Quantize::Free,
        });
        feed_silence(&mut engine, 16);
        // Nothing scheduled, nothing fired
        assert!((0..engine.max_loops()).all(|i| !engine.loop_at(i).has_pending_ops()));
    }

    #[test]
    fn test_overdub_and_undo_via_scheduler() {
        let (mut engine, mut handle) = new_engine();
        feed_ramp(&mut engine, 0, 4096);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        feed_silence(&mut engine, 16);

        handle.schedule_op(OpType::StartOverdub, 0, Quantize::Free);
        feed(&mut engine, &vec![0.2f32; 64]);
        assert_eq!(engine.loop_at(0).state(), LoopState::Recording);
        assert_eq!(engine.loop_at(0).layer_count(), 2);

        handle.schedule_op(OpType::StopOverdub, 0, Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.loop_at(0).state(), LoopState::Playing);

        // Two undos in one batch accumulate into a single pending op
        handle.schedule_op(OpType::StartOverdub, 0, Quantize::Free);
        feed_silence(&mut engine, 16);
        handle.schedule_op(OpType::StopOverdub, 0, Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.loop_at(0).layer_count(), 3);

        handle.schedule_op(OpType::UndoLayer, 0, Quantize::Free);
        handle.schedule_op(OpType::UndoLayer, 0, Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.loop_at(0).active_layer_count(), 1);

        handle.schedule_op(OpType::RedoLayer, 0, Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.loop_at(0).active_layer_count(), 2);
    }

    #[test]
    fn test_tempo_follow_half_speed() {
        let (mut engine, mut handle) = new_engine();

        feed_ramp(&mut engine, 0, 96000);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        feed(&mut engine, &ramp(96000, 1));

        let lp = engine.loop_at(0);
        assert_eq!(lp.length_samples(), 96000);
        assert!((lp.recorded_bpm() - 120.0).abs() < 1e-9);
        let start_pos = lp.play_position();

        handle.set_bpm(60.0);
        feed_silence(&mut engine, 96000);

        let lp = engine.loop_at(0);
        assert!(lp.is_time_stretch_active());
        let advanced = lp.play_position() - start_pos;
        // Half-tempo playback consumes ~half the raw samples, quantized by
        // the stretcher's refill block
        assert!(
            (46000..=50500).contains(&advanced),
            "raw advance was {}",
            advanced
        );
        assert_eq!(engine.metronome().position().total_samples, 96001 + 96000);
    }

    #[test]
    fn test_clear_cancels_all_pending() {
        let (mut engine, mut handle) = new_engine();
        feed_ramp(&mut engine, 0, 4096);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        feed_silence(&mut engine, 16);
        assert!(engine.loop_at(0).is_playing());

        handle.schedule_op(OpType::Reverse, 0, Quantize::Bar);
        handle.schedule_op(OpType::ToggleMute, 0, Quantize::Bar);
        handle.schedule_op(OpType::StartOverdub, 0, Quantize::Bar);
        handle.schedule_op(OpType::ClearLoop, 0, Quantize::Bar);
        feed_silence(&mut engine, 96000);

        let lp = engine.loop_at(0);
        assert_eq!(lp.state(), LoopState::Empty);
        assert!(!lp.has_pending_ops());
        assert!(!lp.is_reversed());
    }

    #[test]
    fn test_cancel_pending_clears_every_loop() {
        let (mut engine, mut handle) = new_engine();
        handle.schedule_op(OpType::Reverse, 0, Quantize::Bar);
        handle.schedule_op(OpType::Reverse, 3, Quantize::Bar);
        feed_silence(&mut engine, 16);
        assert!(engine.loop_at(0).has_pending_ops());
        assert!(engine.loop_at(3).has_pending_ops());

        handle.cancel_pending();
        feed_silence(&mut engine, 16);
        assert!(!engine.loop_at(0).has_pending_ops());
        assert!(!engine.loop_at(3).has_pending_ops());
    }

    #[test]
    fn test_input_monitoring_passthrough() {
        let (mut engine, handle) = new_engine();
        handle.set_click_enabled(false);

        let input = vec![0.25f32; 64];
        let mut out = vec![0.0f32; 64];
        engine.process_block(&[&input], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        handle.set_input_monitoring(true);
        let mut out = vec![0.0f32; 64];
        engine.process_block(&[&input], &mut out);
        assert!(out.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_snapshot_reflects_engine_state() {
        let (mut engine, mut handle) = new_engine();
        feed_ramp(&mut engine, 0, 4096);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        handle.schedule_op(OpType::Reverse, 1, Quantize::Bar);
        feed_silence(&mut engine, 16);

        let snap = handle.snapshot();
        assert_eq!(snap.loops.len(), 8);
        assert_eq!(snap.channels.len(), 1);
        assert_eq!(snap.bpm, 120.0);
        assert_eq!(snap.loops[0].state, LoopState::Playing);
        assert_eq!(snap.loops[0].length_samples, 4097);
        assert_eq!(snap.next_empty_slot(), Some(1));
        assert_eq!(snap.active_loop_count(), 1);
        assert_eq!(snap.pending_ops.len(), 1);
        assert_eq!(snap.pending_ops[0].loop_idx, 1);
        assert_eq!(snap.pending_ops[0].op, OpType::Reverse);
        assert!(snap.messages.iter().any(|m| m.contains("captured")));
        assert!(snap.channels[0].live);
    }

    #[test]
    fn test_live_channel_mask_published() {
        let (mut engine, handle) = new_engine();
        feed(&mut engine, &vec![0.8f32; 256]);
        assert_eq!(handle.live_channel_mask(), 1);

        let snap = handle.snapshot();
        assert!(snap.channels[0].peak > 0.5);
    }

    #[test]
    fn test_lookback_bars_clamped() {
        let (_engine, handle) = new_engine();
        assert_eq!(handle.set_lookback_bars(0), 1);
        assert_eq!(handle.set_lookback_bars(99), 4);
        assert_eq!(handle.set_lookback_bars(3), 3);
        assert_eq!(handle.lookback_bars(), 3);
    }

    #[test]
    fn test_speed_scheduled_and_clamped() {
        let (mut engine, mut handle) = new_engine();
        feed_ramp(&mut engine, 0, 4096);
        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        feed_silence(&mut engine, 16);

        handle.schedule_set_speed(0, 10.0, Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.loop_at(0).speed(), 4.0);

        handle.schedule_set_speed(0, 0.0, Quantize::Free);
        feed_silence(&mut engine, 16);
        assert_eq!(engine.loop_at(0).speed(), 0.25);
    }

    #[test]
    fn test_multi_channel_capture_sums_live_channels() {
        let (mut engine, mut handle) = LoopEngine::new(settings(2));

        let a = vec![0.25f32; 4096];
        let b = vec![0.5f32; 4096];
        let mut out = vec![0.0f32; 4096];
        engine.process_block(&[&a, &b], &mut out);

        handle.schedule_capture_loop(Some(0), Quantize::Free, Some(1));
        let mut out = vec![0.0f32; 1];
        engine.process_block(&[&a[..1], &b[..1]], &mut out);

        let lp = engine.loop_at(0);
        assert_eq!(lp.length_samples(), 4097);
        // Both channels were live (threshold disabled), so they sum
        assert!(lp.layers()[0].audio.iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }
}
