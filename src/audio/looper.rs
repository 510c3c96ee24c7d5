use super::pending::PendingState;
use super::stretch::TimeStretcher;

/// Output samples produced per stretcher refill.
const STRETCH_BLOCK_SIZE: usize = 512;
/// Circular buffer of stretched output samples.
const STRETCH_BUF_CAPACITY: usize = 1024;
/// Worst-case raw input per refill (block size at the 4.0 tempo-ratio clamp).
const MAX_STRETCH_INPUT: usize = 2048;

/// State of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No audio loaded
    Empty,
    /// Playing back
    Playing,
    /// Has audio but not outputting
    Muted,
    /// Overdubbing a new layer
    Recording,
}

impl Default for LoopState {
    fn default() -> Self {
        LoopState::Empty
    }
}

/// A single layer of audio in a loop (one overdub pass).
#[derive(Debug, Clone)]
pub struct LoopLayer {
    pub audio: Vec<f32>,
    pub gain: f32,
    /// Toggled off by undo, back on by redo
    pub active: bool,
}

/// A loop with multiple layers and playback controls. The loop length is
/// fixed by the first (base) layer; overdub layers are sized to match.
pub struct Loop {
    id: usize,
    layers: Vec<LoopLayer>,
    state: LoopState,
    loop_length: i64,
    play_pos: i64,
    fractional_pos: f64,
    reversed: bool,
    speed: f64,
    crossfade_samples: i64,
    length_in_bars: f64,
    sample_rate: f64,
    recorded_bpm: f64,
    current_bpm: f64,
    pending: PendingState,

    // Time-stretch state, allocated when the loop is loaded so playback
    // never allocates.
    stretcher: TimeStretcher,
    stretch_buf: Vec<f32>,
    stretch_input_work: Vec<f32>,
    stretch_output_work: Vec<f32>,
    stretch_buf_read: usize,
    stretch_buf_avail: usize,
    stretch_raw_pos: i64,
}

impl Loop {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            layers: Vec::new(),
            state: LoopState::Empty,
            loop_length: 0,
            play_pos: 0,
            fractional_pos: 0.0,
            reversed: false,
            speed: 1.0,
            crossfade_samples: 256,
            length_in_bars: 0.0,
            sample_rate: 44100.0,
            recorded_bpm: 0.0,
            current_bpm: 0.0,
            pending: PendingState::default(),
            stretcher: TimeStretcher::new(),
            stretch_buf: Vec::new(),
            stretch_input_work: Vec::new(),
            stretch_output_work: Vec::new(),
            stretch_buf_read: 0,
            stretch_buf_avail: 0,
            stretch_raw_pos: 0,
        }
    }

    /// Install captured audio as the base layer. Sets the loop length and
    /// starts playback from the top.
    pub fn load_from_capture(&mut self, audio: Vec<f32>) {
        self.clear();
        self.loop_length = audio.len() as i64;
        self.layers.push(LoopLayer {
            audio,
            gain: 1.0,
            active: true,
        });
        self.state = LoopState::Playing;
        self.play_pos = 0;
        self.fractional_pos = 0.0;

        self.stretcher.configure(self.sample_rate);
        self.stretch_buf.resize(STRETCH_BUF_CAPACITY, 0.0);
        self.stretch_input_work.resize(MAX_STRETCH_INPUT, 0.0);
        self.stretch_output_work.resize(STRETCH_BLOCK_SIZE, 0.0);
        self.stretch_buf_read = 0;
        self.stretch_buf_avail = 0;
        self.stretch_raw_pos = 0;
    }

    /// Add an overdub layer, resized to the loop length.
    pub fn add_layer(&mut self, mut audio: Vec<f32>) {
        if self.loop_length == 0 {
            return;
        }
        audio.resize(self.loop_length as usize, 0.0);
        self.layers.push(LoopLayer {
            audio,
            gain: 1.0,
            active: true,
        });
    }

    /// Deactivate the most recent active layer, excluding the base layer.
    pub fn undo_layer(&mut self) {
        for layer in self.layers.iter_mut().skip(1).rev() {
            if layer.active {
                layer.active = false;
                return;
            }
        }
    }

    /// Reactivate the earliest inactive layer.
    pub fn redo_layer(&mut self) {
        for layer in self.layers.iter_mut().skip(1) {
            if !layer.active {
                layer.active = true;
                return;
            }
        }
    }

    fn mixed_sample(&self, pos: i64) -> f32 {
        if pos < 0 || pos >= self.loop_length {
            return 0.0;
        }
        let idx = pos as usize;
        self.layers
            .iter()
            .filter(|l| l.active)
            .map(|l| l.audio[idx] * l.gain)
            .sum()
    }

    fn crossfade_gain(&self, pos: i64) -> f32 {
        if self.crossfade_samples <= 0 || self.loop_length <= self.crossfade_samples * 2 {
            return 1.0;
        }
        if pos < self.crossfade_samples {
            return pos as f32 / self.crossfade_samples as f32;
        }
        let dist_from_end = self.loop_length - 1 - pos;
        if dist_from_end < self.crossfade_samples {
            return dist_from_end as f32 / self.crossfade_samples as f32;
        }
        1.0
    }

    /// Mixed output sample at the current playback position, advancing the
    /// position. Returns 0 when empty or muted.
    pub fn process_sample(&mut self) -> f32 {
        if self.state == LoopState::Empty || self.state == LoopState::Muted {
            return 0.0;
        }

        if self.is_time_stretch_active() {
            self.process_stretched_sample()
        } else {
            self.process_direct_sample()
        }
    }

    fn process_direct_sample(&mut self) -> f32 {
        let read_pos = if self.reversed {
            self.loop_length - 1 - self.play_pos
        } else {
            self.play_pos
        };

        let sample = self.mixed_sample(read_pos) * self.crossfade_gain(read_pos);

        self.fractional_pos += self.speed;
        let advance = self.fractional_pos as i64;
        self.fractional_pos -= advance as f64;
        self.play_pos = (self.play_pos + advance) % self.loop_length;

        sample
    }

    fn process_stretched_sample(&mut self) -> f32 {
        // At max speed (4x) up to 4 stretched samples are consumed per call.
        let needed = self.speed.ceil() as usize + 1;
        while self.stretch_buf_avail < needed {
            if !self.fill_stretch_buffer() {
                return 0.0;
            }
        }

        let sample = self.stretch_buf[self.stretch_buf_read];

        // The user's speed applies on top of the tempo stretch, here it
        // shifts pitch as well.
        self.fractional_pos += self.speed;
        let advance = self.fractional_pos as usize;
        self.fractional_pos -= advance as f64;

        self.stretch_buf_read = (self.stretch_buf_read + advance) % STRETCH_BUF_CAPACITY;
        self.stretch_buf_avail -= advance;

        self.play_pos = self.stretch_raw_pos % self.loop_length;

        sample
    }

    fn fill_stretch_buffer(&mut self) -> bool {
        if !self.stretcher.is_configured() {
            return false;
        }
        if self.recorded_bpm <= 0.0 || self.current_bpm <= 0.0 {
            return false;
        }

        // Ratio above 1.0 means the current tempo is faster: more raw input
        // is consumed per output sample.
        let tempo_ratio = (self.current_bpm / self.recorded_bpm).clamp(0.25, 4.0);
        let input_needed = ((STRETCH_BLOCK_SIZE as f64 * tempo_ratio).ceil() as usize)
            .clamp(1, MAX_STRETCH_INPUT);

        for i in 0..input_needed {
            let raw_mod = self.stretch_raw_pos % self.loop_length;
            let pos = if self.reversed {
                self.loop_length - 1 - raw_mod
            } else {
                raw_mod
            };
            self.stretch_input_work[i] = self.mixed_sample(pos) * self.crossfade_gain(pos);
            self.stretch_raw_pos = (self.stretch_raw_pos + 1) % self.loop_length;
        }

        self.stretcher.process(
            &self.stretch_input_work[..input_needed],
            &mut self.stretch_output_work[..STRETCH_BLOCK_SIZE],
        );

        for i in 0..STRETCH_BLOCK_SIZE {
            let write_idx = (self.stretch_buf_read + self.stretch_buf_avail + i) % STRETCH_BUF_CAPACITY;
            self.stretch_buf[write_idx] = self.stretch_output_work[i];
        }
        self.stretch_buf_avail += STRETCH_BLOCK_SIZE;
        true
    }

    /// Add an input sample into the newest layer at the current read
    /// position, so overdubs line up with the underlying loop content. In
    /// stretched mode the raw position the stretcher is consuming from is
    /// used, not the stretched output index.
    pub fn record_sample(&mut self, input: f32) {
        if self.state != LoopState::Recording || self.layers.is_empty() {
            return;
        }

        let pos = if self.is_time_stretch_active() {
            let raw_mod = self.stretch_raw_pos % self.loop_length;
            if self.reversed {
                self.loop_length - 1 - raw_mod
            } else {
                raw_mod
            }
        } else if self.reversed {
            self.loop_length - 1 - self.play_pos
        } else {
            self.play_pos
        };

        if pos >= 0 && pos < self.loop_length {
            if let Some(layer) = self.layers.last_mut() {
                layer.audio[pos as usize] += input;
            }
        }
    }

    pub fn play(&mut self) {
        if self.state != LoopState::Empty {
            self.state = LoopState::Playing;
        }
    }

    pub fn mute(&mut self) {
        if self.state != LoopState::Empty {
            self.state = LoopState::Muted;
        }
    }

    pub fn toggle_mute(&mut self) {
        match self.state {
            LoopState::Playing => self.state = LoopState::Muted,
            LoopState::Muted => self.state = LoopState::Playing,
            _ => {}
        }
    }

    /// Append a fresh zero layer and begin overdub recording into it.
    pub fn start_overdub(&mut self) {
        if self.state == LoopState::Empty || self.loop_length == 0 {
            return;
        }
        self.layers.push(LoopLayer {
            audio: vec![0.0; self.loop_length as usize],
            gain: 1.0,
            active: true,
        });
        self.state = LoopState::Recording;
    }

    pub fn stop_overdub(&mut self) {
        if self.state == LoopState::Recording {
            self.state = LoopState::Playing;
        }
    }

    pub fn toggle_reverse(&mut self) {
        self.reversed = !self.reversed;
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(0.25, 4.0);
    }

    /// Follow a tempo change. Entering or leaving stretched mode resets the
    /// stretcher and carries the raw play position across.
    pub fn set_current_bpm(&mut self, bpm: f64) {
        let was_active = self.is_time_stretch_active();
        self.current_bpm = bpm;
        let now_active = self.is_time_stretch_active();

        if !was_active && now_active {
            self.stretch_raw_pos = self.play_pos;
            self.stretch_buf_read = 0;
            self.stretch_buf_avail = 0;
            self.fractional_pos = 0.0;
            self.stretcher.reset();
        } else if was_active && !now_active {
            self.play_pos = self.stretch_raw_pos % self.loop_length;
            self.fractional_pos = 0.0;
        }
    }

    pub fn set_recorded_bpm(&mut self, bpm: f64) {
        self.recorded_bpm = bpm;
    }

    pub fn recorded_bpm(&self) -> f64 {
        self.recorded_bpm
    }

    pub fn current_bpm(&self) -> f64 {
        self.current_bpm
    }

    pub fn is_time_stretch_active(&self) -> bool {
        !self.is_empty()
            && self.recorded_bpm > 0.0
            && self.current_bpm > 0.0
            && (self.current_bpm - self.recorded_bpm).abs() > 0.5
    }

    pub fn clear(&mut self) {
        self.layers.clear();
        self.state = LoopState::Empty;
        self.loop_length = 0;
        self.play_pos = 0;
        self.fractional_pos = 0.0;
        self.reversed = false;
        self.speed = 1.0;
        self.length_in_bars = 0.0;

        self.stretcher = TimeStretcher::new();
        self.stretch_buf.clear();
        self.stretch_input_work.clear();
        self.stretch_output_work.clear();
        self.stretch_buf_read = 0;
        self.stretch_buf_avail = 0;
        self.stretch_raw_pos = 0;
        self.recorded_bpm = 0.0;
        self.current_bpm = 0.0;
    }

    // State

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == LoopState::Empty
    }

    pub fn is_playing(&self) -> bool {
        self.state == LoopState::Playing
    }

    pub fn is_muted(&self) -> bool {
        self.state == LoopState::Muted
    }

    pub fn is_recording(&self) -> bool {
        self.state == LoopState::Recording
    }

    // Properties

    pub fn length_samples(&self) -> i64 {
        self.loop_length
    }

    /// Raw loop position; in stretched mode the position the stretcher is
    /// consuming from.
    pub fn play_position(&self) -> i64 {
        if self.is_time_stretch_active() {
            return self.stretch_raw_pos % self.loop_length;
        }
        self.play_pos
    }

    pub fn set_play_position(&mut self, pos: i64) {
        if self.loop_length <= 0 {
            return;
        }
        self.play_pos = pos.rem_euclid(self.loop_length);
        self.stretch_raw_pos = self.play_pos;
        self.fractional_pos = 0.0;
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn layers(&self) -> &[LoopLayer] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn active_layer_count(&self) -> usize {
        self.layers.iter().filter(|l| l.active).count()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn length_in_bars(&self) -> f64 {
        self.length_in_bars
    }

    pub fn set_length_in_bars(&mut self, bars: f64) {
        self.length_in_bars = bars;
    }

    pub fn crossfade_samples(&self) -> i64 {
        self.crossfade_samples
    }

    pub fn set_crossfade_samples(&mut self, samples: i64) {
        self.crossfade_samples = samples;
    }

    pub fn set_sample_rate(&mut self, rate: f64) {
        self.sample_rate = rate;
    }

    // Pending state

    pub fn pending(&self) -> &PendingState {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingState {
        &mut self.pending
    }

    pub fn has_pending_ops(&self) -> bool {
        self.pending.has_any()
    }

    pub fn clear_pending_ops(&mut self) {
        self.pending.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_loop(audio: Vec<f32>) -> Loop {
        let mut lp = Loop::new(0);
        lp.load_from_capture(audio);
        lp
    }

    #[test]
    fn test_identity_playback() {
        let audio: Vec<f32> = (0..8).map(|i| i as f32 * 0.1).collect();
        let mut lp = loaded_loop(audio.clone());
        assert_eq!(lp.state(), LoopState::Playing);
        assert_eq!(lp.length_samples(), 8);

        let out: Vec<f32> = (0..8).map(|_| lp.process_sample()).collect();
        assert_eq!(out, audio);
        // Wrapped back to the start
        assert_eq!(lp.play_position(), 0);
    }

    #[test]
    fn test_play_pos_stays_in_range() {
        let mut lp = loaded_loop(vec![0.5; 7]);
        lp.set_speed(3.0);
        for _ in 0..100 {
            lp.process_sample();
            assert!(lp.play_position() >= 0 && lp.play_position() < 7);
        }
    }

    #[test]
    fn test_double_speed_skips_samples() {
        let audio: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let mut lp = loaded_loop(audio);
        lp.set_speed(2.0);
        let out: Vec<f32> = (0..4).map(|_| lp.process_sample()).collect();
        assert_eq!(out, vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_speed_clamped() {
        let mut lp = loaded_loop(vec![0.0; 16]);
        lp.set_speed(0.0);
        assert_eq!(lp.speed(), 0.25);
        lp.set_speed(10.0);
        assert_eq!(lp.speed(), 4.0);
    }

    #[test]
    fn test_reverse_playback_and_double_toggle() {
        let audio: Vec<f32> = (0..4).map(|i| i as f32).collect();
        let mut lp = loaded_loop(audio);
        lp.toggle_reverse();
        assert!(lp.is_reversed());
        let out: Vec<f32> = (0..4).map(|_| lp.process_sample()).collect();
        assert_eq!(out, vec![3.0, 2.0, 1.0, 0.0]);

        lp.toggle_reverse();
        assert!(!lp.is_reversed());
    }

    #[test]
    fn test_mute_silences_without_losing_audio() {
        let mut lp = loaded_loop(vec![0.7; 4]);
        lp.mute();
        assert_eq!(lp.process_sample(), 0.0);
        lp.toggle_mute();
        assert!(lp.is_playing());
        assert_eq!(lp.process_sample(), 0.7);
    }

    #[test]
    fn test_overdub_undo_redo() {
        let mut lp = loaded_loop(vec![1.0; 4]);

        lp.start_overdub();
        assert_eq!(lp.state(), LoopState::Recording);
        assert_eq!(lp.layer_count(), 2);
        assert_eq!(lp.layers()[1].audio, vec![0.0; 4]);

        // The engine mixes the playback sample first, then records the live
        // input at the advanced position.
        for _ in 0..4 {
            lp.process_sample();
            lp.record_sample(2.0);
        }
        lp.stop_overdub();
        assert_eq!(lp.state(), LoopState::Playing);

        let out: Vec<f32> = (0..4).map(|_| lp.process_sample()).collect();
        assert_eq!(out, vec![3.0, 3.0, 3.0, 3.0]);

        lp.undo_layer();
        assert_eq!(lp.active_layer_count(), 1);
        let out: Vec<f32> = (0..4).map(|_| lp.process_sample()).collect();
        assert_eq!(out, vec![1.0, 1.0, 1.0, 1.0]);

        lp.redo_layer();
        assert_eq!(lp.active_layer_count(), 2);
        let out: Vec<f32> = (0..4).map(|_| lp.process_sample()).collect();
        assert_eq!(out, vec![3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_undo_never_touches_base_layer() {
        let mut lp = loaded_loop(vec![1.0; 4]);
        lp.undo_layer();
        lp.undo_layer();
        assert_eq!(lp.active_layer_count(), 1);
        assert!(lp.layers()[0].active);
    }

    #[test]
    fn test_add_layer_resized_to_loop_length() {
        let mut lp = loaded_loop(vec![0.0; 4]);
        lp.add_layer(vec![9.0; 6]);
        assert_eq!(lp.layers()[1].audio.len(), 4);
        lp.add_layer(vec![9.0; 2]);
        assert_eq!(lp.layers()[2].audio, vec![9.0, 9.0, 0.0, 0.0]);
    }

    #[test]
    fn test_crossfade_ramp() {
        let mut lp = loaded_loop(vec![1.0; 1000]);
        lp.set_crossfade_samples(100);
        let out: Vec<f32> = (0..1000).map(|_| lp.process_sample()).collect();
        assert_eq!(out[0], 0.0);
        assert!((out[50] - 0.5).abs() < 1e-6);
        assert_eq!(out[500], 1.0);
        assert_eq!(out[999], 0.0);
    }

    #[test]
    fn test_crossfade_disabled_on_short_loops() {
        let mut lp = loaded_loop(vec![1.0; 100]);
        lp.set_crossfade_samples(50);
        let out: Vec<f32> = (0..100).map(|_| lp.process_sample()).collect();
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut lp = loaded_loop(vec![1.0; 8]);
        lp.toggle_reverse();
        lp.set_speed(2.0);
        lp.clear();
        assert!(lp.is_empty());
        assert_eq!(lp.length_samples(), 0);
        assert!(!lp.is_reversed());
        assert_eq!(lp.speed(), 1.0);
        assert_eq!(lp.layer_count(), 0);
        assert_eq!(lp.process_sample(), 0.0);
    }

    #[test]
    fn test_stretch_activation_rules() {
        let mut lp = loaded_loop(vec![0.5; 2048]);
        lp.set_recorded_bpm(120.0);
        lp.set_current_bpm(120.0);
        assert!(!lp.is_time_stretch_active());

        // Within the half-BPM dead zone
        lp.set_current_bpm(120.4);
        assert!(!lp.is_time_stretch_active());

        lp.set_current_bpm(60.0);
        assert!(lp.is_time_stretch_active());

        // Returning to the recorded tempo drops back to direct playback
        lp.set_current_bpm(120.0);
        assert!(!lp.is_time_stretch_active());
    }

    #[test]
    fn test_stretch_raw_position_transfer() {
        let mut lp = loaded_loop(vec![0.5; 4096]);
        lp.set_recorded_bpm(120.0);
        lp.set_current_bpm(120.0);
        for _ in 0..100 {
            lp.process_sample();
        }
        assert_eq!(lp.play_position(), 100);

        lp.set_current_bpm(60.0);
        // Stretch mode continues from the raw position
        assert_eq!(lp.play_position(), 100);
    }

    #[test]
    fn test_half_tempo_consumes_half_input() {
        let mut lp = Loop::new(0);
        lp.set_sample_rate(48000.0);
        lp.load_from_capture(vec![0.5; 48000]);
        lp.set_crossfade_samples(0);
        lp.set_recorded_bpm(120.0);
        lp.set_current_bpm(60.0);
        assert!(lp.is_time_stretch_active());

        let start = lp.play_position();
        for _ in 0..8192 {
            lp.process_sample();
        }
        let consumed = lp.play_position() - start;
        // Half-tempo playback reads ~0.5 raw samples per output sample,
        // quantized by the 512-sample refill blocks.
        assert!((3500..=4700).contains(&consumed), "consumed {}", consumed);
    }
}
