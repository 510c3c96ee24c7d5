use std::f64::consts::PI;

/// Click length in seconds.
const DURATION_SECS: f64 = 0.03;
/// Exponential decay time constant.
const DECAY_TAU: f64 = 0.006;

/// Synthesizes a short percussive click for the metronome: a decaying sine
/// of ~30 ms, higher pitched and slightly louder on downbeats.
pub struct Click {
    sample_rate: f64,
    enabled: bool,
    volume: f32,
    active: bool,
    phase: f64,
    freq: f64,
    click_gain: f32,
    sample_index: u64,
}

impl Click {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            enabled: true,
            volume: 0.5,
            active: false,
            phase: 0.0,
            freq: 1000.0,
            click_gain: 1.0,
            sample_index: 0,
        }
    }

    /// Start a click at the next `next_sample` call.
    pub fn trigger(&mut self, is_downbeat: bool) {
        if !self.enabled {
            return;
        }
        self.phase = 0.0;
        self.sample_index = 0;
        self.active = true;
        self.freq = if is_downbeat { 1000.0 } else { 800.0 };
        self.click_gain = if is_downbeat { 1.0 } else { 0.75 };
    }

    /// Next sample of the click, 0.0 when inactive.
    pub fn next_sample(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }

        let t = self.sample_index as f64 / self.sample_rate;
        if t >= DURATION_SECS {
            self.active = false;
            return 0.0;
        }

        let envelope = (-t / DECAY_TAU).exp() as f32;
        let sample = (self.phase.sin() as f32) * envelope;
        self.phase += 2.0 * PI * self.freq / self.sample_rate;

        self.sample_index += 1;
        sample * self.volume * self.click_gain
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_volume(&mut self, v: f32) {
        self.volume = v;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_sample_rate(&mut self, sr: f64) {
        self.sample_rate = sr;
    }
}
