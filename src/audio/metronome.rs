/// Quantization boundary for scheduled operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantize {
    /// No quantization, execute immediately
    Free,
    /// Snap to the next beat boundary
    Beat,
    /// Snap to the next bar boundary
    Bar,
}

impl Default for Quantize {
    fn default() -> Self {
        Quantize::Bar
    }
}

impl Quantize {
    pub fn label(&self) -> &'static str {
        match self {
            Quantize::Free => "free",
            Quantize::Beat => "beat",
            Quantize::Bar => "bar",
        }
    }
}

/// Position within the metronome's timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetronomePosition {
    /// Total samples elapsed since start
    pub total_samples: i64,
    /// Current bar (0-indexed)
    pub bar: i64,
    /// Current beat within the bar (0-indexed)
    pub beat: u32,
    /// Fractional position within the current beat, [0, 1)
    pub beat_fraction: f64,
}

impl MetronomePosition {
    pub fn absolute_beat(&self, beats_per_bar: u32) -> i64 {
        self.bar * beats_per_bar as i64 + self.beat as i64
    }
}

/// Sample-accurate tempo clock, advanced one sample at a time from the audio
/// thread.
///
/// The boundary of beat `b` sits at `round(b * samples_per_beat)` relative to
/// the current tempo segment. Tempo changes rebase the segment anchor so the
/// fractional beat position is preserved across `set_bpm`.
pub struct Metronome {
    bpm: f64,
    beats_per_bar: u32,
    sample_rate: f64,
    running: bool,
    samples_per_beat: f64,
    samples_per_bar: f64,
    total_samples: i64,
    /// Sample index at which the current tempo segment began
    origin_sample: i64,
    /// Beat position (whole + fraction) at `origin_sample`
    origin_beats: f64,
}

impl Metronome {
    pub fn new(bpm: f64, beats_per_bar: u32, sample_rate: f64) -> Self {
        let mut m = Self {
            bpm: bpm.clamp(1.0, 999.0),
            beats_per_bar: beats_per_bar.clamp(1, 16),
            sample_rate,
            running: true,
            samples_per_beat: 0.0,
            samples_per_bar: 0.0,
            total_samples: 0,
            origin_sample: 0,
            origin_beats: 0.0,
        };
        m.recalculate();
        m
    }

    fn recalculate(&mut self) {
        self.samples_per_beat = (60.0 / self.bpm) * self.sample_rate;
        self.samples_per_bar = self.samples_per_beat * self.beats_per_bar as f64;
    }

    /// Continuous beat position at an arbitrary sample index.
    fn total_beats_at(&self, sample: i64) -> f64 {
        self.origin_beats + (sample - self.origin_sample) as f64 / self.samples_per_beat
    }

    /// Sample index of the boundary of (absolute) beat `b`.
    fn beat_boundary_sample(&self, b: i64) -> i64 {
        self.origin_sample + ((b as f64 - self.origin_beats) * self.samples_per_beat).round() as i64
    }

    fn position_at_beat(&self, b: i64) -> MetronomePosition {
        MetronomePosition {
            total_samples: self.beat_boundary_sample(b),
            bar: b.div_euclid(self.beats_per_bar as i64),
            beat: b.rem_euclid(self.beats_per_bar as i64) as u32,
            beat_fraction: 0.0,
        }
    }

    pub fn position(&self) -> MetronomePosition {
        let total_beats = self.total_beats_at(self.total_samples);
        let whole = total_beats.floor();
        let whole_beat = whole as i64;
        MetronomePosition {
            total_samples: self.total_samples,
            bar: whole_beat.div_euclid(self.beats_per_bar as i64),
            beat: whole_beat.rem_euclid(self.beats_per_bar as i64) as u32,
            beat_fraction: total_beats - whole,
        }
    }

    /// Advance by `num_samples`, invoking `on_boundary` for every beat
    /// boundary crossed. The callback receives the position *at* the
    /// boundary and whether the boundary starts a new bar.
    pub fn advance(&mut self, num_samples: i64, mut on_boundary: impl FnMut(&MetronomePosition, bool)) {
        if !self.running || num_samples <= 0 {
            return;
        }

        let start = self.total_samples;
        let end = start + num_samples;

        let mut b = self.total_beats_at(start).floor() as i64 + 1;
        loop {
            let boundary = self.beat_boundary_sample(b);
            if boundary > end {
                break;
            }
            if boundary > start {
                let pos = self.position_at_beat(b);
                let is_bar = b.rem_euclid(self.beats_per_bar as i64) == 0;
                on_boundary(&pos, is_bar);
            }
            b += 1;
        }

        self.total_samples = end;
    }

    /// Sample index of the next beat boundary, strictly after the current
    /// sample.
    pub fn next_beat_sample(&self) -> i64 {
        let mut b = self.total_beats_at(self.total_samples).floor() as i64 + 1;
        let mut s = self.beat_boundary_sample(b);
        while s <= self.total_samples {
            b += 1;
            s = self.beat_boundary_sample(b);
        }
        s
    }

    /// Sample index of the next bar boundary, strictly after the current
    /// sample.
    pub fn next_bar_sample(&self) -> i64 {
        let bpb = self.beats_per_bar as i64;
        let cur_beats = self.total_beats_at(self.total_samples);
        let mut bar = (cur_beats / self.beats_per_bar as f64).floor() as i64 + 1;
        let mut s = self.beat_boundary_sample(bar * bpb);
        while s <= self.total_samples {
            bar += 1;
            s = self.beat_boundary_sample(bar * bpb);
        }
        s
    }

    /// Samples remaining until the next quantization boundary. Zero for
    /// `Free`, strictly positive otherwise.
    pub fn samples_until_boundary(&self, q: Quantize) -> i64 {
        match q {
            Quantize::Free => 0,
            Quantize::Beat => self.next_beat_sample() - self.total_samples,
            Quantize::Bar => self.next_bar_sample() - self.total_samples,
        }
    }

    pub fn samples_per_beat(&self) -> f64 {
        self.samples_per_beat
    }

    pub fn samples_per_bar(&self) -> f64 {
        self.samples_per_bar
    }

    /// Change tempo, preserving the fractional position within the current
    /// beat.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.origin_beats = self.total_beats_at(self.total_samples);
        self.origin_sample = self.total_samples;
        self.bpm = bpm.clamp(1.0, 999.0);
        self.recalculate();
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_beats_per_bar(&mut self, beats: u32) {
        self.beats_per_bar = beats.clamp(1, 16);
        self.recalculate();
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn set_sample_rate(&mut self, rate: f64) {
        self.origin_beats = self.total_beats_at(self.total_samples);
        self.origin_sample = self.total_samples;
        self.sample_rate = rate;
        self.recalculate();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, run: bool) {
        self.running = run;
    }

    pub fn reset(&mut self) {
        self.total_samples = 0;
        self.origin_sample = 0;
        self.origin_beats = 0.0;
    }
}
