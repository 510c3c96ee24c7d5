use super::MidiSink;

/// MIDI real-time status bytes.
pub const CLOCK_TICK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP: u8 = 0xFC;

/// Pulses per quarter note for MIDI clock.
pub const PPQN: u32 = 24;

/// Generates 24 PPQN MIDI clock bytes in sync with the metronome's tempo.
/// Bytes go to a caller-supplied sink, keeping the engine independent of any
/// MIDI framework.
pub struct MidiClock {
    bpm: f64,
    sample_rate: f64,
    samples_per_tick: f64,
    sample_in_tick: f64,
    enabled: bool,
    sink: Option<MidiSink>,
}

impl MidiClock {
    pub fn new(bpm: f64, sample_rate: f64) -> Self {
        let mut clock = Self {
            bpm,
            sample_rate,
            samples_per_tick: 0.0,
            sample_in_tick: 0.0,
            enabled: false,
            sink: None,
        };
        clock.recalculate();
        clock
    }

    fn recalculate(&mut self) {
        let samples_per_beat = (60.0 / self.bpm) * self.sample_rate;
        self.samples_per_tick = samples_per_beat / PPQN as f64;
    }

    /// Advance by `num_samples`, emitting clock ticks as tick boundaries are
    /// crossed.
    pub fn advance(&mut self, num_samples: i64) {
        if !self.enabled || num_samples <= 0 {
            return;
        }

        for _ in 0..num_samples {
            self.sample_in_tick += 1.0;
            if self.sample_in_tick >= self.samples_per_tick {
                self.sample_in_tick -= self.samples_per_tick;
                self.send(CLOCK_TICK);
            }
        }
    }

    /// Change tempo, preserving the fractional position within the current
    /// tick.
    pub fn set_bpm(&mut self, bpm: f64) {
        let fraction = if self.samples_per_tick > 0.0 {
            self.sample_in_tick / self.samples_per_tick
        } else {
            0.0
        };
        self.bpm = bpm.clamp(1.0, 999.0);
        self.recalculate();
        self.sample_in_tick = fraction * self.samples_per_tick;
    }

    pub fn set_sample_rate(&mut self, rate: f64) {
        let fraction = if self.samples_per_tick > 0.0 {
            self.sample_in_tick / self.samples_per_tick
        } else {
            0.0
        };
        self.sample_rate = rate;
        self.recalculate();
        self.sample_in_tick = fraction * self.samples_per_tick;
    }

    /// Enabling sends Start (0xFA) and begins clock ticks from a zeroed
    /// phase; disabling sends Stop (0xFC).
    pub fn set_enabled(&mut self, on: bool) {
        if on == self.enabled {
            return;
        }
        self.enabled = on;
        if on {
            self.sample_in_tick = 0.0;
            self.send(START);
        } else {
            self.send(STOP);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_sink(&mut self, sink: MidiSink) {
        self.sink = Some(sink);
    }

    pub fn has_output(&self) -> bool {
        self.sink.is_some()
    }

    fn send(&mut self, byte: u8) {
        if let Some(sink) = self.sink.as_mut() {
            sink(byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_clock(bpm: f64, sample_rate: f64) -> (MidiClock, Arc<Mutex<Vec<u8>>>) {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink_bytes = Arc::clone(&bytes);
        let mut clock = MidiClock::new(bpm, sample_rate);
        clock.set_sink(Box::new(move |b| {
            if let Ok(mut v) = sink_bytes.lock() {
                v.push(b);
            }
        }));
        (clock, bytes)
    }

    #[test]
    fn test_start_and_stop_bytes() {
        let (mut clock, bytes) = collecting_clock(120.0, 48000.0);
        clock.set_enabled(true);
        clock.set_enabled(true); // no-op, no duplicate start
        clock.set_enabled(false);
        assert_eq!(*bytes.lock().unwrap(), vec![START, STOP]);
    }

    #[test]
    fn test_24_ticks_per_beat() {
        let (mut clock, bytes) = collecting_clock(120.0, 48000.0);
        clock.set_enabled(true);
        // One beat at 120 BPM / 48 kHz = 24000 samples
        clock.advance(24000);
        let ticks = bytes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&b| b == CLOCK_TICK)
            .count();
        assert_eq!(ticks, 24);
    }

    #[test]
    fn test_disabled_emits_nothing() {
        let (mut clock, bytes) = collecting_clock(120.0, 48000.0);
        clock.advance(48000);
        assert!(bytes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_set_bpm_preserves_tick_phase() {
        let (mut clock, bytes) = collecting_clock(120.0, 48000.0);
        clock.set_enabled(true);
        // Half a tick in (samples_per_tick = 1000)
        clock.advance(500);
        clock.set_bpm(60.0);
        // New samples_per_tick = 2000, fraction preserved at 0.5 so the next
        // tick is 1000 samples away
        clock.advance(999);
        let before = bytes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&b| b == CLOCK_TICK)
            .count();
        clock.advance(1);
        let after = bytes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&b| b == CLOCK_TICK)
            .count();
        assert_eq!(before, 0);
        assert_eq!(after, 1);
    }
}
