use signalsmith_stretch::Stretch;

/// Pitch-preserving time stretcher for mono loop audio.
///
/// Thin wrapper around signalsmith-stretch: the ratio of input to output
/// sample counts passed to [`process`](Self::process) determines the stretch.
/// More input than output speeds up, less input slows down; pitch is
/// preserved either way. Uses the cheaper preset for lower CPU and latency.
pub struct TimeStretcher {
    stretch: Option<Stretch>,
}

impl TimeStretcher {
    pub fn new() -> Self {
        Self { stretch: None }
    }

    pub fn configure(&mut self, sample_rate: f64) {
        self.stretch = Some(Stretch::preset_cheaper(1, sample_rate as u32));
    }

    pub fn is_configured(&self) -> bool {
        self.stretch.is_some()
    }

    /// Feed `input` and fill `output`. A no-op (silence) when unconfigured.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        match self.stretch.as_mut() {
            Some(stretch) => stretch.process(input, output),
            None => output.fill(0.0),
        }
    }

    /// Drop internal state. Call when the input stream is discontinuous
    /// (stretch activation, position jumps).
    pub fn reset(&mut self) {
        if let Some(stretch) = self.stretch.as_mut() {
            stretch.reset();
        }
    }
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_outputs_silence() {
        let mut stretcher = TimeStretcher::new();
        assert!(!stretcher.is_configured());

        let input = vec![0.5; 256];
        let mut output = vec![1.0; 256];
        stretcher.process(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_configured_processes() {
        let mut stretcher = TimeStretcher::new();
        stretcher.configure(48000.0);
        assert!(stretcher.is_configured());

        // Half-tempo: 256 input samples produce 512 output samples
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let mut output = vec![0.0; 512];
        stretcher.process(&input, &mut output);
        stretcher.reset();
    }
}
