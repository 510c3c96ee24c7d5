use super::metronome::Quantize;

/// Which mute operation is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteOp {
    Mute,
    Unmute,
    Toggle,
}

/// Which overdub operation is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverdubOp {
    Start,
    Stop,
}

/// Which classic-record operation is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoDirection {
    Undo,
    Redo,
}

/// A pending operation waiting for its quantization boundary.
#[derive(Debug, Clone, Copy)]
pub struct PendingTimedOp {
    pub execute_sample: i64,
    pub quantize: Quantize,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingMute {
    pub execute_sample: i64,
    pub quantize: Quantize,
    pub op: MuteOp,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingOverdub {
    pub execute_sample: i64,
    pub quantize: Quantize,
    pub op: OverdubOp,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingRecord {
    pub execute_sample: i64,
    pub quantize: Quantize,
    pub op: RecordOp,
}

/// Pending undo/redo; repeats in the same direction accumulate a count,
/// switching direction replaces.
#[derive(Debug, Clone, Copy)]
pub struct PendingUndo {
    pub execute_sample: i64,
    pub quantize: Quantize,
    pub direction: UndoDirection,
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingSpeed {
    pub execute_sample: i64,
    pub quantize: Quantize,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingCapture {
    pub execute_sample: i64,
    pub quantize: Quantize,
    pub lookback_samples: i64,
}

/// All pending state for a single loop, organized as independent slots.
/// Within a slot only one operation can be pending (last write wins); a
/// pending op in one slot never displaces an op in another.
#[derive(Debug, Default)]
pub struct PendingState {
    pub capture: Option<PendingCapture>,
    pub record: Option<PendingRecord>,
    pub mute: Option<PendingMute>,
    pub overdub: Option<PendingOverdub>,
    pub reverse: Option<PendingTimedOp>,
    pub speed: Option<PendingSpeed>,
    pub undo: Option<PendingUndo>,
    pub clear: Option<PendingTimedOp>,
}

impl PendingState {
    pub fn has_any(&self) -> bool {
        self.capture.is_some()
            || self.record.is_some()
            || self.mute.is_some()
            || self.overdub.is_some()
            || self.reverse.is_some()
            || self.speed.is_some()
            || self.undo.is_some()
            || self.clear.is_some()
    }

    pub fn clear_all(&mut self) {
        self.capture = None;
        self.record = None;
        self.mute = None;
        self.overdub = None;
        self.reverse = None;
        self.speed = None;
        self.undo = None;
        self.clear = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_independent() {
        let mut ps = PendingState::default();
        assert!(!ps.has_any());

        ps.mute = Some(PendingMute {
            execute_sample: 100,
            quantize: Quantize::Bar,
            op: MuteOp::Toggle,
        });
        ps.reverse = Some(PendingTimedOp {
            execute_sample: 200,
            quantize: Quantize::Bar,
        });
        assert!(ps.has_any());
        assert!(ps.mute.is_some());
        assert!(ps.reverse.is_some());

        // Overwriting the mute slot leaves reverse untouched
        ps.mute = Some(PendingMute {
            execute_sample: 300,
            quantize: Quantize::Beat,
            op: MuteOp::Mute,
        });
        assert_eq!(ps.mute.unwrap().execute_sample, 300);
        assert_eq!(ps.reverse.unwrap().execute_sample, 200);

        ps.clear_all();
        assert!(!ps.has_any());
    }
}
