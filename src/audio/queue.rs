// Lock-free SPSC command queue between the control thread and the audio
// thread. Built on rtrb: push and pop are wait-free, fixed capacity, no
// allocation after construction.

use rtrb::{Consumer, Producer, RingBuffer};

use super::EngineCommand;

pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Producer half, owned by the (single) control thread.
pub struct CommandSender {
    producer: Producer<EngineCommand>,
    dropped: u64,
}

impl CommandSender {
    /// Push a command. Returns false (and counts the drop) when the queue is
    /// full; the command is not re-queued and later commands are not
    /// re-ordered around it.
    pub fn push(&mut self, cmd: EngineCommand) -> bool {
        match self.producer.push(cmd) {
            Ok(()) => true,
            Err(_) => {
                self.dropped += 1;
                log::warn!("command queue full, dropped command ({} total)", self.dropped);
                false
            }
        }
    }

    /// Commands rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Consumer half, owned by the audio thread.
pub struct CommandReceiver {
    consumer: Consumer<EngineCommand>,
}

impl CommandReceiver {
    pub fn pop(&mut self) -> Option<EngineCommand> {
        self.consumer.pop().ok()
    }
}

pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    (
        CommandSender {
            producer,
            dropped: 0,
        },
        CommandReceiver { consumer },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{OpType, Quantize};

    fn mute_cmd(loop_idx: usize) -> EngineCommand {
        EngineCommand::ScheduleOp {
            op: OpType::ToggleMute,
            loop_idx,
            quantize: Quantize::Bar,
        }
    }

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = command_channel();
        for i in 0..5 {
            assert!(tx.push(mute_cmd(i)));
        }
        for i in 0..5 {
            assert_eq!(rx.pop(), Some(mute_cmd(i)));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_full_queue_rejects_and_counts() {
        let (mut tx, mut rx) = command_channel();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            assert!(tx.push(mute_cmd(0)));
        }
        assert!(!tx.push(mute_cmd(0)));
        assert!(!tx.push(mute_cmd(0)));
        assert_eq!(tx.dropped(), 2);

        // Draining frees space again
        assert!(rx.pop().is_some());
        assert!(tx.push(mute_cmd(1)));
    }

    #[test]
    fn test_cross_thread_push_pop() {
        let (mut tx, mut rx) = command_channel();
        let writer = std::thread::spawn(move || {
            for i in 0..100 {
                while !tx.push(mute_cmd(i % 8)) {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = 0;
        while received < 100 {
            if rx.pop().is_some() {
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
        assert_eq!(received, 100);
    }
}
