use std::collections::{BTreeSet, VecDeque};

use crate::protocol::{ExpectedStatePacket, Frame};

/// Distinct valid frames received since the last confirmation.
#[derive(Debug, Default)]
pub struct ReceiveWindow {
    frames: BTreeSet<Frame>,
}

impl ReceiveWindow {
    pub fn insert(&mut self, frame: Frame) {
        self.frames.insert(frame);
    }

    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_send_count: u32,
    pub min_receive_count: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_send_count: 20,
            min_receive_count: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    command: Frame,
    expected: Option<ExpectedStatePacket>,
    attempts: u32,
    matched: u32,
}

impl QueueItem {
    pub fn new(command: Frame, expected: Option<ExpectedStatePacket>) -> Self {
        Self {
            command,
            expected,
            attempts: 0,
            matched: 0,
        }
    }

    pub fn command(&self) -> &Frame {
        &self.command
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Final state of a command leaving the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    Confirmed { command: Frame, attempts: u32 },
    Exhausted { command: Frame, attempts: u32 },
    Unconfirmed { command: Frame, attempts: u32 },
}

impl QueueOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            QueueOutcome::Confirmed { .. } => "confirmed",
            QueueOutcome::Exhausted { .. } => "exhausted",
            QueueOutcome::Unconfirmed { .. } => "unconfirmed",
        }
    }
}

/// Frame to put on the bus for this tick, plus the outcome if the command is done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub frame: Frame,
    pub outcome: Option<QueueOutcome>,
}

/// FIFO of commands awaiting acknowledgement. Only the head is ever transmitted; it stays
/// in flight until confirmed or out of attempts.
#[derive(Debug, Default)]
pub struct CommandQueue {
    settings: QueueSettings,
    pending: VecDeque<QueueItem>,
    in_flight: Option<QueueItem>,
}

impl CommandQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn push(&mut self, item: QueueItem) {
        self.pending.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> Option<&QueueItem> {
        self.in_flight.as_ref()
    }

    /// Transmits the head once and evaluates it against the receive window. Matching frames
    /// clear the window.
    pub fn tick(&mut self, window: &mut ReceiveWindow) -> Option<Transmission> {
        let mut item = self.in_flight.take().or_else(|| self.pending.pop_front())?;
        item.attempts += 1;

        let frame = item.command;
        let attempts = item.attempts;

        let outcome = match &item.expected {
            None => (attempts >= self.settings.max_send_count).then_some(QueueOutcome::Unconfirmed {
                command: frame,
                attempts,
            }),
            Some(expected) => {
                for received in window.snapshot() {
                    if expected.matches(&received) {
                        item.matched += 1;
                        tracing::debug!("Command {} acknowledged by {}", frame, received);
                        window.clear();
                    }
                }

                if item.matched >= self.settings.min_receive_count {
                    Some(QueueOutcome::Confirmed {
                        command: frame,
                        attempts,
                    })
                } else if attempts >= self.settings.max_send_count {
                    Some(QueueOutcome::Exhausted {
                        command: frame,
                        attempts,
                    })
                } else {
                    None
                }
            }
        };

        if outcome.is_none() {
            self.in_flight = Some(item);
        }

        Some(Transmission { frame, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SchemaRegistry;

    fn item(command: &str) -> QueueItem {
        let registry = SchemaRegistry::bundled().unwrap();
        let frame = Frame::from_hex(command).unwrap();
        QueueItem::new(frame, ExpectedStatePacket::predict(&registry, &frame))
    }

    fn frame(hex: &str) -> Frame {
        Frame::seal_hex(hex).unwrap()
    }

    #[test]
    fn empty_queue_transmits_nothing() {
        let mut queue = CommandQueue::default();
        assert_eq!(queue.tick(&mut ReceiveWindow::default()), None);
    }

    #[test]
    fn confirmed_on_first_tick_when_ack_already_received() {
        let mut queue = CommandQueue::new(QueueSettings::default());
        let mut window = ReceiveWindow::default();
        queue.push(item("3101010000000033"));
        window.insert(frame("B0010100000000"));
        window.insert(frame("9080800000000000"));

        let transmission = queue.tick(&mut window).unwrap();

        assert_eq!(transmission.frame.to_string(), "3101010000000033");
        assert!(matches!(
            transmission.outcome,
            Some(QueueOutcome::Confirmed { attempts: 1, .. })
        ));
        assert!(window.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn retransmits_until_acknowledged() {
        let mut queue = CommandQueue::new(QueueSettings::default());
        let mut window = ReceiveWindow::default();
        queue.push(item("3101010000000033"));

        for _ in 0..3 {
            let transmission = queue.tick(&mut window).unwrap();
            assert_eq!(transmission.outcome, None);
        }
        assert_eq!(queue.in_flight().unwrap().attempts(), 3);

        window.insert(frame("B0010100000000"));
        let transmission = queue.tick(&mut window).unwrap();

        assert!(matches!(
            transmission.outcome,
            Some(QueueOutcome::Confirmed { attempts: 4, .. })
        ));
    }

    #[test]
    fn unrelated_frames_do_not_confirm_and_stay_in_window() {
        let mut queue = CommandQueue::new(QueueSettings::default());
        let mut window = ReceiveWindow::default();
        queue.push(item("3101010000000033"));
        window.insert(frame("B0010200000000"));

        let transmission = queue.tick(&mut window).unwrap();

        assert_eq!(transmission.outcome, None);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn exhausted_after_max_send_count() {
        let settings = QueueSettings {
            max_send_count: 3,
            min_receive_count: 1,
        };
        let mut queue = CommandQueue::new(settings);
        let mut window = ReceiveWindow::default();
        queue.push(item("3101010000000033"));

        let outcomes: Vec<_> = (0..3).filter_map(|_| queue.tick(&mut window)).map(|t| t.outcome).collect();

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(
            outcomes[2],
            Some(QueueOutcome::Exhausted { attempts: 3, .. })
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn commands_without_confirmation_are_sent_max_send_count_times() {
        let settings = QueueSettings {
            max_send_count: 4,
            min_receive_count: 1,
        };
        let mut queue = CommandQueue::new(settings);
        let mut window = ReceiveWindow::default();
        queue.push(item("A0010101081500C0"));

        let mut sent = 0;
        while let Some(transmission) = queue.tick(&mut window) {
            sent += 1;
            if let Some(outcome) = transmission.outcome {
                assert_eq!(outcome.label(), "unconfirmed");
            }
        }

        assert_eq!(sent, 4);
    }

    #[test]
    fn head_of_line_is_served_first() {
        let mut queue = CommandQueue::new(QueueSettings::default());
        let mut window = ReceiveWindow::default();
        queue.push(item("3101010000000033"));
        queue.push(item("780101040000007E"));

        assert_eq!(queue.tick(&mut window).unwrap().frame.to_string(), "3101010000000033");
        assert_eq!(queue.tick(&mut window).unwrap().frame.to_string(), "3101010000000033");

        window.insert(frame("B0010100000000"));
        queue.tick(&mut window);

        assert_eq!(queue.tick(&mut window).unwrap().frame.to_string(), "780101040000007E");
    }

    #[test]
    fn min_receive_count_requires_several_acknowledgements() {
        let settings = QueueSettings {
            max_send_count: 20,
            min_receive_count: 2,
        };
        let mut queue = CommandQueue::new(settings);
        let mut window = ReceiveWindow::default();
        queue.push(item("3101010000000033"));

        window.insert(frame("B0010100000000"));
        assert_eq!(queue.tick(&mut window).unwrap().outcome, None);
        assert!(window.is_empty());

        window.insert(frame("B0010100000000"));
        assert!(matches!(
            queue.tick(&mut window).unwrap().outcome,
            Some(QueueOutcome::Confirmed { attempts: 2, .. })
        ));
    }
}
