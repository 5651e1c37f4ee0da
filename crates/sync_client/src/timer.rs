use std::time::Duration;

use shared::protocol::PushMessage;

pub const TICK: Duration = Duration::from_secs(1);

/// Countdown mirrored from `timer_*` push messages and ticked locally between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerState {
    pub remaining: u32,
    pub running: bool,
}

impl TimerState {
    /// Folds a push message into the countdown. Returns `true` if anything changed.
    pub fn apply(&mut self, message: &PushMessage) -> bool {
        let next = match message {
            PushMessage::TimerStart { seconds } => TimerState {
                remaining: *seconds,
                running: *seconds > 0,
            },
            PushMessage::TimerUpdate { seconds } => TimerState {
                remaining: *seconds,
                running: self.running && *seconds > 0,
            },
            PushMessage::TimerStop {} => TimerState {
                remaining: 0,
                running: false,
            },
            _ => return false,
        };
        let changed = next != *self;
        *self = next;
        changed
    }

    /// Advances one second. Returns `true` when this tick reached zero.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.running = false;
            return true;
        }
        false
    }

    /// `mm:ss`.
    pub fn display(&self) -> String {
        format!("{:02}:{:02}", self.remaining / 60, self.remaining % 60)
    }
}
