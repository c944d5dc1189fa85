use std::collections::VecDeque;
use tokio::time::Duration;

use super::timer::Timer;
use crate::protocol::{key_down, key_up, ButtonCode, KEY_FRAME_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWrite {
    Down(ButtonCode),
    Up(ButtonCode),
}

impl KeyWrite {
    pub fn frame(&self) -> [u8; KEY_FRAME_LEN] {
        match self {
            Self::Down(code) => key_down(*code),
            Self::Up(code) => key_up(*code),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    code: ButtonCode,
    released: bool,
}

// One code in flight at a time. The session writes what this hands out,
// and only while Connected.
#[derive(Debug)]
pub struct Dispatcher {
    queue: VecDeque<ButtonCode>,
    in_flight: Option<InFlight>,
    timer: Timer,
    key_delay: Duration,
}

impl Dispatcher {
    pub fn new(key_delay: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            timer: Timer::default(),
            key_delay,
        }
    }

    pub fn enqueue(&mut self, codes: impl IntoIterator<Item = ButtonCode>) {
        self.queue.extend(codes);
    }

    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn kick(&mut self) -> Option<KeyWrite> {
        if self.in_flight.is_some() {
            return None;
        }
        self.start_next()
    }

    pub fn on_timer(&mut self) -> Option<KeyWrite> {
        self.timer.cancel();
        match self.in_flight {
            Some(InFlight {
                code,
                released: false,
            }) => {
                self.in_flight = Some(InFlight {
                    code,
                    released: true,
                });
                self.timer.arm(self.key_delay);
                Some(KeyWrite::Up(code))
            }
            Some(InFlight { released: true, .. }) => {
                self.in_flight = None;
                self.start_next()
            }
            None => None,
        }
    }

    pub fn clear(&mut self) -> usize {
        self.timer.cancel();
        let dropped = self.pending();
        self.queue.clear();
        self.in_flight = None;
        dropped
    }

    fn start_next(&mut self) -> Option<KeyWrite> {
        let code = self.queue.pop_front()?;
        self.in_flight = Some(InFlight {
            code,
            released: false,
        });
        self.timer.arm(self.key_delay);
        Some(KeyWrite::Down(code))
    }
}
