use tokio::time::Duration;

use crate::protocol::ButtonCode;
use crate::session::timer::Timer;

pub const DEFAULT_MAX_DIGITS: usize = 3;

// A selection completes at `max_digits` (never more than three) or when the
// debounce timer fires first.
#[derive(Debug)]
pub struct DigitAggregator {
    buffer: Vec<ButtonCode>,
    timer: Timer,
    debounce: Duration,
    max_digits: usize,
    confirm: Option<ButtonCode>,
}

impl DigitAggregator {
    pub fn new(debounce: Duration, max_digits: usize, confirm: Option<ButtonCode>) -> Self {
        let max_digits = max_digits.clamp(1, DEFAULT_MAX_DIGITS);
        Self {
            buffer: Vec::with_capacity(max_digits),
            timer: Timer::default(),
            debounce,
            max_digits,
            confirm,
        }
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn buffered(&self) -> &[ButtonCode] {
        &self.buffer
    }

    pub fn press(&mut self, digit: ButtonCode) -> Option<Vec<ButtonCode>> {
        self.timer.cancel();
        self.buffer.push(digit);
        if self.buffer.len() >= self.max_digits {
            return self.flush();
        }
        self.timer.arm(self.debounce);
        None
    }

    pub fn on_timer(&mut self) -> Option<Vec<ButtonCode>> {
        self.flush()
    }

    pub fn cancel(&mut self) -> usize {
        self.timer.cancel();
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }

    fn flush(&mut self) -> Option<Vec<ButtonCode>> {
        self.timer.cancel();
        if self.buffer.is_empty() {
            return None;
        }
        let mut codes = std::mem::take(&mut self.buffer);
        codes.extend(self.confirm);
        Some(codes)
    }
}

pub fn channel_number(codes: &[ButtonCode]) -> String {
    codes
        .iter()
        .filter_map(ButtonCode::digit_value)
        .map(|d| char::from(b'0' + d))
        .collect()
}
