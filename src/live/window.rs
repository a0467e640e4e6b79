//! Rolling candle window for a live session.

use std::collections::VecDeque;

use crate::domain::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUpdate {
    Appended,
    /// Same open time as the newest candle; the newest was replaced.
    Replaced,
    /// Older than the newest candle; dropped.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
    forming: Option<Candle>,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
            forming: None,
        }
    }

    /// Seed from history, keeping the newest `capacity` candles.
    pub fn with_history(capacity: usize, history: impl IntoIterator<Item = Candle>) -> Self {
        let mut window = Self::new(capacity);
        for candle in history {
            window.push_closed(candle);
        }
        window
    }

    pub fn push_closed(&mut self, candle: Candle) -> WindowUpdate {
        let update = match self.candles.back() {
            Some(last) if candle.open_time < last.open_time => return WindowUpdate::Ignored,
            Some(last) if candle.open_time == last.open_time => {
                if let Some(last) = self.candles.back_mut() {
                    *last = candle;
                }
                WindowUpdate::Replaced
            }
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.capacity {
                    self.candles.pop_front();
                }
                WindowUpdate::Appended
            }
        };

        if let (Some(forming), Some(last)) = (&self.forming, self.candles.back())
            && forming.open_time <= last.open_time
        {
            self.forming = None;
        }
        update
    }

    /// Track the still-open candle. Returns `false` for stale updates.
    pub fn update_forming(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.candles.back()
            && candle.open_time <= last.open_time
        {
            return false;
        }
        self.forming = Some(candle);
        true
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn forming(&self) -> Option<&Candle> {
        self.forming.as_ref()
    }

    /// Closed candles, oldest first.
    pub fn closed(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// Closed candles followed by the forming candle, if any.
    pub fn with_forming(&self) -> Vec<Candle> {
        self.candles
            .iter()
            .chain(self.forming.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(minute: i64, close: f64) -> Candle {
        let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            close_time: open_time + Duration::minutes(1) - Duration::milliseconds(1),
        }
    }

    #[test]
    fn evicts_beyond_capacity() {
        let mut window = CandleWindow::new(3);
        for i in 0..5 {
            assert_eq!(window.push_closed(candle(i, i as f64)), WindowUpdate::Appended);
        }
        assert_eq!(window.len(), 3);
        let closes: Vec<f64> = window.closed().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn repeated_open_time_replaces_last() {
        let mut window = CandleWindow::new(10);
        window.push_closed(candle(0, 1.0));
        window.push_closed(candle(1, 2.0));
        assert_eq!(window.push_closed(candle(1, 2.5)), WindowUpdate::Replaced);
        assert_eq!(window.len(), 2);
        assert_eq!(window.last().map(|c| c.close), Some(2.5));
    }

    #[test]
    fn older_candle_ignored() {
        let mut window = CandleWindow::new(10);
        window.push_closed(candle(0, 1.0));
        window.push_closed(candle(1, 2.0));
        assert_eq!(window.push_closed(candle(0, 9.0)), WindowUpdate::Ignored);
        assert_eq!(window.closed()[0].close, 1.0);
    }

    #[test]
    fn forming_candle_tracked_until_closed() {
        let mut window = CandleWindow::with_history(10, vec![candle(0, 1.0)]);
        assert!(window.update_forming(candle(1, 1.5)));
        assert_eq!(window.with_forming().len(), 2);

        assert!(!window.update_forming(candle(0, 7.0)));

        window.push_closed(candle(1, 1.8));
        assert!(window.forming().is_none());
        assert_eq!(window.with_forming().len(), 2);
    }

    #[test]
    fn history_trimmed_to_capacity() {
        let history: Vec<Candle> = (0..150).map(|i| candle(i, i as f64)).collect();
        let window = CandleWindow::with_history(100, history);
        assert_eq!(window.len(), 100);
        assert_eq!(window.closed()[0].close, 50.0);
    }
}
