//! Session-aware cycle timing. Pure functions of `(now, market)`.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

use trading_core::calendar;
use trading_core::Market;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Regular,
    PowerHour,
    ClosingBell,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Closed => "CLOSED",
            SessionPhase::Regular => "REGULAR",
            SessionPhase::PowerHour => "POWER_HOUR",
            SessionPhase::ClosingBell => "CLOSING_BELL",
        }
    }
}

pub fn session_phase(market: Market, now: DateTime<Utc>) -> SessionPhase {
    if calendar::in_closing_bell_window(market, now) {
        SessionPhase::ClosingBell
    } else if calendar::is_power_hour(market, now) {
        SessionPhase::PowerHour
    } else if calendar::is_session_open(market, now) {
        SessionPhase::Regular
    } else {
        SessionPhase::Closed
    }
}

fn local_instant(market: Market, now: DateTime<Utc>, time: NaiveTime) -> Option<DateTime<Utc>> {
    let tz = market.timezone();
    let date = now.with_timezone(&tz).date_naive();
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Next instant a cycle should run.
///
/// During the session, fires land on `open + k * interval`, the close
/// included. Outside it, the next fire is the next session open.
pub fn next_fire(now: DateTime<Utc>, market: Market, interval: Duration) -> DateTime<Utc> {
    let interval = if interval < Duration::seconds(1) {
        Duration::minutes(1)
    } else {
        interval
    };

    if !calendar::is_session_open(market, now) {
        return calendar::next_session_open(market, now);
    }

    let (open, close) = calendar::session_hours(market);
    let (Some(open), Some(close)) = (
        local_instant(market, now, open),
        local_instant(market, now, close),
    ) else {
        return now + interval;
    };

    let steps = (now - open).num_seconds() / interval.num_seconds() + 1;
    let candidate = open + Duration::seconds(steps * interval.num_seconds());
    if candidate > close {
        calendar::next_session_open(market, now)
    } else {
        candidate
    }
}

/// How long to sleep until [`next_fire`].
pub fn delay_until_next(now: DateTime<Utc>, market: Market, interval: Duration) -> std::time::Duration {
    (next_fire(now, market, interval) - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
}

/// Deadline of the next scheduled cycle. Only [`CycleTimer::rearm`] moves
/// it, so other wakeups of the main loop do not push the cycle back.
#[derive(Debug)]
pub struct CycleTimer {
    market: Market,
    interval: Duration,
    deadline: tokio::time::Instant,
}

impl CycleTimer {
    pub fn new(market: Market, interval: Duration, now: DateTime<Utc>) -> Self {
        let mut timer = Self {
            market,
            interval,
            deadline: tokio::time::Instant::now(),
        };
        timer.rearm(now);
        timer
    }

    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    /// Schedule the fire after `now`; call once per cycle that ran.
    pub fn rearm(&mut self, now: DateTime<Utc>) -> std::time::Duration {
        let delay = delay_until_next(now, self.market, self.interval);
        self.deadline = tokio::time::Instant::now() + delay;
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_next_fire_aligns_to_session_open() {
        let five = Duration::minutes(5);
        // 2024-07-01 is a Monday; 09:32 EDT
        assert_eq!(next_fire(utc(2024, 7, 1, 13, 32), Market::Us, five), utc(2024, 7, 1, 13, 35));
        // Exactly at the open
        assert_eq!(next_fire(utc(2024, 7, 1, 13, 30), Market::Us, five), utc(2024, 7, 1, 13, 35));
        // 09:07 KST
        assert_eq!(next_fire(utc(2024, 3, 4, 0, 7), Market::Kr, five), utc(2024, 3, 4, 0, 10));
    }

    #[test]
    fn test_next_fire_allows_close_then_skips_to_next_open() {
        let five = Duration::minutes(5);
        // 15:58 EDT fires at the 16:00 close
        assert_eq!(next_fire(utc(2024, 7, 1, 19, 58), Market::Us, five), utc(2024, 7, 1, 20, 0));
        // After the close, Tuesday's open
        assert_eq!(next_fire(utc(2024, 7, 1, 20, 1), Market::Us, five), utc(2024, 7, 2, 13, 30));
        // Saturday skips to Monday
        assert_eq!(next_fire(utc(2024, 7, 6, 15, 0), Market::Us, five), utc(2024, 7, 8, 13, 30));
    }

    #[test]
    fn test_interval_overrunning_close() {
        // 15:10 KST with a 30 minute interval: 15:30 close is still allowed
        let thirty = Duration::minutes(30);
        assert_eq!(next_fire(utc(2024, 3, 4, 6, 10), Market::Kr, thirty), utc(2024, 3, 4, 6, 30));
        // 15:30 KST exactly: next slot 16:00 is past the close
        assert_eq!(next_fire(utc(2024, 3, 4, 6, 30), Market::Kr, thirty), utc(2024, 3, 5, 0, 0));
    }

    #[test]
    fn test_session_phase() {
        assert_eq!(session_phase(Market::Kr, utc(2024, 3, 4, 1, 0)), SessionPhase::Regular);
        assert_eq!(session_phase(Market::Kr, utc(2024, 3, 4, 6, 10)), SessionPhase::PowerHour);
        assert_eq!(session_phase(Market::Kr, utc(2024, 3, 4, 6, 25)), SessionPhase::ClosingBell);
        assert_eq!(session_phase(Market::Kr, utc(2024, 3, 4, 10, 0)), SessionPhase::Closed);
        assert_eq!(session_phase(Market::Us, utc(2024, 7, 6, 15, 0)).as_str(), "CLOSED");
    }

    #[test]
    fn test_delay_is_positive() {
        let delay = delay_until_next(utc(2024, 7, 1, 13, 32), Market::Us, Duration::minutes(5));
        assert_eq!(delay, std::time::Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_deadline_survives_other_wakeups() {
        let mut timer = CycleTimer::new(Market::Us, Duration::minutes(5), utc(2024, 7, 1, 13, 32));
        let deadline = timer.deadline();
        assert_eq!(deadline - tokio::time::Instant::now(), std::time::Duration::from_secs(180));

        // An evolution tick a minute in leaves the pending cycle where it was
        tokio::time::advance(std::time::Duration::from_secs(60)).await;
        assert_eq!(timer.deadline(), deadline);

        tokio::time::sleep_until(timer.deadline()).await;
        assert!(tokio::time::Instant::now() >= deadline);

        let delay = timer.rearm(utc(2024, 7, 1, 13, 35));
        assert_eq!(delay, std::time::Duration::from_secs(300));
        assert!(timer.deadline() - deadline >= delay);
    }
}
