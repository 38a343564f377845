//! Session calendar for the supported markets. Everything here is a pure
//! function of a UTC instant so it can be tested without clocks.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};

use crate::types::Market;

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Regular session bounds in exchange-local time.
pub fn session_hours(market: Market) -> (NaiveTime, NaiveTime) {
    match market {
        Market::Kr => (hm(9, 0), hm(15, 30)),
        Market::Us => (hm(9, 30), hm(16, 0)),
    }
}

fn local_minutes(market: Market, now: DateTime<Utc>) -> (Weekday, NaiveTime) {
    let local = now.with_timezone(&market.timezone());
    (local.weekday(), local.time())
}

pub fn is_trading_day(market: Market, now: DateTime<Utc>) -> bool {
    let (weekday, _) = local_minutes(market, now);
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// True during the regular session on a weekday.
pub fn is_session_open(market: Market, now: DateTime<Utc>) -> bool {
    if !is_trading_day(market, now) {
        return false;
    }
    let (_, time) = local_minutes(market, now);
    let (open, close) = session_hours(market);
    time >= open && time <= close
}

/// Final stretch of the session where closing momentum is traded.
pub fn is_power_hour(market: Market, now: DateTime<Utc>) -> bool {
    if !is_trading_day(market, now) {
        return false;
    }
    let (_, time) = local_minutes(market, now);
    let (start, end) = match market {
        Market::Kr => (hm(15, 0), hm(15, 20)),
        Market::Us => (hm(15, 0), hm(15, 50)),
    };
    time >= start && time < end
}

/// Window around the close where the regime is refreshed on every cycle.
pub fn in_closing_bell_window(market: Market, now: DateTime<Utc>) -> bool {
    if !is_trading_day(market, now) {
        return false;
    }
    let (_, time) = local_minutes(market, now);
    let (start, end) = match market {
        Market::Kr => (hm(15, 20), hm(15, 50)),
        Market::Us => (hm(15, 50), hm(16, 20)),
    };
    time >= start && time < end
}

/// Next regular session open strictly after `now` (or `now`'s own session if
/// it has not opened yet).
pub fn next_session_open(market: Market, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = market.timezone();
    let local = now.with_timezone(&tz);
    let (open, _) = session_hours(market);

    for offset in 0..8 {
        let date = local.date_naive() + Duration::days(offset);
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        let candidate = tz
            .from_local_datetime(&date.and_time(open))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(candidate) = candidate {
            if candidate > now {
                return candidate;
            }
        }
    }
    now + Duration::days(1)
}

/// Local hour and minute, handy for log lines.
pub fn local_clock(market: Market, now: DateTime<Utc>) -> (u32, u32) {
    let local = now.with_timezone(&market.timezone());
    (local.hour(), local.minute())
}
