//! IST market clock: trading day, session gate and capture bucketing.
//!
//! Every job gets `now` passed in rather than reading the wall clock itself,
//! so the gate and the bucketing can be tested against fixed instants.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};

use crate::config::market_hours::{CLOSE_MINUTE, IST_OFFSET_SECS, OPEN_MINUTE};

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).expect("IST offset is within ±24h")
}

/// IST calendar date of `now`. This is the trading day a capture belongs to.
pub fn trading_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&ist()).date_naive()
}

/// True between 09:15 and 15:30 IST (inclusive) on weekdays.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&ist());
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minute = local.hour() * 60 + local.minute();
    (OPEN_MINUTE..=CLOSE_MINUTE).contains(&minute)
}

/// Today's trading day once its session has closed, `None` before the close
/// and at weekends. An undated end-of-day quote only describes today's session
/// inside this window.
pub fn closed_session(now: DateTime<Utc>) -> Option<NaiveDate> {
    let local = now.with_timezone(&ist());
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return None;
    }
    let minute = local.hour() * 60 + local.minute();
    (minute > CLOSE_MINUTE).then(|| local.date_naive())
}

/// Floor `now` to a `minutes`-wide boundary with seconds zeroed.
pub fn bucket(now: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    let step = i64::from(minutes.max(1)) * 60;
    let secs = now.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(step), 0).unwrap_or(now)
}

/// UTC instant of `time` IST on `day`.
pub fn at_ist(day: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = day.and_time(time);
    match ist().from_local_datetime(&naive).single() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

/// IST midnight at the start of `day`, in UTC.
pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    at_ist(day, NaiveTime::MIN)
}

/// Session open and close of `day`, in UTC.
pub fn session_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let open = NaiveTime::from_hms_opt(OPEN_MINUTE / 60, OPEN_MINUTE % 60, 0).unwrap_or(NaiveTime::MIN);
    let close = NaiveTime::from_hms_opt(CLOSE_MINUTE / 60, CLOSE_MINUTE % 60, 0).unwrap_or(NaiveTime::MIN);
    (at_ist(day, open), at_ist(day, close))
}
