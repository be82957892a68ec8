use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{EventKind, ReferenceLevel, ThresholdEvent};

/// Result of comparing a live price against a prior session's range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub kind: EventKind,
    /// The level that was crossed (high for breakouts, low for breakdowns).
    pub level: f64,
    /// Always non-negative.
    pub deviation_pct: f64,
}

/// Classify `price` against `high`/`low`.
///
/// Returns `None` when the price sits inside the range, or when any input is
/// zero, negative or non-finite. A zero reference must never be divided by.
pub fn classify(price: f64, high: f64, low: f64) -> Option<Crossing> {
    if !is_positive(price) || !is_positive(high) || !is_positive(low) {
        return None;
    }

    if price > high {
        Some(Crossing {
            kind: EventKind::Breakout,
            level: high,
            deviation_pct: (price - high) / high * 100.0,
        })
    } else if price < low {
        Some(Crossing {
            kind: EventKind::Breakdown,
            level: low,
            deviation_pct: (low - price) / low * 100.0,
        })
    } else {
        None
    }
}

/// Evaluate a reference level for the session `today`.
///
/// `prior_session` is the trading day the caller expects the reference to
/// belong to; a reference tagged with any other day is refused.
pub fn evaluate(
    price: f64,
    reference: &ReferenceLevel,
    prior_session: NaiveDate,
    today: NaiveDate,
    detected_at: DateTime<Utc>,
) -> Option<ThresholdEvent> {
    if reference.trading_day != prior_session || reference.trading_day >= today {
        return None;
    }

    let crossing = classify(price, reference.high, reference.low)?;
    Some(ThresholdEvent {
        kind: crossing.kind,
        symbol: reference.symbol.clone(),
        sector: reference.sector.clone(),
        trading_day: today,
        reference_day: reference.trading_day,
        detected_at,
        last_price: price,
        reference_level: crossing.level,
        deviation_pct: crossing.deviation_pct,
    })
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}
