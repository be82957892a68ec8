use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::PCR_STRIKE_WINDOW;
use crate::types::{PcrRecord, Sentiment};

/// Open interest on both sides of one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrikeOi {
    pub call_oi: i64,
    pub put_oi: i64,
}

/// Option chain for a single expiry. Strikes are stored as integer keys,
/// `(strike * 100).round() as u64`, so the map is sorted without float keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionChain {
    strikes: BTreeMap<u64, StrikeOi>,
}

impl OptionChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn key(strike: f64) -> u64 {
        (strike * 100.0).round() as u64
    }

    #[inline]
    fn key_to_strike(key: u64) -> f64 {
        key as f64 / 100.0
    }

    /// Non-positive or non-finite strikes are dropped. A repeated strike replaces the earlier entry.
    pub fn insert(&mut self, strike: f64, oi: StrikeOi) {
        if strike.is_finite() && strike > 0.0 {
            self.strikes.insert(Self::key(strike), oi);
        }
    }

    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, strike: f64) -> Option<StrikeOi> {
        self.strikes.get(&Self::key(strike)).copied()
    }

    /// Strikes in ascending order.
    pub fn strikes(&self) -> impl Iterator<Item = f64> + '_ {
        self.strikes.keys().map(|&k| Self::key_to_strike(k))
    }
}

impl FromIterator<(f64, StrikeOi)> for OptionChain {
    fn from_iter<I: IntoIterator<Item = (f64, StrikeOi)>>(iter: I) -> Self {
        let mut chain = OptionChain::new();
        for (strike, oi) in iter {
            chain.insert(strike, oi);
        }
        chain
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcrSummary {
    pub spot: f64,
    pub atm_strike: f64,
    /// Strikes included in the sums, ascending.
    pub window: Vec<f64>,
    pub total_put_oi: i64,
    pub total_call_oi: i64,
    pub pcr: f64,
    pub sentiment: Sentiment,
}

impl PcrSummary {
    pub fn strikes_used(&self) -> usize {
        self.window.len()
    }

    pub fn into_record(self, index_name: &str, captured_at: DateTime<Utc>) -> PcrRecord {
        PcrRecord {
            index_name: index_name.to_string(),
            captured_at,
            total_put_oi: self.total_put_oi,
            total_call_oi: self.total_call_oi,
            pcr_value: self.pcr,
            sentiment: self.sentiment,
            spot_price: self.spot,
            atm_strike: self.atm_strike,
            strikes_used: self.strikes_used() as i64,
        }
    }
}

/// Position and value of the strike nearest `spot`. On a tie the lower strike wins.
fn nearest(chain: &OptionChain, spot: f64) -> Option<(usize, u64)> {
    let mut best: Option<(usize, u64, f64)> = None;
    for (idx, &key) in chain.strikes.keys().enumerate() {
        let diff = (OptionChain::key_to_strike(key) - spot).abs();
        match best {
            Some((_, _, best_diff)) if diff >= best_diff => {}
            _ => best = Some((idx, key, diff)),
        }
    }
    best.map(|(idx, key, _)| (idx, key))
}

/// ATM ±`PCR_STRIKE_WINDOW` put/call ratio.
///
/// `None` for an empty chain or a spot that is not a positive number.
pub fn aggregate(chain: &OptionChain, spot: f64) -> Option<PcrSummary> {
    if !spot.is_finite() || spot <= 0.0 {
        return None;
    }
    let (atm_idx, atm_key) = nearest(chain, spot)?;

    let start = atm_idx.saturating_sub(PCR_STRIKE_WINDOW);
    let end = (atm_idx + PCR_STRIKE_WINDOW).min(chain.len() - 1);

    let mut window = Vec::with_capacity(end - start + 1);
    let mut total_put_oi = 0i64;
    let mut total_call_oi = 0i64;
    for (&key, oi) in chain.strikes.iter().skip(start).take(end - start + 1) {
        window.push(OptionChain::key_to_strike(key));
        total_put_oi += oi.put_oi.max(0);
        total_call_oi += oi.call_oi.max(0);
    }

    let pcr = if total_call_oi > 0 {
        total_put_oi as f64 / total_call_oi as f64
    } else {
        0.0
    };

    Some(PcrSummary {
        spot,
        atm_strike: OptionChain::key_to_strike(atm_key),
        window,
        total_put_oi,
        total_call_oi,
        pcr,
        sentiment: Sentiment::from_pcr(pcr),
    })
}
