use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// For each group, the item captured closest to `target`.
///
/// Items more than `tolerance` away are never chosen; exactly `tolerance`
/// away is still accepted. On equal distance the earlier capture wins.
/// Output is ordered by first appearance of each group in `items`.
pub fn nearest_per_group<T, K, FK, FT>(
    items: Vec<T>,
    target: DateTime<Utc>,
    tolerance: Duration,
    key: FK,
    captured_at: FT,
) -> Vec<T>
where
    K: Eq + Hash,
    FK: Fn(&T) -> K,
    FT: Fn(&T) -> DateTime<Utc>,
{
    let mut order: Vec<K> = Vec::new();
    let tolerance_ms = tolerance.num_milliseconds();
    let mut best: HashMap<K, (i64, DateTime<Utc>, T)> = HashMap::new();

    for item in items {
        let at = captured_at(&item);
        let diff = (at - target).num_milliseconds().abs();
        if diff > tolerance_ms {
            continue;
        }

        let k = key(&item);
        let replace = match best.get(&k) {
            None => true,
            Some((best_diff, best_at, _)) => diff < *best_diff || (diff == *best_diff && at < *best_at),
        };
        if replace {
            if !best.contains_key(&k) {
                order.push(key(&item));
            }
            best.insert(k, (diff, at, item));
        }
    }

    order
        .into_iter()
        .filter_map(|k| best.remove(&k).map(|(_, _, item)| item))
        .collect()
}

/// Midpoint of a `[start, end]` window.
pub fn midpoint(start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    start + (end - start) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Snap {
        sector: &'static str,
        at: DateTime<Utc>,
    }

    fn target() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-12T06:40:00Z").unwrap().with_timezone(&Utc)
    }

    fn snap(sector: &'static str, offset_secs: i64) -> Snap {
        Snap { sector, at: target() + Duration::seconds(offset_secs) }
    }

    fn run(items: Vec<Snap>) -> Vec<Snap> {
        nearest_per_group(items, target(), Duration::seconds(150), |s| s.sector, |s| s.at)
    }

    #[test]
    fn candidates_outside_tolerance_are_excluded() {
        let out = run(vec![snap("IT", -180), snap("IT", 240)]);
        assert!(out.is_empty());
    }

    #[test]
    fn closer_snapshot_wins_within_group() {
        let out = run(vec![snap("IT", -120), snap("IT", 60)]);
        assert_eq!(out, vec![snap("IT", 60)]);
    }

    #[test]
    fn boundary_is_inclusive_and_ties_pick_earlier() {
        assert_eq!(run(vec![snap("IT", 150)]), vec![snap("IT", 150)]);
        assert_eq!(run(vec![snap("IT", 30), snap("IT", -30)]), vec![snap("IT", -30)]);
    }

    #[test]
    fn groups_are_independent_and_keep_first_seen_order() {
        let out = run(vec![
            snap("Auto", -60),
            snap("IT", -200),
            snap("IT", 10),
            snap("Auto", 0),
            snap("Pharma", 400),
        ]);
        assert_eq!(out, vec![snap("Auto", 0), snap("IT", 10)]);
    }

    #[test]
    fn midpoint_of_window() {
        let start = target() - Duration::minutes(5);
        let end = target() + Duration::minutes(5);
        assert_eq!(midpoint(start, end), target());
    }
}
