//! Tracked universe: which stocks belong to which sector, and which NSE
//! sectoral indices map onto our sector labels.

use std::collections::HashSet;

/// Sector → constituent NSE symbols. A symbol may appear under several
/// sectors; the first listing decides the sector recorded with its rows.
pub const SECTOR_STOCKS: &[(&str, &[&str])] = &[
    ("Bank Nifty", &["HDFCBANK", "ICICIBANK", "SBIN", "KOTAKBANK", "AXISBANK", "INDUSINDBK"]),
    ("PSU Bank", &["SBIN", "PNB", "BANKBARODA", "CANBK", "UNIONBANK", "INDIANB"]),
    ("Private Bank", &["HDFCBANK", "ICICIBANK", "KOTAKBANK", "AXISBANK", "FEDERALBNK", "IDFCFIRSTB"]),
    ("IT", &["TCS", "INFY", "HCLTECH", "WIPRO", "TECHM", "LTIM"]),
    ("Pharma", &["SUNPHARMA", "DRREDDY", "CIPLA", "DIVISLAB", "LUPIN", "AUROPHARMA"]),
    ("Auto", &["MARUTI", "M&M", "TATAMOTORS", "BAJAJ-AUTO", "EICHERMOT", "HEROMOTOCO"]),
    ("Metal", &["TATASTEEL", "JSWSTEEL", "HINDALCO", "VEDL", "SAIL", "NMDC"]),
    ("Energy", &["RELIANCE", "ONGC", "NTPC", "POWERGRID", "BPCL", "IOC"]),
    ("FMCG", &["HINDUNILVR", "ITC", "NESTLEIND", "BRITANNIA", "DABUR", "MARICO"]),
    ("Realty", &["DLF", "GODREJPROP", "OBEROIRLTY", "PRESTIGE", "PHOENIXLTD"]),
    ("Financial Services", &["BAJFINANCE", "BAJAJFINSV", "HDFCLIFE", "SBILIFE", "CHOLAFIN"]),
    ("Consumer Durables", &["TITAN", "HAVELLS", "VOLTAS", "DIXON", "CROMPTON"]),
    ("Infrastructure", &["LT", "ADANIPORTS", "ULTRACEMCO", "GRASIM", "BHARTIARTL"]),
];

/// NSE all-indices name → our sector label.
pub const NSE_SECTOR_INDICES: &[(&str, &str)] = &[
    ("NIFTY BANK", "Bank Nifty"),
    ("NIFTY IT", "IT"),
    ("NIFTY PHARMA", "Pharma"),
    ("NIFTY AUTO", "Auto"),
    ("NIFTY METAL", "Metal"),
    ("NIFTY ENERGY", "Energy"),
    ("NIFTY FMCG", "FMCG"),
    ("NIFTY REALTY", "Realty"),
    ("NIFTY FIN SERVICE", "Financial Services"),
    ("NIFTY PVT BANK", "Private Bank"),
    ("NIFTY PSU BANK", "PSU Bank"),
    ("NIFTY CONSUMPTION", "Consumer Durables"),
    ("NIFTY INFRASTRUCTURE", "Infrastructure"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedStock {
    pub symbol: String,
    pub sector: String,
}

/// Every tracked symbol once, in listing order, with its first sector.
pub fn tracked_stocks() -> Vec<TrackedStock> {
    let mut seen = HashSet::new();
    SECTOR_STOCKS
        .iter()
        .flat_map(|(sector, symbols)| symbols.iter().map(move |s| (*sector, *s)))
        .filter(|(_, symbol)| seen.insert(*symbol))
        .map(|(sector, symbol)| TrackedStock {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
        })
        .collect()
}

/// Constituents of a sector, matched case-insensitively.
pub fn stocks_for_sector(sector: &str) -> Option<&'static [&'static str]> {
    SECTOR_STOCKS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(sector.trim()))
        .map(|(_, symbols)| *symbols)
}

pub fn sector_for_index(index: &str) -> Option<&'static str> {
    NSE_SECTOR_INDICES
        .iter()
        .find(|(nse, _)| *nse == index)
        .map(|(_, sector)| *sector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_stocks_are_unique_and_keep_first_sector() {
        let stocks = tracked_stocks();
        let unique: HashSet<_> = stocks.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(unique.len(), stocks.len());

        let sbin = stocks.iter().find(|s| s.symbol == "SBIN").unwrap();
        assert_eq!(sbin.sector, "Bank Nifty");
    }

    #[test]
    fn sector_lookup_is_case_insensitive() {
        assert!(stocks_for_sector("psu bank").unwrap().contains(&"PNB"));
        assert!(stocks_for_sector("Unknown").is_none());
        assert_eq!(sector_for_index("NIFTY FIN SERVICE"), Some("Financial Services"));
        assert_eq!(sector_for_index("NIFTY 50"), None);
    }
}
