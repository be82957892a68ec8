use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;

use crate::db::models::{
    parse_day, PcrRow, ReferenceLevelRow, SectorSnapshotRow, SessionOpenRow, StockSnapshotRow,
    ThresholdEventRow, TokenRow, DAY_FORMAT,
};
use crate::error::Result;
use crate::types::{
    EventKind, PcrRecord, PriceSnapshot, ReferenceLevel, SectorSnapshot, SessionOpen, StoredToken,
    ThresholdEvent,
};

fn day_str(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// ` AND symbol IN (?, ?, ..)`; `symbols` must be non-empty.
fn push_symbols<'a>(qb: &mut QueryBuilder<'a, Sqlite>, symbols: &'a [String]) {
    qb.push(" AND symbol IN (");
    let mut list = qb.separated(", ");
    for symbol in symbols {
        list.push_bind(symbol.as_str());
    }
    list.push_unseparated(")");
}

/// Rows removed by an intraday purge, per table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PurgeCounts {
    pub stock_snapshots: u64,
    pub sector_snapshots: u64,
    pub pcr_records: u64,
    pub threshold_events: u64,
}

/// SQLite-backed persistence for every snapshot table.
/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // -----------------------------------------------------------------------
    // Stock & sector snapshots
    // -----------------------------------------------------------------------

    /// Insert-or-ignore on `(symbol, captured_at)`. Returns rows actually inserted.
    pub async fn insert_stock_snapshots(&self, rows: &[PriceSnapshot]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for s in rows {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO stock_snapshots
                    (symbol, sector, captured_at, open, high, low, close, last_price, source)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&s.symbol)
            .bind(&s.sector)
            .bind(s.captured_at.timestamp_millis())
            .bind(s.open)
            .bind(s.high)
            .bind(s.low)
            .bind(s.close)
            .bind(s.last_price)
            .bind(&s.source)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Insert-or-ignore on `(sector_name, captured_at)`.
    pub async fn insert_sector_snapshots(&self, rows: &[SectorSnapshot]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for s in rows {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO sector_snapshots
                    (sector_name, captured_at, last_price, open_price, previous_close, change_percent, variation)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&s.sector_name)
            .bind(s.captured_at.timestamp_millis())
            .bind(s.last_price)
            .bind(s.open_price)
            .bind(s.previous_close)
            .bind(s.change_percent)
            .bind(s.variation)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn sector_snapshots_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SectorSnapshot>> {
        let rows = sqlx::query_as::<_, SectorSnapshotRow>(
            r#"
            SELECT sector_name, captured_at, last_price, open_price, previous_close, change_percent, variation
            FROM sector_snapshots
            WHERE captured_at >= ? AND captured_at <= ?
            ORDER BY captured_at ASC, id ASC
            "#,
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SectorSnapshot::from).collect())
    }

    pub async fn stock_snapshots_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sector: Option<&str>,
    ) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query_as::<_, StockSnapshotRow>(
            r#"
            SELECT symbol, sector, captured_at, open, high, low, close, last_price, source
            FROM stock_snapshots
            WHERE captured_at >= ? AND captured_at <= ?
              AND (? IS NULL OR sector = ?)
            ORDER BY captured_at ASC, id ASC
            "#,
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .bind(sector)
        .bind(sector)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PriceSnapshot::from).collect())
    }

    /// Most recent snapshot per requested symbol captured at or after `since`,
    /// ordered by symbol.
    pub async fn latest_stock_snapshots(
        &self,
        symbols: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT s.symbol, s.sector, s.captured_at, s.open, s.high, s.low, s.close,
                   s.last_price, s.source
            FROM stock_snapshots s
            JOIN (
                SELECT symbol, MAX(captured_at) AS latest
                FROM stock_snapshots
                WHERE captured_at >= "#,
        );
        qb.push_bind(since.timestamp_millis());
        push_symbols(&mut qb, symbols);
        qb.push(
            r#"
                GROUP BY symbol
            ) m ON s.symbol = m.symbol AND s.captured_at = m.latest
            ORDER BY s.symbol ASC
            "#,
        );
        let rows = qb.build_query_as::<StockSnapshotRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(PriceSnapshot::from).collect())
    }

    // -----------------------------------------------------------------------
    // Reference levels & session opens
    // -----------------------------------------------------------------------

    /// Append-only: a row for an existing `(symbol, trading_day)` is ignored,
    /// never merged into the stored one.
    pub async fn insert_reference_levels(&self, rows: &[ReferenceLevel]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for r in rows {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO reference_levels
                    (symbol, trading_day, sector, open, high, low, close, source, captured_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.symbol)
            .bind(day_str(r.trading_day))
            .bind(&r.sector)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.close)
            .bind(&r.source)
            .bind(r.captured_at.timestamp_millis())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Latest session with reference levels strictly before `day`.
    pub async fn prior_session(&self, day: NaiveDate) -> Result<Option<NaiveDate>> {
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(trading_day) FROM reference_levels WHERE trading_day < ?")
                .bind(day_str(day))
                .fetch_one(&self.pool)
                .await?;
        max.as_deref().map(parse_day).transpose()
    }

    pub async fn latest_reference_day(&self) -> Result<Option<NaiveDate>> {
        let max: Option<String> = sqlx::query_scalar("SELECT MAX(trading_day) FROM reference_levels")
            .fetch_one(&self.pool)
            .await?;
        max.as_deref().map(parse_day).transpose()
    }

    pub async fn reference_levels_for(
        &self,
        day: NaiveDate,
        symbol: Option<&str>,
    ) -> Result<Vec<ReferenceLevel>> {
        let rows = sqlx::query_as::<_, ReferenceLevelRow>(
            r#"
            SELECT symbol, trading_day, sector, open, high, low, close, source, captured_at
            FROM reference_levels
            WHERE trading_day = ? AND (? IS NULL OR symbol = ?)
            ORDER BY symbol ASC
            "#,
        )
        .bind(day_str(day))
        .bind(symbol)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ReferenceLevel::try_from).collect()
    }

    /// Newest stored session per requested symbol, ordered by symbol.
    pub async fn latest_reference_levels(&self, symbols: &[String]) -> Result<Vec<ReferenceLevel>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT r.symbol, r.trading_day, r.sector, r.open, r.high, r.low, r.close,
                   r.source, r.captured_at
            FROM reference_levels r
            JOIN (
                SELECT symbol, MAX(trading_day) AS latest
                FROM reference_levels
                WHERE 1 = 1"#,
        );
        push_symbols(&mut qb, symbols);
        qb.push(
            r#"
                GROUP BY symbol
            ) m ON r.symbol = m.symbol AND r.trading_day = m.latest
            ORDER BY r.symbol ASC
            "#,
        );
        let rows = qb.build_query_as::<ReferenceLevelRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(ReferenceLevel::try_from).collect()
    }

    /// Returns false when the session already has an open for this symbol.
    pub async fn insert_session_open(&self, open: &SessionOpen) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO session_opens (symbol, trading_day, open, captured_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&open.symbol)
        .bind(day_str(open.trading_day))
        .bind(open.open)
        .bind(open.captured_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn session_opens_for(&self, day: NaiveDate) -> Result<Vec<SessionOpen>> {
        let rows = sqlx::query_as::<_, SessionOpenRow>(
            "SELECT symbol, trading_day, open, captured_at FROM session_opens WHERE trading_day = ?",
        )
        .bind(day_str(day))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionOpen::try_from).collect()
    }

    // -----------------------------------------------------------------------
    // Threshold events
    // -----------------------------------------------------------------------

    /// Atomically swap `day`'s detections for this cycle's set. Other days are untouched.
    pub async fn replace_threshold_events(
        &self,
        day: NaiveDate,
        events: &[ThresholdEvent],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM threshold_events WHERE trading_day = ?")
            .bind(day_str(day))
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        for e in events.iter().filter(|e| e.trading_day == day) {
            inserted += sqlx::query(
                r#"
                INSERT OR REPLACE INTO threshold_events
                    (kind, symbol, sector, trading_day, reference_day, detected_at,
                     last_price, reference_level, deviation_pct)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(e.kind.to_string())
            .bind(&e.symbol)
            .bind(&e.sector)
            .bind(day_str(e.trading_day))
            .bind(day_str(e.reference_day))
            .bind(e.detected_at.timestamp_millis())
            .bind(e.last_price)
            .bind(e.reference_level)
            .bind(e.deviation_pct)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Largest deviation first.
    pub async fn threshold_events(&self, day: NaiveDate, kind: EventKind) -> Result<Vec<ThresholdEvent>> {
        let rows = sqlx::query_as::<_, ThresholdEventRow>(
            r#"
            SELECT kind, symbol, sector, trading_day, reference_day, detected_at,
                   last_price, reference_level, deviation_pct
            FROM threshold_events
            WHERE trading_day = ? AND kind = ?
            ORDER BY deviation_pct DESC, symbol ASC
            "#,
        )
        .bind(day_str(day))
        .bind(kind.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ThresholdEvent::try_from).collect()
    }

    // -----------------------------------------------------------------------
    // PCR
    // -----------------------------------------------------------------------

    /// Returns false if a record for `(index_name, captured_at)` already exists.
    pub async fn insert_pcr(&self, r: &PcrRecord) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO pcr_records
                (index_name, captured_at, total_put_oi, total_call_oi, pcr_value,
                 sentiment, spot_price, atm_strike, strikes_used)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&r.index_name)
        .bind(r.captured_at.timestamp_millis())
        .bind(r.total_put_oi)
        .bind(r.total_call_oi)
        .bind(r.pcr_value)
        .bind(r.sentiment.to_string())
        .bind(r.spot_price)
        .bind(r.atm_strike)
        .bind(r.strikes_used)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Records for one index from `start`, optionally capped at `end`, oldest first.
    pub async fn pcr_between(
        &self,
        index_name: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PcrRecord>> {
        let rows = sqlx::query_as::<_, PcrRow>(
            r#"
            SELECT index_name, captured_at, total_put_oi, total_call_oi, pcr_value,
                   sentiment, spot_price, atm_strike, strikes_used
            FROM pcr_records
            WHERE index_name = ? AND captured_at >= ? AND (? IS NULL OR captured_at <= ?)
            ORDER BY captured_at ASC
            "#,
        )
        .bind(index_name)
        .bind(start.timestamp_millis())
        .bind(end.map(|e| e.timestamp_millis()))
        .bind(end.map(|e| e.timestamp_millis()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PcrRecord::try_from).collect()
    }

    pub async fn latest_pcr(&self, index_name: &str) -> Result<Option<PcrRecord>> {
        let row = sqlx::query_as::<_, PcrRow>(
            r#"
            SELECT index_name, captured_at, total_put_oi, total_call_oi, pcr_value,
                   sentiment, spot_price, atm_strike, strikes_used
            FROM pcr_records
            WHERE index_name = ?
            ORDER BY captured_at DESC
            LIMIT 1
            "#,
        )
        .bind(index_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PcrRecord::try_from).transpose()
    }

    // -----------------------------------------------------------------------
    // Tokens
    // -----------------------------------------------------------------------

    pub async fn load_token(&self, id: &str) -> Result<Option<StoredToken>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token, expiry, created_at FROM api_tokens WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredToken::from))
    }

    pub async fn save_token(&self, t: &StoredToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_tokens (id, token, expiry, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                token = excluded.token,
                expiry = excluded.expiry,
                created_at = excluded.created_at
            "#,
        )
        .bind(&t.id)
        .bind(&t.token)
        .bind(t.expiry.map(|e| e.to_rfc3339()))
        .bind(t.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Drop intraday rows captured before `cutoff` and detections from sessions before `day`.
    pub async fn purge_intraday_before(
        &self,
        cutoff: DateTime<Utc>,
        day: NaiveDate,
    ) -> Result<PurgeCounts> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let stock_snapshots = sqlx::query("DELETE FROM stock_snapshots WHERE captured_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let sector_snapshots = sqlx::query("DELETE FROM sector_snapshots WHERE captured_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let pcr_records = sqlx::query("DELETE FROM pcr_records WHERE captured_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let threshold_events = sqlx::query("DELETE FROM threshold_events WHERE trading_day < ?")
            .bind(day_str(day))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(PurgeCounts {
            stock_snapshots,
            sector_snapshots,
            pcr_records,
            threshold_events,
        })
    }

    /// Returns `(reference_levels, session_opens)` removed.
    pub async fn prune_reference_before(&self, day: NaiveDate) -> Result<(u64, u64)> {
        let levels = sqlx::query("DELETE FROM reference_levels WHERE trading_day < ?")
            .bind(day_str(day))
            .execute(&self.pool)
            .await?
            .rows_affected();
        let opens = sqlx::query("DELETE FROM session_opens WHERE trading_day < ?")
            .bind(day_str(day))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok((levels, opens))
    }
}
