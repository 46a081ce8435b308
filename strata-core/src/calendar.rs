use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};

use crate::database::{ConnectionManager, quote_qualified};
use crate::error::Result;

/// Source of open trading days.
#[async_trait]
pub trait TradingCalendar: Send + Sync {
    /// Open days in `[start, end]`, ascending. Empty when `start > end`.
    async fn trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>>;
}

/// Monday through Friday, minus an explicit holiday set.
#[derive(Debug, Clone, Default)]
pub struct WeekdayCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays<I>(holidays: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_open(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            && !self.holidays.contains(&date)
    }
}

#[async_trait]
impl TradingCalendar for WeekdayCalendar {
    async fn trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_open(*d))
            .collect())
    }
}

/// Reads open days from a calendar table.
///
/// The date column may be `date` or `YYYYMMDD` text and the open flag may
/// be boolean or numeric; both are cast in SQL.
#[derive(Clone)]
pub struct StoreCalendar {
    connections: ConnectionManager,
    table: String,
    date_column: String,
    open_column: String,
    exchange: Option<(String, String)>,
}

impl fmt::Debug for StoreCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCalendar")
            .field("table", &self.table)
            .field("date_column", &self.date_column)
            .field("open_column", &self.open_column)
            .field("exchange", &self.exchange)
            .finish()
    }
}

impl StoreCalendar {
    pub fn new(connections: ConnectionManager) -> Self {
        Self {
            connections,
            table: "trade_cal".to_string(),
            date_column: "cal_date".to_string(),
            open_column: "is_open".to_string(),
            exchange: None,
        }
    }

    pub fn with_table(
        mut self,
        table: impl Into<String>,
        date_column: impl Into<String>,
        open_column: impl Into<String>,
    ) -> Self {
        self.table = table.into();
        self.date_column = date_column.into();
        self.open_column = open_column.into();
        self
    }

    /// Restricts rows to one exchange, e.g. `("exchange", "SSE")`.
    pub fn with_exchange(
        mut self,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.exchange = Some((column.into(), value.into()));
        self
    }

    fn query_sql(&self) -> String {
        let date = quote_qualified(&self.date_column);
        let mut sql = format!(
            "SELECT DISTINCT ({date})::date AS day FROM {table} \
             WHERE ({date})::date BETWEEN $1 AND $2 AND ({open})::int = 1",
            table = quote_qualified(&self.table),
            open = quote_qualified(&self.open_column),
        );
        if let Some((column, _)) = &self.exchange {
            sql.push_str(&format!(" AND {} = $3", quote_qualified(column)));
        }
        sql.push_str(" ORDER BY day");
        sql
    }
}

#[async_trait]
impl TradingCalendar for StoreCalendar {
    async fn trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        if start > end {
            return Ok(Vec::new());
        }
        let pool = self.connections.pool().await?;
        let sql = self.query_sql();
        let mut query = sqlx::query_scalar::<_, NaiveDate>(&sql)
            .bind(start)
            .bind(end);
        if let Some((_, value)) = &self.exchange {
            query = query.bind(value.clone());
        }
        Ok(query.fetch_all(&pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn skips_weekends_and_holidays() {
        let cal = WeekdayCalendar::with_holidays([d(2024, 1, 1)]);
        let days = cal.trading_days(d(2023, 12, 29), d(2024, 1, 8)).await.unwrap();
        assert_eq!(
            days,
            vec![
                d(2023, 12, 29),
                d(2024, 1, 2),
                d(2024, 1, 3),
                d(2024, 1, 4),
                d(2024, 1, 5),
                d(2024, 1, 8),
            ]
        );
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let cal = WeekdayCalendar::new();
        assert!(
            cal.trading_days(d(2024, 1, 5), d(2024, 1, 2))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn store_query_quotes_identifiers() {
        let cal = StoreCalendar::new(ConnectionManager::new(
            crate::database::PoolSettings::new("postgres://localhost/test"),
        ))
        .with_exchange("exchange", "SSE");
        let sql = cal.query_sql();
        assert!(sql.contains(r#"FROM "trade_cal""#));
        assert!(sql.contains(r#"("is_open")::int = 1"#));
        assert!(sql.contains(r#""exchange" = $3"#));
    }
}
