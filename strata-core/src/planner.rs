use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use strata_model::BatchDescriptor;

use crate::calendar::TradingCalendar;
use crate::error::Result;

/// How a date range is cut into batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Windows of N trading days. Single-entity queries return far fewer
    /// rows per day, so they get the larger `entity_window`.
    TradingDays {
        market_window: usize,
        entity_window: usize,
        /// Filter key whose presence marks a single-entity query.
        #[serde(default)]
        entity_param: Option<String>,
    },
    /// Fixed windows of calendar days, for data keyed by announcement
    /// date rather than trading date.
    NaturalDays { window_days: u32 },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        SplitStrategy::TradingDays {
            market_window: 1,
            entity_window: 240,
            entity_param: Some("ts_code".to_string()),
        }
    }
}

impl SplitStrategy {
    /// Window size in trading days for the given filters.
    fn trading_window(&self, filters: &BTreeMap<String, String>) -> usize {
        match self {
            SplitStrategy::TradingDays {
                market_window,
                entity_window,
                entity_param,
            } => {
                let single_entity = entity_param.as_ref().is_some_and(|key| {
                    filters.get(key).is_some_and(|v| !v.trim().is_empty())
                });
                if single_entity {
                    *entity_window
                } else {
                    *market_window
                }
            }
            SplitStrategy::NaturalDays { .. } => 0,
        }
    }
}

/// Turns a date range into ordered, contiguous, non-overlapping batches.
#[derive(Clone)]
pub struct BatchPlanner {
    calendar: Arc<dyn TradingCalendar>,
}

impl fmt::Debug for BatchPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPlanner").finish_non_exhaustive()
    }
}

impl BatchPlanner {
    pub fn new(calendar: Arc<dyn TradingCalendar>) -> Self {
        Self { calendar }
    }

    /// Every batch carries `filters` verbatim; only the dates differ.
    pub async fn plan(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        filters: &BTreeMap<String, String>,
        strategy: &SplitStrategy,
    ) -> Result<Vec<BatchDescriptor>> {
        if start > end {
            return Ok(Vec::new());
        }
        match strategy {
            SplitStrategy::TradingDays { .. } => {
                let days = self.calendar.trading_days(start, end).await?;
                if days.is_empty() {
                    return Ok(Vec::new());
                }
                let window = strategy.trading_window(filters);
                let mut batches = split_trading_days(&days, window, filters);
                if batches.is_empty() {
                    batches.push(BatchDescriptor::new(start, end, filters.clone()));
                }
                Ok(batches)
            }
            SplitStrategy::NaturalDays { window_days } => {
                let mut batches =
                    split_natural_days(start, end, *window_days, filters);
                if batches.is_empty() {
                    batches.push(BatchDescriptor::new(start, end, filters.clone()));
                }
                Ok(batches)
            }
        }
    }
}

fn split_trading_days(
    days: &[NaiveDate],
    window: usize,
    filters: &BTreeMap<String, String>,
) -> Vec<BatchDescriptor> {
    if window == 0 {
        return Vec::new();
    }
    days.chunks(window)
        .filter_map(|chunk| {
            let (first, last) = (chunk.first()?, chunk.last()?);
            Some(BatchDescriptor::new(*first, *last, filters.clone()))
        })
        .collect()
}

fn split_natural_days(
    start: NaiveDate,
    end: NaiveDate,
    window_days: u32,
    filters: &BTreeMap<String, String>,
) -> Vec<BatchDescriptor> {
    if window_days == 0 {
        return Vec::new();
    }
    let span = Days::new(u64::from(window_days - 1));
    let mut batches = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let batch_end = cursor
            .checked_add_days(span)
            .map_or(end, |d| d.min(end));
        batches.push(BatchDescriptor::new(cursor, batch_end, filters.clone()));
        match batch_end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::WeekdayCalendar;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn planner() -> BatchPlanner {
        BatchPlanner::new(Arc::new(WeekdayCalendar::new()))
    }

    fn trading(market: usize, entity: usize) -> SplitStrategy {
        SplitStrategy::TradingDays {
            market_window: market,
            entity_window: entity,
            entity_param: Some("ts_code".into()),
        }
    }

    #[tokio::test]
    async fn trading_batches_are_contiguous_and_complete() {
        let (start, end) = (d(2024, 1, 1), d(2024, 3, 31));
        let batches = planner()
            .plan(start, end, &BTreeMap::new(), &trading(7, 100))
            .await
            .unwrap();

        let calendar = WeekdayCalendar::new();
        let all_days = calendar.trading_days(start, end).await.unwrap();
        let mut covered = Vec::new();
        for pair in batches.windows(2) {
            assert!(pair[0].end < pair[1].start);
            let gap = calendar
                .trading_days(pair[0].end.succ_opt().unwrap(), pair[1].start.pred_opt().unwrap())
                .await
                .unwrap();
            assert!(gap.is_empty(), "trading days skipped between batches");
        }
        for batch in &batches {
            covered.extend(
                calendar.trading_days(batch.start, batch.end).await.unwrap(),
            );
            assert!(
                calendar.trading_days(batch.start, batch.end).await.unwrap().len() <= 7
            );
        }
        assert_eq!(covered, all_days);
    }

    #[tokio::test]
    async fn entity_filter_selects_larger_window() {
        let mut filters = BTreeMap::new();
        filters.insert("ts_code".to_string(), "000001.SZ".to_string());
        let batches = planner()
            .plan(d(2024, 1, 1), d(2024, 1, 31), &filters, &trading(1, 240))
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].filters, filters);
        assert_eq!((batches[0].start, batches[0].end), (d(2024, 1, 1), d(2024, 1, 31)));
    }

    #[tokio::test]
    async fn no_trading_days_means_no_batches() {
        let batches = planner()
            .plan(d(2024, 1, 6), d(2024, 1, 7), &BTreeMap::new(), &trading(1, 1))
            .await
            .unwrap();
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn single_trading_day_is_one_batch() {
        let batches = planner()
            .plan(d(2024, 1, 2), d(2024, 1, 2), &BTreeMap::new(), &trading(5, 5))
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_single_day());
    }

    #[tokio::test]
    async fn natural_windows_cover_range() {
        let batches = planner()
            .plan(
                d(2024, 1, 1),
                d(2024, 3, 15),
                &BTreeMap::new(),
                &SplitStrategy::NaturalDays { window_days: 30 },
            )
            .await
            .unwrap();
        let spans: Vec<_> = batches.iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(
            spans,
            vec![
                (d(2024, 1, 1), d(2024, 1, 30)),
                (d(2024, 1, 31), d(2024, 2, 29)),
                (d(2024, 3, 1), d(2024, 3, 15)),
            ]
        );
    }

    #[tokio::test]
    async fn zero_window_falls_back_to_whole_range() {
        let batches = planner()
            .plan(
                d(2024, 1, 1),
                d(2024, 1, 10),
                &BTreeMap::new(),
                &SplitStrategy::NaturalDays { window_days: 0 },
            )
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!((batches[0].start, batches[0].end), (d(2024, 1, 1), d(2024, 1, 10)));

        let batches = planner()
            .plan(d(2024, 1, 1), d(2024, 1, 10), &BTreeMap::new(), &trading(0, 0))
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn strategy_deserializes_from_toml() {
        let s: SplitStrategy = toml::from_str(
            "kind = \"trading_days\"\nmarket_window = 1\nentity_window = 240\nentity_param = \"ts_code\"\n",
        )
        .unwrap();
        assert_eq!(s, trading(1, 240));
    }
}
