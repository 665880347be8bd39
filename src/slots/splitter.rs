//! Week-long sub-queries for multi-week slot requests

use chrono::Duration;

use crate::core::types::SlotQuery;

const WEEK_DAYS: i64 = 7;

/// Split a query into contiguous sub-queries spanning at most seven days
///
/// The first sub-query runs from `date_from` to `date_from + 7`, each later
/// one starts the day after the previous end. Every sub-query is capped at
/// `date_to`, and splitting stops once an uncapped end reaches `date_to`.
pub fn split_into_week_long_requests(query: &SlotQuery) -> Vec<SlotQuery> {
    let week = Duration::days(WEEK_DAYS);
    let mut requests = Vec::new();
    let mut week_start = query.date_from;

    loop {
        let week_end = week_start + week;
        let from = if week_start == query.date_from {
            query.date_from
        } else {
            week_start + Duration::days(1)
        };
        let to = week_end.min(query.date_to);

        requests.push(query.with_range(from, to));

        week_start = week_end;
        if week_end >= query.date_to {
            break;
        }
    }

    requests
}
