//! Metric to query mapping
//!
//! Every metric resolves to a fixed SQL statement built once at startup.
//! Runs only bind the `start`, `end` and `width` query parameters.

use std::collections::HashMap;

use crate::models::MetricId;

/// Aggregation for one metric over a source table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub table: &'static str,
    /// Per-bucket aggregate expression
    pub aggregate: &'static str,
}

impl MetricQuery {
    /// Default aggregation for a metric
    pub fn for_metric(metric: MetricId) -> Self {
        match metric {
            MetricId::ActiveUsers => Self {
                table: "feed_actions",
                aggregate: "uniqExact(user_id)",
            },
            MetricId::Views => Self {
                table: "feed_actions",
                aggregate: "countIf(user_id, action = 'view')",
            },
            MetricId::Likes => Self {
                table: "feed_actions",
                aggregate: "countIf(user_id, action = 'like')",
            },
            MetricId::Ctr => Self {
                table: "feed_actions",
                aggregate: "if(countIf(action = 'view') = 0, 0, countIf(action = 'like') / countIf(action = 'view'))",
            },
            MetricId::MessengerUsers => Self {
                table: "message_actions",
                aggregate: "uniqExact(user_id)",
            },
            MetricId::MessagesSent => Self {
                table: "message_actions",
                aggregate: "count(user_id)",
            },
        }
    }

    /// Parameterized statement against `database`.
    ///
    /// Empty buckets are filled with zero so the result is contiguous.
    fn statement(&self, database: &str) -> String {
        format!(
            "SELECT toUnixTimestamp(toStartOfInterval(time, toIntervalSecond({{width:UInt32}}))) AS ts, \
             toFloat64({aggregate}) AS value \
             FROM {database}.{table} \
             WHERE time >= toDateTime({{start:UInt32}}) AND time < toDateTime({{end:UInt32}}) \
             GROUP BY ts \
             ORDER BY ts WITH FILL FROM {{start:UInt32}} TO {{end:UInt32}} STEP {{width:UInt32}} \
             FORMAT JSONEachRow",
            aggregate = self.aggregate,
            database = database,
            table = self.table,
        )
    }
}

/// Prepared statements keyed by metric
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    statements: HashMap<MetricId, String>,
}

impl QueryCatalog {
    /// Catalog with the default aggregation for every known metric
    pub fn new(database: &str) -> Self {
        let statements = MetricId::ALL
            .iter()
            .map(|&metric| (metric, MetricQuery::for_metric(metric).statement(database)))
            .collect();
        Self { statements }
    }

    /// Replace the aggregation for one metric
    pub fn with_query(mut self, metric: MetricId, query: MetricQuery, database: &str) -> Self {
        self.statements.insert(metric, query.statement(database));
        self
    }

    pub fn statement(&self, metric: MetricId) -> Option<&str> {
        self.statements.get(&metric).map(String::as_str)
    }
}
