use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

/// Duration of statement executions and commits against the destination.
/// Labels: `query_type` (`exec` or `commit`).
pub const LOADER_QUERY_DURATION_SECONDS: &str = "loader_query_duration_seconds";

/// Label distinguishing statement executions from commits.
pub const QUERY_TYPE_LABEL: &str = "query_type";

/// Number of retried attempts of a unit of work.
/// Labels: `unit` (`table` or `group`).
pub const LOADER_RETRIES_TOTAL: &str = "loader_retries_total";

/// Number of merged changes applied to the destination.
/// Labels: `change_kind`.
pub const LOADER_CHANGES_APPLIED_TOTAL: &str = "loader_changes_applied_total";

/// Number of DDL statements whose failure was ignored.
pub const LOADER_DDL_ERRORS_IGNORED_TOTAL: &str = "loader_ddl_errors_ignored_total";

/// Registers the descriptions of the loader metrics.
///
/// Safe to call multiple times, registration happens only once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_histogram!(
            LOADER_QUERY_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of statement executions and commits against the destination, labeled by query_type"
        );

        describe_counter!(
            LOADER_RETRIES_TOTAL,
            Unit::Count,
            "Number of retried attempts of a unit of work, labeled by unit"
        );

        describe_counter!(
            LOADER_CHANGES_APPLIED_TOTAL,
            Unit::Count,
            "Number of merged changes applied to the destination, labeled by change_kind"
        );

        describe_counter!(
            LOADER_DDL_ERRORS_IGNORED_TOTAL,
            Unit::Count,
            "Number of DDL statements whose failure was classified as ignorable"
        );
    });
}
