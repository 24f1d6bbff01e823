//! Builders for QuickBooks query-language statements.
//!
//! The query endpoint has no bind parameters, so every interpolated value
//! goes through [`escape_query_literal`].

use chrono::NaiveDate;

/// Largest page the query endpoint will return.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Escape a value for use inside a single-quoted literal.
///
/// Single quotes are doubled; nothing else is rewritten.
pub fn escape_query_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// `SELECT * FROM <entity>`.
pub fn select_all(entity: &str) -> String {
    format!("SELECT * FROM {entity}")
}

/// Customer lookup by exact display name.
pub fn customer_by_display_name(name: &str) -> String {
    format!(
        "SELECT * FROM Customer WHERE DisplayName = '{}'",
        escape_query_literal(name)
    )
}

pub fn invoices_for_customer(customer_id: &str) -> String {
    format!(
        "SELECT * FROM Invoice WHERE CustomerRef = '{}'",
        escape_query_literal(customer_id)
    )
}

/// Journal entries with `start <= TxnDate <= end`.
pub fn journal_entries_between(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "SELECT * FROM JournalEntry WHERE TxnDate >= '{}' AND TxnDate <= '{}'",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

/// Append paging clauses. `start_position` is 1-based.
pub fn paged(statement: &str, start_position: usize, page_size: usize) -> String {
    format!("{statement} STARTPOSITION {start_position} MAXRESULTS {page_size}")
}
