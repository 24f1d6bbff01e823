//! qblink: QuickBooks Online OAuth2 token lifecycle and read-only data client.
//!
//! The library keeps one current token pair per process, refreshes it on
//! demand, and exposes typed queries over the QuickBooks v3 API.
//!
//! # Quick start
//!
//! ```no_run
//! use qblink::config::load_settings;
//! use qblink::connection::QuickBooksConnection;
//!
//! # async fn example() -> Result<(), qblink::error::QboError> {
//! let loaded = load_settings(None)?;
//! let connection = QuickBooksConnection::open(loaded, true);
//! let customers = connection.service.get_customers().await?;
//! println!("{} customers", customers.len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod build_info;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod qbo;
pub mod secrets;
pub mod single_flight;
#[cfg(test)]
pub mod testsupport;
