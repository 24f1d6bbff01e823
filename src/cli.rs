//! CLI argument parsing via clap.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// QuickBooks Online OAuth2 token manager and read-only data client.
#[derive(Debug, Parser)]
#[command(name = "qblink", version = qblink::build_info::VERSION, long_version = qblink::build_info::LONG_VERSION)]
pub struct Args {
    /// Path to settings file (default: ./qblink.toml or ~/.config/qblink/qblink.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Keep credentials and tokens in the settings file instead of the encrypted secret store.
    #[arg(long = "no-secret-store", global = true)]
    pub no_secret_store: bool,

    /// Debug logging (overridden by QBLINK_LOG / RUST_LOG).
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the Intuit consent URL to open in a browser.
    AuthUrl,
    /// Exchange the authorization code from the redirect for tokens.
    Exchange {
        /// `code` query parameter from the redirect URL.
        code: String,
    },
    /// Refresh the stored access token.
    Refresh,
    /// Show connection status (token presence, last sync).
    Status,
    /// Probe the API by fetching company info.
    Test,
    /// List customers.
    Customers,
    /// List the chart of accounts.
    Accounts,
    /// List budgets.
    Budgets,
    /// List invoices, optionally for one customer.
    Invoices {
        /// Customer display name to filter by.
        #[arg(long = "enterprise", value_name = "NAME")]
        enterprise: Option<String>,
    },
    /// List journal entries in a date range (inclusive).
    Journal {
        #[arg(long = "start", value_name = "YYYY-MM-DD")]
        start: NaiveDate,
        #[arg(long = "end", value_name = "YYYY-MM-DD")]
        end: NaiveDate,
    },
    /// Check the Windows URL reservation for the redirect URI.
    Urlacl,
    /// Validate settings and credentials, then run the URL reservation check.
    Doctor,
    /// Store client id/secret (and realm) for this machine.
    SetCredentials {
        #[arg(long = "client-id")]
        client_id: String,
        /// Read from stdin prompt when omitted.
        #[arg(long = "client-secret")]
        client_secret: Option<String>,
        #[arg(long = "realm-id")]
        realm_id: Option<String>,
    },
    /// Revoke the refresh token and forget stored tokens.
    Disconnect,
}
