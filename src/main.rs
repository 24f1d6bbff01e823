//! CLI entry point for qblink.

mod cli;

use clap::Parser;
use cli::Command;
use qblink::config::load_settings;
use qblink::connection::QuickBooksConnection;
use qblink::diagnostics::{check_redirect_urlacl, validate_setup};
use qblink::error::{ErrorKind, OperationReport, QboError};
use serde::Serialize;
use serde_json::json;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    qblink::logging::init(args.verbose);
    tracing::debug!("{}", qblink::build_info::metadata_line());

    let loaded = match load_settings(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(ErrorKind::Configuration));
        }
    };
    let connection = QuickBooksConnection::open(loaded, !args.no_secret_store);

    if let Err(err) = run(&connection, args.command).await {
        eprintln!("error: {err}");
        std::process::exit(exit_code(err.kind()));
    }
}

async fn run(connection: &QuickBooksConnection, command: Command) -> Result<(), QboError> {
    let service = &connection.service;
    match command {
        Command::AuthUrl => {
            let request = connection.exchange.authorization_url().await?;
            println!("{}", request.url);
            eprintln!("state: {}", request.state);
            eprintln!("After consenting, run `qblink exchange <code>` with the `code` from the redirect URL.");
        }
        Command::Exchange { code } => {
            let result = connection.exchange.exchange_code_for_token(&code).await;
            report(result, "QuickBooks authorization complete")?;
        }
        Command::Refresh => {
            let result = connection.exchange.refresh_access_token().await;
            report(result, "access token refreshed")?;
        }
        Command::Status => emit(&service.get_connection_status().await?),
        Command::Test => {
            let ok = service.test_connection().await;
            emit(&json!({ "connected": ok }));
            if !ok {
                return Err(QboError::InvalidResponse(
                    "connection test failed; see log output".to_string(),
                ));
            }
        }
        Command::Customers => emit(&service.get_customers().await?),
        Command::Accounts => emit(&service.get_chart_of_accounts().await?),
        Command::Budgets => emit(&service.get_budgets().await?),
        Command::Invoices { enterprise } => {
            emit(&service.get_invoices(enterprise.as_deref()).await?)
        }
        Command::Journal { start, end } => {
            emit(&service.get_journal_entries(start, end).await?)
        }
        Command::Urlacl => {
            let credentials = connection.credentials.credentials().await?;
            emit(&check_redirect_urlacl(&credentials.redirect_uri).await);
        }
        Command::Doctor => {
            let setup = validate_setup(&connection.credentials).await;
            let urlacl = match connection.credentials.credentials().await {
                Ok(credentials) => Some(check_redirect_urlacl(&credentials.redirect_uri).await),
                Err(_) => None,
            };
            emit(&json!({
                "setup": match &setup {
                    Ok(()) => "ok".to_string(),
                    Err(message) => message.clone(),
                },
                "urlacl": urlacl,
            }));
            setup.map_err(QboError::MissingConfiguration)?;
        }
        Command::SetCredentials {
            client_id,
            client_secret,
            realm_id,
        } => {
            let client_secret = match client_secret {
                Some(secret) => secret,
                None => rpassword::prompt_password("QuickBooks client secret: ").map_err(|err| {
                    QboError::InvalidInput(format!("failed to read client secret: {err}"))
                })?,
            };
            if client_id.trim().is_empty() || client_secret.trim().is_empty() {
                return Err(QboError::InvalidInput(
                    "client id and client secret must not be empty".to_string(),
                ));
            }
            let result = connection
                .credentials
                .store_credentials(client_id.trim(), client_secret.trim(), realm_id.as_deref())
                .await;
            report(result, "credentials stored")?;
        }
        Command::Disconnect => {
            let result = connection.exchange.disconnect().await;
            report(result, "disconnected from QuickBooks")?;
        }
    }
    Ok(())
}

/// Print the flat `{success, kind, message}` report, then pass the result on.
fn report<T>(result: Result<T, QboError>, success_message: &str) -> Result<(), QboError> {
    emit(&OperationReport::from_result(&result, success_message));
    result.map(|_| ())
}

fn emit<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("error: failed to render output: {err}"),
    }
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Unexpected => 1,
        ErrorKind::Configuration => 2,
        ErrorKind::Authentication => 3,
        ErrorKind::Transient => 4,
        ErrorKind::InvalidInput => 64,
    }
}
