//! Typed read access to QuickBooks Online.
//!
//! Every public call builds a fresh [`RealmContext`] through the
//! [`ServiceContextBuilder`], so a token refreshed by an earlier call is
//! picked up by the next one. Inside a call:
//! - transient failures (429, 5xx, timeouts) are retried by `retry`.
//! - a 401 triggers exactly one token refresh and one more attempt.

mod models;
pub mod query;
mod retry;
mod transport;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::auth::{ConnectionStatus, RealmContext, ServiceContextBuilder, TokenExchangeClient};
use crate::error::{ErrorKind, QboError};

pub use models::{
    Account, Budget, BudgetDetail, CompanyInfo, Customer, EmailAddress, Invoice, JournalEntry,
    JournalEntryLineDetail, JournalLine, ReferenceType,
};
pub use retry::RetryPolicy;
pub use transport::build_http_client;

/// Data facade over the QuickBooks v3 REST API.
pub struct QuickBooksService {
    http: reqwest::Client,
    contexts: Arc<ServiceContextBuilder>,
    exchange: Arc<TokenExchangeClient>,
    retry_policy: RetryPolicy,
    page_size: usize,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl QuickBooksService {
    pub fn new(
        http: reqwest::Client,
        contexts: Arc<ServiceContextBuilder>,
        exchange: Arc<TokenExchangeClient>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            contexts,
            exchange,
            retry_policy,
            page_size: query::MAX_PAGE_SIZE,
            last_sync: RwLock::new(None),
        }
    }

    /// Override the query page size (clamped to 1..=1000).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, query::MAX_PAGE_SIZE);
        self
    }

    pub async fn get_customers(&self) -> Result<Vec<Customer>, QboError> {
        self.query_all("Customer", &query::select_all("Customer"))
            .await
    }

    pub async fn get_chart_of_accounts(&self) -> Result<Vec<Account>, QboError> {
        self.query_all("Account", &query::select_all("Account")).await
    }

    pub async fn get_budgets(&self) -> Result<Vec<Budget>, QboError> {
        self.query_all("Budget", &query::select_all("Budget")).await
    }

    /// All invoices, or only those billed to the customer whose display
    /// name matches `enterprise` exactly.
    pub async fn get_invoices(&self, enterprise: Option<&str>) -> Result<Vec<Invoice>, QboError> {
        let Some(name) = enterprise.map(str::trim).filter(|name| !name.is_empty()) else {
            return self.query_all("Invoice", &query::select_all("Invoice")).await;
        };

        let mut ctx = self.contexts.create_service_context().await?;
        let customers: Vec<Customer> = self
            .query_pages(&mut ctx, "Customer", &query::customer_by_display_name(name))
            .await?;
        let Some(customer) = customers.into_iter().next() else {
            tracing::info!(enterprise = name, "no customer with that display name; no invoices");
            self.mark_synced().await;
            return Ok(Vec::new());
        };

        let invoices: Vec<Invoice> = self
            .query_pages(&mut ctx, "Invoice", &query::invoices_for_customer(&customer.id))
            .await?;
        tracing::info!(
            enterprise = name,
            customer_id = %customer.id,
            count = invoices.len(),
            "fetched invoices"
        );
        self.mark_synced().await;
        Ok(invoices)
    }

    /// Journal entries whose transaction date lies in `[start, end]`.
    pub async fn get_journal_entries(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<JournalEntry>, QboError> {
        if start > end {
            return Err(QboError::InvalidInput(format!(
                "start date {start} is after end date {end}"
            )));
        }
        self.query_all("JournalEntry", &query::journal_entries_between(start, end))
            .await
    }

    pub async fn get_company_info(&self) -> Result<CompanyInfo, QboError> {
        let mut ctx = self.contexts.create_service_context().await?;
        let path = format!("companyinfo/{}", ctx.realm_id);
        let document = self.get_with_refresh(&mut ctx, &path, &[]).await?;
        let info = document
            .get("CompanyInfo")
            .cloned()
            .ok_or_else(|| QboError::InvalidResponse("missing CompanyInfo object".to_string()))?;
        let info: CompanyInfo = serde_json::from_value(info)
            .map_err(|err| QboError::InvalidResponse(format!("CompanyInfo: {err}")))?;
        self.mark_synced().await;
        Ok(info)
    }

    /// Lightweight probe: fetch company info. Never errors.
    pub async fn test_connection(&self) -> bool {
        match self.get_company_info().await {
            Ok(info) => {
                tracing::info!(
                    company = info.company_name.as_deref().unwrap_or(""),
                    "QuickBooks connection OK"
                );
                true
            }
            Err(err) => {
                tracing::error!(error = %err, kind = %err.kind(), "QuickBooks connection test failed");
                false
            }
        }
    }

    /// Connected means a realm and an access token are present.
    ///
    /// Token expiry is not considered. Configuration and authentication
    /// gaps are reported as "not connected"; anything else is returned.
    pub async fn get_connection_status(&self) -> Result<ConnectionStatus, QboError> {
        let last_sync_time = *self.last_sync.read().await;
        match self.contexts.create_service_context().await {
            Ok(ctx) => Ok(ConnectionStatus {
                is_connected: true,
                last_sync_time,
                status_message: if ctx.tokens.is_expired() {
                    format!(
                        "Connected to QuickBooks company {}; access token expired and will be refreshed on the next request",
                        ctx.realm_id
                    )
                } else {
                    format!("Connected to QuickBooks company {}", ctx.realm_id)
                },
            }),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::Configuration | ErrorKind::Authentication
                ) =>
            {
                Ok(ConnectionStatus {
                    is_connected: false,
                    last_sync_time,
                    status_message: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn query_all<T: DeserializeOwned>(
        &self,
        entity: &str,
        statement: &str,
    ) -> Result<Vec<T>, QboError> {
        let mut ctx = self.contexts.create_service_context().await?;
        let rows = self.query_pages(&mut ctx, entity, statement).await?;
        tracing::info!(entity, count = rows.len(), "fetched QuickBooks entities");
        self.mark_synced().await;
        Ok(rows)
    }

    async fn query_pages<T: DeserializeOwned>(
        &self,
        ctx: &mut RealmContext,
        entity: &str,
        statement: &str,
    ) -> Result<Vec<T>, QboError> {
        let minor_version = ctx.minor_version.to_string();
        let mut rows = Vec::new();
        let mut start_position = 1;
        loop {
            let statement = query::paged(statement, start_position, self.page_size);
            tracing::debug!(entity, query = %statement, "running QuickBooks query");
            let document = self
                .get_with_refresh(
                    ctx,
                    "query",
                    &[("query", statement.as_str()), ("minorversion", minor_version.as_str())],
                )
                .await?;
            let page = page_rows(&document, entity)?;
            let fetched = page.len();
            for row in page {
                let item = serde_json::from_value(row)
                    .map_err(|err| QboError::InvalidResponse(format!("{entity}: {err}")))?;
                rows.push(item);
            }
            if fetched < self.page_size {
                return Ok(rows);
            }
            start_position += fetched;
        }
    }

    /// GET with bounded retries; on 401 refresh once and try again.
    async fn get_with_refresh(
        &self,
        ctx: &mut RealmContext,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, QboError> {
        let url = format!("{}/{}", ctx.company_url(), path);
        let response = self
            .get_with_retries(&url, params, &ctx.tokens.access_token)
            .await;
        if !is_unauthorized(&response) {
            return response;
        }

        tracing::info!("QuickBooks rejected the access token; refreshing once");
        ctx.tokens = self.exchange.refresh_access_token().await?;
        let response = self
            .get_with_retries(&url, params, &ctx.tokens.access_token)
            .await;
        if is_unauthorized(&response) {
            return Err(QboError::Unauthorized(
                "QuickBooks rejected the refreshed token. Re-authorize with `qblink auth-url`."
                    .to_string(),
            ));
        }
        response
    }

    async fn get_with_retries(
        &self,
        url: &str,
        params: &[(&str, &str)],
        bearer: &str,
    ) -> Result<Value, QboError> {
        let mut attempt: u32 = 0;
        loop {
            match transport::get_json(&self.http, url, params, bearer).await {
                Ok(document) => return Ok(document),
                Err(err) => {
                    if !self.retry_policy.should_retry(&err, attempt) {
                        if err.status_code() != Some(401) {
                            tracing::warn!(error = %err, kind = %err.kind(), "QuickBooks request failed");
                        }
                        return Err(err);
                    }
                    let delay = self.retry_policy.retry_delay_for(attempt, &err);
                    tracing::debug!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "retrying QuickBooks request");
                    attempt = attempt.saturating_add(1);
                    sleep(delay).await;
                }
            }
        }
    }

    async fn mark_synced(&self) {
        *self.last_sync.write().await = Some(Utc::now());
    }
}

fn is_unauthorized(result: &Result<Value, QboError>) -> bool {
    result
        .as_ref()
        .err()
        .and_then(QboError::status_code)
        .is_some_and(|status| status == 401)
}

/// Rows for `entity` from a `QueryResponse`; absent means an empty page.
fn page_rows(document: &Value, entity: &str) -> Result<Vec<Value>, QboError> {
    let response = document
        .get("QueryResponse")
        .ok_or_else(|| QboError::InvalidResponse("missing QueryResponse object".to_string()))?;
    match response.get(entity) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(rows)) => Ok(rows.clone()),
        Some(_) => Err(QboError::InvalidResponse(format!(
            "QueryResponse.{entity} is not an array"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialProvider, OAuthEndpoints, TokenVault};
    use crate::config::{QuickBooksEnv, Settings, SettingsStore};
    use crate::secrets::{
        SecretStore, KEY_ACCESS_TOKEN, KEY_CLIENT_ID, KEY_CLIENT_SECRET, KEY_REALM_ID,
        KEY_REFRESH_TOKEN, KEY_TOKEN_EXPIRY,
    };
    use crate::testsupport::{CountingSecretStore, ScriptedResponse, ScriptedServer};
    use std::time::Duration;

    struct Harness {
        server: ScriptedServer,
        vault: Arc<TokenVault>,
        service: QuickBooksService,
    }

    async fn harness(responses: Vec<ScriptedResponse>, extra: &[(&str, &str)]) -> Harness {
        let server = ScriptedServer::start(responses).await;
        let mut entries = vec![
            (KEY_CLIENT_ID, "client"),
            (KEY_CLIENT_SECRET, "secret"),
            (KEY_REALM_ID, "9130"),
        ];
        entries.extend_from_slice(extra);
        let secrets: Arc<dyn SecretStore> = Arc::new(CountingSecretStore::with_entries(entries));

        let mut settings = Settings::default();
        settings.quickbooks.api_base_url = Some(server.url(""));
        let settings = Arc::new(SettingsStore::in_memory(settings));
        let credentials = Arc::new(CredentialProvider::new(
            Some(Arc::clone(&secrets)),
            Arc::clone(&settings),
            QuickBooksEnv::default(),
        ));
        let vault = Arc::new(TokenVault::new(Some(secrets), settings));
        let endpoints = OAuthEndpoints {
            token_url: server.url("/oauth2/v1/tokens/bearer"),
            ..OAuthEndpoints::default()
        };
        let http = build_http_client(Duration::from_secs(5));
        let exchange = Arc::new(TokenExchangeClient::new(
            http.clone(),
            Arc::clone(&credentials),
            Arc::clone(&vault),
            endpoints,
        ));
        let contexts = Arc::new(ServiceContextBuilder::new(credentials, Arc::clone(&vault)));
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let service = QuickBooksService::new(http, contexts, exchange, policy);
        Harness {
            server,
            vault,
            service,
        }
    }

    const SIGNED_IN: &[(&str, &str)] = &[
        (KEY_ACCESS_TOKEN, "access-1"),
        (KEY_REFRESH_TOKEN, "refresh-1"),
        (KEY_TOKEN_EXPIRY, "2099-01-01T00:00:00Z"),
    ];

    fn decoded_query(path: &str) -> String {
        let url = reqwest::Url::parse(&format!("http://localhost{path}")).unwrap();
        url.query_pairs()
            .find(|(key, _)| key == "query")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn customers_are_fetched_with_bearer_and_minor_version() {
        let h = harness(
            vec![ScriptedResponse::json(
                200,
                r#"{"QueryResponse":{"Customer":[{"Id":"1","DisplayName":"Town of Wiley"}],"startPosition":1,"maxResults":1},"time":"2024-01-01T00:00:00Z"}"#,
            )],
            SIGNED_IN,
        )
        .await;

        let customers = h.service.get_customers().await.unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].display_name.as_deref(), Some("Town of Wiley"));

        let request = &h.server.requests()[0];
        assert!(request.path.starts_with("/v3/company/9130/query?"), "{}", request.path);
        assert!(request.path.contains("minorversion=65"));
        assert_eq!(request.header("authorization"), Some("Bearer access-1"));
        assert_eq!(
            decoded_query(&request.path),
            "SELECT * FROM Customer STARTPOSITION 1 MAXRESULTS 1000"
        );
    }

    #[tokio::test]
    async fn paging_continues_until_a_short_page() {
        let h = harness(
            vec![
                ScriptedResponse::json(200, r#"{"QueryResponse":{"Account":[{"Id":"1"},{"Id":"2"}]}}"#),
                ScriptedResponse::json(200, r#"{"QueryResponse":{"Account":[{"Id":"3"}]}}"#),
            ],
            SIGNED_IN,
        )
        .await;
        let service = h.service.with_page_size(2);

        let accounts = service.get_chart_of_accounts().await.unwrap();
        let ids: Vec<_> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);

        let requests = h.server.requests();
        assert_eq!(requests.len(), 2);
        assert!(decoded_query(&requests[1].path).ends_with("STARTPOSITION 3 MAXRESULTS 2"));
    }

    #[tokio::test]
    async fn enterprise_name_is_escaped_in_query() {
        let h = harness(
            vec![
                ScriptedResponse::json(
                    200,
                    r#"{"QueryResponse":{"Customer":[{"Id":"58","DisplayName":"O'Brien Water Co"}]}}"#,
                ),
                ScriptedResponse::json(
                    200,
                    r#"{"QueryResponse":{"Invoice":[{"Id":"7","CustomerRef":{"value":"58"},"TotalAmt":120.0}]}}"#,
                ),
            ],
            SIGNED_IN,
        )
        .await;

        let invoices = h.service.get_invoices(Some("O'Brien Water Co")).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].customer_ref.as_ref().unwrap().value, "58");

        let requests = h.server.requests();
        assert_eq!(
            decoded_query(&requests[0].path),
            "SELECT * FROM Customer WHERE DisplayName = 'O''Brien Water Co' STARTPOSITION 1 MAXRESULTS 1000"
        );
        assert!(decoded_query(&requests[1].path)
            .starts_with("SELECT * FROM Invoice WHERE CustomerRef = '58'"));
    }

    #[tokio::test]
    async fn unknown_enterprise_returns_no_invoices() {
        let h = harness(
            vec![ScriptedResponse::json(200, r#"{"QueryResponse":{}}"#)],
            SIGNED_IN,
        )
        .await;
        let invoices = h.service.get_invoices(Some("Nobody")).await.unwrap();
        assert!(invoices.is_empty());
        assert_eq!(h.server.connection_count(), 1);
    }

    #[tokio::test]
    async fn reversed_date_range_is_rejected_without_io() {
        let h = harness(vec![], SIGNED_IN).await;
        let start = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let err = h.service.get_journal_entries(start, end).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(h.server.connection_count(), 0);
    }

    #[tokio::test]
    async fn unauthorized_triggers_one_refresh_and_retry() {
        let h = harness(
            vec![
                ScriptedResponse::json(401, r#"{"fault":"AuthenticationFailed"}"#),
                ScriptedResponse::json(
                    200,
                    r#"{"access_token":"access-2","refresh_token":"refresh-2","expires_in":3600}"#,
                ),
                ScriptedResponse::json(200, r#"{"QueryResponse":{"Budget":[{"Id":"4"}]}}"#),
            ],
            SIGNED_IN,
        )
        .await;

        let budgets = h.service.get_budgets().await.unwrap();
        assert_eq!(budgets.len(), 1);

        let requests = h.server.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].path.starts_with("/oauth2/v1/tokens/bearer"));
        assert_eq!(requests[2].header("authorization"), Some("Bearer access-2"));
        assert_eq!(
            h.vault.current().await.unwrap().unwrap().access_token,
            "access-2"
        );
    }

    #[tokio::test]
    async fn second_unauthorized_is_an_authentication_error() {
        let h = harness(
            vec![
                ScriptedResponse::json(401, "{}"),
                ScriptedResponse::json(
                    200,
                    r#"{"access_token":"access-2","refresh_token":"refresh-2","expires_in":3600}"#,
                ),
                ScriptedResponse::json(401, "{}"),
            ],
            SIGNED_IN,
        )
        .await;
        let err = h.service.get_customers().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(h.server.connection_count(), 3);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let h = harness(
            vec![
                ScriptedResponse::json(503, "busy"),
                ScriptedResponse::json(200, r#"{"QueryResponse":{"Customer":[]}}"#),
            ],
            SIGNED_IN,
        )
        .await;
        assert!(h.service.get_customers().await.unwrap().is_empty());
        assert_eq!(h.server.connection_count(), 2);
    }

    #[tokio::test]
    async fn fault_document_is_unexpected() {
        let h = harness(
            vec![ScriptedResponse::json(
                200,
                r#"{"Fault":{"type":"ValidationFault","Error":[{"Message":"Invalid query","code":"4000"}]}}"#,
            )],
            SIGNED_IN,
        )
        .await;
        let err = h.service.get_customers().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(err.to_string().contains("ValidationFault"), "err: {err}");
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let h = harness(vec![ScriptedResponse::json(400, "nope")], SIGNED_IN).await;
        let err = h.service.get_customers().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(h.server.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_reports_false_on_failure() {
        let h = harness(
            vec![
                ScriptedResponse::json(
                    200,
                    r#"{"CompanyInfo":{"Id":"1","CompanyName":"Wiley Widget Utilities"}}"#,
                ),
                ScriptedResponse::json(404, "missing"),
            ],
            SIGNED_IN,
        )
        .await;
        assert!(h.service.test_connection().await);
        assert!(h.server.requests()[0].path.starts_with("/v3/company/9130/companyinfo/9130"));
        assert!(!h.service.test_connection().await);
    }

    #[tokio::test]
    async fn expired_token_still_reports_connected() {
        let h = harness(
            vec![],
            &[
                (KEY_ACCESS_TOKEN, "abc"),
                (KEY_REFRESH_TOKEN, "r"),
                (KEY_TOKEN_EXPIRY, "2000-01-01T00:00:00Z"),
            ],
        )
        .await;
        let status = h.service.get_connection_status().await.unwrap();
        assert!(status.is_connected);
        assert!(status.status_message.contains("expired"), "{}", status.status_message);
        assert_eq!(status.last_sync_time, None);
        assert_eq!(h.server.connection_count(), 0);
    }

    #[tokio::test]
    async fn missing_token_reports_disconnected_and_sync_time_tracks_queries() {
        let h = harness(
            vec![ScriptedResponse::json(200, r#"{"QueryResponse":{}}"#)],
            &[],
        )
        .await;
        let status = h.service.get_connection_status().await.unwrap();
        assert!(!status.is_connected);
        assert!(status.status_message.contains("Re-authenticate"));

        h.vault
            .replace(crate::auth::TokenSet::new("a", "r", Utc::now()))
            .await
            .unwrap();
        h.service.get_customers().await.unwrap();
        let status = h.service.get_connection_status().await.unwrap();
        assert!(status.is_connected);
        assert!(status.last_sync_time.is_some());
    }
}
