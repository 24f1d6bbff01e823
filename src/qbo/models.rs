//! Typed QuickBooks entities.
//!
//! Only the fields this client reads are modelled; unknown fields are ignored.
//! QBO uses PascalCase everywhere except inside reference objects.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// `{"value": "<id>", "name": "<display>"}` pointer to another entity.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ReferenceType {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailAddress {
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Customer {
    pub id: String,
    pub sync_token: Option<String>,
    pub display_name: Option<String>,
    pub company_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub primary_email_addr: Option<EmailAddress>,
    pub balance: Option<f64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Invoice {
    pub id: String,
    pub doc_number: Option<String>,
    pub txn_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub customer_ref: Option<ReferenceType>,
    pub total_amt: Option<f64>,
    pub balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Account {
    pub id: String,
    pub name: Option<String>,
    pub fully_qualified_name: Option<String>,
    pub acct_num: Option<String>,
    pub account_type: Option<String>,
    pub account_sub_type: Option<String>,
    pub classification: Option<String>,
    pub current_balance: Option<f64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JournalEntryLineDetail {
    /// `Debit` or `Credit`.
    pub posting_type: Option<String>,
    pub account_ref: Option<ReferenceType>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JournalLine {
    pub id: Option<String>,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub detail_type: Option<String>,
    pub journal_entry_line_detail: Option<JournalEntryLineDetail>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct JournalEntry {
    pub id: String,
    pub doc_number: Option<String>,
    pub txn_date: Option<NaiveDate>,
    pub private_note: Option<String>,
    pub line: Vec<JournalLine>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BudgetDetail {
    pub budget_date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub account_ref: Option<ReferenceType>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Budget {
    pub id: String,
    pub name: Option<String>,
    pub budget_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub active: Option<bool>,
    pub budget_detail: Vec<BudgetDetail>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompanyInfo {
    pub id: String,
    pub company_name: Option<String>,
    pub legal_name: Option<String>,
    pub country: Option<String>,
    pub fiscal_year_start_month: Option<String>,
}
