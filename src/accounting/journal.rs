//! Sales invoices, purchase invoices, receipts and general journal documents.
//! All four share `journal_documents`, told apart by `document_kind`, and
//! keep their lines in `journal_document_lines`.

use anyhow::Result;
use serde_json::Value;

use super::mapping::{column, fields, payload, reference, remote_reference, text};
use crate::db::{DbTransaction, Fields, LocalRecord};
use crate::resource::Resource;
use crate::resource_type::{DocumentLines, ResourceType};

pub const TABLE: &str = "journal_documents";
pub const LINES_TABLE: &str = "journal_document_lines";
pub const KIND_COLUMN: &str = "document_kind";

pub const SALES_INVOICE: &str = "SI";
pub const PURCHASE_INVOICE: &str = "PI";
pub const RECEIPT: &str = "RC";
pub const GENERAL_JOURNAL_DOCUMENT: &str = "GJ";

fn details() -> DocumentLines {
    DocumentLines {
        table: LINES_TABLE,
        document_foreign_key: "document_id",
        resource_data_name: "details",
        attributes_name: "details_attributes",
        model_fields: detail_fields,
        serialize: serialize_detail,
    }
}

fn journal_entries() -> DocumentLines {
    DocumentLines {
        table: LINES_TABLE,
        document_foreign_key: "document_id",
        resource_data_name: "general_journal_document_entries",
        attributes_name: "general_journal_document_entries_attributes",
        model_fields: journal_entry_fields,
        serialize: serialize_journal_entry,
    }
}

pub fn sales_invoices() -> ResourceType {
    ResourceType::new("SalesInvoice", "sales_invoice", "sales_invoices", TABLE, sales_invoice_fields)
        .synchronizable()
        .writable(serialize_sales_invoice)
        .deletable()
        .scoped(KIND_COLUMN, SALES_INVOICE)
        .with_document_lines(details())
}

pub fn purchase_invoices() -> ResourceType {
    ResourceType::new(
        "PurchaseInvoice",
        "purchase_invoice",
        "documents/purchase_invoices",
        TABLE,
        purchase_document_fields,
    )
    .synchronizable()
    .writable(serialize_purchase_document)
    .deletable()
    .scoped(KIND_COLUMN, PURCHASE_INVOICE)
    .with_document_lines(details())
}

pub fn receipts() -> ResourceType {
    ResourceType::new("Receipt", "receipt", "documents/receipts", TABLE, purchase_document_fields)
        .synchronizable()
        .writable(serialize_purchase_document)
        .deletable()
        .scoped(KIND_COLUMN, RECEIPT)
        .with_document_lines(details())
}

pub fn general_journal_documents() -> ResourceType {
    ResourceType::new(
        "GeneralJournalDocument",
        "general_journal_document",
        "documents/general_journal_documents",
        TABLE,
        general_journal_fields,
    )
    .synchronizable()
    .writable(serialize_general_journal_document)
    .deletable()
    .scoped(KIND_COLUMN, GENERAL_JOURNAL_DOCUMENT)
    .with_document_lines(journal_entries())
    .with_after_save(total_from_entries)
}

fn document_fields(txn: &DbTransaction, resource: &Resource, date_key: &str) -> Result<Fields> {
    Ok(fields([
        ("reference", text(resource, "reference")),
        ("date", text(resource, date_key)),
        ("due_date", text(resource, "due_date")),
        ("state", text(resource, "state")),
        ("contact_id", reference(txn, resource, "contact_id", "contacts")?),
        ("workflow_id", reference(txn, resource, "workflow_id", "workflows")?),
        ("currency", text(resource, "currency")),
        ("total_price", text(resource, "total_price_incl_tax_base")),
        ("total_paid", text(resource, "total_paid")),
        ("total_unpaid", text(resource, "total_unpaid")),
    ]))
}

fn sales_invoice_fields(txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    document_fields(txn, resource, "invoice_date")
}

fn purchase_document_fields(txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    document_fields(txn, resource, "date")
}

fn general_journal_fields(txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    document_fields(txn, resource, "date")
}

fn serialize_sales_invoice(txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("reference", column(record, "reference")),
        ("invoice_date", column(record, "date")),
        ("contact_id", remote_reference(txn, record, "contact_id", "contacts")?),
        ("workflow_id", remote_reference(txn, record, "workflow_id", "workflows")?),
        ("currency", column(record, "currency")),
    ])))
}

fn serialize_purchase_document(txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("reference", column(record, "reference")),
        ("date", column(record, "date")),
        ("due_date", column(record, "due_date")),
        ("contact_id", remote_reference(txn, record, "contact_id", "contacts")?),
        ("currency", column(record, "currency")),
    ])))
}

fn serialize_general_journal_document(_txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("reference", column(record, "reference")),
        ("date", column(record, "date")),
    ])))
}

/// Every line column, so either line shape fully replaces the other.
fn line_fields(txn: &DbTransaction, line: &Resource) -> Result<Fields> {
    Ok(fields([
        ("description", text(line, "description")),
        ("amount", Value::Null),
        ("price", Value::Null),
        ("debit", Value::Null),
        ("credit", Value::Null),
        ("ledger_account_id", reference(txn, line, "ledger_account_id", "ledger_accounts")?),
        ("tax_rate_id", Value::Null),
        ("project_id", reference(txn, line, "project_id", "projects")?),
    ]))
}

fn detail_fields(txn: &DbTransaction, line: &Resource) -> Result<Fields> {
    let mut fields = line_fields(txn, line)?;
    fields.insert("amount".to_string(), text(line, "amount"));
    let price = match text(line, "total_price_excl_tax_with_discount_base") {
        Value::Null => text(line, "price"),
        price => price,
    };
    fields.insert("price".to_string(), price);
    fields.insert(
        "tax_rate_id".to_string(),
        reference(txn, line, "tax_rate_id", "tax_rates")?,
    );
    Ok(fields)
}

fn journal_entry_fields(txn: &DbTransaction, line: &Resource) -> Result<Fields> {
    let mut fields = line_fields(txn, line)?;
    let debit = text(line, "debit");
    let credit = text(line, "credit");
    let balance = match (parse_amount(&debit), parse_amount(&credit)) {
        (Some(debit), Some(credit)) => Value::String(format!("{:.2}", debit - credit)),
        _ => Value::Null,
    };
    fields.insert("price".to_string(), balance);
    fields.insert("debit".to_string(), debit);
    fields.insert("credit".to_string(), credit);
    Ok(fields)
}

fn serialize_detail(txn: &DbTransaction, line: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("description", column(line, "description")),
        ("amount", column(line, "amount")),
        ("price", column(line, "price")),
        ("ledger_account_id", remote_reference(txn, line, "ledger_account_id", "ledger_accounts")?),
        ("tax_rate_id", remote_reference(txn, line, "tax_rate_id", "tax_rates")?),
        ("project_id", remote_reference(txn, line, "project_id", "projects")?),
    ])))
}

fn serialize_journal_entry(txn: &DbTransaction, line: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("description", column(line, "description")),
        ("debit", column(line, "debit")),
        ("credit", column(line, "credit")),
        ("ledger_account_id", remote_reference(txn, line, "ledger_account_id", "ledger_accounts")?),
        ("project_id", remote_reference(txn, line, "project_id", "projects")?),
    ])))
}

/// General journal payloads carry no total; derive it from the debit side.
fn total_from_entries(txn: &DbTransaction, _resource_type: &ResourceType, document_id: i64) -> Result<()> {
    txn.connection().execute(
        "UPDATE journal_documents SET total_price = (
            SELECT printf('%.2f', COALESCE(SUM(CAST(debit AS REAL)), 0))
            FROM journal_document_lines WHERE document_id = ?1
        ) WHERE id = ?1",
        [document_id],
    )?;
    Ok(())
}

fn parse_amount(value: &Value) -> Option<f64> {
    value.as_str().and_then(|s| s.parse().ok())
}
