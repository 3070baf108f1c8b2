//! The Moneybird resources mirrored by this crate and the schema they live in.

pub mod journal;
mod mapping;

use std::path::Path;

use anyhow::Result;
use include_dir::{include_dir, Dir};
use rusqlite_migration::Migrations;

use crate::db::{Db, DbTransaction, Fields, LocalRecord};
use crate::registry::Registry;
use crate::resource::Resource;
use crate::resource_type::ResourceType;
use mapping::{column, fields, flag, payload, reference, remote_reference, text};

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

pub fn migrations() -> Result<Migrations<'static>> {
    Ok(Migrations::from_directory(&MIGRATIONS_DIR)?)
}

/// Opens (or creates) a database file and brings its schema up to date.
pub fn open_database<P: AsRef<Path>>(path: P) -> Result<Db> {
    let db = Db::open(path)?;
    db.migrate(&migrations()?)?;
    Ok(db)
}

pub fn open_memory_database() -> Result<Db> {
    let db = Db::open_memory()?;
    db.migrate(&migrations()?)?;
    Ok(db)
}

/// Every mirrored resource type, referenced types first.
pub fn registry() -> Registry {
    Registry::new(vec![
        tax_rates(),
        workflows(),
        ledger_accounts(),
        projects(),
        products(),
        contacts(),
        journal::sales_invoices(),
        journal::purchase_invoices(),
        journal::receipts(),
        journal::general_journal_documents(),
    ])
}

pub fn tax_rates() -> ResourceType {
    ResourceType::new("TaxRate", "tax_rate", "tax_rates", "tax_rates", tax_rate_fields)
}

pub fn workflows() -> ResourceType {
    ResourceType::new("Workflow", "workflow", "workflows", "workflows", workflow_fields)
}

pub fn ledger_accounts() -> ResourceType {
    ResourceType::new(
        "LedgerAccount",
        "ledger_account",
        "ledger_accounts",
        "ledger_accounts",
        ledger_account_fields,
    )
    .writable(serialize_ledger_account)
    .deletable()
}

pub fn projects() -> ResourceType {
    ResourceType::new("Project", "project", "projects", "projects", project_fields)
        .writable(serialize_project)
        .deletable()
}

pub fn products() -> ResourceType {
    ResourceType::new("Product", "product", "products", "products", product_fields)
        .writable(serialize_product)
        .deletable()
}

pub fn contacts() -> ResourceType {
    ResourceType::new("Contact", "contact", "contacts", "contacts", contact_fields)
        .synchronizable()
        .writable(serialize_contact)
        .deletable()
}

fn tax_rate_fields(_txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    Ok(fields([
        ("name", text(resource, "name")),
        ("percentage", text(resource, "percentage")),
        ("tax_rate_type", text(resource, "tax_rate_type")),
        ("active", flag(resource, "active")),
    ]))
}

fn workflow_fields(_txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    Ok(fields([
        ("name", text(resource, "name")),
        ("workflow_type", text(resource, "type")),
        ("active", flag(resource, "active")),
    ]))
}

fn ledger_account_fields(_txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    Ok(fields([
        ("name", text(resource, "name")),
        ("account_type", text(resource, "account_type")),
        ("account_id", text(resource, "account_id")),
    ]))
}

fn serialize_ledger_account(_txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("name", column(record, "name")),
        ("account_type", column(record, "account_type")),
        ("account_id", column(record, "account_id")),
    ])))
}

fn project_fields(_txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    Ok(fields([
        ("name", text(resource, "name")),
        ("state", text(resource, "state")),
    ]))
}

fn serialize_project(_txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    if record.get("name").is_none() {
        return Ok(None);
    }
    Ok(Some(payload([("name", column(record, "name"))])))
}

fn product_fields(txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    Ok(fields([
        ("title", text(resource, "title")),
        ("description", text(resource, "description")),
        ("price", text(resource, "price")),
        ("ledger_account_id", reference(txn, resource, "ledger_account_id", "ledger_accounts")?),
        ("tax_rate_id", reference(txn, resource, "tax_rate_id", "tax_rates")?),
    ]))
}

fn serialize_product(txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    Ok(Some(payload([
        ("title", column(record, "title")),
        ("description", column(record, "description")),
        ("price", column(record, "price")),
        ("ledger_account_id", remote_reference(txn, record, "ledger_account_id", "ledger_accounts")?),
        ("tax_rate_id", remote_reference(txn, record, "tax_rate_id", "tax_rates")?),
    ])))
}

fn contact_fields(_txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
    Ok(fields([
        ("company_name", text(resource, "company_name")),
        ("firstname", text(resource, "firstname")),
        ("lastname", text(resource, "lastname")),
        ("email", text(resource, "email")),
        ("phone", text(resource, "phone")),
        ("address1", text(resource, "address1")),
        ("zipcode", text(resource, "zipcode")),
        ("city", text(resource, "city")),
        ("country", text(resource, "country")),
        ("customer_id", text(resource, "customer_id")),
        ("tax_number", text(resource, "tax_number")),
        ("chamber_of_commerce", text(resource, "chamber_of_commerce")),
        ("sepa_active", flag(resource, "sepa_active")),
    ]))
}

/// Moneybird rejects contacts without a company or person name, so such
/// rows are not pushed.
fn serialize_contact(_txn: &DbTransaction, record: &LocalRecord) -> Result<Option<Resource>> {
    let named = ["company_name", "firstname", "lastname"]
        .iter()
        .any(|name| record.get(name).is_some());
    if !named {
        return Ok(None);
    }
    Ok(Some(payload([
        ("company_name", column(record, "company_name")),
        ("firstname", column(record, "firstname")),
        ("lastname", column(record, "lastname")),
        ("send_invoices_to_email", column(record, "email")),
        ("send_estimates_to_email", column(record, "email")),
        ("phone", column(record, "phone")),
        ("address1", column(record, "address1")),
        ("zipcode", column(record, "zipcode")),
        ("city", column(record, "city")),
        ("country", column(record, "country")),
        ("tax_number", column(record, "tax_number")),
        ("chamber_of_commerce", column(record, "chamber_of_commerce")),
    ])))
}
