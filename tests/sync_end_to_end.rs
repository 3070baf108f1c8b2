use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use moneybird_mirror::accounting::{self, journal};
use moneybird_mirror::administration::{Administration, MockAdministration};
use moneybird_mirror::sync::{SyncConfig, SyncEngine, SyncOutcome};
use moneybird_mirror::AdministrationError;
use serde::Deserialize;
use serde_json::{json, Value};

fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn purchase_invoice_administration() -> Result<MockAdministration> {
    let administration = MockAdministration::new();
    administration.insert(
        "documents/purchase_invoices",
        json!({
            "id": "1",
            "version": 3,
            "reference": "2023-0001",
            "date": "2023-02-01",
            "contact_id": "77",
            "total_price_incl_tax_base": "121.0",
            "details": [
                {"id": "101", "description": "Strings", "amount": "1 x", "price": "40.0", "ledger_account_id": "10"},
                {"id": "102", "description": "Rosin", "amount": "2 x", "price": "30.0", "ledger_account_id": "5"}
            ]
        }),
    )?;
    administration.insert("ledger_accounts", json!({"id": "10", "name": "Purchases"}))?;
    administration.insert("ledger_accounts", json!({"id": "5", "name": "Inventory"}))?;
    administration.insert("contacts", json!({"id": "77", "version": 1, "company_name": "Strings BV"}))?;
    Ok(administration)
}

fn engine(administration: Arc<dyn Administration>) -> Result<SyncEngine> {
    SyncEngine::builder()
        .administration(administration)
        .db(accounting::open_memory_database()?)
        .registry(accounting::registry())
        .config(SyncConfig::default())
        .build()
}

#[derive(Debug, PartialEq, Deserialize)]
struct DocumentRow {
    id: i64,
    moneybird_id: Option<String>,
    moneybird_version: Option<i64>,
    document_kind: String,
    reference: Option<String>,
    total_price: Option<String>,
}

#[derive(Debug, PartialEq, Deserialize)]
struct LineRow {
    moneybird_id: Option<String>,
    description: Option<String>,
    ledger_account: Option<String>,
    ledger_account_name: Option<String>,
}

fn documents(engine: &SyncEngine) -> Result<Vec<DocumentRow>> {
    engine.db().query(
        "SELECT id, moneybird_id, moneybird_version, document_kind, reference, total_price
         FROM journal_documents ORDER BY id",
        (),
    )
}

fn lines(engine: &SyncEngine) -> Result<Vec<LineRow>> {
    engine.db().query(
        "SELECT l.moneybird_id, l.description, a.moneybird_id AS ledger_account, a.name AS ledger_account_name
         FROM journal_document_lines l LEFT JOIN ledger_accounts a ON a.id = l.ledger_account_id
         ORDER BY l.moneybird_id",
        (),
    )
}

#[test]
fn purchase_invoice_with_lines() -> Result<()> {
    init_logging();
    let administration = purchase_invoice_administration()?;
    let engine = engine(Arc::new(administration.clone()))?;

    let outcome = engine.perform_sync()?;
    let report = outcome.report().cloned().unwrap_or_default();
    assert_eq!(report.for_entity_type("PurchaseInvoice").map(|r| r.created), Some(1));
    assert_eq!(report.total().skipped, 0);

    let documents = documents(&engine)?;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].moneybird_id.as_deref(), Some("1"));
    assert_eq!(documents[0].moneybird_version, Some(3));
    assert_eq!(documents[0].document_kind, journal::PURCHASE_INVOICE);
    assert_eq!(documents[0].total_price.as_deref(), Some("121.0"));

    let lines = lines(&engine)?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].ledger_account.as_deref(), Some("10"));
    assert_eq!(lines[0].ledger_account_name.as_deref(), Some("Purchases"));
    assert_eq!(lines[1].ledger_account.as_deref(), Some("5"));
    assert_eq!(lines[1].ledger_account_name.as_deref(), Some("Inventory"));

    let ledger_accounts = engine
        .db()
        .transaction(|t| t.moneybird_ids("ledger_accounts", None))?;
    assert_eq!(ledger_accounts.len(), 2);
    Ok(())
}

#[test]
fn references_to_unsynced_resources_get_placeholders() -> Result<()> {
    init_logging();
    let administration = purchase_invoice_administration()?;
    administration.remove("ledger_accounts", "5")?;
    let engine = SyncEngine::builder()
        .administration(Arc::new(administration))
        .registry(moneybird_mirror::Registry::new(vec![journal::purchase_invoices()]))
        .build()?;

    engine.perform_sync()?;
    let lines = lines(&engine)?;
    assert_eq!(lines[1].ledger_account.as_deref(), Some("5"));
    assert_eq!(lines[1].ledger_account_name, None);
    Ok(())
}

#[test]
fn second_pass_is_a_no_op() -> Result<()> {
    init_logging();
    let administration = purchase_invoice_administration()?;
    let engine = engine(Arc::new(administration.clone()))?;
    engine.perform_sync()?;
    let documents_before = documents(&engine)?;
    let lines_before = lines(&engine)?;

    administration.clear_requests()?;
    let outcome = engine.perform_sync()?;
    let report = outcome.report().cloned().unwrap_or_default();
    let purchase = report.for_entity_type("PurchaseInvoice").copied().unwrap_or_default();
    assert!(purchase.is_empty());

    assert_eq!(documents(&engine)?, documents_before);
    assert_eq!(lines(&engine)?, lines_before);
    let fetches = administration
        .requests()?
        .into_iter()
        .filter(|r| r.method == "POST")
        .count();
    assert_eq!(fetches, 0);
    Ok(())
}

#[test]
fn remote_edits_flow_into_lines() -> Result<()> {
    init_logging();
    let administration = purchase_invoice_administration()?;
    let engine = engine(Arc::new(administration.clone()))?;
    engine.perform_sync()?;

    administration.insert(
        "documents/purchase_invoices",
        json!({
            "id": "1",
            "version": 4,
            "date": "2023-02-01",
            "details": [
                {"id": "102", "description": "Rosin, dark", "ledger_account_id": "5"},
                {"id": "103", "description": "Bridge", "ledger_account_id": "10"}
            ]
        }),
    )?;
    engine.perform_sync()?;

    let descriptions: Vec<(Option<String>, Option<String>)> = lines(&engine)?
        .into_iter()
        .map(|l| (l.moneybird_id, l.description))
        .collect();
    assert_eq!(
        descriptions,
        vec![
            (Some("102".to_string()), Some("Rosin, dark".to_string())),
            (Some("103".to_string()), Some("Bridge".to_string())),
        ]
    );
    let document_rows = documents(&engine)?;
    assert_eq!(document_rows[0].moneybird_version, Some(4));
    assert_eq!(document_rows[0].reference, None);

    administration.remove("documents/purchase_invoices", "1")?;
    engine.perform_sync()?;
    assert!(documents(&engine)?.is_empty());
    assert!(lines(&engine)?.is_empty());
    Ok(())
}

/// Holds the first listing request until released.
struct GatedAdministration {
    inner: MockAdministration,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Receiver<()>>,
}

impl Administration for GatedAdministration {
    fn get(&self, resource_path: &str) -> Result<Value, AdministrationError> {
        let entered = self.entered.lock().ok().and_then(|mut e| e.take());
        if let Some(entered) = entered {
            let _ = entered.send(());
            if let Ok(release) = self.release.lock() {
                let _ = release.recv();
            }
        }
        self.inner.get(resource_path)
    }

    fn post(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError> {
        self.inner.post(resource_path, data)
    }

    fn patch(&self, resource_path: &str, data: &Value) -> Result<Value, AdministrationError> {
        self.inner.patch(resource_path, data)
    }

    fn delete(&self, resource_path: &str) -> Result<Option<Value>, AdministrationError> {
        self.inner.delete(resource_path)
    }
}

#[test]
fn concurrent_pass_returns_busy() -> Result<()> {
    init_logging();
    let inner = purchase_invoice_administration()?;
    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel();
    let gated = GatedAdministration {
        inner: inner.clone(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    };
    let engine = Arc::new(engine(Arc::new(gated))?);

    let background = {
        let engine = engine.clone();
        thread::spawn(move || engine.perform_sync())
    };
    entered_rx.recv()?;

    let requests_before = inner.requests()?.len();
    assert_eq!(engine.perform_sync()?, SyncOutcome::Busy);
    assert!(documents(&engine)?.is_empty());
    assert_eq!(inner.requests()?.len(), requests_before);

    release_tx.send(())?;
    let outcome = background
        .join()
        .map_err(|_| anyhow::anyhow!("sync thread panicked"))??;
    assert!(matches!(outcome, SyncOutcome::Finished(_)));
    assert_eq!(documents(&engine)?.len(), 1);

    assert!(matches!(engine.perform_sync()?, SyncOutcome::Finished(_)));
    Ok(())
}

#[test]
fn full_sync_restores_local_edits() -> Result<()> {
    init_logging();
    let administration = purchase_invoice_administration()?;
    let engine = engine(Arc::new(administration))?;
    engine.perform_sync()?;
    engine.db().transaction(|t| {
        t.connection()
            .execute("UPDATE journal_documents SET reference = 'edited'", [])?;
        Ok(())
    })?;

    engine.perform_sync()?;
    assert_eq!(documents(&engine)?[0].reference.as_deref(), Some("edited"));

    engine.full_sync()?;
    assert_eq!(documents(&engine)?[0].reference.as_deref(), Some("2023-0001"));
    Ok(())
}
