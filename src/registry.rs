use crate::db::LocalRecord;
use crate::resource_type::ResourceType;

/// Ordered set of resource types. Registration order is sync order, so types
/// that are referenced by others should come first.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resource_types: Vec<ResourceType>,
}

impl Registry {
    pub fn new(resource_types: Vec<ResourceType>) -> Self {
        Self { resource_types }
    }

    pub fn register(&mut self, resource_type: ResourceType) {
        self.resource_types.push(resource_type);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceType> {
        self.resource_types.iter()
    }

    pub fn synchronizable(&self) -> impl Iterator<Item = &ResourceType> {
        self.resource_types.iter().filter(|rt| rt.synchronizable)
    }

    /// The type stored in `table`. Shared tables also need the scope value,
    /// e.g. `for_table("journal_documents", Some("PI"))`.
    pub fn for_table(&self, table: &str, scope_value: Option<&str>) -> Option<&ResourceType> {
        self.resource_types
            .iter()
            .find(|rt| rt.table == table && rt.scope.map(|(_, value)| value) == scope_value)
    }

    /// The type a row of `table` belongs to, reading the scope column of
    /// shared tables from the row itself.
    pub fn for_record(&self, table: &str, record: &LocalRecord) -> Option<&ResourceType> {
        self.resource_types
            .iter()
            .find(|rt| rt.table == table && rt.owns(record))
    }

    /// The type whose line items live in `table`. Line tables shared by
    /// several document kinds need the parent's scope value.
    pub fn for_document_lines_table(
        &self,
        table: &str,
        scope_value: Option<&str>,
    ) -> Option<&ResourceType> {
        self.resource_types.iter().find(|rt| {
            rt.document_lines.is_some_and(|lines| lines.table == table)
                && rt.scope.map(|(_, value)| value) == scope_value
        })
    }

    pub fn for_entity_type(&self, entity_type: &str) -> Option<&ResourceType> {
        self.resource_types
            .iter()
            .find(|rt| rt.entity_type == entity_type)
    }

    pub fn len(&self) -> usize {
        self.resource_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting;

    #[test]
    fn lookups() {
        let registry = accounting::registry();

        let purchase = registry.for_table("journal_documents", Some("PI"));
        assert_eq!(purchase.map(|rt| rt.entity_type), Some("PurchaseInvoice"));
        assert!(registry.for_table("journal_documents", None).is_none());
        assert_eq!(
            registry.for_table("contacts", None).map(|rt| rt.api_path),
            Some("contacts")
        );
        assert!(registry.for_table("no_such_table", None).is_none());

        assert_eq!(
            registry.for_entity_type("GeneralJournalDocument").map(|rt| rt.api_path),
            Some("documents/general_journal_documents")
        );
        assert!(registry.for_entity_type("Estimate").is_none());

        let receipt_lines = registry
            .for_document_lines_table("journal_document_lines", Some("RC"))
            .and_then(|rt| rt.document_lines);
        assert_eq!(receipt_lines.map(|l| l.attributes_name), Some("details_attributes"));
        let journal_lines = registry
            .for_document_lines_table("journal_document_lines", Some("GJ"))
            .and_then(|rt| rt.document_lines);
        assert_eq!(
            journal_lines.map(|l| l.resource_data_name),
            Some("general_journal_document_entries")
        );
        assert!(registry.for_document_lines_table("contacts", None).is_none());
    }

    #[test]
    fn references_come_before_documents() {
        let registry = accounting::registry();
        let position = |entity_type: &str| {
            registry
                .iter()
                .position(|rt| rt.entity_type == entity_type)
                .unwrap_or(usize::MAX)
        };
        assert!(position("LedgerAccount") < position("PurchaseInvoice"));
        assert!(position("Contact") < position("SalesInvoice"));
        assert!(registry.synchronizable().all(|rt| rt.synchronizable));
    }
}
