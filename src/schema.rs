use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Latest schema version this build understands.
pub const SCHEMA_VERSION: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Accounts,
    Transactions,
    Transfers,
    Clients,
    ClientFiles,
    FileExpenses,
    ExtraFees,
    Invoices,
    Products,
    Services,
    ExpenseCategories,
    BusinessConfig,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 13] = [
        Collection::Accounts,
        Collection::Transactions,
        Collection::Transfers,
        Collection::Clients,
        Collection::ClientFiles,
        Collection::FileExpenses,
        Collection::ExtraFees,
        Collection::Invoices,
        Collection::Products,
        Collection::Services,
        Collection::ExpenseCategories,
        Collection::BusinessConfig,
        Collection::Settings,
    ];

    /// Table name backing the collection.
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::Transactions => "transactions",
            Collection::Transfers => "transfers",
            Collection::Clients => "clients",
            Collection::ClientFiles => "client_files",
            Collection::FileExpenses => "file_expenses",
            Collection::ExtraFees => "extra_fees",
            Collection::Invoices => "invoices",
            Collection::Products => "products",
            Collection::Services => "services",
            Collection::ExpenseCategories => "expense_categories",
            Collection::BusinessConfig => "business_config",
            Collection::Settings => "settings",
        }
    }

    /// Secondary indexes declared at the current schema version. Queries
    /// may only name what appears here; everything else is `UnknownIndex`.
    pub fn indexes(self) -> &'static [IndexDef] {
        match self {
            Collection::Transactions => &[
                IndexDef {
                    name: "date",
                    field: "date",
                },
                IndexDef {
                    name: "kind",
                    field: "kind",
                },
                IndexDef {
                    name: "category",
                    field: "category_id",
                },
                IndexDef {
                    name: "account",
                    field: "account_id",
                },
                IndexDef {
                    name: "customer",
                    field: "customer_id",
                },
                IndexDef {
                    name: "vendor",
                    field: "vendor_id",
                },
            ],
            Collection::Transfers => &[
                IndexDef {
                    name: "from_account",
                    field: "from_account_id",
                },
                IndexDef {
                    name: "to_account",
                    field: "to_account_id",
                },
            ],
            Collection::ClientFiles => &[
                IndexDef {
                    name: "client",
                    field: "client_id",
                },
                IndexDef {
                    name: "status",
                    field: "status",
                },
            ],
            Collection::FileExpenses => &[IndexDef {
                name: "file",
                field: "client_file_id",
            }],
            Collection::ExtraFees => &[IndexDef {
                name: "file",
                field: "client_file_id",
            }],
            Collection::Invoices => &[IndexDef {
                name: "status",
                field: "status",
            }],
            Collection::ExpenseCategories => &[IndexDef {
                name: "applicability",
                field: "applicability",
            }],
            Collection::Settings => &[IndexDef {
                name: "key",
                field: "key",
            }],
            _ => &[],
        }
    }

    pub fn index(self, name: &str) -> Option<&'static IndexDef> {
        self.indexes().iter().find(|ix| ix.name == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared secondary index. `name` is the public lookup key, `field`
/// the top-level document field it covers; they differ where the field
/// is a foreign id (`account` covers `account_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub field: &'static str,
}

impl IndexDef {
    pub fn sql_name(&self, collection: Collection) -> String {
        format!("idx_{}_{}", collection.as_str(), self.name)
    }

    pub fn json_path(&self) -> String {
        format!("$.{}", self.field)
    }
}

pub type TransformFn = fn(&mut Map<String, Value>) -> bool;

/// One declarative unit of schema change. Steps for a version run in
/// declaration order inside the upgrade transaction.
#[derive(Clone, Copy)]
pub enum MigrationStep {
    CreateCollection(Collection),
    CreateIndex {
        collection: Collection,
        name: &'static str,
        field: &'static str,
    },
    DropIndex {
        collection: Collection,
        name: &'static str,
    },
    /// Row-by-row rewrite. `apply` mutates the parsed document and says
    /// whether anything changed; untouched rows are not rewritten.
    Transform {
        collection: Collection,
        name: &'static str,
        apply: TransformFn,
    },
}

impl MigrationStep {
    pub fn collection(&self) -> Collection {
        match self {
            MigrationStep::CreateCollection(c) => *c,
            MigrationStep::CreateIndex { collection, .. } => *collection,
            MigrationStep::DropIndex { collection, .. } => *collection,
            MigrationStep::Transform { collection, .. } => *collection,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            MigrationStep::CreateCollection(c) => format!("create_collection {c}"),
            MigrationStep::CreateIndex {
                collection, name, ..
            } => format!("create_index {collection}.{name}"),
            MigrationStep::DropIndex { collection, name } => {
                format!("drop_index {collection}.{name}")
            }
            MigrationStep::Transform {
                collection, name, ..
            } => format!("transform {collection}.{name}"),
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Ordered steps that move a store from `version - 1` to `version`.
/// Returns an empty slice for versions this build does not know.
pub fn steps_for(version: u32) -> &'static [MigrationStep] {
    match version {
        1 => V1_STEPS,
        2 => V2_STEPS,
        3 => V3_STEPS,
        4 => V4_STEPS,
        _ => &[],
    }
}

// v1: the original ledger. Transactions still carried a credit/debit
// `type` field at this point; its index is dropped again in v4.
static V1_STEPS: &[MigrationStep] = &[
    MigrationStep::CreateCollection(Collection::Accounts),
    MigrationStep::CreateCollection(Collection::Transactions),
    MigrationStep::CreateCollection(Collection::Clients),
    MigrationStep::CreateCollection(Collection::ClientFiles),
    MigrationStep::CreateCollection(Collection::FileExpenses),
    MigrationStep::CreateCollection(Collection::Invoices),
    MigrationStep::CreateCollection(Collection::Settings),
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "date",
        field: "date",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "type",
        field: "type",
    },
    MigrationStep::CreateIndex {
        collection: Collection::ClientFiles,
        name: "client",
        field: "client_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::FileExpenses,
        name: "file",
        field: "client_file_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Settings,
        name: "key",
        field: "key",
    },
];

// v2: catalogue collections and the business profile.
static V2_STEPS: &[MigrationStep] = &[
    MigrationStep::CreateCollection(Collection::Products),
    MigrationStep::CreateCollection(Collection::Services),
    MigrationStep::CreateCollection(Collection::ExpenseCategories),
    MigrationStep::CreateCollection(Collection::BusinessConfig),
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "category",
        field: "category_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "account",
        field: "account_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Invoices,
        name: "status",
        field: "status",
    },
    MigrationStep::CreateIndex {
        collection: Collection::ClientFiles,
        name: "status",
        field: "status",
    },
    MigrationStep::CreateIndex {
        collection: Collection::ExpenseCategories,
        name: "applicability",
        field: "applicability",
    },
];

// v3: inter-account transfers, per-file extra fees, counterparty lookups.
static V3_STEPS: &[MigrationStep] = &[
    MigrationStep::CreateCollection(Collection::Transfers),
    MigrationStep::CreateCollection(Collection::ExtraFees),
    MigrationStep::CreateIndex {
        collection: Collection::Transfers,
        name: "from_account",
        field: "from_account_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Transfers,
        name: "to_account",
        field: "to_account_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::ExtraFees,
        name: "file",
        field: "client_file_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "customer",
        field: "customer_id",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "vendor",
        field: "vendor_id",
    },
    MigrationStep::Transform {
        collection: Collection::Transactions,
        name: "backfill_tag_lists",
        apply: backfill_tag_lists,
    },
];

// v4: the breaking rework. Accounts and the business profile move to
// their enhanced shapes, transaction type becomes kind, and every
// pre-existing collection gains the encrypted marker.
static V4_STEPS: &[MigrationStep] = &[
    MigrationStep::Transform {
        collection: Collection::Accounts,
        name: "enhance_accounts",
        apply: enhance_accounts,
    },
    MigrationStep::Transform {
        collection: Collection::BusinessConfig,
        name: "enhance_business_config",
        apply: enhance_business_config,
    },
    MigrationStep::Transform {
        collection: Collection::Transactions,
        name: "remap_transaction_kind",
        apply: remap_transaction_kind,
    },
    MigrationStep::DropIndex {
        collection: Collection::Transactions,
        name: "type",
    },
    MigrationStep::CreateIndex {
        collection: Collection::Transactions,
        name: "kind",
        field: "kind",
    },
    MigrationStep::Transform {
        collection: Collection::Clients,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::ClientFiles,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::FileExpenses,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::ExtraFees,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::Transfers,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::Invoices,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::Products,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::Services,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::ExpenseCategories,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
    MigrationStep::Transform {
        collection: Collection::Settings,
        name: "mark_unencrypted",
        apply: mark_unencrypted,
    },
];

fn insert_missing(doc: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    if doc.contains_key(key) {
        return false;
    }
    doc.insert(key.to_string(), value);
    true
}

fn backfill_tag_lists(doc: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    for key in ["tags", "attachments"] {
        changed |= insert_missing(doc, key, json!([]));
    }
    changed
}

/// v4 account rework. Legacy rows carried only name/balance and an
/// optional free-text `bank`; unknown details get explicit placeholders
/// so the enhanced shape is total.
fn enhance_accounts(doc: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    let legacy_bank = doc.remove("bank");
    if legacy_bank.is_some() {
        changed = true;
    }
    if !doc.contains_key("bank_name") {
        if let Some(bank) = legacy_bank {
            doc.insert("bank_name".to_string(), bank);
        }
    }
    changed |= insert_missing(doc, "account_type", json!("checking"));
    changed |= insert_missing(doc, "bank_name", json!("Unknown Bank"));
    changed |= insert_missing(doc, "account_number", json!("****0000"));
    changed |= insert_missing(doc, "is_default", json!(false));
    changed |= insert_missing(doc, "is_active", json!(true));
    changed |= insert_missing(doc, "encrypted", json!(false));
    changed
}

/// Rows that exist before the rework belong to a store that was already
/// in use, so they count as onboarded.
fn enhance_business_config(doc: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    changed |= insert_missing(doc, "setup_complete", json!(true));
    if !doc.contains_key("onboarded_at") {
        let created = doc.get("created_at").cloned().unwrap_or(json!(0));
        doc.insert("onboarded_at".to_string(), created);
        changed = true;
    }
    changed |= insert_missing(doc, "business_kind", json!("general"));
    changed |= insert_missing(doc, "business_name", json!("My Business"));
    changed |= insert_missing(doc, "preferences", default_preferences());
    changed |= insert_missing(doc, "encrypted", json!(false));
    changed
}

pub(crate) fn default_preferences() -> Value {
    json!({
        "currency": "USD",
        "date_format": "YYYY-MM-DD",
        "dark_mode": false,
        "default_tax_rate_bps": 0,
    })
}

/// credit/debit becomes income/expense; anything unrecognised lands on
/// expense so sums stay conservative.
fn remap_transaction_kind(doc: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    let legacy = doc.remove("type");
    if legacy.is_some() {
        changed = true;
    }
    if !doc.contains_key("kind") {
        let kind = match legacy.as_ref().and_then(Value::as_str) {
            Some("credit") => "income",
            _ => "expense",
        };
        doc.insert("kind".to_string(), json!(kind));
        changed = true;
    }
    changed |= insert_missing(doc, "encrypted", json!(false));
    changed
}

fn mark_unencrypted(doc: &mut Map<String, Value>) -> bool {
    insert_missing(doc, "encrypted", json!(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn step_counts_are_pinned() {
        assert_eq!(steps_for(1).len(), 12);
        assert_eq!(steps_for(2).len(), 9);
        assert_eq!(steps_for(3).len(), 8);
        assert_eq!(steps_for(4).len(), 15);
        assert_eq!(steps_for(5).len(), 0);
        assert_eq!(steps_for(0).len(), 0);
    }

    #[test]
    fn every_collection_is_created_exactly_once() {
        for collection in Collection::ALL {
            let created: usize = (1..=SCHEMA_VERSION)
                .flat_map(steps_for)
                .filter(|step| {
                    matches!(step, MigrationStep::CreateCollection(c) if *c == collection)
                })
                .count();
            assert_eq!(created, 1, "{collection} created {created} times");
        }
    }

    #[test]
    fn current_index_view_omits_dropped_type_index() {
        assert!(Collection::Transactions.index("kind").is_some());
        assert!(Collection::Transactions.index("type").is_none());
        let ix = Collection::Transactions.index("account").unwrap();
        assert_eq!(ix.field, "account_id");
        assert_eq!(ix.sql_name(Collection::Transactions), "idx_transactions_account");
        assert_eq!(ix.json_path(), "$.account_id");
    }

    #[test]
    fn enhance_accounts_moves_bank_and_fills_placeholders() {
        let mut legacy = doc(json!({
            "id": "a1",
            "name": "Main",
            "balance": 1200,
            "bank": "First National",
            "created_at": 1,
            "updated_at": 1,
        }));
        assert!(enhance_accounts(&mut legacy));
        assert!(legacy.get("bank").is_none());
        assert_eq!(legacy["bank_name"], json!("First National"));
        assert_eq!(legacy["account_type"], json!("checking"));
        assert_eq!(legacy["account_number"], json!("****0000"));
        assert_eq!(legacy["is_default"], json!(false));
        assert_eq!(legacy["is_active"], json!(true));
        assert_eq!(legacy["encrypted"], json!(false));
        // Second pass finds nothing left to do.
        assert!(!enhance_accounts(&mut legacy));
    }

    #[test]
    fn enhance_accounts_uses_placeholder_when_bank_missing() {
        let mut legacy = doc(json!({ "id": "a2", "name": "Spare", "balance": 0 }));
        assert!(enhance_accounts(&mut legacy));
        assert_eq!(legacy["bank_name"], json!("Unknown Bank"));
    }

    #[test]
    fn enhance_business_config_marks_existing_rows_onboarded() {
        let mut legacy = doc(json!({
            "id": "bc1",
            "business_name": "Bloom Legal",
            "created_at": 777,
            "updated_at": 777,
        }));
        assert!(enhance_business_config(&mut legacy));
        assert_eq!(legacy["setup_complete"], json!(true));
        assert_eq!(legacy["onboarded_at"], json!(777));
        assert_eq!(legacy["business_kind"], json!("general"));
        assert_eq!(legacy["business_name"], json!("Bloom Legal"));
        assert!(legacy["preferences"].is_object());
        assert!(!enhance_business_config(&mut legacy));
    }

    #[test]
    fn remap_transaction_kind_translates_and_drops_legacy_field() {
        let mut credit = doc(json!({ "id": "t1", "type": "credit", "amount": 5 }));
        assert!(remap_transaction_kind(&mut credit));
        assert_eq!(credit["kind"], json!("income"));
        assert!(credit.get("type").is_none());

        let mut debit = doc(json!({ "id": "t2", "type": "debit", "amount": 5 }));
        assert!(remap_transaction_kind(&mut debit));
        assert_eq!(debit["kind"], json!("expense"));

        let mut odd = doc(json!({ "id": "t3", "type": "mystery", "amount": 5 }));
        assert!(remap_transaction_kind(&mut odd));
        assert_eq!(odd["kind"], json!("expense"));

        let mut modern = doc(json!({ "id": "t4", "kind": "income", "amount": 5, "encrypted": false }));
        assert!(!remap_transaction_kind(&mut modern));
    }

    #[test]
    fn backfill_tag_lists_is_idempotent() {
        let mut legacy = doc(json!({ "id": "t1", "amount": 5 }));
        assert!(backfill_tag_lists(&mut legacy));
        assert_eq!(legacy["tags"], json!([]));
        assert_eq!(legacy["attachments"], json!([]));
        assert!(!backfill_tag_lists(&mut legacy));
    }
}
