mod banking;
mod billing;
mod clients;
mod config;

pub use banking::{
    Account, AccountKind, AccountPatch, Transaction, TransactionKind, TransactionPatch, Transfer,
    TransferPatch, TransferStatus,
};
pub use billing::{
    Invoice, InvoiceLine, InvoicePatch, InvoiceStatus, Product, ProductPatch, Service,
    ServicePatch,
};
pub use clients::{
    Client, ClientFile, ClientFilePatch, ClientPatch, ExtraFee, ExtraFeePatch, FileExpense,
    FileExpensePatch, FileStatus,
};
pub use config::{
    Applicability, BusinessConfig, BusinessConfigPatch, BusinessKind, BusinessPreferences,
    ExpenseCategory, ExpenseCategoryPatch, Setting, SettingPatch,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::schema::Collection;

/// Bookkeeping fields shared by every stored record, flattened into the
/// document alongside the entity's own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    /// Reserved at-rest marker; nothing sets it yet.
    #[serde(default)]
    pub encrypted: bool,
}

/// A stored entity. `COLLECTION` ties the type to its table; `meta` is
/// stamped by the store on add and maintained on update.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    const COLLECTION: Collection;

    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;
}

/// Sparse update for one record type. `None` fields stay untouched;
/// serialization skips them so the merge only sees what changed.
/// Double-wrapped options clear a field by serializing an explicit null.
pub trait Patch: Serialize + Send {
    type Record: Record;
}
