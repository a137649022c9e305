use serde::{Deserialize, Serialize};

use super::{Patch, Record, RecordMeta};
use crate::schema::Collection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    /// Rollups over the client's non-closed files; recomputed by the
    /// store, never accepted from callers.
    #[serde(default)]
    pub outstanding_fees: i64,
    #[serde(default)]
    pub funds_held: i64,
}

impl Record for Client {
    const COLLECTION: Collection = Collection::Clients;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Patch for ClientPatch {
    type Record = Client;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Pending,
    Closed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Pending => "pending",
            FileStatus::Closed => "closed",
        }
    }
}

fn default_active() -> FileStatus {
    FileStatus::Active
}

/// One engagement for a client. The derived block after `deposit_paid`
/// is recomputed inside every write that can affect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFile {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub client_id: String,
    pub title: String,
    #[serde(default = "default_active")]
    pub status: FileStatus,
    /// Agreed fee for the engagement, minor units.
    #[serde(default)]
    pub fees_to_be_paid: i64,
    #[serde(default)]
    pub deposit_paid: i64,
    #[serde(default)]
    pub total_expenses: i64,
    #[serde(default)]
    pub total_extra_fees: i64,
    #[serde(default)]
    pub total_fees_charged: i64,
    #[serde(default)]
    pub total_paid: i64,
    #[serde(default)]
    pub balance_remaining: i64,
    #[serde(default)]
    pub net_summary: i64,
}

impl Record for ClientFile {
    const COLLECTION: Collection = Collection::ClientFiles;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientFilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees_to_be_paid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_paid: Option<i64>,
}

impl Patch for ClientFilePatch {
    type Record = ClientFile;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileExpense {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub client_file_id: String,
    /// Non-negative minor units.
    pub amount: i64,
    pub date: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Billable back to the client.
    #[serde(default)]
    pub reimbursable: bool,
}

impl Record for FileExpense {
    const COLLECTION: Collection = Collection::FileExpenses;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileExpensePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reimbursable: Option<bool>,
}

impl Patch for FileExpensePatch {
    type Record = FileExpense;
}

/// Surcharge on a file over and above the agreed fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraFee {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub client_file_id: String,
    /// Non-negative minor units.
    pub amount: i64,
    pub date: i64,
    #[serde(default)]
    pub description: String,
}

impl Record for ExtraFee {
    const COLLECTION: Collection = Collection::ExtraFees;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtraFeePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Patch for ExtraFeePatch {
    type Record = ExtraFee;
}
