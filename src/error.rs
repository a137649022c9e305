use crate::schema::Collection;
use thiserror::Error;

/// Stable rule identifiers carried by [`StoreError::ConstraintViolation`].
///
/// Callers match on these instead of parsing messages.
pub mod rules {
    pub const AMOUNT_NEGATIVE: &str = "amount/negative";
    pub const ACCOUNT_DEFAULT_UNIQUE: &str = "account/default_unique";
    pub const ACCOUNT_NUMBER_MASK: &str = "account/number_mask";
    pub const TRANSFER_SAME_ACCOUNT: &str = "transfer/same_account";
    pub const TRANSFER_AMOUNT_POSITIVE: &str = "transfer/amount_positive";
    pub const COUNTERPARTY_EXCLUSIVE: &str = "transaction/counterparty_exclusive";
    pub const ITEM_LINK_EXCLUSIVE: &str = "transaction/item_link_exclusive";
    pub const REFERENCE_MISSING: &str = "reference/missing";
    pub const CONFIG_SINGLETON: &str = "business_config/singleton";
    pub const CONFIG_UNDELETABLE: &str = "business_config/undeletable";
    pub const CONFIG_NAME_REQUIRED: &str = "business_config/name_required";
    pub const SCHEMA_AHEAD: &str = "schema/version_ahead";
}

/// Error taxonomy for every fallible store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lookup, update or required fetch addressed an id that does not exist.
    #[error("no record {id} in {collection}")]
    NotFound { collection: Collection, id: String },

    /// A query named an index the schema never declared for that collection.
    #[error("unknown index {index:?} on {collection}")]
    UnknownIndex { collection: Collection, index: String },

    /// A migration step failed and the whole upgrade rolled back.
    #[error("migration to schema v{failed_version} failed; store remains at v{last_good_version}")]
    MigrationFailed {
        last_good_version: u32,
        failed_version: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// An insert collided with an existing primary key.
    #[error("duplicate id {id} in {collection}")]
    DuplicateKey { collection: Collection, id: String },

    /// A domain rule rejected the write. `rule` is one of [`rules`].
    #[error("constraint {rule} violated: {detail}")]
    ConstraintViolation { rule: &'static str, detail: String },

    /// Filesystem trouble while opening or creating the backing file.
    #[error("storage io error")]
    Io(#[from] std::io::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn violation(rule: &'static str, detail: impl Into<String>) -> Self {
        StoreError::ConstraintViolation {
            rule,
            detail: detail.into(),
        }
    }

    /// Classifies an insert failure, turning primary-key collisions into
    /// [`StoreError::DuplicateKey`].
    pub(crate) fn from_insert(err: sqlx::Error, collection: Collection, id: &str) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if code == "1555" || code == "2067" || db.message().contains("UNIQUE constraint failed")
            {
                return StoreError::DuplicateKey {
                    collection,
                    id: id.to_string(),
                };
            }
        }
        StoreError::Database(err)
    }
}
