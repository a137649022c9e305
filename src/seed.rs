use sqlx::SqliteConnection;
use tracing::info;

use crate::error::StoreResult;
use crate::model::{
    Account, AccountKind, Applicability, BusinessKind, Client, ClientFile, ExpenseCategory,
    FileStatus, RecordMeta,
};
use crate::repo;
use crate::schema::Collection;

/// What the seeder actually inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub categories: u32,
    pub accounts: u32,
    pub clients: u32,
    pub client_files: u32,
}

impl SeedReport {
    pub fn seeded_anything(&self) -> bool {
        self.categories + self.accounts + self.clients + self.client_files > 0
    }
}

/// The fixed default category catalogue. Every row is tagged with the
/// business kind it applies to; display-side filtering does the rest.
pub fn default_expense_categories() -> Vec<ExpenseCategory> {
    const CATALOGUE: &[(&str, Applicability)] = &[
        ("Office Supplies", Applicability::General),
        ("Rent & Utilities", Applicability::Both),
        ("Marketing", Applicability::General),
        ("Software & Subscriptions", Applicability::Both),
        ("Travel", Applicability::Both),
        ("Insurance", Applicability::Both),
        ("Professional Fees", Applicability::Both),
        ("Court Filing Fees", Applicability::Legal),
        ("Expert Witnesses", Applicability::Legal),
        ("Process Servers", Applicability::Legal),
        ("Legal Research", Applicability::Legal),
        ("Deposition Costs", Applicability::Legal),
    ];
    CATALOGUE
        .iter()
        .map(|(name, applicability)| ExpenseCategory {
            meta: RecordMeta::default(),
            name: (*name).to_string(),
            applicability: *applicability,
            is_default: true,
        })
        .collect()
}

/// Fill still-empty collections with their defaults, inside the
/// caller's transaction. The category catalogue is kind-agnostic and
/// always eligible; profile-shaped defaults (account, sample clients)
/// only make sense once a business profile exists, so they wait for
/// `kind` to be known.
pub(crate) async fn seed_defaults(
    conn: &mut SqliteConnection,
    kind: Option<BusinessKind>,
) -> StoreResult<SeedReport> {
    let mut report = SeedReport::default();

    if repo::count(conn, Collection::ExpenseCategories).await? == 0 {
        report.categories = insert_category_catalogue(conn, None).await?.len() as u32;
    }

    if let Some(kind) = kind {
        if repo::count(conn, Collection::Accounts).await? == 0 {
            insert_default_account(conn).await?;
            report.accounts = 1;
        }
        if kind == BusinessKind::Legal && repo::count(conn, Collection::Clients).await? == 0 {
            let (clients, files) = insert_sample_clients(conn).await?;
            report.clients = clients.len() as u32;
            report.client_files = files.len() as u32;
        }
    }

    if report.seeded_anything() {
        info!(
            target: "tallybook",
            event = "defaults_seeded",
            categories = report.categories,
            accounts = report.accounts,
            clients = report.clients,
            client_files = report.client_files
        );
    }
    Ok(report)
}

/// Insert the catalogue, optionally scoped to one business kind.
pub(crate) async fn insert_category_catalogue(
    conn: &mut SqliteConnection,
    scope: Option<BusinessKind>,
) -> StoreResult<Vec<String>> {
    let mut inserted = Vec::new();
    for category in default_expense_categories() {
        if let Some(kind) = scope {
            if !category.applicability.covers(kind) {
                continue;
            }
        }
        let mut doc = repo::doc_of(&category)?;
        inserted.push(repo::insert_doc(conn, Collection::ExpenseCategories, &mut doc).await?);
    }
    Ok(inserted)
}

pub(crate) async fn insert_default_account(conn: &mut SqliteConnection) -> StoreResult<String> {
    let account = Account {
        meta: RecordMeta::default(),
        name: "Cash".to_string(),
        account_type: AccountKind::Cash,
        account_number: String::new(),
        bank_name: String::new(),
        balance: 0,
        is_default: true,
        is_active: true,
    };
    let mut doc = repo::doc_of(&account)?;
    repo::insert_doc(conn, Collection::Accounts, &mut doc).await
}

/// Sample clients for a legal practice. Ordinary records; users edit or
/// delete them like their own.
pub(crate) async fn insert_sample_clients(
    conn: &mut SqliteConnection,
) -> StoreResult<(Vec<String>, Vec<String>)> {
    let samples = [
        (
            "Acme Holdings LLC",
            "billing@acmeholdings.example",
            "Contract Review",
            150_000,
            50_000,
        ),
        (
            "Harriet Bloom",
            "harriet.bloom@example.com",
            "Estate Planning",
            80_000,
            80_000,
        ),
    ];
    let mut clients = Vec::new();
    let mut files = Vec::new();
    for (name, email, title, fees, deposit) in samples {
        let client = Client {
            meta: RecordMeta::default(),
            name: name.to_string(),
            email: email.to_string(),
            phone: String::new(),
            address: String::new(),
            outstanding_fees: 0,
            funds_held: 0,
        };
        let mut client_doc = repo::doc_of(&client)?;
        let client_id = repo::insert_doc(conn, Collection::Clients, &mut client_doc).await?;
        clients.push(client_id.clone());

        let file = ClientFile {
            meta: RecordMeta::default(),
            client_id: client_id.clone(),
            title: title.to_string(),
            status: FileStatus::Active,
            fees_to_be_paid: fees,
            deposit_paid: deposit,
            total_expenses: 0,
            total_extra_fees: 0,
            total_fees_charged: 0,
            total_paid: 0,
            balance_remaining: 0,
            net_summary: 0,
        };
        let mut file_doc = repo::doc_of(&file)?;
        let file_id = repo::insert_doc(conn, Collection::ClientFiles, &mut file_doc).await?;
        crate::derived::recompute_client_file(conn, &file_id).await?;
        files.push(file_id);
    }
    Ok((clients, files))
}
