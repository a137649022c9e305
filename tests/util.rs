#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use tallybook::model::{
    Account, AccountKind, Client, ClientFile, ExtraFee, FileExpense, FileStatus, RecordMeta,
    Transaction, TransactionKind, Transfer, TransferStatus,
};
use tallybook::Store;

pub async fn memory_store() -> Store {
    Store::open_in_memory().await.expect("open in-memory store")
}

pub fn checking_account(name: &str) -> Account {
    Account {
        meta: RecordMeta::default(),
        name: name.to_string(),
        account_type: AccountKind::Checking,
        account_number: "****0421".to_string(),
        bank_name: "Harbour Mutual".to_string(),
        balance: 0,
        is_default: false,
        is_active: true,
    }
}

pub fn income(account_id: &str, amount: i64, date: i64) -> Transaction {
    transaction(TransactionKind::Income, Some(account_id), amount, date)
}

pub fn expense(account_id: &str, amount: i64, date: i64) -> Transaction {
    transaction(TransactionKind::Expense, Some(account_id), amount, date)
}

/// Income tied to a client file but no bank account.
pub fn file_payment(file_id: &str, amount: i64, date: i64) -> Transaction {
    let mut tx = transaction(TransactionKind::Income, None, amount, date);
    tx.client_file_id = Some(file_id.to_string());
    tx
}

/// Income tied to nothing at all, handy for null-field index queries.
pub fn loose_income(amount: i64, date: i64) -> Transaction {
    transaction(TransactionKind::Income, None, amount, date)
}

fn transaction(
    kind: TransactionKind,
    account_id: Option<&str>,
    amount: i64,
    date: i64,
) -> Transaction {
    Transaction {
        meta: RecordMeta::default(),
        kind,
        amount,
        date,
        description: String::new(),
        account_id: account_id.map(str::to_string),
        category_id: None,
        subcategory: None,
        customer_id: None,
        vendor_id: None,
        product_id: None,
        service_id: None,
        client_id: None,
        client_file_id: None,
        tags: Vec::new(),
        attachments: Vec::new(),
    }
}

pub fn transfer(from: &str, to: &str, amount: i64, date: i64) -> Transfer {
    Transfer {
        meta: RecordMeta::default(),
        from_account_id: from.to_string(),
        to_account_id: to.to_string(),
        amount,
        date,
        description: String::new(),
        status: TransferStatus::Completed,
    }
}

pub fn client(name: &str) -> Client {
    Client {
        meta: RecordMeta::default(),
        name: name.to_string(),
        email: String::new(),
        phone: String::new(),
        address: String::new(),
        outstanding_fees: 0,
        funds_held: 0,
    }
}

pub fn client_file(client_id: &str, title: &str, fees: i64, deposit: i64) -> ClientFile {
    ClientFile {
        meta: RecordMeta::default(),
        client_id: client_id.to_string(),
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
    }
}

pub fn file_expense(file_id: &str, amount: i64, date: i64) -> FileExpense {
    FileExpense {
        meta: RecordMeta::default(),
        client_file_id: file_id.to_string(),
        amount,
        date,
        description: String::new(),
        category_id: None,
        reimbursable: false,
    }
}

pub fn extra_fee(file_id: &str, amount: i64, date: i64) -> ExtraFee {
    ExtraFee {
        meta: RecordMeta::default(),
        client_file_id: file_id.to_string(),
        amount,
        date,
        description: String::new(),
    }
}
