mod util;

use anyhow::Result;
use tallybook::model::{Account, AccountPatch};
use tallybook::{rules, StoreError, StoreResult};

fn expect_violation<T: std::fmt::Debug>(result: StoreResult<T>, rule: &str) {
    match result {
        Err(StoreError::ConstraintViolation { rule: got, .. }) => {
            assert_eq!(got, rule, "wrong rule tripped");
        }
        other => panic!("expected `{rule}` violation, got {other:?}"),
    }
}

fn default_account(name: &str) -> Account {
    let mut account = util::checking_account(name);
    account.is_default = true;
    account
}

#[tokio::test]
async fn only_one_account_can_be_default() -> Result<()> {
    let store = util::memory_store().await;

    let holder = store.add(default_account("Main")).await?;
    expect_violation(
        store.add(default_account("Rival")).await,
        rules::ACCOUNT_DEFAULT_UNIQUE,
    );

    let rival = store.add(util::checking_account("Rival")).await?;
    let claim = AccountPatch {
        is_default: Some(true),
        ..AccountPatch::default()
    };
    expect_violation(
        store.update(&rival, claim).await,
        rules::ACCOUNT_DEFAULT_UNIQUE,
    );

    // The holder may reassert its own flag.
    let reassert = AccountPatch {
        is_default: Some(true),
        ..AccountPatch::default()
    };
    store.update(&holder, reassert).await?;

    let stored: Account = store.require(&holder).await?;
    assert!(stored.is_default);
    Ok(())
}

#[tokio::test]
async fn set_default_account_moves_the_flag_atomically() -> Result<()> {
    let store = util::memory_store().await;

    let old = store.add(default_account("Old")).await?;
    let new = store.add(util::checking_account("New")).await?;

    store.set_default_account(&new).await?;

    let old_stored: Account = store.require(&old).await?;
    let new_stored: Account = store.require(&new).await?;
    assert!(!old_stored.is_default);
    assert!(new_stored.is_default);

    // Re-picking the current default changes nothing and stays silent.
    let before = store.revision();
    store.set_default_account(&new).await?;
    assert_eq!(store.revision(), before);

    assert!(matches!(
        store.set_default_account("no-such-account").await,
        Err(StoreError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn deleting_the_default_account_leaves_no_default() -> Result<()> {
    let store = util::memory_store().await;

    let first = store.add(default_account("First")).await?;
    let second = store.add(util::checking_account("Second")).await?;

    store.delete::<Account>(&first).await?;
    assert!(store.get::<Account>(&first).await?.is_none());

    // No successor is picked; the flag must be handed out explicitly.
    let remaining: Vec<Account> = store.get_all().await?;
    assert!(remaining.iter().all(|a| !a.is_default));

    store.set_default_account(&second).await?;
    let stored: Account = store.require(&second).await?;
    assert!(stored.is_default);
    Ok(())
}

#[tokio::test]
async fn account_numbers_must_be_masked_or_empty() -> Result<()> {
    let store = util::memory_store().await;

    let mut raw = util::checking_account("Leaky");
    raw.account_number = "12345678".to_string();
    expect_violation(store.add(raw).await, rules::ACCOUNT_NUMBER_MASK);

    let mut odd = util::checking_account("Odd");
    odd.account_number = "acct-1".to_string();
    expect_violation(store.add(odd).await, rules::ACCOUNT_NUMBER_MASK);

    let mut blank = util::checking_account("Blank");
    blank.account_number = String::new();
    let blank_id = store.add(blank).await?;

    let masked = store.add(util::checking_account("Masked")).await?;
    let stored: Account = store.require(&masked).await?;
    assert_eq!(stored.account_number, "****0421");

    let relabel = AccountPatch {
        account_number: Some("1234".to_string()),
        ..AccountPatch::default()
    };
    expect_violation(
        store.update(&blank_id, relabel).await,
        rules::ACCOUNT_NUMBER_MASK,
    );

    let remask = AccountPatch {
        account_number: Some("**** 0099".to_string()),
        ..AccountPatch::default()
    };
    store.update(&blank_id, remask).await?;
    Ok(())
}

#[tokio::test]
async fn opening_balance_is_honoured_on_add() -> Result<()> {
    let store = util::memory_store().await;

    let mut seeded = util::checking_account("Seeded");
    seeded.balance = 150_000;
    let id = store.add(seeded).await?;

    let stored: Account = store.require(&id).await?;
    assert_eq!(stored.balance, 150_000);
    Ok(())
}
