use futures::FutureExt;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::db;
use crate::error::{rules, StoreError, StoreResult};
use crate::model::{BusinessConfig, BusinessKind, BusinessPreferences, RecordMeta};
use crate::observer::{WriteEvent, WriteOp};
use crate::repo;
use crate::schema::Collection;
use crate::seed;
use crate::time::now_ms;

/// Everything first-run setup produced, for post-commit notification.
#[derive(Debug)]
pub(crate) struct OnboardingOutcome {
    pub profile_id: String,
    pub events: Vec<WriteEvent>,
}

/// Create or refresh the business profile and backfill the collections
/// onboarding owns, all in one transaction. Re-running is safe: the
/// profile is rewritten in place, `onboarded_at` keeps its original
/// value, and only still-empty collections are seeded.
pub(crate) async fn complete_onboarding(
    pool: &SqlitePool,
    kind: BusinessKind,
    name: &str,
) -> StoreResult<OnboardingOutcome> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(StoreError::violation(
            rules::CONFIG_NAME_REQUIRED,
            "business name must not be blank",
        ));
    }

    let outcome = db::run_in_tx(pool, |tx| {
        async move {
            let mut events = Vec::new();

            let existing = repo::first_record::<BusinessConfig>(&mut **tx).await?;
            let profile_id = match existing {
                Some(config) => {
                    let mut doc =
                        repo::require_doc(&mut **tx, Collection::BusinessConfig, &config.meta.id)
                            .await?;
                    doc.insert("business_name".to_string(), Value::from(name.clone()));
                    doc.insert("business_kind".to_string(), Value::from(kind.as_str()));
                    doc.insert("setup_complete".to_string(), Value::Bool(true));
                    if !doc.contains_key("onboarded_at") {
                        doc.insert("onboarded_at".to_string(), Value::from(now_ms()));
                    }
                    repo::update_doc(
                        &mut **tx,
                        Collection::BusinessConfig,
                        &config.meta.id,
                        &mut doc,
                    )
                    .await?;
                    events.push(WriteEvent {
                        collection: Collection::BusinessConfig,
                        op: WriteOp::Updated,
                        id: config.meta.id.clone(),
                    });
                    config.meta.id
                }
                None => {
                    let config = BusinessConfig {
                        meta: RecordMeta::default(),
                        business_name: name.clone(),
                        business_kind: kind,
                        setup_complete: true,
                        onboarded_at: Some(now_ms()),
                        preferences: BusinessPreferences::default(),
                    };
                    let mut doc = repo::doc_of(&config)?;
                    let id = repo::insert_doc(&mut **tx, Collection::BusinessConfig, &mut doc)
                        .await?;
                    events.push(WriteEvent {
                        collection: Collection::BusinessConfig,
                        op: WriteOp::Added,
                        id: id.clone(),
                    });
                    id
                }
            };

            if repo::count(&mut **tx, Collection::Accounts).await? == 0 {
                let id = seed::insert_default_account(&mut **tx).await?;
                events.push(WriteEvent {
                    collection: Collection::Accounts,
                    op: WriteOp::Added,
                    id,
                });
            }

            if repo::count(&mut **tx, Collection::ExpenseCategories).await? == 0 {
                let ids = seed::insert_category_catalogue(&mut **tx, Some(kind)).await?;
                for id in ids {
                    events.push(WriteEvent {
                        collection: Collection::ExpenseCategories,
                        op: WriteOp::Added,
                        id,
                    });
                }
            }

            if kind == BusinessKind::Legal
                && repo::count(&mut **tx, Collection::Clients).await? == 0
            {
                let (client_ids, file_ids) = seed::insert_sample_clients(&mut **tx).await?;
                for id in client_ids {
                    events.push(WriteEvent {
                        collection: Collection::Clients,
                        op: WriteOp::Added,
                        id,
                    });
                }
                for id in file_ids {
                    events.push(WriteEvent {
                        collection: Collection::ClientFiles,
                        op: WriteOp::Added,
                        id,
                    });
                }
            }

            info!(
                target: "tallybook",
                event = "onboarding_complete",
                kind = %kind.as_str(),
                profile_id = %profile_id,
                writes = events.len()
            );
            Ok::<_, StoreError>(OnboardingOutcome { profile_id, events })
        }
        .boxed()
    })
    .await?;
    Ok(outcome)
}
