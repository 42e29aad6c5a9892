//! Entity-creation and publish use cases.
//!
//! Creation allocates the entity, its sync companion, and the domain record
//! inside one storage transaction; validation happens before anything is
//! staged, so a rejected request leaves the store untouched.

use crate::db::{DataStore, StagedWrite};
use crate::error::{Error, Result};
use crate::models::{Account, Entity, EntityId};
use crate::util::normalize_text_option;

/// Input for [`create_account`].
#[derive(Debug, Clone, Default)]
pub struct CreateAccountRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Remote id, when the account already exists server-side. Absent means
    /// the record starts as a local draft.
    pub external_id: Option<String>,
}

/// Create the account record in the open store.
pub async fn create_account(
    store: &mut DataStore,
    request: CreateAccountRequest,
) -> Result<Account> {
    // Rejected before any write: nothing is staged on validation failure.
    let account = Account::new(request.name, request.email, request.phone)?;

    let entity = match normalize_text_option(request.external_id) {
        Some(external_id) => Entity::new_synced(account.id, external_id)?,
        None => Entity::new_local_with_id(account.id),
    };

    store.stage(StagedWrite::CreateEntity(entity));
    store.stage(StagedWrite::UpsertAccount(account.clone()));
    store.save().await?;
    Ok(account)
}

/// Record the remote id on a local draft after a successful publish.
///
/// Fails when the entity already carries an external id; remote ids are
/// never reassigned.
pub async fn mark_entity_published(
    store: &mut DataStore,
    id: &EntityId,
    external_id: &str,
) -> Result<Entity> {
    let mut entity = store
        .fetch_entity(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    entity.mark_synced(external_id)?;
    store.stage(StagedWrite::UpdateEntity(entity.clone()));
    store.save().await?;
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> DataStore {
        DataStore::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_account_links_entity_and_sync() {
        let mut store = setup().await;
        let account = create_account(
            &mut store,
            CreateAccountRequest {
                name: "Dana".to_string(),
                email: "dana@nsp.com".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let entity = store.fetch_entity(&account.id).await.unwrap().unwrap();
        assert_eq!(entity.sync.id, account.id);
        assert!(entity.sync.is_draft);
        assert!(!entity.is_synced());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_account_with_external_id_is_synced() {
        let mut store = setup().await;
        let account = create_account(
            &mut store,
            CreateAccountRequest {
                name: "Dana".to_string(),
                email: "dana@nsp.com".to_string(),
                external_id: Some("acct-42".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let entity = store.fetch_entity(&account.id).await.unwrap().unwrap();
        assert!(entity.is_synced());
        assert!(!entity.sync.is_draft);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_name_is_rejected_before_any_write() {
        let mut store = setup().await;
        let result = create_account(
            &mut store,
            CreateAccountRequest {
                name: String::new(),
                email: "dana@nsp.com".to_string(),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        // Store untouched: nothing staged, nothing written.
        assert!(!store.has_pending_writes());
        assert!(store.fetch_account().await.unwrap().is_none());
        assert!(store.list_entities().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_records_external_id_once() {
        let mut store = setup().await;
        let account = create_account(
            &mut store,
            CreateAccountRequest {
                name: "Dana".to_string(),
                email: "dana@nsp.com".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let entity = mark_entity_published(&mut store, &account.id, "acct-7")
            .await
            .unwrap();
        assert!(entity.is_synced());

        let again = mark_entity_published(&mut store, &account.id, "acct-8").await;
        assert!(matches!(again, Err(Error::Validation(_))));
        let stored = store.fetch_entity(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.sync.external_id.as_deref(), Some("acct-7"));
    }
}
