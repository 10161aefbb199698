//! Maps channel-local identities to stable platform users.

use crate::shared::enums::Role;
use crate::shared::error::IntakeError;
use crate::shared::models::{NewUser, User};
use crate::storage::Storage;
use log::{debug, info};
use std::sync::Arc;

pub struct IdentityResolver {
    storage: Arc<dyn Storage>,
}

impl IdentityResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Resolve a `(source, external_id)` pair to a user, creating one on
    /// first contact.
    ///
    /// When the pair is unknown but the email already belongs to a user, the
    /// pair is attached to that user so the same person arriving through a
    /// second channel keeps one identity. Races on the same pair settle on
    /// the first writer; later callers get that winning row back.
    pub async fn resolve(
        &self,
        source: &str,
        external_id: &str,
        display_name: &str,
        email: Option<&str>,
    ) -> Result<User, IntakeError> {
        if let Some(user) = self.storage.find_user_by_external(source, external_id).await? {
            return Ok(user);
        }

        if let Some(email) = email {
            if let Some(user) = self.storage.find_user_by_email(email).await? {
                let merged = self
                    .storage
                    .attach_external_identity(user.id, source, external_id)
                    .await?;
                debug!(
                    "attached identity {source}:{external_id} to existing user {}",
                    merged.id
                );
                return Ok(merged);
            }
        }

        let user = self
            .storage
            .insert_user(NewUser {
                name: display_name.to_string(),
                email: email.map(str::to_string),
                role: Role::User,
                source: Some(source.to_string()),
                external_id: Some(external_id.to_string()),
            })
            .await?;
        info!("provisioned user {} from {source}:{external_id}", user.id);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    fn resolver() -> (IdentityResolver, Arc<MemStorage>) {
        let storage = Arc::new(MemStorage::new());
        (IdentityResolver::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn first_contact_creates_a_user_with_user_role() {
        let (resolver, _) = resolver();
        let user = resolver
            .resolve("telegram", "tg:123456", "Иван Петров", None)
            .await
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.source.as_deref(), Some("telegram"));

        let again = resolver
            .resolve("telegram", "tg:123456", "Иван Петров", None)
            .await
            .unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn known_email_merges_across_channels() {
        let (resolver, storage) = resolver();
        let portal = resolver
            .resolve("portal", "acc-17", "Ivan Petrov", Some("ivan@corp.local"))
            .await
            .unwrap();
        let telegram = resolver
            .resolve("telegram", "tg:123456", "Иван Петров", Some("ivan@corp.local"))
            .await
            .unwrap();
        assert_eq!(portal.id, telegram.id);

        let stored = storage
            .find_user_by_external("telegram", "tg:123456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, portal.id);
    }

    #[tokio::test]
    async fn concurrent_resolution_yields_one_user() {
        let storage = Arc::new(MemStorage::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                let resolver = IdentityResolver::new(storage as Arc<dyn Storage>);
                resolver
                    .resolve("telegram", "tg:123456", "Иван Петров", None)
                    .await
                    .unwrap()
                    .id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
