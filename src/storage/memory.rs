//! In-process storage backend.
//!
//! Backs the test suite and embedded/dev deployments that have no Postgres.
//! Compound check-then-write operations run under a single writer lock, so
//! the natural-key invariants hold under concurrent tasks without any
//! row-level locking.

use crate::shared::enums::{SenderType, TicketStatus};
use crate::shared::error::StorageError;
use crate::shared::models::{
    KbArticle, NewKbArticle, NewTicket, NewUser, Ticket, TicketMessage, TicketTriage, User,
};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemInner {
    users: HashMap<Uuid, User>,
    tickets: HashMap<Uuid, Ticket>,
    ticket_ids: HashMap<(String, String), Uuid>,
    messages: HashMap<Uuid, Vec<TicketMessage>>,
    triage: HashMap<Uuid, TicketTriage>,
    articles: Vec<KbArticle>,
}

#[derive(Default)]
pub struct MemStorage {
    inner: RwLock<MemInner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn match_external(user: &User, source: &str, external_id: &str) -> bool {
    user.source.as_deref() == Some(source) && user.external_id.as_deref() == Some(external_id)
}

#[async_trait]
impl Storage for MemStorage {
    async fn find_user_by_external(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<User>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| match_external(u, source, external_id))
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert_user(&self, new_user: NewUser) -> Result<User, StorageError> {
        let mut inner = self.inner.write().await;

        if let (Some(source), Some(external_id)) = (&new_user.source, &new_user.external_id) {
            if let Some(existing) = inner
                .users
                .values()
                .find(|u| match_external(u, source, external_id))
            {
                return Ok(existing.clone());
            }
        }
        if let Some(email) = &new_user.email {
            if let Some(existing) = inner
                .users
                .values()
                .find(|u| u.email.as_deref() == Some(email.as_str()))
            {
                return Ok(existing.clone());
            }
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            role: new_user.role,
            source: new_user.source,
            external_id: new_user.external_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn attach_external_identity(
        &self,
        user_id: Uuid,
        source: &str,
        external_id: &str,
    ) -> Result<User, StorageError> {
        let mut inner = self.inner.write().await;

        if let Some(owner) = inner
            .users
            .values()
            .find(|u| u.id != user_id && match_external(u, source, external_id))
        {
            return Ok(owner.clone());
        }

        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StorageError::NotFound(format!("user {user_id}")))?;
        user.source = Some(source.to_string());
        user.external_id = Some(external_id.to_string());
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn deactivate_user(&self, user_id: Uuid) -> Result<User, StorageError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StorageError::NotFound(format!("user {user_id}")))?;
        user.is_active = false;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn upsert_ticket(&self, new_ticket: NewTicket) -> Result<(Ticket, bool), StorageError> {
        let mut inner = self.inner.write().await;
        let key = (new_ticket.source.clone(), new_ticket.source_id.clone());
        if let Some(existing_id) = inner.ticket_ids.get(&key) {
            let existing = inner.tickets[existing_id].clone();
            return Ok((existing, false));
        }

        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            source: new_ticket.source,
            source_id: new_ticket.source_id,
            user_id: new_ticket.user_id,
            subject: new_ticket.subject,
            body: new_ticket.body,
            language: new_ticket.language,
            status: TicketStatus::New,
            created_at: now,
            updated_at: now,
        };
        inner.ticket_ids.insert(key, ticket.id);
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok((ticket, true))
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.tickets.get(&ticket_id).cloned())
    }

    async fn update_ticket_status(
        &self,
        ticket_id: Uuid,
        expected: &[TicketStatus],
        new_status: TicketStatus,
    ) -> Result<Ticket, StorageError> {
        let mut inner = self.inner.write().await;
        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| StorageError::NotFound(format!("ticket {ticket_id}")))?;
        if !expected.contains(&ticket.status) {
            return Err(StorageError::Conflict(format!(
                "ticket {ticket_id} status is {}",
                ticket.status
            )));
        }
        ticket.status = new_status;
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn append_message(
        &self,
        ticket_id: Uuid,
        sender_id: Uuid,
        sender_type: SenderType,
        content: &str,
    ) -> Result<TicketMessage, StorageError> {
        let mut inner = self.inner.write().await;
        if !inner.tickets.contains_key(&ticket_id) {
            return Err(StorageError::NotFound(format!("ticket {ticket_id}")));
        }
        let thread = inner.messages.entry(ticket_id).or_default();
        let message = TicketMessage {
            id: Uuid::new_v4(),
            ticket_id,
            sender_id,
            sender_type,
            content: content.to_string(),
            seq: thread.len() as i64 + 1,
            created_at: Utc::now(),
        };
        thread.push(message.clone());
        Ok(message)
    }

    async fn last_message(&self, ticket_id: Uuid) -> Result<Option<TicketMessage>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&ticket_id)
            .and_then(|thread| thread.last().cloned()))
    }

    async fn list_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.messages.get(&ticket_id).cloned().unwrap_or_default())
    }

    async fn replace_triage(&self, triage: TicketTriage) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if !inner.tickets.contains_key(&triage.ticket_id) {
            return Err(StorageError::NotFound(format!("ticket {}", triage.ticket_id)));
        }
        inner.triage.insert(triage.ticket_id, triage);
        Ok(())
    }

    async fn get_triage(&self, ticket_id: Uuid) -> Result<Option<TicketTriage>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.triage.get(&ticket_id).cloned())
    }

    async fn insert_article(&self, article: NewKbArticle) -> Result<KbArticle, StorageError> {
        article.validate()?;
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.articles.iter().find(|a| a.id == article.id) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let stored = KbArticle {
            id: article.id,
            title: article.title,
            body: article.body,
            category: article.category,
            kind: article.kind,
            keywords: article.keywords,
            is_published: article.is_published,
            owner_id: article.owner_id,
            created_at: now,
            updated_at: now,
        };
        inner.articles.push(stored.clone());
        Ok(stored)
    }

    async fn list_published_articles(&self) -> Result<Vec<KbArticle>, StorageError> {
        let inner = self.inner.read().await;
        let mut articles: Vec<KbArticle> = inner
            .articles
            .iter()
            .filter(|a| a.is_published)
            .cloned()
            .collect();
        articles.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::Role;
    use std::sync::Arc;

    fn external_user(n: u32) -> NewUser {
        NewUser {
            name: format!("User {n}"),
            email: None,
            role: Role::User,
            source: Some("telegram".to_string()),
            external_id: Some("tg:123456".to_string()),
        }
    }

    #[tokio::test]
    async fn concurrent_inserts_of_one_identity_yield_one_user() {
        let storage = Arc::new(MemStorage::new());
        let mut handles = Vec::new();
        for n in 0..8 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.insert_user(external_user(n)).await.unwrap().id
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

    #[tokio::test]
    async fn appends_are_ordered_by_arrival() {
        let storage = Arc::new(MemStorage::new());
        let user = storage.insert_user(external_user(0)).await.unwrap();
        let (ticket, _) = storage
            .upsert_ticket(NewTicket {
                source: "portal".to_string(),
                source_id: "case-1".to_string(),
                user_id: user.id,
                subject: "VPN".to_string(),
                body: "cannot connect".to_string(),
                language: "en".to_string(),
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for n in 0..16 {
            let storage = Arc::clone(&storage);
            let ticket_id = ticket.id;
            let sender_id = user.id;
            handles.push(tokio::spawn(async move {
                storage
                    .append_message(ticket_id, sender_id, SenderType::User, &format!("msg {n}"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let thread = storage.list_messages(ticket.id).await.unwrap();
        let seqs: Vec<i64> = thread.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (1..=16).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn deactivation_keeps_the_record() {
        let storage = MemStorage::new();
        let user = storage.insert_user(external_user(0)).await.unwrap();
        let deactivated = storage.deactivate_user(user.id).await.unwrap();
        assert!(!deactivated.is_active);

        // the identity pair still resolves to the same record
        let found = storage
            .find_user_by_external("telegram", "tg:123456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn status_cas_rejects_unexpected_current_status() {
        let storage = MemStorage::new();
        let user = storage.insert_user(external_user(0)).await.unwrap();
        let (ticket, _) = storage
            .upsert_ticket(NewTicket {
                source: "portal".to_string(),
                source_id: "case-2".to_string(),
                user_id: user.id,
                subject: String::new(),
                body: "printer jam".to_string(),
                language: "en".to_string(),
            })
            .await
            .unwrap();

        let err = storage
            .update_ticket_status(ticket.id, &[TicketStatus::Triaged], TicketStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
