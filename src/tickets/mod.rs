//! Ticket records, threads and the status state machine.
//!
//! The store never invents transitions: every status change is validated
//! against `TicketStatus::can_transition` and applied as a compare-and-set,
//! so concurrent operator actions cannot push a ticket through an illegal
//! path.

use crate::shared::enums::{SenderType, TicketStatus};
use crate::shared::error::{IntakeError, StorageError};
use crate::shared::models::{NewTicket, Ticket, TicketMessage, TicketTriage};
use crate::storage::Storage;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

pub struct TicketStore {
    storage: Arc<dyn Storage>,
}

impl TicketStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Insert-or-return keyed by `(source, source_id)`; re-delivery of the
    /// same external message never creates a second ticket.
    pub async fn upsert_ticket(
        &self,
        new_ticket: NewTicket,
    ) -> Result<(Ticket, bool), IntakeError> {
        Ok(self.storage.upsert_ticket(new_ticket).await?)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<Ticket, IntakeError> {
        Ok(self
            .storage
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("ticket {ticket_id}")))?)
    }

    pub async fn append_message(
        &self,
        ticket_id: Uuid,
        sender_id: Uuid,
        sender_type: SenderType,
        content: &str,
    ) -> Result<TicketMessage, IntakeError> {
        Ok(self
            .storage
            .append_message(ticket_id, sender_id, sender_type, content)
            .await?)
    }

    pub async fn last_message(
        &self,
        ticket_id: Uuid,
    ) -> Result<Option<TicketMessage>, IntakeError> {
        Ok(self.storage.last_message(ticket_id).await?)
    }

    pub async fn list_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, IntakeError> {
        Ok(self.storage.list_messages(ticket_id).await?)
    }

    pub async fn thread_len(&self, ticket_id: Uuid) -> Result<usize, IntakeError> {
        Ok(self.storage.list_messages(ticket_id).await?.len())
    }

    pub async fn get_triage(&self, ticket_id: Uuid) -> Result<Option<TicketTriage>, IntakeError> {
        Ok(self.storage.get_triage(ticket_id).await?)
    }

    /// Move a ticket to `new_status`, failing with `InvalidTransition` when
    /// the state machine does not permit it.
    ///
    /// `new -> triaged` is additionally gated on a stored triage record: the
    /// only way out of `new` is an actual classification.
    pub async fn transition(
        &self,
        ticket_id: Uuid,
        new_status: TicketStatus,
    ) -> Result<Ticket, IntakeError> {
        loop {
            let ticket = self.get_ticket(ticket_id).await?;
            let from = ticket.status;
            if !from.can_transition(new_status) {
                return Err(IntakeError::InvalidTransition {
                    from,
                    to: new_status,
                });
            }
            if from == TicketStatus::New
                && new_status == TicketStatus::Triaged
                && self.storage.get_triage(ticket_id).await?.is_none()
            {
                return Err(IntakeError::InvalidTransition {
                    from,
                    to: new_status,
                });
            }

            match self
                .storage
                .update_ticket_status(ticket_id, &[from], new_status)
                .await
            {
                Ok(ticket) => return Ok(ticket),
                Err(StorageError::Conflict(_)) => {
                    // Status moved under us; re-validate against the new one.
                    debug!("status of ticket {ticket_id} changed concurrently, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Replace the ticket's triage annotation, advancing `new -> triaged`.
    ///
    /// Tickets that reached `resolved` or `closed` reject further
    /// annotation.
    pub async fn set_triage(
        &self,
        ticket_id: Uuid,
        mut triage: TicketTriage,
    ) -> Result<Ticket, IntakeError> {
        let ticket = self.get_ticket(ticket_id).await?;
        if matches!(ticket.status, TicketStatus::Resolved | TicketStatus::Closed) {
            return Err(IntakeError::TicketClosed(ticket_id));
        }

        triage.ticket_id = ticket_id;
        self.storage.replace_triage(triage).await?;

        if ticket.status == TicketStatus::New {
            match self
                .storage
                .update_ticket_status(ticket_id, &[TicketStatus::New], TicketStatus::Triaged)
                .await
            {
                Ok(ticket) => return Ok(ticket),
                // Already advanced by a concurrent actor.
                Err(StorageError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.get_ticket(ticket_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::{Disposition, Priority};
    use crate::storage::MemStorage;
    use chrono::Utc;

    async fn store_with_ticket() -> (TicketStore, Uuid) {
        let storage = Arc::new(MemStorage::new());
        let user = storage
            .insert_user(crate::shared::models::NewUser {
                name: "Ivan".to_string(),
                email: None,
                role: crate::shared::enums::Role::User,
                source: Some("portal".to_string()),
                external_id: Some("acc-1".to_string()),
            })
            .await
            .unwrap();
        let store = TicketStore::new(storage);
        let (ticket, is_new) = store
            .upsert_ticket(NewTicket {
                source: "portal".to_string(),
                source_id: "case-100".to_string(),
                user_id: user.id,
                subject: "VPN down".to_string(),
                body: "cannot connect".to_string(),
                language: "en".to_string(),
            })
            .await
            .unwrap();
        assert!(is_new);
        (store, ticket.id)
    }

    fn triage(ticket_id: Uuid) -> TicketTriage {
        TicketTriage {
            ticket_id,
            category: "access_vpn".to_string(),
            category_conf: 0.9,
            priority: Priority::High,
            priority_conf: 0.8,
            disposition: Disposition::NeedsOperator,
            disposition_conf: 0.7,
            summary: "vpn outage".to_string(),
            suggested_response: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_source_key() {
        let (store, ticket_id) = store_with_ticket().await;
        let (again, is_new) = store
            .upsert_ticket(NewTicket {
                source: "portal".to_string(),
                source_id: "case-100".to_string(),
                user_id: Uuid::new_v4(),
                subject: "different".to_string(),
                body: "different".to_string(),
                language: "en".to_string(),
            })
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(again.id, ticket_id);
        assert_eq!(again.subject, "VPN down");
    }

    #[tokio::test]
    async fn triaged_requires_a_triage_record() {
        let (store, ticket_id) = store_with_ticket().await;
        let err = store
            .transition(ticket_id, TicketStatus::Triaged)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::InvalidTransition { .. }));

        let ticket = store.set_triage(ticket_id, triage(ticket_id)).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Triaged);
    }

    #[tokio::test]
    async fn closed_is_terminal() {
        let (store, ticket_id) = store_with_ticket().await;
        store.set_triage(ticket_id, triage(ticket_id)).await.unwrap();
        store
            .transition(ticket_id, TicketStatus::InProgress)
            .await
            .unwrap();
        store
            .transition(ticket_id, TicketStatus::Resolved)
            .await
            .unwrap();
        store.transition(ticket_id, TicketStatus::Closed).await.unwrap();

        for target in [
            TicketStatus::New,
            TicketStatus::Triaged,
            TicketStatus::InProgress,
            TicketStatus::Resolved,
            TicketStatus::Escalated,
        ] {
            let err = store.transition(ticket_id, target).await.unwrap_err();
            assert!(matches!(err, IntakeError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn resolved_ticket_rejects_reclassification() {
        let (store, ticket_id) = store_with_ticket().await;
        store.set_triage(ticket_id, triage(ticket_id)).await.unwrap();
        store
            .transition(ticket_id, TicketStatus::InProgress)
            .await
            .unwrap();
        store
            .transition(ticket_id, TicketStatus::Resolved)
            .await
            .unwrap();

        let err = store
            .set_triage(ticket_id, triage(ticket_id))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::TicketClosed(_)));
    }

    #[tokio::test]
    async fn escalation_branches_and_reenters() {
        let (store, ticket_id) = store_with_ticket().await;
        store.set_triage(ticket_id, triage(ticket_id)).await.unwrap();
        let ticket = store
            .transition(ticket_id, TicketStatus::Escalated)
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Escalated);

        let ticket = store
            .transition(ticket_id, TicketStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn replace_on_reclassify_keeps_one_annotation() {
        let (store, ticket_id) = store_with_ticket().await;
        store.set_triage(ticket_id, triage(ticket_id)).await.unwrap();

        let mut second = triage(ticket_id);
        second.category = "account_password".to_string();
        second.category_conf = 0.4;
        store.set_triage(ticket_id, second).await.unwrap();

        let current = store.get_triage(ticket_id).await.unwrap().unwrap();
        assert_eq!(current.category, "account_password");
        assert!((current.category_conf - 0.4).abs() < f64::EPSILON);
    }
}
