//! Persistence boundary for the intake pipeline.
//!
//! The uniqueness invariants live here, not in the callers: one user per
//! `(source, external_id)` pair, one ticket per `(source, source_id)`, one
//! triage row per ticket, gapless per-ticket message sequencing. Both
//! backends resolve natural-key races to the first writer and hand losers
//! the winning row.

pub mod memory;
pub mod postgres;

pub use memory::MemStorage;
pub use postgres::PgStorage;

use crate::shared::enums::{SenderType, TicketStatus};
use crate::shared::error::StorageError;
use crate::shared::models::{
    KbArticle, NewKbArticle, NewTicket, NewUser, Ticket, TicketMessage, TicketTriage, User,
};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_user_by_external(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<User>, StorageError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// Insert a user. On a natural-key conflict (external identity pair or
    /// email) the existing row wins and is returned instead.
    async fn insert_user(&self, new_user: NewUser) -> Result<User, StorageError>;

    /// Attach an external identity pair to an existing user. If the pair is
    /// already owned by another user, that owner is returned instead.
    async fn attach_external_identity(
        &self,
        user_id: Uuid,
        source: &str,
        external_id: &str,
    ) -> Result<User, StorageError>;

    async fn deactivate_user(&self, user_id: Uuid) -> Result<User, StorageError>;

    /// Insert-or-return keyed by `(source, source_id)`. The boolean is true
    /// when this call created the ticket.
    async fn upsert_ticket(&self, new_ticket: NewTicket) -> Result<(Ticket, bool), StorageError>;

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StorageError>;

    /// Compare-and-set the ticket status. Fails with `Conflict` when the
    /// current status is not in `expected`.
    async fn update_ticket_status(
        &self,
        ticket_id: Uuid,
        expected: &[TicketStatus],
        new_status: TicketStatus,
    ) -> Result<Ticket, StorageError>;

    /// Append to the ticket thread, assigning the next arrival-order seq.
    async fn append_message(
        &self,
        ticket_id: Uuid,
        sender_id: Uuid,
        sender_type: SenderType,
        content: &str,
    ) -> Result<TicketMessage, StorageError>;

    async fn last_message(&self, ticket_id: Uuid) -> Result<Option<TicketMessage>, StorageError>;

    async fn list_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StorageError>;

    /// Replace the ticket's current triage annotation.
    async fn replace_triage(&self, triage: TicketTriage) -> Result<(), StorageError>;

    async fn get_triage(&self, ticket_id: Uuid) -> Result<Option<TicketTriage>, StorageError>;

    /// Insert an article; a pre-existing id is returned unchanged so seed
    /// provisioning stays idempotent.
    async fn insert_article(&self, article: NewKbArticle) -> Result<KbArticle, StorageError>;

    async fn list_published_articles(&self) -> Result<Vec<KbArticle>, StorageError>;
}
