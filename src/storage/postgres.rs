use crate::shared::enums::{KbArticleKind, SenderType, TicketStatus};
use crate::shared::error::StorageError;
use crate::shared::models::{
    KbArticle, NewKbArticle, NewTicket, NewUser, Ticket, TicketMessage, TicketTriage, User,
};
use crate::shared::schema::{kb_articles, ticket_messages, ticket_nlp, tickets, users};
use crate::shared::utils::{DbConn, DbPool};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

pub struct PgStorage {
    pool: DbPool,
}

impl PgStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<DbConn, StorageError> {
        self.pool.get().map_err(|e| StorageError::Pool(e.to_string()))
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = kb_articles)]
struct KbArticleRow {
    id: Uuid,
    title: Value,
    body: Value,
    category: String,
    kind: KbArticleKind,
    keywords: Vec<String>,
    is_published: bool,
    owner_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn lang_map(value: Value) -> BTreeMap<String, String> {
    serde_json::from_value(value).unwrap_or_default()
}

impl From<KbArticleRow> for KbArticle {
    fn from(row: KbArticleRow) -> Self {
        KbArticle {
            id: row.id,
            title: lang_map(row.title),
            body: lang_map(row.body),
            category: row.category,
            kind: row.kind,
            keywords: row.keywords,
            is_published: row.is_published,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn user_by_id(conn: &mut PgConnection, user_id: Uuid) -> Result<User, StorageError> {
    users::table
        .find(user_id)
        .first::<User>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("user {user_id}")))
}

fn user_by_external(
    conn: &mut PgConnection,
    source: &str,
    external_id: &str,
) -> Result<Option<User>, StorageError> {
    Ok(users::table
        .filter(users::source.eq(source))
        .filter(users::external_id.eq(external_id))
        .first::<User>(conn)
        .optional()?)
}

fn user_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, StorageError> {
    Ok(users::table
        .filter(users::email.eq(email))
        .first::<User>(conn)
        .optional()?)
}

fn ticket_by_id(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Option<Ticket>, StorageError> {
    Ok(tickets::table
        .find(ticket_id)
        .first::<Ticket>(conn)
        .optional()?)
}

#[async_trait]
impl Storage for PgStorage {
    async fn find_user_by_external(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<User>, StorageError> {
        let mut conn = self.conn()?;
        user_by_external(&mut conn, source, external_id)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let mut conn = self.conn()?;
        user_by_email(&mut conn, email)
    }

    async fn insert_user(&self, new_user: NewUser) -> Result<User, StorageError> {
        let mut conn = self.conn()?;
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

        let inserted = diesel::insert_into(users::table)
            .values(&user)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;
        if inserted > 0 {
            return Ok(user);
        }

        // Lost a natural-key race; the first writer owns the row.
        if let (Some(source), Some(external_id)) =
            (user.source.as_deref(), user.external_id.as_deref())
        {
            if let Some(existing) = user_by_external(&mut conn, source, external_id)? {
                return Ok(existing);
            }
        }
        if let Some(email) = user.email.as_deref() {
            if let Some(existing) = user_by_email(&mut conn, email)? {
                return Ok(existing);
            }
        }
        Err(StorageError::Conflict(
            "user insert conflicted with no readable winner".to_string(),
        ))
    }

    async fn attach_external_identity(
        &self,
        user_id: Uuid,
        source: &str,
        external_id: &str,
    ) -> Result<User, StorageError> {
        let mut conn = self.conn()?;
        let result = diesel::update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::source.eq(source),
                users::external_id.eq(external_id),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn);

        match result {
            Ok(0) => Err(StorageError::NotFound(format!("user {user_id}"))),
            Ok(_) => user_by_id(&mut conn, user_id),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                // The pair was claimed concurrently; hand back its owner.
                user_by_external(&mut conn, source, external_id)?.ok_or_else(|| {
                    StorageError::Conflict(format!(
                        "identity {source}:{external_id} is claimed but unreadable"
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn deactivate_user(&self, user_id: Uuid) -> Result<User, StorageError> {
        let mut conn = self.conn()?;
        let updated = diesel::update(users::table.filter(users::id.eq(user_id)))
            .set((users::is_active.eq(false), users::updated_at.eq(Utc::now())))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("user {user_id}")));
        }
        user_by_id(&mut conn, user_id)
    }

    async fn upsert_ticket(&self, new_ticket: NewTicket) -> Result<(Ticket, bool), StorageError> {
        let mut conn = self.conn()?;
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

        let inserted = diesel::insert_into(tickets::table)
            .values(&ticket)
            .on_conflict((tickets::source, tickets::source_id))
            .do_nothing()
            .execute(&mut conn)?;

        let stored = tickets::table
            .filter(tickets::source.eq(&ticket.source))
            .filter(tickets::source_id.eq(&ticket.source_id))
            .first::<Ticket>(&mut conn)?;
        Ok((stored, inserted > 0))
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StorageError> {
        let mut conn = self.conn()?;
        ticket_by_id(&mut conn, ticket_id)
    }

    async fn update_ticket_status(
        &self,
        ticket_id: Uuid,
        expected: &[TicketStatus],
        new_status: TicketStatus,
    ) -> Result<Ticket, StorageError> {
        let mut conn = self.conn()?;
        let updated = diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket_id))
                .filter(tickets::status.eq_any(expected)),
        )
        .set((
            tickets::status.eq(new_status),
            tickets::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        if updated == 0 {
            return match ticket_by_id(&mut conn, ticket_id)? {
                None => Err(StorageError::NotFound(format!("ticket {ticket_id}"))),
                Some(t) => Err(StorageError::Conflict(format!(
                    "ticket {ticket_id} status is {}",
                    t.status
                ))),
            };
        }
        ticket_by_id(&mut conn, ticket_id)?
            .ok_or_else(|| StorageError::NotFound(format!("ticket {ticket_id}")))
    }

    async fn append_message(
        &self,
        ticket_id: Uuid,
        sender_id: Uuid,
        sender_type: SenderType,
        content: &str,
    ) -> Result<TicketMessage, StorageError> {
        let mut conn = self.conn()?;
        loop {
            let next_seq: i64 = ticket_messages::table
                .filter(ticket_messages::ticket_id.eq(ticket_id))
                .select(diesel::dsl::max(ticket_messages::seq))
                .first::<Option<i64>>(&mut conn)?
                .unwrap_or(0)
                + 1;

            let message = TicketMessage {
                id: Uuid::new_v4(),
                ticket_id,
                sender_id,
                sender_type,
                content: content.to_string(),
                seq: next_seq,
                created_at: Utc::now(),
            };

            match diesel::insert_into(ticket_messages::table)
                .values(&message)
                .execute(&mut conn)
            {
                Ok(_) => return Ok(message),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    // A concurrent append took this seq; re-read and retry.
                    debug!("seq {next_seq} taken for ticket {ticket_id}, retrying append");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn last_message(&self, ticket_id: Uuid) -> Result<Option<TicketMessage>, StorageError> {
        let mut conn = self.conn()?;
        Ok(ticket_messages::table
            .filter(ticket_messages::ticket_id.eq(ticket_id))
            .order(ticket_messages::seq.desc())
            .first::<TicketMessage>(&mut conn)
            .optional()?)
    }

    async fn list_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StorageError> {
        let mut conn = self.conn()?;
        Ok(ticket_messages::table
            .filter(ticket_messages::ticket_id.eq(ticket_id))
            .order(ticket_messages::seq.asc())
            .load::<TicketMessage>(&mut conn)?)
    }

    async fn replace_triage(&self, triage: TicketTriage) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        diesel::insert_into(ticket_nlp::table)
            .values(&triage)
            .on_conflict(ticket_nlp::ticket_id)
            .do_update()
            .set(&triage)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn get_triage(&self, ticket_id: Uuid) -> Result<Option<TicketTriage>, StorageError> {
        let mut conn = self.conn()?;
        Ok(ticket_nlp::table
            .find(ticket_id)
            .first::<TicketTriage>(&mut conn)
            .optional()?)
    }

    async fn insert_article(&self, article: NewKbArticle) -> Result<KbArticle, StorageError> {
        article.validate()?;
        let mut conn = self.conn()?;
        let now = Utc::now();
        let row = KbArticleRow {
            id: article.id,
            title: serde_json::to_value(&article.title).unwrap_or_default(),
            body: serde_json::to_value(&article.body).unwrap_or_default(),
            category: article.category,
            kind: article.kind,
            keywords: article.keywords,
            is_published: article.is_published,
            owner_id: article.owner_id,
            created_at: now,
            updated_at: now,
        };

        let inserted = diesel::insert_into(kb_articles::table)
            .values(&row)
            .on_conflict(kb_articles::id)
            .do_nothing()
            .execute(&mut conn)?;
        if inserted == 0 {
            let existing = kb_articles::table
                .find(row.id)
                .first::<KbArticleRow>(&mut conn)?;
            return Ok(existing.into());
        }
        Ok(row.into())
    }

    async fn list_published_articles(&self) -> Result<Vec<KbArticle>, StorageError> {
        let mut conn = self.conn()?;
        let rows = kb_articles::table
            .filter(kb_articles::is_published.eq(true))
            .order((kb_articles::created_at.asc(), kb_articles::id.asc()))
            .load::<KbArticleRow>(&mut conn)?;
        Ok(rows.into_iter().map(KbArticle::from).collect())
    }
}
