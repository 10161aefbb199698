use crate::shared::enums::{Disposition, KbArticleKind, Priority, Role, SenderType, TicketStatus};
use crate::shared::error::StorageError;
use crate::shared::schema::{ticket_messages, ticket_nlp, tickets, users};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A person known to the platform, provisioned administratively or on first
/// contact from a channel. `(source, external_id)` identifies the originating
/// channel account when the user arrived through one.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: String,
    pub role: Role,
    pub source: Option<String>,
    pub external_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub source: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub source: String,
    pub source_id: String,
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    pub language: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub source: String,
    pub source_id: String,
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    pub language: String,
}

/// One entry in a ticket's thread. `seq` is assigned by the store in arrival
/// order and never reused; entries are immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_messages)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: SenderType,
    pub content: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

/// The current classification attached to a ticket. At most one row per
/// ticket; reclassification replaces it. Confidences are independent per
/// dimension.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = ticket_nlp)]
pub struct TicketTriage {
    pub ticket_id: Uuid,
    pub category: String,
    pub category_conf: f64,
    pub priority: Priority,
    pub priority_conf: f64,
    #[diesel(column_name = triage)]
    pub disposition: Disposition,
    #[diesel(column_name = triage_conf)]
    pub disposition_conf: f64,
    pub summary: String,
    pub suggested_response: String,
    pub updated_at: DateTime<Utc>,
}

/// A knowledge entry with localized title/body keyed by language code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbArticle {
    pub id: Uuid,
    pub title: BTreeMap<String, String>,
    pub body: BTreeMap<String, String>,
    pub category: String,
    pub kind: KbArticleKind,
    pub keywords: Vec<String>,
    pub is_published: bool,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KbArticle {
    pub fn has_language(&self, language: &str) -> bool {
        self.title.contains_key(language) || self.body.contains_key(language)
    }

    /// Title in the requested language, falling back to the first populated one.
    pub fn localized_title(&self, language: &str) -> Option<&str> {
        self.title
            .get(language)
            .or_else(|| self.title.values().next())
            .map(String::as_str)
    }

    /// Body in the requested language, falling back to the first populated one.
    pub fn localized_body(&self, language: &str) -> Option<&str> {
        self.body
            .get(language)
            .or_else(|| self.body.values().next())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct NewKbArticle {
    pub id: Uuid,
    pub title: BTreeMap<String, String>,
    pub body: BTreeMap<String, String>,
    pub category: String,
    pub kind: KbArticleKind,
    pub keywords: Vec<String>,
    pub is_published: bool,
    pub owner_id: Option<Uuid>,
}

impl NewKbArticle {
    /// An article must carry content in at least one language.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.title.values().all(|t| t.trim().is_empty())
            && self.body.values().all(|b| b.trim().is_empty())
        {
            return Err(StorageError::Invalid(format!(
                "kb article {} has no localized content",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &[(&str, &str)], body: &[(&str, &str)]) -> NewKbArticle {
        NewKbArticle {
            id: Uuid::new_v4(),
            title: title
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            category: "access_vpn".to_string(),
            kind: KbArticleKind::Guide,
            keywords: vec![],
            is_published: true,
            owner_id: None,
        }
    }

    #[test]
    fn article_without_content_is_rejected() {
        assert!(article(&[], &[]).validate().is_err());
        assert!(article(&[("ru", "  ")], &[]).validate().is_err());
        assert!(article(&[("ru", "Сброс пароля VPN")], &[]).validate().is_ok());
    }

    #[test]
    fn localized_lookup_falls_back_to_first_language() {
        let new = article(&[("en", "VPN reset"), ("ru", "Сброс VPN")], &[]);
        let article = KbArticle {
            id: new.id,
            title: new.title,
            body: new.body,
            category: new.category,
            kind: new.kind,
            keywords: new.keywords,
            is_published: true,
            owner_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(article.localized_title("ru"), Some("Сброс VPN"));
        assert_eq!(article.localized_title("kk"), Some("VPN reset"));
        assert!(article.has_language("en"));
        assert!(!article.has_language("kk"));
    }
}
