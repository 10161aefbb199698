//! Idempotent seed provisioning, run at process start under explicit
//! configuration. Every step is insert-or-skip, so repeated boots (or two
//! instances racing at startup) converge on the same records.

use crate::config::BootstrapConfig;
use crate::shared::enums::{KbArticleKind, Role};
use crate::shared::error::IntakeError;
use crate::shared::models::{NewKbArticle, NewUser};
use crate::storage::Storage;
use log::info;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub admin_created: bool,
    pub articles_ensured: usize,
}

pub async fn run(
    storage: &dyn Storage,
    config: &BootstrapConfig,
) -> Result<SeedSummary, IntakeError> {
    let admin_created = ensure_admin(storage, config).await?;

    let mut articles_ensured = 0;
    if config.seed_kb {
        for article in seed_articles() {
            storage.insert_article(article).await?;
            articles_ensured += 1;
        }
    }

    info!("bootstrap complete (admin_created={admin_created}, kb articles={articles_ensured})");
    Ok(SeedSummary {
        admin_created,
        articles_ensured,
    })
}

async fn ensure_admin(storage: &dyn Storage, config: &BootstrapConfig) -> Result<bool, IntakeError> {
    if storage
        .find_user_by_email(&config.admin_email)
        .await?
        .is_some()
    {
        return Ok(false);
    }
    let admin = storage
        .insert_user(NewUser {
            name: config.admin_name.clone(),
            email: Some(config.admin_email.clone()),
            role: Role::Admin,
            source: None,
            external_id: None,
        })
        .await?;
    info!("provisioned admin user {} <{}>", admin.id, config.admin_email);
    Ok(true)
}

/// Stable id per seed article so re-seeding is an upsert, not a duplicate.
fn seed_id(slug: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("deskserver/kb/{slug}").as_bytes())
}

fn lang_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(lang, text)| (lang.to_string(), text.to_string()))
        .collect()
}

fn seed_articles() -> Vec<NewKbArticle> {
    vec![
        NewKbArticle {
            id: seed_id("vpn-password-reset"),
            title: lang_map(&[
                ("en", "VPN password reset"),
                ("ru", "Сброс пароля VPN"),
                ("kk", "VPN құпия сөзін қалпына келтіру"),
            ]),
            body: lang_map(&[
                (
                    "en",
                    "To reset your VPN password: open the self-service portal, choose \
                     \"Reset VPN password\" and confirm the SMS code. The new password \
                     becomes active within five minutes.",
                ),
                (
                    "ru",
                    "Чтобы сбросить пароль VPN: откройте портал самообслуживания, выберите \
                     «Сброс пароля VPN» и подтвердите код из SMS. Новый пароль начнёт \
                     действовать в течение пяти минут.",
                ),
                (
                    "kk",
                    "VPN құпия сөзін қалпына келтіру үшін өзіне-өзі қызмет көрсету порталын \
                     ашып, «VPN құпия сөзін қалпына келтіру» дегенді таңдаңыз және SMS кодын \
                     растаңыз.",
                ),
            ]),
            category: "access_vpn".to_string(),
            kind: KbArticleKind::Guide,
            keywords: vec![
                "vpn".to_string(),
                "пароль".to_string(),
                "password".to_string(),
                "доступ".to_string(),
                "подключение".to_string(),
            ],
            is_published: true,
            owner_id: None,
        },
        NewKbArticle {
            id: seed_id("account-password-reset"),
            title: lang_map(&[
                ("en", "Domain account password reset"),
                ("ru", "Сброс пароля доменной учётной записи"),
            ]),
            body: lang_map(&[
                (
                    "en",
                    "Use the password kiosk in the office lobby or call the helpdesk line. \
                     A temporary password expires after the first login.",
                ),
                (
                    "ru",
                    "Воспользуйтесь киоском смены пароля в холле офиса или позвоните на \
                     линию поддержки. Временный пароль действует до первого входа.",
                ),
            ]),
            category: "account_password".to_string(),
            kind: KbArticleKind::Faq,
            keywords: vec![
                "пароль".to_string(),
                "password".to_string(),
                "account".to_string(),
                "учётная".to_string(),
            ],
            is_published: true,
            owner_id: None,
        },
        NewKbArticle {
            id: seed_id("printer-setup"),
            title: lang_map(&[
                ("en", "Connecting an office printer"),
                ("ru", "Подключение офисного принтера"),
            ]),
            body: lang_map(&[
                (
                    "en",
                    "Add the printer from Settings > Printers using its floor code. Drivers \
                     install automatically from the print server.",
                ),
                (
                    "ru",
                    "Добавьте принтер через «Параметры → Принтеры», указав код этажа. \
                     Драйверы установятся автоматически с сервера печати.",
                ),
            ]),
            category: "hardware_printer".to_string(),
            kind: KbArticleKind::Guide,
            keywords: vec![
                "printer".to_string(),
                "принтер".to_string(),
                "печать".to_string(),
            ],
            is_published: true,
            owner_id: None,
        },
        NewKbArticle {
            id: seed_id("email-access"),
            title: lang_map(&[
                ("en", "Mailbox access from a phone"),
                ("ru", "Доступ к почте с телефона"),
            ]),
            body: lang_map(&[
                (
                    "en",
                    "Install the corporate mail profile from the MDM portal, then sign in \
                     with your domain account.",
                ),
                (
                    "ru",
                    "Установите корпоративный почтовый профиль из портала MDM и войдите \
                     с доменной учётной записью.",
                ),
            ]),
            category: "email_access".to_string(),
            kind: KbArticleKind::Faq,
            keywords: vec![
                "email".to_string(),
                "почта".to_string(),
                "outlook".to_string(),
            ],
            is_published: true,
            owner_id: None,
        },
    ]
}
