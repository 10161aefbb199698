use crate::shared::error::StorageError;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::PgConnection;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str, max_size: u32) -> Result<DbPool, StorageError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| StorageError::Pool(e.to_string()))
}

/// Run database migrations
pub fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get().map_err(|e| StorageError::Pool(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Query(format!("migration error: {e}")))?;
    Ok(())
}

/// Best-effort language guess for messages that arrive without one.
///
/// Kazakh-specific Cyrillic letters are checked before the generic Cyrillic
/// ratio since Kazakh text also matches the Russian range.
pub fn detect_language(text: &str) -> &'static str {
    const KAZAKH_LETTERS: [char; 9] = ['ә', 'ғ', 'қ', 'ң', 'ө', 'ұ', 'ү', 'һ', 'і'];

    let lowered = text.to_lowercase();
    if lowered.chars().any(|c| KAZAKH_LETTERS.contains(&c)) {
        return "kk";
    }

    let mut cyrillic = 0usize;
    let mut alphabetic = 0usize;
    for c in lowered.chars().filter(|c| c.is_alphabetic()) {
        alphabetic += 1;
        if ('\u{0400}'..='\u{04FF}').contains(&c) {
            cyrillic += 1;
        }
    }
    if alphabetic > 0 && cyrillic * 2 >= alphabetic {
        "ru"
    } else {
        "en"
    }
}
