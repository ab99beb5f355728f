use core_types::types::UnknownCode;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt {entity} row {id}: {source}")]
    CorruptRow {
        entity: &'static str,
        id: Uuid,
        #[source]
        source: UnknownCode,
    },
}
