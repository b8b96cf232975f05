use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::core::error::AppResult;
use crate::storage::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Opens (or creates) the SQLite file, enables WAL and runs schema migrations
/// on the first connection.
///
/// # Example
///
/// ```no_run
/// use soundgrab::storage::db;
///
/// let pool = db::create_pool("soundgrab_cache.sqlite")?;
/// # Ok::<(), soundgrab::AppError>(())
/// ```
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
    let pool = Pool::builder()
        .max_size(4) // blobs are large, a handful of writers is plenty
        .build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn)?;

    log::info!("Cache database ready at {}", database_path);
    Ok(pool)
}

/// Single-connection pool over a private in-memory database.
///
/// Every SQLite memory connection is its own database, so the pool never
/// grows and never recycles its connection.
pub fn create_memory_pool() -> AppResult<DbPool> {
    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(SqliteConnectionManager::memory())?;
    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn)?;
    Ok(pool)
}

/// Get a connection from the pool
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}
