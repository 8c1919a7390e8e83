use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, SqlitePool,
};
use thiserror::Error;
use tracing::debug;

use stockwatch_core::{Coordinate, Item, ItemStore, Store, User};

/// Default number of attempts for one item unit of work.
pub const DEFAULT_ITEM_ATTEMPTS: u32 = 10;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    item_attempts: u32,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// WAL journaling, foreign keys and the busy timeout are configured on
    /// every pooled connection.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self {
            pool,
            item_attempts: DEFAULT_ITEM_ATTEMPTS,
        })
    }

    /// Overrides how many times an item unit of work is attempted.
    pub fn with_item_attempts(mut self, attempts: u32) -> Self {
        self.item_attempts = attempts.max(1);
        self
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for user records.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for vetted store records.
    pub fn stores(&self) -> StoreRepository {
        StoreRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for items and their embedded stock reports.
    pub fn items(&self) -> ItemRepository {
        ItemRepository {
            pool: self.pool.clone(),
            max_attempts: self.item_attempts,
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Repository for user records.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub async fn insert(&self, user: &User) -> Result<(), UserError> {
        sqlx::query(
            "INSERT INTO users (id, first_name, last_name, zip_code, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.zip_code)
        .bind(to_rfc3339(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if is_unique_violation(db_err.code().as_deref()) => {
                UserError::Duplicate
            }
            other => UserError::Database(other),
        })?;
        Ok(())
    }

    /// Looks a user up by id; `None` when no such user exists.
    pub async fn fetch(&self, user_id: &str) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, first_name, last_name, zip_code, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserRow::into_domain))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    first_name: String,
    last_name: String,
    zip_code: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> User {
        User {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            zip_code: self.zip_code,
            created_at: self.created_at,
        }
    }
}

/// Errors that can occur on user records.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user with the same id already exists")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for vetted stores.
#[derive(Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

impl StoreRepository {
    pub async fn insert(&self, store: &Store) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stores (id, name, address, latitude, longitude, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&store.id)
        .bind(&store.name)
        .bind(&store.address)
        .bind(store.coordinate.latitude)
        .bind(store.coordinate.longitude)
        .bind(to_rfc3339(store.created_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if is_unique_violation(db_err.code().as_deref()) => {
                StoreError::Duplicate
            }
            other => StoreError::Database(other),
        })?;
        Ok(())
    }

    /// Looks a store up by id; `None` when no such store exists.
    pub async fn fetch(&self, store_id: &str) -> Result<Option<Store>, StoreError> {
        let row = sqlx::query_as::<_, StoreRow>(
            "SELECT id, name, address, latitude, longitude, created_at FROM stores WHERE id = ?",
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoreRow::into_domain))
    }

    /// Lists every store in creation order.
    pub async fn list_all(&self) -> Result<Vec<Store>, StoreError> {
        let rows = sqlx::query_as::<_, StoreRow>(
            "SELECT id, name, address, latitude, longitude, created_at FROM stores \
             ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoreRow::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoreRow {
    id: String,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    created_at: DateTime<Utc>,
}

impl StoreRow {
    fn into_domain(self) -> Store {
        Store {
            id: self.id,
            name: self.name,
            address: self.address,
            coordinate: Coordinate::new(self.latitude, self.longitude),
            created_at: self.created_at,
        }
    }
}

/// Errors that can occur on store records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store with the same id already exists")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for items. Each item row carries its stock reports as an
/// ordered JSON array and a version used for compare-and-set writes.
#[derive(Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
    max_attempts: u32,
}

impl ItemRepository {
    /// Runs `mutate` against the current item as one atomic unit of work.
    ///
    /// A missing item starts out empty. The write only lands if the row
    /// version is unchanged since the read; a lost race or a busy database
    /// rolls the attempt back and retries with a fresh read.
    pub async fn update_with_retry<F>(&self, name: &str, mutate: F) -> Result<Item, ItemError>
    where
        F: Fn(&mut Item) + Send + Sync,
    {
        for attempt in 1..=self.max_attempts {
            match self.try_update(name, &mutate).await {
                Ok(Some(item)) => return Ok(item),
                Ok(None) => {
                    debug!(stage = "storage", item = %name, attempt, "item version conflict");
                }
                Err(ItemError::Database(err)) if is_retryable(&err) => {
                    debug!(stage = "storage", item = %name, attempt, error = %err, "item write busy");
                }
                Err(err) => return Err(err),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(RETRY_BACKOFF_STEP * attempt).await;
            }
        }

        Err(ItemError::Conflict {
            name: name.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// One read-mutate-write attempt. `Ok(None)` signals a lost race.
    async fn try_update<F>(&self, name: &str, mutate: &F) -> Result<Option<Item>, ItemError>
    where
        F: Fn(&mut Item) + Send + Sync,
    {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT version, reports_json FROM items WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

        let (mut item, version) = match row {
            Some(row) => {
                let version: i64 = row.get("version");
                let reports_json: String = row.get("reports_json");
                let item = Item {
                    name: name.to_string(),
                    reports: serde_json::from_str(&reports_json)?,
                };
                (item, Some(version))
            }
            None => (Item::empty(name), None),
        };

        mutate(&mut item);

        let reports_json = serde_json::to_string(&item.reports)?;
        let updated_at = to_rfc3339(Utc::now());
        let result = match version {
            Some(version) => {
                sqlx::query(
                    "UPDATE items \
                     SET version = version + 1, reports_json = ?, updated_at = ? \
                     WHERE name = ? AND version = ?",
                )
                .bind(&reports_json)
                .bind(&updated_at)
                .bind(name)
                .bind(version)
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    "INSERT INTO items (name, version, reports_json, updated_at) \
                     VALUES (?, 1, ?, ?) \
                     ON CONFLICT(name) DO NOTHING",
                )
                .bind(name)
                .bind(&reports_json)
                .bind(&updated_at)
                .execute(&mut *tx)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(item))
    }

    /// Loads an item by normalized name.
    pub async fn fetch(&self, name: &str) -> Result<Option<Item>, ItemError> {
        let row = sqlx::query("SELECT name, reports_json FROM items WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_item(&row)).transpose()
    }

    /// Loads every item ordered by name.
    pub async fn list_all(&self) -> Result<Vec<Item>, ItemError> {
        let rows = sqlx::query("SELECT name, reports_json FROM items ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_item).collect()
    }
}

impl ItemStore for ItemRepository {
    type Error = ItemError;

    async fn apply<F>(&self, name: &str, mutate: F) -> Result<Item, ItemError>
    where
        F: Fn(&mut Item) + Send + Sync,
    {
        self.update_with_retry(name, mutate).await
    }
}

fn decode_item(row: &sqlx::sqlite::SqliteRow) -> Result<Item, ItemError> {
    let name: String = row.get("name");
    let reports_json: String = row.get("reports_json");
    Ok(Item {
        name,
        reports: serde_json::from_str(&reports_json)?,
    })
}

/// Errors that can occur while reading or updating items.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item {name:?} still conflicted after {attempts} attempts")]
    Conflict { name: String, attempts: u32 },
    #[error("failed to decode stock reports: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes.
fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

/// SQLITE_CONSTRAINT_PRIMARYKEY and SQLITE_CONSTRAINT_UNIQUE.
fn is_unique_violation(code: Option<&str>) -> bool {
    matches!(code, Some("1555") | Some("2067"))
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
