use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use core_types::{
    KbError, KbResult, KnowledgeBase, KnowledgeBaseStatus, KnowledgeBaseStore, PageData,
    Pagination,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

const SELECT_COLUMNS: &str = r#"
    SELECT id, dataset_id, rag_config_ref, name, description, status,
           creator, created_at, updater, updated_at
    FROM knowledge_bases
"#;

/// Knowledge-base rows on SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.as_ref().to_string_lossy()
        ))?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("cannot open {}", path.as_ref().display()))?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_bases (
                id TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL UNIQUE,
                rag_config_ref TEXT,
                name TEXT NOT NULL,
                description TEXT,
                status INTEGER NOT NULL DEFAULT 1,
                creator INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updater INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_knowledge_bases_creator
            ON knowledge_bases(creator, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }
}

#[async_trait]
impl KnowledgeBaseStore for SqliteStorage {
    async fn get(&self, id: Uuid) -> KbResult<Option<KnowledgeBase>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(KbError::storage)?;
        row.map(map_knowledge_base_row).transpose()
    }

    async fn insert(&self, record: &KnowledgeBase) -> KbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases(
                id, dataset_id, rag_config_ref, name, description, status,
                creator, created_at, updater, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.dataset_id)
        .bind(&record.rag_config_ref)
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.status.as_i64())
        .bind(record.creator)
        .bind(format_time(record.created_at))
        .bind(record.updater)
        .bind(format_time(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if let sqlx::Error::Database(db) = &err {
                if db.is_unique_violation() {
                    return KbError::DuplicateRecord(format!(
                        "dataset `{}` is already tracked",
                        record.dataset_id
                    ));
                }
            }
            KbError::storage(err)
        })?;
        debug!(id = %record.id, dataset_id = %record.dataset_id, "knowledge base row inserted");
        Ok(())
    }

    async fn update(&self, record: &KnowledgeBase) -> KbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_bases
            SET rag_config_ref = ?2, name = ?3, description = ?4, status = ?5,
                updater = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.rag_config_ref)
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.status.as_i64())
        .bind(record.updater)
        .bind(format_time(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(KbError::storage)?;

        if result.rows_affected() == 0 {
            return Err(KbError::RecordNotFound(format!("knowledge base {}", record.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> KbResult<()> {
        sqlx::query("DELETE FROM knowledge_bases WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(KbError::storage)?;
        Ok(())
    }

    async fn find_by_dataset_id(&self, dataset_id: &str) -> KbResult<Option<KnowledgeBase>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE dataset_id = ?1"))
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(KbError::storage)?;
        row.map(map_knowledge_base_row).transpose()
    }

    async fn find_by_name_for_creator(
        &self,
        name: &str,
        creator: i64,
        exclude: Option<Uuid>,
    ) -> KbResult<Option<KnowledgeBase>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE name = ?1 AND creator = ?2 AND (?3 IS NULL OR id != ?3) LIMIT 1"
        ))
        .bind(name)
        .bind(creator)
        .bind(exclude.map(|id| id.to_string()))
        .fetch_optional(&self.pool)
        .await
        .map_err(KbError::storage)?;
        row.map(map_knowledge_base_row).transpose()
    }

    async fn list_for_creator(
        &self,
        creator: i64,
        name_filter: Option<&str>,
        page: Pagination,
    ) -> KbResult<PageData<KnowledgeBase>> {
        let page = page.clamped();
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM knowledge_bases
            WHERE creator = ?1 AND (?2 IS NULL OR instr(name, ?2) > 0)
            "#,
        )
        .bind(creator)
        .bind(name_filter)
        .fetch_one(&self.pool)
        .await
        .map_err(KbError::storage)?;

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE creator = ?1 AND (?2 IS NULL OR instr(name, ?2) > 0) \
             ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
        ))
        .bind(creator)
        .bind(name_filter)
        .bind(i64::from(page.page_size))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(KbError::storage)?;

        let list = rows
            .into_iter()
            .map(map_knowledge_base_row)
            .collect::<KbResult<Vec<_>>>()?;
        Ok(PageData::new(list, total.max(0) as u64))
    }
}

fn map_knowledge_base_row(row: sqlx::sqlite::SqliteRow) -> KbResult<KnowledgeBase> {
    let id = Uuid::parse_str(row.get::<String, _>("id").as_str()).map_err(KbError::storage)?;
    Ok(KnowledgeBase {
        id,
        dataset_id: row.get("dataset_id"),
        rag_config_ref: row.get("rag_config_ref"),
        name: row.get("name"),
        description: row.get("description"),
        status: KnowledgeBaseStatus::from_i64(row.get("status")),
        creator: row.get("creator"),
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updater: row.get("updater"),
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}

fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_rfc3339(value: String) -> KbResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .map_err(KbError::storage)?
        .with_timezone(&Utc))
}
