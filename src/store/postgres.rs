//! PostgreSQL Durable Store
//!
//! Row store backed by a deadpool-postgres connection pool. Each call holds
//! one pooled connection for its duration.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use tokio_postgres::{NoTls, Row};
use tracing::info;

use super::{Deadline, DurableStore, RetryPolicy};
use crate::error::{StoreError, StoreResult};
use crate::models::{Computed, ResultRecord, Scores, StudentKey};

const COLUMNS: &str = "student_id, name, stream, english, mathematics, physics, chemistry, \
                       elective, status, total, passed, division";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS student_results (
    student_id  BIGINT PRIMARY KEY,
    name        TEXT NOT NULL,
    stream      TEXT NOT NULL,
    english     SMALLINT NOT NULL,
    mathematics SMALLINT NOT NULL,
    physics     SMALLINT NOT NULL,
    chemistry   SMALLINT NOT NULL,
    elective    SMALLINT NOT NULL,
    status      TEXT NOT NULL,
    total       INTEGER,
    passed      BOOLEAN,
    division    TEXT
)";

const INSERT_BATCH: &str = "INSERT INTO student_results (
    student_id, name, stream, english, mathematics, physics, chemistry,
    elective, status, total, passed, division
)
SELECT * FROM UNNEST(
    $1::BIGINT[], $2::TEXT[], $3::TEXT[], $4::SMALLINT[], $5::SMALLINT[], $6::SMALLINT[],
    $7::SMALLINT[], $8::SMALLINT[], $9::TEXT[], $10::INTEGER[], $11::BOOLEAN[], $12::TEXT[]
)
ON CONFLICT (student_id) DO NOTHING";

// == Configuration ==
/// Connection pool configuration for the durable store.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pooled connections
    pub max_size: usize,
    /// How long a caller waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "results".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

impl PgConfig {
    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> StoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts = pool_timeouts(self.acquire_timeout);
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable(format!("failed to create pool: {}", e)))
    }
}

/// Bounded wait on pool exhaustion; creation and recycling share the limit.
fn pool_timeouts(acquire_timeout: Duration) -> Timeouts {
    let mut timeouts = Timeouts::default();
    timeouts.wait = Some(acquire_timeout);
    timeouts.create = Some(acquire_timeout);
    timeouts.recycle = Some(acquire_timeout);
    timeouts
}

// == Store ==
/// Durable store over the `student_results` table.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    retry: RetryPolicy,
}

impl PgStore {
    pub fn new(pool: Pool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Creates the pool from configuration.
    pub fn from_config(config: &PgConfig, retry: RetryPolicy) -> StoreResult<Self> {
        Ok(Self::new(config.create_pool()?, retry))
    }

    /// Creates the results table if it does not exist.
    pub async fn ensure_schema(&self, deadline: Deadline) -> StoreResult<()> {
        let pool = &self.pool;
        self.retry
            .run("ensure_schema", deadline, move || async move {
                let conn = pool.get().await?;
                conn.batch_execute(CREATE_TABLE).await?;
                Ok(())
            })
            .await?;
        info!("student_results schema ready");
        Ok(())
    }
}

#[async_trait]
impl DurableStore for PgStore {
    async fn fetch(&self, key: StudentKey, deadline: Deadline) -> StoreResult<Option<ResultRecord>> {
        let pool = &self.pool;
        self.retry
            .run("fetch", deadline, move || async move {
                let conn = pool.get().await?;
                let stmt = conn
                    .prepare_cached(&format!(
                        "SELECT {} FROM student_results WHERE student_id = $1",
                        COLUMNS
                    ))
                    .await?;
                let row = conn.query_opt(&stmt, &[&key.get()]).await?;
                row.as_ref().map(row_to_record).transpose()
            })
            .await
    }

    async fn fetch_page(
        &self,
        start: StudentKey,
        end: StudentKey,
        limit: usize,
        deadline: Deadline,
    ) -> StoreResult<Vec<ResultRecord>> {
        let pool = &self.pool;
        let limit = limit as i64;
        self.retry
            .run("fetch_page", deadline, move || async move {
                let conn = pool.get().await?;
                let stmt = conn
                    .prepare_cached(&format!(
                        "SELECT {} FROM student_results \
                         WHERE student_id BETWEEN $1 AND $2 \
                         ORDER BY student_id LIMIT $3",
                        COLUMNS
                    ))
                    .await?;
                let rows = conn
                    .query(&stmt, &[&start.get(), &end.get(), &limit])
                    .await?;
                rows.iter().map(row_to_record).collect()
            })
            .await
    }

    async fn insert_batch(&self, rows: &[ResultRecord], deadline: Deadline) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = BatchColumns::from_records(rows);
        let columns = &columns;
        let pool = &self.pool;
        self.retry
            .run("insert_batch", deadline, move || async move {
                let conn = pool.get().await?;
                let stmt = conn.prepare_cached(INSERT_BATCH).await?;
                let inserted = conn
                    .execute(
                        &stmt,
                        &[
                            &columns.student_id,
                            &columns.name,
                            &columns.stream,
                            &columns.english,
                            &columns.mathematics,
                            &columns.physics,
                            &columns.chemistry,
                            &columns.elective,
                            &columns.status,
                            &columns.total,
                            &columns.passed,
                            &columns.division,
                        ],
                    )
                    .await?;
                Ok(inserted)
            })
            .await
    }
}

// == Row Mapping ==
/// Column arrays for one `UNNEST` insert.
#[derive(Debug, Default)]
struct BatchColumns {
    student_id: Vec<i64>,
    name: Vec<String>,
    stream: Vec<String>,
    english: Vec<i16>,
    mathematics: Vec<i16>,
    physics: Vec<i16>,
    chemistry: Vec<i16>,
    elective: Vec<i16>,
    status: Vec<String>,
    total: Vec<Option<i32>>,
    passed: Vec<Option<bool>>,
    division: Vec<Option<String>>,
}

impl BatchColumns {
    fn from_records(records: &[ResultRecord]) -> Self {
        let mut cols = BatchColumns::default();
        for r in records {
            cols.student_id.push(r.student_id.get());
            cols.name.push(r.name.clone());
            cols.stream.push(r.stream.as_str().to_string());
            cols.english.push(r.scores.english);
            cols.mathematics.push(r.scores.mathematics);
            cols.physics.push(r.scores.physics);
            cols.chemistry.push(r.scores.chemistry);
            cols.elective.push(r.scores.elective);
            cols.status.push(r.status.as_str().to_string());
            cols.total.push(r.computed.map(|c| c.total));
            cols.passed.push(r.computed.map(|c| c.passed));
            cols.division
                .push(r.computed.map(|c| c.division.as_str().to_string()));
        }
        cols
    }
}

fn row_to_record(row: &Row) -> StoreResult<ResultRecord> {
    let student_id: i64 = column(row, "student_id")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        key: student_id.to_string(),
        reason,
    };

    let total: Option<i32> = column(row, "total")?;
    let passed: Option<bool> = column(row, "passed")?;
    let division: Option<String> = column(row, "division")?;
    let computed = match (total, passed, division) {
        (Some(total), Some(passed), Some(division)) => Some(Computed {
            total,
            passed,
            division: division.parse().map_err(corrupt)?,
        }),
        (None, None, None) => None,
        _ => return Err(corrupt("partially stored computed fields".to_string())),
    };

    Ok(ResultRecord {
        student_id: StudentKey(student_id),
        name: column(row, "name")?,
        stream: column::<String>(row, "stream")?.parse().map_err(corrupt)?,
        scores: Scores {
            english: column(row, "english")?,
            mathematics: column(row, "mathematics")?,
            physics: column(row, "physics")?,
            chemistry: column(row, "chemistry")?,
            elective: column(row, "elective")?,
        },
        status: column::<String>(row, "status")?.parse().map_err(corrupt)?,
        computed,
    })
}

fn column<'a, T>(row: &'a Row, name: &str) -> StoreResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name).map_err(|e| StoreError::Corrupt {
        key: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultStatus, Stream};

    #[test]
    fn test_batch_columns_carry_computed_as_nullable() {
        let scores = Scores {
            english: 40,
            mathematics: 40,
            physics: 40,
            chemistry: 40,
            elective: 40,
        };
        let declared = ResultRecord::new(
            StudentKey(1),
            "a",
            Stream::Arts,
            scores,
            ResultStatus::Declared,
        );
        let withheld = ResultRecord::new(
            StudentKey(2),
            "b",
            Stream::Arts,
            scores,
            ResultStatus::Withheld,
        );

        let cols = BatchColumns::from_records(&[declared, withheld]);
        assert_eq!(cols.student_id, vec![1, 2]);
        assert_eq!(cols.total, vec![Some(200), None]);
        assert_eq!(cols.division, vec![Some("third".to_string()), None]);
        assert_eq!(cols.status, vec!["declared", "withheld"]);
    }

    #[test]
    fn test_default_config() {
        let config = PgConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
    }
}
