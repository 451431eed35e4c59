//! SQLite-based storage implementation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{params, Connection, InterruptHandle, OpenFlags, OptionalExtension};
use tracing::{debug, info};
use ulid::Ulid;

use review_core::{
    DatabaseConfig, KeywordQuery, MultiMatchMode, Record, RecordVectors, Result, ReviewError,
    ScopeFilter, SearchHit, Stats, Store, TextField, VectorQuery,
};

use crate::schema::{
    META_DIMENSION, META_SCHEMA_VERSION, RECORD_COLUMNS, RECORD_COLUMN_COUNT, SCHEMA,
    SCHEMA_VERSION,
};

/// Idle reader connections kept for reuse.
const MAX_IDLE_READERS: usize = 4;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// SQLite-based store implementation.
///
/// Writes go through a single connection behind a blocking Mutex. Reads
/// check out their own connection from a small pool, so the vector and
/// keyword sub-queries of one retrieval run side by side. Every statement
/// runs on the blocking thread pool via `spawn_blocking`; dropping the
/// awaiting future interrupts a read that is still running.
pub struct SqliteStore {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<ReaderPool>,

    /// Vector dimension recorded in `store_meta`.
    dimension: usize,
}

impl SqliteStore {
    /// Open or create a database at the given path with default settings.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            dimension,
            ..Default::default()
        };
        Self::open_with_config(&config)
    }

    /// Open or create a database described by `config`.
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.as_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ReviewError::database(format!("Failed to open database: {}", e)))?;

        Self::configure_connection(&conn, config)?;
        let readers = ReaderPool::new(
            path.to_path_buf(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            config,
        );
        Self::init(conn, readers, config.dimension, path)
    }

    /// Open an in-memory database (for testing).
    ///
    /// Readers share the writer's cache through a uniquely named memory URI.
    pub fn open_memory(dimension: usize) -> Result<Self> {
        let uri = format!("file:reviews-{}?mode=memory&cache=shared", Ulid::new());
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ReviewError::database(format!("Failed to open in-memory database: {}", e)))?;

        let readers = ReaderPool::new(
            PathBuf::from(&uri),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            &DatabaseConfig::default(),
        );
        Self::init(conn, readers, dimension, Path::new(":memory:"))
    }

    fn init(conn: Connection, readers: ReaderPool, dimension: usize, path: &Path) -> Result<Self> {
        if dimension == 0 {
            return Err(ReviewError::config("vector dimension must be at least 1"));
        }

        conn.execute_batch(SCHEMA)
            .map_err(|e| ReviewError::database(format!("Failed to initialize schema: {}", e)))?;

        Self::register_functions(&conn)?;
        Self::check_dimension(&conn, dimension)?;

        info!("Database opened at {:?} (dimension {})", path, dimension);

        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: Arc::new(readers),
            dimension,
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
        let journal_mode = if config.wal_mode { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = {};
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
            "#,
            journal_mode, config.cache_size, config.busy_timeout_ms
        ))
        .map_err(|e| ReviewError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Register `cosine_similarity(a BLOB, b BLOB) -> REAL`.
    fn register_functions(conn: &Connection) -> Result<()> {
        conn.create_scalar_function(
            "cosine_similarity",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let a = ctx
                    .get_raw(0)
                    .as_blob()
                    .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
                let b = ctx
                    .get_raw(1)
                    .as_blob()
                    .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
                Ok(cosine_similarity_bytes(a, b))
            },
        )
        .map_err(|e| ReviewError::database(format!("Failed to register functions: {}", e)))
    }

    /// Record the dimension on first open; refuse a mismatching reopen.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![META_DIMENSION],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ReviewError::database(e.to_string()))?;

        match stored {
            Some(value) => {
                let stored: usize = value.parse().map_err(|_| {
                    ReviewError::database(format!("Corrupt stored dimension: {}", value))
                })?;
                if stored != dimension {
                    return Err(ReviewError::config(format!(
                        "store was created with dimension {}, opened with {}",
                        stored, dimension
                    )));
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2), (?3, ?4)",
                    params![
                        META_DIMENSION,
                        dimension.to_string(),
                        META_SCHEMA_VERSION,
                        SCHEMA_VERSION.to_string()
                    ],
                )
                .map_err(|e| ReviewError::database(e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Execute a blocking write on the writer connection.
    async fn with_writer<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| ReviewError::database(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| ReviewError::internal(format!("Store task failed: {}", e)))?
    }

    /// Execute a blocking read on a pooled reader connection.
    ///
    /// If the returned future is dropped before the read finishes, the
    /// statement is interrupted and the connection goes back to the pool.
    async fn with_reader<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let readers = Arc::clone(&self.readers);
        let read = Arc::new(ReadState::default());
        let _guard = InterruptOnDrop(Arc::clone(&read));

        tokio::task::spawn_blocking(move || {
            let conn = readers.checkout()?;
            if !read.start(conn.get_interrupt_handle()) {
                readers.checkin(conn);
                return Err(ReviewError::database("Read cancelled before it started"));
            }
            let result = f(&conn);
            read.finish();
            readers.checkin(conn);
            result
        })
        .await
        .map_err(|e| ReviewError::internal(format!("Store task failed: {}", e)))?
    }
}

/// Read connections opened on demand and reused.
struct ReaderPool {
    target: PathBuf,
    flags: OpenFlags,
    cache_size: i32,
    busy_timeout_ms: u32,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn new(target: PathBuf, flags: OpenFlags, config: &DatabaseConfig) -> Self {
        Self {
            target,
            flags,
            cache_size: config.cache_size,
            busy_timeout_ms: config.busy_timeout_ms,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn checkout(&self) -> Result<Connection> {
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => self.open(),
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.target, self.flags)
            .map_err(|e| ReviewError::database(format!("Failed to open reader: {}", e)))?;

        conn.execute_batch(&format!(
            r#"
            PRAGMA query_only = ON;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            self.cache_size, self.busy_timeout_ms
        ))
        .map_err(|e| ReviewError::database(format!("Failed to configure reader: {}", e)))?;

        SqliteStore::register_functions(&conn)?;
        debug!("Opened reader connection on {:?}", self.target);
        Ok(conn)
    }
}

enum ReadPhase {
    Pending,
    Running(InterruptHandle),
    Cancelled,
    Finished,
}

/// Progress of one pooled read, shared with the future awaiting it.
struct ReadState(Mutex<ReadPhase>);

impl Default for ReadState {
    fn default() -> Self {
        Self(Mutex::new(ReadPhase::Pending))
    }
}

impl ReadState {
    fn phase(&self) -> MutexGuard<'_, ReadPhase> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// False if the awaiting future is already gone.
    fn start(&self, handle: InterruptHandle) -> bool {
        let mut phase = self.phase();
        if matches!(*phase, ReadPhase::Cancelled) {
            return false;
        }
        *phase = ReadPhase::Running(handle);
        true
    }

    fn finish(&self) {
        *self.phase() = ReadPhase::Finished;
    }

    fn cancel(&self) {
        let mut phase = self.phase();
        match &*phase {
            ReadPhase::Finished => return,
            ReadPhase::Running(handle) => {
                handle.interrupt();
                debug!("Interrupted abandoned read");
            }
            ReadPhase::Pending | ReadPhase::Cancelled => {}
        }
        *phase = ReadPhase::Cancelled;
    }
}

struct InterruptOnDrop(Arc<ReadState>);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    // Record operations

    async fn insert_records(&self, records: &[Record]) -> Result<usize> {
        for record in records {
            record.vectors.validate(self.dimension)?;
        }

        let records: Vec<Record> = records.to_vec();
        self.with_writer(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let mut inserted = 0;
            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT OR IGNORE INTO records (id, scope_key, appid, question, answer,
                                                      section, question_vector, answer_vector,
                                                      question_answer_vector, provenance,
                                                      content_hash, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                        "#,
                    )
                    .map_err(|e| ReviewError::database(e.to_string()))?;

                for record in &records {
                    let provenance = serde_json::to_string(&record.provenance)?;
                    let content_hash = record.content_hash.map(|h| h.to_vec());
                    inserted += stmt
                        .execute(params![
                            record.id.to_string(),
                            record.scope_key,
                            record.provenance.appid,
                            record.question,
                            record.answer,
                            record.section,
                            vec_to_bytes(&record.vectors.question),
                            vec_to_bytes(&record.vectors.answer),
                            vec_to_bytes(&record.vectors.question_answer),
                            provenance,
                            content_hash,
                            record.created_at as i64,
                        ])
                        .map_err(|e| {
                            ReviewError::database(format!("Failed to insert record: {}", e))
                        })?;
                }
            }

            tx.commit()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            debug!(
                "Inserted {} of {} records ({} duplicates)",
                inserted,
                records.len(),
                records.len() - inserted
            );
            Ok(inserted)
        })
        .await
    }

    async fn get_record(&self, id: Ulid) -> Result<Option<Record>> {
        self.with_reader(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM records r WHERE r.id = ?1",
                    RECORD_COLUMNS
                ))
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![id.to_string()], row_to_record)
                .optional()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            Ok(result)
        })
        .await
    }

    async fn list_records(
        &self,
        filter: &ScopeFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Record>> {
        let scope = filter.scope_key().to_string();
        self.with_reader(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {} FROM records r
                    WHERE r.scope_key = ?1
                    ORDER BY r.created_at, r.id
                    LIMIT ?2 OFFSET ?3
                    "#,
                    RECORD_COLUMNS
                ))
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let records = stmt
                .query_map(params![scope, limit, offset], row_to_record)
                .map_err(|e| ReviewError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            Ok(records)
        })
        .await
    }

    async fn list_by_app_id(&self, appid: &str, limit: u32) -> Result<Vec<Record>> {
        let appid = appid.to_string();
        self.with_reader(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {} FROM records r
                    WHERE r.appid = ?1
                    ORDER BY r.created_at, r.id
                    LIMIT ?2
                    "#,
                    RECORD_COLUMNS
                ))
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let records = stmt
                .query_map(params![appid, limit], row_to_record)
                .map_err(|e| ReviewError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            Ok(records)
        })
        .await
    }

    async fn list_all(&self, limit: u32) -> Result<Vec<Record>> {
        self.with_reader(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {} FROM records r
                    ORDER BY r.created_at, r.id
                    LIMIT ?1
                    "#,
                    RECORD_COLUMNS
                ))
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let records = stmt
                .query_map(params![limit], row_to_record)
                .map_err(|e| ReviewError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            Ok(records)
        })
        .await
    }

    async fn delete_scope(&self, filter: &ScopeFilter) -> Result<u64> {
        let scope = filter.scope_key().to_string();
        self.with_writer(move |conn| {
            let deleted = conn
                .execute("DELETE FROM records WHERE scope_key = ?1", params![scope])
                .map_err(|e| ReviewError::database(e.to_string()))?;

            debug!("Deleted {} records from scope {:?}", deleted, scope);
            Ok(deleted as u64)
        })
        .await
    }

    // Scope operations

    async fn count_records(&self, filter: Option<&ScopeFilter>) -> Result<u64> {
        let scope = filter.map(|f| f.scope_key().to_string());
        self.with_reader(move |conn| count_records(conn, scope.as_deref()))
            .await
    }

    async fn list_scopes(&self) -> Result<Vec<(String, u64)>> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT scope_key, COUNT(*) FROM records GROUP BY scope_key ORDER BY scope_key",
                )
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let scopes = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })
                .map_err(|e| ReviewError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            Ok(scopes)
        })
        .await
    }

    // Search operations

    async fn vector_search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        if query.vector().len() != self.dimension {
            return Err(ReviewError::DimensionMismatch {
                field: query.field().column().to_string(),
                expected: self.dimension,
                actual: query.vector().len(),
            });
        }

        let embedding_bytes = vec_to_bytes(query.vector());
        let column = query.field().column();
        let scope = query.filter().scope_key().to_string();
        let k = query.k();
        let num_candidates = query.num_candidates();

        self.with_reader(move |conn| {
            // Candidate pool first, then exact cosine ranking inside it.
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {columns}, cosine_similarity(r.{column}, ?1) AS score
                    FROM (
                        SELECT * FROM records
                        WHERE scope_key = ?2
                        ORDER BY rowid
                        LIMIT ?4
                    ) AS r
                    ORDER BY score DESC, r.id ASC
                    LIMIT ?3
                    "#,
                    columns = RECORD_COLUMNS,
                    column = column,
                ))
                .map_err(|e| ReviewError::database(e.to_string()))?;

            let hits = stmt
                .query_map(params![embedding_bytes, scope, k, num_candidates], row_to_hit)
                .map_err(|e| ReviewError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ReviewError::database(e.to_string()))?;

            debug!("Vector search on {} returned {} hits", column, hits.len());
            Ok(hits)
        })
        .await
    }

    async fn keyword_search(&self, query: &KeywordQuery) -> Result<Vec<SearchHit>> {
        let terms = query_terms(query.text());
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let query = query.clone();
        self.with_reader(move |conn| keyword_search(conn, &query, &terms))
            .await
    }

    // Stats

    async fn get_stats(&self, filter: Option<&ScopeFilter>) -> Result<Stats> {
        let scope = filter.map(|f| f.scope_key().to_string());
        let dimension = self.dimension;

        self.with_reader(move |conn| {
            let records = count_records(conn, scope.as_deref())?;

            let scopes: i64 = conn
                .query_row("SELECT COUNT(DISTINCT scope_key) FROM records", [], |row| {
                    row.get(0)
                })
                .map_err(|e| ReviewError::database(e.to_string()))?;

            // Get page count and page size to estimate storage
            let page_count: i64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: i64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(Stats {
                records,
                scopes: scopes as u64,
                dimension,
                storage_bytes: (page_count * page_size) as u64,
                filter: scope,
            })
        })
        .await
    }
}

// Helper functions

fn count_records(conn: &Connection, scope: Option<&str>) -> Result<u64> {
    let count: i64 = match scope {
        Some(scope) => conn.query_row(
            "SELECT COUNT(*) FROM records WHERE scope_key = ?1",
            params![scope],
            |row| row.get(0),
        ),
        None => conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0)),
    }
    .map_err(|e| ReviewError::database(e.to_string()))?;

    Ok(count as u64)
}

/// FTS5 selects the matching records in scope; scoring happens here.
///
/// Each field gets its own BM25 score from corpus-wide column statistics.
/// Best-fields keeps the highest weighted field score, most-fields sums
/// them.
fn keyword_search(
    conn: &Connection,
    query: &KeywordQuery,
    terms: &[String],
) -> Result<Vec<SearchHit>> {
    let total_docs = count_records(conn, None)?;
    let columns = query
        .fields()
        .iter()
        .map(|fw| ColumnStats::load(conn, fw.field, terms, total_docs).map(|stats| (fw, stats)))
        .collect::<Result<Vec<_>>>()?;

    let fields: Vec<TextField> = query.fields().iter().map(|fw| fw.field).collect();
    let mut stmt = conn
        .prepare(&format!(
            r#"
            SELECT {}
            FROM records_fts
            JOIN records r ON r.rowid = records_fts.rowid
            WHERE records_fts MATCH ?1
            AND r.scope_key = ?2
            "#,
            RECORD_COLUMNS
        ))
        .map_err(|e| ReviewError::database(e.to_string()))?;

    let records = stmt
        .query_map(
            params![match_expression(&fields, terms), query.filter().scope_key()],
            row_to_record,
        )
        .map_err(|e| ReviewError::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ReviewError::database(e.to_string()))?;

    let mut hits: Vec<SearchHit> = records
        .into_iter()
        .map(|record| {
            let field_scores = columns.iter().map(|(fw, stats)| {
                stats.score(field_text(&record, fw.field), terms) * fw.weight as f64
            });
            let score = match query.mode() {
                MultiMatchMode::BestFields => field_scores.fold(0.0, f64::max),
                MultiMatchMode::MostFields => field_scores.sum(),
            };
            SearchHit {
                id: record.id,
                score: score as f32,
                record,
            }
        })
        .collect();

    sort_hits(&mut hits);
    hits.truncate(query.k() as usize);

    debug!(
        "Keyword search ({}, {:?}) returned {} hits",
        query.describe_fields(),
        query.mode(),
        hits.len()
    );
    Ok(hits)
}

/// Corpus-wide term statistics of one FTS5 column.
struct ColumnStats {
    total_docs: u64,
    avg_len: f64,
    doc_freq: HashMap<String, u64>,
}

impl ColumnStats {
    fn load(conn: &Connection, field: TextField, terms: &[String], total_docs: u64) -> Result<Self> {
        let total_tokens: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(cnt), 0) FROM records_fts_col WHERE col = ?1",
                params![field.column()],
                |row| row.get(0),
            )
            .map_err(|e| ReviewError::database(e.to_string()))?;

        let mut stmt = conn
            .prepare("SELECT doc FROM records_fts_col WHERE col = ?1 AND term = ?2")
            .map_err(|e| ReviewError::database(e.to_string()))?;

        let mut doc_freq = HashMap::with_capacity(terms.len());
        for term in terms {
            let docs: Option<i64> = stmt
                .query_row(params![field.column(), term], |row| row.get(0))
                .optional()
                .map_err(|e| ReviewError::database(e.to_string()))?;
            doc_freq.insert(term.clone(), docs.unwrap_or(0) as u64);
        }

        let avg_len = if total_docs > 0 {
            total_tokens as f64 / total_docs as f64
        } else {
            0.0
        };

        Ok(Self {
            total_docs,
            avg_len,
            doc_freq,
        })
    }

    /// BM25 of `text` for the query terms. IDF is `ln(1 + (N - n + 0.5) / (n + 0.5))`,
    /// which stays positive however common a term is.
    fn score(&self, text: &str, terms: &[String]) -> f64 {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return 0.0;
        }

        let length_ratio = if self.avg_len > 0.0 {
            tokens.len() as f64 / self.avg_len
        } else {
            1.0
        };
        let n_docs = self.total_docs as f64;

        terms
            .iter()
            .map(|term| {
                let tf = tokens.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let n = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let idf = (1.0 + (n_docs - n + 0.5) / (n + 0.5)).ln();
                idf * tf * (BM25_K1 + 1.0)
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_ratio))
            })
            .sum()
    }
}

fn field_text(record: &Record, field: TextField) -> &str {
    match field {
        TextField::Question => &record.question,
        TextField::Answer => &record.answer,
        TextField::Section => &record.section,
    }
}

/// Highest score first, ties by id.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Convert a row to a Record.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id_str: String = row.get(0)?;
    let question_vector: Vec<u8> = row.get(5)?;
    let answer_vector: Vec<u8> = row.get(6)?;
    let question_answer_vector: Vec<u8> = row.get(7)?;
    let provenance_str: String = row.get(8)?;
    let content_hash: Option<Vec<u8>> = row.get(9)?;

    Ok(Record {
        id: Ulid::from_string(&id_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        scope_key: row.get(1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
        section: row.get(4)?,
        vectors: RecordVectors {
            question: bytes_to_vec(&question_vector),
            answer: bytes_to_vec(&answer_vector),
            question_answer: bytes_to_vec(&question_answer_vector),
        },
        provenance: serde_json::from_str(&provenance_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
        content_hash: content_hash.and_then(|v| v.try_into().ok()),
        created_at: row.get::<_, i64>(10)? as u64,
    })
}

/// Convert a row with a trailing score column to a SearchHit.
fn row_to_hit(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchHit> {
    let record = row_to_record(row)?;
    let score: f64 = row.get(RECORD_COLUMN_COUNT)?;
    Ok(SearchHit {
        id: record.id,
        score: score as f32,
        record,
    })
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity of two little-endian f32 blobs. Zero vectors and
/// length mismatches score 0.
fn cosine_similarity_bytes(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() || a.len() % 4 != 0 {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        let x = f32::from_le_bytes([x[0], x[1], x[2], x[3]]) as f64;
        let y = f32::from_le_bytes([y[0], y[1], y[2], y[3]]) as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Lowercase alphanumeric tokens, split the way the FTS5 tokenizer splits.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Distinct query terms in first-seen order. Punctuation never reaches the
/// FTS5 parser.
fn query_terms(text: &str) -> Vec<String> {
    let mut terms = tokenize(text);
    let mut seen = HashSet::new();
    terms.retain(|t| seen.insert(t.clone()));
    terms
}

/// `{col ...} : ("a" OR "b")`, matching any term in the given columns.
fn match_expression(fields: &[TextField], terms: &[String]) -> String {
    let columns = fields
        .iter()
        .map(|f| f.column())
        .collect::<Vec<_>>()
        .join(" ");
    let terms = terms
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("{{{}}} : ({})", columns, terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use review_core::{FieldWeight, ReviewProvenance, VectorField};

    const DIM: usize = 4;

    fn scope(key: &str) -> ScopeFilter {
        ScopeFilter::new(Some(key)).unwrap()
    }

    fn record(scope_key: &str, question: &str, answer: &str, section: &str, v: [f32; DIM]) -> Record {
        Record::new(
            scope_key,
            question,
            answer,
            section,
            RecordVectors {
                question: v.to_vec(),
                answer: v.to_vec(),
                question_answer: v.to_vec(),
            },
            ReviewProvenance {
                appid: "1091500".to_string(),
                ..Default::default()
            },
        )
    }

    fn keyword_query(text: &str, scope_key: &str, mode: MultiMatchMode) -> KeywordQuery {
        KeywordQuery::new(
            text,
            vec![
                FieldWeight::new(TextField::Question, 3.0),
                FieldWeight::new(TextField::Answer, 1.0),
                FieldWeight::new(TextField::Section, 1.0),
            ],
            mode,
            10,
            scope(scope_key),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        assert_eq!(store.dimension(), DIM);
        assert_eq!(store.count_records(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.db");

        drop(SqliteStore::open(&path, DIM).unwrap());
        assert!(SqliteStore::open(&path, DIM).is_ok());
        let err = SqliteStore::open(&path, 8).err().unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_record_roundtrip_and_dedup() {
        let store = SqliteStore::open_memory(DIM).unwrap();

        let rec = record("Cyberpunk 2077", "Is it buggy?", "Very", "bugs", [1.0, 0.0, 0.0, 0.0]);
        let id = rec.id;
        assert_eq!(store.insert_records(&[rec.clone()]).await.unwrap(), 1);

        let fetched = store.get_record(id).await.unwrap().unwrap();
        assert_eq!(fetched, rec);

        // Same content under a fresh id is a duplicate
        let again = record("Cyberpunk 2077", "Is it buggy?", "Very", "bugs", [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(store.insert_records(&[again]).await.unwrap(), 0);
        assert_eq!(store.count_records(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_partial_vectors() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let mut rec = record("Game", "q", "a", "s", [1.0, 0.0, 0.0, 0.0]);
        rec.vectors.answer.pop();

        let err = store.insert_records(&[rec]).await.unwrap_err();
        assert!(matches!(err, ReviewError::DimensionMismatch { .. }));
        assert_eq!(store.count_records(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scopes_listing_and_delete() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        store
            .insert_records(&[
                record("A", "q1", "a1", "audio", [1.0, 0.0, 0.0, 0.0]),
                record("A", "q2", "a2", "video", [0.0, 1.0, 0.0, 0.0]),
                record("B", "q3", "a3", "plot", [0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let scopes = store.list_scopes().await.unwrap();
        assert_eq!(scopes, vec![("A".to_string(), 2), ("B".to_string(), 1)]);
        assert_eq!(store.list_records(&scope("A"), 10, 0).await.unwrap().len(), 2);
        assert_eq!(store.list_by_app_id("1091500", 10).await.unwrap().len(), 3);

        assert_eq!(store.delete_scope(&scope("A")).await.unwrap(), 2);
        assert_eq!(store.count_records(Some(&scope("A"))).await.unwrap(), 0);

        let stats = store.get_stats(None).await.unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.scopes, 1);
        assert_eq!(stats.dimension, DIM);
    }

    #[tokio::test]
    async fn test_list_all_spans_scopes() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let mut records = Vec::new();
        for (i, scope_key) in ["A", "B", "C"].iter().enumerate() {
            let mut rec = record(scope_key, &format!("q{}", i), "a", "s", [1.0, 0.0, 0.0, 0.0]);
            rec.created_at = 1_000 + i as u64;
            records.push(rec);
        }
        store.insert_records(&records).await.unwrap();

        let listed = store.list_all(2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, records[0].id);
        assert_eq!(listed[1].id, records[1].id);
        assert_eq!(store.list_all(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_provenance_is_an_error() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let rec = record("A", "q", "a", "s", [1.0, 0.0, 0.0, 0.0]);
        store.insert_records(&[rec.clone()]).await.unwrap();

        store
            .writer
            .lock()
            .unwrap()
            .execute(
                "UPDATE records SET provenance = 'not json' WHERE id = ?1",
                params![rec.id.to_string()],
            )
            .unwrap();

        let err = store.get_record(rec.id).await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    const ENDLESS_QUERY: &str =
        "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT COUNT(*) FROM n";

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_read_does_not_block_others_and_is_interrupted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("reviews.db"), DIM).unwrap());
        store
            .insert_records(&[record("A", "q", "a", "s", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let slow = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .with_reader(move |conn| {
                        let _ = started_tx.send(());
                        let result = conn.query_row(ENDLESS_QUERY, [], |row| row.get::<_, i64>(0));
                        let _ = done_tx.send(result.is_err());
                        result.map_err(|e| ReviewError::database(e.to_string()))
                    })
                    .await
            })
        };

        tokio::task::spawn_blocking(move || started_rx.recv_timeout(Duration::from_secs(10)))
            .await
            .unwrap()
            .unwrap();

        // A second read gets its own connection while the first is running.
        let count = tokio::time::timeout(Duration::from_secs(5), store.count_records(None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);

        slow.abort();
        assert!(slow.await.unwrap_err().is_cancelled());

        let interrupted =
            tokio::task::spawn_blocking(move || done_rx.recv_timeout(Duration::from_secs(10)))
                .await
                .unwrap();
        assert_eq!(interrupted, Ok(true));
        assert_eq!(store.count_records(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_cosine_within_scope() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let near = record("A", "near", "x", "s", [1.0, 0.1, 0.0, 0.0]);
        let far = record("A", "far", "x", "s", [0.0, 0.0, 1.0, 0.0]);
        let other_scope = record("B", "exact", "x", "s", [1.0, 0.0, 0.0, 0.0]);
        store
            .insert_records(&[far.clone(), near.clone(), other_scope])
            .await
            .unwrap();

        let query = VectorQuery::new(
            VectorField::Question,
            vec![1.0, 0.0, 0.0, 0.0],
            10,
            10_000,
            scope("A"),
        )
        .unwrap();
        let hits = store.vector_search(&query).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, near.id);
        assert_eq!(hits[1].id, far.id);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.record.scope_key == "A"));
    }

    #[tokio::test]
    async fn test_vector_search_rejects_wrong_dimension() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let query =
            VectorQuery::new(VectorField::Answer, vec![1.0, 0.0], 5, 100, scope("A")).unwrap();
        assert!(matches!(
            store.vector_search(&query).await,
            Err(ReviewError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_keyword_search_best_fields_prefers_question() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let in_question = record("A", "Are there crashes?", "Rarely", "stability", [0.0; DIM]);
        let in_answer = record("A", "How stable is it?", "Some crashes happen", "stability", [0.0; DIM]);
        let wrong_scope = record("B", "Are there crashes?", "Yes", "stability", [0.0; DIM]);
        store
            .insert_records(&[in_answer.clone(), in_question.clone(), wrong_scope])
            .await
            .unwrap();

        let hits = store
            .keyword_search(&keyword_query("crashes?", "A", MultiMatchMode::BestFields))
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, in_question.id);
        assert_eq!(hits[1].id, in_answer.id);
    }

    #[tokio::test]
    async fn test_keyword_search_common_question_term_keeps_boost() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let questions = [
            record("A", "Any crashes in co-op?", "Not that I saw", "multiplayer", [0.0; DIM]),
            record("A", "Are crashes common late game?", "Sometimes", "stability", [0.0; DIM]),
            record("A", "Are crashes fixed yet?", "Mostly", "stability", [0.0; DIM]),
        ];
        let in_answer = record(
            "A",
            "How is the performance?",
            "Smooth, but it crashes when alt-tabbing",
            "performance",
            [0.0; DIM],
        );
        let mut all = questions.to_vec();
        all.push(in_answer.clone());
        store.insert_records(&all).await.unwrap();

        let hits = store
            .keyword_search(&keyword_query("crashes", "A", MultiMatchMode::BestFields))
            .await
            .unwrap();

        // "crashes" is in three of four questions; the 3x boost still wins.
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[3].id, in_answer.id);
        assert!(hits[..3].iter().all(|h| h.score > hits[3].score));
    }

    #[tokio::test]
    async fn test_keyword_search_most_fields() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let both = record("A", "Is the audio good?", "The audio is great", "audio", [0.0; DIM]);
        let one = record("A", "Is the plot good?", "Decent audio", "plot", [0.0; DIM]);
        store.insert_records(&[one.clone(), both.clone()]).await.unwrap();

        let hits = store
            .keyword_search(&keyword_query("audio", "A", MultiMatchMode::MostFields))
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, both.id);
    }

    #[tokio::test]
    async fn test_keyword_search_punctuation_only() {
        let store = SqliteStore::open_memory(DIM).unwrap();
        let hits = store
            .keyword_search(&keyword_query("?!", "A", MultiMatchMode::BestFields))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_cosine_similarity_bytes() {
        let a = vec_to_bytes(&[1.0, 0.0]);
        let b = vec_to_bytes(&[0.0, 2.0]);
        let zero = vec_to_bytes(&[0.0, 0.0]);
        assert!((cosine_similarity_bytes(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity_bytes(&a, &b).abs() < 1e-9);
        assert_eq!(cosine_similarity_bytes(&a, &zero), 0.0);
    }

    #[test]
    fn test_query_terms_and_expression() {
        let terms = query_terms("Is God of War: Ragnarok OR \"kids\"? is it?");
        assert_eq!(terms, vec!["is", "god", "of", "war", "ragnarok", "or", "kids", "it"]);
        assert_eq!(
            match_expression(&[TextField::Question], &terms[..2]),
            "{question} : (\"is\" OR \"god\")"
        );
    }

    #[test]
    fn test_column_stats_idf_stays_positive() {
        let stats = ColumnStats {
            total_docs: 4,
            avg_len: 3.0,
            doc_freq: HashMap::from([("crashes".to_string(), 4)]),
        };
        let terms = vec!["crashes".to_string()];

        assert!(stats.score("any crashes here", &terms) > 0.0);
        assert_eq!(stats.score("no match here", &terms), 0.0);
        assert_eq!(stats.score("", &terms), 0.0);
    }
}
