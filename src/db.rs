//! SQLite storage with Diesel ORM
//!
//! Replays are kept as raw `.osr` bytes next to the columns needed to find
//! them; detections hold the flags as a JSON array.

use crate::analyzer::Flag;
use crate::replay::Replay;
use crate::schema::*;
use crate::store::{
    validate_key, BeatmapReport, Corpus, ReplayKey, Result, Storage, StoreError, StoreStats,
};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error};

pub const DEFAULT_DB_PATH: &str = "replayguard.db";

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = replays)]
pub struct NewReplay<'a> {
    pub replay_hash: &'a str,
    pub beatmap_hash: &'a str,
    pub player_name: &'a str,
    pub file_name: &'a str,
    pub mode: i32,
    pub total_score: i32,
    pub data: &'a [u8],
    pub stored_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = replays)]
pub struct StoredReplay {
    pub replay_hash: String,
    pub beatmap_hash: String,
    pub player_name: String,
    pub file_name: String,
    pub mode: i32,
    pub total_score: i32,
    pub data: Vec<u8>,
    pub stored_at: String,
}

impl StoredReplay {
    fn decode(&self) -> Result<Replay> {
        Replay::from_bytes(self.file_name.as_str(), &self.data).map_err(|source| {
            StoreError::CorruptReplay {
                key: self.replay_hash.clone(),
                source,
            }
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = detections)]
pub struct NewDetection<'a> {
    pub replay_hash: &'a str,
    pub flags_json: &'a str,
    pub analyzed_at: &'a str,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Wait on a locked database instead of failing immediately
#[derive(Debug)]
struct BusyTimeout;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for BusyTimeout {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open database at default path
    pub fn open() -> Result<Self> {
        Self::open_at(DEFAULT_DB_PATH)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(BusyTimeout))
            .build(manager)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        debug!(path = %path_str, "opened database");
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| StoreError::Pool(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS replays (
                replay_hash TEXT PRIMARY KEY NOT NULL,
                beatmap_hash TEXT NOT NULL,
                player_name TEXT NOT NULL,
                file_name TEXT NOT NULL,
                mode INTEGER NOT NULL,
                total_score INTEGER NOT NULL,
                data BLOB NOT NULL,
                stored_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
                replay_hash TEXT PRIMARY KEY NOT NULL,
                flags_json TEXT NOT NULL,
                analyzed_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_replays_beatmap ON replays(beatmap_hash)")
            .execute(&mut conn)?;

        Ok(())
    }
}

impl Corpus for Database {
    fn list_replays_for_beatmap(&self, beatmap_hash: &str, exclude: &str) -> Result<Vec<Replay>> {
        let mut conn = self.get_conn()?;
        let rows = replays::table
            .filter(replays::beatmap_hash.eq(beatmap_hash))
            .filter(replays::replay_hash.ne(exclude))
            .order(replays::replay_hash.asc())
            .select(StoredReplay::as_select())
            .load(&mut conn)?;

        Ok(rows
            .iter()
            .filter_map(|row| match row.decode() {
                Ok(replay) => Some(replay),
                Err(e) => {
                    error!(replay = %row.replay_hash, "skipping unreadable stored replay: {}", e);
                    None
                }
            })
            .collect())
    }
}

impl Storage for Database {
    fn store_replay(&self, replay: &Replay) -> Result<bool> {
        let replay_hash = validate_key(&replay.replay_hash)?;
        let beatmap_hash = validate_key(&replay.beatmap_hash)?;
        let data = replay.file_bytes()?;
        let now = chrono::Local::now().to_rfc3339();

        let mut conn = self.get_conn()?;
        let inserted = diesel::insert_or_ignore_into(replays::table)
            .values(&NewReplay {
                replay_hash,
                beatmap_hash,
                player_name: &replay.player_name,
                file_name: &replay.file_name,
                mode: i32::from(replay.mode.as_byte()),
                total_score: replay.total_score,
                data: &data,
                stored_at: &now,
            })
            .execute(&mut conn)?;

        Ok(inserted > 0)
    }

    fn store_detection(&self, replay_hash: &str, flags: &[Flag]) -> Result<()> {
        let replay_hash = validate_key(replay_hash)?;
        let mut conn = self.get_conn()?;

        if flags.is_empty() {
            diesel::delete(
                detections::table
                    .filter(detections::replay_hash.eq(replay_hash))
                    .filter(detections::flags_json.eq("[]")),
            )
            .execute(&mut conn)?;
            return Ok(());
        }

        let json = serde_json::to_string(flags)?;
        let now = chrono::Local::now().to_rfc3339();
        diesel::insert_or_ignore_into(detections::table)
            .values(&NewDetection {
                replay_hash,
                flags_json: &json,
                analyzed_at: &now,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    fn load_detection(&self, replay_hash: &str) -> Result<Option<Vec<Flag>>> {
        let mut conn = self.get_conn()?;
        let json = detections::table
            .filter(detections::replay_hash.eq(replay_hash))
            .select(detections::flags_json)
            .first::<String>(&mut conn)
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn load_replay(&self, key: &ReplayKey) -> Result<Option<Replay>> {
        let mut conn = self.get_conn()?;
        let row = replays::table
            .filter(replays::replay_hash.eq(&key.replay_hash))
            .filter(replays::beatmap_hash.eq(&key.beatmap_hash))
            .select(StoredReplay::as_select())
            .first(&mut conn)
            .optional()?;

        row.map(|r| r.decode()).transpose()
    }

    fn replay_keys(&self) -> Result<Vec<ReplayKey>> {
        let mut conn = self.get_conn()?;
        let rows = replays::table
            .select((replays::beatmap_hash, replays::replay_hash))
            .order((replays::beatmap_hash.asc(), replays::replay_hash.asc()))
            .load::<(String, String)>(&mut conn)?;

        Ok(rows
            .into_iter()
            .map(|(beatmap_hash, replay_hash)| ReplayKey {
                beatmap_hash,
                replay_hash,
            })
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut conn = self.get_conn()?;
        let replay_count: i64 = replays::table.count().get_result(&mut conn)?;
        let detection_count: i64 = detections::table.count().get_result(&mut conn)?;
        Ok(StoreStats {
            replay_count: replay_count.max(0) as u64,
            detection_count: detection_count.max(0) as u64,
        })
    }

    fn beatmap_report(&self, beatmap_hash: &str) -> Result<Option<BeatmapReport>> {
        let mut conn = self.get_conn()?;
        let hashes = replays::table
            .filter(replays::beatmap_hash.eq(beatmap_hash))
            .select(replays::replay_hash)
            .load::<String>(&mut conn)?;

        if hashes.is_empty() {
            return Ok(None);
        }

        let rows = detections::table
            .filter(detections::replay_hash.eq_any(&hashes))
            .select((detections::replay_hash, detections::flags_json))
            .load::<(String, String)>(&mut conn)?;

        let mut flagged_replays = BTreeMap::new();
        for (hash, json) in rows {
            let flags: Vec<Flag> = serde_json::from_str(&json)?;
            if !flags.is_empty() {
                flagged_replays.insert(hash, flags);
            }
        }

        Ok(Some(BeatmapReport {
            hash: beatmap_hash.to_string(),
            replay_count: hashes.len() as u64,
            flagged_replays,
        }))
    }

    fn as_corpus(&self) -> &dyn Corpus {
        self
    }
}
