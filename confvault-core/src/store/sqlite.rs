use super::{validate_ref_name, ObjectStore};
use crate::error::{Error, Result};
use crate::models::{ObjectId, ObjectKind, RawObject};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_VERSION: i32 = 1;

/// Object store kept in a single SQLite database file.
pub struct SqliteObjectStore {
    conn: Mutex<Connection>,
}

impl SqliteObjectStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize()?;
        Ok(storage)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS objects (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS refs (
                name TEXT PRIMARY KEY,
                target TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_objects_kind ON objects(kind);
            "#,
        )?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v != SCHEMA_VERSION => {
                return Err(Error::Repository(format!(
                    "unsupported store schema version {}",
                    v
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}

impl ObjectStore for SqliteObjectStore {
    fn put(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::compute(kind, data);
        self.conn().execute(
            "INSERT OR IGNORE INTO objects (id, kind, data) VALUES (?1, ?2, ?3)",
            params![id.as_str(), kind.as_str(), data],
        )?;
        Ok(id)
    }

    fn get(&self, id: &ObjectId) -> Result<Option<RawObject>> {
        let row: Option<(String, Vec<u8>)> = self
            .conn()
            .query_row(
                "SELECT kind, data FROM objects WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((kind, data)) => {
                let kind = ObjectKind::parse(&kind)
                    .ok_or_else(|| Error::CorruptObject(format!("{}: kind {}", id, kind)))?;
                Ok(Some(RawObject { kind, data }))
            }
            None => Ok(None),
        }
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        let found: Option<i32> = self
            .conn()
            .query_row(
                "SELECT 1 FROM objects WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn remove(&self, id: &ObjectId) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM objects WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    fn object_ids(&self) -> Result<Vec<ObjectId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM objects ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        ids.iter().map(|id| ObjectId::parse(id)).collect()
    }

    fn read_ref(&self, name: &str) -> Result<Option<String>> {
        validate_ref_name(name)?;
        let target = self
            .conn()
            .query_row(
                "SELECT target FROM refs WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(target)
    }

    fn update_ref(&self, name: &str, expected: Option<&str>, new: &str) -> Result<()> {
        validate_ref_name(name)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT target FROM refs WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        if current.as_deref() != expected {
            return Err(Error::RefConflict(name.to_string()));
        }

        tx.execute(
            "INSERT INTO refs (name, target) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET target = excluded.target",
            params![name, new],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        validate_ref_name(name)?;
        let removed = self
            .conn()
            .execute("DELETE FROM refs WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, target FROM refs ORDER BY name")?;
        let refs = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

        Ok(refs
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::TempDir;

    #[test]
    fn test_storage_initialization() {
        let storage = SqliteObjectStore::in_memory().unwrap();
        assert!(storage.conn().is_autocommit());
        assert!(storage.object_ids().unwrap().is_empty());
    }

    #[test]
    fn test_put_get_dedup() {
        contract::put_get_dedup(&SqliteObjectStore::in_memory().unwrap());
    }

    #[test]
    fn test_remove() {
        contract::remove(&SqliteObjectStore::in_memory().unwrap());
    }

    #[test]
    fn test_ref_compare_and_swap() {
        contract::ref_compare_and_swap(&SqliteObjectStore::in_memory().unwrap());
    }

    #[test]
    fn test_list_and_delete_refs() {
        contract::list_and_delete_refs(&SqliteObjectStore::in_memory().unwrap());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        let id = {
            let store = SqliteObjectStore::new(&path).unwrap();
            store.update_ref("HEAD", None, "abc").unwrap();
            store.put(ObjectKind::Blob, b"durable").unwrap()
        };

        let store = SqliteObjectStore::new(&path).unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().data, b"durable");
        assert_eq!(store.read_ref("HEAD").unwrap().as_deref(), Some("abc"));
    }
}
