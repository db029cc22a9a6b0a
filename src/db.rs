use failure::Error;
use log::debug;
use rusqlite::{params, Connection, NO_PARAMS};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Known plates and every time one was spotted.
pub struct PlateStore {
    conn: Connection,
}

impl PlateStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        debug!("Opening plate database {}", path.display());
        PlateStore::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, Error> {
        PlateStore::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS plate (id TEXT NOT NULL PRIMARY KEY) WITHOUT ROWID",
            NO_PARAMS,
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spotting (plate_id TEXT NOT NULL, timestamp INTEGER NOT NULL, FOREIGN KEY(plate_id) REFERENCES plate(id))",
            NO_PARAMS,
        )?;
        Ok(PlateStore { conn })
    }

    /// Adds the plate if it is new, then always logs one spotting.
    pub fn record_sighting(&self, plate: &str) -> Result<(), Error> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
        self.conn
            .execute("INSERT OR IGNORE INTO plate(id) VALUES (?1)", params![plate])?;
        self.conn.execute(
            "INSERT INTO spotting(plate_id, timestamp) VALUES (?1, ?2)",
            params![plate, timestamp],
        )?;
        Ok(())
    }

    pub fn sightings(&self, plate: &str) -> Result<i64, Error> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM spotting WHERE plate_id = ?1",
            params![plate],
            |row| row.get(0),
        )?)
    }

    #[cfg(test)]
    pub fn known_plates(&self) -> Result<i64, Error> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM plate", NO_PARAMS, |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sighting_inserts_plate_once() {
        let store = PlateStore::open_in_memory().unwrap();
        store.record_sighting("8ABC123").unwrap();
        store.record_sighting("8ABC123").unwrap();
        store.record_sighting("XYZ999").unwrap();

        assert_eq!(store.known_plates().unwrap(), 2);
        assert_eq!(store.sightings("8ABC123").unwrap(), 2);
        assert_eq!(store.sightings("XYZ999").unwrap(), 1);
        assert_eq!(store.sightings("NOPE12").unwrap(), 0);
    }

    #[test]
    fn reopening_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.db");
        PlateStore::open(&path)
            .unwrap()
            .record_sighting("8ABC123")
            .unwrap();

        let store = PlateStore::open(&path).unwrap();
        store.record_sighting("8ABC123").unwrap();
        assert_eq!(store.known_plates().unwrap(), 1);
        assert_eq!(store.sightings("8ABC123").unwrap(), 2);
    }
}
