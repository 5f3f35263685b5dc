//! Persisted write clock.
//!
//! A single row holds the last stamp handed out. Each write transaction takes
//! `max(now, last + 1)`, so stamps strictly increase across commits even if
//! the wall clock stalls or steps backwards. Writers are serialized by
//! `BEGIN IMMEDIATE`, so no two transactions can observe the same `last`.

use crate::error::CoreResult;
use farmsync_protocol::Watermark;
use rusqlite::{Connection, Transaction};

/// Takes the next stamp for a write transaction.
pub fn tick(tx: &Transaction<'_>) -> CoreResult<Watermark> {
    let last = current(tx)?;
    let stamp = Watermark::now().max(last.next());
    tx.execute(
        "UPDATE sync_clock SET last_stamp = ?1 WHERE id = 1",
        [stamp.as_millis()],
    )?;
    Ok(stamp)
}

/// Returns the last stamp handed out.
pub fn current(conn: &Connection) -> CoreResult<Watermark> {
    let last: i64 = conn.query_row(
        "SELECT last_stamp FROM sync_clock WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(Watermark::from_millis(last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::store::schema;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::migrate(&mut conn, &Registry::new().unwrap()).unwrap();
        conn
    }

    #[test]
    fn stamps_strictly_increase() {
        let mut conn = migrated();
        assert_eq!(current(&conn).unwrap(), Watermark::ORIGIN);

        let mut previous = Watermark::ORIGIN;
        for _ in 0..50 {
            let tx = conn.transaction().unwrap();
            let stamp = tick(&tx).unwrap();
            tx.commit().unwrap();
            assert!(stamp > previous);
            previous = stamp;
        }
        assert_eq!(current(&conn).unwrap(), previous);
    }

    #[test]
    fn clock_ahead_of_wall_time_still_advances() {
        let mut conn = migrated();
        let future = Watermark::now().as_millis() + 3_600_000;
        conn.execute("UPDATE sync_clock SET last_stamp = ?1", [future])
            .unwrap();

        let tx = conn.transaction().unwrap();
        let stamp = tick(&tx).unwrap();
        tx.commit().unwrap();
        assert_eq!(stamp.as_millis(), future + 1);
    }

    #[test]
    fn rolled_back_tick_is_not_persisted() {
        let mut conn = migrated();
        {
            let tx = conn.transaction().unwrap();
            tick(&tx).unwrap();
        }
        assert_eq!(current(&conn).unwrap(), Watermark::ORIGIN);
    }
}
