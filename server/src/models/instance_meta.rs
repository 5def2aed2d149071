//! Process-wide singleton row: kill switch and resource-guard parameters.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::instance_metas;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = instance_metas)]
pub struct InstanceMeta {
    pub id: i64,
    pub disable_request: bool,
    pub instance_start: NaiveDateTime,
    pub number_of_cpus: i64,
    pub bytes_per_cpu: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = instance_metas)]
struct NewInstanceMeta {
    disable_request: bool,
    instance_start: NaiveDateTime,
    number_of_cpus: i64,
    bytes_per_cpu: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl InstanceMeta {
    /// Initialize the singleton at startup. An existing row is refreshed
    /// with the new instance start so the admission guard only counts
    /// transfers begun by this process.
    pub fn ensure(conn: &mut SqliteConnection, bytes_per_cpu: u64) -> Result<InstanceMeta> {
        let now = chrono::Utc::now().naive_utc();
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as i64)
            .unwrap_or(1);

        let existing: Option<InstanceMeta> =
            instance_metas::table.first(conn).optional().context("Failed to read instance meta")?;

        match existing {
            Some(meta) => {
                diesel::update(instance_metas::table.filter(instance_metas::id.eq(meta.id)))
                    .set((
                        instance_metas::instance_start.eq(now),
                        instance_metas::number_of_cpus.eq(cpus),
                        instance_metas::bytes_per_cpu.eq(bytes_per_cpu as i64),
                        instance_metas::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .context("Failed to refresh instance meta")?;
                InstanceMeta::get(conn)
            }
            None => diesel::insert_into(instance_metas::table)
                .values(&NewInstanceMeta {
                    disable_request: false,
                    instance_start: now,
                    number_of_cpus: cpus,
                    bytes_per_cpu: bytes_per_cpu as i64,
                    created_at: now,
                    updated_at: now,
                })
                .get_result(conn)
                .context("Failed to insert instance meta"),
        }
    }

    pub fn get(conn: &mut SqliteConnection) -> Result<InstanceMeta> {
        instance_metas::table
            .first(conn)
            .context("Instance meta row missing")
    }

    pub fn set_disable_request(conn: &mut SqliteConnection, disabled: bool) -> Result<()> {
        diesel::update(instance_metas::table)
            .set((
                instance_metas::disable_request.eq(disabled),
                instance_metas::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .context("Failed to update kill switch")?;
        Ok(())
    }

    /// Upper bound on concurrently transferring bytes.
    pub fn transfer_byte_budget(&self) -> i64 {
        self.number_of_cpus.saturating_mul(self.bytes_per_cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_is_a_singleton() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        let first = InstanceMeta::ensure(&mut conn, 1024).unwrap();
        let second = InstanceMeta::ensure(&mut conn, 2048).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.bytes_per_cpu, 2048);

        let count: i64 = instance_metas::table.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_kill_switch_round_trip() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        InstanceMeta::ensure(&mut conn, 1024).unwrap();
        InstanceMeta::set_disable_request(&mut conn, true).unwrap();
        assert!(InstanceMeta::get(&mut conn).unwrap().disable_request);
    }
}
