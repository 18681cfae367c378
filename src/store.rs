//! Persistent time-series store (§6.3). Backed by `sqlx`'s SQLite
//! driver — the engine itself is out of scope (§1), SQLite is chosen to
//! match the original tool's single local file next to the runner.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::StoreError;

pub struct Store {
    pool: SqlitePool,
}

/// One BMC sample (§3 "Sample"): `cap_level` is `NULL` when the BMC
/// reports no active limit (IPMI) — never for redfish (§9 OQ2).
#[derive(Debug, Clone)]
pub struct BmcSample {
    pub timestamp: DateTime<Utc>,
    pub power_watts: i64,
    pub cap_level_watts: Option<i64>,
}

/// One RAPL sample, keyed by (timestamp, package).
#[derive(Debug, Clone)]
pub struct RaplSample {
    pub timestamp: DateTime<Utc>,
    pub package: String,
    pub power_watts: f64,
}

/// A completed trajectory (§3 "Test record").
#[derive(Debug, Clone)]
pub struct TestRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cap_from: i64,
    pub cap_to: i64,
    pub n_steps: i64,
    pub load_pct: i64,
    pub n_threads: i64,
    pub pause_load_between_cap_settings: bool,
}

impl Store {
    /// Opens (creating if necessary) the sqlite file at `path` and
    /// ensures all tables exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Store, StoreError> {
        let path = path.as_ref();
        let url = if path == Path::new(":memory:") {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", path.display())
        };
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Store { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "create table if not exists bmc(
                timestamp text primary key,
                power integer not null check (power > 0),
                cap_level integer
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "create table if not exists rapl(
                timestamp text not null,
                package text not null,
                power real not null check (power > 0),
                primary key (timestamp, package)
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "create table if not exists capping_commands(
                timestamp text not null,
                cap_level integer not null
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "create table if not exists tests(
                test_id integer primary key autoincrement,
                start text not null,
                end text not null,
                cap_from integer not null,
                cap_to integer not null,
                n_steps integer not null,
                load_pct integer not null,
                n_threads integer not null,
                pause_load_between_cap_settings integer not null
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "create table if not exists system_info(
                hostname text,
                os_name text,
                architecture text,
                cpus text,
                threads_per_core text,
                cores_per_socket text,
                sockets text,
                vendor_id text,
                model_name text,
                cpu_mhz text,
                cpu_max_mhz text,
                cpu_min_mhz text,
                bios_date text,
                bios_vendor text,
                bios_version text,
                board_name text,
                board_vendor text,
                board_version text,
                sys_vendor text,
                bmc_type text not null
            );",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts one BMC row and one RAPL row per package, in a single
    /// transaction (§4.3 "Per tick").
    pub async fn save_tick(&self, bmc: &BmcSample, rapl: &[RaplSample]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("insert into bmc(timestamp, power, cap_level) values(?, ?, ?)")
            .bind(to_iso_millis(bmc.timestamp))
            .bind(bmc.power_watts)
            .bind(bmc.cap_level_watts)
            .execute(&mut *tx)
            .await?;

        for sample in rapl {
            sqlx::query("insert into rapl(timestamp, package, power) values(?, ?, ?)")
                .bind(to_iso_millis(sample.timestamp))
                .bind(&sample.package)
                .bind(sample.power_watts)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Appends one `capping_commands` row (§3 "Cap-change event").
    pub async fn log_cap_level(&self, timestamp: DateTime<Utc>, cap_level: i64) -> Result<(), StoreError> {
        sqlx::query("insert into capping_commands(timestamp, cap_level) values(?, ?)")
            .bind(to_iso_millis(timestamp))
            .bind(cap_level)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a completed trajectory (§4.4.1 "Then record a tests row").
    pub async fn log_test_run(&self, test: &TestRecord) -> Result<(), StoreError> {
        sqlx::query(
            "insert into tests(start, end, cap_from, cap_to, n_steps, load_pct, n_threads, pause_load_between_cap_settings)
             values(?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_iso_millis(test.start))
        .bind(to_iso_millis(test.end))
        .bind(test.cap_from)
        .bind(test.cap_to)
        .bind(test.n_steps)
        .bind(test.load_pct)
        .bind(test.n_threads)
        .bind(test.pause_load_between_cap_settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts the single system-info row for this run (§3 invariant:
    /// exactly one per run-database).
    pub async fn log_system_info(&self, fields: &HashMap<String, String>, bmc_type: &str) -> Result<(), StoreError> {
        let columns = [
            "hostname",
            "os_name",
            "architecture",
            "cpus",
            "threads_per_core",
            "cores_per_socket",
            "sockets",
            "vendor_id",
            "model_name",
            "cpu_mhz",
            "cpu_max_mhz",
            "cpu_min_mhz",
            "bios_date",
            "bios_vendor",
            "bios_version",
            "board_name",
            "board_vendor",
            "board_version",
            "sys_vendor",
        ];

        let placeholders = vec!["?"; columns.len() + 1].join(", ");
        let sql = format!(
            "insert into system_info({}, bmc_type) values({placeholders})",
            columns.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for column in columns {
            query = query.bind(fields.get(column).cloned());
        }
        query = query.bind(bmc_type);
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Count of `bmc` rows with `start <= timestamp <= end`, used by
    /// tests to check the "non-empty set of BMC samples" invariant (§3).
    pub async fn count_bmc_rows_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query("select count(*) as n from bmc where timestamp >= ? and timestamp <= ?")
            .bind(to_iso_millis(start))
            .bind(to_iso_millis(end))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

/// ISO-8601 UTC with millisecond precision (§6.3).
pub fn to_iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn round_trips_a_tick() {
        let store = Store::open(":memory:").await.unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let bmc = BmcSample {
            timestamp: ts,
            power_watts: 300,
            cap_level_watts: Some(600),
        };
        let rapl = vec![RaplSample {
            timestamp: ts,
            package: "package-0".into(),
            power_watts: 42.5,
        }];
        store.save_tick(&bmc, &rapl).await.unwrap();

        let count = store
            .count_bmc_rows_in_range(ts, ts)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn logs_cap_level_changes() {
        let store = Store::open(":memory:").await.unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store.log_cap_level(ts, 1000).await.unwrap();
        store.log_cap_level(ts + chrono::Duration::milliseconds(1), 800).await.unwrap();
    }
}
