/*
 * Copyright 2025 Xiping Hu <hxp@hxp.plus>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *    http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
*/

// 初始化数据库与所有表的读写辅助函数
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::ApiResult;

pub type DbPool = Pool<SqliteConnectionManager>;

// 哨兵值：未知 IP 在面板与数据库里统一显示为 "—"
pub const IP_UNKNOWN: &str = "—";

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS hosts (
            mac TEXT PRIMARY KEY,
            ip TEXT,
            stage TEXT,
            details TEXT,
            ts TEXT,
            first_ts TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS host_status (
            ip TEXT PRIMARY KEY,
            is_online BOOLEAN,
            last_checked TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS playbook_status (
            ip TEXT PRIMARY KEY,
            status TEXT,
            updated TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ansible_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mac TEXT,
            task_name TEXT,
            status TEXT,
            step INTEGER,
            total_steps INTEGER,
            started_at TEXT,
            finished_at TEXT
        )",
        [],
    )?;
    Ok(())
}

// 清库：DROP 后立即重建，保持对外 "全部数据消失" 的语义
pub fn clear_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS hosts;
         DROP TABLE IF EXISTS host_status;
         DROP TABLE IF EXISTS playbook_status;
         DROP TABLE IF EXISTS ansible_tasks;",
    )?;
    init_db(conn)
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// 按 MAC upsert，first_ts 只在首次写入
pub fn register_host(
    conn: &Connection,
    mac: &str,
    ip: &str,
    stage: &str,
    details: &str,
) -> rusqlite::Result<()> {
    let ts = now_str();
    conn.execute(
        "INSERT INTO hosts(mac, ip, stage, details, ts, first_ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(mac) DO UPDATE SET
             ip = excluded.ip,
             stage = excluded.stage,
             details = excluded.details,
             ts = excluded.ts,
             first_ts = COALESCE(hosts.first_ts, excluded.ts)",
        params![mac, ip, stage, details, ts],
    )?;
    Ok(())
}

pub fn update_host_online_status(
    conn: &Connection,
    ip: &str,
    is_online: bool,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO host_status (ip, is_online, last_checked)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(ip) DO UPDATE SET
             is_online = excluded.is_online,
             last_checked = excluded.last_checked",
        params![ip, is_online, now_str()],
    )?;
    Ok(())
}

pub fn set_playbook_status(conn: &Connection, ip: &str, status: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO playbook_status (ip, status, updated)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(ip) DO UPDATE SET
             status = excluded.status,
             updated = excluded.updated",
        params![ip, status, now_str()],
    )?;
    tracing::info!(ip, status, "playbook status updated");
    Ok(())
}

pub fn get_playbook_status(conn: &Connection, ip: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT status FROM playbook_status WHERE ip = ?1",
        params![ip],
        |row| row.get(0),
    )
    .optional()
}

// 所有已知且非哨兵的 IP
pub fn known_ips(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT ip FROM hosts WHERE ip != ?1 AND ip IS NOT NULL")?;
    let rows = stmt.query_map(params![IP_UNKNOWN], |row| row.get::<_, String>(0))?;
    rows.collect()
}

pub fn insert_ansible_task(
    conn: &Connection,
    mac: &str,
    task_name: &str,
    status: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO ansible_tasks(mac, task_name, status, step, total_steps, started_at)
         VALUES (?1, ?2, ?3, 0, 10, ?4)",
        params![mac, task_name, status, now_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

// run 结束后统一回填本次启动的所有行
pub fn finish_ansible_tasks(
    conn: &Connection,
    task_name: &str,
    status: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE ansible_tasks SET status = ?1, finished_at = ?2
         WHERE task_name = ?3 AND finished_at IS NULL",
        params![status, now_str(), task_name],
    )?;
    Ok(())
}

pub fn open_pool(db_path: &std::path::Path) -> ApiResult<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::new(manager).map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    let conn = pool.get()?;
    init_db(&conn)?;
    Ok(pool)
}

#[cfg(test)]
pub fn test_pool() -> DbPool {
    // 测试用内存库：单连接池保证所有操作落在同一个内存数据库
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    init_db(&pool.get().unwrap()).unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_twice_keeps_first_ts() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        register_host(&conn, "aa:bb:cc:dd:ee:ff", "10.0.0.2", "dhcp", "").unwrap();
        let first: String = conn
            .query_row("SELECT first_ts FROM hosts", [], |r| r.get(0))
            .unwrap();
        register_host(&conn, "aa:bb:cc:dd:ee:ff", "10.0.0.2", "debian_install", "x").unwrap();
        let (stage, first_again, count): (String, String, i64) = conn
            .query_row(
                "SELECT stage, first_ts, (SELECT COUNT(*) FROM hosts) FROM hosts",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(stage, "debian_install");
        assert_eq!(first_again, first);
        assert_eq!(count, 1);
    }

    #[test]
    fn clear_db_recreates_schema() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        register_host(&conn, "aa:bb:cc:dd:ee:ff", "10.0.0.2", "dhcp", "").unwrap();
        clear_db(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM hosts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn known_ips_skips_sentinel() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        register_host(&conn, "aa:aa:aa:aa:aa:01", "10.0.0.2", "dhcp", "").unwrap();
        register_host(&conn, "aa:aa:aa:aa:aa:02", IP_UNKNOWN, "dhcp", "").unwrap();
        assert_eq!(known_ips(&conn).unwrap(), vec!["10.0.0.2".to_string()]);
    }
}
