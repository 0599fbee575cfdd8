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

// 主页面：主机列表 + 在线状态 + 按需 SSH 探测出的安装阶段标签
use std::sync::LazyLock;

use actix_web::{HttpResponse, web};
use chrono::{NaiveDateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;

use crate::config::Config;
use crate::database_init::DbPool;
use crate::mark_checker::get_ansible_mark;
use crate::status_label::derive_stage_label;

// 同时发起的 SSH 探测上限
const PROBE_CONCURRENCY: usize = 10;

static TEMPLATES: LazyLock<minijinja::Environment<'static>> = LazyLock::new(|| {
    let mut env = minijinja::Environment::new();
    env.add_template("dashboard", include_str!("../templates/dashboard.html"))
        .expect("dashboard template must parse");
    env
});

#[derive(Debug, Clone, Serialize)]
pub struct HostRow {
    pub mac: String,
    pub ip: String,
    pub stage: String,
    pub stage_label: String,
    pub details: String,
    pub first_ts: String,
    pub ts: String,
    pub online: bool,
    pub playbook_status: Option<String>,
}

struct RawHost {
    mac: String,
    ip: String,
    stage: String,
    details: String,
    first_ts: String,
    ts: String,
    is_online: Option<bool>,
    last_checked: Option<String>,
    playbook_status: Option<String>,
}

fn load_hosts(pool: &DbPool) -> crate::error::ApiResult<Vec<RawHost>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT h.mac, h.ip, h.stage, h.details, h.first_ts, h.ts,
                s.is_online, s.last_checked, p.status
         FROM hosts h
         LEFT JOIN host_status s ON s.ip = h.ip
         LEFT JOIN playbook_status p ON p.ip = h.ip
         ORDER BY h.ts DESC",
    )?;
    let hosts = stmt
        .query_map([], |row| {
            Ok(RawHost {
                mac: row.get(0)?,
                ip: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                stage: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                details: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                first_ts: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                ts: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                is_online: row.get(6)?,
                last_checked: row.get(7)?,
                playbook_status: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hosts)
}

// ping 结果太旧也按离线算
fn is_host_online(host: &RawHost, online_timeout: u64) -> bool {
    if host.is_online != Some(true) {
        return false;
    }
    let Some(checked) = host
        .last_checked
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
    else {
        return false;
    };
    let age = Utc::now().naive_utc().signed_duration_since(checked);
    age.num_seconds() <= online_timeout as i64
}

async fn build_row(cfg: &Config, host: RawHost, online: bool) -> HostRow {
    let mark = get_ansible_mark(cfg, &host.ip).await;
    let stage_label = derive_stage_label(
        &host.stage,
        host.playbook_status.as_deref(),
        &mark,
        cfg.local_offset_hours,
    );
    HostRow {
        mac: host.mac,
        ip: host.ip,
        stage: host.stage,
        stage_label,
        details: host.details,
        first_ts: host.first_ts,
        ts: host.ts,
        online,
        playbook_status: host.playbook_status,
    }
}

pub async fn collect_host_rows(cfg: &Config, pool: &DbPool) -> crate::error::ApiResult<Vec<HostRow>> {
    let pool2 = pool.clone();
    let raw = tokio::task::spawn_blocking(move || load_hosts(&pool2))
        .await
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))??;
    let rows = stream::iter(raw)
        .map(|host| {
            let online = is_host_online(&host, cfg.online_timeout);
            build_row(cfg, host, online)
        })
        .buffered(PROBE_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;
    Ok(rows)
}

pub async fn dashboard(
    pool: web::Data<DbPool>,
    cfg: web::Data<Config>,
) -> crate::error::ApiResult<HttpResponse> {
    let hosts = collect_host_rows(&cfg, &pool).await?;
    let online_count = hosts.iter().filter(|h| h.online).count();
    let html = TEMPLATES
        .get_template("dashboard")
        .and_then(|t| {
            t.render(minijinja::context! {
                hosts => hosts,
                online_count => online_count,
                total_count => hosts.len(),
            })
        })
        .map_err(|e| crate::error::ApiError::Internal(format!("template error: {e}")))?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html))
}

// GET /api/hosts：同样的数据给前端轮询用
pub async fn api_hosts(
    pool: web::Data<DbPool>,
    cfg: web::Data<Config>,
) -> crate::error::ApiResult<HttpResponse> {
    let hosts = collect_host_rows(&cfg, &pool).await?;
    Ok(HttpResponse::Ok().json(hosts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_init::{register_host, test_pool, update_host_online_status};

    #[test]
    fn template_renders_host_table() {
        let rows = vec![HostRow {
            mac: "aa:bb:cc:dd:ee:ff".into(),
            ip: "10.0.0.5".into(),
            stage: "debian_install".into(),
            stage_label: "Installing Debian".into(),
            details: String::new(),
            first_ts: "2025-08-01 10:00:00".into(),
            ts: "2025-08-01 10:05:00".into(),
            online: true,
            playbook_status: None,
        }];
        let html = TEMPLATES
            .get_template("dashboard")
            .unwrap()
            .render(minijinja::context! {
                hosts => rows,
                online_count => 1,
                total_count => 1,
            })
            .unwrap();
        assert!(html.contains("aa:bb:cc:dd:ee:ff"));
        assert!(html.contains("Installing Debian"));
    }

    #[test]
    fn stale_ping_counts_as_offline() {
        let host = RawHost {
            mac: "aa:bb:cc:dd:ee:ff".into(),
            ip: "10.0.0.5".into(),
            stage: "dhcp".into(),
            details: String::new(),
            first_ts: String::new(),
            ts: String::new(),
            is_online: Some(true),
            last_checked: Some("2020-01-01 00:00:00".into()),
            playbook_status: None,
        };
        assert!(!is_host_online(&host, 300));
    }

    #[test]
    fn fresh_ping_counts_as_online() {
        let host = RawHost {
            mac: "aa:bb:cc:dd:ee:ff".into(),
            ip: "10.0.0.5".into(),
            stage: "dhcp".into(),
            details: String::new(),
            first_ts: String::new(),
            ts: String::new(),
            is_online: Some(true),
            last_checked: Some(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            playbook_status: None,
        };
        assert!(is_host_online(&host, 300));
    }

    #[test]
    fn hosts_sorted_by_latest_activity() {
        let pool = test_pool();
        {
            let conn = pool.get().unwrap();
            conn.execute(
                "INSERT INTO hosts(mac, ip, stage, details, ts, first_ts)
                 VALUES ('aa:aa:aa:aa:aa:01', '10.0.0.1', 'dhcp', '', '2025-08-01 09:00:00', '2025-08-01 09:00:00'),
                        ('aa:aa:aa:aa:aa:02', '10.0.0.2', 'dhcp', '', '2025-08-01 11:00:00', '2025-08-01 11:00:00')",
                [],
            )
            .unwrap();
        }
        let hosts = load_hosts(&pool).unwrap();
        assert_eq!(hosts[0].mac, "aa:aa:aa:aa:aa:02");
        assert_eq!(hosts[1].mac, "aa:aa:aa:aa:aa:01");
    }

    #[test]
    fn hosts_query_joins_status_tables() {
        let pool = test_pool();
        {
            let conn = pool.get().unwrap();
            register_host(&conn, "aa:bb:cc:dd:ee:01", "10.0.0.5", "dhcp", "").unwrap();
            update_host_online_status(&conn, "10.0.0.5", true).unwrap();
        }
        let hosts = load_hosts(&pool).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].is_online, Some(true));
        assert!(hosts[0].playbook_status.is_none());
    }
}
