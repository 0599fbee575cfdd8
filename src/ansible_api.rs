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

// Ansible 集成：playbook 运行、任务表查询、journal 日志彩色化
use std::path::Path;
use std::sync::LazyLock;

use actix_web::{HttpResponse, web};
use regex::Regex;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::command_execute::journal_tail;
use crate::config::Config;
use crate::database_init::{DbPool, finish_ansible_tasks, insert_ansible_task};
use crate::error::{ApiError, ApiResult};
use crate::mark_checker::get_ansible_mark;

// collection 版本警告不影响运行结果
static VERSION_WARNING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[WARNING\]: Collection \S+ does not support Ansible").unwrap()
});

// 过滤掉版本警告后剩下的 stderr 行
pub fn fatal_stderr_lines(stderr: &str) -> Vec<&str> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !VERSION_WARNING_RE.is_match(line))
        .collect()
}

// 从 inventory.ini 里收集 mac* 变量的值
pub fn macs_from_inventory(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut macs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            if key.trim().starts_with("mac") {
                macs.push(val.trim().to_lowercase());
            }
        }
    }
    macs
}

#[derive(Debug, Deserialize, Default)]
pub struct RunBody {
    pub tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnsibleTask {
    pub mac: String,
    pub task_name: String,
    pub status: String,
    pub step: i64,
    pub total_steps: i64,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

// POST /api/ansible/run：同步跑一次 playbook
pub async fn api_ansible_run(
    body: Option<web::Json<RunBody>>,
    pool: web::Data<DbPool>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let tags = body.and_then(|b| b.into_inner().tags);
    let macs = macs_from_inventory(&cfg.ansible_inventory);
    {
        let conn = pool.get()?;
        for mac in &macs {
            insert_ansible_task(&conn, mac, "playbook.yml", "running")?;
        }
    }

    let mut cmd = tokio::process::Command::new("ansible-playbook");
    cmd.arg(&cfg.ansible_playbook)
        .arg("-i")
        .arg(&cfg.ansible_inventory);
    if let Some(tags) = &tags {
        cmd.arg("--tags").arg(tags);
    }
    let output = cmd
        .output()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to run ansible-playbook: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let conn = pool.get()?;
    if output.status.success() {
        // 退出码 0 即成功；stderr 里只剩版本警告时不当作失败
        let noise = fatal_stderr_lines(&stderr);
        if !noise.is_empty() {
            tracing::warn!(lines = noise.len(), "ansible-playbook wrote to stderr");
        }
        finish_ansible_tasks(&conn, "playbook.yml", "ok")?;
        tracing::info!("ansible-playbook completed successfully");
        Ok(HttpResponse::Ok().json(json!({ "status": "ok", "data": stdout })))
    } else {
        finish_ansible_tasks(&conn, "playbook.yml", "failed")?;
        let code = output.status.code();
        tracing::error!(?code, "ansible-playbook failed");
        Ok(HttpResponse::InternalServerError().json(json!({
            "status": "error",
            "code": code,
            "msg": fatal_stderr_lines(&stderr).join("\n"),
        })))
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnsibleTask> {
    Ok(AnsibleTask {
        mac: row.get("mac")?,
        task_name: row.get("task_name")?,
        status: row.get("status")?,
        step: row.get("step")?,
        total_steps: row.get("total_steps")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

// GET /api/ansible/task/{mac}：该 MAC 最近一次任务，没有则空对象
pub async fn api_ansible_task(
    mac: web::Path<String>,
    pool: web::Data<DbPool>,
) -> ApiResult<HttpResponse> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT mac, task_name, status, step, total_steps, started_at, finished_at
         FROM ansible_tasks WHERE mac = ?1 ORDER BY started_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![mac.as_str()], task_from_row)?;
    match rows.next() {
        Some(task) => Ok(HttpResponse::Ok().json(task?)),
        None => Ok(HttpResponse::Ok().json(json!({}))),
    }
}

fn all_tasks(pool: &DbPool) -> ApiResult<Vec<AnsibleTask>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT mac, task_name, status, step, total_steps, started_at, finished_at
         FROM ansible_tasks ORDER BY started_at DESC",
    )?;
    let tasks = stmt
        .query_map([], task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

pub async fn api_ansible_clients(pool: web::Data<DbPool>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(all_tasks(&pool)?))
}

pub async fn api_ansible_history(pool: web::Data<DbPool>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(all_tasks(&pool)?))
}

// GET /api/ansible/status/{ip}：实时 mark.json 探测
pub async fn api_ansible_status(
    ip: web::Path<String>,
    cfg: web::Data<Config>,
) -> HttpResponse {
    HttpResponse::Ok().json(get_ansible_mark(&cfg, &ip).await.to_json())
}

// ==== /api/logs/ansible：journal 彩色化 ====

static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5})").unwrap()
});
static IP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w{3} +\d{1,2} \d{2}:\d{2}:\d{2})").unwrap());

// 面板自己的轮询日志不值得展示
const NOISE_KEYWORDS: &[&str] = &[
    "starting background ping sweep",
    "background ping sweep finished",
    "scanning ansible journal",
    "checking ansible marks",
];

pub fn colorize_log_line(line: &str) -> String {
    let mut line = format!(r#"<span style="font-size:14px;line-height:1.5">{line}</span>"#);
    for (word, color) in [
        ("INFO", "#51cf66"),
        ("WARNING", "#ffa94d"),
        ("ERROR", "#ff6b6b"),
        (" 200 ", "#51cf66"),
        (" 404 ", "#ff6b6b"),
        (" 500 ", "#ff375f"),
        ("GET", "#9775fa"),
        ("POST", "#9775fa"),
    ] {
        line = line.replace(
            word,
            &format!(r#"<span style="color:{color}; font-weight:bold">{word}</span>"#),
        );
    }
    let line = MAC_RE
        .replace_all(
            &line,
            r#"<span style="color:#0ca678; font-weight:bold; font-family:monospace">$1</span>"#,
        )
        .into_owned();
    let line = IP_RE
        .replace_all(
            &line,
            r#"<span style="color:#087f5b; font-weight:bold; font-family:monospace">$0</span>"#,
        )
        .into_owned();
    DATE_RE
        .replace_all(&line, r#"<span style="color:#adb5bd">$1</span>"#)
        .into_owned()
}

pub async fn api_logs_ansible(cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    let output = journal_tail(&cfg.ansible_service_name, 300, None)
        .await
        .map_err(ApiError::Internal)?;
    let colored: Vec<String> = output
        .lines()
        .filter(|line| !NOISE_KEYWORDS.iter().any(|kw| line.contains(kw)))
        .map(colorize_log_line)
        .collect();
    // 只保留末尾 100 行
    let start = colored.len().saturating_sub(100);
    Ok(HttpResponse::Ok().json(&colored[start..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn version_warnings_are_not_fatal() {
        let stderr = "[WARNING]: Collection ansible.posix does not support Ansible version 2.14.8\n\
                      [WARNING]: Collection community.general does not support Ansible version 2.14.8";
        assert!(fatal_stderr_lines(stderr).is_empty());
    }

    #[test]
    fn real_errors_survive_the_filter() {
        let stderr = "[WARNING]: Collection ansible.posix does not support Ansible version 2.14.8\n\
                      ERROR! the playbook could not be found";
        let fatal = fatal_stderr_lines(stderr);
        assert_eq!(fatal, vec!["ERROR! the playbook could not be found"]);
    }

    #[test]
    fn inventory_mac_extraction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[clients]\nmac1 = AA:BB:CC:DD:EE:01\nmac2=aa:bb:cc:dd:ee:02\nhost = 10.0.0.5\n# mac3 = commented"
        )
        .unwrap();
        let macs = macs_from_inventory(file.path());
        assert_eq!(macs, vec!["aa:bb:cc:dd:ee:01", "aa:bb:cc:dd:ee:02"]);
    }

    #[test]
    fn missing_inventory_yields_no_macs() {
        assert!(macs_from_inventory(Path::new("/nonexistent/inventory.ini")).is_empty());
    }

    #[test]
    fn colorizer_wraps_keywords() {
        let out = colorize_log_line("Aug 12 10:00:00 host INFO 10.1.2.3 aa:bb:cc:dd:ee:ff");
        assert!(out.contains(r#"font-weight:bold">INFO</span>"#));
        assert!(out.contains("monospace"));
    }
}
