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

// ansible_mark.json 探测：通过 SSH 读取目标机上的安装完成标记
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};
use tokio::time::Duration;

use crate::command_execute::{SshOutcome, run_ssh_command};
use crate::config::Config;
use crate::database_init::{DbPool, IP_UNKNOWN, known_ips};

const MARK_PATH: &str = "/opt/ansible_mark.json";

static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").unwrap());

#[derive(Debug, Clone)]
pub enum MarkStatus {
    // mark.json 的完整内容
    Ok(Map<String, Value>),
    // 文件不存在：Ansible 还没跑完
    Pending(String),
    Error(String),
}

impl MarkStatus {
    // /api/ansible/status/{ip} 的响应体
    pub fn to_json(&self) -> Value {
        match self {
            MarkStatus::Ok(data) => {
                let mut data = data.clone();
                data.insert("status".into(), json!("ok"));
                Value::Object(data)
            }
            MarkStatus::Pending(msg) => json!({ "status": "pending", "msg": msg }),
            MarkStatus::Error(msg) => json!({ "status": "error", "msg": msg }),
        }
    }
}

pub async fn get_ansible_mark(cfg: &Config, ip: &str) -> MarkStatus {
    if ip == IP_UNKNOWN || !IPV4_RE.is_match(ip) {
        return MarkStatus::Error("Invalid IP".to_string());
    }
    let cmd = format!("cat {MARK_PATH}");
    match run_ssh_command(cfg, ip, &cmd, cfg.ssh_command_timeout).await {
        SshOutcome::Ok(stdout) => match serde_json::from_str::<Map<String, Value>>(&stdout) {
            Ok(data) => MarkStatus::Ok(data),
            Err(e) => MarkStatus::Error(format!("invalid JSON in mark.json: {e}")),
        },
        SshOutcome::Failed { stderr, .. } => {
            if stderr.contains("No such file") {
                MarkStatus::Pending("mark.json not found (Ansible has not finished)".to_string())
            } else {
                MarkStatus::Error(format!("SSH error: {stderr}"))
            }
        }
        SshOutcome::TimedOut => MarkStatus::Error("connection timed out".to_string()),
        SshOutcome::SpawnError(e) => MarkStatus::Error(format!("internal error: {e}")),
    }
}

// 后台任务：每 2 分钟过一遍已知 IP。目前只记日志，
// 展示时的实时探测在 dashboard 请求里完成。
pub async fn check_ansible_marks_background(pool: DbPool) {
    loop {
        tokio::time::sleep(Duration::from_secs(120)).await;
        tracing::info!("checking ansible marks for known hosts");
        let pool2 = pool.clone();
        let ips = tokio::task::spawn_blocking(move || {
            let conn = pool2.get()?;
            known_ips(&conn).map_err(crate::error::ApiError::from)
        })
        .await;
        match ips {
            Ok(Ok(ips)) => {
                for ip in ips {
                    tracing::info!(ip, "ansible mark check scheduled");
                }
            }
            Ok(Err(e)) => tracing::error!(error = %e, "mark checker db error"),
            Err(e) => tracing::error!(error = %e, "mark checker join error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_ip() {
        let cfg = Config::from_env();
        let mark = get_ansible_mark(&cfg, "not-an-ip").await;
        assert!(matches!(mark, MarkStatus::Error(ref m) if m == "Invalid IP"));
        let mark = get_ansible_mark(&cfg, IP_UNKNOWN).await;
        assert!(matches!(mark, MarkStatus::Error(ref m) if m == "Invalid IP"));
    }

    #[test]
    fn mark_json_shapes() {
        let pending = MarkStatus::Pending("x".into()).to_json();
        assert_eq!(pending["status"], "pending");
        let mut map = Map::new();
        map.insert("install_date".into(), json!("2025-01-01T00:00:00"));
        let ok = MarkStatus::Ok(map).to_json();
        assert_eq!(ok["status"], "ok");
        assert_eq!(ok["install_date"], "2025-01-01T00:00:00");
    }
}
