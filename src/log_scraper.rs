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

// Ansible 日志抓取：从 journalctl 里捞 PLAY RECAP 统计行，推断每台主机的
// playbook 结果。纯文本抓取，原始输出里 ANSI 码和字段顺序都可能变化，
// 这里只认 "IP : ... failed=N" 形态。
use std::collections::VecDeque;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tokio::time::Duration;

use crate::command_execute::journal_tail;
use crate::config::Config;
use crate::database_init::{DbPool, set_playbook_status};

const SCRAPE_INTERVAL_SECS: u64 = 30;
// 去重窗口：记住最近处理过的行，防止同一条 recap 反复写库
const SEEN_LINES_CAP: usize = 100;

static RECAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.\d+\.\d+)\s*:.*?failed=(\d+)").unwrap());

// 从新行里提取每个 IP 的最终状态。从尾部往前扫，
// 同一 IP 只取最后一次出现的 recap。
pub fn extract_recap_statuses(new_lines: &[&str]) -> Vec<(String, &'static str)> {
    let mut statuses: Vec<(String, &'static str)> = Vec::new();
    for line in new_lines.iter().rev() {
        if line.contains("PLAY RECAP") {
            continue;
        }
        let Some(caps) = RECAP_RE.captures(line) else {
            continue;
        };
        let ip = caps[1].to_string();
        if statuses.iter().any(|(seen, _)| *seen == ip) {
            continue;
        }
        let failed: u32 = caps[2].parse().unwrap_or(0);
        statuses.push((ip, if failed > 0 { "failed" } else { "ok" }));
    }
    statuses
}

pub async fn parse_ansible_logs(cfg: Config, pool: DbPool) {
    let mut seen: VecDeque<String> = VecDeque::with_capacity(SEEN_LINES_CAP);
    loop {
        let start_time = Utc::now();
        tracing::info!("scanning ansible journal");
        if let Err(e) = scrape_once(&cfg, &pool, &mut seen).await {
            tracing::warn!(error = %e, "ansible journal scrape failed");
        }
        let elapsed = Utc::now().signed_duration_since(start_time).num_seconds();
        let remaining = crate::ping_monitor::remaining_secs(elapsed, SCRAPE_INTERVAL_SECS);
        if remaining > 0 {
            tokio::time::sleep(Duration::from_secs(remaining)).await;
        }
    }
}

async fn scrape_once(
    cfg: &Config,
    pool: &DbPool,
    seen: &mut VecDeque<String>,
) -> Result<(), crate::error::ApiError> {
    let output = journal_tail(&cfg.ansible_service_name, 500, Some("5 minutes ago"))
        .await
        .map_err(crate::error::ApiError::Internal)?;
    let new_lines: Vec<&str> = output
        .lines()
        .filter(|line| !seen.iter().any(|s| s == line))
        .collect();
    for line in &new_lines {
        if seen.len() == SEEN_LINES_CAP {
            seen.pop_front();
        }
        seen.push_back(line.to_string());
    }

    let statuses = extract_recap_statuses(&new_lines);
    if statuses.is_empty() {
        return Ok(());
    }
    let conn = pool.get()?;
    for (ip, status) in &statuses {
        set_playbook_status(&conn, ip, status)?;
    }
    tracing::info!(hosts = statuses.len(), "playbook statuses updated from journal");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recap_line_parsing() {
        let lines = vec![
            "Aug 12 10:00:01 srv ansible[1]: PLAY RECAP *********",
            "Aug 12 10:00:01 srv ansible[1]: 10.0.0.5 : ok=12 changed=3 unreachable=0 failed=0 skipped=1",
            "Aug 12 10:00:01 srv ansible[1]: 10.0.0.6 : ok=4 changed=0 unreachable=1 failed=2 skipped=0",
        ];
        let mut statuses = extract_recap_statuses(&lines);
        statuses.sort();
        assert_eq!(
            statuses,
            vec![("10.0.0.5".to_string(), "ok"), ("10.0.0.6".to_string(), "failed")]
        );
    }

    #[test]
    fn last_recap_per_ip_wins() {
        let lines = vec![
            "10.0.0.5 : ok=1 failed=1",
            "10.0.0.5 : ok=2 failed=0",
        ];
        let statuses = extract_recap_statuses(&lines);
        assert_eq!(statuses, vec![("10.0.0.5".to_string(), "ok")]);
    }

    #[test]
    fn non_recap_lines_ignored() {
        let lines = vec![
            "TASK [install packages] ***",
            "PLAY RECAP 10.0.0.9 failed=1",
        ];
        assert!(extract_recap_statuses(&lines).is_empty());
    }
}
