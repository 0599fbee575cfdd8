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

// 主机状态聚合核心：stage、ping、Ansible 完成信号三路合一，推导展示标签
use chrono::NaiveDateTime;

use crate::mark_checker::MarkStatus;

// 各安装阶段的展示文案，未知阶段显示 "—"
pub fn base_stage_label(stage: &str) -> &'static str {
    match stage {
        "dhcp" => "IP acquired",
        "ipxe_started" => "Loading iPXE",
        "debian_install" => "Installing Debian",
        "reboot" => "Rebooting",
        _ => "—",
    }
}

// mark.json 里的 install_date，可能带时区后缀或小数秒
pub fn parse_install_date(raw: &str) -> Option<NaiveDateTime> {
    let clean = raw.split('+').next().unwrap_or(raw);
    let clean = clean.split('Z').next().unwrap_or(clean);
    NaiveDateTime::parse_from_str(clean, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(clean, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

// 推导单台主机的状态标签。优先级：
// 1. mark 确认完成且时间可解析 → 只显示安装完成时间(+版本)
// 2. mark 完成但时间不可解析 → 完成但日期未知
// 3. mark pending → 阶段标签加 "in progress" 后缀
// 4. 探测失败 → 回退到缓存的 playbook_status，没有缓存就只给阶段标签
pub fn derive_stage_label(
    stage: &str,
    cached_playbook: Option<&str>,
    mark: &MarkStatus,
    local_offset_hours: i32,
) -> String {
    let base = base_stage_label(stage);
    match mark {
        MarkStatus::Ok(data) => {
            let date = data
                .get("install_date")
                .and_then(|v| v.as_str())
                .and_then(parse_install_date);
            match date {
                Some(dt) => {
                    let local = dt + chrono::Duration::hours(local_offset_hours as i64);
                    let mut label = format!("Ansible: {}", local.format("%d.%m.%Y %H:%M"));
                    if let Some(version) = data.get("version").and_then(|v| v.as_str()) {
                        if !version.is_empty() {
                            label.push_str(&format!(" (v{version})"));
                        }
                    }
                    label
                }
                None => "Ansible: done (date unknown)".to_string(),
            }
        }
        MarkStatus::Pending(_) => format!("{base} / Ansible in progress"),
        MarkStatus::Error(_) => match cached_playbook {
            // 缓存的 running/pending 压过可能过期的 unknown 阶段
            Some("running") | Some("pending") => {
                if base == "—" {
                    "Ansible in progress".to_string()
                } else {
                    format!("{base} / Ansible in progress")
                }
            }
            Some("failed") => format!("{base} / Ansible failed"),
            Some("ok") => format!("{base} / Ansible done"),
            _ => base.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mark_ok(date: &str, version: &str) -> MarkStatus {
        let mut map = serde_json::Map::new();
        map.insert("install_date".into(), json!(date));
        if !version.is_empty() {
            map.insert("version".into(), json!(version));
        }
        MarkStatus::Ok(map)
    }

    #[test]
    fn confirmed_mark_overrides_stage() {
        let label = derive_stage_label(
            "debian_install",
            Some("running"),
            &mark_ok("2025-08-01T10:30:00+03:00", "1.2"),
            0,
        );
        assert_eq!(label, "Ansible: 01.08.2025 10:30 (v1.2)");
    }

    #[test]
    fn unparseable_date_still_overrides() {
        let label = derive_stage_label("dhcp", None, &mark_ok("not-a-date", ""), 3);
        assert_eq!(label, "Ansible: done (date unknown)");
    }

    #[test]
    fn pending_mark_appends_suffix() {
        let label = derive_stage_label(
            "debian_install",
            None,
            &MarkStatus::Pending("no mark yet".into()),
            3,
        );
        assert_eq!(label, "Installing Debian / Ansible in progress");
    }

    #[test]
    fn cached_running_overrides_unknown_stage() {
        let label = derive_stage_label(
            "unknown",
            Some("running"),
            &MarkStatus::Error("ssh unreachable".into()),
            3,
        );
        assert_eq!(label, "Ansible in progress");
    }

    #[test]
    fn probe_error_without_cache_falls_back_to_stage() {
        let label = derive_stage_label(
            "ipxe_started",
            None,
            &MarkStatus::Error("ssh unreachable".into()),
            3,
        );
        assert_eq!(label, "Loading iPXE");
    }

    #[test]
    fn offset_applied_to_install_date() {
        let label = derive_stage_label("reboot", None, &mark_ok("2025-08-01T10:00:00Z", ""), 3);
        assert_eq!(label, "Ansible: 01.08.2025 13:00");
    }
}
