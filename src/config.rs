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

// 应用配置：全部路径、SSH 凭据、超时与 Semaphore 接口参数从环境变量读入
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,
    // preseed 双槽位与当前激活槽位标记文件
    pub preseed_paths: [PathBuf; 2],
    pub preseed_active_file: PathBuf,
    pub dnsmasq_path: PathBuf,
    pub boot_ipxe_path: PathBuf,
    pub autoexec_ipxe_path: PathBuf,
    pub ansible_playbook: PathBuf,
    pub ansible_inventory: PathBuf,
    pub ansible_files_dir: PathBuf,
    pub ansible_templates_dir: PathBuf,
    pub ansible_service_name: String,
    pub preseed_templates_file: PathBuf,
    pub preseed_history_file: PathBuf,
    pub ssh_user: String,
    pub ssh_password: String,
    pub ssh_connect_timeout: u64,
    pub ssh_command_timeout: u64,
    // 超过该秒数未见 ping 结果视为离线
    pub online_timeout: u64,
    // 面板展示时间相对 UTC 的小时偏移
    pub local_offset_hours: i32,
    pub semaphore_api: String,
    pub semaphore_token: String,
    pub semaphore_project_id: u32,
    pub semaphore_template_id: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_or(key, default))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:5000"),
            db_path: env_path("DB_PATH", "/opt/pxewatch/pxe.db"),
            preseed_paths: [
                env_path("PRESEED_PATH", "/var/www/html/debian12/preseed.cfg"),
                env_path("PRESEED_PATH_2", "/var/www/html/debian12/preseed2.cfg"),
            ],
            preseed_active_file: env_path("PRESEED_ACTIVE_FILE", "/opt/pxewatch/preseed_active"),
            dnsmasq_path: env_path("DNSMASQ_PATH", "/etc/dnsmasq.conf"),
            boot_ipxe_path: env_path("BOOT_IPXE_PATH", "/srv/tftp/boot.ipxe"),
            autoexec_ipxe_path: env_path("AUTOEXEC_IPXE_PATH", "/srv/tftp/autoexec.ipxe"),
            ansible_playbook: env_path("ANSIBLE_PLAYBOOK", "/root/ansible/playbook.yml"),
            ansible_inventory: env_path("ANSIBLE_INVENTORY", "/root/ansible/inventory.ini"),
            ansible_files_dir: env_path("ANSIBLE_FILES_DIR", "/home/ansible-offline/files"),
            ansible_templates_dir: env_path("ANSIBLE_TEMPLATES_DIR", "/root/ansible/templates"),
            ansible_service_name: env_or("ANSIBLE_SERVICE_NAME", "ansible-api.service"),
            preseed_templates_file: env_path("PRESEED_TEMPLATES_FILE", "preseed_templates.json"),
            preseed_history_file: env_path("PRESEED_HISTORY_FILE", "preseed_history.json"),
            ssh_user: env_or("SSH_USER", "root"),
            ssh_password: env_or("SSH_PASSWORD", ""),
            ssh_connect_timeout: env_parse("SSH_CONNECT_TIMEOUT", 3),
            ssh_command_timeout: env_parse("SSH_COMMAND_TIMEOUT", 10),
            online_timeout: env_parse("ONLINE_TIMEOUT", 300),
            local_offset_hours: env_parse("LOCAL_OFFSET", 3),
            semaphore_api: env_or("SEMAPHORE_API", "http://127.0.0.1:3000/api"),
            semaphore_token: env_or("SEMAPHORE_TOKEN", ""),
            semaphore_project_id: env_parse("SEMAPHORE_PROJECT_ID", 1),
            semaphore_template_id: env_parse("SEMAPHORE_TEMPLATE_ID", 1),
        }
    }

    // 当前激活的 preseed 文件路径，idx 为 None 时读取激活槽位
    pub fn preseed_path(&self, idx: Option<usize>) -> Result<&PathBuf, crate::error::ApiError> {
        let idx = match idx {
            Some(i) => i,
            None => self.preseed_active_index(),
        };
        if !(1..=2).contains(&idx) {
            return Err(crate::error::ApiError::BadRequest(
                "Invalid preseed index".into(),
            ));
        }
        Ok(&self.preseed_paths[idx - 1])
    }

    pub fn preseed_active_index(&self) -> usize {
        std::fs::read_to_string(&self.preseed_active_file)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|i| (1..=2).contains(i))
            .unwrap_or(1)
    }

    pub fn set_preseed_active_index(&self, idx: usize) -> Result<(), crate::error::ApiError> {
        if !(1..=2).contains(&idx) {
            return Err(crate::error::ApiError::BadRequest(
                "Invalid preseed index".into(),
            ));
        }
        if let Some(parent) = self.preseed_active_file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
        }
        std::fs::write(&self.preseed_active_file, idx.to_string())
            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::from_env();
        assert_eq!(cfg.preseed_active_index(), 1);
        assert!(cfg.preseed_path(Some(3)).is_err());
        assert!(cfg.preseed_path(Some(2)).is_ok());
    }
}
