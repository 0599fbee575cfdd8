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

// 外部命令执行：ssh(sshpass)、ping、wakeonlan、systemctl，全部结构化参数
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;

// SSH 命令的四种结局，调用方据此决定把失败当错误还是当成功
#[derive(Debug)]
pub enum SshOutcome {
    Ok(String),
    Failed { code: Option<i32>, stderr: String },
    TimedOut,
    SpawnError(String),
}

// SSH 到指定主机运行命令，超时由调用方指定
pub async fn run_ssh_command(cfg: &Config, ip: &str, command: &str, timeout_secs: u64) -> SshOutcome {
    let mut cmd = Command::new("sshpass");
    cmd.arg("-p")
        .arg(&cfg.ssh_password)
        .arg("ssh")
        .arg("-o")
        .arg("LogLevel=ERROR")
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-o")
        .arg("UserKnownHostsFile=/dev/null")
        .arg("-o")
        .arg(format!("ConnectTimeout={}", cfg.ssh_connect_timeout))
        .arg(format!("{}@{}", cfg.ssh_user, ip))
        .arg(command);
    let fut = cmd.output();
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Err(_) => SshOutcome::TimedOut,
        Ok(Err(e)) => SshOutcome::SpawnError(e.to_string()),
        Ok(Ok(output)) => {
            if output.status.success() {
                SshOutcome::Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                SshOutcome::Failed {
                    code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                }
            }
        }
    }
}

// ICMP 探测，1 秒超时，只关心退出码
pub async fn ping_host(ip: &str) -> bool {
    let output = Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg("1")
        .arg(ip)
        .output()
        .await;
    match output {
        Ok(output) => output.status.success(),
        Err(e) => {
            tracing::warn!(ip, error = %e, "ping failed to run");
            false
        }
    }
}

pub async fn wake_on_lan(mac: &str) -> Result<(), String> {
    let output = Command::new("wakeonlan").arg(mac).output().await;
    match output {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(format!(
            "wakeonlan failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err("'wakeonlan' command not found, install the wakeonlan package".to_string())
        }
        Err(e) => Err(format!("failed to run wakeonlan: {e}")),
    }
}

pub async fn restart_service(name: &str) -> Result<(), String> {
    let output = Command::new("sudo")
        .arg("systemctl")
        .arg("restart")
        .arg(name)
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(format!(
            "systemctl restart {name} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(e) => Err(format!("failed to run systemctl: {e}")),
    }
}

// journalctl 最近 n 行，带可选 --since
pub async fn journal_tail(unit: &str, lines: u32, since: Option<&str>) -> Result<String, String> {
    let mut cmd = Command::new("journalctl");
    cmd.arg("-u")
        .arg(unit)
        .arg("-n")
        .arg(lines.to_string())
        .arg("--no-pager");
    if let Some(since) = since {
        cmd.arg("--since").arg(since);
    }
    let output = cmd.output().await.map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
