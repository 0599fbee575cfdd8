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

// 主机生命周期命令：reboot / shutdown / Wake-on-LAN
//
// reboot 与 shutdown 会主动切断 SSH 连接，因此远端超时或非零退出
// 视为 "命令大概率已生效"，按成功返回并附带说明。
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;

use crate::command_execute::{SshOutcome, run_ssh_command, wake_on_lan};
use crate::config::Config;
use crate::database_init::IP_UNKNOWN;

#[derive(Debug, Deserialize)]
pub struct IpBody {
    pub ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MacBody {
    pub mac: Option<String>,
}

fn ok_sent(msg: String) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok", "msg": msg }))
}

async fn run_disruptive(cfg: &Config, ip: &str, command: &str, verb: &str) -> HttpResponse {
    match run_ssh_command(cfg, ip, command, cfg.ssh_command_timeout).await {
        SshOutcome::Ok(_) => {
            tracing::info!(ip, verb, "command sent");
            ok_sent(format!("{verb} command sent to {ip}"))
        }
        SshOutcome::TimedOut => {
            let msg = format!("{verb} command sent to {ip} (no reply before timeout)");
            tracing::warn!(ip, verb, "remote did not answer before timeout");
            ok_sent(msg)
        }
        SshOutcome::Failed { code, stderr } => {
            // 连接被重启/关机本身打断时会走到这里
            let msg = format!("{verb} command sent to {ip} (SSH exited with error)");
            tracing::warn!(ip, verb, ?code, stderr, "ssh returned non-zero");
            ok_sent(msg)
        }
        SshOutcome::SpawnError(e) => {
            tracing::error!(ip, verb, error = %e, "failed to run ssh");
            HttpResponse::InternalServerError().json(json!({ "status": "error", "msg": e }))
        }
    }
}

fn valid_ip(ip: &Option<String>) -> Option<&str> {
    match ip.as_deref() {
        Some(ip) if !ip.is_empty() && ip != IP_UNKNOWN => Some(ip),
        _ => None,
    }
}

pub async fn api_host_reboot(body: web::Json<IpBody>, cfg: web::Data<Config>) -> HttpResponse {
    let Some(ip) = valid_ip(&body.ip) else {
        return HttpResponse::BadRequest().json(json!({ "status": "error", "msg": "Invalid IP" }));
    };
    run_disruptive(&cfg, ip, "reboot", "reboot").await
}

pub async fn api_host_shutdown(body: web::Json<IpBody>, cfg: web::Data<Config>) -> HttpResponse {
    let Some(ip) = valid_ip(&body.ip) else {
        return HttpResponse::BadRequest().json(json!({ "status": "error", "msg": "Invalid IP" }));
    };
    run_disruptive(&cfg, ip, "shutdown -h now", "shutdown").await
}

pub async fn api_host_wol(body: web::Json<MacBody>) -> HttpResponse {
    let mac = match body.mac.as_deref() {
        Some(mac) if !mac.is_empty() && mac != IP_UNKNOWN => mac,
        _ => {
            return HttpResponse::BadRequest()
                .json(json!({ "status": "error", "msg": "Invalid MAC" }));
        }
    };
    match wake_on_lan(mac).await {
        Ok(()) => {
            tracing::info!(mac, "wake-on-lan packet sent");
            ok_sent(format!("Wake-on-LAN packet sent to {mac}"))
        }
        Err(e) => {
            tracing::error!(mac, error = %e, "wake-on-lan failed");
            HttpResponse::InternalServerError().json(json!({ "status": "error", "msg": e }))
        }
    }
}
