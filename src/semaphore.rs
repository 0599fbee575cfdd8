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

// Semaphore REST 集成：读取最近一次 playbook 运行状态、远程触发新运行。
// 上游超时必须以独立的 "timeout" 状态暴露出去，不能混进一般错误。
use actix_web::{HttpResponse, web};
use serde_json::{Value, json};

use crate::config::Config;

fn status_icon(status: &str) -> &'static str {
    match status {
        "success" => "ok",
        "failed" | "canceled" => "failed",
        "running" | "waiting" => "running",
        _ => "unknown",
    }
}

fn map_task_status(status: &str) -> &'static str {
    match status {
        "success" => "ok",
        "failed" | "canceled" => "failed",
        "running" => "running",
        "waiting" => "pending",
        _ => "unknown",
    }
}

fn request_error(e: &reqwest::Error) -> Value {
    if e.is_timeout() {
        json!({ "status": "timeout", "msg": "Semaphore request timed out" })
    } else {
        json!({ "status": "error", "msg": e.to_string() })
    }
}

pub async fn get_semaphore_status(client: &reqwest::Client, cfg: &Config) -> Value {
    let url = format!(
        "{}/project/{}/templates",
        cfg.semaphore_api, cfg.semaphore_project_id
    );
    let res = match client
        .get(&url)
        .bearer_auth(&cfg.semaphore_token)
        .send()
        .await
    {
        Ok(res) => res,
        Err(e) => {
            tracing::error!(error = %e, "semaphore status request failed");
            return request_error(&e);
        }
    };
    if !res.status().is_success() {
        return json!({ "status": "error", "msg": format!("API error {}", res.status().as_u16()) });
    }
    let templates: Vec<Value> = match res.json().await {
        Ok(t) => t,
        Err(e) => return request_error(&e),
    };
    let template = templates
        .iter()
        .find(|t| t["id"].as_u64() == Some(cfg.semaphore_template_id as u64));
    let Some(task) = template.and_then(|t| t.get("last_task")).filter(|t| !t.is_null()) else {
        return json!({ "status": "unknown", "msg": "no data" });
    };

    let raw_status = task["status"].as_str().unwrap_or("");
    let time = task["created"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| {
            (dt.naive_utc() + chrono::Duration::hours(cfg.local_offset_hours as i64))
                .format("%d.%m.%Y %H:%M")
                .to_string()
        })
        .unwrap_or_default();

    json!({
        "status": map_task_status(raw_status),
        "display_status": raw_status,
        "time": time,
        "commit_message": task["commit_message"].as_str().unwrap_or(""),
        "task_id": task["id"],
        "icon": status_icon(raw_status),
    })
}

pub async fn trigger_semaphore_playbook(client: &reqwest::Client, cfg: &Config) -> Value {
    let url = format!(
        "{}/project/{}/tasks",
        cfg.semaphore_api, cfg.semaphore_project_id
    );
    let res = match client
        .post(&url)
        .bearer_auth(&cfg.semaphore_token)
        .json(&json!({ "template_id": cfg.semaphore_template_id }))
        .send()
        .await
    {
        Ok(res) => res,
        Err(e) => {
            tracing::error!(error = %e, "semaphore trigger request failed");
            return request_error(&e);
        }
    };
    let status = res.status();
    if status.is_success() {
        let task: Value = res.json().await.unwrap_or_else(|_| json!({}));
        tracing::info!(task_id = ?task["id"], "ansible run triggered through semaphore");
        json!({ "status": "ok", "task_id": task["id"] })
    } else {
        let body = res.text().await.unwrap_or_default();
        json!({ "status": "error", "msg": format!("HTTP {}: {body}", status.as_u16()) })
    }
}

pub async fn api_semaphore_status(
    client: web::Data<reqwest::Client>,
    cfg: web::Data<Config>,
) -> HttpResponse {
    HttpResponse::Ok().json(get_semaphore_status(&client, &cfg).await)
}

pub async fn api_semaphore_trigger(
    client: web::Data<reqwest::Client>,
    cfg: web::Data<Config>,
) -> HttpResponse {
    let result = trigger_semaphore_playbook(&client, &cfg).await;
    if result["status"] == "ok" {
        HttpResponse::Ok().json(result)
    } else {
        HttpResponse::InternalServerError().json(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    // 监听但永不应答的端口，用来制造超时
    fn silent_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("http://{addr}/api"))
    }

    fn test_cfg(api: String) -> Config {
        let mut cfg = Config::from_env();
        cfg.semaphore_api = api;
        cfg
    }

    fn short_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn status_surfaces_timeout() {
        let (_listener, api) = silent_server();
        let result = get_semaphore_status(&short_client(), &test_cfg(api)).await;
        assert_eq!(result["status"], "timeout");
        assert!(result["msg"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn trigger_surfaces_timeout() {
        let (_listener, api) = silent_server();
        let result = trigger_semaphore_playbook(&short_client(), &test_cfg(api)).await;
        assert_eq!(result["status"], "timeout");
        assert!(result["msg"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn task_status_mapping() {
        assert_eq!(map_task_status("success"), "ok");
        assert_eq!(map_task_status("canceled"), "failed");
        assert_eq!(map_task_status("waiting"), "pending");
        assert_eq!(map_task_status("???"), "unknown");
    }
}
