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

// 主机自注册：装机各阶段的客户端通过 GET/POST 上报 mac/ip/stage/details
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;

use crate::config::Config;
use crate::database_init::{DbPool, register_host};

#[derive(Debug, Deserialize, Default)]
pub struct RegisterParams {
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub stage: Option<String>,
    pub details: Option<String>,
}

// GET 用 query，POST 用表单，两者字段相同
pub async fn api_register_get(
    req: HttpRequest,
    query: web::Query<RegisterParams>,
    pool: web::Data<DbPool>,
    cfg: web::Data<Config>,
) -> HttpResponse {
    handle_register(&req, query.into_inner(), &pool, &cfg)
}

pub async fn api_register_post(
    req: HttpRequest,
    form: web::Form<RegisterParams>,
    pool: web::Data<DbPool>,
    cfg: web::Data<Config>,
) -> HttpResponse {
    handle_register(&req, form.into_inner(), &pool, &cfg)
}

fn handle_register(
    req: &HttpRequest,
    params: RegisterParams,
    pool: &DbPool,
    cfg: &Config,
) -> HttpResponse {
    let mac = params.mac.unwrap_or_default().to_lowercase();
    if mac.is_empty() {
        tracing::warn!("register request without MAC");
        return HttpResponse::BadRequest().body("Missing MAC");
    }
    // ip 缺省取对端地址
    let ip = params.ip.unwrap_or_else(|| {
        req.peer_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_default()
    });
    let stage = params.stage.unwrap_or_else(|| "unknown".to_string());
    let details = params.details.unwrap_or_default();

    let conn = match pool.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "register: db pool error");
            return HttpResponse::InternalServerError().body("Error");
        }
    };
    if let Err(e) = register_host(&conn, &mac, &ip, &stage, &details) {
        tracing::error!(error = %e, mac, "register: upsert failed");
        return HttpResponse::InternalServerError().body("Error");
    }
    tracing::info!(mac, ip, stage, "host registered");

    // 注册触发一次全量 playbook（fire-and-forget，不针对单台）
    spawn_playbook_run(cfg);

    HttpResponse::Ok().body("OK")
}

fn spawn_playbook_run(cfg: &Config) {
    let result = tokio::process::Command::new("ansible-playbook")
        .arg(&cfg.ansible_playbook)
        .arg("-i")
        .arg(&cfg.ansible_inventory)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    match result {
        Ok(_) => tracing::info!("ansible-playbook started after registration"),
        Err(e) => tracing::error!(error = %e, "failed to start ansible-playbook"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_init::test_pool;
    use actix_web::{App, test};

    macro_rules! test_app {
        ($pool:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($pool))
                    .app_data(web::Data::new(Config::from_env()))
                    .route("/api/register", web::get().to(api_register_get))
                    .route("/api/register", web::post().to(api_register_post)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn register_via_get_and_form_post() {
        let pool = test_pool();
        let app = test_app!(pool.clone());

        let req = test::TestRequest::get()
            .uri("/api/register?mac=AA:BB:CC:DD:EE:01&ip=10.0.0.7&stage=dhcp")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 200);

        let req = test::TestRequest::post()
            .uri("/api/register")
            .set_form([
                ("mac", "AA:BB:CC:DD:EE:01"),
                ("ip", "10.0.0.7"),
                ("stage", "debian_install"),
            ])
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 200);

        // MAC 统一小写入库，重复注册不产生新行
        let conn = pool.get().unwrap();
        let (mac, stage, count): (String, String, i64) = conn
            .query_row(
                "SELECT mac, stage, (SELECT COUNT(*) FROM hosts) FROM hosts",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(mac, "aa:bb:cc:dd:ee:01");
        assert_eq!(stage, "debian_install");
        assert_eq!(count, 1);
    }

    #[actix_web::test]
    async fn missing_mac_is_rejected() {
        let pool = test_pool();
        let app = test_app!(pool.clone());
        let req = test::TestRequest::get()
            .uri("/api/register?ip=10.0.0.7&stage=dhcp")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 400);
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM hosts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
