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

mod ansible_api;
mod command_execute;
mod config;
mod config_files;
mod dashboard;
mod database_init;
mod error;
mod host_control;
mod log_scraper;
mod mark_checker;
mod ping_monitor;
mod preseed_builder;
mod registration;
mod semaphore;
mod status_label;
mod system;

use actix_web::{App, HttpServer, web};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::from_env();
    let pool = database_init::open_pool(&cfg.db_path)
        .map_err(|e| std::io::Error::other(format!("db init failed: {e}")))?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(std::io::Error::other)?;

    // 三个后台轮询：可达性、journal 抓取、mark 巡检
    tokio::spawn(ping_monitor::ping_hosts_background(pool.clone()));
    tokio::spawn(log_scraper::parse_ansible_logs(cfg.clone(), pool.clone()));
    tokio::spawn(mark_checker::check_ansible_marks_background(pool.clone()));

    tracing::info!(addr = %cfg.bind_addr, "starting pxe-watch");
    let bind_addr = cfg.bind_addr.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(cfg.clone()))
            .app_data(web::Data::new(client.clone()))
            .route("/", web::get().to(dashboard::dashboard))
            .route("/api/hosts", web::get().to(dashboard::api_hosts))
            // 装机客户端自注册
            .route("/api/register", web::get().to(registration::api_register_get))
            .route("/api/register", web::post().to(registration::api_register_post))
            // 配置文件 CRUD
            .route("/api/preseed", web::get().to(config_files::api_preseed_get))
            .route("/api/preseed", web::post().to(config_files::api_preseed_post))
            .route("/api/preseed/active", web::get().to(config_files::api_preseed_active_get))
            .route("/api/preseed/active", web::post().to(config_files::api_preseed_active_post))
            .route("/api/dnsmasq", web::get().to(config_files::api_dnsmasq_get))
            .route("/api/dnsmasq", web::post().to(config_files::api_dnsmasq_post))
            .route("/api/ipxe", web::get().to(config_files::api_ipxe_get))
            .route("/api/ipxe", web::post().to(config_files::api_ipxe_post))
            .route("/api/ansible/playbook", web::get().to(config_files::api_playbook_get))
            .route("/api/ansible/playbook", web::post().to(config_files::api_playbook_post))
            .route("/api/ansible/inventory", web::get().to(config_files::api_inventory_get))
            .route("/api/ansible/inventory", web::post().to(config_files::api_inventory_post))
            .route("/api/ansible/files", web::get().to(config_files::api_ansible_files_list))
            .route("/api/ansible/files/{name}", web::get().to(config_files::api_ansible_file_get))
            .route("/api/ansible/files/{name}", web::post().to(config_files::api_ansible_file_post))
            .route("/api/ansible/templates", web::get().to(config_files::api_ansible_templates_list))
            .route("/api/ansible/templates/{name}", web::get().to(config_files::api_ansible_template_get))
            .route("/api/ansible/templates/{name}", web::post().to(config_files::api_ansible_template_post))
            // Ansible 运行与任务状态
            .route("/api/ansible/run", web::post().to(ansible_api::api_ansible_run))
            .route("/api/ansible/task/{mac}", web::get().to(ansible_api::api_ansible_task))
            .route("/api/ansible/clients", web::get().to(ansible_api::api_ansible_clients))
            .route("/api/ansible/history", web::get().to(ansible_api::api_ansible_history))
            .route("/api/ansible/status/{ip}", web::get().to(ansible_api::api_ansible_status))
            .route("/api/logs/ansible", web::get().to(ansible_api::api_logs_ansible))
            // Semaphore 集成
            .route("/api/semaphore/status", web::get().to(semaphore::api_semaphore_status))
            .route("/api/semaphore/trigger", web::post().to(semaphore::api_semaphore_trigger))
            // 主机生命周期
            .route("/api/host/reboot", web::post().to(host_control::api_host_reboot))
            .route("/api/host/shutdown", web::post().to(host_control::api_host_shutdown))
            .route("/api/host/wol", web::post().to(host_control::api_host_wol))
            // preseed 生成器
            .route("/preseed/preview", web::post().to(preseed_builder::preseed_preview))
            .route("/preseed/generate", web::post().to(preseed_builder::preseed_generate))
            .route("/preseed/api/templates", web::get().to(preseed_builder::api_templates))
            .route("/preseed/api/template/{name}", web::get().to(preseed_builder::api_template))
            .route("/preseed/api/save-template", web::post().to(preseed_builder::api_save_template))
            .route("/preseed/api/history", web::get().to(preseed_builder::api_history))
            // 系统
            .route("/api/clear-db", web::post().to(system::api_clear_db))
    })
    .bind(bind_addr)?
    .run()
    .await
}
