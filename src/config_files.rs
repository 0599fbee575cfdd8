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

// 配置文件 CRUD：preseed / dnsmasq / iPXE / Ansible playbook、inventory、files、templates
use std::fs;
use std::path::{Component, Path, PathBuf};

use actix_web::{HttpResponse, web};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::command_execute::restart_service;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};

const BOOT_MARKER: &str = "### boot.ipxe ###\n";
const AUTOEXEC_SPLIT: &str = "\n### autoexec.ipxe ###\n";

pub fn read_file(path: &Path) -> ApiResult<String> {
    Ok(fs::read_to_string(path)?)
}

// 写文件，父目录不存在则一并创建
pub fn write_file(path: &Path, content: &str) -> ApiResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    tracing::info!(path = %path.display(), "file updated");
    Ok(())
}

// 目录内相对路径拼接，拒绝越界
pub fn safe_join(base: &Path, rel: &str) -> ApiResult<PathBuf> {
    let rel_path = Path::new(rel);
    for component in rel_path.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(ApiError::BadRequest("Invalid path".to_string())),
        }
    }
    Ok(base.join(rel_path))
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: String,
    pub modified: String,
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

// 目录列表（仅文件），按小写文件名排序
pub fn list_files_in_dir(dir: &Path) -> ApiResult<Vec<FileEntry>> {
    fs::create_dir_all(dir)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map(|t| DateTime::<Local>::from(t).format("%d.%m.%Y %H:%M").to_string())
            .unwrap_or_default();
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            size: format_size(meta.len()),
            modified,
        });
    }
    files.sort_by_key(|f| f.name.to_lowercase());
    Ok(files)
}

fn plain_text(content: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(content)
}

fn ok_json() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// ==== preseed（双槽位，?file=1|2 选择，缺省用激活槽位） ====

#[derive(Debug, Deserialize)]
pub struct PreseedQuery {
    pub file: Option<usize>,
}

pub async fn api_preseed_get(
    query: web::Query<PreseedQuery>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let path = cfg.preseed_path(query.file)?;
    Ok(plain_text(read_file(path)?))
}

pub async fn api_preseed_post(
    query: web::Query<PreseedQuery>,
    body: String,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let path = cfg.preseed_path(query.file)?;
    write_file(path, &body)?;
    Ok(ok_json())
}

pub async fn api_preseed_active_get(cfg: web::Data<Config>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "active": cfg.preseed_active_index() }))
}

#[derive(Debug, Deserialize)]
pub struct ActiveBody {
    pub active: usize,
}

pub async fn api_preseed_active_post(
    body: web::Json<ActiveBody>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    cfg.set_preseed_active_index(body.active)?;
    Ok(ok_json())
}

// ==== dnsmasq（写入后重启服务，重启失败不回滚文件） ====

pub async fn api_dnsmasq_get(cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    Ok(plain_text(read_file(&cfg.dnsmasq_path)?))
}

pub async fn api_dnsmasq_post(body: String, cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    write_file(&cfg.dnsmasq_path, &body)?;
    if let Err(e) = restart_service("dnsmasq").await {
        tracing::error!(error = %e, "dnsmasq restart failed after config write");
        return Err(ApiError::Internal(format!(
            "config written but restart failed: {e}"
        )));
    }
    tracing::info!("dnsmasq.conf updated and dnsmasq restarted");
    Ok(ok_json())
}

// ==== iPXE（boot.ipxe + autoexec.ipxe 合并为一个带分隔符的文档） ====

pub fn combine_ipxe(boot: &str, autoexec: &str) -> String {
    format!("{BOOT_MARKER}{boot}{AUTOEXEC_SPLIT}{autoexec}")
}

pub fn split_ipxe(combined: &str) -> Option<(String, String)> {
    let (boot_part, autoexec) = combined.split_once(AUTOEXEC_SPLIT)?;
    let boot = boot_part.strip_prefix(BOOT_MARKER).unwrap_or(boot_part);
    Some((boot.to_string(), autoexec.to_string()))
}

pub async fn api_ipxe_get(cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    let boot = read_file(&cfg.boot_ipxe_path)?;
    let autoexec = read_file(&cfg.autoexec_ipxe_path)?;
    Ok(plain_text(combine_ipxe(&boot, &autoexec)))
}

pub async fn api_ipxe_post(body: String, cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    let (boot, autoexec) = split_ipxe(&body)
        .ok_or_else(|| ApiError::BadRequest("Malformed iPXE document".to_string()))?;
    write_file(&cfg.boot_ipxe_path, &boot)?;
    write_file(&cfg.autoexec_ipxe_path, &autoexec)?;
    tracing::info!("boot.ipxe and autoexec.ipxe updated");
    Ok(ok_json())
}

// ==== Ansible playbook / inventory ====

pub async fn api_playbook_get(cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    Ok(plain_text(read_file(&cfg.ansible_playbook)?))
}

pub async fn api_playbook_post(body: String, cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    write_file(&cfg.ansible_playbook, &body)?;
    Ok(ok_json())
}

// inventory 允许不存在，GET 回空串
pub async fn api_inventory_get(cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    match read_file(&cfg.ansible_inventory) {
        Ok(content) => Ok(plain_text(content)),
        Err(ApiError::NotFound) => Ok(plain_text(String::new())),
        Err(e) => Err(e),
    }
}

pub async fn api_inventory_post(body: String, cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    write_file(&cfg.ansible_inventory, &body)?;
    Ok(ok_json())
}

// ==== Ansible files / templates 子树 ====

pub async fn api_ansible_file_get(
    path: web::Path<String>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let target = safe_join(&cfg.ansible_files_dir, &path)?;
    Ok(plain_text(read_file(&target)?))
}

pub async fn api_ansible_file_post(
    path: web::Path<String>,
    body: String,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let target = safe_join(&cfg.ansible_files_dir, &path)?;
    write_file(&target, &body)?;
    Ok(ok_json())
}

pub async fn api_ansible_template_get(
    path: web::Path<String>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let target = safe_join(&cfg.ansible_templates_dir, &path)?;
    Ok(plain_text(read_file(&target)?))
}

pub async fn api_ansible_template_post(
    path: web::Path<String>,
    body: String,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let target = safe_join(&cfg.ansible_templates_dir, &path)?;
    write_file(&target, &body)?;
    Ok(ok_json())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub path: Option<String>,
}

// 子目录导航：files + 当前相对路径 + 上级路径（根目录时两者为空串）
pub fn files_listing(base: &Path, rel: &str) -> ApiResult<serde_json::Value> {
    let target = if rel.is_empty() {
        base.to_path_buf()
    } else {
        safe_join(base, rel)?
    };
    let files = list_files_in_dir(&target)?;
    let parent = if rel.is_empty() {
        String::new()
    } else {
        Path::new(rel)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    Ok(json!({ "files": files, "path": rel, "parent": parent }))
}

pub async fn api_ansible_files_list(
    query: web::Query<ListQuery>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let rel = query.path.as_deref().unwrap_or("").trim();
    Ok(HttpResponse::Ok().json(files_listing(&cfg.ansible_files_dir, rel)?))
}

pub async fn api_ansible_templates_list(cfg: web::Data<Config>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(list_files_in_dir(&cfg.ansible_templates_dir)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipxe_combine_split_roundtrip() {
        let combined = combine_ipxe("#!ipxe\nchain boot\n", "#!ipxe\nautoboot\n");
        let (boot, autoexec) = split_ipxe(&combined).unwrap();
        assert_eq!(boot, "#!ipxe\nchain boot\n");
        assert_eq!(autoexec, "#!ipxe\nautoboot\n");
    }

    #[test]
    fn ipxe_split_rejects_garbage() {
        assert!(split_ipxe("no markers here").is_none());
    }

    #[test]
    fn safe_join_rejects_traversal() {
        let base = Path::new("/srv/files");
        assert!(safe_join(base, "../etc/passwd").is_err());
        assert!(safe_join(base, "/etc/passwd").is_err());
        assert_eq!(
            safe_join(base, "sub/dir/a.txt").unwrap(),
            PathBuf::from("/srv/files/sub/dir/a.txt")
        );
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[actix_web::test]
    async fn preseed_post_then_get_roundtrips() {
        use actix_web::{App, test};
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::from_env();
        cfg.preseed_paths = [dir.path().join("preseed.cfg"), dir.path().join("preseed2.cfg")];
        cfg.preseed_active_file = dir.path().join("active");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(cfg))
                .route("/api/preseed", web::get().to(api_preseed_get))
                .route("/api/preseed", web::post().to(api_preseed_post)),
        )
        .await;

        let body = "d-i debian-installer/locale string en_US\n# trailing comment\n";
        let req = test::TestRequest::post()
            .uri("/api/preseed?file=2")
            .set_payload(body)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 200);

        let req = test::TestRequest::get().uri("/api/preseed?file=2").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), 200);
        let returned = test::read_body(res).await;
        assert_eq!(returned, body.as_bytes());
    }

    #[test]
    fn files_listing_navigates_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("roles/common")).unwrap();
        fs::write(dir.path().join("roles/common/main.yml"), "- hosts: all\n").unwrap();

        let root = files_listing(dir.path(), "").unwrap();
        assert_eq!(root["path"], "");
        assert_eq!(root["parent"], "");

        let sub = files_listing(dir.path(), "roles/common").unwrap();
        assert_eq!(sub["path"], "roles/common");
        assert_eq!(sub["parent"], "roles");
        assert_eq!(sub["files"][0]["name"], "main.yml");

        assert!(files_listing(dir.path(), "../etc").is_err());
    }

    #[test]
    fn list_dir_sorted_and_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Beta.txt"), "b").unwrap();
        fs::write(dir.path().join("alpha.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        let files = list_files_in_dir(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "Beta.txt"]);
    }
}
