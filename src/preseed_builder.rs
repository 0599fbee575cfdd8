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

// preseed 生成器：表单校验 + Debian 12 应答文件拼装。
// 纯字符串模板，核心在校验规则与 late_command 的条件片段。
use std::sync::LazyLock;

use actix_web::{HttpResponse, web};
use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[kKmMgG]?$").unwrap());

const PARTITIONS: [&str; 6] = ["efi", "boot", "root", "home", "var", "swap"];
const HISTORY_CAP: usize = 20;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PreseedForm {
    pub raid_level: Option<String>,
    pub disk_count: String,
    pub hot_spare: Option<String>,
    pub efi_size: String,
    pub boot_size: String,
    pub root_size: String,
    pub home_size: String,
    pub var_size: String,
    pub swap_size: String,
    pub hostname: String,
    pub root_password: String,
    pub username: String,
    pub user_password: String,
    pub mirror_host: String,
    pub mirror_mode: Option<String>,
    pub timezone: String,
    pub locale: String,
    pub net_mode: Option<String>,
    pub net_ip: Option<String>,
    pub net_netmask: Option<String>,
    pub net_gateway: Option<String>,
    pub net_dns: Option<String>,
    pub enable_ipxe: Option<String>,
    pub ipxe_url: Option<String>,
    pub register_dhcp: Option<String>,
    pub register_disk: Option<String>,
    pub enable_ansible: Option<String>,
    pub ansible_script: Option<String>,
    pub show_ip: Option<String>,
    pub fix_hostname: Option<String>,
    pub disable_video: Option<String>,
    pub enable_font: Option<String>,
    pub font_face: Option<String>,
    pub font_size: Option<String>,
    pub install_base_packages: Option<String>,
    pub enable_root_ssh: Option<String>,
    pub disable_sound: Option<String>,
    pub extended_registration: Option<String>,
    pub mirror_url_1: Option<String>,
    pub mirror_url_2: Option<String>,
    pub mirror_url_3: Option<String>,
    pub mirror_url_4: Option<String>,
    pub mirror_url_5: Option<String>,
}

fn is_on(flag: &Option<String>) -> bool {
    flag.as_deref() == Some("on")
}

impl PreseedForm {
    pub fn raid_level(&self) -> &str {
        self.raid_level.as_deref().unwrap_or("1")
    }

    pub fn mirror_mode(&self) -> &str {
        self.mirror_mode.as_deref().unwrap_or("default")
    }

    pub fn net_mode(&self) -> &str {
        self.net_mode.as_deref().unwrap_or("dhcp")
    }

    fn mirrors(&self) -> Vec<&str> {
        [
            &self.mirror_url_1,
            &self.mirror_url_2,
            &self.mirror_url_3,
            &self.mirror_url_4,
            &self.mirror_url_5,
        ]
        .into_iter()
        .filter_map(|u| u.as_deref())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .collect()
    }

    fn partition_sizes(&self) -> [&str; 6] {
        [
            &self.efi_size,
            &self.boot_size,
            &self.root_size,
            &self.home_size,
            &self.var_size,
            &self.swap_size,
        ]
        .map(|s| s.trim())
    }
}

// "512" / "2048M" / "1G" / "1024k" → MiB
fn convert_size_mib(size: &str) -> u64 {
    let size = size.trim().to_uppercase();
    if let Some(num) = size.strip_suffix('G') {
        num.parse::<u64>().unwrap_or(0) * 1024
    } else if let Some(num) = size.strip_suffix('M') {
        num.parse::<u64>().unwrap_or(0)
    } else if let Some(num) = size.strip_suffix('K') {
        num.parse::<u64>().unwrap_or(0) / 1024
    } else {
        size.parse::<u64>().unwrap_or(0)
    }
}

// 全部校验规则；出错返回给调用方的 400 文案
pub fn validate(form: &PreseedForm) -> Result<(), String> {
    let raid_level = form.raid_level();
    let disk_count: u32 = form
        .disk_count
        .trim()
        .parse()
        .map_err(|_| "Error: invalid numeric value for disk count".to_string())?;
    let hot_spare = is_on(&form.hot_spare);
    let mut min_disks = if raid_level == "0" { 1 } else { 2 };
    if hot_spare && raid_level == "1" {
        min_disks += 1;
    }
    if disk_count < min_disks {
        return Err(format!(
            "Error: RAID-{raid_level}{} requires at least {min_disks} disks",
            if hot_spare { " with hot spare" } else { "" }
        ));
    }

    for (name, size) in PARTITIONS.iter().zip(form.partition_sizes()) {
        if !SIZE_RE.is_match(size) {
            return Err(format!(
                "Error: invalid size for {name} ({size}). Examples: 512, 1G, 2048M"
            ));
        }
        if *name == "efi" {
            let digits: String = size.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.parse::<u64>().unwrap_or(0) < 100 {
                return Err("Error: EFI partition must be at least 100M".to_string());
            }
        }
        if convert_size_mib(size) == 0 {
            return Err(format!("Error: partition size for {name} must be positive"));
        }
    }

    if form.root_password.len() < 8 {
        return Err("Error: root password must be at least 8 characters".to_string());
    }

    if form.mirror_mode() == "custom" && form.mirrors().is_empty() {
        return Err("Error: at least one mirror URL is required".to_string());
    }

    if is_on(&form.enable_ipxe) {
        let url = form.ipxe_url.as_deref().unwrap_or("").trim();
        if url.is_empty() {
            return Err("Error: registration server URL is required".to_string());
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("Error: URL must start with http:// or https://".to_string());
        }
        if !is_on(&form.register_dhcp) && !is_on(&form.register_disk) {
            return Err("Error: select at least one registration stage".to_string());
        }
    }

    if form.net_mode() == "static" {
        for (field, value) in [
            ("net_ip", &form.net_ip),
            ("net_netmask", &form.net_netmask),
            ("net_gateway", &form.net_gateway),
            ("net_dns", &form.net_dns),
        ] {
            if value.as_deref().unwrap_or("").trim().is_empty() {
                return Err(format!("Error: field '{field}' is required for static network"));
            }
        }
    }
    Ok(())
}

fn disk_names(count: u32) -> Vec<String> {
    (0..count)
        .map(|i| format!("/dev/sd{}", (b'a' + i as u8) as char))
        .collect()
}

// 同一分区号跨所有盘的 RAID 成员串，如 /dev/sda2#/dev/sdb2
fn raid_paths(disks: &[String], part_num: u32) -> String {
    disks
        .iter()
        .map(|d| format!("{d}{part_num}"))
        .collect::<Vec<_>>()
        .join("#")
}

pub fn generate_preseed(form: &PreseedForm) -> String {
    let disk_count: u32 = form.disk_count.trim().parse().unwrap_or(1);
    let disks = disk_names(disk_count);
    let disk_string = disks.join(" ");
    let raid_level = form.raid_level();
    let spare_disks = if is_on(&form.hot_spare) && raid_level == "1" { 1 } else { 0 };
    let sizes = form.partition_sizes().map(convert_size_mib);
    let [efi, boot, root, home, var, swap] = sizes;
    let ipxe_url = form.ipxe_url.as_deref().unwrap_or("");
    let hostname = &form.hostname;

    let mut lines: Vec<String> = vec![
        "# ============================================================".into(),
        "# Debian 12 (bookworm) — unattended installation".into(),
        format!("# UEFI + RAID-{raid_level} ({disk_count} disks), EFI outside RAID"),
        format!("# Generated: {}", Local::now().format("%Y-%m-%d %H:%M")),
        "# ============================================================".into(),
        String::new(),
    ];

    if is_on(&form.enable_ipxe) && is_on(&form.register_dhcp) {
        lines.extend([
            "### Stage 1: registration right after DHCP".into(),
            "d-i preseed/early_command string \\".into(),
            "  sh -c 'iface=$(ip route | awk \"/default/ {print $5; exit}\"); \\".into(),
            "  mac=$(cat /sys/class/net/$iface/address); \\".into(),
            "  ip_addr=$(ip -4 -o addr show $iface | awk \"{split($4,a,\\\"/\\\"); print a[1]}\"); \\"
                .into(),
            "  mkdir -p /var/log/installer; \\".into(),
            "  exec > /var/log/installer/syslog.$mac 2>&1; \\".into(),
            format!(
                "  wget -q --post-data \"mac=$mac&ip=$ip_addr&stage=dhcp\" \"{ipxe_url}\" || true'"
            ),
            String::new(),
        ]);
    }

    if form.net_mode() == "static" {
        lines.extend([
            "### Network (static)".into(),
            "d-i netcfg/disable_autoconfig boolean true".into(),
            "d-i netcfg/dhcp_timeout string 60".into(),
            format!("d-i netcfg/get_hostname string {hostname}"),
            "d-i netcfg/get_domain string local".into(),
            "d-i netcfg/wireless_wep string".into(),
            format!("d-i netcfg/ipaddress string {}", form.net_ip.as_deref().unwrap_or("")),
            format!("d-i netcfg/netmask string {}", form.net_netmask.as_deref().unwrap_or("")),
            format!("d-i netcfg/gateway string {}", form.net_gateway.as_deref().unwrap_or("")),
            format!("d-i netcfg/dns string {}", form.net_dns.as_deref().unwrap_or("")),
            "d-i netcfg/confirm_static boolean true".into(),
            String::new(),
        ]);
    } else {
        lines.extend([
            "### Network (DHCP)".into(),
            "d-i netcfg/choose_interface select auto".into(),
            format!("d-i netcfg/get_hostname string {hostname}"),
            "d-i netcfg/wireless_wep string".into(),
            String::new(),
        ]);
    }

    lines.extend([
        "### Locale, keyboard, installer".into(),
        format!("d-i debian-installer/locale string {}", form.locale),
        "d-i console-setup/ask_detect boolean false".into(),
        "d-i keyboard-configuration/xkb-keymap select us,ru".into(),
        "d-i debian-installer/quiet boolean true".into(),
        "d-i preseed/quiet boolean true".into(),
        String::new(),
    ]);

    if form.mirror_mode() == "default" {
        lines.extend([
            "### Stage 2: APT mirror".into(),
            "d-i mirror/country string manual".into(),
            format!("d-i mirror/http/hostname string {}", form.mirror_host),
            "d-i mirror/http/directory string /repository/debian-bookworm-proxy".into(),
            "d-i mirror/http/proxy string".into(),
            String::new(),
        ]);
    } else {
        lines.extend([
            "### Stage 2: custom APT mirrors".into(),
            "d-i apt-setup/use_mirror boolean false".into(),
            "d-i apt-setup/services-select multiselect security, volatile".into(),
            "d-i apt-setup/security_host string security.debian.org".into(),
            String::new(),
        ]);
    }

    let expert_recipe = format!(
        "      multiraid :: \\\n\
         \x20       {efi} {efi} {efi} fat32 \\\n\
         \x20         $primary{{ }} \\\n\
         \x20         $bootable{{ }} \\\n\
         \x20         method{{ efi }} \\\n\
         \x20         format{{ }} \\\n\
         \x20       . \\\n\
         \x20       {boot} {boot} {boot} raid \\\n\
         \x20         $primary{{ }} \\\n\
         \x20         method{{ raid }} \\\n\
         \x20       . \\\n\
         \x20       {root} {root} {root} raid \\\n\
         \x20         $primary{{ }} \\\n\
         \x20         method{{ raid }} \\\n\
         \x20       . \\\n\
         \x20       {home} {home} {home} raid \\\n\
         \x20         $primary{{ }} \\\n\
         \x20         method{{ raid }} \\\n\
         \x20       . \\\n\
         \x20       {var} {var} {var} raid \\\n\
         \x20         $primary{{ }} \\\n\
         \x20         method{{ raid }} \\\n\
         \x20       . \\\n\
         \x20       {swap} {swap} {swap} linux-swap \\\n\
         \x20         method{{ swap }} \\\n\
         \x20         format{{ }} \\\n\
         \x20       ."
    );

    let raid_recipe = format!(
        "      {raid_level} {disk_count} {spare_disks} ext4 /boot {} \\\n\
         \x20     . \\\n\
         \x20     {raid_level} {disk_count} {spare_disks} ext4 / {} \\\n\
         \x20     . \\\n\
         \x20     {raid_level} {disk_count} {spare_disks} ext4 /home {} \\\n\
         \x20     . \\\n\
         \x20     {raid_level} {disk_count} {spare_disks} ext4 /var {} \\\n\
         \x20     .",
        raid_paths(&disks, 2),
        raid_paths(&disks, 3),
        raid_paths(&disks, 4),
        raid_paths(&disks, 5),
    );

    lines.extend([
        format!("### Stage 3: disk partitioning (RAID-{raid_level})"),
        format!("d-i partman-auto/disk string {disk_string}"),
        "d-i partman-auto/method string raid".into(),
        "d-i partman-lvm/device_remove_lvm boolean true".into(),
        "d-i partman-md/device_remove_md boolean true".into(),
        "d-i partman-auto/expert_recipe string \\".into(),
        expert_recipe.trim_start().to_string(),
        String::new(),
        "d-i partman-auto-raid/recipe string \\".into(),
        raid_recipe.trim_start().to_string(),
        String::new(),
        "### Stage 4: partitioning confirmation".into(),
        "d-i partman-partitioning/confirm_write_new_label boolean true".into(),
        "d-i partman/choose_partition select finish".into(),
        "d-i partman/confirm boolean true".into(),
        "d-i partman/confirm_nooverwrite boolean true".into(),
        "d-i partman-md/confirm boolean true".into(),
        "d-i partman-md/confirm_nooverwrite boolean true".into(),
        String::new(),
        "### Stage 5: accounts".into(),
        format!("d-i passwd/root-password password {}", form.root_password),
        format!("d-i passwd/root-password-again password {}", form.root_password),
        format!("d-i passwd/user-fullname string {}", form.username),
        format!("d-i passwd/username string {}", form.username),
        format!("d-i passwd/user-password password {}", form.user_password),
        format!("d-i passwd/user-password-again password {}", form.user_password),
        "d-i user-setup/allow-password-weak boolean true".into(),
        String::new(),
        "### Stage 6: packages and services".into(),
        "tasksel tasksel/first multiselect standard, ssh-server".into(),
        "d-i pkgsel/include string openssh-server mc dosfstools iproute2 curl wget".into(),
        "d-i pkgsel/upgrade select none".into(),
        "d-i pkgsel/update-policy select none".into(),
        String::new(),
        "### Stage 7: clock".into(),
        "d-i clock-setup/utc boolean true".into(),
        format!("d-i time/zone string {}", form.timezone),
        String::new(),
        "### Stage 8: GRUB".into(),
        "d-i grub-installer/only_debian boolean true".into(),
        format!("d-i grub-installer/bootdev string {}", disks[0]),
        String::new(),
        "### Stage 9: firmware".into(),
        "d-i hw-detect/load_firmware boolean false".into(),
        String::new(),
        "### Stage 10: late_command (post-install)".into(),
        "d-i preseed/late_command string \\".into(),
    ]);

    if is_on(&form.register_disk) {
        lines.extend([
            "# host registration on the panel \\".into(),
            "MAC=$(cat /sys/class/net/$(ip route|awk '/default/{print $5}')/address); \\".into(),
            "IP=$(ip -4 -o addr show $(ip route|awk '/default/{print $5}') | awk '{split($4,a,\"/\"); print a[1]}'); \\".into(),
            format!("HOST={hostname}; \\"),
        ]);
        if is_on(&form.extended_registration) {
            lines.extend([
                "echo \"Disk info for $HOST ($IP):\" > /tmp/disk_info.$MAC; \\".into(),
                "parted -l >> /tmp/disk_info.$MAC; \\".into(),
                "lsblk >> /tmp/disk_info.$MAC; \\".into(),
                "df -h >> /tmp/disk_info.$MAC; \\".into(),
                format!(
                    "wget -q --post-data \"mac=$MAC&ip=$IP&hostname=$HOST&stage=disk_partitioned&details=$(cat /tmp/disk_info.$MAC | base64)\" \"{ipxe_url}\" || true; \\"
                ),
            ]);
        } else {
            lines.push(format!(
                "wget -q --post-data \"mac=$MAC&ip=$IP&hostname=$HOST&stage=disk_partitioned\" \"{ipxe_url}\" || true; \\"
            ));
        }
    }

    if is_on(&form.install_base_packages) {
        lines.extend([
            "# base packages and console font \\".into(),
            "in-target apt-get update ; \\".into(),
            "in-target apt-get install -y wget curl python3 python3-pip console-setup fonts-dejavu-core; \\".into(),
        ]);
    }

    if is_on(&form.enable_root_ssh) {
        lines.extend([
            "# allow root login over SSH \\".into(),
            "echo 'PermitRootLogin yes' > /target/etc/ssh/sshd_config.d/perms.conf; \\".into(),
        ]);
    }

    if is_on(&form.disable_sound) {
        lines.extend([
            "# disable onboard audio \\".into(),
            "echo 'blacklist snd_hda_intel' > /target/etc/modprobe.d/disable-hdaudio.conf; \\".into(),
            "in-target update-grub; \\".into(),
            "in-target update-initramfs -u; \\".into(),
        ]);
    }

    lines.extend([
        "# APT sources \\".into(),
        "echo '# main repository' > /target/etc/apt/sources.list; \\".into(),
    ]);
    if form.mirror_mode() == "default" {
        let host = &form.mirror_host;
        lines.extend([
            format!("echo 'deb {host}/repository/debian-bookworm-proxy bookworm main contrib non-free non-free-firmware' >> /target/etc/apt/sources.list; \\"),
            format!("echo 'deb {host}/repository/debian-bookworm-proxy bookworm-updates main contrib non-free non-free-firmware' >> /target/etc/apt/sources.list; \\"),
            format!("echo 'deb {host}/repository/debian-security-proxy bookworm-security main contrib non-free non-free-firmware' >> /target/etc/apt/sources.list; \\"),
            "in-target apt update; \\".into(),
        ]);
    } else {
        for url in form.mirrors() {
            lines.push(format!("echo \"{url}\" >> /target/etc/apt/sources.list; \\"));
        }
        lines.push("in-target apt update; \\".into());
    }

    if is_on(&form.show_ip) {
        lines.extend([
            "# show IP in bash.bashrc \\".into(),
            "echo '# your IP (physical interface):' >> /target/etc/bash.bashrc; \\".into(),
            "echo \"ip -4 -o addr show scope global | awk '{print \\$4}' | cut -d/ -f1 | head -n1\" >> /target/etc/bash.bashrc; \\".into(),
            "echo '' >> /target/etc/bash.bashrc; \\".into(),
        ]);
    }

    if is_on(&form.enable_ansible) {
        let script = form.ansible_script.as_deref().unwrap_or("");
        lines.extend([
            "# ansible bootstrap on first boot \\".into(),
            format!("wget -O /target/root/ansible-register.sh \"{script}\" ; \\"),
            "chmod +x /target/root/ansible-register.sh; \\".into(),
            "echo '#!/bin/bash' > /target/etc/rc.local; \\".into(),
            "echo 'sleep 30' >> /target/etc/rc.local; \\".into(),
            "echo '/root/ansible-register.sh &' >> /target/etc/rc.local; \\".into(),
            "echo 'exit 0' >> /target/etc/rc.local; \\".into(),
            "chmod +x /target/etc/rc.local; \\".into(),
            "in-target systemctl enable rc-local; \\".into(),
        ]);
    }

    if is_on(&form.fix_hostname) {
        lines.extend([
            "# pin hostname \\".into(),
            format!("echo {hostname} > /target/etc/hostname; \\"),
            format!("echo \"127.0.1.1 {hostname}.localdomain {hostname}\" >> /target/etc/hosts; \\"),
        ]);
    }

    if is_on(&form.disable_video) {
        lines.extend([
            "# disable video driver \\".into(),
            "echo 'GRUB_CMDLINE_LINUX_DEFAULT=\"quiet nomodeset i915.modeset=0\"' >> /target/etc/default/grub; \\".into(),
            "echo 'blacklist i915' > /target/etc/modprobe.d/disable-i915.conf; \\".into(),
            "echo 'blacklist intel_guc' >> /target/etc/modprobe.d/disable-i915.conf; \\".into(),
            "in-target update-grub; \\".into(),
            "in-target update-initramfs -u; \\".into(),
        ]);
    }

    if is_on(&form.enable_font) {
        let face = form.font_face.as_deref().unwrap_or("Terminus");
        let size = form.font_size.as_deref().unwrap_or("16x32");
        lines.extend([
            "# console font \\".into(),
            format!("echo 'FONTFACE=\"{face}\"' > /target/etc/default/console-setup; \\"),
            format!("echo 'FONTSIZE=\"{size}\"' >> /target/etc/default/console-setup; \\"),
            "echo 'FONT=' >> /target/etc/default/console-setup; \\".into(),
            "echo 'VIDEOMODE=' >> /target/etc/default/console-setup; \\".into(),
            "in-target setupcon; \\".into(),
        ]);
    }

    lines.extend([
        String::new(),
        "### finish".into(),
        "d-i finish-install/reboot_in_progress note".into(),
    ]);

    lines.join("\n")
}

// ==== 模板与历史（JSON 文件存储） ====

fn load_json_file(path: &std::path::Path) -> Value {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

fn load_templates(cfg: &Config) -> Vec<Value> {
    match load_json_file(&cfg.preseed_templates_file) {
        Value::Object(mut obj) => match obj.remove("templates") {
            Some(Value::Array(arr)) => arr,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn save_templates(cfg: &Config, templates: &[Value]) -> ApiResult<()> {
    let body = serde_json::to_string_pretty(&json!({ "templates": templates }))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    std::fs::write(&cfg.preseed_templates_file, body)?;
    Ok(())
}

fn load_history(cfg: &Config) -> Vec<Value> {
    match load_json_file(&cfg.preseed_history_file) {
        Value::Array(arr) => arr,
        _ => Vec::new(),
    }
}

// 前 500 个字符；生成文本里有主机名/镜像地址等任意输入，按字符截断
fn history_preview(preseed: &str) -> String {
    let mut chars = preseed.char_indices();
    match chars.nth(500) {
        Some((idx, _)) => format!("{}...", &preseed[..idx]),
        None => preseed.to_string(),
    }
}

fn save_to_history(cfg: &Config, form: &PreseedForm, preseed: &str) -> ApiResult<()> {
    let mut history = load_history(cfg);
    let preview = history_preview(preseed);
    history.push(json!({
        "timestamp": Local::now().to_rfc3339(),
        "params": serde_json::to_value(form).map_err(|e| ApiError::Internal(e.to_string()))?,
        "preseed_preview": preview,
    }));
    let start = history.len().saturating_sub(HISTORY_CAP);
    let body = serde_json::to_string_pretty(&history[start..])
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    std::fs::write(&cfg.preseed_history_file, body)?;
    Ok(())
}

// ==== HTTP handlers ====

pub async fn preseed_preview(form: web::Form<PreseedForm>) -> HttpResponse {
    if let Err(msg) = validate(&form) {
        return HttpResponse::BadRequest().body(msg);
    }
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(generate_preseed(&form))
}

pub async fn preseed_generate(
    form: web::Form<PreseedForm>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    if let Err(msg) = validate(&form) {
        return Ok(HttpResponse::BadRequest().body(msg));
    }
    let preseed = generate_preseed(&form);
    save_to_history(&cfg, &form, &preseed)?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!(
                "attachment; filename=\"debian12-preseed-{}.cfg\"",
                form.hostname
            ),
        ))
        .body(preseed))
}

pub async fn api_templates(cfg: web::Data<Config>) -> HttpResponse {
    let names: Vec<Value> = load_templates(&cfg)
        .iter()
        .map(|t| json!({ "name": t["name"] }))
        .collect();
    HttpResponse::Ok().json(names)
}

pub async fn api_template(name: web::Path<String>, cfg: web::Data<Config>) -> HttpResponse {
    for template in load_templates(&cfg) {
        if template["name"].as_str() == Some(name.as_str()) {
            return HttpResponse::Ok().json(&template["data"]);
        }
    }
    HttpResponse::NotFound().body("Template not found")
}

#[derive(Debug, Deserialize)]
pub struct SaveTemplateBody {
    pub name: String,
    pub data: Value,
}

pub async fn api_save_template(
    body: web::Json<SaveTemplateBody>,
    cfg: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    if body.name.is_empty() {
        return Ok(HttpResponse::BadRequest().body("Invalid template data"));
    }
    let mut templates = load_templates(&cfg);
    if templates
        .iter()
        .any(|t| t["name"].as_str() == Some(body.name.as_str()))
    {
        return Ok(HttpResponse::BadRequest().body("A template with this name already exists"));
    }
    templates.push(json!({ "name": body.name, "data": body.data }));
    save_templates(&cfg, &templates)?;
    Ok(HttpResponse::Ok().body("OK"))
}

pub async fn api_history(cfg: web::Data<Config>) -> HttpResponse {
    HttpResponse::Ok().json(load_history(&cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> PreseedForm {
        PreseedForm {
            raid_level: Some("1".into()),
            disk_count: "2".into(),
            efi_size: "512".into(),
            boot_size: "1G".into(),
            root_size: "20G".into(),
            home_size: "10G".into(),
            var_size: "5G".into(),
            swap_size: "2048M".into(),
            hostname: "node01".into(),
            root_password: "supersecret".into(),
            username: "operator".into(),
            user_password: "alsosecret".into(),
            mirror_host: "http://mirror.local".into(),
            timezone: "Europe/Moscow".into(),
            locale: "en_US.UTF-8".into(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_valid_form() {
        assert!(validate(&valid_form()).is_ok());
    }

    #[test]
    fn rejects_too_few_disks_for_raid1() {
        let mut form = valid_form();
        form.disk_count = "1".into();
        let err = validate(&form).unwrap_err();
        assert!(err.contains("at least 2 disks"));
    }

    #[test]
    fn hot_spare_raises_disk_minimum() {
        let mut form = valid_form();
        form.hot_spare = Some("on".into());
        form.disk_count = "2".into();
        assert!(validate(&form).unwrap_err().contains("at least 3 disks"));
        form.disk_count = "3".into();
        assert!(validate(&form).is_ok());
    }

    #[test]
    fn raid0_allows_single_disk() {
        let mut form = valid_form();
        form.raid_level = Some("0".into());
        form.disk_count = "1".into();
        assert!(validate(&form).is_ok());
    }

    #[test]
    fn rejects_malformed_partition_size() {
        let mut form = valid_form();
        form.root_size = "20GB".into();
        assert!(validate(&form).unwrap_err().contains("invalid size for root"));
        form.root_size = "abc".into();
        assert!(validate(&form).is_err());
    }

    #[test]
    fn rejects_small_efi_partition() {
        let mut form = valid_form();
        form.efi_size = "64".into();
        assert!(validate(&form).unwrap_err().contains("EFI"));
    }

    #[test]
    fn rejects_short_root_password() {
        let mut form = valid_form();
        form.root_password = "short".into();
        assert!(validate(&form).unwrap_err().contains("root password"));
    }

    #[test]
    fn custom_mirrors_require_a_url() {
        let mut form = valid_form();
        form.mirror_mode = Some("custom".into());
        assert!(validate(&form).unwrap_err().contains("mirror"));
        form.mirror_url_1 = Some("deb http://m.local bookworm main".into());
        assert!(validate(&form).is_ok());
    }

    #[test]
    fn static_net_requires_all_fields() {
        let mut form = valid_form();
        form.net_mode = Some("static".into());
        form.net_ip = Some("10.0.0.10".into());
        form.net_netmask = Some("255.255.255.0".into());
        form.net_gateway = Some("10.0.0.1".into());
        assert!(validate(&form).unwrap_err().contains("net_dns"));
    }

    #[test]
    fn ipxe_registration_requires_stage() {
        let mut form = valid_form();
        form.enable_ipxe = Some("on".into());
        form.ipxe_url = Some("http://panel.local/api/register".into());
        assert!(validate(&form).unwrap_err().contains("registration stage"));
        form.register_dhcp = Some("on".into());
        assert!(validate(&form).is_ok());
    }

    #[test]
    fn generated_preseed_lists_disks_and_raid() {
        let output = generate_preseed(&valid_form());
        assert!(output.contains("d-i partman-auto/disk string /dev/sda /dev/sdb"));
        assert!(output.contains("1 2 0 ext4 /boot /dev/sda2#/dev/sdb2"));
        assert!(output.contains("d-i passwd/root-password password supersecret"));
        assert!(output.contains("d-i grub-installer/bootdev string /dev/sda"));
    }

    #[test]
    fn history_preview_truncates_on_char_boundary() {
        let mut text = "a".repeat(499);
        text.push_str("ппппппп");
        let preview = history_preview(&text);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 503);

        let short = "b".repeat(500);
        assert_eq!(history_preview(&short), short);
    }

    #[test]
    fn size_conversion() {
        assert_eq!(convert_size_mib("512"), 512);
        assert_eq!(convert_size_mib("1G"), 1024);
        assert_eq!(convert_size_mib("2048M"), 2048);
        assert_eq!(convert_size_mib("2048K"), 2);
    }

    #[test]
    fn late_command_fragments_follow_toggles() {
        let mut form = valid_form();
        form.enable_root_ssh = Some("on".into());
        form.fix_hostname = Some("on".into());
        let output = generate_preseed(&form);
        assert!(output.contains("PermitRootLogin yes"));
        assert!(output.contains("127.0.1.1 node01.localdomain node01"));
        let plain = generate_preseed(&valid_form());
        assert!(!plain.contains("PermitRootLogin"));
    }
}
