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

// 可达性轮询：每分钟串行 ping 所有已知 IP，结果写入 host_status
use chrono::Utc;
use tokio::time::Duration;

use crate::command_execute::ping_host;
use crate::database_init::{DbPool, known_ips, update_host_online_status};

const PING_INTERVAL_SECS: u64 = 60;
// 串行 ping 之间的小间隔，避免一次打满
const PING_GAP_MS: u64 = 100;

// 补齐到完整周期；elapsed 为负（时钟回拨）按 0 算
pub fn remaining_secs(elapsed: i64, interval: u64) -> u64 {
    interval.saturating_sub(elapsed.max(0) as u64)
}

pub async fn ping_hosts_background(pool: DbPool) {
    loop {
        let start_time = Utc::now();
        tracing::info!("starting background ping sweep");
        if let Err(e) = ping_sweep(&pool).await {
            tracing::error!(error = %e, "ping sweep failed");
        }
        // 与上次开始时间补齐到完整周期
        let elapsed = Utc::now().signed_duration_since(start_time).num_seconds();
        let remaining = remaining_secs(elapsed, PING_INTERVAL_SECS);
        if remaining > 0 {
            tokio::time::sleep(Duration::from_secs(remaining)).await;
        }
    }
}

async fn ping_sweep(pool: &DbPool) -> Result<(), crate::error::ApiError> {
    let ips = {
        let conn = pool.get()?;
        known_ips(&conn)?
    };
    let total = ips.len();
    for ip in ips {
        let is_online = ping_host(&ip).await;
        let conn = pool.get()?;
        update_host_online_status(&conn, &ip, is_online)?;
        tokio::time::sleep(Duration::from_millis(PING_GAP_MS)).await;
    }
    tracing::info!(total, "background ping sweep finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_sleep_never_underflows() {
        assert_eq!(remaining_secs(10, 60), 50);
        assert_eq!(remaining_secs(90, 60), 0);
        // 时钟回拨导致的负 elapsed
        assert_eq!(remaining_secs(-5, 60), 60);
    }
}
