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

// 系统级操作：清库
use actix_web::{HttpResponse, web};
use serde_json::json;

use crate::database_init::{DbPool, clear_db};
use crate::error::ApiResult;

// POST /api/clear-db：丢弃全部主机与任务数据
pub async fn api_clear_db(pool: web::Data<DbPool>) -> ApiResult<HttpResponse> {
    let conn = pool.get()?;
    clear_db(&conn)?;
    tracing::warn!("database cleared by operator request");
    Ok(HttpResponse::Ok().json(json!({ "status": "ok", "msg": "database cleared" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_init::{register_host, test_pool};
    use actix_web::web::Data;

    #[tokio::test]
    async fn clear_db_empties_hosts() {
        let pool = test_pool();
        {
            let conn = pool.get().unwrap();
            register_host(&conn, "aa:bb:cc:dd:ee:ff", "10.0.0.9", "dhcp", "").unwrap();
        }
        let res = api_clear_db(Data::new(pool.clone())).await.unwrap();
        assert_eq!(res.status(), 200);
        let count: i64 = pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM hosts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
