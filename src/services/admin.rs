//! Admin 审计视图
//!
//! postback 审计流与当前权益列表，只读。鉴权由 middleware::auth 统一处理。

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storages::AttributionStore;

/// Admin API 统一响应包装
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub data: T,
}

pub struct AdminService;

impl AdminService {
    /// GET /api/admin/postbacks — 转化事件审计流
    pub async fn list_postbacks(
        query: web::Query<HashMap<String, String>>,
        store: web::Data<Arc<dyn AttributionStore>>,
    ) -> impl Responder {
        let mut records = store.list_conversions().await;

        // ?partner=1win 过滤
        if let Some(partner) = query.get("partner") {
            records.retain(|r| r.event.partner.as_str() == partner);
        }
        records.sort_by(|a, b| b.event.received_at.cmp(&a.event.received_at));

        info!("Admin API: listed {} conversion records", records.len());
        HttpResponse::Ok().json(ApiResponse {
            code: 0,
            data: records,
        })
    }

    /// GET /api/admin/premiums — 当前权益授予列表
    pub async fn list_premiums(
        store: web::Data<Arc<dyn AttributionStore>>,
    ) -> impl Responder {
        let mut grants = store.list_grants().await;
        grants.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));

        info!("Admin API: listed {} grants", grants.len());
        HttpResponse::Ok().json(ApiResponse {
            code: 0,
            data: grants,
        })
    }
}
