//! 外部 CRM 客户端
//!
//! `ExternalCrmClient` trait 抽象外部系统的幂等写入能力；具体协议
//! 由实现决定。`HttpCrmClient` 是缺省的 HTTP/JSON 实现：create 返回
//! 的 external_id 形如 "res.partner/42"，天然携带资源路径，update
//! 直接以它为端点，调用方无需感知实体类型。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use sticker_shared::config::CrmConfig;

use crate::error::{Result, SyncError};

/// 连接状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub message: Option<String>,
}

/// 外部 CRM 客户端接口
///
/// worker 将其视为可失败的远端依赖：所有错误按可重试性分类，
/// 不假设任何具体协议。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalCrmClient: Send + Sync {
    /// 创建外部记录，返回 external_id（后续 update 的寻址依据）
    async fn create(&self, entity_type: &str, payload: &serde_json::Value) -> Result<String>;

    /// 幂等更新已存在的外部记录
    async fn update(&self, external_id: &str, payload: &serde_json::Value) -> Result<()>;

    /// 连通性检查（会话开启与健康巡检用）
    async fn test_connection(&self) -> Result<ConnectionStatus>;
}

// ---------------------------------------------------------------------------
// HttpCrmClient — HTTP/JSON 实现
// ---------------------------------------------------------------------------

/// create 响应体
#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: serde_json::Value,
}

/// HTTP/JSON CRM 客户端
///
/// 每个请求携带配置的超时；超时是可重试失败，计入同步记录的
/// retry_count。每租户一个实例（见 CrmSessionPool），请求头携带
/// 租户标识，底层连接在同租户的一轮同步内复用。
pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCrmClient {
    /// 构建租户会话客户端
    pub fn new(config: &CrmConfig, tenant_id: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !config.api_key.is_empty() {
            let value = format!("Bearer {}", config.api_key);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                value
                    .parse()
                    .map_err(|_| SyncError::ClientBuild("API key 含非法字符".to_string()))?,
            );
        }
        headers.insert(
            "X-Tenant-Id",
            tenant_id
                .parse()
                .map_err(|_| SyncError::ClientBuild("租户 ID 含非法字符".to_string()))?,
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn map_request_error(e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::ExternalServiceTimeout
        } else {
            SyncError::ExternalService {
                message: e.to_string(),
            }
        }
    }

    fn check_status(response: &reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::ExternalService {
                message: format!("HTTP {status}"),
            })
        }
    }
}

#[async_trait]
impl ExternalCrmClient for HttpCrmClient {
    async fn create(&self, entity_type: &str, payload: &serde_json::Value) -> Result<String> {
        let url = format!("{}/{}", self.base_url, entity_type);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(Self::map_request_error)?;
        Self::check_status(&response)?;

        let body: CreateResponse = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;

        // id 可能是数字或字符串，统一转为字符串拼接资源路径
        let id = match &body.id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(SyncError::InvalidResponse(format!(
                    "id 字段类型异常: {other}"
                )));
            }
        };

        Ok(format!("{entity_type}/{id}"))
    }

    async fn update(&self, external_id: &str, payload: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{}", self.base_url, external_id);
        let response = self
            .http
            .put(&url)
            .json(payload)
            .send()
            .await
            .map_err(Self::map_request_error)?;
        Self::check_status(&response)
    }

    async fn test_connection(&self) -> Result<ConnectionStatus> {
        let url = format!("{}/status", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(ConnectionStatus {
                ok: true,
                message: None,
            }),
            Ok(response) => Ok(ConnectionStatus {
                ok: false,
                message: Some(format!("HTTP {}", response.status())),
            }),
            Err(e) => Err(Self::map_request_error(e)),
        }
    }
}
