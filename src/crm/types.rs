//! 通用 HTTP 结构体与辅助函数

use serde::{Deserialize, Deserializer};
use tracing::{debug, error};

/// 服务端错误响应（NestJS 风格：`{statusCode, message, error}`）
///
/// `message` 可能是字符串，也可能是校验失败时的字符串数组
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// 提取可展示的错误信息
    pub fn display_message(&self) -> Option<String> {
        match &self.message {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Some(other) => Some(other.to_string()),
            None => self.error.clone(),
        }
    }
}

/// 已读取完 body 的 HTTP 响应
#[derive(Debug)]
pub struct HttpReply {
    pub status: reqwest::StatusCode,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 从错误响应中提取 message 字段，解析失败时退回原始 body
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.display_message())
            .unwrap_or_else(|| {
                let raw = String::from_utf8_lossy(&self.body).trim().to_string();
                if raw.is_empty() {
                    self.status.to_string()
                } else {
                    raw
                }
            })
    }
}

/// 通用 HTTP 响应读取：body 只能读取一次，这里统一读出并打印日志
pub async fn read_http_response(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<HttpReply, reqwest::Error> {
    let status = response.status();
    let body = response.bytes().await?.to_vec();

    if status.is_success() {
        debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);
    } else {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name,
            status,
            String::from_utf8_lossy(&body)
        );
    }
    Ok(HttpReply { status, body })
}

/// 反序列化 ID 字段：服务端可能返回数字或字符串，统一转为字符串
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// 生成请求追踪用的 operationID
pub fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
