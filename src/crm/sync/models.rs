//! 离线变更队列模型定义

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 项目（安装工程）状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Quoted,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

/// 可删除的记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Lead,
    Client,
    Project,
}

/// 新线索
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeadDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// 需求类型，例如 bathroom / kitchen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// 新客户（账户）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// 新项目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDraft {
    pub client_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
}

/// 变更类型（存储时 `type` 列为标签，`data` 列为载荷 JSON）
///
/// 未知标签或无法解析的载荷落入 `Opaque`，原样保留、原样重放。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case", deny_unknown_fields)]
pub enum Mutation {
    CreateLead(LeadDraft),
    UpdateLead {
        id: String,
        changes: Map<String, Value>,
    },
    CreateClient(ClientDraft),
    UpdateClient {
        id: String,
        changes: Map<String, Value>,
    },
    CreateProject(ProjectDraft),
    UpdateProjectStatus {
        project_id: String,
        status: ProjectStatus,
    },
    DeleteRecord {
        entity: EntityKind,
        id: String,
    },
    #[serde(skip)]
    Opaque { kind: String, data: String },
}

/// 已知的变更标签
pub const KNOWN_KINDS: &[&str] = &[
    "create_lead",
    "update_lead",
    "create_client",
    "update_client",
    "create_project",
    "update_project_status",
    "delete_record",
];

impl Mutation {
    /// 变更标签（对应 `pending_changes.type`）
    pub fn kind(&self) -> &str {
        match self {
            Self::CreateLead(_) => "create_lead",
            Self::UpdateLead { .. } => "update_lead",
            Self::CreateClient(_) => "create_client",
            Self::UpdateClient { .. } => "update_client",
            Self::CreateProject(_) => "create_project",
            Self::UpdateProjectStatus { .. } => "update_project_status",
            Self::DeleteRecord { .. } => "delete_record",
            Self::Opaque { kind, .. } => kind,
        }
    }

    /// 拆分为 (标签, 载荷 JSON 文本)
    pub fn to_parts(&self) -> serde_json::Result<(String, String)> {
        if let Self::Opaque { kind, data } = self {
            return Ok((kind.clone(), data.clone()));
        }
        let mut tagged = serde_json::to_value(self)?;
        let data = tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.kind().to_string(), serde_json::to_string(&data)?))
    }

    /// 由存储列还原；未知标签、损坏载荷或无法无损还原的载荷保留为 `Opaque`
    pub fn from_parts(kind: &str, data: &str) -> Self {
        if KNOWN_KINDS.contains(&kind) {
            if let Some(mutation) = Self::parse_known(kind, data) {
                return mutation;
            }
        }
        Self::Opaque {
            kind: kind.to_string(),
            data: data.to_string(),
        }
    }

    /// 解析已知标签；重新序列化后与原载荷不一致（例如 null 字段）时返回 None
    fn parse_known(kind: &str, data: &str) -> Option<Self> {
        let payload: Value = serde_json::from_str(data).ok()?;
        let mutation: Self =
            serde_json::from_value(serde_json::json!({ "type": kind, "data": payload.clone() }))
                .ok()?;
        let (_, reparsed) = mutation.to_parts().ok()?;
        let lossless = serde_json::from_str::<Value>(&reparsed).ok()? == payload;
        lossless.then_some(mutation)
    }

    /// 上传时使用的 `data` 字段：能解析为 JSON 则按 JSON 发送，否则按字符串发送
    pub fn wire_data(&self) -> serde_json::Result<Value> {
        let (_, data) = self.to_parts()?;
        Ok(serde_json::from_str(&data).unwrap_or(Value::String(data)))
    }
}

/// 待同步的本地变更
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// 单调递增 ID（即入队顺序）
    pub id: i64,
    pub mutation: Mutation,
    /// 入队时间（毫秒）
    pub enqueued_at: i64,
}

/// `POST /sync` 请求体
#[derive(Debug, Serialize)]
pub struct SyncPayload {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: i64,
}

impl SyncPayload {
    pub fn from_change(change: &PendingChange) -> serde_json::Result<Self> {
        Ok(Self {
            id: change.id,
            kind: change.mutation.kind().to_string(),
            data: change.mutation.wire_data()?,
            timestamp: change.enqueued_at,
        })
    }
}

/// 队列状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Draining,
}

/// 失败处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// 遇到第一个失败立即停止，保证严格顺序
    #[default]
    StopOnFirstFailure,
    /// 失败项留在队列中，继续处理后续变更（仅适用于变更互相独立的部署）
    ContinueOnFailure,
}

/// 队列配置
#[derive(Debug, Clone, Default)]
pub struct OfflineQueueConfig {
    pub drain_policy: DrainPolicy,
}

/// drain 被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyDraining,
}

/// 单个变更的应用失败
#[derive(Debug, Clone, PartialEq)]
pub struct DrainFailure {
    pub id: i64,
    pub message: String,
    /// 远端返回 401/403
    pub unauthorized: bool,
}

/// 一次 drain 的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub skipped: Option<SkipReason>,
    /// 成功应用并删除的变更 ID（按处理顺序）
    pub applied: Vec<i64>,
    pub failures: Vec<DrainFailure>,
    /// drain 结束时队列剩余数量
    pub remaining: i64,
}

impl DrainReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// 是否因 token 失效而中止
    pub fn hit_unauthorized(&self) -> bool {
        self.failures.iter().any(|f| f.unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_mutation_survives_storage_columns() {
        let m = Mutation::UpdateProjectStatus {
            project_id: "p-9".into(),
            status: ProjectStatus::InProgress,
        };
        let (kind, data) = m.to_parts().unwrap();
        assert_eq!(kind, "update_project_status");
        assert_eq!(data, r#"{"project_id":"p-9","status":"in_progress"}"#);
        assert_eq!(Mutation::from_parts(&kind, &data), m);
    }

    #[test]
    fn every_known_kind_is_listed() {
        let samples = vec![
            Mutation::CreateLead(LeadDraft {
                name: "Jo".into(),
                email: None,
                phone: Some("555".into()),
                service: Some("bathroom".into()),
                source: None,
                notes: None,
            }),
            Mutation::UpdateLead {
                id: "1".into(),
                changes: Map::new(),
            },
            Mutation::CreateClient(ClientDraft {
                name: "Acme".into(),
                email: None,
                phone: None,
                address: None,
            }),
            Mutation::UpdateClient {
                id: "1".into(),
                changes: Map::new(),
            },
            Mutation::CreateProject(ProjectDraft {
                client_id: "c".into(),
                title: "Kitchen refit".into(),
                room: Some("kitchen".into()),
                budget_cents: Some(1_250_000),
                start_date: None,
            }),
            Mutation::UpdateProjectStatus {
                project_id: "p".into(),
                status: ProjectStatus::Completed,
            },
            Mutation::DeleteRecord {
                entity: EntityKind::Lead,
                id: "1".into(),
            },
        ];
        let kinds: Vec<&str> = samples.iter().map(Mutation::kind).collect();
        assert_eq!(kinds, KNOWN_KINDS);
    }

    #[test]
    fn unknown_kind_and_bad_payload_become_opaque() {
        let unknown = Mutation::from_parts("archive_invoice", r#"{"id":3}"#);
        assert_eq!(
            unknown,
            Mutation::Opaque {
                kind: "archive_invoice".into(),
                data: r#"{"id":3}"#.into()
            }
        );
        assert_eq!(unknown.wire_data().unwrap(), serde_json::json!({"id": 3}));

        let broken = Mutation::from_parts("create_lead", "not json");
        assert_eq!(broken.kind(), "create_lead");
        assert_eq!(
            broken.wire_data().unwrap(),
            Value::String("not json".into())
        );
    }

    #[test]
    fn extra_fields_keep_the_full_payload() {
        let data = r#"{"name":"Kim","budget":5000}"#;
        let lead = Mutation::from_parts("create_lead", data);
        assert!(matches!(lead, Mutation::Opaque { .. }));
        let (kind, stored) = lead.to_parts().unwrap();
        assert_eq!(kind, "create_lead");
        assert_eq!(stored, data);
        assert_eq!(
            lead.wire_data().unwrap(),
            serde_json::json!({"name": "Kim", "budget": 5000})
        );

        let status = Mutation::from_parts(
            "update_project_status",
            r#"{"project_id":"p-1","status":"completed","note":"tiles done"}"#,
        );
        assert!(matches!(status, Mutation::Opaque { .. }));

        // null 可选字段重新序列化后会被省略，同样保留原文
        let nulls = Mutation::from_parts("create_client", r#"{"name":"Acme","email":null}"#);
        assert_eq!(
            nulls.to_parts().unwrap().1,
            r#"{"name":"Acme","email":null}"#
        );
    }

    #[test]
    fn exact_known_payload_stays_typed() {
        let m = Mutation::from_parts("create_lead", r#"{"name":"Kim","phone":"555"}"#);
        assert!(matches!(m, Mutation::CreateLead(ref d) if d.phone.as_deref() == Some("555")));
    }

    #[test]
    fn sync_payload_uses_type_field() {
        let change = PendingChange {
            id: 5,
            mutation: Mutation::DeleteRecord {
                entity: EntityKind::Client,
                id: "c-1".into(),
            },
            enqueued_at: 1_700_000_000_000,
        };
        let body = serde_json::to_value(SyncPayload::from_change(&change).unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "id": 5,
                "type": "delete_record",
                "data": {"entity": "client", "id": "c-1"},
                "timestamp": 1_700_000_000_000i64
            })
        );
    }
}
