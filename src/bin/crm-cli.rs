//! CRM CLI 客户端
//!
//! 非交互式 CLI，用于登录、查看会话以及管理离线变更队列

use anyhow::Result;
use clap::{Parser, Subcommand};
use crm_client_core::crm::auth::SessionListener;
use crm_client_core::crm::sync::SyncListener;
use crm_client_core::{
    ClientConfig, ConnectivityObserver, CrmClient, DrainPolicy, Mutation, User,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// CRM CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "crm-cli")]
#[command(about = "CRM CLI 客户端 - 会话与离线同步队列管理", long_about = None)]
struct Args {
    /// API 基础地址
    #[arg(long, default_value = "http://localhost:3001")]
    api_base_url: String,

    /// 本地 SQLite 数据库 URL
    #[arg(long, default_value = "sqlite://crm_client.db?mode=rwc")]
    db_url: String,

    /// 以离线模式运行（写操作只入队，不同步）
    #[arg(long)]
    offline: bool,

    /// 同步失败后继续处理后续变更（默认遇到失败即停止）
    #[arg(long)]
    continue_on_failure: bool,

    /// HTTP 请求超时（秒）
    #[arg(long, default_value = "15")]
    timeout: u64,

    /// 日志级别（默认: info,crm_client_core=debug）
    #[arg(long, default_value = "info,crm_client_core=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 登录
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// 注册并登录
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        role: Option<String>,
    },
    /// 登出
    Logout,
    /// 显示当前用户
    Whoami,
    /// 提交一个写操作（离线时入队）
    Enqueue {
        /// 变更类型，例如 create_lead、update_project_status
        #[arg(short = 't', long = "type")]
        kind: String,
        /// 变更载荷（JSON）
        #[arg(short, long)]
        data: String,
    },
    /// 列出待同步变更
    Pending,
    /// 立即重放离线队列
    Drain,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .map_err(|e| anyhow::anyhow!("无法创建日志文件 debug.log: {}", e))?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

struct CliSessionListener;

#[async_trait::async_trait]
impl SessionListener for CliSessionListener {
    async fn on_session_changed(&self, user: Option<User>) {
        match user {
            Some(u) => info!("[CLI/Session] 👤 当前用户: {} <{}> ({})", u.name, u.email, u.role),
            None => info!("[CLI/Session] 👤 当前无登录用户"),
        }
    }

    async fn on_session_expired(&self) {
        warn!("[CLI/Session] ⚠️ 登录已过期，请重新登录");
    }
}

struct CliSyncListener;

#[async_trait::async_trait]
impl SyncListener for CliSyncListener {
    async fn on_change_enqueued(&self, id: i64, kind: String) {
        info!("[CLI/Sync] 📥 入队: id={}, type={}", id, kind);
    }

    async fn on_drain_start(&self) {
        info!("[CLI/Sync] 🔄 开始同步");
    }

    async fn on_change_applied(&self, id: i64) {
        info!("[CLI/Sync] ✅ 已同步: id={}", id);
    }

    async fn on_drain_failed(&self, id: i64, message: String) {
        error!("[CLI/Sync] ❌ 同步失败: id={}, {}", id, message);
    }

    async fn on_drain_finish(&self, applied: usize, remaining: i64) {
        info!("[CLI/Sync] 📊 同步完成: 成功 {}，剩余 {}", applied, remaining);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    let mut config = ClientConfig::new(args.api_base_url.clone());
    config.db_url = args.db_url.clone();
    config.request_timeout = std::time::Duration::from_secs(args.timeout);
    if args.continue_on_failure {
        config.drain_policy = DrainPolicy::ContinueOnFailure;
    }

    let (_observer, signal) = ConnectivityObserver::new(!args.offline);
    let client = CrmClient::with_listeners(
        config,
        signal,
        Arc::new(CliSessionListener),
        Arc::new(CliSyncListener),
    )
    .await?;

    match args.command {
        Command::Login { email, password } => {
            let session = client.session().login(&email, &password).await?;
            info!("[CLI] ✅ 登录成功！用户ID: {}", session.user.id);
        }
        Command::Register {
            email,
            password,
            name,
            role,
        } => {
            let session = client
                .session()
                .register(&email, &password, &name, role.as_deref())
                .await?;
            info!("[CLI] ✅ 注册成功！用户ID: {}", session.user.id);
        }
        Command::Logout => {
            client.session().logout().await?;
        }
        Command::Whoami => match client.session().current_user() {
            Some(u) => info!("[CLI] 👤 {} <{}> id={} role={}", u.name, u.email, u.id, u.role),
            None => info!("[CLI] 未登录"),
        },
        Command::Enqueue { kind, data } => {
            let outcome = client.submit(Mutation::from_parts(&kind, &data)).await?;
            info!("[CLI] 📮 提交结果: {:?}", outcome);
        }
        Command::Pending => {
            let pending = client.queue().pending().await?;
            info!("[CLI] 📋 待同步变更（共 {} 条）:", pending.len());
            for change in pending {
                info!(
                    "[CLI]   - id={} | type={} | 入队时间={}",
                    change.id,
                    change.mutation.kind(),
                    change.enqueued_at
                );
            }
        }
        Command::Drain => {
            let report = client.drain().await?;
            if let Some(reason) = report.skipped {
                warn!("[CLI] drain 被跳过: {:?}", reason);
            }
        }
    }

    Ok(())
}
