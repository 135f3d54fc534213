// ==========================================
// 受助人登记系统 - 命令行入口
// ==========================================
// 用法:
//   relief-registry [--db PATH] import <FILE> [field,field,...]
//   relief-registry [--db PATH] export [--ltr] [--search TEXT] [--status pending|verified] [field,...]
//   relief-registry [--db PATH] status <JOB_ID>
//   relief-registry [--db PATH] cleanup [retention_days]
//
// 环境变量:
// - RELIEF_REGISTRY_DB: 数据库路径（默认位于平台数据目录）
// - RELIEF_REGISTRY_LANG: 消息语言 ar | en（默认 ar）
// - RELIEF_REGISTRY_LOG_JSON: 非空时输出 JSON 日志
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use relief_registry::api::{
    ApiError, ExportParams, ExportResponse, ImportResponse, JobStatusResponse, TransferApi,
};
use relief_registry::config::{default_storage_root, ConfigManager};
use relief_registry::db::open_shared;
use relief_registry::domain::JobStatus;
use relief_registry::{i18n, logging};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

const DB_FILE_NAME: &str = "registry.db";

/// 后台任务轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

enum Command {
    Import {
        file: PathBuf,
        fields: Vec<String>,
    },
    Export(ExportParams),
    Status {
        job_id: String,
    },
    Cleanup {
        retention_days: Option<i64>,
    },
}

fn main() -> Result<()> {
    logging::init(logging::LogFormat::from_env());
    if let Ok(lang) = std::env::var("RELIEF_REGISTRY_LANG") {
        i18n::set_locale(lang.trim());
    }

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let db_path = take_option(&mut args, "--db")
        .or_else(|| std::env::var("RELIEF_REGISTRY_DB").ok())
        .unwrap_or_else(|| default_storage_root().join(DB_FILE_NAME).to_string_lossy().into_owned());
    let command = parse_command(args)?;

    if let Some(parent) = PathBuf::from(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建数据目录: {}", parent.display()))?;
        }
    }

    tracing::info!("{} v{}", relief_registry::APP_NAME, relief_registry::VERSION);
    tracing::info!("使用数据库: {}", db_path);

    let conn = open_shared(&db_path).with_context(|| format!("无法打开数据库: {}", db_path))?;
    let config_manager =
        ConfigManager::from_connection(conn.clone()).map_err(|e| anyhow!("配置初始化失败: {}", e))?;
    let api = TransferApi::from_reader(conn, &config_manager).map_err(api_failure)?;

    let runtime = tokio::runtime::Runtime::new().context("无法启动异步运行时")?;
    runtime.block_on(run(&api, command))
}

async fn run(api: &TransferApi, command: Command) -> Result<()> {
    match command {
        Command::Import { file, fields } => {
            let response = api.import_file(&file, fields).await.map_err(api_failure)?;
            print_json(&response)?;
            if let ImportResponse::Queued { job_id, .. } = response {
                print_json(&wait_for_job(api, &job_id).await?)?;
            }
        }
        Command::Export(params) => {
            let response = api.export_records(params).await.map_err(api_failure)?;
            print_json(&response)?;
            if let ExportResponse::Queued { job_id, .. } = response {
                print_json(&wait_for_job(api, &job_id).await?)?;
            }
        }
        Command::Status { job_id } => {
            print_json(&api.job_status(&job_id).map_err(api_failure)?)?;
        }
        Command::Cleanup { retention_days } => {
            print_json(&api.cleanup(retention_days).map_err(api_failure)?)?;
        }
    }
    Ok(())
}

/// 等待后台任务进入终态（进程退出会中断后台任务）
async fn wait_for_job(api: &TransferApi, job_id: &str) -> Result<JobStatusResponse> {
    let mut last_logged = -1i64;
    loop {
        let status = api.job_status(job_id).map_err(api_failure)?;
        if matches!(status.status, JobStatus::Completed | JobStatus::Failed) {
            return Ok(status);
        }
        if status.processed_rows != last_logged {
            last_logged = status.processed_rows;
            tracing::info!(
                job_id,
                processed = status.processed_rows,
                total = status.total_rows,
                percent = status.progress_percentage,
                eta_secs = ?status.estimated_time_remaining_seconds,
                "任务进行中"
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn parse_command(mut args: Vec<String>) -> Result<Command> {
    if args.is_empty() {
        bail!("缺少子命令 (import | export | status | cleanup)");
    }
    let name = args.remove(0);

    match name.as_str() {
        "import" => {
            if args.is_empty() {
                bail!("import 需要文件路径");
            }
            let file = PathBuf::from(args.remove(0));
            Ok(Command::Import {
                file,
                fields: split_fields(args.first().map(String::as_str)),
            })
        }
        "export" => {
            let ltr = take_flag(&mut args, "--ltr");
            let search = take_option(&mut args, "--search");
            let status = take_option(&mut args, "--status");
            Ok(Command::Export(ExportParams {
                selected_fields: split_fields(args.first().map(String::as_str)),
                direction: Some(if ltr { "ltr" } else { "rtl" }.to_string()),
                search,
                status,
            }))
        }
        "status" => {
            let job_id = args.into_iter().next().ok_or_else(|| anyhow!("status 需要任务 ID"))?;
            Ok(Command::Status { job_id })
        }
        "cleanup" => {
            let retention_days = match args.first() {
                Some(raw) => Some(
                    raw.parse::<i64>()
                        .with_context(|| format!("保留天数格式错误: {}", raw))?,
                ),
                None => None,
            };
            Ok(Command::Cleanup { retention_days })
        }
        other => bail!("未知子命令: {}", other),
    }
}

/// 取出 `--name VALUE` 形式的参数
fn take_option(args: &mut Vec<String>, name: &str) -> Option<String> {
    let idx = args.iter().position(|a| a == name)?;
    if idx + 1 >= args.len() {
        args.remove(idx);
        return None;
    }
    let value = args.remove(idx + 1);
    args.remove(idx);
    Some(value)
}

fn take_flag(args: &mut Vec<String>, name: &str) -> bool {
    match args.iter().position(|a| a == name) {
        Some(idx) => {
            args.remove(idx);
            true
        }
        None => false,
    }
}

fn split_fields(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn api_failure(err: ApiError) -> anyhow::Error {
    match serde_json::to_string_pretty(&err.payload()) {
        Ok(body) => anyhow!("{}", body),
        Err(_) => anyhow!("{}", err),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
