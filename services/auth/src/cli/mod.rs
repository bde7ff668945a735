//! rdv-auth CLI 分发：`run`、`doctor`、`keygen`、`version`。

use anyhow::anyhow;
use rand::{RngCore, rngs::OsRng};
use serde_json::json;

use crate::config::Config;

/// 生成密钥的字节数（64 个十六进制字符）。
const KEYGEN_BYTES: usize = 32;

/// CLI 分发结果。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CliDispatch {
    /// 继续启动服务。
    Run,
    /// 命令已处理完成，主程序应退出。
    Exit,
}

/// 解析并执行 CLI。
pub(crate) fn dispatch(args: &[String]) -> anyhow::Result<CliDispatch> {
    let cmd = args.first().map(|arg| arg.trim()).unwrap_or_default();
    if cmd.is_empty() || cmd == "run" {
        return Ok(CliDispatch::Run);
    }

    match cmd {
        "-h" | "--help" | "help" => {
            print_root_help();
            Ok(CliDispatch::Exit)
        }
        "doctor" => {
            let format = parse_doctor_format(&args[1..])?;
            if !run_doctor(format, &Config::from_env()) {
                std::process::exit(1);
            }
            Ok(CliDispatch::Exit)
        }
        "keygen" => {
            println!("{}", generate_secret());
            Ok(CliDispatch::Exit)
        }
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(CliDispatch::Exit)
        }
        other => Err(anyhow!(
            "unknown command: {other}; run `rdv-auth --help` for usage"
        )),
    }
}

/// `doctor` 输出格式。
#[derive(Debug, PartialEq, Eq)]
enum DoctorFormat {
    Text,
    Json,
}

/// 解析 doctor 的 `--format` 参数。
fn parse_doctor_format(args: &[String]) -> anyhow::Result<DoctorFormat> {
    match args {
        [] => Ok(DoctorFormat::Text),
        [flag, value] if flag == "--format" => match value.as_str() {
            "text" => Ok(DoctorFormat::Text),
            "json" => Ok(DoctorFormat::Json),
            other => Err(anyhow!("unsupported doctor format: {other}")),
        },
        _ => Err(anyhow!("usage: rdv-auth doctor [--format text|json]")),
    }
}

/// 打印脱敏配置与校验结果；返回配置是否可用于启动。
fn run_doctor(format: DoctorFormat, config: &Config) -> bool {
    let report = config.validate();
    let ok = report.is_ok();
    let redacted = config.redacted();
    match format {
        DoctorFormat::Text => {
            if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(&redacted) {
                for (key, value) in fields {
                    println!("{key}: {value}");
                }
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            for error in &report.errors {
                println!("error: {error}");
            }
        }
        DoctorFormat::Json => {
            let payload = json!({
                "config": redacted,
                "warnings": report.warnings,
                "errors": report.errors,
                "ok": ok,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string())
            );
        }
    }
    ok
}

/// 随机密钥，适用于 `QR_ENCRYPTION_KEY` / `SESSION_SECRET`。
fn generate_secret() -> String {
    let mut raw = [0u8; KEYGEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// 打印 root help。
fn print_root_help() {
    println!("rdv-auth usage:");
    println!("  rdv-auth run");
    println!("  rdv-auth doctor [--format text|json]");
    println!("  rdv-auth keygen");
    println!("  rdv-auth version");
}
