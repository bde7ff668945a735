//! rdv-auth 二进制入口：扫码登录与 OAuth 会合服务。

mod api;
mod app;
mod auth;
mod cli;
mod clock;
mod config;
mod logging;
mod notify;
mod oauth;
mod qr_login;
mod rendezvous;
mod state;
mod users;
mod ws;

#[tokio::main]
/// 启动服务。
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    match cli::dispatch(&args)? {
        cli::CliDispatch::Run => {}
        cli::CliDispatch::Exit => return Ok(()),
    }

    let _log_runtime = logging::init("rdv-auth")?;
    app::run(config::Config::from_env()).await
}
