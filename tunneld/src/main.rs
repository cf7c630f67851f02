use std::sync::Arc;

use camino::Utf8PathBuf;
use tunnel_log::{LogDeleterTask, StaticLogConfig};

use tunneld::claims::UnsignedTokenParser;
use tunneld::config::ConfHandle;
use tunneld::logger::Logger;
use tunneld::{api, AppState};

struct TunneldLogConfig;

impl StaticLogConfig for TunneldLogConfig {
    const MAX_BYTES_PER_LOG_FILE: u64 = 10 * 1024 * 1024;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "tunneld";
}

fn log_path() -> Utf8PathBuf {
    std::env::var("TUNNELD_LOG_DIR")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::from("."))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let conf = ConfHandle::init()?;
    let logger = Logger::new();

    let _guard = tunnel_log::init::<TunneldLogConfig, Arc<Logger>>(
        &log_path(),
        "info",
        std::env::var("TUNNELD_LOG").ok().as_deref(),
        Some(Arc::clone(&logger)),
    )?;

    let (shutdown_handle, shutdown_signal) = tunnel_task::ShutdownHandle::new();
    let (deleter_shutdown_handle, deleter_shutdown_signal) = tunnel_task::ShutdownHandle::new();
    let log_deleter = tunnel_task::spawn_task(LogDeleterTask::<TunneldLogConfig>::new(log_path()), deleter_shutdown_signal);

    let state = AppState {
        conf: conf.clone(),
        logger,
        token_parser: Arc::new(UnsignedTokenParser),
        shutdown: shutdown_signal,
    };

    let conf = conf.get_conf();
    let listener = tokio::net::TcpListener::bind(conf.bind_addr).await?;
    tracing::info!(addr = %conf.bind_addr, "listening");

    let app = api::router(state);

    let serve = axum::serve(listener, app);
    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    shutdown_handle.signal();
    shutdown_handle.all_closed().await;

    deleter_shutdown_handle.signal();
    let _ = log_deleter.join().await;

    Ok(())
}
