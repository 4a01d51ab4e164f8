use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use fixtured::cli::DaemonOpts;
use fixtured::dispatch::Dispatcher;
use fixtured::events::ConsoleSink;
use fixtured::ingest_log::IngestLog;
use fixtured::logger::{Logger, NoopLogger, TextLogger};
use fixtured::server::TcpIngestServer;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let config = opts.into_config()?;
    let (host, port) = config.host_port()?;

    println!("Starting fixtured:");
    println!("  Bind: {}", config.bind);
    println!("  Landing dir: {}", config.landing_dir.display());
    if let Some(log_file) = &config.log_file {
        println!("  Log file: {}", log_file.display());
    }

    if host == "0.0.0.0" {
        eprintln!("WARNING: binding to 0.0.0.0 accepts fixtures from all interfaces");
        eprintln!("  The wire protocol is unauthenticated; use on trusted networks only");
    }

    let logger: Arc<dyn Logger> = match &config.log_file {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("open log file {}", path.display()))?,
        ),
        None => Arc::new(NoopLogger),
    };
    let dispatcher = Dispatcher::new(config.landing_dir.clone(), logger);
    let mut server = TcpIngestServer::new(dispatcher, Arc::new(ConsoleSink))
        .max_pending(config.max_pending_bytes);
    if config.ingest_log {
        server = server.ingest_log(IngestLog::new(&config.landing_dir));
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(async move {
        server.start(&host, port).await?;
        tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
        eprintln!("shutting down");
        server.stop().await;
        Ok(())
    })
}
