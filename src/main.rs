use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;
use proxy_core::watcher::{ConfigWatcher, WatchEvent};
use proxy_core::Lifecycle;
use simple_logger::SimpleLogger;
use tokio::sync::broadcast;

mod listener;
mod watcher;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
    /// Verbose level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Disable colors from output.
    #[arg(long)]
    no_color: bool,
}

fn main() {
    let args = Args::parse();
    let log_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_colors(!args.no_color)
        .init()
        .unwrap();

    if let Err(err) = run(args) {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run(args: Args) -> anyhow::Result<()> {
    let (lifecycle, config) = Lifecycle::startup(args.config.clone())
        .await
        .map_err(|err| {
            log::error!("could not load configuration file ({}): {:?}", args.config.display(), err);
            err
        })?;
    let lifecycle = Arc::new(lifecycle);
    let ports = config.ports.clone();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut listener_tasks = Vec::with_capacity(ports.len());
    for &port in &ports {
        let state = lifecycle.state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        listener_tasks.push(tokio::spawn(async move {
            if let Err(err) = listener::serve(port, state, shutdown_rx).await {
                log::error!("listener on port {} exited with error: {:?}", port, err);
            }
        }));
    }

    let watcher_handle = tokio::spawn({
        let lifecycle = lifecycle.clone();
        let config_path = args.config.clone();
        async move { run_watcher(lifecycle, config_path).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown requested...");
        }
    }

    // spec.md §4.6 "Shutdown": stop health checkers, stop listeners
    // (draining in-flight requests with a bounded grace period), await
    // acknowledgement from all.
    lifecycle.shutdown().await;
    let _ = shutdown_tx.send(());
    for task in listener_tasks {
        let _ = task.await;
    }
    watcher_handle.abort();

    Ok(())
}

async fn run_watcher(lifecycle: Arc<Lifecycle>, config_path: PathBuf) {
    let mut watcher = match watcher::FileConfigWatcher::new(&config_path) {
        Ok(watcher) => watcher,
        Err(err) => {
            log::error!("could not start config watcher: {:?}", err);
            return;
        }
    };
    loop {
        match watcher.next_event().await {
            Some(WatchEvent::Changed) => {
                lifecycle.reload().await;
            }
            Some(WatchEvent::Removed) => {
                log::warn!(
                    "config file removed; reload capability lost, proxy keeps serving"
                );
                break;
            }
            None => {
                log::error!("config watcher channel closed");
                break;
            }
        }
    }
}
