mod args;
mod collector;
mod generator;
mod killer;

use clap::Parser;
use sandkube_audit::AuditSink;
use sandkube_common::Conf;
use sandkube_driver::Driver;
use sandkube_queue::Queue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let args = args::Args::parse();
    let conf = Conf::new(&args.config).expect("failed to load config");
    sandkube_common::trace::setup("sandkube-controller", &conf.log_level);

    let queue = Queue::connect(&conf.queue_backend_url)
        .await
        .expect("failed to connect to the work queue");
    let driver = Driver::connect(conf.kubeconfig.as_deref(), conf.namespace.clone())
        .await
        .expect("failed to connect to the outer cluster");
    let audit = Arc::new(
        AuditSink::new(conf.audit.log_directory.clone(), queue.clone())
            .expect("failed to initialize the audit sink"),
    );

    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(generator::run(
        queue.clone(),
        driver.clone(),
        conf.clone(),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(collector::run(queue.clone(), cancel.clone())));
    tasks.push(tokio::spawn(killer::run(
        queue.clone(),
        driver.clone(),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn({
        let audit = audit.clone();
        let cancel = cancel.clone();
        async move { audit.drain_task(cancel).await }
    }));
    tasks.push(sandkube_audit::maintenance_task(audit.clone(), cancel.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping controller loops");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
}

/// Resolves once SIGINT or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
