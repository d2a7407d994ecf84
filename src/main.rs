use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use judge_orchestrator::aggregator::Aggregator;
use judge_orchestrator::config::CliArgs;
use judge_orchestrator::correlation::TokenTable;
use judge_orchestrator::database as db;
use judge_orchestrator::judge::Judge;
use judge_orchestrator::manager::SubmissionManager;
use judge_orchestrator::queue::JudgeQueue;
use judge_orchestrator::sandbox::Judge0Client;
use judge_orchestrator::store::SubmissionStore;
use judge_orchestrator::testcases::FsTestCaseStore;
use judge_orchestrator::web_server::build_server;
use judge_orchestrator::worker::{token_sweeper, worker};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let db_path = db::get_db_path();
    let cli = CliArgs::parse();
    let n_threads = cli.threads;

    anyhow::ensure!(n_threads != 0, "The number of worker threads must not be 0");

    let config = cli
        .to_config()
        .with_context(|| format!("Failed to load configuration from {}", cli.config_path))?;

    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .context("Failed to initialize database")?;

    let sandbox = Judge0Client::build(&config.sandbox).context("Failed to build sandbox client")?;
    log::info!(
        "Using sandbox at {} with {:?} delivery",
        config.sandbox.url,
        config.sandbox.delivery
    );

    let server_config = config.server.clone();
    let sweep_interval = config.sandbox.sweep_interval();
    let test_cases = Arc::new(FsTestCaseStore::new(&config.storage.root));
    let config = Arc::new(config);

    let store = Arc::new(SubmissionStore::new(db_pool));
    let tokens = Arc::new(TokenTable::new());
    let aggregator = Arc::new(Aggregator::new(store.clone(), tokens));
    let judge = Arc::new(Judge::new(
        store.clone(),
        aggregator.clone(),
        Arc::new(sandbox),
        test_cases,
        config,
    ));
    let queue = Arc::new(JudgeQueue::new());
    let manager = Arc::new(SubmissionManager::new(store, queue.clone()));
    let shutdown_token = CancellationToken::new();

    match manager.recover().await {
        Ok(0) => {}
        Ok(n) => log::info!("Recovered {n} unfinished submissions"),
        Err(e) => log::error!("Failed to recover unfinished submissions: {e}"),
    }

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_threads {
        workers.spawn(worker(
            i,
            judge.clone(),
            queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let sweeper = tokio::spawn(token_sweeper(
        judge,
        sweep_interval,
        shutdown_token.clone(),
    ));

    let server =
        build_server(server_config, manager, aggregator).context("Failed to build server")?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Stop accepting submissions and webhooks
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers and the sweeper
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        match res {
            Ok(Err(e)) => log::error!("Worker finished with error: {e:?}"),
            Err(e) if e.is_panic() => log::error!("Worker handle panicked: {:?}", e),
            Err(e) => log::error!("Worker handle finished with error: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    if let Err(e) = sweeper.await {
        log::error!("Token sweeper finished with error: {:?}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}
