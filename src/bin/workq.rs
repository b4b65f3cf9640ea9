//! workq CLI: run the background loops and inspect queues.

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

use workq::clock::{Clock, SystemClock};
use workq::config::{Config, Settings};
use workq::db::Db;
use workq::engine::{LeaseMonitor, MonitorConfig, WorkerRegistry};
use workq::model::{EnqueueResult, NewWorkItem, Status, WorkId, WorkItem};
use workq::store::{ListFilter, WorkStore};
use workq::telemetry::{TelemetryConfig, init_telemetry};
use workq::WorkQueue;

#[derive(Parser)]
#[command(name = "workq", about = "Durable work queues with lease-based claiming")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the lease monitor and worker sweeper until Ctrl-C
    Serve,
    /// Enqueue a JSON payload
    Enqueue {
        /// Target queue
        queue: String,
        /// JSON payload
        #[arg(long)]
        payload: String,
        /// Priority (higher = sooner)
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Attempt limit (defaults to the queue's setting)
        #[arg(long)]
        max_attempts: Option<u32>,
        /// At most one live item per key
        #[arg(long)]
        dedupe_key: Option<String>,
    },
    /// List work items, newest first
    List {
        #[arg(long)]
        queue: Option<String>,
        /// new | running | succeeded | failed | deadletter
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one work item
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// Item counts per status
    Stats { queue: String },
    /// Give a deadlettered item more attempts
    Requeue {
        id: String,
        #[arg(long, default_value_t = 1)]
        extra_attempts: u32,
    },
    /// Delete finished items older than the cutoff
    Purge {
        queue: String,
        #[arg(long)]
        older_than_hours: u64,
    },
    /// List registered workers
    Workers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let settings = config.settings()?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let store: Arc<dyn WorkStore> = Arc::new(db);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Serve => cmd_serve(&config, &settings, store, clock).await,
        Command::Enqueue {
            queue,
            payload,
            priority,
            max_attempts,
            dedupe_key,
        } => {
            let q: WorkQueue<serde_json::Value> =
                WorkQueue::from_settings(&settings.queue(&queue), store, clock);
            let mut new = NewWorkItem::new(&queue, serde_json::from_str(&payload)?).priority(priority);
            if let Some(n) = max_attempts {
                new = new.max_attempts(n);
            }
            if let Some(key) = dedupe_key {
                new = new.dedupe_key(key);
            }
            match q.enqueue_raw(new).await? {
                EnqueueResult::Created(id) => println!("Created: {id}"),
                EnqueueResult::Duplicate(id) => println!("Duplicate of live item {id}"),
            }
            Ok(())
        }
        Command::List {
            queue,
            status,
            limit,
        } => {
            let status: Option<Status> = match status {
                Some(s) => Some(s.parse()?),
                None => None,
            };
            let items = store
                .list(&ListFilter {
                    queue_name: queue,
                    status,
                    limit,
                })
                .await?;
            print_items(&items);
            Ok(())
        }
        Command::Show { id } => {
            let id = resolve_id(store.as_ref(), &id).await?;
            print_item(&store.get(id).await?)
        }
        Command::Stats { queue } => {
            let stats = store.stats(&queue).await?;
            println!("Queue:       {}", stats.queue_name);
            println!("New:         {}", stats.new);
            println!("Running:     {}", stats.running);
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Deadletter:  {}", stats.deadletter);
            println!("Total:       {}", stats.total());
            Ok(())
        }
        Command::Requeue { id, extra_attempts } => {
            let id = resolve_id(store.as_ref(), &id).await?;
            let item = store.requeue(id, extra_attempts, clock.now()).await?;
            println!(
                "Requeued: {} (attempts {}/{})",
                item.id, item.attempt_count, item.max_attempts
            );
            Ok(())
        }
        Command::Purge {
            queue,
            older_than_hours,
        } => {
            let q: WorkQueue<serde_json::Value> =
                WorkQueue::from_settings(&settings.queue(&queue), store, clock);
            let removed = q
                .purge(Duration::from_secs(older_than_hours.saturating_mul(3600)))
                .await?;
            println!("Purged {removed} item(s) from {queue}");
            Ok(())
        }
        Command::Workers => {
            let registry = WorkerRegistry::new(store, clock, settings.registry.grace());
            let workers = registry.list().await?;
            if workers.is_empty() {
                println!("No workers registered.");
                return Ok(());
            }
            println!(
                "{:<24}  {:<16}  {:<7}  {:<8}  {:<9}  {:<8}  LAST HEARTBEAT",
                "WORKER", "HOST", "PID", "STATUS", "PROCESSED", "FAILED"
            );
            println!("{}", "-".repeat(100));
            for w in &workers {
                let status = if registry.is_dead(w) {
                    "dead".to_string()
                } else {
                    w.status.to_string()
                };
                println!(
                    "{:<24}  {:<16}  {:<7}  {:<8}  {:<9}  {:<8}  {}",
                    w.worker_id,
                    w.hostname,
                    w.pid,
                    status,
                    w.stats.items_processed,
                    w.stats.items_failed,
                    w.last_heartbeat_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
    }
}

async fn cmd_serve(
    config: &Config,
    settings: &Settings,
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config("workq", config))?;

    let monitor = Arc::new(LeaseMonitor::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        MonitorConfig::from(&settings.monitor),
    ));
    let registry = Arc::new(WorkerRegistry::new(
        store,
        clock,
        settings.registry.grace(),
    ));

    let (m, r) = (Arc::clone(&monitor), Arc::clone(&registry));
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        m.shutdown();
        r.shutdown();
    });

    let interval = settings.monitor.interval();
    tokio::try_join!(monitor.run(), registry.run(interval))?;
    Ok(())
}

/// Accept a full UUID or a unique prefix of one.
async fn resolve_id(store: &dyn WorkStore, id_str: &str) -> anyhow::Result<WorkId> {
    if let Ok(id) = id_str.parse::<WorkId>() {
        return Ok(id);
    }
    let items = store
        .list(&ListFilter {
            limit: 1000,
            ..ListFilter::default()
        })
        .await?;
    let matches: Vec<&WorkItem> = items
        .iter()
        .filter(|item| item.id.to_string().starts_with(id_str))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no work item matching prefix '{id_str}'"),
        1 => Ok(matches[0].id),
        n => anyhow::bail!("{n} work items match prefix '{id_str}', be more specific"),
    }
}

fn print_items(items: &[WorkItem]) {
    if items.is_empty() {
        println!("No work items found.");
        return;
    }

    println!(
        "{:<8}  {:<12}  {:<10}  {:<4}  {:<8}  {:<30}  CREATED",
        "ID", "QUEUE", "STATUS", "PRI", "ATTEMPTS", "DEDUPE_KEY"
    );
    println!("{}", "-".repeat(100));

    for item in items {
        let dedupe: String = item
            .dedupe_key
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(30)
            .collect();
        println!(
            "{:<8}  {:<12}  {:<10}  {:<4}  {:<8}  {:<30}  {}",
            item.id.short(),
            item.queue_name,
            item.status,
            item.priority,
            format!("{}/{}", item.attempt_count, item.max_attempts),
            dedupe,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len());
}

fn print_item(item: &WorkItem) -> anyhow::Result<()> {
    println!("ID:          {}", item.id);
    println!("Queue:       {}", item.queue_name);
    println!("Status:      {}", item.status);
    println!("Priority:    {}", item.priority);
    println!("Attempts:    {}/{}", item.attempt_count, item.max_attempts);
    println!("Dedupe Key:  {}", item.dedupe_key.as_deref().unwrap_or("-"));
    println!("Available:   {}", item.available_at);
    println!("Payload:     {}", serde_json::to_string_pretty(&item.payload)?);
    if let Some(ref worker) = item.claimed_by {
        println!("Claimed By:  {worker}");
    }
    if let Some(expires) = item.lease_expires_at {
        println!("Lease Until: {expires}");
    }
    if let Some(ref err) = item.last_error {
        println!("Last Error:  {err}");
    }
    println!("Created:     {}", item.created_at);
    println!("Updated:     {}", item.updated_at);
    if let Some(done) = item.completed_at {
        println!("Completed:   {done}");
    }
    Ok(())
}
