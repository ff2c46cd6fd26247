use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_stream::StreamExt;

use task_queue::{ConfigError, QueueConfig, Task, TaskQueue};

/// Number of worker tasks submitted per batch.
const BATCH_SIZE: usize = 9;

/// Simulated work per task when `TASK_QUEUE_DEMO_WORK_MS` is unset.
const DEFAULT_WORK_MS: u64 = 2000;

/// Queue settings from the environment plus the simulated work per task.
fn demo_config() -> task_queue::Result<(QueueConfig, Duration)> {
    let config = QueueConfig {
        name: "CustomOperationQueue".to_string(),
        ..QueueConfig::from_env()?
    };

    let key = "TASK_QUEUE_DEMO_WORK_MS";
    let work_ms = match std::env::var(key) {
        Ok(raw) => raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        })?,
        Err(_) => DEFAULT_WORK_MS,
    };

    Ok((config, Duration::from_millis(work_ms)))
}

/// Submit the worker batch followed by the barrier that reports the end.
fn submit_batch(queue: &TaskQueue, work: Duration) -> task_queue::Result<Task> {
    for i in 1..=BATCH_SIZE {
        let task = Task::builder(move |done| {
            std::thread::sleep(work);
            if done.is_cancelled() {
                done.complete();
                return;
            }
            let result = rand::thread_rng().gen_range(0..=9);
            println!("{i} {result}");
            done.complete();
        })
        .name(format!("heavy-task-{i}"))
        .build();
        queue.add_task(task, &[])?;
    }

    Ok(queue.add_barrier(|| println!("Completed"))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let (config, work) = demo_config()?;

    eprintln!("task-queue v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Queue: {}", config.name);
    eprintln!(
        "   Limits: {} running, {} executing",
        config.max_concurrency, config.gate_capacity
    );
    eprintln!("   Work per task: {:?}", work);
    eprintln!("   Ctrl-C cancels the batch.\n");

    let queue = Arc::new(TaskQueue::new(config));

    // Print every transition the way a UI binding would observe them.
    let mut events = Box::pin(queue.events());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            tracing::debug!(task_id = %event.task_id, from = %event.from, to = %event.to, "Transition");
        }
    });

    submit_batch(&queue, work)?;

    let mut run = queue.spawn_run();
    tokio::select! {
        result = &mut run => result??,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nCancelling...");
            queue.cancel_all();
            run.await??;
        }
    }

    let summary = queue.summary();
    eprintln!(
        "\n   Finished {} of {} tasks ({} cancelled)",
        summary.finished, summary.total, summary.cancelled
    );

    Ok(())
}
