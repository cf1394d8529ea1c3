use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chatline_gateway::{HttpGatewayTransport, InMemoryTransport, Transport};
use chatline_pipeline::{
    BatchReport, DispatchError, EchoGenerator, Pipeline, PipelineConfig, RecordDisposition,
    Repositories,
};
use chatline_types::{ChatEvent, NewMessage, SystemClock};
use colored::Colorize;
use tracing::info;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let worker = Worker::open(config)?;
    match cli.command {
        Command::Process(args) => cmd_process(&worker, args).await,
        Command::Connect(args) => cmd_connect(&worker, args).await,
        Command::Disconnect(args) => cmd_disconnect(&worker, args).await,
        Command::Join(args) => cmd_join(&worker, args).await,
        Command::Send(args) => cmd_send(&worker, args).await,
        Command::History(args) => cmd_history(&worker, args).await,
        Command::Purge => cmd_purge(&worker).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Tables and transport, built once per process.
struct Worker {
    pipeline: Pipeline,
    repos: Repositories,
    /// Set when no gateway endpoint is configured; pushes are only recorded.
    dry_run: Option<Arc<InMemoryTransport>>,
}

impl Worker {
    fn open(config: PipelineConfig) -> anyhow::Result<Self> {
        let repos = Repositories::open_logs(&config).context("opening tables")?;

        let mut dry_run = None;
        let transport: Arc<dyn Transport> = match &config.gateway_endpoint {
            Some(endpoint) => Arc::new(
                HttpGatewayTransport::new(endpoint).context("building gateway client")?,
            ),
            None => {
                info!("no gateway_endpoint configured; pushes are recorded, not sent");
                let memory = Arc::new(InMemoryTransport::new());
                dry_run = Some(Arc::clone(&memory));
                memory
            }
        };

        let pipeline = Pipeline::build(
            &config,
            &repos,
            transport,
            Arc::new(EchoGenerator),
            Arc::new(SystemClock),
        );
        Ok(Self {
            pipeline,
            repos,
            dry_run,
        })
    }
}

async fn cmd_process(worker: &Worker, args: ProcessArgs) -> anyhow::Result<()> {
    let input = std::fs::read(&args.batch)
        .with_context(|| format!("reading batch {}", args.batch.display()))?;

    match worker.pipeline.dispatcher.dispatch_bytes(&input).await {
        Ok(report) => {
            print_report(&report);
            println!("{} {} record(s) processed", "✓".green().bold(), report.len());
        }
        Err(DispatchError::StageFailed {
            record,
            stage,
            reason,
            report,
        }) => {
            print_report(&report);
            println!(
                "{} record {} failed in {}: {}",
                "✗".red().bold(),
                record,
                stage.yellow(),
                reason
            );
            anyhow::bail!("batch must be redelivered");
        }
        Err(e) => return Err(e).context("dispatching batch"),
    }

    if let Some(memory) = &worker.dry_run {
        println!(
            "  {} {} push(es) recorded",
            "dry run:".dimmed(),
            memory.push_count()
        );
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    for record in &report.records {
        let id = record.event_id.as_deref().unwrap_or("-");
        match &record.disposition {
            RecordDisposition::Skipped { reason } => {
                println!("  #{:<3} {} {}", record.index, "skipped".dimmed(), reason.dimmed());
            }
            RecordDisposition::Staged => {
                let stages: Vec<String> = record
                    .stages
                    .iter()
                    .map(|s| {
                        let outcome = s.outcome.to_string();
                        let outcome = if s.outcome.is_failed() {
                            outcome.red()
                        } else {
                            outcome.green()
                        };
                        format!("{}: {}", s.stage, outcome)
                    })
                    .collect();
                println!("  #{:<3} {}  {}", record.index, id.yellow(), stages.join(", "));
            }
        }
    }
}

async fn cmd_connect(worker: &Worker, args: ConnectArgs) -> anyhow::Result<()> {
    let connection = worker
        .pipeline
        .registry
        .add(&args.connection_id, args.channel.as_deref())
        .await?;
    match &connection.channel_id {
        Some(channel) => println!(
            "{} Connected {} to {}",
            "✓".green().bold(),
            connection.connection_id.bold(),
            channel.yellow()
        ),
        None => println!("{} Connected {}", "✓".green().bold(), connection.connection_id.bold()),
    }
    Ok(())
}

async fn cmd_disconnect(worker: &Worker, args: DisconnectArgs) -> anyhow::Result<()> {
    worker.pipeline.registry.remove(&args.connection_id).await?;
    println!("Disconnected {}", args.connection_id.bold());
    Ok(())
}

async fn cmd_join(worker: &Worker, args: JoinArgs) -> anyhow::Result<()> {
    worker
        .pipeline
        .registry
        .join(&args.connection_id, &args.channel)
        .await
        .with_context(|| format!("joining {} to {}", args.connection_id, args.channel))?;
    println!("{} joined {}", args.connection_id.bold(), args.channel.yellow());
    Ok(())
}

async fn cmd_send(worker: &Worker, args: SendArgs) -> anyhow::Result<()> {
    let id = args.id.unwrap_or_else(ChatEvent::generate_id);
    let event = worker
        .pipeline
        .messages
        .send(&args.channel, NewMessage::user(id, args.sender, args.content))
        .await?;
    println!(
        "{} Stored {} in {} at ts {}",
        "✓".green().bold(),
        event.id.yellow(),
        event.channel_id.bold(),
        event.ts
    );
    Ok(())
}

async fn cmd_history(worker: &Worker, args: HistoryArgs) -> anyhow::Result<()> {
    let events = worker.pipeline.messages.list(&args.channel).await?;
    if events.is_empty() {
        println!("No messages in {}.", args.channel.bold());
    }
    for event in events {
        println!(
            "{} {} ({}): {}",
            event.created_at_iso.dimmed(),
            event.sender_id.cyan(),
            event.role,
            event.content
        );
    }
    Ok(())
}

async fn cmd_purge(worker: &Worker) -> anyhow::Result<()> {
    let purged = worker
        .pipeline
        .dispatcher
        .purge_expired()
        .await
        .context("purging expired idempotency records")?;
    worker.repos.compact().context("compacting tables")?;
    println!(
        "{} Purged {} expired record(s); tables compacted",
        "✓".green().bold(),
        purged
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_pipeline::StreamRecord;
    use chatline_types::Role;

    fn worker(dir: &Path) -> Worker {
        Worker::open(PipelineConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_then_process_delivers_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());

        cmd_connect(
            &worker,
            ConnectArgs {
                connection_id: "a".into(),
                channel: Some("c1".into()),
            },
        )
        .await
        .unwrap();
        cmd_send(
            &worker,
            SendArgs {
                channel: "c1".into(),
                content: "hello".into(),
                sender: "u1".into(),
                id: Some("m1".into()),
            },
        )
        .await
        .unwrap();

        let records: Vec<serde_json::Value> = worker
            .pipeline
            .messages
            .list("c1")
            .await
            .unwrap()
            .iter()
            .map(|e| StreamRecord::insert(e).unwrap().to_json())
            .collect();
        let batch = dir.path().join("batch.json");
        std::fs::write(&batch, serde_json::json!({ "Records": records }).to_string()).unwrap();

        cmd_process(&worker, ProcessArgs { batch }).await.unwrap();

        let memory = worker.dry_run.as_ref().unwrap();
        assert_eq!(memory.received("a").len(), 1);
        let history = worker.pipeline.messages.list("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn purge_empties_expired_idempotency_logs() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Worker::open(PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            idempotency_window_secs: 1,
            ..Default::default()
        })
        .unwrap();

        let event = ChatEvent::new("s1", "c1", 100, "system", Role::System, "notice");
        let record = StreamRecord::insert(&event).unwrap().to_json();
        let batch = dir.path().join("batch.json");
        std::fs::write(&batch, serde_json::json!([record]).to_string()).unwrap();
        cmd_process(&worker, ProcessArgs { batch }).await.unwrap();

        let log = dir.path().join("chat_delivery_idempotency.log");
        assert!(std::fs::metadata(&log).unwrap().len() > 0);

        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        cmd_purge(&worker).await.unwrap();
        assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn join_unknown_connection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let result = cmd_join(
            &worker,
            JoinArgs {
                connection_id: "ghost".into(),
                channel: "c1".into(),
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreadable_batch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());

        let missing = cmd_process(
            &worker,
            ProcessArgs {
                batch: dir.path().join("absent.json"),
            },
        )
        .await;
        assert!(missing.is_err());

        let batch = dir.path().join("bad.json");
        std::fs::write(&batch, "{\"items\": 1}").unwrap();
        assert!(cmd_process(&worker, ProcessArgs { batch }).await.is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("nope.toml").as_path())).is_err());
        assert_eq!(load_config(None).unwrap(), PipelineConfig::default());
    }
}
