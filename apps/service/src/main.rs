mod config;
mod filter;
mod monitoring;
mod notifiers;
mod parser;
mod protocols;
mod queue;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use config::Config;
use filter::ResultFilter;
use monitoring::{LocalScheduler, ResultSink, TestExecutor};
use protocols::Registry;
use queue::{Bridge, Dispatcher, MemoryQueue, Queue, RemoteQueue, Worker};

#[derive(Parser)]
#[command(name = "vigil", about = "Remote service monitoring from plain-text test definitions", version, propagate_version = true)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/vigil/config.toml)
    #[arg(long, short = 'c', global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Show more output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Tag attached to every parsed test
    #[arg(long, global = true)]
    tag: Option<String>,

    /// Queue broker address (host:port)
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct RunnerArgs {
    /// Skip tests against IPv4 addresses
    #[arg(long)]
    no_ipv4: bool,

    /// Skip tests against IPv6 addresses
    #[arg(long)]
    no_ipv6: bool,

    /// Report the first failure instead of retrying
    #[arg(long)]
    no_retry: bool,

    /// Deadline of a single attempt, in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute the tests in the given files locally
    Local {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Repeat every N seconds until interrupted
        #[arg(long)]
        interval: Option<u64>,

        /// Push results to the result queue instead of the notifier
        #[arg(long)]
        publish: bool,

        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// Parse the given files and push their tests onto the job queue
    Dispatch {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Execute jobs from the job queue and publish the results
    Worker {
        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// Forward published results matching a filter to the notifier
    Bridge {
        /// Filter query, e.g. 'isDedup=false,tag=!staging'
        #[arg(long)]
        filter: Option<String>,
    },

    /// Run the queue broker
    Broker,

    /// List the available test types and their arguments
    Protocols,
}

impl RunnerArgs {
    fn apply(&self, config: &mut Config) {
        config.runner.ipv4 &= !self.no_ipv4;
        config.runner.ipv6 &= !self.no_ipv6;
        config.runner.retry &= !self.no_retry;
        if let Some(timeout) = self.timeout {
            config.runner.timeout_seconds = timeout;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref())?;
    config.runner.verbose |= cli.verbose;
    if let Some(tag) = &cli.tag {
        config.runner.tag = tag.clone();
    }
    if let Some(address) = &cli.queue {
        config.queue.address = address.clone();
    }
    if let Command::Local { runner, .. } | Command::Worker { runner } = &cli.command {
        runner.apply(&mut config);
    }

    logger::init(config.runner.verbose);
    debug!("{}", config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, shutting down");
                cancel.cancel();
            }
        });
    }

    let registry = Arc::new(Registry::builtin());

    match cli.command {
        Command::Local { files, interval, publish, .. } => {
            let sink = if publish {
                let queue: Arc<dyn Queue> = Arc::new(RemoteQueue::new(config.queue.address.clone()));
                ResultSink::Publish { queue, name: config.queue.result_queue.clone() }
            } else {
                ResultSink::Notify(notifiers::from_config(&config.notifier).await?)
            };

            let executor = Arc::new(TestExecutor::new(registry));
            let scheduler =
                LocalScheduler::new(executor, config.runner.options(), sink).with_tag(config.runner.tag.clone());
            let every = interval.filter(|secs| *secs > 0).map(Duration::from_secs);

            let summary = scheduler.run(&files, every, cancel).await;
            info!(passed = summary.passed, failed = summary.failed, "Local run finished");
        }

        Command::Dispatch { files } => {
            let queue = Arc::new(RemoteQueue::new(config.queue.address.clone()));
            let dispatcher =
                Dispatcher::new(queue, config.queue.job_queue.clone(), registry).with_tag(config.runner.tag.clone());

            let mut total = 0;
            for file in &files {
                match dispatcher.dispatch_file(file).await {
                    Ok(pushed) => total += pushed,
                    Err(e) => error!(file = %file.display(), "Error parsing file: {}", e),
                }
            }
            info!(jobs = total, "Dispatch finished");
        }

        Command::Worker { .. } => {
            let queue = Arc::new(RemoteQueue::new(config.queue.address.clone()));
            let executor = Arc::new(TestExecutor::new(registry));
            let mut worker = Worker::new(
                queue,
                executor,
                config.runner.options(),
                config.queue.job_queue.clone(),
                config.queue.result_queue.clone(),
            );
            worker.run(cancel).await;
        }

        Command::Bridge { filter } => {
            let query = filter.unwrap_or_else(|| config.bridge.filter.clone());
            let filter = ResultFilter::compile(&query).with_context(|| format!("invalid filter '{}'", query))?;
            if filter.is_empty() {
                info!("No filter configured, forwarding every result");
            }
            let notifier = notifiers::from_config(&config.notifier).await?;
            let queue = Arc::new(RemoteQueue::new(config.queue.address.clone()));

            Bridge::new(queue, config.queue.result_queue.clone(), filter, notifier).run(cancel).await;
        }

        Command::Broker => {
            let address = format!("{}:{}", config.queue.bind, config.queue.port);
            let listener =
                TcpListener::bind(&address).await.with_context(|| format!("failed to bind broker to {}", address))?;
            queue::broker::serve(listener, Arc::new(MemoryQueue::new()), cancel).await?;
        }

        Command::Protocols => {
            for key in registry.keys() {
                let Some(probe) = registry.get(key) else { continue };
                println!("{key}");
                for (name, pattern) in probe.arguments() {
                    println!("  with {name} {pattern}");
                }
                println!("\n{}\n", probe.example());
            }
        }
    }

    Ok(())
}
