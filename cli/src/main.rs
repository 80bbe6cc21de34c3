use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use env_logger::{Builder, Target};
use kafka_admin::{EnsureOutcome, TopicAdmin};
use kafka_config::KafkaConfig;
use kafka_consumer::{KafkaConsumer, StartingOffset};
use kafka_wire::{ClientOptions, KafkaClient};
use risk_events::{ConsoleSink, Pipeline};
use tokio::sync::watch;

const EXIT_SUCCESS: u8 = 0;
const EXIT_TOPIC_MISSING: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = args::Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let mut builder = Builder::from_default_env();
    match args.log_output {
        args::LogOutput::StdOut => {
            builder.target(Target::Stdout);
        }
        args::LogOutput::StdErr => {
            builder.target(Target::Stderr);
        }
    }
    builder.init();

    let result = match KafkaConfig::from_env().context("loading configuration") {
        Ok(config) => execute(args.action, &config.with_endpoint(args.bootstrap_server)).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Runs one command and returns the process exit code.
async fn execute(action: args::Action, config: &KafkaConfig) -> anyhow::Result<u8> {
    let brokers = config.brokers()?;
    let client = KafkaClient::connect(&brokers, ClientOptions::from(config))
        .await
        .with_context(|| format!("connecting to {}", config.endpoint))?;

    match action {
        args::Action::CheckTopic(args::TopicArgs { ref topic }) => {
            let exists = TopicAdmin::new(&client, config.admin_timeout())
                .topic_exists(topic)
                .await
                .with_context(|| format!("checking topic {topic}"))?;
            println!("{exists}");
            client.shutdown().await;
            Ok(if exists {
                EXIT_SUCCESS
            } else {
                EXIT_TOPIC_MISSING
            })
        }
        args::Action::ListTopics => {
            let topics = TopicAdmin::new(&client, config.admin_timeout())
                .list_topics()
                .await
                .context("listing topics")?;
            for topic in topics {
                println!("{}", topic.name);
            }
            client.shutdown().await;
            Ok(EXIT_SUCCESS)
        }
        args::Action::EnsureTopic(args::EnsureTopicArgs {
            ref topic,
            partitions,
            replication_factor,
        }) => {
            let outcome = TopicAdmin::new(&client, config.admin_timeout())
                .ensure_topic(topic, partitions, replication_factor)
                .await
                .with_context(|| format!("ensuring topic {topic}"))?;
            match outcome {
                EnsureOutcome::Created => println!("created"),
                EnsureOutcome::AlreadyExisted => println!("exists"),
            }
            client.shutdown().await;
            Ok(EXIT_SUCCESS)
        }
        args::Action::Stream(args::StreamArgs {
            ref topic,
            from_beginning,
        }) => {
            let starting = if from_beginning {
                StartingOffset::Earliest
            } else {
                StartingOffset::Latest
            };
            stream(client, config, topic, starting).await?;
            Ok(EXIT_SUCCESS)
        }
    }
}

async fn stream(
    client: KafkaClient,
    config: &KafkaConfig,
    topic: &str,
    starting: StartingOffset,
) -> anyhow::Result<()> {
    let mut subscription = KafkaConsumer::new(client, config.consumer.clone())
        .subscribe(topic, starting)
        .await
        .with_context(|| format!("subscribing to {topic}"))?;

    let (shutdown, signal) = watch::channel(false);
    tokio::spawn(watch_signals(shutdown));

    let mut pipeline = Pipeline::new(ConsoleSink::stdout());
    let result = pipeline.run(&mut subscription, signal).await;
    subscription.close().await;
    result.with_context(|| format!("streaming {topic}"))?;
    Ok(())
}

/// Raises `shutdown` on the first Ctrl-C or SIGTERM; a second Ctrl-C exits at once.
async fn watch_signals(shutdown: watch::Sender<bool>) {
    if let Err(e) = shutdown_requested().await {
        log::warn!("Cannot listen for shutdown signals: {e}");
        return;
    }
    log::info!("Shutdown requested, stopping after the current poll");
    shutdown.send_replace(true);

    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("Interrupted again, exiting without closing connections");
        std::process::exit(EXIT_INTERRUPTED);
    }
}

#[cfg(unix)]
async fn shutdown_requested() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_requested() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_config::RetryConfig;
    use kafka_wire::testing::FakeBroker;
    use pretty_assertions::assert_eq;

    fn config_for(broker: &FakeBroker) -> KafkaConfig {
        KafkaConfig {
            endpoint: broker.address().to_string(),
            ..KafkaConfig::default()
        }
    }

    fn check(topic: &str) -> args::Action {
        args::Action::CheckTopic(args::TopicArgs {
            topic: topic.to_string(),
        })
    }

    #[tokio::test]
    async fn test_check_topic_exit_codes() {
        let broker = FakeBroker::start().await;
        broker.create_topic("stedi-events", 1);
        broker.create_topic("other", 1);
        let config = config_for(&broker);

        assert_eq!(execute(check("stedi-events"), &config).await.unwrap(), EXIT_SUCCESS);
        assert_eq!(execute(check("missing"), &config).await.unwrap(), EXIT_TOPIC_MISSING);
    }

    #[tokio::test]
    async fn test_ensure_topic_then_check() {
        let broker = FakeBroker::start().await;
        let config = config_for(&broker);
        let ensure = args::Action::EnsureTopic(args::EnsureTopicArgs {
            topic: "stedi-events".to_string(),
            partitions: 2,
            replication_factor: 1,
        });

        assert_eq!(execute(ensure, &config).await.unwrap(), EXIT_SUCCESS);
        assert_eq!(execute(check("stedi-events"), &config).await.unwrap(), EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = KafkaConfig {
            endpoint: format!("127.0.0.1:{port}"),
            retry: RetryConfig {
                attempts: 1,
                backoff_ms: 1,
                max_backoff_ms: 1,
            },
            ..KafkaConfig::default()
        };

        let err = execute(check("stedi-events"), &config).await.unwrap_err();
        assert!(format!("{err:#}").starts_with("connecting to 127.0.0.1:"), "{err:#}");
    }
}
