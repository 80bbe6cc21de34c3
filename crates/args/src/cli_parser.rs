use clap::{Args, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "risk-stream")]
#[command(author)]
#[command(version)]
#[command(propagate_version = true)]
#[command(about = "Stream risk events from Kafka and manage topics", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub action: Action,
    #[clap(value_enum, default_value_t=LogOutput::StdErr)]
    #[arg(short, long, global = true)]
    pub log_output: LogOutput,
    /// Overrides the configured endpoint, e.g. `PLAINTEXT://kafka:19092`.
    #[arg(short, long, global = true)]
    pub bootstrap_server: Option<String>,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum LogOutput {
    StdOut,
    StdErr,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
pub enum Action {
    /// Print whether a topic exists; exits 1 when it does not.
    CheckTopic(TopicArgs),
    /// Print `customer,score` for every risk event until interrupted.
    Stream(StreamArgs),
    ListTopics,
    /// Create a topic unless it already exists.
    EnsureTopic(EnsureTopicArgs),
}

#[derive(Args, Debug, PartialEq)]
pub struct TopicArgs {
    pub topic: String,
}

#[derive(Args, Debug, PartialEq)]
pub struct StreamArgs {
    pub topic: String,
    /// Replay what the broker retains instead of only new events.
    #[arg(long)]
    pub from_beginning: bool,
}

#[derive(Args, Debug, PartialEq)]
pub struct EnsureTopicArgs {
    pub topic: String,
    #[arg(short, long, default_value_t = 1)]
    pub partitions: i32,
    #[arg(short, long, default_value_t = 1)]
    pub replication_factor: i16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_check_topic() {
        let cli = Cli::try_parse_from(["risk-stream", "check-topic", "stedi-events"]).unwrap();
        assert_eq!(
            cli.action,
            Action::CheckTopic(TopicArgs {
                topic: "stedi-events".to_string()
            })
        );
        assert_eq!(cli.log_output, LogOutput::StdErr);
        assert_eq!(cli.bootstrap_server, None);
    }

    #[test]
    fn test_stream_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "risk-stream",
            "stream",
            "stedi-events",
            "--from-beginning",
            "--bootstrap-server",
            "PLAINTEXT://kafka:19092",
            "--log-output",
            "std-out",
        ])
        .unwrap();
        assert_eq!(
            cli.action,
            Action::Stream(StreamArgs {
                topic: "stedi-events".to_string(),
                from_beginning: true,
            })
        );
        assert_eq!(cli.bootstrap_server.as_deref(), Some("PLAINTEXT://kafka:19092"));
        assert_eq!(cli.log_output, LogOutput::StdOut);
    }

    #[test]
    fn test_ensure_topic_defaults() {
        let cli = Cli::try_parse_from(["risk-stream", "ensure-topic", "t", "-p", "3"]).unwrap();
        assert_eq!(
            cli.action,
            Action::EnsureTopic(EnsureTopicArgs {
                topic: "t".to_string(),
                partitions: 3,
                replication_factor: 1,
            })
        );
    }

    #[test]
    fn test_topic_is_required() {
        assert!(Cli::try_parse_from(["risk-stream", "check-topic"]).is_err());
        assert!(Cli::try_parse_from(["risk-stream", "list-topics"]).is_ok());
    }
}
