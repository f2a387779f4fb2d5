use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "quay",
    about = "Quay: inspect and administer a transactional message store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Data directory (overrides `data_dir` from the config file)
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a queue (or refresh an existing one)
    CreateQueue(CreateQueueArgs),
    /// List queues
    Queues,
    /// Store one message and commit it
    Send(SendArgs),
    /// Show a message by id
    Get(GetArgs),
    /// List every message stored in a queue
    List(ListArgs),
    /// Open the store and report what recovery discarded
    Recover,
    /// Dump raw keys under a prefix
    Keys(KeysArgs),
    /// Rewrite the log with only live keys
    Compact,
}

#[derive(Args)]
pub struct CreateQueueArgs {
    pub name: String,
}

#[derive(Args)]
pub struct SendArgs {
    pub queue: String,
    /// Message id; a fresh UUID v7 is used if omitted
    #[arg(long)]
    pub id: Option<String>,
    #[arg(short, long)]
    pub payload: String,
    /// Header as `key=value`; may be repeated
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

#[derive(Args)]
pub struct GetArgs {
    pub queue: String,
    pub id: String,
}

#[derive(Args)]
pub struct ListArgs {
    pub queue: String,
}

#[derive(Args)]
pub struct KeysArgs {
    pub prefix: Option<String>,
    /// Also print values, hex encoded
    #[arg(long)]
    pub values: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_create_queue() {
        let cli = Cli::try_parse_from(["quay", "create-queue", "orders"]).unwrap();
        if let Command::CreateQueue(args) = cli.command {
            assert_eq!(args.name, "orders");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_send_with_headers() {
        let cli = Cli::try_parse_from([
            "quay", "send", "orders", "--id", "m1", "-p", "hello",
            "--header", "type=order", "--header", "trace=a=b",
        ])
        .unwrap();
        if let Command::Send(args) = cli.command {
            assert_eq!(args.queue, "orders");
            assert_eq!(args.id, Some("m1".into()));
            assert_eq!(args.payload, "hello");
            assert_eq!(
                args.headers,
                vec![
                    ("type".to_string(), "order".to_string()),
                    ("trace".to_string(), "a=b".to_string()),
                ]
            );
        } else { panic!("wrong command"); }
    }

    #[test]
    fn reject_malformed_header() {
        assert!(Cli::try_parse_from(["quay", "send", "q", "-p", "x", "--header", "nokv"]).is_err());
        assert!(Cli::try_parse_from(["quay", "send", "q", "-p", "x", "--header", "=v"]).is_err());
    }

    #[test]
    fn parse_get() {
        let cli = Cli::try_parse_from(["quay", "get", "orders", "m1"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.queue, "orders");
            assert_eq!(args.id, "m1");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_keys_with_prefix() {
        let cli = Cli::try_parse_from(["quay", "keys", "/batch/", "--values"]).unwrap();
        if let Command::Keys(args) = cli.command {
            assert_eq!(args.prefix, Some("/batch/".into()));
            assert!(args.values);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_options() {
        let cli = Cli::try_parse_from([
            "quay", "recover", "--data", "/tmp/q", "-v", "--format", "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Recover));
        assert_eq!(cli.data, Some(PathBuf::from("/tmp/q")));
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
