use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use quay_kv::{KvStore, LogKvStore};
use quay_store::keys::display_key;
use quay_store::{MessageStore, RecoveryReport, StoredMessage, Transaction};
use quay_types::{Message, MessageId, QueueName};
use serde_json::json;
use tracing::debug;

use crate::cli::*;
use crate::config::CliConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref(), cli.data.clone())?;
    debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    let json = matches!(cli.format, OutputFormat::Json);

    match cli.command {
        Command::CreateQueue(args) => cmd_create_queue(&config, args),
        Command::Queues => cmd_queues(&config, json),
        Command::Send(args) => cmd_send(&config, args, json),
        Command::Get(args) => cmd_get(&config, args, json),
        Command::List(args) => cmd_list(&config, args, json),
        Command::Recover => cmd_recover(&config, json),
        Command::Keys(args) => cmd_keys(&config, args),
        Command::Compact => cmd_compact(&config),
    }
}

fn open_log(config: &CliConfig) -> anyhow::Result<LogKvStore> {
    let path = config.log_path();
    LogKvStore::open(&path, config.log.clone())
        .with_context(|| format!("opening log {}", path.display()))
}

fn open_store(config: &CliConfig) -> anyhow::Result<MessageStore> {
    let kv = open_log(config)?;
    MessageStore::open(Arc::new(kv)).context("opening message store")
}

fn cmd_create_queue(config: &CliConfig, args: CreateQueueArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let queue = QueueName::new(args.name)?;
    store.create_queue(&queue)?;
    println!("{} Created queue {}", "✓".green().bold(), queue.as_str().yellow());
    Ok(())
}

fn cmd_queues(config: &CliConfig, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let queues = store.list_queues()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&queues)?);
        return Ok(());
    }
    if queues.is_empty() {
        println!("No queues.");
    }
    for q in &queues {
        println!("{}  {}", q.name.as_str().yellow().bold(), q.created_at.to_string().dimmed());
    }
    Ok(())
}

fn cmd_send(config: &CliConfig, args: SendArgs, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let id = match args.id {
        Some(id) => MessageId::new(id)?,
        None => MessageId::generate(),
    };
    let mut message = Message::new(QueueName::new(args.queue)?, id, args.payload.into_bytes());
    for (key, value) in args.headers {
        message = message.with_header(key, value);
    }

    let mut tx = store.store_messages(std::slice::from_ref(&message))?;
    tx.commit()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&send_json(&message, &tx))?);
    } else {
        println!(
            "{} Stored {} in {} (transaction {})",
            "✓".green().bold(),
            message.id.as_str().bold(),
            message.queue.as_str().yellow(),
            tx.id().short_id().dimmed()
        );
        println!("  Begun: {}", tx.started_at().to_string().dimmed());
        for key in tx.written_keys() {
            println!("  {}", display_key(key).dimmed());
        }
    }
    Ok(())
}

fn send_json(message: &Message, tx: &Transaction) -> serde_json::Value {
    json!({
        "queue": message.queue,
        "id": message.id,
        "transaction": tx.id().to_token(),
        "started_at": tx.started_at().to_string(),
        "keys": tx.written_keys().iter().map(|k| display_key(k)).collect::<Vec<_>>(),
    })
}

fn cmd_get(config: &CliConfig, args: GetArgs, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let message = store.get_message_by_id(&QueueName::new(args.queue)?, &MessageId::new(args.id)?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&message_json(&message, None))?);
    } else {
        print_message(&message, None);
    }
    Ok(())
}

fn cmd_list(config: &CliConfig, args: ListArgs, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stored = store.messages(&QueueName::new(args.queue)?)?;
    if json {
        let items: Vec<_> = stored
            .iter()
            .map(|s| message_json(&s.message, Some(s)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if stored.is_empty() {
        println!("No messages.");
    }
    for s in &stored {
        print_message(&s.message, Some(s));
    }
    Ok(())
}

fn cmd_recover(config: &CliConfig, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let report = store.last_recovery();
    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(report))?);
        return Ok(());
    }
    if report.is_noop() {
        println!("{} No incomplete transactions.", "✓".green().bold());
    } else {
        println!(
            "{} Discarded {} incomplete transaction(s)",
            "✓".green().bold(),
            report.intents.len().to_string().bold()
        );
        for tx in &report.intents {
            println!("  {}", tx.to_token().yellow());
        }
        println!("  Message keys removed: {}", report.data_keys_deleted);
        println!("  Markers removed: {}", report.markers_deleted);
    }
    if report.unrecognized_markers > 0 {
        println!(
            "  {} {} malformed key(s) under /batch/ left in place",
            "!".red().bold(),
            report.unrecognized_markers
        );
    }
    Ok(())
}

/// Raw dump straight from the log. Does not run recovery, so the keys of
/// a crashed batch are still visible here.
fn cmd_keys(config: &CliConfig, args: KeysArgs) -> anyhow::Result<()> {
    let kv = open_log(config)?;
    let prefix = args.prefix.unwrap_or_default();
    let entries = kv.scan(prefix.as_bytes())?;
    for (key, value) in &entries {
        let key = display_key(key);
        if args.values {
            println!("{}  {}", key, hex::encode(value).dimmed());
        } else {
            println!("{key}");
        }
    }
    println!("{} key(s)", entries.len().to_string().bold());
    Ok(())
}

fn cmd_compact(config: &CliConfig) -> anyhow::Result<()> {
    let kv = open_log(config)?;
    let stats = kv.compact()?;
    println!("{} Compacted {}", "✓".green().bold(), kv.path().display());
    println!("  Live keys: {}", stats.live_keys);
    println!("  Bytes: {} -> {}", stats.bytes_before, stats.bytes_after);
    Ok(())
}

fn payload_text(payload: &[u8]) -> (String, &'static str) {
    match std::str::from_utf8(payload) {
        Ok(text) => (text.to_string(), "utf8"),
        Err(_) => (hex::encode(payload), "hex"),
    }
}

fn print_message(message: &Message, stored: Option<&StoredMessage>) {
    let (payload, encoding) = payload_text(&message.payload);
    print!("{} {}", message.id.as_str().yellow().bold(), message.sent_at.to_string().dimmed());
    match stored {
        Some(s) if s.committed => println!("  {}", "committed".green()),
        Some(_) => println!("  {}", "uncommitted".red()),
        None => println!(),
    }
    for (key, value) in &message.headers {
        println!("  {}: {}", key.cyan(), value);
    }
    if encoding == "hex" {
        println!("  payload (hex): {payload}");
    } else {
        println!("  payload: {payload}");
    }
}

fn message_json(message: &Message, stored: Option<&StoredMessage>) -> serde_json::Value {
    let (payload, encoding) = payload_text(&message.payload);
    let mut value = json!({
        "queue": message.queue,
        "id": message.id,
        "sent_at": message.sent_at.to_string(),
        "headers": message.headers,
        "payload": payload,
        "payload_encoding": encoding,
    });
    if let Some(s) = stored {
        value["transaction"] = json!(s.transaction.to_token());
        value["committed"] = json!(s.committed);
    }
    value
}

fn report_json(report: &RecoveryReport) -> serde_json::Value {
    json!({
        "transactions": report.intents.iter().map(|tx| tx.to_token()).collect::<Vec<_>>(),
        "data_keys_deleted": report.data_keys_deleted,
        "markers_deleted": report.markers_deleted,
        "unrecognized_markers": report.unrecognized_markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    fn run(dir: &Path, args: &[&str]) -> anyhow::Result<()> {
        let data = dir.to_str().unwrap();
        let mut argv = vec!["quay", "--data", data];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv).unwrap())
    }

    fn store_at(dir: &Path) -> MessageStore {
        let config = CliConfig::load(None, Some(dir.to_path_buf())).unwrap();
        open_store(&config).unwrap()
    }

    #[test]
    fn send_then_get() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["create-queue", "orders"]).unwrap();
        run(dir.path(), &["send", "orders", "--id", "m1", "-p", "hello", "--header", "type=order"]).unwrap();
        run(dir.path(), &["get", "orders", "m1"]).unwrap();
        run(dir.path(), &["--format", "json", "list", "orders"]).unwrap();

        let store = store_at(dir.path());
        let message = store
            .get_message_by_id(&QueueName::new("orders").unwrap(), &MessageId::new("m1").unwrap())
            .unwrap();
        assert_eq!(message.payload, b"hello".to_vec());
        assert_eq!(message.headers.get("type").map(String::as_str), Some("order"));
    }

    #[test]
    fn send_to_missing_queue_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), &["send", "ghost", "-p", "x"]).unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[test]
    fn get_missing_message_fails() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["create-queue", "orders"]).unwrap();
        assert!(run(dir.path(), &["get", "orders", "nope"]).is_err());
    }

    #[test]
    fn recover_discards_crashed_batch() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["create-queue", "orders"]).unwrap();
        {
            let store = store_at(dir.path());
            let message = Message::new(
                QueueName::new("orders").unwrap(),
                MessageId::new("m2").unwrap(),
                b"x".to_vec(),
            );
            let _crashed = store.store_messages(&[message]).unwrap();
        }
        run(dir.path(), &["keys", "/batch/"]).unwrap();
        run(dir.path(), &["recover"]).unwrap();

        let store = store_at(dir.path());
        assert!(store.last_recovery().is_noop());
        assert!(store
            .messages(&QueueName::new("orders").unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn compact_keeps_live_data() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["create-queue", "orders"]).unwrap();
        run(dir.path(), &["send", "orders", "--id", "m1", "-p", "a"]).unwrap();
        run(dir.path(), &["compact"]).unwrap();
        run(dir.path(), &["keys", "--values"]).unwrap();

        let store = store_at(dir.path());
        assert_eq!(store.list_queues().unwrap().len(), 1);
        assert_eq!(store.messages(&QueueName::new("orders").unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn send_report_lists_the_transaction_keys() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["create-queue", "orders"]).unwrap();
        let store = store_at(dir.path());
        let message = Message::new(
            QueueName::new("orders").unwrap(),
            MessageId::new("m1").unwrap(),
            b"x".to_vec(),
        );
        let mut tx = store.store_messages(std::slice::from_ref(&message)).unwrap();
        tx.commit().unwrap();

        let report = send_json(&message, &tx);
        assert_eq!(report["transaction"], json!(tx.id().to_token()));
        assert_eq!(report["started_at"], json!(tx.started_at().to_string()));
        let keys = report["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys[0].as_str().unwrap().starts_with("/q/orders/msgs/m1/batch/"));
        assert!(keys[1].as_str().unwrap().ends_with("/headers"));
        assert!(keys[2].as_str().unwrap().ends_with("/sent"));
    }

    #[test]
    fn binary_payloads_render_as_hex() {
        assert_eq!(payload_text(b"hi"), ("hi".to_string(), "utf8"));
        assert_eq!(payload_text(&[0xff, 0x00]), ("ff00".to_string(), "hex"));
    }
}
