use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use keylog_crypto::{ContentHasher, EntryChainVerifier, EntryHasher};
use keylog_index::{IndexError, IndexStore, KeylogIndex};
use keylog_store::EntryStore;
use keylog_types::{EntryId, LogEntry, LogKey};
use serde_json::json;
use tracing::debug;

use crate::cli::*;
use crate::config::CliConfig;

/// The two stores under one data directory.
struct Stores {
    entries: EntryStore,
    indexes: IndexStore,
}

impl Stores {
    fn open(config: &CliConfig) -> anyhow::Result<Self> {
        let entries = EntryStore::open(config.entries_dir(), config.store.clone())
            .with_context(|| format!("opening entry store in {}", config.entries_dir().display()))?;
        let indexes = IndexStore::open(config.indexes_dir(), config.store.clone())
            .with_context(|| format!("opening index store in {}", config.indexes_dir().display()))?;
        debug!(data_dir = %config.data_dir.display(), "stores opened");
        Ok(Self { entries, indexes })
    }

    fn close(&self) -> anyhow::Result<()> {
        let indexes = self.indexes.close();
        self.entries.close()?;
        indexes?;
        Ok(())
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?.with_data_dir(cli.data_dir);
    let stores = Stores::open(&config)?;
    let result = dispatch(&stores, cli.command, &cli.format);
    let closed = stores.close();
    result?;
    closed
}

fn dispatch(stores: &Stores, command: Command, format: &OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Keys => cmd_keys(stores, format),
        Command::Show(args) => cmd_show(stores, args, format),
        Command::Count => cmd_count(stores, format),
        Command::Append(args) => cmd_append(stores, args, format),
        Command::Mark(args) => cmd_mark(stores, args, format),
        Command::Rollback(args) => cmd_rollback(stores, args, format),
        Command::Remove(args) => cmd_remove(stores, args, format),
        Command::Entry(args) => cmd_entry(stores, args, format),
        Command::Verify(args) => cmd_verify(stores, args, format),
    }
}

fn cmd_keys(stores: &Stores, format: &OutputFormat) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    stores.indexes.iter::<IndexError, _>(|key, index| {
        rows.push((LogKey::from(key), index.height(), index.marker()));
        Ok(())
    })?;

    match format {
        OutputFormat::Json => {
            let keys: Vec<_> = rows
                .iter()
                .map(|(key, height, marker)| {
                    json!({ "key": key.to_string(), "height": height, "marker": render_bytes(marker) })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No keys.");
            }
            for (key, height, marker) in &rows {
                print!("{}  {} entries", key.to_string().yellow().bold(), height);
                if !marker.is_empty() {
                    print!("  marker {}", render_bytes(marker).cyan());
                }
                println!();
            }
        }
    }
    Ok(())
}

fn cmd_show(stores: &Stores, args: KeyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let state = stores
        .indexes
        .with_key(args.key.as_bytes(), |index| Ok(index.snapshot()))?;

    match format {
        OutputFormat::Json => {
            let chain: Vec<String> = state.chain.iter().map(EntryId::to_hex).collect();
            let out = json!({
                "key": state.key.to_string(),
                "marker": render_bytes(&state.marker),
                "height": state.height(),
                "chain": chain,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Key {}", state.key.to_string().yellow().bold());
            if state.marker.is_empty() {
                println!("  Marker: {}", "(none)".dimmed());
            } else {
                println!("  Marker: {}", render_bytes(&state.marker).cyan());
            }
            println!("  Height: {}", state.height());
            for (n, id) in state.chain.iter().enumerate() {
                println!("  {:>4}  {}", n + 1, id.to_hex().dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_count(stores: &Stores, format: &OutputFormat) -> anyhow::Result<()> {
    let keys = stores.indexes.count();
    let entries = stores.entries.count();
    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "keys": keys, "entries": entries }));
        }
        OutputFormat::Text => {
            println!("Keys: {}", keys.to_string().bold());
            println!("Entries: {}", entries.to_string().bold());
        }
    }
    Ok(())
}

fn cmd_append(stores: &Stores, args: AppendArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let key = args.key.as_bytes();
    let timestamp = args.timestamp.unwrap_or_else(now_millis);
    let index = open_or_create(&stores.indexes, key)?;
    let (id, height) = closing(index, |index| {
        let prev = index.last().unwrap_or_else(EntryId::zero);
        let entry = LogEntry::new(prev, key, timestamp, args.payload.into_bytes());
        let id = ContentHasher::ENTRY.entry_id(&entry);
        stores.entries.set(&id, &entry)?;
        index.append(id, prev)?;
        Ok((id, index.height()))
    })?;

    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "key": args.key, "id": id.to_hex(), "height": height }));
        }
        OutputFormat::Text => {
            println!("{} Appended to {}", "✓".green().bold(), args.key.yellow());
            println!("  Entry: {}", id.to_hex().yellow());
            println!("  Height: {height}");
        }
    }
    Ok(())
}

fn cmd_mark(stores: &Stores, args: MarkArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let index = stores
        .indexes
        .mark_key(args.key.as_bytes(), args.marker.as_bytes())?;
    let height = closing(index, |index| Ok(index.height()))?;

    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "key": args.key, "marker": args.marker, "height": height }));
        }
        OutputFormat::Text => {
            println!("{} Marked {} at {}", "✓".green().bold(), args.key.yellow(), args.marker.cyan());
        }
    }
    Ok(())
}

fn cmd_rollback(stores: &Stores, args: KeyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let (height, removed) = stores
        .indexes
        .with_key(args.key.as_bytes(), |index| Ok(index.rollback()))?;

    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "key": args.key, "height": height, "removed": removed }));
        }
        OutputFormat::Text if removed => {
            println!("{} Rolled back {} to height {}", "✓".green().bold(), args.key.yellow(), height);
        }
        OutputFormat::Text => {
            println!("Nothing to roll back: {} is empty.", args.key.yellow());
        }
    }
    Ok(())
}

fn cmd_remove(stores: &Stores, args: KeyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    stores.indexes.remove_key(args.key.as_bytes())?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "key": args.key, "removed": true })),
        OutputFormat::Text => println!("{} Removed {}", "✓".green().bold(), args.key.yellow()),
    }
    Ok(())
}

fn cmd_entry(stores: &Stores, args: EntryArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let id = EntryId::from_hex(&args.id).context("invalid entry id")?;
    let entry = stores.entries.get(&id)?;
    let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(entry.timestamp as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| entry.timestamp.to_string());

    match format {
        OutputFormat::Json => {
            let out = json!({
                "id": id.to_hex(),
                "key": entry.key.to_string(),
                "previous": entry.previous.to_hex(),
                "timestamp": entry.timestamp,
                "payload": hex::encode(&entry.payload),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Entry {}", id.to_hex().yellow().bold());
            println!("  Key: {}", entry.key.to_string().yellow());
            if entry.is_first() {
                println!("  Previous: {}", "(first)".dimmed());
            } else {
                println!("  Previous: {}", entry.previous.to_hex().dimmed());
            }
            println!("  Time: {time}");
            println!("  Payload: {}", render_bytes(&entry.payload));
        }
    }
    Ok(())
}

fn cmd_verify(stores: &Stores, args: KeyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let key = LogKey::from(args.key.as_str());
    let chain = stores.indexes.with_key(key.as_bytes(), |index| {
        let mut chain = Vec::with_capacity(index.count());
        index.iter::<IndexError, _>(None, |id| {
            chain.push((*id, stores.entries.get(id)?));
            Ok(())
        })?;
        Ok(chain)
    })?;

    let verifier = EntryChainVerifier::new(&ContentHasher::ENTRY);
    let verdict = verifier.verify(&key, &chain);
    match format {
        OutputFormat::Json => {
            let out = json!({
                "key": args.key,
                "entries": chain.len(),
                "valid": verdict.is_ok(),
                "error": verdict.as_ref().err().map(ToString::to_string),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => match &verdict {
            Ok(()) => {
                println!("{} Chain for {} verified", "✓".green().bold(), args.key.yellow());
                println!("  Entries: {}", chain.len());
                println!("  Links: {}", "valid".green());
                println!("  Hashes: {}", "valid".green());
            }
            Err(e) => println!("{} Chain for {} is broken: {}", "✗".red().bold(), args.key.yellow(), e),
        },
    }
    verdict.with_context(|| format!("verifying {}", args.key))
}

/// Open `key`, creating an empty keylog if it has never been stored.
fn open_or_create(indexes: &IndexStore, key: &[u8]) -> anyhow::Result<Arc<KeylogIndex>> {
    match indexes.get_key(key) {
        Err(IndexError::NotFound(_)) => Ok(indexes.new_key(key)?),
        other => Ok(other?),
    }
}

/// Run `f` on an acquired index and release it afterwards.
fn closing<T>(
    index: Arc<KeylogIndex>,
    f: impl FnOnce(&KeylogIndex) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let result = f(&*index);
    let closed = index.close();
    let value = result?;
    closed?;
    Ok(value)
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// UTF-8 text as-is, anything else as `0x`-prefixed hex.
fn render_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(dir: &Path) -> CliConfig {
        CliConfig::default().with_data_dir(Some(dir.to_path_buf()))
    }

    fn run(dir: &Path, command: Command) -> anyhow::Result<()> {
        let stores = Stores::open(&config(dir))?;
        let result = dispatch(&stores, command, &OutputFormat::Json);
        stores.close()?;
        result
    }

    fn append(dir: &Path, key: &str, payload: &str) {
        let args = AppendArgs {
            key: key.into(),
            payload: payload.into(),
            timestamp: Some(1_700_000_000_000),
        };
        run(dir, Command::Append(args)).unwrap();
    }

    fn key(k: &str) -> KeyArgs {
        KeyArgs { key: k.into() }
    }

    #[test]
    fn append_creates_key_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), "orders", "one");
        append(dir.path(), "orders", "two");
        run(dir.path(), Command::Verify(key("orders"))).unwrap();

        let stores = Stores::open(&config(dir.path())).unwrap();
        let index = stores.indexes.get_key(b"orders").unwrap();
        assert_eq!(index.height(), 2);
        let last = index.last().unwrap();
        index.close().unwrap();
        assert_eq!(stores.entries.get(&last).unwrap().payload, b"two");
        stores.close().unwrap();
    }

    #[test]
    fn verify_detects_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), "k", "one");
        append(dir.path(), "k", "two");
        {
            let stores = Stores::open(&config(dir.path())).unwrap();
            let first = stores
                .indexes
                .with_key(b"k", |index| Ok(index.snapshot().chain[0]))
                .unwrap();
            stores.entries.delete(&first).unwrap();
            stores.close().unwrap();
        }
        assert!(run(dir.path(), Command::Verify(key("k"))).is_err());
    }

    #[test]
    fn mark_rollback_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mark = MarkArgs {
            key: "k".into(),
            marker: "m1".into(),
        };
        run(dir.path(), Command::Mark(mark)).unwrap();
        append(dir.path(), "k", "one");
        run(dir.path(), Command::Rollback(key("k"))).unwrap();
        run(dir.path(), Command::Rollback(key("k"))).unwrap();
        run(dir.path(), Command::Show(key("k"))).unwrap();
        run(dir.path(), Command::Remove(key("k"))).unwrap();
        assert!(run(dir.path(), Command::Show(key("k"))).is_err());
        assert!(run(dir.path(), Command::Remove(key("k"))).is_err());
    }

    #[test]
    fn entry_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let bad = EntryArgs { id: "zz".into() };
        assert!(run(dir.path(), Command::Entry(bad)).is_err());
        let missing = EntryArgs {
            id: EntryId::from_hash([4; 32]).to_hex(),
        };
        assert!(run(dir.path(), Command::Entry(missing)).is_err());
    }

    #[test]
    fn listing_commands_succeed() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), Command::Keys).unwrap();
        append(dir.path(), "a", "x");
        run(dir.path(), Command::Keys).unwrap();
        run(dir.path(), Command::Count).unwrap();
    }

    #[test]
    fn render_bytes_falls_back_to_hex() {
        assert_eq!(render_bytes(b"text"), "text");
        assert_eq!(render_bytes(&[0xff, 0x00]), "0xff00");
    }
}
