//! End-to-end keylog lifecycle over file-backed stores.

use std::sync::Arc;
use std::thread;

use keylog_crypto::{ContentHasher, EntryChainVerifier, EntryHasher};
use keylog_index::{IndexError, IndexStore};
use keylog_store::{EntryStore, StoreConfig, StoreError};
use keylog_types::{EntryId, LogEntry, LogKey};

struct Stores {
    entries: EntryStore,
    indexes: IndexStore,
}

fn open(dir: &std::path::Path) -> Stores {
    Stores {
        entries: EntryStore::open(dir.join("entries"), StoreConfig::durable()).unwrap(),
        indexes: IndexStore::open(dir.join("indexes"), StoreConfig::durable()).unwrap(),
    }
}

/// Append an entry for `key` to both stores, linking it to the chain head.
fn append(stores: &Stores, key: &str, payload: &str, timestamp: u64) -> EntryId {
    stores
        .indexes
        .with_key(key.as_bytes(), |index| {
            let prev = index.last().unwrap_or_else(EntryId::zero);
            let entry = LogEntry::new(prev, key, timestamp, payload.as_bytes().to_vec());
            let id = ContentHasher::ENTRY.entry_id(&entry);
            stores.entries.set(&id, &entry)?;
            index.append(id, prev)?;
            Ok(id)
        })
        .unwrap()
}

fn load_chain(stores: &Stores, key: &str) -> Vec<(EntryId, LogEntry)> {
    stores
        .indexes
        .with_key(key.as_bytes(), |index| {
            let mut entries = Vec::new();
            index.iter::<IndexError, _>(None, |id| {
                entries.push((*id, stores.entries.get(id)?));
                Ok(())
            })?;
            Ok(entries)
        })
        .unwrap()
}

#[test]
fn two_entry_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = {
        let stores = open(dir.path());
        stores.indexes.new_key(b"k").unwrap().close().unwrap();
        let a = append(&stores, "k", "first", 1);
        let b = append(&stores, "k", "second", 2);

        let index = stores.indexes.get_key(b"k").unwrap();
        assert_eq!(index.height(), 2);
        assert_eq!(index.last(), Some(b));
        assert!(index.contains(&a));
        index.close().unwrap();

        stores.indexes.close().unwrap();
        stores.entries.close().unwrap();
        (a, b)
    };

    let stores = open(dir.path());
    let chain = load_chain(&stores, "k");
    assert_eq!(chain.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(chain[1].1.payload, b"second");

    let verifier = EntryChainVerifier::new(&ContentHasher::ENTRY);
    verifier.verify(&LogKey::from("k"), &chain).unwrap();
}

#[test]
fn marker_and_rollback_persist() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stores = open(dir.path());
        let index = stores.indexes.mark_key(b"replica", b"offset-7").unwrap();
        index.close().unwrap();
        append(&stores, "replica", "one", 1);
        append(&stores, "replica", "two", 2);

        let (height, removed) = stores
            .indexes
            .with_key(b"replica", |index| Ok(index.rollback()))
            .unwrap();
        assert_eq!((height, removed), (1, true));
        stores.indexes.close().unwrap();
    }

    let stores = open(dir.path());
    let index = stores.indexes.get_key(b"replica").unwrap();
    assert_eq!(index.marker(), b"offset-7");
    assert_eq!(index.height(), 1);
    index.close().unwrap();
}

#[test]
fn removed_key_stays_removed_but_entries_remain() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let stores = open(dir.path());
        stores.indexes.new_key(b"gone").unwrap().close().unwrap();
        let id = append(&stores, "gone", "payload", 1);
        stores.indexes.remove_key(b"gone").unwrap();
        id
    };

    let stores = open(dir.path());
    assert!(matches!(
        stores.indexes.get_key(b"gone"),
        Err(IndexError::NotFound(_))
    ));
    assert!(stores.entries.contains(&id).unwrap());

    stores.entries.delete(&id).unwrap();
    assert!(matches!(stores.entries.get(&id), Err(StoreError::NotFound(_))));
}

#[test]
fn iteration_lists_every_key_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let stores = open(dir.path());
    for key in ["zeta", "alpha", "mid"] {
        stores.indexes.new_key(key.as_bytes()).unwrap().close().unwrap();
        append(&stores, key, key, 1);
    }
    let open_mid = stores.indexes.get_key(b"mid").unwrap();

    let mut keys = Vec::new();
    stores
        .indexes
        .iter::<IndexError, _>(|key, index| {
            keys.push((String::from_utf8_lossy(key).into_owned(), index.height()));
            Ok(())
        })
        .unwrap();
    assert_eq!(
        keys,
        vec![
            ("alpha".to_string(), 1),
            ("mid".to_string(), 1),
            ("zeta".to_string(), 1),
        ]
    );
    assert_eq!(stores.indexes.count(), 3);
    open_mid.close().unwrap();
}

#[test]
fn parallel_writers_on_distinct_keys() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(open(dir.path()));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let stores = Arc::clone(&stores);
            thread::spawn(move || {
                let key = format!("writer-{t}");
                stores.indexes.new_key(key.as_bytes()).unwrap().close().unwrap();
                for n in 0..10 {
                    append(&stores, &key, &format!("{t}-{n}"), n);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let verifier = EntryChainVerifier::new(&ContentHasher::ENTRY);
    for t in 0..4 {
        let key = format!("writer-{t}");
        let chain = load_chain(&stores, &key);
        assert_eq!(chain.len(), 10);
        verifier.verify(&LogKey::from(key.as_str()), &chain).unwrap();
    }
}
