//! Locking behaviour of the cache facade under concurrent use

mod common;

use common::{put, read};
use pathcache::{CacheService, CancellationToken, DiskBackend};
use std::io::Write;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const VALUE_LEN: usize = 16 * 1024;

fn disk_cache() -> (CacheService<DiskBackend>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let service = CacheService::disk(temp_dir.path()).unwrap();
    (service, temp_dir)
}

#[test]
fn test_concurrent_readers_see_the_same_content() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "shared/blob", &[42u8; VALUE_LEN]);

    let readers = 8;
    let barrier = Arc::new(Barrier::new(readers));
    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let data = read(&cache, "shared/blob").unwrap();
                    assert_eq!(data.len(), VALUE_LEN);
                    assert!(data.iter().all(|&b| b == 42));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_readers_do_not_wait_for_each_other() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "shared", b"value");

    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = {
        let cache = cache.clone();
        thread::spawn(move || {
            cache.with_backend(|_| {
                held_tx.send(()).unwrap();
                // keep the read lock until the other reader is done
                release_rx.recv_timeout(Duration::from_secs(5)).ok();
            });
        })
    };
    held_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let reader = {
        let cache = cache.clone();
        thread::spawn(move || {
            done_tx.send(read(&cache, "shared")).unwrap();
        })
    };

    let data = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(data.unwrap(), b"value");

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn test_writer_waits_for_readers() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "guarded", b"before");

    let (done_tx, done_rx) = mpsc::channel();
    let writer = cache.with_backend(|_| {
        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                put(&cache, "guarded", b"after");
                done_tx.send(()).unwrap();
            })
        };
        // the read lock is still held here
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        writer
    });

    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    writer.join().unwrap();
    assert_eq!(read(&cache, "guarded").unwrap(), b"after");
}

#[test]
fn test_readers_never_observe_partial_writes() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "hot", &[0u8; VALUE_LEN]);

    let barrier = Arc::new(Barrier::new(5));

    let writer = {
        let cache = cache.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for round in 1..=40u8 {
                put(&cache, "hot", &vec![round; VALUE_LEN]);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    let data = read(&cache, "hot").expect("entry is never absent");
                    assert_eq!(data.len(), VALUE_LEN);
                    let first = data[0];
                    assert!(data.iter().all(|&b| b == first), "torn read");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(read(&cache, "hot").unwrap(), vec![40u8; VALUE_LEN]);
}

#[test]
fn test_open_writer_blocks_readers() {
    let (cache, _temp_dir) = disk_cache();

    let mut writer = cache
        .wrap_output_stream("pending", false, &CancellationToken::new(), |_, _, _| Ok(()))
        .unwrap();
    writer.write_all(b"payload").unwrap();

    let (tx, rx) = mpsc::channel();
    let reader = {
        let cache = cache.clone();
        thread::spawn(move || {
            tx.send(cache.has_content("pending").unwrap()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    writer.close().unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    reader.join().unwrap();
}

#[test]
fn test_writers_to_distinct_keys() {
    let (cache, _temp_dir) = disk_cache();
    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|id| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let key = format!("writers/{id}");
                for n in 0..20 {
                    cache
                        .add_content(
                            &key,
                            format!("{n};").as_bytes(),
                            n > 0,
                            &CancellationToken::new(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected: String = (0..20).map(|n| format!("{n};")).collect();
    for id in 0..writers {
        let data = read(&cache, &format!("writers/{id}")).unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), expected);
    }
}
