//! Disk cache behaviour without injected failures

mod common;

use common::{append, leaked_files, put, put_at, read, stamp_of};
use pathcache::{CacheError, CacheService, CancellationToken, ContentBackend};
use std::fs::File;
use std::io::{Read, Write};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

fn disk_cache() -> (CacheService<pathcache::DiskBackend>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let service = CacheService::disk(temp_dir.path()).unwrap();
    (service, temp_dir)
}

#[test]
fn test_round_trip_and_replace() {
    let (cache, temp_dir) = disk_cache();

    put(&cache, "projects/demo/readme.txt", b"first");
    assert_eq!(read(&cache, "projects/demo/readme.txt").unwrap(), b"first");
    assert!(temp_dir.path().join("projects/demo/readme.txt").is_file());

    put(&cache, "projects/demo/readme.txt", b"second, longer");
    assert_eq!(
        read(&cache, "projects/demo/readme.txt").unwrap(),
        b"second, longer"
    );
    assert!(leaked_files(temp_dir.path()).is_empty());
}

#[test]
fn test_empty_content_is_still_content() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "empty", b"");
    assert!(cache.has_content("empty").unwrap());
    assert_eq!(read(&cache, "empty").unwrap(), b"");
}

#[test]
fn test_append_extends_existing_and_creates_missing() {
    let (cache, _temp_dir) = disk_cache();

    put(&cache, "log", b"abc");
    append(&cache, "log", b"def");
    assert_eq!(read(&cache, "log").unwrap(), b"abcdef");

    append(&cache, "fresh", b"xyz");
    assert_eq!(read(&cache, "fresh").unwrap(), b"xyz");
}

#[test]
fn test_absent_keys() {
    let (cache, _temp_dir) = disk_cache();
    assert!(!cache.has_content("nothing/here").unwrap());
    assert!(cache.get_content("nothing/here").unwrap().is_none());
    assert_eq!(cache.get_content_timestamp("nothing/here").unwrap(), None);
}

#[test]
fn test_timestamps() {
    let (cache, _temp_dir) = disk_cache();

    put_at(&cache, "stamped", b"data", 1_600_000_000_123);
    assert_eq!(
        cache.get_content_timestamp("stamped").unwrap(),
        Some(1_600_000_000_123)
    );

    cache
        .set_content_timestamp("stamped", 1_700_000_000_000)
        .unwrap();
    assert_eq!(
        cache.get_content_timestamp("stamped").unwrap(),
        Some(1_700_000_000_000)
    );

    // content is untouched by restamping
    assert_eq!(read(&cache, "stamped").unwrap(), b"data");

    cache.set_content_timestamp("unknown", 5).unwrap();
    assert!(!cache.has_content("unknown").unwrap());
}

#[test]
fn test_timestamp_is_independent_of_file_mtime() {
    let (cache, temp_dir) = disk_cache();
    put_at(&cache, "stamped", b"data", 1_234);

    let file = File::options()
        .write(true)
        .open(temp_dir.path().join("stamped"))
        .unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(999_999)).unwrap();
    drop(file);

    assert_eq!(cache.get_content_timestamp("stamped").unwrap(), Some(1_234));
    let key = "stamped".parse().unwrap();
    let cached = cache.with_backend(|backend| backend.cached(&key)).unwrap();
    assert_eq!(cached.unwrap().timestamp(), Some(1_234));

    // appending restamps the entry
    cache
        .add_content_with_timestamp("stamped", &b"+"[..], true, 5_678, &CancellationToken::new())
        .unwrap();
    assert_eq!(cache.get_content_timestamp("stamped").unwrap(), Some(5_678));

    // the record survives a restart and goes away with the entry
    let reopened = CacheService::disk(temp_dir.path()).unwrap();
    assert_eq!(reopened.get_content_timestamp("stamped").unwrap(), Some(5_678));
    reopened.remove_content("stamped").unwrap();
    assert!(!stamp_of(&temp_dir.path().join("stamped")).exists());
    assert_eq!(reopened.get_content_timestamp("stamped").unwrap(), None);
}

#[test]
fn test_remove_is_idempotent() {
    let (cache, _temp_dir) = disk_cache();

    cache.remove_content("never/added").unwrap();

    put(&cache, "gone", b"x");
    cache.remove_content("gone").unwrap();
    cache.remove_content("gone").unwrap();
    assert!(!cache.has_content("gone").unwrap());
}

#[test]
fn test_remove_compacts_empty_directories() {
    let (cache, temp_dir) = disk_cache();

    put(&cache, "x/y/z", b"deep");
    put(&cache, "x/keep", b"sibling");
    cache.remove_content("x/y/z").unwrap();

    assert!(!temp_dir.path().join("x/y").exists());
    assert!(temp_dir.path().join("x").is_dir());

    cache.remove_content("x/keep").unwrap();
    assert!(!temp_dir.path().join("x").exists());
    assert!(temp_dir.path().is_dir());
}

#[test]
fn test_remove_recursive_only_touches_the_subtree() {
    let (cache, temp_dir) = disk_cache();

    put(&cache, "a/b/c", b"1");
    put(&cache, "a/b/d/e", b"2");
    put(&cache, "a/f", b"3");
    put(&cache, "ab/x", b"4");

    cache.remove_content_recursive("a/b", &CancellationToken::new()).unwrap();
    assert!(!cache.has_content("a/b/c").unwrap());
    assert!(!cache.has_content("a/b/d/e").unwrap());
    assert!(cache.has_content("a/f").unwrap());
    assert!(cache.has_content("ab/x").unwrap());
    assert!(!temp_dir.path().join("a/b").exists());

    cache.remove_content_recursive("a", &CancellationToken::new()).unwrap();
    assert!(!temp_dir.path().join("a").exists());
    assert_eq!(read(&cache, "ab/x").unwrap(), b"4");

    // removing a missing subtree is fine too
    cache.remove_content_recursive("does/not/exist", &CancellationToken::new()).unwrap();
}

#[test]
fn test_remove_recursive_on_a_single_entry() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "single", b"1");
    cache.remove_content_recursive("single", &CancellationToken::new()).unwrap();
    assert!(!cache.has_content("single").unwrap());
}

#[test]
fn test_entry_cannot_shadow_a_directory() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "a", b"file");
    let err = cache
        .add_content("a/b", &b"nested"[..], false, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }));
    assert_eq!(read(&cache, "a").unwrap(), b"file");
}

#[test]
fn test_entry_cannot_replace_a_directory() {
    let (cache, temp_dir) = disk_cache();
    put(&cache, "a/b", b"nested");

    let err = cache
        .add_content("a", &b"file"[..], false, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }));

    assert!(!cache.has_content("a").unwrap());
    assert_eq!(cache.get_content_timestamp("a").unwrap(), None);
    assert_eq!(read(&cache, "a/b").unwrap(), b"nested");
    assert!(temp_dir.path().join("a").is_dir());
    assert!(leaked_files(temp_dir.path()).is_empty());
    assert!(!stamp_of(&temp_dir.path().join("a")).exists());
    assert_eq!(cache.with_backend(|backend| backend.outstanding_cleanups()), 0);
}

#[test]
fn test_cancelled_recursive_removal_keeps_the_subtree() {
    let (cache, _temp_dir) = disk_cache();
    put(&cache, "tree/leaf", b"1");

    let token = CancellationToken::new();
    token.cancel();
    let err = cache.remove_content_recursive("tree", &token).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(read(&cache, "tree/leaf").unwrap(), b"1");

    assert!(cache
        .wrap_output_stream("tree/other", false, &token, |_, _, _| Ok(()))
        .is_err());
    assert!(!cache.has_content("tree/other").unwrap());
}

#[test]
fn test_reserved_names_are_not_keys() {
    let (cache, _temp_dir) = disk_cache();
    for key in [".failedDeletions.$$$", "dir/file.1.$$$", "a/../b", ""] {
        let err = cache.has_content(key).unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey { .. }), "{key}");
    }
}

#[test]
fn test_output_stream_on_disk() {
    let (cache, temp_dir) = disk_cache();
    let token = CancellationToken::new();
    put(&cache, "stream", b"head-");

    let mut tail = Vec::new();
    let mut writer = cache
        .wrap_output_stream("stream", true, &token, |reader, _, append| {
            assert!(append);
            reader.read_to_end(&mut tail)?;
            Ok(())
        })
        .unwrap();
    writer.write_all(b"tail").unwrap();
    writer.close().unwrap();

    assert_eq!(tail, b"tail");
    assert_eq!(read(&cache, "stream").unwrap(), b"head-tail");

    let mut whole = Vec::new();
    let mut writer = cache
        .wrap_output_stream("stream", false, &token, |reader, _, append| {
            assert!(!append);
            reader.read_to_end(&mut whole)?;
            Ok(())
        })
        .unwrap();
    writer.write_all(b"replaced").unwrap();
    writer.close().unwrap();

    assert_eq!(whole, b"replaced");
    assert!(leaked_files(temp_dir.path()).is_empty());
}

#[test]
fn test_dropped_output_stream_leaves_no_trace() {
    let (cache, temp_dir) = disk_cache();
    put(&cache, "kept", b"original");
    {
        let token = CancellationToken::new();
        let mut writer = cache
            .wrap_output_stream("kept", false, &token, |_, _, _| Ok(()))
            .unwrap();
        writer.write_all(b"abandoned").unwrap();
    }
    assert_eq!(read(&cache, "kept").unwrap(), b"original");
    assert!(leaked_files(temp_dir.path()).is_empty());
}

#[test]
fn test_open_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = pathcache::CacheConfigBuilder::new()
        .with_root(temp_dir.path())
        .with_buffer_size(16)
        .build()
        .unwrap();

    let cache = CacheService::open(&config).unwrap();
    assert_eq!(cache.backend_name(), "disk");
    put(&cache, "configured", &[7u8; 1000]);
    assert_eq!(read(&cache, "configured").unwrap(), vec![7u8; 1000]);

    let config = pathcache::CacheConfigBuilder::new()
        .with_backend(pathcache::BackendKind::Memory)
        .build()
        .unwrap();
    let cache = CacheService::open(&config).unwrap();
    assert_eq!(cache.backend_name(), "memory");
}
