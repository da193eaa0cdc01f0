//! End-to-end scenarios exercising the arena and index together.

use diskmap::{Arena, Index};

fn scratch_path(name: &str) -> std::path::PathBuf {
    let file = tempfile::Builder::new()
        .prefix(&format!("diskmap-test-{name}-"))
        .suffix(".map")
        .tempfile()
        .unwrap();
    let path = file.path().to_path_buf();
    // Arena::create truncates and recreates the file itself; drop the
    // placeholder tempfile gave us so it doesn't hold the handle open.
    file.close().unwrap();
    path
}

/// A single-value map survives 5000 insertions with every value readable
/// back exactly as written.
#[test]
fn single_value_map_round_trip_5000_keys() {
    let path = scratch_path("round-trip");
    let mut arena = Arena::create(&path, 420).unwrap();
    let index = Index::create(&mut arena, 2, 8).unwrap();

    for i in 0..5000u64 {
        let key = format!("key-{i}");
        let (bucket, inserted) = index.insert(&mut arena, key.as_bytes()).unwrap();
        assert!(inserted);
        unsafe {
            index.value_mut(&mut arena, bucket).unwrap().copy_from_slice(&i.to_ne_bytes());
        }
    }

    for i in 0..5000u64 {
        let key = format!("key-{i}");
        let bucket = index.lookup(&arena, key.as_bytes()).unwrap().expect("key present");
        let value = unsafe { index.value(&arena, bucket).unwrap() };
        assert_eq!(u64::from_ne_bytes(value.try_into().unwrap()), i);
    }

    assert_eq!(index.len(&arena), 5000);
    std::fs::remove_file(&path).ok();
}

/// A multi-map with 3000 outer keys, the `i`-th carrying `i` inner values
/// (so the last nested index is stressed to nearly 3000 entries), and
/// every inner value reachable through its outer key.
#[test]
fn growing_multimap_3000_outer_keys() {
    let path = scratch_path("multimap");
    let mut arena = Arena::create(&path, 420).unwrap();
    let root = Index::create(&mut arena, 2, std::mem::size_of::<diskmap::Offset>() as u64).unwrap();

    for i in 0..3000u64 {
        let outer = format!("outer-{i}");
        let child = root.multimap_insert(&mut arena, outer.as_bytes(), 2, 8).unwrap();
        for j in 0..i {
            let inner = format!("inner-{i}-{j}");
            let (bucket, inserted) = child.insert(&mut arena, inner.as_bytes()).unwrap();
            assert!(inserted);
            unsafe {
                child.value_mut(&mut arena, bucket).unwrap().copy_from_slice(&j.to_ne_bytes());
            }
        }
    }

    for i in 0..3000u64 {
        let outer = format!("outer-{i}");
        let bucket = root.lookup(&arena, outer.as_bytes()).unwrap().expect("outer key present");
        let child = root.child_at(&arena, bucket).unwrap();
        assert_eq!(child.len(&arena), i);
        for j in 0..i {
            let inner = format!("inner-{i}-{j}");
            let inner_bucket = child.lookup(&arena, inner.as_bytes()).unwrap().expect("inner key present");
            let value = unsafe { child.value(&arena, inner_bucket).unwrap() };
            assert_eq!(u64::from_ne_bytes(value.try_into().unwrap()), j);
        }
    }

    assert_eq!(root.len(&arena), 3000);
    std::fs::remove_file(&path).ok();
}

/// Closing and reopening the arena preserves every previously inserted
/// key/value, reconstructing the root index from the fixed first-alloc
/// offset.
#[test]
fn persistence_across_remap_key0_key1_key2() {
    let path = scratch_path("persist");

    let root_offset = {
        let mut arena = Arena::create(&path, 420).unwrap();
        let root = Index::create(&mut arena, 2, std::mem::size_of::<diskmap::Offset>() as u64).unwrap();

        let entries: &[(&str, &[&str])] = &[
            ("key0", &["val00", "val01"]),
            ("key1", &["val10"]),
            ("key2", &["val20", "val21", "val22"]),
        ];
        for (outer, values) in entries {
            let child = root.multimap_insert(&mut arena, outer.as_bytes(), 2, 8).unwrap();
            for value in *values {
                child.insert(&mut arena, value.as_bytes()).unwrap();
            }
        }
        arena.sync().unwrap();
        root.header_offset()
    };

    let mut arena = Arena::open(&path).unwrap();
    assert_eq!(root_offset, diskmap::store::layout::FIRST_ALLOC_OFFSET);
    let root = Index::at(root_offset);

    let expect: &[(&str, &[&str])] = &[
        ("key0", &["val00", "val01"]),
        ("key1", &["val10"]),
        ("key2", &["val20", "val21", "val22"]),
    ];
    for (outer, values) in expect {
        let bucket = root.lookup(&arena, outer.as_bytes()).unwrap().expect("outer key survives reopen");
        let child = root.child_at(&arena, bucket).unwrap();
        for value in *values {
            assert!(child.lookup(&arena, value.as_bytes()).unwrap().is_some());
        }
    }

    // Further inserts after reopening keep working, proving the arena's
    // allocation chain was reconstructed correctly, not just read-only.
    let child = root.multimap_insert(&mut arena, b"key3", 2, 8).unwrap();
    child.insert(&mut arena, b"val30").unwrap();
    assert!(child.lookup(&arena, b"val30").unwrap().is_some());

    std::fs::remove_file(&path).ok();
}

/// Inserting enough keys to force at least three bucket-count doublings
/// keeps every key reachable and the load factor within bound throughout.
#[test]
fn rehash_transparency_across_three_doublings() {
    let path = scratch_path("rehash");
    let mut arena = Arena::create(&path, 420).unwrap();
    let index = Index::create(&mut arena, 2, 8).unwrap();

    let mut bucket_counts = Vec::new();
    for i in 0..200u64 {
        let key = format!("rehash-key-{i}");
        index.insert(&mut arena, key.as_bytes()).unwrap();
        let count = unsafe { *arena.deref::<diskmap::store::layout::IndexHeader>(index.header_offset()) }.bucket_count;
        bucket_counts.push(count);

        let filled = index.len(&arena);
        assert!(filled * 10 <= count * 9, "load factor exceeded 0.9 at {i}");
    }

    let distinct: std::collections::BTreeSet<_> = bucket_counts.iter().copied().collect();
    assert!(distinct.len() >= 3, "expected at least 3 distinct bucket counts, saw {distinct:?}");

    for i in 0..200u64 {
        let key = format!("rehash-key-{i}");
        assert!(index.lookup(&arena, key.as_bytes()).unwrap().is_some());
    }

    std::fs::remove_file(&path).ok();
}

/// Allocating well past the arena's initial size grows the backing file
/// and keeps previously issued offsets valid.
#[test]
fn allocation_beyond_initial_size_grows_arena() {
    let path = scratch_path("grow");
    let mut arena = Arena::create(&path, 420).unwrap();
    let initial_size = arena.size();

    let first = arena.allocate(64).unwrap();
    unsafe {
        arena.bytes_mut(first, 64).fill(0xAB);
    }

    let mut last = first;
    for _ in 0..100 {
        last = arena.allocate(4096).unwrap();
    }

    assert!(arena.size() > initial_size);
    unsafe {
        assert!(arena.bytes(first, 64).iter().all(|&b| b == 0xAB));
    }
    assert!(last > first);

    std::fs::remove_file(&path).ok();
}
