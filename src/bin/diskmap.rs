//! Command-line driver: creates (or reopens) a mapped file and runs the
//! demo multi-map insertion sequence from the original `main` — three
//! outer keys, each carrying a handful of inner string values.

use clap::Parser;
use diskmap::{Arena, Index};
use std::path::PathBuf;

/// Memory-mapped persistent hash map demo.
#[derive(Parser, Debug)]
#[command(name = "diskmap", about = "Memory-mapped Robin Hood hash map demo")]
struct Cli {
    /// Path to the mapped file. Created if it does not already exist.
    path: PathBuf,

    /// Initial arena size in bytes, used only when creating a new file.
    #[arg(long, default_value_t = 420)]
    initial_size: u64,

    /// Payload width in bytes for each inner value.
    #[arg(long, default_value_t = 32)]
    payload_width: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let (mut arena, root) = if cli.path.exists() {
        tracing::info!(path = %cli.path.display(), "reopening existing arena");
        let arena = Arena::open(&cli.path)?;
        // The very first allocation on a freshly created arena always
        // resolves to this fixed offset, so the root index created right
        // after `Arena::create` can always be recovered this way.
        let root = Index::at(diskmap::store::layout::FIRST_ALLOC_OFFSET);
        (arena, root)
    } else {
        tracing::info!(path = %cli.path.display(), size = cli.initial_size, "creating new arena");
        let mut arena = Arena::create(&cli.path, cli.initial_size)?;
        let root = Index::create(&mut arena, 2, std::mem::size_of::<diskmap::Offset>() as u64)?;
        (arena, root)
    };

    let entries: &[(&str, &[&str])] = &[
        ("key0", &["val00", "val01"]),
        ("key1", &["val10"]),
        ("key2", &["val20", "val21", "val22"]),
    ];

    for (outer_key, values) in entries {
        let child = root.multimap_insert(&mut arena, outer_key.as_bytes(), 2, cli.payload_width)?;
        for value in *values {
            let (bucket, inserted) = child.insert(&mut arena, value.as_bytes())?;
            if inserted {
                tracing::info!(outer = outer_key, inner = value, "inserted");
            }
            let _ = bucket;
        }
    }

    arena.sync()?;

    for (bucket, key) in root.iter(&arena)? {
        let key = String::from_utf8_lossy(key).into_owned();
        let child = root.child_at(&arena, bucket)?;
        print!("{key}:");
        for (_, inner_key) in child.iter(&arena)? {
            print!(" {}", String::from_utf8_lossy(inner_key));
        }
        println!();
    }

    Ok(())
}
