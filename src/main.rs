use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use burrow::buffer::BufferPoolManager;
use burrow::common::{IndexConfig, DEFAULT_BUFFER_POOL_SIZE};
use burrow::index::{BPlusTree, IntegerComparator};
use burrow::storage::disk::DiskManager;
use burrow::{PageId, RowId};

fn main() -> burrow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_path = std::env::temp_dir().join("burrow-demo.db");
    std::fs::remove_file(&db_path).ok();

    let disk_manager = Arc::new(DiskManager::new(&db_path)?);
    let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE * 4, disk_manager));

    // Small nodes so a few hundred keys build a multi-level tree.
    let config = IndexConfig::new(4)
        .with_leaf_max_size(8)
        .with_internal_max_size(8);
    let mut tree = BPlusTree::new(1, Arc::clone(&bpm), IntegerComparator, config)?;

    for k in 0..500u32 {
        let key = (k * 7919 % 500).to_le_bytes();
        tree.insert(&key, RowId::new(PageId::new(k / 16), k % 16))?;
    }
    tree.check_integrity()?;
    info!(root = %tree.root_page_id(), "inserted 500 keys");

    let hits = tree.range_scan(&100u32.to_le_bytes(), &109u32.to_le_bytes())?;
    for (key, rid) in &hits {
        let key = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
        info!(key, %rid, "range hit");
    }

    for k in (0..500u32).step_by(2) {
        tree.remove(&k.to_le_bytes())?;
    }
    tree.check_integrity()?;
    let remaining = tree.begin()?.count();
    info!(remaining, "removed even keys");

    tree.destroy()?;
    bpm.flush_all_pages()?;
    info!(
        allocated = bpm.disk_manager().num_allocated_pages(),
        "destroyed index"
    );

    drop(tree);
    drop(bpm);
    std::fs::remove_file(&db_path).ok();
    Ok(())
}
