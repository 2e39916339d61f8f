use crate::config::SegmentConf;
use crate::segment::{Segment, SegmentId};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small blocks and pages, no automatic maintenance.
pub fn manual_conf() -> SegmentConf {
    init_tracing();
    SegmentConf {
        max_keys_in_delta_cache: 1_000_000,
        max_keys_in_delta_cache_during_writing: 2_000_000,
        max_unflushed_keys: 1_000_000,
        max_keys_in_page: 4,
        block_size: 256,
        io_buffer_size: 1024,
        ..SegmentConf::default()
    }
}

/// Thresholds low enough that a few dozen writes flush and compact.
pub fn eager_conf() -> SegmentConf {
    SegmentConf {
        max_keys_in_delta_cache: 20,
        max_keys_in_delta_cache_during_writing: 40,
        max_unflushed_keys: 5,
        ..manual_conf()
    }
}

pub type StrSegment = Segment<u32, String>;

pub fn open(root: &Path, conf: SegmentConf) -> Arc<StrSegment> {
    Segment::open(root, SegmentId(1), conf, None).unwrap()
}

pub fn value(i: u32) -> String {
    format!("value-{i:04}")
}

pub fn collect(segment: &StrSegment) -> Vec<(u32, String)> {
    segment
        .iter()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}
