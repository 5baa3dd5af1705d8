//! Heap integrity tests: randomized alloc/free with overlap checking,
//! growth-or-fail behavior at the device level

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use memforge::backend::{HostBackend, NativeBackend};
use memforge::memory::Heap;
use memforge::{Device, DeviceConfig, MemoryKind};

fn host_heap(size: usize) -> Heap {
    let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::new());
    Heap::new(&backend, size).expect("heap creation failed")
}

/// Live blocks must never overlap and accounting must stay exact, for any
/// interleaving of allocs and frees.
#[test]
fn randomized_alloc_free_never_overlaps() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let heap_size = 256 * 1024;
    let mut heap = host_heap(heap_size);
    let mut live = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || (rng.gen_bool(0.6) && heap.free_bytes() > 0) {
            let size = rng.gen_range(1..=8 * 1024);
            if let Some(block) = heap.alloc_block(size) {
                assert!(block.size() >= size);
                live.push(block);
            }
        } else {
            let idx = rng.gen_range(0..live.len());
            heap.release(live.swap_remove(idx));
        }

        // No two live blocks overlap.
        let mut ranges: Vec<(usize, usize)> = live
            .iter()
            .map(|b| (b.offset(), b.offset() + b.size()))
            .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "blocks overlap: {:?} vs {:?}",
                pair[0],
                pair[1]
            );
        }

        // Live + free partitions the heap exactly.
        let live_bytes: usize = live.iter().map(|b| b.size()).sum();
        assert_eq!(live_bytes, heap.allocated_bytes());
        assert_eq!(live_bytes + heap.free_bytes(), heap.size());
    }

    for block in live {
        heap.release(block);
    }
    assert_eq!(heap.free_bytes(), heap.size());
    assert_eq!(heap.fragment_count(), 1, "full coalescing after all frees");
}

/// Filling the heap completely and draining it must end in one free region.
#[test]
fn fill_and_drain_coalesces_fully() {
    let mut heap = host_heap(64 * 1024);
    let mut blocks = Vec::new();
    while let Some(block) = heap.alloc_block(4 * 1024) {
        blocks.push(block);
    }
    assert_eq!(blocks.len(), 16);
    assert_eq!(heap.free_bytes(), 0);

    // Free even-indexed blocks first: 8 isolated holes, no merging yet.
    let (evens, odds): (Vec<_>, Vec<_>) = {
        let mut evens = Vec::new();
        let mut odds = Vec::new();
        for (i, b) in blocks.into_iter().enumerate() {
            if i % 2 == 0 {
                evens.push(b);
            } else {
                odds.push(b);
            }
        }
        (evens, odds)
    };
    for block in evens {
        heap.release(block);
    }
    assert_eq!(heap.fragment_count(), 8);

    // Freeing the odd blocks merges both neighbors each time.
    for block in odds {
        heap.release(block);
    }
    assert_eq!(heap.free_bytes(), heap.size());
    assert_eq!(heap.fragment_count(), 1);
}

/// A request exceeding free space at the device level grows the heap or
/// reports failure, never hands out overlapping blocks.
#[test]
fn device_grows_heap_instead_of_failing() {
    let dev = Device::with_host_backend(DeviceConfig {
        heap_size: 32 * 1024,
        ..DeviceConfig::default()
    })
    .expect("device creation failed");

    let a = dev.alloc_heap_block(24 * 1024).expect("first block");
    let b = dev.alloc_heap_block(24 * 1024).expect("growth block");
    assert!(dev.heap_size().expect("heap size") >= 48 * 1024);

    let va = dev.heap_view(&a).expect("view a");
    let vb = dev.heap_view(&b).expect("view b");
    let (a_start, a_end) = (a.offset(), a.offset() + a.size());
    let (b_start, b_end) = (b.offset(), b.offset() + b.size());
    assert!(a_end <= b_start || b_end <= a_start, "blocks overlap");

    // Views address disjoint data: writes through one never show in the other.
    va.write_from_host(0, &[0x11; 1024]).expect("write a");
    vb.write_from_host(0, &[0x22; 1024]).expect("write b");
    let mut out = [0u8; 1024];
    va.read_to_host(0, &mut out).expect("read a");
    assert_eq!(out, [0x11; 1024]);

    dev.release_heap_block(a).expect("release a");
    dev.release_heap_block(b).expect("release b");
}

/// When neither local nor remote memory can back a grown heap, allocation
/// reports failure and the existing heap keeps working.
#[test]
fn growth_failure_is_recoverable() {
    let mut heap = {
        let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::with_local_capacity(64 * 1024));
        Heap::new(&backend, 32 * 1024).expect("heap creation failed")
    };

    let block = heap.alloc_block(8 * 1024).expect("initial block");
    assert!(heap.realloc(48 * 1024, false).is_err(), "exceeds capacity");

    // The old heap is intact: data written before the failed growth reads
    // back, and further allocation works.
    heap.block_view(&block)
        .expect("view")
        .write_from_host(0, &[9u8; 64])
        .expect("write");
    let mut out = [0u8; 64];
    heap.block_view(&block)
        .expect("view")
        .read_to_host(0, &mut out)
        .expect("read");
    assert_eq!(out, [9u8; 64]);
    assert!(heap.alloc_block(1024).is_some());
}

/// Heap-block views pin the heap resource kind they were created from.
#[test]
fn heap_views_report_backing_kind() {
    let dev = Device::with_host_backend(DeviceConfig {
        heap_size: 16 * 1024,
        ..DeviceConfig::default()
    })
    .expect("device creation failed");

    let block = dev.alloc_heap_block(4096).expect("block");
    let view = dev.heap_view(&block).expect("view");
    assert_eq!(view.kind(), MemoryKind::Local);
    assert!(view.is_view());
    dev.release_heap_block(block).expect("release");
}
