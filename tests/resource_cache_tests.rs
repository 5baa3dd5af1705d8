//! Resource cache conservation tests: every released resource is either
//! parked in its bucket or genuinely freed, never both

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use memforge::backend::{HostBackend, NativeBackend};
use memforge::memory::{MemoryKind, Resource, ResourceCache};
use memforge::{Device, DeviceConfig, MemoryDesc};

/// Randomized acquire/release interleaving. Live handles never exceed
/// outstanding acquires, and backend-side allocation count always equals
/// live handles plus cached entries (conservation: parked XOR freed).
#[test]
fn randomized_acquire_release_conserves_resources() {
    let backend = Arc::new(HostBackend::new());
    let dyn_backend: Arc<dyn NativeBackend> = backend.clone();
    let mut cache = ResourceCache::new(1 << 22);
    let mut rng = StdRng::seed_from_u64(42);
    let mut live: Vec<Resource> = Vec::new();

    let baseline = backend.allocation_count();
    for _ in 0..1500 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let size = 1usize << rng.gen_range(8..14);
            let res = match cache.acquire(MemoryKind::Local, size) {
                Some(res) => res,
                None => Resource::alloc(&dyn_backend, MemoryKind::Local, size)
                    .expect("native allocation failed"),
            };
            assert!(res.size() >= size);
            live.push(res);
        } else {
            let idx = rng.gen_range(0..live.len());
            cache.release(live.swap_remove(idx));
        }

        let stats = cache.stats();
        assert_eq!(
            backend.allocation_count() - baseline,
            live.len() as u64 + stats.cached_count,
            "every resource is live or cached, never both or neither"
        );
    }

    drop(live);
    cache.clear();
    assert_eq!(backend.allocation_count(), baseline);
}

/// The byte ceiling is never exceeded, whatever the release order.
#[test]
fn ceiling_holds_under_random_release_sizes() {
    let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::new());
    let ceiling = 64 * 1024;
    let mut cache = ResourceCache::new(ceiling);
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..300 {
        let size = 1usize << rng.gen_range(8..15);
        let res =
            Resource::alloc(&backend, MemoryKind::Local, size).expect("native allocation failed");
        cache.release(res);
        assert!(cache.cache_size() <= ceiling);
    }
}

/// Under reported memory pressure the device trims the cache and frees
/// resources for real instead of parking them.
#[test]
fn device_drops_instead_of_caching_under_pressure() {
    // 64 KiB of local memory against the default 16 MiB headroom: the
    // backend always reports pressure.
    let backend = Arc::new(HostBackend::with_local_capacity(64 * 1024));
    let dev = Device::new(
        backend.clone(),
        DeviceConfig {
            heap_size: 4 * 1024,
            ..DeviceConfig::default()
        },
    )
    .expect("device creation failed");

    let desc = MemoryDesc::pooled(MemoryKind::Local, 4096);
    let res = dev.create_memory(&desc).expect("alloc");
    let before = backend.allocation_count();
    dev.free_memory(res).expect("free");
    assert_eq!(backend.allocation_count(), before - 1, "freed, not cached");
    assert_eq!(dev.cache_stats().expect("stats").cached_count, 0);
}

/// Without pressure the same sequence parks the resource for reuse.
#[test]
fn device_caches_when_headroom_allows() {
    let dev = Device::with_host_backend(DeviceConfig {
        heap_size: 4 * 1024,
        cache_headroom: 0,
        ..DeviceConfig::default()
    })
    .expect("device creation failed");

    let desc = MemoryDesc::pooled(MemoryKind::Local, 4096);
    let res = dev.create_memory(&desc).expect("alloc");
    dev.free_memory(res).expect("free");
    assert_eq!(dev.cache_stats().expect("stats").cached_count, 1);

    let reused = dev.create_memory(&desc).expect("reuse");
    assert_eq!(dev.cache_stats().expect("stats").hits, 1);
    drop(reused);
}
