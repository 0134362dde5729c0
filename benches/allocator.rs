#![feature(test)]
extern crate bucketalloc;
extern crate test;
#[macro_use]
extern crate trackable;

use bucketalloc::block::{BlockAllocator, UnitSize};
use bucketalloc::chunk::HeapChunkSource;
use bucketalloc::manager::BucketManagerBuilder;
use std::ptr::NonNull;
use test::Bencher;

#[bench]
fn block_allocate_and_free(b: &mut Bencher) {
    let mut buf = vec![0; 1024 * 1024];
    let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
    let unit = track_try_unwrap!(UnitSize::new(36));
    let mut allocator = track_try_unwrap!(unsafe { BlockAllocator::new(ptr, buf.len(), unit) });
    b.iter(|| {
        let p = allocator.allocate(32).unwrap();
        assert!(allocator.free(p.as_ptr()));
    });
}

#[bench]
fn manager_allocate_and_free_small(b: &mut Bencher) {
    let manager = track_try_unwrap!(BucketManagerBuilder::new().build(HeapChunkSource::new()));
    b.iter(|| {
        let p = manager.allocate(24).unwrap();
        assert!(manager.free(p.as_ptr()));
    });
}

#[bench]
fn manager_allocate_and_free_large(b: &mut Bencher) {
    let manager = track_try_unwrap!(BucketManagerBuilder::new().build(HeapChunkSource::new()));
    b.iter(|| {
        let p = manager.allocate(100_000).unwrap();
        assert!(manager.free(p.as_ptr()));
    });
}

#[bench]
fn manager_restricted_allocate_and_free(b: &mut Bencher) {
    let manager = track_try_unwrap!(BucketManagerBuilder::new().build(HeapChunkSource::new()));
    let restricted = manager.restricted();
    b.iter(|| {
        let p = restricted.allocate(200).unwrap();
        assert!(restricted.free(p.as_ptr()));
    });
}

#[bench]
fn manager_free_with_many_buckets(b: &mut Bencher) {
    let manager = track_try_unwrap!(BucketManagerBuilder::new()
        .initial_size(32 * 1024 * 1024)
        .build(HeapChunkSource::new()));
    let mut live = Vec::new();
    for i in 1..2000 {
        live.push(manager.allocate(i * 13 % 9000 + 1).unwrap());
    }
    b.iter(|| {
        let p = manager.allocate(8).unwrap();
        assert!(manager.free(p.as_ptr()));
    });
    for p in live {
        assert!(manager.free(p.as_ptr()));
    }
}
