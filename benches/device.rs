#![feature(test)]
extern crate fibers_global;
extern crate soheap;
extern crate test;
#[macro_use]
extern crate trackable;

use fibers_global::execute;
use soheap::device::DeviceBuilder;
use soheap::heap::HeapBuilder;
use soheap::nvm::MemoryNvm;
use test::Bencher;

#[bench]
fn memory_malloc_small(b: &mut Bencher) {
    let nvm = MemoryNvm::with_capacity(1024 * 1024 * 1024);
    let heap = track_try_unwrap!(HeapBuilder::new().create(nvm));
    let device = DeviceBuilder::new().spawn(|| Ok(heap));
    let d = device.handle();
    let _ = execute(d.request().wait_for_running().status()); // デバイスの起動を待機

    b.iter(|| {
        track_try_unwrap!(execute(d.request().malloc(16)));
    });
}

#[bench]
fn memory_malloc_write_and_free_small(b: &mut Bencher) {
    let nvm = MemoryNvm::with_capacity(1024 * 1024);
    let heap = track_try_unwrap!(HeapBuilder::new().create(nvm));
    let device = DeviceBuilder::new().spawn(|| Ok(heap));
    let d = device.handle();
    let _ = execute(d.request().wait_for_running().status()); // デバイスの起動を待機

    b.iter(|| {
        let a = track_try_unwrap!(execute(d.request().malloc(3))).unwrap();
        track_try_unwrap!(execute(d.request().write(a, 0, b"foo".to_vec())));
        track_try_unwrap!(execute(d.request().free(a)));
    });
}
