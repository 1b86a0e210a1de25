//! Block buffer integration: copy-on-write, views, round-trip laws.

use upipe::ubuf::{UbufBlock, UbufBlockMgr};
use upipe::umem::UmemMgr;

fn mgr() -> UbufBlockMgr {
    UbufBlockMgr::new(UmemMgr::new())
}

fn fill_indexed(block: &mut UbufBlock) {
    let size = block.size();
    let mut done = 0;
    while done < size {
        let mut map = block.write(done, size - done).unwrap();
        let len = map.len();
        for (i, byte) in map.iter_mut().enumerate() {
            *byte = (done + i) as u8;
        }
        done += len;
    }
}

fn contents(block: &UbufBlock) -> Vec<u8> {
    let mut out = vec![0u8; block.size()];
    block.extract(0, &mut out).unwrap();
    out
}

#[test]
fn write_then_dup_then_write_preserves_the_dup() {
    let mut block = mgr().alloc(32);
    fill_indexed(&mut block);

    let dup = block.dup();
    {
        let mut map = block.write(0, 1).unwrap();
        map[0] = 0xab;
    }

    assert_eq!(block.read(0, 1).unwrap()[0], 0xab);
    // The duplicate saw none of it: the write detached the substrate.
    assert_eq!(dup.read(0, 1).unwrap()[0], 0);
    assert_eq!(contents(&dup)[1..], contents(&block)[1..]);
}

#[test]
fn resize_round_trip_restores_bytes_and_size() {
    let mut block = mgr().alloc(64);
    fill_indexed(&mut block);
    let reference = contents(&block);

    block.resize(16, 24).unwrap();
    assert_eq!(block.size(), 104);
    block.resize(-16, -24).unwrap();

    assert_eq!(block.size(), 64);
    assert_eq!(contents(&block), reference);
}

#[test]
fn splice_views_share_without_copying() {
    let mut block = mgr().alloc(188);
    fill_indexed(&mut block);

    let view = block.splice(100, 20).unwrap();
    assert_eq!(view.size(), 20);
    assert_eq!(view.read(0, 1).unwrap()[0], 100);

    // Writing through the view detaches only the view.
    let mut view = view;
    view.write(0, 1).unwrap()[0] = 0xff;
    assert_eq!(block.read(100, 1).unwrap()[0], 100);
}

#[test]
fn insert_append_delete_compose() {
    let mgr = mgr();
    let mut block = mgr.alloc_from(b"heword");
    block.insert(2, mgr.alloc_from(b"llo ")).unwrap();
    assert_eq!(contents(&block), b"hello word");
    block.append(mgr.alloc_from(b"!")).unwrap();
    block.delete(9, 1).unwrap();
    assert_eq!(contents(&block), b"hello wor!");
}

#[test]
fn reads_are_segment_granular_and_loop_covers_all() {
    let mgr = mgr();
    let mut block = mgr.alloc_from(&[1, 2, 3]);
    block.append(mgr.alloc_from(&[4, 5])).unwrap();

    let first = block.read(0, 5).unwrap();
    assert_eq!(&*first, &[1, 2, 3]);
    drop(first);
    let second = block.read(3, 2).unwrap();
    assert_eq!(&*second, &[4, 5]);
}

#[test]
fn concurrent_read_maps_are_shared() {
    let mut block = mgr().alloc(16);
    fill_indexed(&mut block);
    let a = block.read(0, 8).unwrap();
    let b = block.read(4, 4).unwrap();
    assert_eq!(a[4], b[0]);
}
