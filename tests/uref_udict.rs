//! Record and dictionary integration: insertion order, attribute
//! copy-on-write across duplicates, clock derivations.

use upipe::udict::{UdictMgr, UdictType, UdictValue};
use upipe::uref::{UrefFlags, UrefMgr};

#[test]
fn iteration_order_survives_dup() {
    let mgr = UdictMgr::new();
    let mut dict = mgr.alloc();
    for name in ["gamma", "alpha", "delta", "beta"] {
        dict.set(name, UdictValue::String(name.to_uppercase())).unwrap();
    }
    dict.delete("alpha");
    dict.set("alpha", UdictValue::Void).unwrap();

    let copy = dict.dup();
    let order: Vec<_> = dict.iter().map(|e| e.key.name().to_owned()).collect();
    let copied: Vec<_> = copy.iter().map(|e| e.key.name().to_owned()).collect();
    assert_eq!(order, ["gamma", "delta", "beta", "alpha"]);
    assert_eq!(order, copied);
}

#[test]
fn attribute_set_on_dup_leaves_original_untouched() {
    let mgr = UrefMgr::default();
    let mut uref = mgr.alloc();
    uref.set_flow_def("block.mpegts.").unwrap();
    uref.set_flow_id(7).unwrap();

    let mut copy = uref.dup();
    copy.set_flow_id(8).unwrap();
    copy.set_attr("x.extra", UdictValue::Bool(true)).unwrap();

    assert_eq!(uref.flow_id().unwrap(), Some(7));
    assert_eq!(copy.flow_id().unwrap(), Some(8));
    assert_eq!(uref.attr("x.extra", UdictType::Bool).unwrap(), None);
}

#[test]
fn clock_sub_record_derivations() {
    let mgr = UrefMgr::default();
    let mut uref = mgr.alloc();
    uref.set_dts_prog(90_000);
    uref.set_dts_pts_delay(3_600);
    uref.set_cr_dts_delay(1_800);
    uref.set_duration(1_500);

    assert_eq!(uref.dts_prog(), Some(90_000));
    assert_eq!(uref.pts_prog(), Some(93_600));
    assert_eq!(uref.cr_prog(), Some(88_200));

    let copy = uref.dup();
    assert_eq!(copy.pts_prog(), Some(93_600));
    assert_eq!(copy.duration(), Some(1_500));
}

#[test]
fn flags_travel_with_the_record() {
    let mgr = UrefMgr::default();
    let mut uref = mgr.alloc();
    uref.set_flags(UrefFlags::RANDOM_ACCESS | UrefFlags::FLOW_START);
    let copy = uref.dup();
    assert!(copy.flags().contains(UrefFlags::RANDOM_ACCESS));
    assert!(!copy.flags().contains(UrefFlags::DISCONTINUITY));
}

#[test]
fn wrong_type_lookup_is_an_error_not_a_miss() {
    let mgr = UrefMgr::default();
    let mut uref = mgr.alloc();
    uref.set_flow_def("sound.s16.").unwrap();
    assert!(uref.attr("flow.def", UdictType::Unsigned).is_err());
}
