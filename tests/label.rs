//! Label compose/parse round trip at the public crate API (spec.md §3
//! `label = (prefix+"/")? + name + ("+"+suffix)?`).

use fadroma_core::Label;

#[test]
fn full_label_round_trips() {
    let label = Label::new(Some("testnet".into()), "my-token".into(), Some("2".into()));
    let composed = label.compose().unwrap();
    assert_eq!(composed, "testnet/my-token+2");
    assert_eq!(Label::parse(&composed), label);
}

#[test]
fn prefix_only_and_suffix_only_round_trip() {
    let prefix_only = Label::new(Some("testnet".into()), "my-token".into(), None);
    assert_eq!(Label::parse(&prefix_only.compose().unwrap()), prefix_only);

    let suffix_only = Label::new(None, "my-token".into(), Some("3".into()));
    assert_eq!(Label::parse(&suffix_only.compose().unwrap()), suffix_only);
}

#[test]
fn embedded_separators_in_name_are_rejected() {
    assert!(Label::new(None, "a/b".into(), None).compose().is_err());
    assert!(Label::new(None, "a+b".into(), None).compose().is_err());
}
