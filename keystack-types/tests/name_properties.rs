//! Property-based tests for key names.

use keystack_types::{KeyName, Namespace};
use proptest::prelude::*;

fn namespace_strategy() -> impl Strategy<Value = Namespace> {
    prop_oneof![
        Just(Namespace::Cascading),
        Just(Namespace::Spec),
        Just(Namespace::Proc),
        Just(Namespace::Dir),
        Just(Namespace::User),
        Just(Namespace::System),
    ]
}

fn segments_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9#_]{1,8}", 0..6)
}

fn build(ns: Namespace, segments: &[String]) -> KeyName {
    let mut name = KeyName::root(ns);
    for s in segments {
        name.add_base_name(s);
    }
    name
}

proptest! {
    /// Display then parse yields the same name.
    #[test]
    fn display_parse_roundtrip(ns in namespace_strategy(), segments in segments_strategy()) {
        let name = build(ns, &segments);
        let reparsed = KeyName::parse(&name.to_string()).unwrap();
        prop_assert_eq!(reparsed, name);
    }

    /// A name with an extra segment is below its prefix, never the reverse.
    #[test]
    fn child_is_below_parent(
        ns in namespace_strategy(),
        segments in segments_strategy(),
        extra in "[a-z]{1,6}",
    ) {
        let parent = build(ns, &segments);
        let child = parent.join(&extra);
        prop_assert!(child.is_below(&parent));
        prop_assert!(child.is_directly_below(&parent));
        prop_assert!(!parent.is_below(&child));
        prop_assert!(!parent.is_below(&parent));
        prop_assert!(parent.is_below_or_same(&parent));
    }

    /// Names in different namespaces are never below each other.
    #[test]
    fn namespaces_do_not_nest(segments in segments_strategy(), extra in "[a-z]{1,6}") {
        let user = build(Namespace::User, &segments);
        let system_child = build(Namespace::System, &segments).join(&extra);
        prop_assert!(!system_child.is_below(&user));
        prop_assert_eq!(system_child.to_cascading().parent().unwrap(), user.to_cascading());
    }
}
