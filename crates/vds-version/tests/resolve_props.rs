//! Property tests for version resolution

use proptest::prelude::*;
use vds_version::{candidates, resolve_version, ResolveError, Version, VersionRequest};

fn version() -> impl Strategy<Value = Version> {
    (0u64..4, 0u64..4, 0u64..4).prop_map(|(a, b, c)| Version::new(a, b, c))
}

fn request() -> impl Strategy<Value = VersionRequest> {
    prop_oneof![
        Just(VersionRequest::Any),
        Just(VersionRequest::Latest),
        (0u64..4, 0u64..4, 0u64..4).prop_map(|(a, b, c)| {
            format!("{a}.{b}.{c}").parse().unwrap()
        }),
        (0u64..4, 0u64..4).prop_map(|(a, b)| format!("{a}.{b}.*").parse().unwrap()),
        (0u64..4).prop_map(|a| format!("{a}.*.*").parse().unwrap()),
    ]
}

proptest! {
    #[test]
    fn resolution_returns_a_matching_candidate(
        canonical in version(),
        supported in prop::collection::vec(version(), 0..5),
        request in request(),
    ) {
        let all = candidates(&canonical, &supported);
        match resolve_version("ds", Some(&canonical), &supported, &request) {
            Ok(picked) => {
                prop_assert!(all.contains(&picked));
                prop_assert!(picked.matches(&request));
            }
            Err(ResolveError::NoMatch { available, .. }) => {
                prop_assert!(!all.iter().any(|v| v.matches(&request)));
                let declared: Vec<String> = all.iter().map(ToString::to_string).collect();
                prop_assert_eq!(available, declared);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn latest_is_maximum(
        canonical in version(),
        supported in prop::collection::vec(version(), 0..5),
    ) {
        let picked = resolve_version("ds", Some(&canonical), &supported, &VersionRequest::Latest)
            .unwrap();
        let max = candidates(&canonical, &supported).into_iter().max().unwrap();
        prop_assert_eq!(picked, max);
    }

    #[test]
    fn no_request_is_canonical(
        canonical in version(),
        supported in prop::collection::vec(version(), 0..5),
    ) {
        let picked = resolve_version("ds", Some(&canonical), &supported, &VersionRequest::Any)
            .unwrap();
        prop_assert_eq!(picked, canonical);
    }
}
