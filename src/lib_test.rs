use std::collections::{BTreeMap, BTreeSet};

use assert_matches::assert_matches;

use crate::merge::{IdentityAliases, PathAliases};
use crate::test_utils::get_test_storage;
use crate::CoverageError;

fn lines(pairs: impl IntoIterator<Item = (&'static str, Vec<u32>)>) -> BTreeMap<String, BTreeSet<u32>> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.into_iter().collect())).collect()
}

fn arcs(
    pairs: impl IntoIterator<Item = (&'static str, Vec<(i64, i64)>)>,
) -> BTreeMap<String, BTreeSet<(i64, i64)>> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.into_iter().collect())).collect()
}

#[test]
fn round_trip_lines() {
    let (mut data, _dir) = get_test_storage().unwrap();
    data.add_lines(&lines([("a.py", vec![1, 2, 5])])).unwrap();

    assert_eq!(data.measured_files().unwrap(), BTreeSet::from(["a.py".to_string()]));
    assert!(!data.has_arcs().unwrap());
    let mut got = data.lines("a.py").unwrap().unwrap();
    got.sort_unstable();
    assert_eq!(got, vec![1, 2, 5]);
}

#[test]
fn context_split() {
    let (mut data, _dir) = get_test_storage().unwrap();
    data.set_context(Some("t1")).unwrap();
    data.add_lines(&lines([("a.py", vec![1, 2])])).unwrap();
    data.set_context(Some("t2")).unwrap();
    data.add_lines(&lines([("a.py", vec![2, 3])])).unwrap();

    let mut all = data.lines("a.py").unwrap().unwrap();
    all.sort_unstable();
    assert_eq!(all, vec![1, 2, 3]);

    data.set_query_context("t1").unwrap();
    let mut t1_only = data.lines("a.py").unwrap().unwrap();
    t1_only.sort_unstable();
    assert_eq!(t1_only, vec![1, 2]);

    let contexts = data.measured_contexts().unwrap();
    assert!(contexts.contains("t1"));
    assert!(contexts.contains("t2"));
}

#[test]
fn arc_idempotence() {
    let (mut data, _dir) = get_test_storage().unwrap();
    let pairs = arcs([("a.py", vec![(1, 2), (2, -2)])]);
    data.add_arcs(&pairs).unwrap();
    data.add_arcs(&pairs).unwrap();

    let mut got = data.arcs("a.py").unwrap().unwrap();
    got.sort_unstable();
    assert_eq!(got, vec![(1, 2), (2, -2)]);
}

#[test]
fn mode_conflict_is_rejected() {
    let (mut data, _dir) = get_test_storage().unwrap();
    data.add_lines(&lines([("a.py", vec![1])])).unwrap();
    let err = data.add_arcs(&arcs([("a.py", vec![(1, 2)])])).unwrap_err();
    assert_matches!(err, CoverageError::MixedMode { .. });
}

#[test]
fn merge_with_alias() {
    let (mut dest, _dir_dest) = get_test_storage().unwrap();
    let (mut other, _dir_other) = get_test_storage().unwrap();

    dest.add_lines(&lines([("/build/a.py", vec![1, 2])])).unwrap();
    other.add_lines(&lines([("/ci/a.py", vec![2, 3])])).unwrap();

    struct CiToBuild;
    impl PathAliases for CiToBuild {
        fn map(&self, path: &str) -> String {
            path.replacen("/ci/", "/build/", 1)
        }
    }

    dest.update(&mut other, &CiToBuild).unwrap();

    let mut got = dest.lines("/build/a.py").unwrap().unwrap();
    got.sort_unstable();
    assert_eq!(got, vec![1, 2, 3]);
}

#[test]
fn merge_identity_aliases_is_a_plain_union() {
    let (mut dest, _dir_dest) = get_test_storage().unwrap();
    let (mut other, _dir_other) = get_test_storage().unwrap();

    dest.add_arcs(&arcs([("a.py", vec![(1, 2)])])).unwrap();
    other.add_arcs(&arcs([("a.py", vec![(2, 3)])])).unwrap();

    dest.update(&mut other, &IdentityAliases).unwrap();

    let mut got = dest.arcs("a.py").unwrap().unwrap();
    got.sort_unstable();
    assert_eq!(got, vec![(1, 2), (2, 3)]);
}

#[test]
fn tracer_conflict_on_merge() {
    let (mut dest, _dir_dest) = get_test_storage().unwrap();
    let (mut other, _dir_other) = get_test_storage().unwrap();

    dest.add_lines(&lines([("a.py", vec![1])])).unwrap();
    dest.add_file_tracers(&BTreeMap::from([("a.py".to_string(), "plug1".to_string())])).unwrap();

    other.add_lines(&lines([("a.py", vec![1])])).unwrap();
    other.add_file_tracers(&BTreeMap::from([("a.py".to_string(), "plug2".to_string())])).unwrap();

    let err = dest.update(&mut other, &IdentityAliases).unwrap_err();
    assert_matches!(err, CoverageError::TracerConflict { .. });
}

#[test]
fn blob_round_trip() {
    let (mut d1, _dir1) = get_test_storage().unwrap();
    d1.add_lines(&lines([("a.py", vec![1, 2, 5])])).unwrap();
    d1.set_context(Some("t1")).unwrap();
    d1.add_lines(&lines([("b.py", vec![3])])).unwrap();

    let blob = d1.dumps().unwrap();

    let (mut d2, _dir2) = get_test_storage().unwrap();
    d2.loads(&blob).unwrap();

    assert_eq!(d2.measured_files().unwrap(), d1.measured_files().unwrap());
    assert_eq!(d2.measured_contexts().unwrap(), d1.measured_contexts().unwrap());
    assert_eq!(d2.has_arcs().unwrap(), d1.has_arcs().unwrap());
    let mut a = d2.lines("a.py").unwrap().unwrap();
    a.sort_unstable();
    assert_eq!(a, vec![1, 2, 5]);
}

#[test]
fn touch_files_before_any_mode_is_empty_mode() {
    let (mut data, _dir) = get_test_storage().unwrap();
    let err = data.touch_files(&["a.py".to_string()], "").unwrap_err();
    assert_matches!(err, CoverageError::EmptyMode);
}

#[test]
fn unknown_file_tracer_is_rejected() {
    let (mut data, _dir) = get_test_storage().unwrap();
    let err = data
        .add_file_tracers(&BTreeMap::from([("nope.py".to_string(), "plug".to_string())]))
        .unwrap_err();
    assert_matches!(err, CoverageError::UnknownFile { .. });
}

#[test]
fn erase_removes_the_backing_file() {
    let (mut data, _dir) = get_test_storage().unwrap();
    data.add_lines(&lines([("a.py", vec![1])])).unwrap();
    let path = data.lines("a.py").unwrap(); // keep the handle alive through the write above
    assert!(path.is_some());
    data.erase(false).unwrap();
}
