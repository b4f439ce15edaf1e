//! Property-based testing for git-backup
//!
//! Uses proptest to check the path mapping and exclusion rules over random
//! paths, and revision counting over random save sequences against the
//! in-memory version-control client.

use ::git_backup::*;
use proptest::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate one path component without separators or dot-only names
fn component_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,10}",
        "dir[0-9]{1,3}",
        "[a-z]{1,6}\\.(txt|rs|md|log)",
        "[A-Za-z0-9 _\\-\\[\\]\\*\\?]{1,12}",
    ]
    .prop_filter("dot-only components are not names", |s| {
        s != "." && s != ".."
    })
}

/// Generate absolute paths with one to six components
fn absolute_path_strategy() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec(component_strategy(), 1..=6).prop_map(|parts| {
        let mut path = PathBuf::from("/");
        for part in parts {
            path.push(part);
        }
        path
    })
}

/// Generate a sequence of file contents to save
fn saves_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_mapping_round_trips(path in absolute_path_strategy()) {
        let relative = path_map::to_store_relative(&path).unwrap();
        prop_assert!(!relative.is_absolute());
        prop_assert_eq!(path_map::to_absolute(&relative), path.clone());

        let store = Path::new("/srv/store");
        let location = path_map::store_location(store, &path).unwrap();
        prop_assert!(location.starts_with(store));
        prop_assert_eq!(location.strip_prefix(store).unwrap(), relative.as_path());
    }

    #[test]
    fn prop_relative_paths_never_map(parts in prop::collection::vec(component_strategy(), 1..=4)) {
        let relative: PathBuf = parts.iter().collect();
        prop_assert!(!path_map::is_absolute(&relative));
        prop_assert_eq!(path_map::to_store_relative(&relative), None);
    }

    #[test]
    fn prop_parent_components_never_map(
        before in absolute_path_strategy(),
        after in prop::collection::vec(component_strategy(), 0..=3),
    ) {
        let mut path = before.join("..");
        for part in after {
            path.push(part);
        }
        prop_assert_eq!(path_map::to_store_relative(&path), None);
    }

    #[test]
    fn prop_exclusion_is_anchored(path in absolute_path_strategy()) {
        let text = path.to_string_lossy().into_owned();
        let exact = ExclusionFilter::new(&[regex::escape(&text)]).unwrap();
        prop_assert!(exact.is_excluded(&path));

        // A rule for the whole path never matches a longer path.
        let longer = path.join("child");
        prop_assert!(!exact.is_excluded(&longer));

        // Nor does a rule for a strict prefix of the path.
        let parent_rule = path.parent().map(|p| regex::escape(&p.to_string_lossy()));
        if let Some(rule) = parent_rule {
            let filter = ExclusionFilter::new(&[rule]).unwrap();
            prop_assert!(!filter.is_excluded(&path));
        }
    }

    #[test]
    fn prop_more_rules_exclude_more(
        path in absolute_path_strategy(),
        extra in "[a-z]{1,4}",
    ) {
        let base = vec![r".*\.log".to_string()];
        let mut more = base.clone();
        more.push(format!(".*{}.*", regex::escape(&extra)));

        let base_filter = ExclusionFilter::new(&base).unwrap();
        let more_filter = ExclusionFilter::new(&more).unwrap();
        if base_filter.is_excluded(&path) {
            prop_assert!(more_filter.is_excluded(&path));
        }
    }

    #[test]
    fn prop_every_save_is_a_revision(saves in saves_strategy()) {
        let home = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let backup = GitBackup::builder()
            .store_path(store.path().join("store"))
            .combine_policy(CombinePolicy::NeverAsk)
            .with_vcs(Arc::new(MemoryVcs::new()))
            .build()
            .unwrap();

        let path = home.path().join("notes.txt");
        for content in &saves {
            fs::write(&path, content).unwrap();
            prop_assert!(backup.backup(&path).unwrap());
        }

        let revisions = backup.list_revisions(&path).unwrap();
        prop_assert_eq!(revisions.len(), saves.len());
        for (revision, expected) in revisions.iter().zip(saves.iter().rev()) {
            let content = backup.fetch_content(&revision.id, &path).unwrap();
            prop_assert_eq!(content.as_ref(), Some(expected));
        }

        prop_assert_eq!(backup.combine(&path, true).unwrap(), CombineOutcome::Combined);
        let combined = backup.list_revisions(&path).unwrap();
        prop_assert_eq!(combined.len(), 1);
        let content = backup.fetch_content(&combined[0].id, &path).unwrap();
        prop_assert_eq!(content.as_ref(), saves.last());
    }
}
