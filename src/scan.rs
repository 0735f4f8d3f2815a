//! Ingestion pipeline orchestration.
//!
//! Coordinates one catalog run: snapshot load → walk and decide →
//! apply writes → tag sync → summary. Only an inaccessible root aborts
//! the run. Per-path and per-key failures are recorded and skipped.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::grouper::{ClipWalk, WalkEvent, WalkOptions};
use crate::metadata_sync::MetadataSync;
use crate::migrate;
use crate::models::ClipGroup;
use crate::progress::{ScanProgressEvent, ScanProgressReporter};
use crate::reconcile::{apply_decision, Decision, Reconciler, RetryPolicy};
use crate::report::{RunPhase, RunReport, RunSummary};
use crate::store::{CatalogSnapshot, CatalogStore, InMemoryCatalog, SqliteCatalog};
use crate::tag_extract::{LoftyExtractor, TagExtractor};

/// Emit a progress event every this many items.
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub walk: WalkOptions,
    /// Re-extract tags for every clip on disk, not just new or moved ones.
    pub rescan_tags: bool,
    /// Compute and report decisions without writing.
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

impl ScanOptions {
    pub fn from_config(
        config: &Config,
        root: Option<PathBuf>,
        rescan_tags: bool,
        dry_run: bool,
    ) -> Result<Self> {
        let root = root.or_else(|| config.scan.root.clone()).ok_or_else(|| {
            anyhow::anyhow!("No clip root given: pass ROOT or set scan.root in the config")
        })?;

        Ok(Self {
            root,
            walk: WalkOptions {
                follow_symlinks: config.scan.follow_symlinks,
                exclude: config.scan.exclude_set()?,
            },
            rescan_tags,
            dry_run,
            retry: RetryPolicy::from(&config.sync),
        })
    }
}

/// CLI entry point: open the configured database and run a scan against it.
///
/// A dry run opens the database read-only and never creates it. A catalog
/// that does not exist yet is treated as empty.
pub async fn run_scan_command(
    config: &Config,
    options: &ScanOptions,
    progress: &dyn ScanProgressReporter,
) -> Result<RunSummary> {
    let extractor = LoftyExtractor::new();

    if options.dry_run {
        let Some(pool) = db::connect_read_only(config).await? else {
            tracing::info!(db = %config.db.path.display(), "no catalog yet; dry run against an empty one");
            return run_scan(&InMemoryCatalog::new(), &extractor, options, progress).await;
        };
        let result = match migrate::has_schema(&pool).await {
            Ok(true) => run_scan(&SqliteCatalog::new(pool.clone()), &extractor, options, progress).await,
            Ok(false) => run_scan(&InMemoryCatalog::new(), &extractor, options, progress).await,
            Err(e) => Err(e),
        };
        pool.close().await;
        return result;
    }

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteCatalog::new(pool.clone());

    let result = run_scan(&store, &extractor, options, progress).await;
    pool.close().await;
    result
}

/// Drain the walk, deciding each group as it arrives. Deletes are appended
/// only once the iterator is exhausted.
fn walk_and_decide(
    walk: &mut ClipWalk,
    mut reconciler: Reconciler,
    report: &mut RunReport,
    progress: &dyn ScanProgressReporter,
) -> Vec<Decision> {
    let mut decisions: Vec<Decision> = Vec::new();
    while let Some(event) = walk.next() {
        match event {
            WalkEvent::Group(group) => {
                decisions.push(reconciler.decide(group));
                if decisions.len() as u64 % PROGRESS_EVERY == 0 {
                    progress.report(ScanProgressEvent::Walking {
                        dirs: walk.dirs_visited(),
                        clips: decisions.len() as u64,
                    });
                }
            }
            WalkEvent::Skipped(path) => report.record_skipped(&path),
            WalkEvent::Error(err) => report.record_error(&err, None),
        }
    }
    report.record_dirs_visited(walk.dirs_visited());
    progress.report(ScanProgressEvent::Walking {
        dirs: walk.dirs_visited(),
        clips: decisions.len() as u64,
    });

    // The walk is exhausted: deletions are safe to decide now.
    let finish = reconciler.finish(&walk.coverage());
    report.record_deferred(finish.deferred.len());
    decisions.extend(finish.deletes);
    decisions
}

/// Make the catalog in `store` converge to the clips under `options.root`.
///
/// Returns `Err` only for a fatal condition: the catalog cannot be loaded,
/// or the root is inaccessible (a [`CatalogError::FatalRoot`]).
///
/// [`CatalogError::FatalRoot`]: crate::error::CatalogError::FatalRoot
pub async fn run_scan(
    store: &dyn CatalogStore,
    extractor: &dyn TagExtractor,
    options: &ScanOptions,
    progress: &dyn ScanProgressReporter,
) -> Result<RunSummary> {
    let mut report = RunReport::new(&options.root, options.dry_run);

    let snapshot = CatalogSnapshot::load(store)
        .await
        .context("Failed to load catalog")?;
    tracing::info!(clips = snapshot.len(), root = %options.root.display(), "catalog loaded");

    // Walking: pure decisions only, no writes until the walk is complete.
    report.enter(RunPhase::Walking);
    let mut walk = match ClipWalk::open(&options.root, options.walk.clone()) {
        Ok(walk) => walk,
        Err(err) => {
            report.enter(RunPhase::Aborted);
            tracing::error!("{}", err);
            return Err(err.into());
        }
    };

    let decisions = walk_and_decide(&mut walk, Reconciler::new(snapshot), &mut report, progress);
    drop(walk);

    report.enter(RunPhase::Reconciling);
    let total = decisions.len() as u64;
    let mut tag_jobs: Vec<(Option<i64>, ClipGroup)> = Vec::new();
    for (i, decision) in decisions.into_iter().enumerate() {
        let settled = if options.dry_run {
            Ok(match &decision {
                Decision::Insert(_) | Decision::Delete(_) => None,
                Decision::UpdateFormats { clip, .. } | Decision::NoChange { clip, .. } => {
                    Some(clip.id)
                }
            })
        } else {
            apply_decision(store, &decision, &options.retry).await
        };

        match settled {
            Ok(clip_id) => {
                report.record_decision(&decision);
                if decision.needs_tag_sync(options.rescan_tags) {
                    if let Some(group) = decision.group() {
                        tag_jobs.push((clip_id, group.clone()));
                    }
                }
            }
            Err(err) => report.record_error(&err, Some(decision.key())),
        }

        let n = i as u64 + 1;
        if n % PROGRESS_EVERY == 0 || n == total {
            progress.report(ScanProgressEvent::Reconciling { n, total });
        }
    }

    report.enter(RunPhase::SyncingTags);
    let sync = MetadataSync::new(
        store,
        extractor,
        &options.root,
        options.retry,
        options.dry_run,
    );
    let total = tag_jobs.len() as u64;
    for (i, (clip_id, group)) in tag_jobs.iter().enumerate() {
        match sync.sync_clip(*clip_id, group).await {
            Ok(outcome) => report.record_tag(outcome),
            Err(err) => report.record_error(&err, Some(&group.key)),
        }

        let n = i as u64 + 1;
        if n % PROGRESS_EVERY == 0 || n == total {
            progress.report(ScanProgressEvent::SyncingTags { n, total });
        }
    }

    report.enter(RunPhase::Reporting);
    let summary = report.finish();
    tracing::info!(
        writes = summary.counts.writes(),
        errors = summary.errors.len(),
        dry_run = summary.dry_run,
        "scan finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CatalogError, ErrorKind};
    use crate::models::{FormatSet, TagData};
    use crate::progress::NoProgress;
    use crate::tag_extract::FixedTagExtractor;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn options(root: &Path) -> ScanOptions {
        ScanOptions {
            root: root.to_path_buf(),
            walk: WalkOptions::default(),
            rescan_tags: false,
            dry_run: false,
            retry: RetryPolicy {
                max_retries: 1,
                base_backoff: Duration::from_millis(1),
            },
        }
    }

    fn title(t: &str) -> TagData {
        TagData {
            title: Some(t.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_new_clip_is_inserted_with_tags() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "clips/a.mp3");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(tmp.path().join("clips/a.mp3"), title("A"));

        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase, RunPhase::Done);
        assert_eq!(summary.counts.clips_inserted, 1);
        assert_eq!(summary.counts.tags_upserted, 1);
        let clip = store.clip("clips/a").unwrap();
        assert_eq!(clip.formats, FormatSet::new(true, false, false));
        assert_eq!(store.tag("clips/a"), Some(title("A")));
    }

    #[tokio::test]
    async fn second_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "clips/a.mp3");
        touch(tmp.path(), "clips/a.m4a");
        touch(tmp.path(), "b.m4r");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(tmp.path().join("clips/a.mp3"), title("A"));

        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        let writes = store.write_count();

        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.write_count(), writes);
        assert_eq!(summary.counts.writes(), 0);
        assert_eq!(summary.counts.clips_unchanged, 2);
    }

    #[tokio::test]
    async fn rescan_with_identical_tags_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.mp3");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(tmp.path().join("a.mp3"), title("A"));
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        let writes = store.write_count();

        let mut opts = options(tmp.path());
        opts.rescan_tags = true;
        let summary = run_scan(&store, &ex, &opts, &NoProgress).await.unwrap();
        assert_eq!(summary.counts.tags_unchanged, 1);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn removed_sibling_updates_flags_without_tag_resync() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "clips/a.mp3");
        touch(tmp.path(), "clips/a.m4a");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        let calls_before = ex.calls().len();

        fs::remove_file(tmp.path().join("clips/a.m4a")).unwrap();
        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.counts.clips_updated, 1);
        assert_eq!(
            store.clip("clips/a").unwrap().formats,
            FormatSet::new(true, false, false)
        );
        assert_eq!(ex.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn losing_canonical_source_resyncs_tags() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.mp3");
        touch(tmp.path(), "a.m4a");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(tmp.path().join("a.mp3"), title("from mp3"));
        ex.set_tags(tmp.path().join("a.m4a"), title("from m4a"));
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.tag("a"), Some(title("from mp3")));

        fs::remove_file(tmp.path().join("a.mp3")).unwrap();
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.tag("a"), Some(title("from m4a")));
    }

    #[tokio::test]
    async fn deleted_files_remove_clip_and_tag() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "clips/a.mp3");
        touch(tmp.path(), "clips/b.mp3");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(tmp.path().join("clips/a.mp3"), title("A"));
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(store.tag_count(), 1);

        fs::remove_file(tmp.path().join("clips/a.mp3")).unwrap();
        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.counts.clips_deleted, 1);
        assert!(store.clip("clips/a").is_none());
        assert_eq!(store.tag_count(), 0);
        assert!(store.clip("clips/b").is_some());
    }

    #[tokio::test]
    async fn catalog_converges_to_disk() {
        let tmp = TempDir::new().unwrap();
        for rel in ["x/1.mp3", "x/2.m4a", "y/z/3.m4r", "4.mp3", "x/readme.txt"] {
            touch(tmp.path(), rel);
        }
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.counts.files_skipped, 1);

        let keys: Vec<String> = store
            .load_clips(None)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, vec!["4", "x/1", "x/2", "y/z/3"]);
        for clip in store.load_clips(None).await.unwrap() {
            assert!(!clip.formats.is_empty());
        }
    }

    #[tokio::test]
    async fn dry_run_makes_no_writes() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "clips/a.mp3");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(tmp.path().join("clips/a.mp3"), title("A"));

        let mut opts = options(tmp.path());
        opts.dry_run = true;
        let summary = run_scan(&store, &ex, &opts, &NoProgress).await.unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.counts.clips_inserted, 1);
        assert_eq!(summary.counts.tags_upserted, 1);
        assert_eq!(store.write_count(), 0);
        assert!(store.clip("clips/a").is_none());
    }

    #[tokio::test]
    async fn missing_root_aborts_without_writes() {
        let tmp = TempDir::new().unwrap();
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        let err = run_scan(&store, &ex, &options(&tmp.path().join("gone")), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::FatalRoot { .. })
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn empty_root_deletes_everything_cataloged() {
        // An accessible but empty root is a complete walk, unlike a missing one.
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.mp3");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();

        fs::remove_file(tmp.path().join("a.mp3")).unwrap();
        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.counts.clips_deleted, 1);
    }

    #[tokio::test]
    async fn extraction_and_write_errors_are_recorded_per_key() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "bad.mp3");
        touch(tmp.path(), "locked.mp3");
        touch(tmp.path(), "good.mp3");
        let store = InMemoryCatalog::new();
        store.fail_writes("locked", 10);
        let ex = FixedTagExtractor::new();
        ex.set_failure(tmp.path().join("bad.mp3"), "no frames");
        ex.set_tags(tmp.path().join("good.mp3"), title("Good"));

        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase, RunPhase::Done);
        assert_eq!(summary.counts.clips_inserted, 2);
        assert_eq!(summary.counts.tags_upserted, 1);
        let kinds: Vec<ErrorKind> = summary.errors.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&ErrorKind::Extraction));
        assert!(kinds.contains(&ErrorKind::Write));
        let write = summary
            .errors
            .iter()
            .find(|e| e.kind == ErrorKind::Write)
            .unwrap();
        assert_eq!(write.key.as_deref(), Some("locked"));
        assert!(store.clip("bad").is_some());
        assert!(store.clip("locked").is_none());
        assert_eq!(store.tag("good"), Some(title("Good")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_directory_defers_its_deletions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "open/a.mp3");
        touch(tmp.path(), "locked/b.mp3");
        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();

        let locked = tmp.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Running as root: permissions are not enforced.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let summary = run_scan(&store, &ex, &options(tmp.path()), &NoProgress)
            .await
            .unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(summary.counts.clips_deleted, 0);
        assert_eq!(summary.counts.deletions_deferred, 1);
        assert!(store.clip("locked/b").is_some());
        assert!(summary.errors.iter().any(|e| e.kind == ErrorKind::Path));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn broken_symlink_keeps_its_clip_and_tags() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        touch(tmp.path(), "mnt/a.mp3");
        touch(&root, "clips/b.mp3");
        touch(&root, "other/c.mp3");
        std::os::unix::fs::symlink(tmp.path().join("mnt/a.mp3"), root.join("clips/a.mp3"))
            .unwrap();

        let store = InMemoryCatalog::new();
        let ex = FixedTagExtractor::new();
        ex.set_tags(root.join("clips/a.mp3"), title("Linked"));
        let mut opts = options(&root);
        opts.walk.follow_symlinks = true;

        let first = run_scan(&store, &ex, &opts, &NoProgress).await.unwrap();
        assert_eq!(first.counts.clips_inserted, 3);
        assert!(first.errors.is_empty());
        assert_eq!(store.tag("clips/a"), Some(title("Linked")));

        // The link target disappears, as with an unmounted share.
        fs::remove_dir_all(tmp.path().join("mnt")).unwrap();
        fs::remove_file(root.join("other/c.mp3")).unwrap();

        let second = run_scan(&store, &ex, &opts, &NoProgress).await.unwrap();
        assert_eq!(second.errors.len(), 1);
        assert_eq!(second.errors[0].kind, ErrorKind::Path);
        assert_eq!(second.counts.clips_deleted, 1);
        assert_eq!(second.counts.deletions_deferred, 1);
        assert!(store.clip("other/c").is_none());
        assert!(store.clip("clips/a").is_some());
        assert_eq!(store.tag("clips/a"), Some(title("Linked")));
        assert!(store.clip("clips/b").is_some());
    }

    fn db_config(tmp: &Path) -> Config {
        Config {
            db: crate::config::DbConfig {
                path: tmp.join("data/catalog.sqlite"),
            },
            scan: Default::default(),
            sync: Default::default(),
        }
    }

    #[tokio::test]
    async fn dry_run_never_creates_the_database() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        touch(&root, "clips/a.mp3");
        let config = db_config(tmp.path());
        let mut opts = options(&root);
        opts.dry_run = true;

        let summary = run_scan_command(&config, &opts, &NoProgress).await.unwrap();
        assert_eq!(summary.counts.clips_inserted, 1);
        assert!(!tmp.path().join("data").exists());
    }

    #[tokio::test]
    async fn dry_run_reads_an_existing_catalog_without_writing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        touch(&root, "clips/a.mp3");
        let config = db_config(tmp.path());
        run_scan_command(&config, &options(&root), &NoProgress)
            .await
            .unwrap();

        touch(&root, "clips/b.mp3");
        let mut opts = options(&root);
        opts.dry_run = true;
        let summary = run_scan_command(&config, &opts, &NoProgress).await.unwrap();
        assert_eq!(summary.counts.clips_inserted, 1);
        assert_eq!(summary.counts.clips_unchanged, 1);

        let pool = db::connect(&config).await.unwrap();
        let clips = SqliteCatalog::new(pool.clone()).load_clips(None).await.unwrap();
        pool.close().await;
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].key, "clips/a");
    }
}
