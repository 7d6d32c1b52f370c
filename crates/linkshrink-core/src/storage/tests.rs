use super::{FileStorage, MemoryStorage, Repository};
use crate::{Error, types::BatchItem};
use tokio_util::sync::CancellationToken;

fn ids<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_owned()).collect()
}

fn batch(pairs: &[(&str, &str)]) -> Vec<BatchItem> {
    pairs
        .iter()
        .map(|(correlation_id, origin)| BatchItem {
            correlation_id: (*correlation_id).to_owned(),
            origin: (*origin).to_owned(),
        })
        .collect()
}

async fn run_save_and_resolve<R: Repository>(repo: R) {
    let short = repo.save("u1", "https://example.com").await.unwrap();
    assert_eq!(
        repo.link_by_short(&short).await.unwrap(),
        "https://example.com"
    );
    assert_eq!(
        repo.link_by_short("missing").await,
        Err(Error::LinkNotFound {
            short: "missing".into()
        })
    );
}

async fn run_duplicate_origin_conflicts<R: Repository>(repo: R) {
    let first = repo.save("u1", "https://example.com").await.unwrap();
    assert_eq!(
        repo.save("u1", "https://example.com").await,
        Err(Error::AlreadyShortened {
            short: first.clone()
        })
    );
    // Another owner gets their own code.
    let other = repo.save("u2", "https://example.com").await.unwrap();
    assert_ne!(first, other);
}

async fn run_bunch_save_echoes_correlation_ids<R: Repository>(repo: R) {
    let existing = repo.save("u1", "https://b.io").await.unwrap();
    let results = repo
        .bunch_save("u1", batch(&[("c1", "https://a.io"), ("c2", "https://b.io")]))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].correlation_id, "c1");
    assert_eq!(results[1].correlation_id, "c2");
    assert_eq!(results[1].short, existing);
    assert_eq!(
        repo.link_by_short(&results[0].short).await.unwrap(),
        "https://a.io"
    );
}

async fn run_bunch_save_rejects_repeated_origin<R: Repository>(repo: R) {
    let result = repo
        .bunch_save(
            "u1",
            batch(&[
                ("c1", "https://a.io"),
                ("c2", "https://b.io"),
                ("c3", "https://a.io"),
            ]),
        )
        .await;
    assert!(
        matches!(result, Err(Error::InvalidRequest { .. })),
        "{result:?}"
    );
    assert!(repo.links_by_user("u1").await.unwrap().is_empty());

    // The same origin under two owners is fine.
    repo.bunch_save("u1", batch(&[("c1", "https://a.io")]))
        .await
        .unwrap();
    repo.bunch_save("u2", batch(&[("c1", "https://a.io")]))
        .await
        .unwrap();
}

async fn run_mark_deleted_by_short_and_correlation<R: Repository>(repo: R) {
    let cancel = CancellationToken::new();
    let by_short = repo.save("u1", "https://a.io").await.unwrap();
    let saved = repo
        .bunch_save("u1", batch(&[("c1", "https://b.io")]))
        .await
        .unwrap();
    let kept = repo.save("u1", "https://c.io").await.unwrap();

    repo.bunch_mark_deleted(&cancel, &ids(&[by_short.as_str(), "c1"]), "u1")
        .await
        .unwrap();

    assert_eq!(
        repo.link_by_short(&by_short).await,
        Err(Error::LinkGone {
            short: by_short.clone()
        })
    );
    assert!(matches!(
        repo.link_by_short(&saved[0].short).await,
        Err(Error::LinkGone { .. })
    ));
    assert_eq!(repo.link_by_short(&kept).await.unwrap(), "https://c.io");

    let live = repo.links_by_user("u1").await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].short, kept);
}

async fn run_mark_deleted_only_touches_owner<R: Repository>(repo: R) {
    let cancel = CancellationToken::new();
    let short = repo.save("owner", "https://a.io").await.unwrap();

    repo.bunch_mark_deleted(&cancel, &ids(&[&short]), "intruder")
        .await
        .unwrap();

    assert_eq!(repo.link_by_short(&short).await.unwrap(), "https://a.io");
}

async fn run_mark_deleted_edge_cases<R: Repository>(repo: R) {
    let short = repo.save("u1", "https://a.io").await.unwrap();

    let live = CancellationToken::new();
    repo.bunch_mark_deleted(&live, &[], "u1").await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert_eq!(
        repo.bunch_mark_deleted(&cancelled, &ids(&[&short]), "u1")
            .await,
        Err(Error::Cancelled)
    );
    assert_eq!(repo.link_by_short(&short).await.unwrap(), "https://a.io");

    // Deleting frees the origin for a fresh code.
    repo.bunch_mark_deleted(&live, &ids(&[&short]), "u1")
        .await
        .unwrap();
    let again = repo.save("u1", "https://a.io").await.unwrap();
    assert_ne!(again, short);
}

async fn run_stats_counts_live_links<R: Repository>(repo: R) {
    let cancel = CancellationToken::new();
    repo.save("u1", "https://a.io").await.unwrap();
    let gone = repo.save("u1", "https://b.io").await.unwrap();
    repo.save("u2", "https://a.io").await.unwrap();
    let only = repo.save("u3", "https://c.io").await.unwrap();

    repo.bunch_mark_deleted(&cancel, &ids(&[&gone]), "u1")
        .await
        .unwrap();
    repo.bunch_mark_deleted(&cancel, &ids(&[&only]), "u3")
        .await
        .unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.urls, 2);
    assert_eq!(stats.users, 2);
    repo.ping().await.unwrap();
}

macro_rules! backend_tests {
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            #[tokio::test]
            async fn save_and_resolve() {
                let (repo, _guard) = $make.await;
                run_save_and_resolve(repo).await;
            }

            #[tokio::test]
            async fn duplicate_origin_conflicts() {
                let (repo, _guard) = $make.await;
                run_duplicate_origin_conflicts(repo).await;
            }

            #[tokio::test]
            async fn bunch_save_echoes_correlation_ids() {
                let (repo, _guard) = $make.await;
                run_bunch_save_echoes_correlation_ids(repo).await;
            }

            #[tokio::test]
            async fn bunch_save_rejects_repeated_origin() {
                let (repo, _guard) = $make.await;
                run_bunch_save_rejects_repeated_origin(repo).await;
            }

            #[tokio::test]
            async fn mark_deleted_by_short_and_correlation() {
                let (repo, _guard) = $make.await;
                run_mark_deleted_by_short_and_correlation(repo).await;
            }

            #[tokio::test]
            async fn mark_deleted_only_touches_owner() {
                let (repo, _guard) = $make.await;
                run_mark_deleted_only_touches_owner(repo).await;
            }

            #[tokio::test]
            async fn mark_deleted_edge_cases() {
                let (repo, _guard) = $make.await;
                run_mark_deleted_edge_cases(repo).await;
            }

            #[tokio::test]
            async fn stats_counts_live_links() {
                let (repo, _guard) = $make.await;
                run_stats_counts_live_links(repo).await;
            }
        }
    };
}

async fn memory() -> (MemoryStorage, ()) {
    (MemoryStorage::new(), ())
}

async fn file() -> (FileStorage, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileStorage::open(dir.path().join("links.json"))
        .await
        .unwrap();
    (repo, dir)
}

backend_tests!(memory_backend, memory());
backend_tests!(file_backend, file());

#[tokio::test]
async fn file_storage_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.json");
    let cancel = CancellationToken::new();

    let (kept, gone) = {
        let repo = FileStorage::open(&path).await.unwrap();
        let kept = repo.save("u1", "https://a.io").await.unwrap();
        let gone = repo
            .bunch_save("u1", batch(&[("c1", "https://b.io")]))
            .await
            .unwrap()
            .remove(0)
            .short;
        repo.bunch_mark_deleted(&cancel, &ids(&["c1"]), "u1")
            .await
            .unwrap();
        (kept, gone)
    };

    let reopened = FileStorage::open(&path).await.unwrap();
    assert_eq!(reopened.link_by_short(&kept).await.unwrap(), "https://a.io");
    assert!(matches!(
        reopened.link_by_short(&gone).await,
        Err(Error::LinkGone { .. })
    ));
    assert_eq!(
        reopened.save("u1", "https://a.io").await,
        Err(Error::AlreadyShortened { short: kept })
    );
}

#[tokio::test]
async fn file_storage_rejects_corrupt_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.json");
    tokio::fs::write(&path, b"{not json").await.unwrap();

    assert!(matches!(
        FileStorage::open(&path).await,
        Err(Error::Storage { .. })
    ));
}

#[tokio::test]
async fn failed_write_leaves_file_storage_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.json");
    let repo = FileStorage::open(&path).await.unwrap();
    let short = repo.save("u1", "https://a.io").await.unwrap();

    // A directory squatting on the temp path makes the next persist fail.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::create_dir(&tmp).await.unwrap();

    let cancel = CancellationToken::new();
    assert!(matches!(
        repo.bunch_mark_deleted(&cancel, &ids(&[&short]), "u1").await,
        Err(Error::Storage { .. })
    ));
    assert_eq!(repo.link_by_short(&short).await.unwrap(), "https://a.io");
}
