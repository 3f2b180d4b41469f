use std::sync::Arc;
use std::time::Duration;

use ambit_data::{DataError, Dialect, LockIntent, QueryBuilder};
use ambit_data_sqlx::{ConnectionPool, PoolConfig, SqlxErrorExt, TxContext, TxManager};
use sqlx::Sqlite;
use tempfile::TempDir;

type Ctx = TxContext<Sqlite>;

struct Fixture {
    _dir: TempDir,
    manager: TxManager<Sqlite>,
}

async fn setup_with(configure: impl FnOnce(PoolConfig) -> PoolConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("books.db").display());
    let pool = ConnectionPool::<Sqlite>::open(&configure(PoolConfig::new(url)))
        .await
        .unwrap();
    sqlx::query("CREATE TABLE books (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL)")
        .execute(pool.inner())
        .await
        .unwrap();
    Fixture {
        _dir: dir,
        manager: TxManager::new(pool),
    }
}

async fn setup() -> Fixture {
    setup_with(|c| c).await
}

async fn insert(manager: &TxManager<Sqlite>, ctx: &Ctx, title: &str) -> Result<(), DataError> {
    let exec = manager.executor(ctx);
    let mut conn = exec.acquire().await?;
    sqlx::query("INSERT INTO books (title) VALUES (?)")
        .bind(title)
        .execute(&mut *conn)
        .await
        .map_err(|e| e.into_data_error())?;
    Ok(())
}

/// Begin, write and commit a fresh unit of work. Fails if no pooled
/// connection frees up within a second.
async fn commit_one(manager: &TxManager<Sqlite>, title: &str) -> Result<(), DataError> {
    let ctx = Ctx::background().with_timeout(Duration::from_secs(1));
    let scope = manager.begin(&ctx).await?;
    insert(manager, scope.context(), title).await?;
    scope.finalize().await
}

/// Committed row count, read outside any transaction.
async fn committed(manager: &TxManager<Sqlite>) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM books")
        .fetch_one(manager.pool().inner())
        .await
        .unwrap()
}

// ── Begin / join ────────────────────────────────────────────────────────

#[tokio::test]
async fn begin_on_transactional_context_joins() {
    let fx = setup().await;
    let outer = fx.manager.begin(&Ctx::background()).await.unwrap();
    assert!(outer.is_originator());

    let inner = fx.manager.begin(outer.context()).await.unwrap();
    assert!(!inner.is_originator());
    assert_eq!(inner.transaction_id(), outer.transaction_id());
    assert_eq!(inner.context(), outer.context());

    let outer_exec = fx.manager.executor(outer.context());
    let inner_exec = fx.manager.executor(inner.context());
    assert_eq!(outer_exec.transaction_id(), inner_exec.transaction_id());

    inner.finalize().await.unwrap();
    outer.finalize().await.unwrap();
}

#[tokio::test]
async fn executor_without_transaction_autocommits() {
    let fx = setup().await;
    let ctx = Ctx::background();
    let exec = fx.manager.executor(&ctx);
    assert!(!exec.is_transaction());
    assert_eq!(exec.transaction_id(), None);

    insert(&fx.manager, &ctx, "Dune").await.unwrap();
    assert_eq!(committed(&fx.manager).await, 1);
}

#[tokio::test]
async fn writes_become_visible_on_finalize() {
    let fx = setup().await;
    let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
    assert!(fx.manager.executor(scope.context()).is_transaction());

    insert(&fx.manager, scope.context(), "Dune").await.unwrap();
    let nested = fx.manager.begin(scope.context()).await.unwrap();
    insert(&fx.manager, nested.context(), "Hyperion").await.unwrap();
    nested.finalize().await.unwrap();

    assert_eq!(committed(&fx.manager).await, 0);
    scope.finalize().await.unwrap();
    assert_eq!(committed(&fx.manager).await, 2);
}

#[tokio::test]
async fn joined_scope_cannot_end_the_transaction() {
    let fx = setup().await;
    let outer = fx.manager.begin(&Ctx::background()).await.unwrap();
    insert(&fx.manager, outer.context(), "Dune").await.unwrap();

    let joined = fx.manager.begin(outer.context()).await.unwrap();
    joined.rollback().await.unwrap();

    // Still usable after the joiner's rollback.
    insert(&fx.manager, outer.context(), "Hyperion").await.unwrap();
    outer.finalize().await.unwrap();
    assert_eq!(committed(&fx.manager).await, 2);
}

#[tokio::test]
async fn explicit_rollback_discards_writes() {
    let fx = setup().await;
    let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
    insert(&fx.manager, scope.context(), "Dune").await.unwrap();
    scope.rollback().await.unwrap();
    assert_eq!(committed(&fx.manager).await, 0);
}

#[tokio::test]
async fn dropped_scope_rolls_back() {
    let fx = setup_with(|c| c.max_open(1)).await;
    {
        let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
        insert(&fx.manager, scope.context(), "Dune").await.unwrap();
    }

    // The only connection went back to the pool with its writes discarded.
    commit_one(&fx.manager, "Hyperion").await.unwrap();
    let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM books")
        .fetch_all(fx.manager.pool().inner())
        .await
        .unwrap();
    assert_eq!(titles, vec!["Hyperion".to_string()]);
}

#[tokio::test]
async fn failed_commit_surfaces_transaction_error() {
    let fx = setup_with(|c| c.max_open(1)).await;
    let pool = fx.manager.pool().inner();
    sqlx::query("CREATE TABLE authors (id INTEGER PRIMARY KEY)")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE credits (
            book TEXT NOT NULL,
            author_id INTEGER NOT NULL REFERENCES authors(id) DEFERRABLE INITIALLY DEFERRED
        )",
    )
    .execute(pool)
    .await
    .unwrap();

    let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
    {
        let mut conn = fx.manager.executor(scope.context()).acquire().await.unwrap();
        sqlx::query("INSERT INTO credits (book, author_id) VALUES ('Dune', 42)")
            .execute(&mut *conn)
            .await
            .unwrap();
    }

    let err = scope.finalize().await.unwrap_err();
    assert!(matches!(&err, DataError::Transaction(msg) if msg.starts_with("commit failed")));
    assert!(!err.is_transient());

    let credits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credits")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(credits, 0);
    commit_one(&fx.manager, "Dune").await.unwrap();
}

#[tokio::test]
async fn context_outliving_its_scope_is_rejected() {
    let fx = setup().await;
    let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
    let stale = scope.context().clone();
    scope.finalize().await.unwrap();

    let err = insert(&fx.manager, &stale, "late").await.unwrap_err();
    assert!(matches!(err, DataError::Transaction(_)));
}

// ── in_transaction ──────────────────────────────────────────────────────

#[tokio::test]
async fn in_transaction_commits_on_ok() {
    let fx = setup().await;
    let m = fx.manager.clone();
    let id = fx
        .manager
        .in_transaction(&Ctx::background(), |ctx| async move {
            insert(&m, &ctx, "Dune").await?;
            Ok::<_, DataError>(m.executor(&ctx).transaction_id())
        })
        .await
        .unwrap();
    assert!(id.is_some());
    assert_eq!(committed(&fx.manager).await, 1);
}

#[tokio::test]
async fn in_transaction_rolls_back_on_err() {
    let fx = setup().await;
    let m = fx.manager.clone();
    let result: Result<(), DataError> = fx
        .manager
        .in_transaction(&Ctx::background(), |ctx| async move {
            insert(&m, &ctx, "Dune").await?;
            Err::<(), _>(DataError::Conflict("stock changed".into()))
        })
        .await;
    assert!(matches!(result, Err(DataError::Conflict(msg)) if msg == "stock changed"));
    assert_eq!(committed(&fx.manager).await, 0);
}

#[tokio::test]
async fn inner_failure_rolls_back_the_whole_unit() {
    let fx = setup().await;
    let m = fx.manager.clone();
    let result: Result<(), DataError> = fx
        .manager
        .in_transaction(&Ctx::background(), |ctx| async move {
            insert(&m, &ctx, "Dune").await?;
            let inner = m.clone();
            m.in_transaction(&ctx, |ctx| async move {
                insert(&inner, &ctx, "Hyperion").await?;
                Err::<(), _>(DataError::Other("inner failed".into()))
            })
            .await
        })
        .await;
    assert!(matches!(result, Err(DataError::Other(_))));
    assert_eq!(committed(&fx.manager).await, 0);
}

#[tokio::test]
async fn panic_rolls_back_and_keeps_payload() {
    let fx = setup_with(|c| c.max_open(1)).await;
    let m = fx.manager.clone();
    let task = tokio::spawn(async move {
        let inner = m.clone();
        m.in_transaction(&Ctx::background(), |ctx| async move {
            insert(&inner, &ctx, "Dune").await?;
            if ctx.in_transaction() {
                panic!("inventory invariant violated");
            }
            Ok::<(), DataError>(())
        })
        .await
    });

    let err = task.await.unwrap_err();
    assert!(err.is_panic());
    let payload = err.into_panic();
    assert_eq!(
        payload.downcast_ref::<&str>(),
        Some(&"inventory invariant violated")
    );
    assert_eq!(committed(&fx.manager).await, 0);

    commit_one(&fx.manager, "Hyperion").await.unwrap();
    assert_eq!(committed(&fx.manager).await, 1);
}

#[tokio::test]
async fn panic_through_explicit_scope_rolls_back() {
    let fx = setup_with(|c| c.max_open(1)).await;
    let m = fx.manager.clone();
    let task = tokio::spawn(async move {
        let scope = m.begin(&Ctx::background()).await?;
        insert(&m, scope.context(), "Dune").await?;
        if scope.is_originator() {
            panic!("shelf overflow");
        }
        scope.finalize().await
    });

    let err = task.await.unwrap_err();
    assert!(err.is_panic());
    assert_eq!(committed(&fx.manager).await, 0);

    commit_one(&fx.manager, "Hyperion").await.unwrap();
    assert_eq!(committed(&fx.manager).await, 1);
}

// ── Lock intent ─────────────────────────────────────────────────────────

fn select_for(ctx: &Ctx) -> String {
    QueryBuilder::new("books", Dialect::Postgres)
        .where_eq("id", "1")
        .lock(ctx.lock_intent())
        .build_select("id, title")
        .unwrap()
        .0
}

#[tokio::test]
async fn lock_intent_reaches_callees_without_leaking_up() {
    let fx = setup().await;
    let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
    assert_eq!(scope.context().lock_intent(), LockIntent::None);
    assert!(!select_for(scope.context()).contains("FOR"));

    let locked = scope.context().for_update();
    assert_eq!(locked.lock_intent(), LockIntent::ForUpdate);
    assert!(select_for(&locked).ends_with("FOR UPDATE"));
    assert_eq!(scope.context().lock_intent(), LockIntent::None);

    // Still the same unit of work.
    let exec = fx.manager.executor(&locked);
    assert_eq!(exec.transaction_id(), Some(scope.transaction_id()));

    let joined = fx.manager.begin(&locked.for_share()).await.unwrap();
    assert_eq!(joined.context().lock_intent(), LockIntent::ForShare);
    assert!(select_for(joined.context()).ends_with("FOR SHARE"));
    joined.finalize().await.unwrap();
    scope.finalize().await.unwrap();
}

// ── Concurrency ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_units_get_distinct_transactions() {
    const UNITS: usize = 6;
    let fx = setup_with(|c| c.max_open(UNITS as i64)).await;
    let barrier = Arc::new(tokio::sync::Barrier::new(UNITS));

    let mut tasks = Vec::new();
    for _ in 0..UNITS {
        let m = fx.manager.clone();
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            let scope = m.begin(&Ctx::background()).await?;
            let id = scope.transaction_id();

            // Everyone holds an open transaction at the same time.
            barrier.wait().await;

            for _ in 0..3 {
                let exec = m.executor(scope.context());
                assert_eq!(exec.transaction_id(), Some(id));
                let mut conn = exec.acquire().await?;
                let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| e.into_data_error())?;
            }
            scope.finalize().await?;
            Ok::<_, DataError>(id)
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), UNITS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_each_commit_once() {
    const UNITS: usize = 8;
    let fx = setup().await;

    let mut tasks = Vec::new();
    for n in 0..UNITS {
        let m = fx.manager.clone();
        tasks.push(tokio::spawn(async move {
            let title = format!("volume {n}");
            // SQLite admits one writer at a time; busy writers come back as
            // transient conflicts and retry the whole unit of work.
            for _ in 0..50 {
                let inner = m.clone();
                let title = title.clone();
                let result = m
                    .in_transaction(&Ctx::background(), |ctx| async move {
                        insert(&inner, &ctx, &title).await?;
                        Ok::<_, DataError>(inner.executor(&ctx).transaction_id())
                    })
                    .await;
                match result {
                    Ok(id) => return id.unwrap(),
                    Err(err) if err.is_transient() => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(err) => panic!("unit {n} failed: {err}"),
                }
            }
            panic!("unit {n} never committed");
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), UNITS);

    assert_eq!(committed(&fx.manager).await, UNITS as i64);
    let distinct: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT title) FROM books")
        .fetch_one(fx.manager.pool().inner())
        .await
        .unwrap();
    assert_eq!(distinct, UNITS as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn begin_waits_for_capacity() {
    let fx = setup_with(|c| c.max_open(2)).await;
    let first = fx.manager.begin(&Ctx::background()).await.unwrap();
    let second = fx.manager.begin(&Ctx::background()).await.unwrap();

    let m = fx.manager.clone();
    let third = tokio::spawn(async move {
        let scope = m.begin(&Ctx::background()).await?;
        scope.finalize().await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!third.is_finished());

    first.finalize().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), third)
        .await
        .expect("third unit of work never started")
        .unwrap()
        .unwrap();
    second.finalize().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn begin_times_out_at_deadline_when_pool_is_full() {
    let fx = setup_with(|c| c.max_open(2)).await;
    let first = fx.manager.begin(&Ctx::background()).await.unwrap();
    let second = fx.manager.begin(&Ctx::background()).await.unwrap();

    let ctx = Ctx::background().with_timeout(Duration::from_millis(100));
    let err = fx.manager.begin(&ctx).await.unwrap_err();
    assert!(matches!(err, DataError::Timeout(_)));
    assert!(err.is_transient());

    first.finalize().await.unwrap();
    second.finalize().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn context_deadline_outlasts_pool_acquire_timeout() {
    let fx = setup_with(|c| c.max_open(2).acquire_timeout(Duration::from_millis(200))).await;
    let first = fx.manager.begin(&Ctx::background()).await.unwrap();
    let second = fx.manager.begin(&Ctx::background()).await.unwrap();

    let m = fx.manager.clone();
    let third = tokio::spawn(async move {
        let ctx = Ctx::background().with_timeout(Duration::from_secs(3));
        let scope = m.begin(&ctx).await?;
        scope.finalize().await
    });

    // Well past the pool's own acquire timeout.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!third.is_finished());

    first.finalize().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), third)
        .await
        .expect("third unit of work never started")
        .unwrap()
        .unwrap();
    second.finalize().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acquire_timeout_applies_without_a_deadline() {
    let fx = setup_with(|c| c.max_open(1).acquire_timeout(Duration::from_millis(100))).await;
    let held = fx.manager.begin(&Ctx::background()).await.unwrap();

    let err = fx.manager.begin(&Ctx::background()).await.unwrap_err();
    assert!(matches!(err, DataError::PoolExhausted(_)));
    assert!(err.is_transient());

    held.finalize().await.unwrap();
}

#[tokio::test]
async fn cancelled_context_cannot_begin() {
    let fx = setup().await;
    let (ctx, token) = Ctx::background().cancellable();
    token.cancel();
    let err = fx.manager.begin(&ctx).await.unwrap_err();
    assert!(matches!(err, DataError::Timeout(_)));
}

#[tokio::test]
async fn statements_of_one_unit_are_serialized() {
    let fx = setup().await;
    let scope = fx.manager.begin(&Ctx::background()).await.unwrap();
    let exec = fx.manager.executor(scope.context());
    let held = exec.acquire().await.unwrap();
    assert!(held.is_transaction());

    let impatient = scope.context().with_timeout(Duration::from_millis(50));
    let err = fx.manager.executor(&impatient).acquire().await.unwrap_err();
    assert!(matches!(err, DataError::Timeout(_)));

    drop(held);
    fx.manager.executor(scope.context()).acquire().await.unwrap();
    scope.finalize().await.unwrap();
}
