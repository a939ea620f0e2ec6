//! End-to-end pagination tests through the `Server` facade.
//!
//! Run with: cargo test -p relfga-server --test pagination_integration

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use relfga_server::config::ServerConfig;
use relfga_server::types::{
    CreateStoreRequest, DeleteStoreRequest, ListStoresRequest, ReadChangesRequest, StoreInfo,
    WriteRequest,
};
use relfga_server::{Server, ServerError};
use relfga_storage::{MemoryDataStore, TupleKey, TupleOperation};

const HMAC_KEY: &str = "integration-test-key";

fn hmac_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.continuation_token.encoder = "hmac".to_string();
    config.continuation_token.key = Some(HMAC_KEY.to_string());
    config
}

fn server_with(config: &ServerConfig) -> Server<MemoryDataStore> {
    Server::new(MemoryDataStore::new_shared(), config).unwrap()
}

fn server() -> Server<MemoryDataStore> {
    server_with(&hmac_config())
}

async fn create_store(server: &Server<MemoryDataStore>, name: &str) -> StoreInfo {
    server
        .create_store(CreateStoreRequest {
            name: name.to_string(),
        })
        .await
        .unwrap()
}

async fn write(server: &Server<MemoryDataStore>, store_id: &str, object: &str) {
    server
        .write(WriteRequest::new(store_id).write(TupleKey::new(object, "admin", "maria")))
        .await
        .unwrap();
}

async fn list_all(server: &Server<MemoryDataStore>, page_size: i32) -> Vec<String> {
    let mut ids = Vec::new();
    let mut token = String::new();
    loop {
        let response = server
            .list_stores(ListStoresRequest {
                page_size: Some(page_size),
                continuation_token: token,
            })
            .await
            .unwrap();
        assert!(response.stores.len() <= page_size as usize);
        ids.extend(response.stores.into_iter().map(|s| s.id));
        if response.continuation_token.is_empty() {
            return ids;
        }
        token = response.continuation_token;
    }
}

// =============================================================================
// ReadChanges
// =============================================================================

/// Writes A, B, C, D then pages through with sizes 1 and 3.
#[tokio::test]
async fn test_read_changes_pages_then_stabilizes() {
    let server = server();
    let store = create_store(&server, "changes").await;
    for object in ["repo:a", "repo:b", "repo:c", "repo:d"] {
        write(&server, &store.id, object).await;
    }

    let page1 = server
        .read_changes(ReadChangesRequest::new(&store.id).with_page_size(1))
        .await
        .unwrap();
    assert_eq!(page1.changes.len(), 1);
    assert_eq!(page1.changes[0].tuple_key.object, "repo:a");
    assert_eq!(page1.changes[0].operation, TupleOperation::Write);
    let t1 = page1.continuation_token;
    assert!(!t1.is_empty());

    let page2 = server
        .read_changes(
            ReadChangesRequest::new(&store.id)
                .with_page_size(3)
                .with_token(&t1),
        )
        .await
        .unwrap();
    let objects: Vec<_> = page2
        .changes
        .iter()
        .map(|c| c.tuple_key.object.as_str())
        .collect();
    assert_eq!(objects, ["repo:b", "repo:c", "repo:d"]);
    let t2 = page2.continuation_token;
    assert_ne!(t2, t1);

    // Nothing new: same token back, every time.
    for _ in 0..2 {
        let page3 = server
            .read_changes(ReadChangesRequest::new(&store.id).with_token(&t2))
            .await
            .unwrap();
        assert!(page3.changes.is_empty());
        assert_eq!(page3.continuation_token, t2);
    }

    let result = server
        .read_changes(ReadChangesRequest::new(&store.id).with_token("foo"))
        .await;
    assert!(matches!(result, Err(ServerError::InvalidContinuationToken)));
}

/// A poller holding the stable token picks up changes written later.
#[tokio::test]
async fn test_stable_token_resumes_after_new_writes() {
    let server = server();
    let store = create_store(&server, "polling").await;
    write(&server, &store.id, "repo:a").await;

    let first = server
        .read_changes(ReadChangesRequest::new(&store.id))
        .await
        .unwrap();
    write(&server, &store.id, "repo:b").await;

    let second = server
        .read_changes(ReadChangesRequest::new(&store.id).with_token(&first.continuation_token))
        .await
        .unwrap();
    assert_eq!(second.changes.len(), 1);
    assert_eq!(second.changes[0].tuple_key.object, "repo:b");
}

#[tokio::test]
async fn test_read_changes_type_filter_consistency() {
    let server = server();
    let store = create_store(&server, "filters").await;
    for object in ["repo:a", "org:b", "repo:c"] {
        write(&server, &store.id, object).await;
    }

    let repo = server
        .read_changes(
            ReadChangesRequest::new(&store.id)
                .with_type("repo")
                .with_page_size(1),
        )
        .await
        .unwrap();
    assert_eq!(repo.changes[0].tuple_key.object, "repo:a");

    for other in ["org", ""] {
        let result = server
            .read_changes(
                ReadChangesRequest::new(&store.id)
                    .with_type(other)
                    .with_token(&repo.continuation_token),
            )
            .await;
        assert!(matches!(result, Err(ServerError::MismatchObjectType)));
    }

    let rest = server
        .read_changes(
            ReadChangesRequest::new(&store.id)
                .with_type("repo")
                .with_token(&repo.continuation_token),
        )
        .await
        .unwrap();
    assert_eq!(rest.changes.len(), 1);
    assert_eq!(rest.changes[0].tuple_key.object, "repo:c");
}

#[tokio::test]
async fn test_horizon_offset_hides_fresh_changes_until_they_age() {
    let mut config = hmac_config();
    config.changelog.horizon_offset_ms = 200;
    let server = server_with(&config);
    let store = create_store(&server, "horizon").await;
    write(&server, &store.id, "repo:a").await;

    let fresh = server
        .read_changes(ReadChangesRequest::new(&store.id))
        .await
        .unwrap();
    assert!(fresh.changes.is_empty());
    assert!(fresh.continuation_token.is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let aged = server
        .read_changes(ReadChangesRequest::new(&store.id))
        .await
        .unwrap();
    assert_eq!(aged.changes.len(), 1);
    assert!(!aged.continuation_token.is_empty());
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let server = server();
    let store = create_store(&server, "tamper").await;
    write(&server, &store.id, "repo:a").await;
    write(&server, &store.id, "repo:b").await;

    let page = server
        .read_changes(ReadChangesRequest::new(&store.id).with_page_size(1))
        .await
        .unwrap();
    let token = page.continuation_token;

    let mut bytes = token.clone().into_bytes();
    let middle = bytes.len() / 2;
    bytes[middle] = if bytes[middle] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    let result = server
        .read_changes(ReadChangesRequest::new(&store.id).with_token(tampered))
        .await;
    assert!(matches!(result, Err(ServerError::InvalidContinuationToken)));
}

#[tokio::test]
async fn test_token_from_other_server_key_is_rejected() {
    let server_a = server();
    let store = create_store(&server_a, "keys").await;
    write(&server_a, &store.id, "repo:a").await;
    let page = server_a
        .read_changes(ReadChangesRequest::new(&store.id))
        .await
        .unwrap();

    let mut config = hmac_config();
    config.continuation_token.key = Some("rotated-key".to_string());
    let server_b = server_with(&config);
    let result = server_b
        .read_changes(ReadChangesRequest::new(&store.id).with_token(page.continuation_token))
        .await;
    assert!(matches!(result, Err(ServerError::InvalidContinuationToken)));
}

// =============================================================================
// ListStores
// =============================================================================

#[tokio::test]
async fn test_list_stores_one_per_page() {
    let server = server();
    let x = create_store(&server, "store x").await;
    let y = create_store(&server, "store y").await;

    let page1 = server
        .list_stores(ListStoresRequest {
            page_size: Some(1),
            continuation_token: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(page1.stores, vec![x]);
    assert!(!page1.continuation_token.is_empty());

    let page2 = server
        .list_stores(ListStoresRequest {
            page_size: Some(1),
            continuation_token: page1.continuation_token,
        })
        .await
        .unwrap();
    assert_eq!(page2.stores, vec![y]);
    assert!(!page2.continuation_token.is_empty());

    let page3 = server
        .list_stores(ListStoresRequest {
            page_size: Some(1),
            continuation_token: page2.continuation_token,
        })
        .await
        .unwrap();
    assert!(page3.stores.is_empty());
    assert!(page3.continuation_token.is_empty());
}

#[tokio::test]
async fn test_list_stores_with_larger_page_ends_with_empty_token() {
    let server = server();
    let x = create_store(&server, "store x").await;
    let y = create_store(&server, "store y").await;

    let response = server
        .list_stores(ListStoresRequest::default())
        .await
        .unwrap();
    assert_eq!(response.stores, vec![x, y]);
    assert!(response.continuation_token.is_empty());
}

#[tokio::test]
async fn test_deleted_store_is_skipped_mid_pagination() {
    let server = server();
    let a = create_store(&server, "store a").await;
    let b = create_store(&server, "store b").await;
    let c = create_store(&server, "store c").await;

    let page1 = server
        .list_stores(ListStoresRequest {
            page_size: Some(1),
            continuation_token: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(page1.stores[0].id, a.id);

    server
        .delete_store(DeleteStoreRequest {
            store_id: b.id.clone(),
        })
        .await
        .unwrap();

    let rest = server
        .list_stores(ListStoresRequest {
            page_size: Some(10),
            continuation_token: page1.continuation_token,
        })
        .await
        .unwrap();
    let ids: Vec<_> = rest.stores.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids, vec![c.id]);
}

#[tokio::test]
async fn test_tokens_do_not_cross_queries() {
    let server = server();
    let store = create_store(&server, "store x").await;
    create_store(&server, "store y").await;
    write(&server, &store.id, "repo:a").await;
    write(&server, &store.id, "repo:b").await;

    let stores_page = server
        .list_stores(ListStoresRequest {
            page_size: Some(1),
            continuation_token: String::new(),
        })
        .await
        .unwrap();
    let result = server
        .read_changes(ReadChangesRequest::new(&store.id).with_token(&stores_page.continuation_token))
        .await;
    assert!(matches!(result, Err(ServerError::InvalidContinuationToken)));

    let changes_page = server
        .read_changes(ReadChangesRequest::new(&store.id).with_page_size(1))
        .await
        .unwrap();
    let result = server
        .list_stores(ListStoresRequest {
            page_size: Some(1),
            continuation_token: changes_page.continuation_token,
        })
        .await;
    assert!(matches!(result, Err(ServerError::InvalidContinuationToken)));
}

#[tokio::test]
async fn test_concurrent_readers_share_one_server() {
    let server = Arc::new(server());
    let store = create_store(&server, "shared").await;
    for i in 0..20 {
        write(&server, &store.id, &format!("repo:{i}")).await;
    }

    let readers = (0..8).map(|_| {
        let server = Arc::clone(&server);
        let store_id = store.id.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut token = String::new();
            loop {
                let page = server
                    .read_changes(
                        ReadChangesRequest::new(&store_id)
                            .with_page_size(3)
                            .with_token(&token),
                    )
                    .await
                    .unwrap();
                if page.changes.is_empty() {
                    return seen;
                }
                seen.extend(page.changes.into_iter().map(|c| c.tuple_key.object));
                token = page.continuation_token;
            }
        })
    });

    for result in futures::future::join_all(readers).await {
        let seen = result.unwrap();
        assert_eq!(seen.len(), 20);
        let expected: Vec<_> = (0..20).map(|i| format!("repo:{i}")).collect();
        assert_eq!(seen, expected);
    }
}

/// A reader tailing the changelog with its stable token while writers are
/// still landing sees every change exactly once, in order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_tails_changes_while_writers_land() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 25;
    let total = WRITERS * PER_WRITER;

    let server = Arc::new(server());
    let store = create_store(&server, "tail").await;

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let server = Arc::clone(&server);
            let store_id = store.id.clone();
            tokio::spawn(async move {
                for i in 0..PER_WRITER {
                    write(&server, &store_id, &format!("repo:{w}-{i}")).await;
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let reader = {
        let server = Arc::clone(&server);
        let store_id = store.id.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut token = String::new();
            while seen.len() < total {
                let page = server
                    .read_changes(
                        ReadChangesRequest::new(&store_id)
                            .with_page_size(7)
                            .with_token(&token),
                    )
                    .await
                    .unwrap();
                if page.changes.is_empty() {
                    // Nothing new yet; the token must come back unchanged.
                    assert_eq!(page.continuation_token, token);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    continue;
                }
                seen.extend(page.changes);
                token = page.continuation_token;
            }
            seen
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    let seen = tokio::time::timeout(Duration::from_secs(30), reader)
        .await
        .expect("reader did not observe every change")
        .unwrap();

    assert_eq!(seen.len(), total);
    assert!(seen.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    let objects: HashSet<_> = seen.iter().map(|c| c.tuple_key.object.clone()).collect();
    assert_eq!(objects.len(), total, "no change may be seen twice");

    let full = server
        .read_changes(ReadChangesRequest::new(&store.id).with_page_size(100))
        .await
        .unwrap();
    let tailed: Vec<_> = seen.iter().map(|c| c.tuple_key.object.as_str()).collect();
    let replayed: Vec<_> = full.changes.iter().map(|c| c.tuple_key.object.as_str()).collect();
    assert_eq!(tailed, replayed);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Every live store is listed exactly once, in creation order, whatever
    /// the page size.
    #[test]
    fn prop_list_stores_is_complete(
        store_count in 0usize..30,
        page_size in 1i32..=100,
        deleted in proptest::collection::hash_set(0usize..30, 0..10),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let server = server();
            let mut live = Vec::new();
            for i in 0..store_count {
                let store = create_store(&server, &format!("store {i}")).await;
                if deleted.contains(&i) {
                    server
                        .delete_store(DeleteStoreRequest { store_id: store.id })
                        .await
                        .unwrap();
                } else {
                    live.push(store.id);
                }
            }

            let listed = list_all(&server, page_size).await;
            let unique: HashSet<_> = listed.iter().collect();
            prop_assert_eq!(unique.len(), listed.len());
            prop_assert_eq!(listed, live);
            Ok(())
        })?;
    }
}
