//! Integration tests for catalog store implementations.

mod common;

use common::{TestStore, dataset, entity, key, path, project, run_store_test_both, tag, user, value};
use niviz_core::{NewUser, ResourceRef};
use niviz_store::StoreError;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_user_lifecycle() {
    run_store_test_both(|store| async move {
        let mut new_user = NewUser::new("rater", "rater@example.org");
        new_user.first_name = Some("Ada".to_string());
        let created = store.create_user(&new_user).await.unwrap();
        assert!(!created.is_active);
        assert!(!created.is_admin);
        assert_eq!(created.first_name.as_deref(), Some("Ada"));

        let by_name = store.get_user_by_username("rater").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);

        let updated = store.set_user_flags(created.id, true, true).await.unwrap();
        assert!(updated.is_active);
        assert!(updated.is_admin);

        let err = store.set_user_flags(created.id + 1000, true, false).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_user_validation_rejected_before_insert() {
    let test_store = TestStore::new().await.unwrap();
    let store = test_store.store();

    let err = store.create_user(&NewUser::new("", "a@b.c")).await;
    assert!(matches!(err, Err(StoreError::Invalid(_))));
    assert!(store.list_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ids_are_monotonic() {
    run_store_test_both(|store| async move {
        let first = project(&store, "first").await;
        let second = project(&store, "second").await;
        assert!(second.id > first.id);

        // Deleted ids are not reused.
        store.delete(ResourceRef::Project(second.id)).await.unwrap();
        let third = project(&store, "third").await;
        assert!(third.id > second.id);
    })
    .await;
}

#[tokio::test]
async fn test_project_and_dataset_rename() {
    run_store_test_both(|store| async move {
        let p = project(&store, "pilot").await;
        let renamed = store.rename_project(p.id, "pilot v2").await.unwrap();
        assert_eq!(renamed.name, "pilot v2");
        assert!(renamed.updated_at >= p.updated_at);

        let d = store.create_dataset(None).await.unwrap();
        assert!(d.name.is_none());
        let named = store.rename_dataset(d.id, Some("T1w")).await.unwrap();
        assert_eq!(named.name.as_deref(), Some("T1w"));

        assert!(matches!(
            store.rename_project(p.id, "").await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.rename_dataset(d.id + 1000, None).await,
            Err(StoreError::NotFound(_))
        ));
    })
    .await;
}

#[tokio::test]
async fn test_attach_and_detach_dataset() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;

        let pairing = store.attach_dataset(p.id, d.id).await.unwrap();
        assert_eq!(pairing.project_id, p.id);
        assert_eq!(pairing.dataset_id, d.id);

        let dup = store.attach_dataset(p.id, d.id).await;
        assert!(matches!(dup, Err(StoreError::AlreadyAttached(_))));

        let found = store.find_project_dataset(p.id, d.id).await.unwrap();
        assert_eq!(found, Some(pairing.clone()));
        assert_eq!(store.list_project_datasets(p.id).await.unwrap().len(), 1);
        assert_eq!(store.list_dataset_projects(d.id).await.unwrap().len(), 1);

        store.detach_dataset(p.id, d.id).await.unwrap();
        let again = store.detach_dataset(p.id, d.id).await;
        assert!(matches!(again, Err(StoreError::NotFound(_))));

        // Detaching never removes the dataset.
        assert!(store.get_dataset(d.id).await.unwrap().is_some());
    })
    .await;
}

#[tokio::test]
async fn test_attach_missing_side_is_not_found() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let missing = store.attach_dataset(p.id, 9_999).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    })
    .await;
}

#[tokio::test]
async fn test_entity_requires_dataset() {
    run_store_test_both(|store| async move {
        let err = store.create_entity(12_345).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));

        let d = dataset(&store, "d").await;
        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;
        let listed: Vec<i64> = store
            .list_entities(d.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(listed, vec![e1.id, e2.id]);
        assert_eq!(store.count_entities(d.id).await.unwrap(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_image_dedup_by_path() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;

        let a = store
            .attach_image(e1.id, &path("/qa/sub-01/t1.png"))
            .await
            .unwrap();
        let b = store
            .attach_image(e2.id, &path("/qa/sub-01/t1.png"))
            .await
            .unwrap();
        assert_eq!(a.image_id, b.image_id);
        assert_eq!(store.image_reference_count(a.image_id).await.unwrap(), 2);
        assert_eq!(
            store.list_image_entities(a.image_id).await.unwrap(),
            vec![e1.id, e2.id]
        );

        let dup = store.attach_image(e1.id, &path("/qa/sub-01/t1.png")).await;
        assert!(matches!(dup, Err(StoreError::AlreadyAttached(_))));

        let image = store
            .get_image_by_path("/qa/sub-01/t1.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.id, a.image_id);
    })
    .await;
}

/// A path of `len` printable characters that does not compress well.
fn scrambled_path(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut path = String::with_capacity(len);
    path.push('/');
    while path.len() < len {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        path.push(ALPHABET[(state >> 58) as usize % ALPHABET.len()] as char);
    }
    path
}

#[tokio::test]
async fn test_longest_valid_path_is_stored() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;

        let longest = scrambled_path(niviz_core::PATH_MAX);
        let first = store.attach_image(e1.id, &path(&longest)).await.unwrap();
        let second = store.attach_image(e2.id, &path(&longest)).await.unwrap();
        assert_eq!(first.image_id, second.image_id);
        assert!(niviz_core::ImagePath::new(scrambled_path(niviz_core::PATH_MAX + 1)).is_err());
    })
    .await;
}

#[tokio::test]
async fn test_failed_attach_leaves_no_orphan_image() {
    run_store_test_both(|store| async move {
        let err = store.attach_image(4_242, &path("/qa/ghost.png")).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
        assert!(
            store
                .get_image_by_path("/qa/ghost.png")
                .await
                .unwrap()
                .is_none()
        );
    })
    .await;
}

#[tokio::test]
async fn test_detach_image_keeps_image_and_gc_removes_it() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e = entity(&store, d.id).await;
        let link = store.attach_image(e.id, &path("/qa/a.png")).await.unwrap();

        store.detach_image(e.id, link.image_id).await.unwrap();
        assert!(matches!(
            store.detach_image(e.id, link.image_id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.get_image(link.image_id).await.unwrap().is_some());
        assert!(store.list_entity_images(e.id).await.unwrap().is_empty());

        assert_eq!(store.delete_orphaned_images().await.unwrap(), 1);
        assert!(store.get_image(link.image_id).await.unwrap().is_none());
        assert_eq!(store.delete_orphaned_images().await.unwrap(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_attach_bumps_entity_updated_at() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e = entity(&store, d.id).await;
        store.attach_image(e.id, &path("/qa/b.png")).await.unwrap();
        let after = store.get_entity(e.id).await.unwrap().unwrap();
        assert!(after.updated_at >= e.updated_at);
    })
    .await;
}

#[tokio::test]
async fn test_metadata_resolution_is_exactly_once() {
    run_store_test_both(|store| async move {
        let k1 = store.resolve_key(&key("site")).await.unwrap();
        let k2 = store.resolve_key(&key("site")).await.unwrap();
        assert_eq!(k1, k2);

        // Key names are case-sensitive.
        let upper = store.resolve_key(&key("Site")).await.unwrap();
        assert_ne!(upper.id, k1.id);

        let m1 = store
            .resolve_metadata(&key("site"), &value("A"))
            .await
            .unwrap();
        let m2 = store
            .resolve_metadata(&key("site"), &value("A"))
            .await
            .unwrap();
        assert_eq!(m1, m2);
        assert_eq!(m1.key_id, k1.id);

        let found = store.find_metadata("site", "A").await.unwrap();
        assert_eq!(found, Some(m1));
        assert!(store.find_metadata("site", "B").await.unwrap().is_none());
        assert_eq!(store.list_key_values(k1.id).await.unwrap().len(), 1);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_creates_one_row() {
    run_store_test_both(|store| async move {
        const WRITERS: usize = 8;
        let d = dataset(&store, "d").await;
        let mut entity_ids = Vec::with_capacity(WRITERS);
        for _ in 0..WRITERS {
            entity_ids.push(entity(&store, d.id).await.id);
        }

        let mut tasks = JoinSet::new();
        for entity_id in entity_ids {
            let store = store.clone();
            tasks.spawn(async move {
                let resolved = store
                    .resolve_metadata(&key("scanner"), &value("prisma"))
                    .await
                    .unwrap();
                let tagged = store
                    .tag_entity(entity_id, &key("scanner"), &value("prisma"))
                    .await
                    .unwrap();
                assert_eq!(tagged.metadata_id, resolved.id);
                resolved.id
            });
        }

        let mut metadata_ids = Vec::with_capacity(WRITERS);
        while let Some(joined) = tasks.join_next().await {
            metadata_ids.push(joined.unwrap());
        }
        metadata_ids.dedup();
        assert_eq!(metadata_ids.len(), 1);

        let keys: Vec<_> = store
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .filter(|k| k.name == "scanner")
            .collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(store.list_key_values(keys[0].id).await.unwrap().len(), 1);
        assert_eq!(
            store.list_tagged_entities(metadata_ids[0]).await.unwrap().len(),
            WRITERS
        );
    })
    .await;
}

#[tokio::test]
async fn test_tag_uniqueness_and_listing() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e = entity(&store, d.id).await;

        let site = tag(&store, e.id, "site", "A").await;
        tag(&store, e.id, "age", "").await;

        let dup = store.tag_entity(e.id, &key("site"), &value("A")).await;
        assert!(matches!(dup, Err(StoreError::DuplicateTag { .. })));
        let dup = store.tag_entity_with(e.id, site).await;
        assert!(matches!(dup, Err(StoreError::DuplicateTag { .. })));

        let tags = store.list_entity_tags(e.id).await.unwrap();
        let pairs: Vec<(&str, &str)> = tags
            .iter()
            .map(|t| (t.key.as_str(), t.value.as_str()))
            .collect();
        assert_eq!(pairs, vec![("age", ""), ("site", "A")]);
        assert_eq!(store.list_tagged_entities(site).await.unwrap(), vec![e.id]);

        store.untag_entity(e.id, site).await.unwrap();
        assert!(matches!(
            store.untag_entity(e.id, site).await,
            Err(StoreError::NotFound(_))
        ));
        // The pair outlives its last tag.
        assert!(store.get_metadata(site).await.unwrap().is_some());
    })
    .await;
}

#[tokio::test]
async fn test_tag_missing_entity_creates_nothing() {
    run_store_test_both(|store| async move {
        let err = store.tag_entity(777, &key("scanner"), &value("X")).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
        assert!(store.get_key_by_name("scanner").await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_grant_uniqueness_and_upsert() {
    run_store_test_both(|store| async move {
        let u = user(&store, "u").await;
        let p = project(&store, "p").await;
        let caps = niviz_core::CapabilitySet::parse("view,share").unwrap();

        store.grant_project(u.id, p.id, caps).await.unwrap();
        let dup = store.grant_project(u.id, p.id, caps).await;
        assert!(matches!(dup, Err(StoreError::DuplicateGrant { .. })));

        let updated = store
            .set_project_grant(u.id, p.id, niviz_core::CapabilitySet::parse("modify").unwrap())
            .await
            .unwrap();
        assert!(updated.can_modify);
        assert!(!updated.can_view);
        assert_eq!(store.list_project_grants(p.id).await.unwrap().len(), 1);

        store.revoke_project_grant(u.id, p.id).await.unwrap();
        assert!(matches!(
            store.revoke_project_grant(u.id, p.id).await,
            Err(StoreError::NotFound(_))
        ));
    })
    .await;
}

#[tokio::test]
async fn test_project_grant_rejects_create_project() {
    let test_store = TestStore::new().await.unwrap();
    let store = test_store.store();
    let u = user(&store, "u").await;
    let p = project(&store, "p").await;

    let err = store
        .grant_project(
            u.id,
            p.id,
            niviz_core::CapabilitySet::parse("view,create_project").unwrap(),
        )
        .await;
    assert!(matches!(err, Err(StoreError::Invalid(_))));
}

#[tokio::test]
async fn test_schema_enforces_metadata_pair_uniqueness() {
    let test_store = TestStore::new().await.unwrap();
    let store = test_store.store();
    let k = store.resolve_key(&key("site")).await.unwrap();
    store
        .resolve_metadata(&key("site"), &value("A"))
        .await
        .unwrap();

    let raw = sqlx::query("INSERT INTO metadata (key_id, value) VALUES (?, ?)")
        .bind(k.id)
        .bind("A")
        .execute(test_store.pool())
        .await;
    assert!(raw.is_err());
}
