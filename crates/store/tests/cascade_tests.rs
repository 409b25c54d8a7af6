//! Cascade deletion tests.

mod common;

use common::{
    dataset, entity, key, pairing, path, project, run_store_test_both, tag, user, value,
};
use niviz_core::{CapabilitySet, ResourceRef};
use niviz_store::StoreError;

#[tokio::test]
async fn test_delete_dataset_removes_graph_but_keeps_images() {
    run_store_test_both(|store| async move {
        let u = user(&store, "u").await;
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;
        store
            .grant_dataset(u.id, d.id, CapabilitySet::parse("view").unwrap())
            .await
            .unwrap();

        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;
        let link = store.attach_image(e1.id, &path("/qa/shared.png")).await.unwrap();
        store.attach_image(e2.id, &path("/qa/shared.png")).await.unwrap();
        let site = tag(&store, e1.id, "site", "A").await;
        store
            .add_filter(pd.id, &key("site"), &value("A"), false)
            .await
            .unwrap();

        let stats = store.delete(ResourceRef::Dataset(d.id)).await.unwrap();
        assert_eq!(stats.datasets, 1);
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.entity_images, 2);
        assert_eq!(stats.entity_metadata, 1);
        assert_eq!(stats.metadata_filters, 1);
        assert_eq!(stats.project_datasets, 1);
        assert_eq!(stats.dataset_permissions, 1);
        assert_eq!(stats.images, 0);

        assert!(store.get_dataset(d.id).await.unwrap().is_none());
        assert!(store.get_entity(e1.id).await.unwrap().is_none());
        assert!(store.get_project_dataset(pd.id).await.unwrap().is_none());
        assert!(store.get_dataset_grant(u.id, d.id).await.unwrap().is_none());

        // Images and metadata pairs are shared vocabulary and survive.
        assert!(store.get_image(link.image_id).await.unwrap().is_some());
        assert_eq!(store.image_reference_count(link.image_id).await.unwrap(), 0);
        assert!(store.get_metadata(site).await.unwrap().is_some());
        // The project survives with no pairings.
        assert!(store.get_project(p.id).await.unwrap().is_some());
        assert!(store.list_project_datasets(p.id).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_delete_project_keeps_datasets() {
    run_store_test_both(|store| async move {
        let u = user(&store, "u").await;
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;
        let e = entity(&store, d.id).await;
        store
            .grant_project(u.id, p.id, CapabilitySet::parse("view,admin").unwrap())
            .await
            .unwrap();
        store
            .add_filter(pd.id, &key("site"), &value("A"), true)
            .await
            .unwrap();

        let stats = store.delete(ResourceRef::Project(p.id)).await.unwrap();
        assert_eq!(stats.projects, 1);
        assert_eq!(stats.project_permissions, 1);
        assert_eq!(stats.project_datasets, 1);
        assert_eq!(stats.metadata_filters, 1);
        assert_eq!(stats.entities, 0);

        assert!(store.get_dataset(d.id).await.unwrap().is_some());
        assert!(store.get_entity(e.id).await.unwrap().is_some());
    })
    .await;
}

#[tokio::test]
async fn test_delete_entity_keeps_shared_image() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;
        let link = store.attach_image(e1.id, &path("/qa/x.png")).await.unwrap();
        store.attach_image(e2.id, &path("/qa/x.png")).await.unwrap();
        tag(&store, e1.id, "site", "A").await;

        let stats = store.delete(ResourceRef::Entity(e1.id)).await.unwrap();
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.entity_images, 1);
        assert_eq!(stats.entity_metadata, 1);
        assert_eq!(stats.total(), 3);

        assert_eq!(
            store.list_image_entities(link.image_id).await.unwrap(),
            vec![e2.id]
        );
    })
    .await;
}

#[tokio::test]
async fn test_delete_user_removes_grants() {
    run_store_test_both(|store| async move {
        let u = user(&store, "u").await;
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        store
            .grant_project(u.id, p.id, CapabilitySet::parse("view").unwrap())
            .await
            .unwrap();
        store
            .grant_dataset(u.id, d.id, CapabilitySet::parse("view").unwrap())
            .await
            .unwrap();

        let stats = store.delete(ResourceRef::User(u.id)).await.unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.project_permissions, 1);
        assert_eq!(stats.dataset_permissions, 1);
        assert!(store.list_user_project_grants(u.id).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_delete_metadata_key_removes_pairs_tags_and_filters() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;
        let e = entity(&store, d.id).await;
        tag(&store, e.id, "site", "A").await;
        tag(&store, e.id, "site", "B").await;
        tag(&store, e.id, "age", "42").await;
        store
            .add_filter(pd.id, &key("site"), &value("A"), false)
            .await
            .unwrap();

        let site = store.get_key_by_name("site").await.unwrap().unwrap();
        let stats = store
            .delete(ResourceRef::MetadataKey(site.id))
            .await
            .unwrap();
        assert_eq!(stats.metadata_keys, 1);
        assert_eq!(stats.metadata, 2);
        assert_eq!(stats.entity_metadata, 2);
        assert_eq!(stats.metadata_filters, 1);

        let tags = store.list_entity_tags(e.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].key, "age");
        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![e.id]);
    })
    .await;
}

#[tokio::test]
async fn test_delete_image_detaches_everywhere() {
    run_store_test_both(|store| async move {
        let d = dataset(&store, "d").await;
        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;
        let link = store.attach_image(e1.id, &path("/qa/y.png")).await.unwrap();
        store.attach_image(e2.id, &path("/qa/y.png")).await.unwrap();

        let stats = store.delete(ResourceRef::Image(link.image_id)).await.unwrap();
        assert_eq!(stats.images, 1);
        assert_eq!(stats.entity_images, 2);
        assert!(store.list_entity_images(e2.id).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_delete_missing_row_is_not_found() {
    run_store_test_both(|store| async move {
        for resource in [
            ResourceRef::User(1_000),
            ResourceRef::Project(1_000),
            ResourceRef::Dataset(1_000),
            ResourceRef::ProjectDataset(1_000),
            ResourceRef::Entity(1_000),
            ResourceRef::Image(1_000),
            ResourceRef::MetadataKey(1_000),
            ResourceRef::Metadata(1_000),
            ResourceRef::MetadataFilter(1_000),
        ] {
            let err = store.delete(resource).await;
            assert!(
                matches!(err, Err(StoreError::NotFound(_))),
                "expected NotFound for {resource}"
            );
        }
    })
    .await;
}
