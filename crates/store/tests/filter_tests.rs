//! Working-set evaluation tests.

mod common;

use common::{dataset, entity, key, pairing, project, run_store_test_both, tag, value};
use niviz_core::ResourceRef;
use niviz_store::StoreError;

#[tokio::test]
async fn test_no_filters_yields_every_entity() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;
        let e1 = entity(&store, d.id).await;
        let e2 = entity(&store, d.id).await;

        // Entities of other datasets never leak in.
        let other = dataset(&store, "other").await;
        entity(&store, other.id).await;

        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![e1.id, e2.id]);
    })
    .await;
}

#[tokio::test]
async fn test_inclusion_and_exclusion_compose_by_and() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;

        let e1 = entity(&store, d.id).await;
        tag(&store, e1.id, "site", "A").await;
        let e2 = entity(&store, d.id).await;
        tag(&store, e2.id, "site", "B").await;

        store
            .add_filter(pd.id, &key("site"), &value("A"), false)
            .await
            .unwrap();
        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![e1.id]);

        // Replace the inclusion with an exclusion on the same pair.
        let filters = store.list_filters(pd.id).await.unwrap();
        assert_eq!(filters.len(), 1);
        store
            .delete(ResourceRef::MetadataFilter(filters[0].id))
            .await
            .unwrap();
        store
            .add_filter(pd.id, &key("site"), &value("A"), true)
            .await
            .unwrap();
        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![e2.id]);

        // Including and excluding the same pair admits nothing.
        store
            .add_filter(pd.id, &key("site"), &value("A"), false)
            .await
            .unwrap();
        assert!(store.working_set(pd.id).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_inclusions_on_same_key_require_both_values() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;

        let both = entity(&store, d.id).await;
        tag(&store, both.id, "site", "A").await;
        tag(&store, both.id, "site", "B").await;
        let only_a = entity(&store, d.id).await;
        tag(&store, only_a.id, "site", "A").await;

        for v in ["A", "B"] {
            store
                .add_filter(pd.id, &key("site"), &value(v), false)
                .await
                .unwrap();
        }
        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![both.id]);
    })
    .await;
}

#[tokio::test]
async fn test_working_set_tracks_tag_changes() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;
        let e = entity(&store, d.id).await;

        store
            .add_filter(pd.id, &key("qc"), &value("fail"), true)
            .await
            .unwrap();
        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![e.id]);

        let fail = tag(&store, e.id, "qc", "fail").await;
        assert!(store.working_set(pd.id).await.unwrap().is_empty());

        store.untag_entity(e.id, fail).await.unwrap();
        assert_eq!(store.working_set(pd.id).await.unwrap(), vec![e.id]);
    })
    .await;
}

#[tokio::test]
async fn test_duplicate_filter_and_missing_pairing() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;

        let filter = store
            .add_filter(pd.id, &key("site"), &value("A"), false)
            .await
            .unwrap();
        let dup = store
            .add_filter_for(pd.id, filter.metadata_id, false)
            .await;
        assert!(matches!(dup, Err(StoreError::DuplicateFilter(_))));

        let missing = store
            .add_filter(pd.id + 100, &key("site"), &value("A"), false)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.working_set(pd.id + 100).await,
            Err(StoreError::NotFound(_))
        ));
    })
    .await;
}

#[tokio::test]
async fn test_detach_removes_filters() {
    run_store_test_both(|store| async move {
        let p = project(&store, "p").await;
        let d = dataset(&store, "d").await;
        let pd = pairing(&store, p.id, d.id).await;
        store
            .add_filter(pd.id, &key("site"), &value("A"), false)
            .await
            .unwrap();
        store
            .add_filter(pd.id, &key("site"), &value("B"), true)
            .await
            .unwrap();

        let stats = store.detach_dataset(p.id, d.id).await.unwrap();
        assert_eq!(stats.metadata_filters, 2);
        assert_eq!(stats.project_datasets, 1);

        // Re-attaching starts from a clean filter list.
        let again = pairing(&store, p.id, d.id).await;
        assert!(store.list_filters(again.id).await.unwrap().is_empty());
    })
    .await;
}
