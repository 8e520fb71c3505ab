//! Write guards and optimistic locking.

#[cfg(test)]
mod tests {
    use tablekit_core::{ErrorKind, UpdateOps};

    use crate::{Harness, Note, Order, harness};

    async fn stored(h: &Harness, order_id: &str) -> Order {
        h.client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", order_id)
            .first()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_should_overwrite_on_plain_create() {
        let h = harness();
        h.client
            .model::<Order>()
            .create(&Order::new("c1", "o1", "NEW", 10))
            .await
            .unwrap();
        h.client
            .model::<Order>()
            .create(&Order::new("c1", "o1", "PAID", 20))
            .await
            .unwrap();

        let order = stored(&h, "o1").await;
        assert_eq!(order.status, "PAID");
        assert_eq!(order.total, 20);
    }

    #[tokio::test]
    async fn test_should_refuse_create_if_not_exists_on_a_taken_key() {
        let h = harness();
        let order = Order::new("c1", "o1", "NEW", 10);
        h.client
            .model::<Order>()
            .if_not_exists()
            .create(&order)
            .await
            .unwrap();

        let err = h
            .client
            .model::<Order>()
            .if_not_exists()
            .create(&Order::new("c1", "o1", "PAID", 99))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConditionFailed);
        assert_eq!(stored(&h, "o1").await.status, "NEW");
    }

    #[tokio::test]
    async fn test_should_never_fail_create_or_update() {
        let h = harness();
        for status in ["NEW", "PAID", "SHIPPED"] {
            h.client
                .model::<Order>()
                .create_or_update(&Order::new("c1", "o1", status, 10))
                .await
                .unwrap();
        }
        assert_eq!(stored(&h, "o1").await.status, "SHIPPED");
    }

    #[tokio::test]
    async fn test_should_reject_stale_versions_and_bump_current_ones() {
        let h = harness();
        let mut order = Order::new("c1", "o1", "NEW", 10);
        h.client.model::<Order>().create(&order).await.unwrap();
        assert_eq!(stored(&h, "o1").await.version, 0);

        order.status = "PAID".to_owned();
        h.client
            .model::<Order>()
            .update_fields(&order, &["status"])
            .await
            .unwrap();
        let current = stored(&h, "o1").await;
        assert_eq!(current.version, 1);
        assert_eq!(current.status, "PAID");

        // `order` still carries version 0.
        order.status = "CANCELLED".to_owned();
        let err = h
            .client
            .model::<Order>()
            .update_fields(&order, &["status"])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConditionFailed);
        let unchanged = stored(&h, "o1").await;
        assert_eq!(unchanged.version, 1);
        assert_eq!(unchanged.status, "PAID");

        let mut fresh = unchanged;
        fresh.status = "SHIPPED".to_owned();
        h.client
            .model::<Order>()
            .update_fields(&fresh, &["status"])
            .await
            .unwrap();
        assert_eq!(stored(&h, "o1").await.version, 2);
    }

    #[tokio::test]
    async fn test_should_guard_deletes_by_version() {
        let h = harness();
        let order = Order::new("c1", "o1", "NEW", 10);
        h.client.model::<Order>().create(&order).await.unwrap();
        h.client
            .model::<Order>()
            .update_fields(&order, &["status"])
            .await
            .unwrap();

        let stale = Order {
            version: 3,
            ..order
        };
        let err = h
            .client
            .model::<Order>()
            .delete_record(&stale)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConditionFailed);

        let current = stored(&h, "o1").await;
        h.client
            .model::<Order>()
            .delete_record(&current)
            .await
            .unwrap();
        let missing = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .first()
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ItemNotFound);
    }

    #[tokio::test]
    async fn test_should_apply_builder_updates_with_conditions() {
        let h = harness();
        h.client
            .model::<Order>()
            .create(&Order::new("c1", "o1", "NEW", 10))
            .await
            .unwrap();

        let updated = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .update_builder()
            .add("total", 5)
            .set("status", "PAID")
            .condition("status", "=", "NEW")
            .execute_record()
            .await
            .unwrap();
        assert_eq!(updated.total, 15);
        assert_eq!(updated.status, "PAID");
        assert_eq!(updated.version, 1);

        let err = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .update_builder()
            .set("status", "SHIPPED")
            .condition("status", "=", "NEW")
            .execute()
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());
        assert_eq!(stored(&h, "o1").await.status, "PAID");
    }

    #[tokio::test]
    async fn test_should_apply_builder_updates_after_the_version_moved() {
        let h = harness();
        let mut order = Order::new("c1", "o1", "NEW", 10);
        h.client.model::<Order>().create(&order).await.unwrap();
        order.status = "PAID".to_owned();
        h.client
            .model::<Order>()
            .update_fields(&order, &["status"])
            .await
            .unwrap();
        assert_eq!(stored(&h, "o1").await.version, 1);

        let updated = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .update_builder()
            .set("status", "SHIPPED")
            .execute_record()
            .await
            .unwrap();
        assert_eq!(updated.status, "SHIPPED");
        assert_eq!(updated.version, 2);

        let err = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .update_builder()
            .set("status", "RETURNED")
            .condition_version(1)
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConditionFailed);
        assert_eq!(stored(&h, "o1").await.status, "SHIPPED");
    }

    async fn stored_note(h: &Harness) -> Note {
        h.client
            .model::<Note>()
            .where_("id", "=", "n1")
            .first()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_should_keep_created_at_when_upserting_a_stored_record() {
        let h = harness();
        h.client
            .model::<Note>()
            .create(&Note::new("n1", "draft"))
            .await
            .unwrap();
        let mut note = stored_note(&h).await;
        let created_at = note.created_at.clone();
        assert!(created_at.is_some());

        note.body = "final".to_owned();
        h.client
            .model::<Note>()
            .create_or_update(&note)
            .await
            .unwrap();
        let kept = stored_note(&h).await;
        assert_eq!(kept.body, "final");
        assert_eq!(kept.created_at, created_at);

        // A record that was never read carries no creation time, so the
        // replacement is stamped afresh.
        h.client
            .model::<Note>()
            .create_or_update(&Note::new("n1", "rewritten"))
            .await
            .unwrap();
        let fresh = stored_note(&h).await;
        assert_eq!(fresh.body, "rewritten");
        assert!(fresh.created_at.is_some());
        assert_eq!(fresh.created_at, fresh.updated_at);
    }
}
