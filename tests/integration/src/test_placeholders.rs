//! Filter composition and placeholder integrity.
//!
//! The store rejects requests carrying unused or undefined placeholders,
//! so every successful call here also proves the compiled request was
//! consistent.

#[cfg(test)]
mod tests {
    use tablekit_core::{ErrorKind, Operator, TransactCondition, UpdateOps};
    use tablekit_model::Operation;

    use crate::{Harness, Order, harness};

    async fn seeded() -> Harness {
        let h = harness();
        for (id, status, total) in [
            ("o1", "PAID", 10),
            ("o2", "SHIPPED", 20),
            ("o3", "PENDING", 30),
        ] {
            h.client
                .model::<Order>()
                .create(&Order::new("c1", id, status, total))
                .await
                .unwrap();
        }
        h
    }

    fn ids(orders: &[Order]) -> Vec<&str> {
        orders.iter().map(|o| o.order_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_should_match_either_side_of_an_or_group() {
        let h = seeded().await;
        let forward = h
            .client
            .model::<Order>()
            .filter_group(|g| {
                g.filter("status", "=", "PAID")
                    .or_filter("status", "=", "SHIPPED")
            })
            .all()
            .await
            .unwrap();
        let reversed = h
            .client
            .model::<Order>()
            .filter_group(|g| {
                g.filter("status", "=", "SHIPPED")
                    .or_filter("status", "=", "PAID")
            })
            .all()
            .await
            .unwrap();

        assert_eq!(ids(&forward), ["o1", "o2"]);
        assert_eq!(ids(&forward), ids(&reversed));
        assert_eq!(h.store.request_count(Operation::Scan), 2);
    }

    #[tokio::test]
    async fn test_should_bind_and_before_or_inside_a_query() {
        let h = seeded().await;
        let orders = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .filter("total", ">", 15)
            .filter_group(|g| {
                g.filter("status", "=", "PAID")
                    .or_filter("status", "=", "PENDING")
            })
            .all()
            .await
            .unwrap();

        assert_eq!(ids(&orders), ["o3"]);
        assert_eq!(h.store.request_count(Operation::Query), 1);
    }

    #[tokio::test]
    async fn test_should_keep_repeated_values_in_separate_placeholders() {
        let h = seeded().await;
        let orders = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", Operator::Between, vec!["o1", "o2"])
            .filter("status", "<>", "c1")
            .select(&["order_id", "status", "total", "customer_id", "version"])
            .all()
            .await
            .unwrap();

        assert_eq!(ids(&orders), ["o1", "o2"]);
    }

    #[tokio::test]
    async fn test_should_compile_consistent_writes() {
        let h = seeded().await;
        h.client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o3")
            .update_builder()
            .set("status", "PAID")
            .increment("total")
            .condition_exists("status")
            .or_condition("total", ">=", 30)
            .execute()
            .await
            .unwrap();

        h.client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o2")
            .with_condition("status", "=", "SHIPPED")
            .delete()
            .await
            .unwrap();

        h.client
            .transaction()
            .condition_check(
                &Order::new("c1", "o1", "", 0),
                &[
                    TransactCondition::field("status", "=", "PAID").unwrap(),
                    TransactCondition::raw(
                        "total < :max",
                        [(":max", 100)],
                    ),
                ],
            )
            .put(&Order::new("c1", "o4", "NEW", 1), &[])
            .execute()
            .await
            .unwrap();

        let orders = h.client.model::<Order>().all().await.unwrap();
        assert_eq!(ids(&orders), ["o1", "o3", "o4"]);
        assert_eq!(orders[1].total, 31);
    }

    #[tokio::test]
    async fn test_should_reject_a_dangling_placeholder_before_sending() {
        let h = seeded().await;
        let before = h.store.total_requests();
        let err = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .with_raw_condition("#missing = :v", [(":v", "x")])
            .delete()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.store.total_requests(), before);
    }
}
