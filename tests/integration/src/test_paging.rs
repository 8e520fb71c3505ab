//! Pagination, limits, cursors, indexes and segmented scans.

#[cfg(test)]
mod tests {
    use tablekit_core::{ClientConfig, Cursor, ErrorKind, GROUP_COUNT, SortOrder, Value};
    use tablekit_memory::MemoryTransport;
    use tablekit_model::Operation;

    use crate::{Harness, Order, harness, harness_with};

    async fn seeded(page_size: usize) -> anyhow::Result<Harness> {
        let h = harness_with(
            MemoryTransport::new().with_page_size(page_size),
            ClientConfig::default(),
        );
        for (id, status) in [("o1", "PAID"), ("o2", "SHIPPED")] {
            h.client
                .model::<Order>()
                .create(&Order::new("c1", id, status, 10))
                .await?;
        }
        Ok(h)
    }

    fn ids(orders: &[Order]) -> Vec<&str> {
        orders.iter().map(|o| o.order_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_should_stop_paging_once_the_limit_is_reached() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        let orders = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .limit(1)
            .all()
            .await?;

        assert_eq!(ids(&orders), ["o1"]);
        assert_eq!(h.store.request_count(Operation::Query), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_follow_every_page_without_a_limit() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        let orders = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .all()
            .await?;

        assert_eq!(ids(&orders), ["o1", "o2"]);
        assert_eq!(h.store.request_count(Operation::Query), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_resume_from_a_cursor() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        let first = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .order_by(SortOrder::Desc)
            .all_paginated()
            .await?;
        assert_eq!(ids(&first.items), ["o2"]);
        assert!(first.has_more);
        let cursor = first
            .next_cursor
            .ok_or_else(|| anyhow::anyhow!("first page has no cursor"))?;

        let decoded = Cursor::decode(&cursor)?
            .ok_or_else(|| anyhow::anyhow!("cursor decoded to nothing"))?;
        assert_eq!(decoded.sort, Some(SortOrder::Desc));
        assert_eq!(decoded.last_key.len(), 2);

        let second = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .order_by(SortOrder::Desc)
            .cursor(&cursor)
            .all_paginated()
            .await?;
        assert_eq!(ids(&second.items), ["o1"]);
        assert!(!second.has_more);
        assert!(second.next_cursor.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_should_treat_an_empty_cursor_as_the_first_page() -> anyhow::Result<()> {
        let h = seeded(10).await?;
        assert!(Cursor::decode("")?.is_none());

        let page = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .cursor("")
            .all_paginated()
            .await?;
        assert_eq!(ids(&page.items), ["o1", "o2"]);

        let err = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .cursor("not a cursor")
            .all_paginated()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_query_a_global_index() -> anyhow::Result<()> {
        let h = seeded(10).await?;
        let paid = h
            .client
            .model::<Order>()
            .index("by_status")
            .where_("status", "=", "PAID")
            .all()
            .await?;

        assert_eq!(ids(&paid), ["o1"]);
        assert_eq!(h.store.request_count(Operation::Query), 1);
        assert_eq!(h.store.request_count(Operation::Scan), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_pick_the_status_index_without_being_told() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        let shipped = h
            .client
            .model::<Order>()
            .where_("status", "=", "SHIPPED")
            .all()
            .await?;

        assert_eq!(ids(&shipped), ["o2"]);
        assert!(h.store.request_count(Operation::Query) >= 1);
        assert_eq!(h.store.request_count(Operation::Scan), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_count_across_pages() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        let count = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .count()
            .await?;

        assert_eq!(count, 2);
        assert_eq!(h.store.request_count(Operation::Query), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_scan_every_segment_once() -> anyhow::Result<()> {
        let h = harness();
        for c in 0..12 {
            h.client
                .model::<Order>()
                .create(&Order::new(&format!("c{c}"), "o1", "PAID", c))
                .await?;
        }

        let mut orders = h
            .client
            .model::<Order>()
            .scan_all_segments(4)
            .await?;
        orders.sort_by_key(|o| o.total);

        let totals: Vec<i64> = orders.iter().map(|o| o.total).collect();
        assert_eq!(totals, (0..12).collect::<Vec<_>>());
        assert!(h.store.request_count(Operation::Scan) >= 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_skip_the_offset_across_pages() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        let orders = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .offset(1)
            .all()
            .await?;

        assert_eq!(ids(&orders), ["o2"]);
        assert_eq!(h.store.request_count(Operation::Query), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_should_aggregate_and_group_across_pages() -> anyhow::Result<()> {
        let h = seeded(1).await?;
        h.client
            .model::<Order>()
            .create(&Order::new("c1", "o3", "PAID", 25))
            .await?;
        let by_customer = || h.client.model::<Order>().where_("customer_id", "=", "c1");

        assert!((by_customer().sum("total").await? - 45.0).abs() < f64::EPSILON);
        assert!((by_customer().average("total").await? - 15.0).abs() < f64::EPSILON);
        assert_eq!(by_customer().max("total").await?, Value::number(25));
        assert_eq!(by_customer().count_distinct("status").await?, 2);

        let groups = by_customer()
            .group_by("status")
            .sum("total", "revenue")
            .having(GROUP_COUNT, ">", 1.0)
            .execute()
            .await?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, Value::from("PAID"));
        assert_eq!(groups[0].aggregates["revenue"], Value::number(35));
        Ok(())
    }
}

