//! Backoff schedules, throttling and cooperative cancellation.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tablekit_core::{CancellationToken, ClientConfig, ErrorKind, RetryPolicy};
    use tablekit_memory::MemoryTransport;
    use tablekit_model::Operation;
    use tokio::time::Instant;

    use crate::{Account, Order, harness, harness_with};

    fn fixed(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(250))
            .jitter(0.0)
            .build()
    }

    #[test]
    fn test_should_double_delays_up_to_the_cap() {
        let policy = fixed(3);
        let delays: Vec<u128> = (0..4).map(|a| policy.delay(a).as_millis()).collect();
        assert_eq!(delays, [100, 200, 250, 250]);
    }

    #[test]
    fn test_should_keep_jitter_within_its_band() {
        let policy = RetryPolicy {
            jitter: 0.1,
            ..fixed(3)
        };
        for _ in 0..200 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_millis(90), "{delay:?}");
            assert!(delay <= Duration::from_millis(110), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_sleep_between_batch_retries() {
        let config = ClientConfig::builder().batch_retry(Some(fixed(3))).build();
        let h = harness_with(MemoryTransport::new(), config);
        h.store.faults().leave_unprocessed(3, 1);

        let started = Instant::now();
        h.client
            .batch()
            .batch_create(&[Order::new("c1", "o1", "NEW", 1)])
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
        assert_eq!(h.store.request_count(Operation::BatchWriteItem), 4);
    }

    #[tokio::test]
    async fn test_should_flush_immediately_without_a_batch_policy() {
        let config = ClientConfig::builder().batch_retry(None).build();
        let h = harness_with(MemoryTransport::new(), config);
        h.store.faults().leave_unprocessed(1, 1);

        h.client
            .batch()
            .batch_create(&[Order::new("c1", "o1", "NEW", 1)])
            .await
            .unwrap();

        assert_eq!(h.store.request_count(Operation::BatchWriteItem), 1);
        assert_eq!(h.store.request_count(Operation::PutItem), 1);
        assert_eq!(h.store.items("orders").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_throttled_transactions() {
        let h = harness();
        h.store.faults().throttle_next(Operation::TransactWriteItems, 2);

        h.client
            .transaction()
            .put(&Account::new("a1", 1), &[])
            .execute()
            .await
            .unwrap();
        assert_eq!(h.store.request_count(Operation::TransactWriteItems), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_a_throttled_single_write() {
        let h = harness();
        h.store.faults().throttle_next(Operation::PutItem, 1);

        h.client
            .model::<Account>()
            .create(&Account::new("a1", 1))
            .await
            .unwrap();

        assert_eq!(h.store.request_count(Operation::PutItem), 2);
        assert_eq!(h.store.items("accounts").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_surface_throttling_after_the_request_policy() {
        let config = ClientConfig::builder().request_retry(Some(fixed(3))).build();
        let h = harness_with(MemoryTransport::new(), config);
        h.store.faults().throttle_next(Operation::PutItem, 10);

        let started = Instant::now();
        let err = h
            .client
            .model::<Account>()
            .create(&Account::new("a1", 1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Throttled);
        assert_eq!(h.store.request_count(Operation::PutItem), 4);
        assert!(started.elapsed() >= Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_a_throttled_query_page() {
        let h = harness();
        h.client
            .model::<Order>()
            .create(&Order::new("c1", "o1", "NEW", 1))
            .await
            .unwrap();
        h.store.faults().throttle_next(Operation::Query, 2);

        let orders = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .all()
            .await
            .unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(h.store.request_count(Operation::Query), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_abort_a_retry_sleep_when_cancelled() {
        let h = harness();
        h.store.faults().conflict_next_transactions(10);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = h
            .client
            .transaction()
            .put(&Account::new("a1", 1), &[])
            .execute_with(&token)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(h.store.request_count(Operation::TransactWriteItems), 1);
    }

    #[tokio::test]
    async fn test_should_not_send_with_a_cancelled_token() {
        let h = harness();
        let token = CancellationToken::new();
        token.cancel();

        let err = h
            .client
            .model::<Order>()
            .with_cancellation(&token)
            .where_("customer_id", "=", "c1")
            .all()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(h.store.total_requests(), 0);
    }
}
