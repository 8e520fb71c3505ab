//! Batch writes and reads: chunking, unprocessed items and the one-by-one
//! flush.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tablekit_core::{
        BatchGetOptions, BatchWriteOptions, Error, ErrorKind, RecordKey, WriteOp,
    };
    use tablekit_model::{AttributeValue, Operation};

    use crate::{Order, harness};

    fn orders(n: usize) -> Vec<Order> {
        (0..n)
            .map(|i| Order::new("c1", &format!("o-{i:02}"), "PAID", 100))
            .collect()
    }

    #[tokio::test]
    async fn test_should_split_writes_into_chunks_of_25() {
        let h = harness();
        h.client.batch().batch_create(&orders(26)).await.unwrap();

        assert_eq!(h.store.request_count(Operation::BatchWriteItem), 2);
        assert_eq!(h.store.items("orders").unwrap().len(), 26);
    }

    #[tokio::test]
    async fn test_should_send_nothing_for_an_empty_batch() {
        let h = harness();
        h.client.batch().batch_create::<Order>(&[]).await.unwrap();
        let records: Vec<Order> = h.client.batch().batch_get(&[]).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(h.store.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_should_report_progress_and_mix_puts_with_deletes() {
        let h = harness();
        h.client.batch().batch_create(&orders(3)).await.unwrap();

        let extra = Order::new("c1", "o-99", "NEW", 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let progress = seen.clone();
        let options = BatchWriteOptions::from_config(h.client.config())
            .with_progress(move |done, _| progress.store(done, Ordering::SeqCst));
        h.client
            .batch()
            .batch_write_with(
                &[
                    WriteOp::Put(&extra),
                    WriteOp::Delete(RecordKey::new("c1").with_sort("o-00")),
                ],
                &options,
            )
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let ids: Vec<String> = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(ids, ["o-01", "o-02", "o-99"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_unprocessed_writes() {
        let h = harness();
        h.store.faults().leave_unprocessed(2, 5);

        h.client.batch().batch_create(&orders(10)).await.unwrap();

        assert_eq!(h.store.request_count(Operation::BatchWriteItem), 3);
        assert_eq!(h.store.items("orders").unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_report_only_the_poisoned_write() {
        let h = harness();
        h.store
            .faults()
            .poison("order_id", AttributeValue::S("o-13".to_owned()));

        let err = h.client.batch().batch_create(&orders(26)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Batch);
        let Error::Batch(batch) = err else {
            panic!("expected a batch error");
        };
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, 13);
        assert_eq!(batch.failed[0].1.kind(), ErrorKind::Validation);
        assert_eq!(h.store.items("orders").unwrap().len(), 25);
        // The poisoned write fell back to a single put.
        assert_eq!(h.store.request_count(Operation::PutItem), 1);
    }

    #[tokio::test]
    async fn test_should_read_in_key_order_and_skip_missing_keys() {
        let h = harness();
        h.client.batch().batch_create(&orders(3)).await.unwrap();

        let keys = [
            RecordKey::new("c1").with_sort("o-02"),
            RecordKey::new("c1").with_sort("o-missing"),
            RecordKey::new("c1").with_sort("o-00"),
            RecordKey::new("c1").with_sort("o-02"),
        ];
        let options = BatchGetOptions::from_config(h.client.config());
        let report = h
            .client
            .batch()
            .batch_get_with::<Order>(&keys, &options)
            .await
            .unwrap();

        let ids: Vec<&str> = report.items.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, ["o-02", "o-00"]);
        assert_eq!(report.missing_keys.len(), 1);
        assert!(report.unprocessed_keys.is_empty());
        assert_eq!(h.store.request_count(Operation::BatchGetItem), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_fail_when_keys_stay_unprocessed() {
        let h = harness();
        h.client.batch().batch_create(&orders(5)).await.unwrap();
        h.store.faults().leave_unprocessed(10, 2);

        let keys: Vec<RecordKey> = (0..5)
            .map(|i| RecordKey::new("c1").with_sort(format!("o-{i:02}")))
            .collect();
        let err = h
            .client
            .batch()
            .batch_get::<Order>(&keys)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BatchIncomplete);
        let Error::BatchIncomplete { unprocessed } = err else {
            panic!("expected an incomplete batch");
        };
        assert_eq!(unprocessed.len(), 2);
        // One attempt plus three retries.
        assert_eq!(h.store.request_count(Operation::BatchGetItem), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_return_unprocessed_keys_when_asked() {
        let h = harness();
        h.client.batch().batch_create(&orders(5)).await.unwrap();
        h.store.faults().leave_unprocessed(10, 2);

        let keys: Vec<RecordKey> = (0..5)
            .map(|i| RecordKey::new("c1").with_sort(format!("o-{i:02}")))
            .collect();
        let options = BatchGetOptions {
            report_unprocessed: true,
            ..BatchGetOptions::from_config(h.client.config())
        };
        let report = h
            .client
            .batch()
            .batch_get_with::<Order>(&keys, &options)
            .await
            .unwrap();

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.unprocessed_keys.len(), 2);
        assert!(report.missing_keys.is_empty());
    }
}
