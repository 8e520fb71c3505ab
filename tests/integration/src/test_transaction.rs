//! Transactions: cancellation reasons, atomicity and transient retries.

#[cfg(test)]
mod tests {
    use tablekit_core::{ErrorKind, TransactCondition};
    use tablekit_model::{AttributeValue, Operation};

    use crate::{Account, Order, harness};

    async fn seed(h: &crate::Harness) {
        h.client
            .model::<Account>()
            .create(&Account::new("a2", 50))
            .await
            .unwrap();
        h.client
            .model::<Account>()
            .create(&Account::new("a3", 20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_should_report_the_failing_operation_by_position() {
        let h = harness();
        seed(&h).await;

        let err = h
            .client
            .transaction()
            .put(&Account::new("a1", 10), &[])
            .create(&Account::new("a2", 0), &[])
            .condition_check(
                &Account::new("a3", 0),
                &[TransactCondition::field("balance", ">=", 10).unwrap()],
            )
            .execute()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionCanceled);
        assert!(err.is_condition_failed());
        assert_eq!(err.failed(), vec![1]);
        let tablekit_core::Error::TransactionCanceled { reasons } = &err else {
            panic!("expected a cancellation, got {err:?}");
        };
        let codes: Vec<&str> = reasons.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, ["None", "ConditionalCheckFailed", "None"]);
        assert_eq!(reasons[1].operation, "Put");

        // Nothing was written.
        let stored = h.store.items("accounts").unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|i| i["id"] != AttributeValue::S("a1".to_owned())));
        assert_eq!(h.store.request_count(Operation::TransactWriteItems), 1);
    }

    #[tokio::test]
    async fn test_should_commit_every_operation_together() {
        let h = harness();
        seed(&h).await;

        h.client
            .transaction()
            .put(&Account::new("a1", 10), &[])
            .update(
                &Account::new("a2", 40),
                &["balance"],
                &[TransactCondition::field("balance", "=", 50).unwrap()],
            )
            .delete(&Account::new("a3", 0), &[])
            .execute()
            .await
            .unwrap();

        let a2 = h
            .client
            .model::<Account>()
            .where_("id", "=", "a2")
            .first()
            .await
            .unwrap();
        assert_eq!(a2.balance, 40);
        let ids: Vec<String> = h
            .client
            .model::<Account>()
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a1".to_owned()));
        assert!(!ids.contains(&"a3".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_a_transient_conflict() {
        let h = harness();
        h.store.faults().conflict_next_transactions(1);

        h.client
            .transaction()
            .put(&Account::new("a1", 10), &[])
            .execute()
            .await
            .unwrap();

        assert_eq!(h.store.request_count(Operation::TransactWriteItems), 2);
        assert_eq!(h.store.items("accounts").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_give_up_after_the_configured_attempts() {
        let h = harness();
        h.store.faults().conflict_next_transactions(10);

        let err = h
            .client
            .transaction()
            .put(&Account::new("a1", 10), &[])
            .execute()
            .await
            .unwrap_err();

        assert!(err.is_transient_cancellation());
        assert!(!err.is_condition_failed());
        // One attempt plus three retries.
        assert_eq!(h.store.request_count(Operation::TransactWriteItems), 4);
        assert!(h.store.items("accounts").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_should_not_retry_a_condition_failure() {
        let h = harness();
        seed(&h).await;

        let err = h
            .client
            .transaction()
            .create(&Account::new("a2", 0), &[])
            .execute()
            .await
            .unwrap_err();

        assert!(err.is_condition_failed());
        assert!(!err.is_transient_cancellation());
        assert_eq!(h.store.request_count(Operation::TransactWriteItems), 1);
    }

    #[tokio::test]
    async fn test_should_guard_versioned_puts() {
        let h = harness();
        let order = Order::new("c1", "o1", "PAID", 100);
        h.client
            .transaction()
            .put(&order, &[])
            .execute()
            .await
            .unwrap();

        let stored = h
            .client
            .model::<Order>()
            .where_("customer_id", "=", "c1")
            .where_("order_id", "=", "o1")
            .first()
            .await
            .unwrap();
        assert_eq!(stored.version, 1);

        // The record still carries version 0, which no longer exists.
        let err = h
            .client
            .transaction()
            .put(&order, &[])
            .execute()
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());

        h.client
            .transaction()
            .put(&stored, &[])
            .execute()
            .await
            .unwrap();
    }
}
