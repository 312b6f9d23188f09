// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `lock.rs`

#[cfg(test)]
mod tests {
    use crate::lock::LockRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_identity_yields_same_lock() {
        let registry = LockRegistry::new();
        let a = registry.handle("10-0-0-1").await;
        let b = registry.handle("10-0-0-1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_different_identities_yield_different_locks() {
        let registry = LockRegistry::new();
        let a = registry.handle("host-a").await;
        let b = registry.handle("host-b").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_holding_one_identity_does_not_block_another() {
        let registry = LockRegistry::new();
        let _held = registry.acquire("host-a").await;

        let other = tokio::time::timeout(Duration::from_millis(200), registry.acquire("host-b")).await;
        assert!(other.is_ok(), "acquiring a different identity must not block");
    }

    #[tokio::test]
    async fn test_same_identity_blocks_until_released() {
        let registry = LockRegistry::new();
        let held = registry.acquire("host-a").await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), registry.acquire("host-a")).await;
        assert!(blocked.is_err());

        drop(held);
        let acquired =
            tokio::time::timeout(Duration::from_millis(200), registry.acquire("host-a")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_registry_never_evicts() {
        let registry = LockRegistry::new();
        assert!(registry.is_empty().await);
        {
            let _a = registry.acquire("a").await;
            let _b = registry.acquire("b").await;
        }
        let _a_again = registry.acquire("a").await;
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_holders_never_exceed_one() {
        let registry = Arc::new(LockRegistry::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire("shared").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
