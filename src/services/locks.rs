//! 주소별 직렬화
//!
//! 같은 주소에서 서명하는 작업(스윕, 출금 브로드캐스트, 가스 충전, 입금 반영)은
//! 한 번에 하나만 진행된다. 다른 주소끼리는 서로 막지 않는다.
//! 마지막 guard가 해제되면 해당 주소 항목은 맵에서 지워진다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct AddressLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// 주소 잠금 guard. drop 시 잠금을 풀고, 기다리는 쪽이 없으면 항목을 정리한다.
pub struct AddressGuard<'a> {
    owner: &'a AddressLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 주소 잠금 획득. guard가 drop될 때 해제된다.
    pub async fn acquire(&self, address: &str) -> AddressGuard<'_> {
        let key = address.to_lowercase();

        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        AddressGuard {
            owner: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// 두 주소를 항상 같은 순서로 잠근다. 같은 주소면 한 번만.
    pub async fn acquire_pair(
        &self,
        a: &str,
        b: &str,
    ) -> (AddressGuard<'_>, Option<AddressGuard<'_>>) {
        let (a, b) = (a.to_lowercase(), b.to_lowercase());
        if a == b {
            return (self.acquire(&a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.acquire(&first).await;
        let second = self.acquire(&second).await;
        (first, Some(second))
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for AddressGuard<'_> {
    fn drop(&mut self) {
        // 먼저 잠금을 풀어야 참조 수가 맵 하나로 떨어진다
        drop(self.guard.take());

        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&self.key) {
            // 맵 외에 아무도 들고 있지 않을 때만 제거 (복제는 모두 맵 잠금 안에서 일어남)
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_address_is_serialized() {
        let locks = Arc::new(AddressLocks::new());
        let guard = locks.acquire("0xABC").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("0xabc").await;
            })
        };

        // 잠금이 잡혀 있는 동안에는 끝나지 않음
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio_test::assert_ok!(contender.await);
    }

    #[tokio::test]
    async fn test_different_addresses_do_not_block() {
        let locks = AddressLocks::new();
        let _a = locks.acquire("0xaaa").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("0xbbb")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_addresses_are_pruned() {
        let locks = AddressLocks::new();
        for i in 0..100 {
            let _g = locks.acquire(&format!("0x{:040x}", i)).await;
        }
        assert_eq!(locks.tracked(), 0);

        let held = locks.acquire("0xaaa").await;
        assert_eq!(locks.tracked(), 1);
        drop(held);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_entry_survives_while_contended() {
        let locks = Arc::new(AddressLocks::new());
        let guard = locks.acquire("0xabc").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("0xABC").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // 대기자가 Arc를 들고 있으므로 항목이 남아야 함
        drop(guard);
        assert_eq!(locks.tracked(), 1);

        tokio_test::assert_ok!(contender.await);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_pair_locks_same_address_once() {
        let locks = AddressLocks::new();
        let (_first, second) = locks.acquire_pair("0xAAA", "0xaaa").await;
        assert!(second.is_none());
    }
}
