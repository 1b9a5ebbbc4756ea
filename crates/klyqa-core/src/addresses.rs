//! The *current addresses* set (§3 Connection, §5): enforces exactly one
//! live connection per remote IP.

use std::collections::HashSet;
use std::net::IpAddr;

use tokio::sync::Mutex;

#[derive(Default)]
pub struct CurrentAddresses {
    inner: Mutex<HashSet<IpAddr>>,
}

impl CurrentAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `ip` was not already present (i.e. this accept
    /// may proceed); `false` means a live connection for `ip` exists and
    /// the new one must be closed immediately (§4.6 tie-break).
    pub async fn try_insert(&self, ip: IpAddr) -> bool {
        self.inner.lock().await.insert(ip)
    }

    pub async fn remove(&self, ip: &IpAddr) {
        self.inner.lock().await.remove(ip);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_insert_of_same_ip_is_rejected_until_removed() {
        let set = CurrentAddresses::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(set.try_insert(ip).await);
        assert!(!set.try_insert(ip).await);
        set.remove(&ip).await;
        assert!(set.try_insert(ip).await);
    }
}
