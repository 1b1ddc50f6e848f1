use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::error::{StoreError, StoreResult};
use super::request::LeaseId;

#[derive(Debug, Clone)]
struct Lease {
    expires_at: Instant,
    keys: HashSet<Vec<u8>>,
}

/// 租约管理器：记录每个租约的到期时间及其绑定的键
#[derive(Debug, Clone)]
pub struct LeaseManager {
    leases: HashMap<LeaseId, Lease>,
    next_id: LeaseId,
}

impl LeaseManager {
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
            next_id: 1,
        }
    }

    /// 申请租约
    pub fn grant(&mut self, ttl_seconds: i64) -> StoreResult<LeaseId> {
        if ttl_seconds <= 0 {
            return Err(StoreError::Backend(format!(
                "租约时长必须为正数，收到 {}",
                ttl_seconds
            )));
        }
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(ttl_seconds as u64))
            .ok_or_else(|| StoreError::Backend(format!("租约时长 {} 秒超出范围", ttl_seconds)))?;
        let id = self.next_id;
        self.next_id += 1;
        self.leases.insert(
            id,
            Lease {
                expires_at,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    pub fn contains(&self, id: LeaseId) -> bool {
        self.leases.contains_key(&id)
    }

    /// 把键绑定到租约
    pub fn attach(&mut self, id: LeaseId, key: &[u8]) -> StoreResult<()> {
        match self.leases.get_mut(&id) {
            Some(lease) => {
                lease.keys.insert(key.to_vec());
                Ok(())
            }
            None => Err(StoreError::Backend(format!("租约 {} 不存在", id))),
        }
    }

    /// 解除绑定，租约本身保留
    pub fn detach(&mut self, id: LeaseId, key: &[u8]) {
        if let Some(lease) = self.leases.get_mut(&id) {
            lease.keys.remove(key);
        }
    }

    /// 移除所有已到期的租约，返回需要删除的键
    pub fn take_expired(&mut self) -> Vec<Vec<u8>> {
        let now = Instant::now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| now >= lease.expires_at)
            .map(|(id, _)| *id)
            .collect();

        let mut keys = Vec::new();
        for id in expired {
            if let Some(lease) = self.leases.remove(&id) {
                keys.extend(lease.keys);
            }
        }
        keys
    }
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::new()
    }
}
