use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use super::codec::ZERO_BYTE;
use super::error::{StoreError, StoreResult};
use super::expiry::LeaseManager;
use super::request::*;
use super::traits::{Store, WatchStream};

struct WatchRegistration {
    stream_id: u64,
    key: Vec<u8>,
    range_end: Vec<u8>,
    sender: Sender<WatchResponse>,
}

#[derive(Default)]
struct StoreState {
    data: BTreeMap<Vec<u8>, KeyValue>,
    revision: Revision,
    leases: LeaseManager,
    watches: HashMap<WatchId, WatchRegistration>,
    next_watch_id: WatchId,
    next_stream_id: u64,
}

impl StoreState {
    fn select(&self, start: &[u8], range_end: &[u8]) -> Vec<&KeyValue> {
        if range_end.is_empty() {
            return self.data.get(start).into_iter().collect();
        }
        let upper = if range_end == ZERO_BYTE {
            Bound::Unbounded
        } else if range_end <= start {
            return Vec::new();
        } else {
            Bound::Excluded(range_end.to_vec())
        };
        self.data
            .range::<Vec<u8>, _>((Bound::Included(start.to_vec()), upper))
            .map(|(_, kv)| kv)
            .collect()
    }

    fn check_revision(&self, revision: Revision) -> StoreResult<()> {
        if revision > 0 && revision != self.revision {
            return Err(StoreError::Backend(format!(
                "修订版本 {} 不可用，当前版本为 {}",
                revision, self.revision
            )));
        }
        Ok(())
    }

    fn range(&self, req: &RangeRequest) -> StoreResult<RangeResponse> {
        self.check_revision(req.revision)?;
        let selected = self.select(&req.key, &req.range_end);
        let count = selected.len() as i64;
        let take = if req.limit > 0 { req.limit as usize } else { selected.len() };
        let kvs = selected
            .into_iter()
            .take(take)
            .map(|kv| {
                let mut kv = kv.clone();
                if req.keys_only {
                    kv.value.clear();
                }
                kv
            })
            .collect();
        Ok(RangeResponse {
            kvs,
            count,
            revision: self.revision,
        })
    }

    fn compare(&self, cmp: &Compare) -> bool {
        let current = self.data.get(&cmp.key);
        let ordering = match &cmp.target {
            CompareTarget::Version(v) => current.map_or(0, |kv| kv.version).cmp(v),
            CompareTarget::CreateRevision(r) => current.map_or(0, |kv| kv.create_revision).cmp(r),
            CompareTarget::ModRevision(r) => current.map_or(0, |kv| kv.mod_revision).cmp(r),
            CompareTarget::Value(v) => match current {
                Some(kv) => kv.value.as_slice().cmp(v.as_slice()),
                None => return false,
            },
        };
        match cmp.result {
            CompareResult::Equal => ordering.is_eq(),
            CompareResult::NotEqual => ordering.is_ne(),
            CompareResult::Greater => ordering.is_gt(),
            CompareResult::Less => ordering.is_lt(),
        }
    }

    /// 事务执行前校验，保证后续写入不会中途失败
    fn validate(&self, ops: &[TxnOp]) -> StoreResult<()> {
        let mut written: HashSet<&[u8]> = HashSet::new();
        for op in ops {
            match op {
                TxnOp::Range(req) => self.check_revision(req.revision)?,
                TxnOp::Put(req) => {
                    self.validate_put(req, &written)?;
                    written.insert(req.key.as_slice());
                }
                TxnOp::DeleteRange(_) => {}
            }
        }
        Ok(())
    }

    fn validate_put(&self, req: &PutRequest, written: &HashSet<&[u8]>) -> StoreResult<()> {
        if req.ignore_value
            && !self.data.contains_key(&req.key)
            && !written.contains(req.key.as_slice())
        {
            return Err(StoreError::KeyNotFound(
                String::from_utf8_lossy(&req.key).into_owned(),
            ));
        }
        if req.lease != 0 && !self.leases.contains(req.lease) {
            return Err(StoreError::Backend(format!("租约 {} 不存在", req.lease)));
        }
        Ok(())
    }

    fn apply_put(
        &mut self,
        req: PutRequest,
        revision: Revision,
        events: &mut Vec<WatchEvent>,
    ) -> StoreResult<PutResponse> {
        let prev = self.data.get(&req.key).cloned();
        let value = if req.ignore_value {
            prev.as_ref().map(|kv| kv.value.clone()).unwrap_or_default()
        } else {
            req.value
        };

        if let Some(p) = &prev {
            if p.lease != 0 && p.lease != req.lease {
                self.leases.detach(p.lease, &req.key);
            }
        }
        if req.lease != 0 {
            self.leases.attach(req.lease, &req.key)?;
        }

        let kv = KeyValue {
            key: req.key.clone(),
            value,
            create_revision: prev.as_ref().map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: prev.as_ref().map_or(1, |p| p.version + 1),
            lease: req.lease,
        };
        self.data.insert(req.key, kv.clone());
        events.push(WatchEvent {
            kind: EventKind::Put,
            kv,
            prev_kv: prev.clone(),
        });

        Ok(PutResponse {
            revision,
            prev_kv: prev,
        })
    }

    fn remove_key(&mut self, key: &[u8], revision: Revision, events: &mut Vec<WatchEvent>) -> bool {
        match self.data.remove(key) {
            Some(prev) => {
                if prev.lease != 0 {
                    self.leases.detach(prev.lease, key);
                }
                events.push(WatchEvent {
                    kind: EventKind::Delete,
                    kv: KeyValue {
                        key: key.to_vec(),
                        mod_revision: revision,
                        ..Default::default()
                    },
                    prev_kv: Some(prev),
                });
                true
            }
            None => false,
        }
    }

    fn apply_delete(
        &mut self,
        req: &DeleteRangeRequest,
        revision: Revision,
        events: &mut Vec<WatchEvent>,
    ) -> DeleteRangeResponse {
        let keys: Vec<Vec<u8>> = self
            .select(&req.key, &req.range_end)
            .into_iter()
            .map(|kv| kv.key.clone())
            .collect();
        let mut deleted = 0;
        for key in &keys {
            if self.remove_key(key, revision, events) {
                deleted += 1;
            }
        }
        DeleteRangeResponse {
            deleted,
            revision,
        }
    }

    /// 有写入时推进修订版本并通知 watch
    fn commit(&mut self, revision: Revision, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        self.revision = revision;

        let mut dead = Vec::new();
        for (id, reg) in &self.watches {
            let matched: Vec<WatchEvent> = events
                .iter()
                .filter(|ev| key_in_range(&ev.kv.key, &reg.key, &reg.range_end))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            let resp = WatchResponse {
                watch_id: *id,
                events: matched,
                revision,
            };
            if reg.sender.send(resp).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.watches.remove(&id);
        }
    }

    /// 惰性清理到期租约绑定的键
    fn expire_leases(&mut self) {
        let keys = self.leases.take_expired();
        if keys.is_empty() {
            return;
        }
        let revision = self.revision + 1;
        let mut events = Vec::new();
        for key in keys {
            self.remove_key(&key, revision, &mut events);
        }
        debug!("租约到期，删除了 {} 个键", events.len());
        self.commit(revision, events);
    }
}

/// 进程内的参考存储实现
///
/// 有序映射加全局修订版本号，不做持久化，也不保留历史版本。
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        lock_state(&self.state)
    }

    /// 当前修订版本
    pub fn revision(&self) -> StoreResult<Revision> {
        Ok(self.state()?.revision)
    }
}

fn lock_state(state: &Mutex<StoreState>) -> StoreResult<MutexGuard<'_, StoreState>> {
    state
        .lock()
        .map_err(|_| StoreError::Backend("存储状态锁已损坏".to_string()))
}

impl Store for MemoryStore {
    fn range(&self, req: RangeRequest) -> StoreResult<RangeResponse> {
        let mut state = self.state()?;
        state.expire_leases();
        state.range(&req)
    }

    fn put(&self, req: PutRequest) -> StoreResult<PutResponse> {
        let mut state = self.state()?;
        state.expire_leases();
        state.validate_put(&req, &HashSet::new())?;

        let revision = state.revision + 1;
        let mut events = Vec::new();
        let resp = state.apply_put(req, revision, &mut events)?;
        state.commit(revision, events);
        Ok(resp)
    }

    fn delete_range(&self, req: DeleteRangeRequest) -> StoreResult<DeleteRangeResponse> {
        let mut state = self.state()?;
        state.expire_leases();
        let revision = state.revision + 1;
        let mut events = Vec::new();
        let mut resp = state.apply_delete(&req, revision, &mut events);
        state.commit(revision, events);
        resp.revision = state.revision;
        Ok(resp)
    }

    fn lease_grant(&self, ttl_seconds: i64) -> StoreResult<LeaseId> {
        let mut state = self.state()?;
        state.leases.grant(ttl_seconds)
    }

    fn txn(&self, req: TxnRequest) -> StoreResult<TxnResponse> {
        let mut state = self.state()?;
        state.expire_leases();

        let succeeded = req.compare.iter().all(|cmp| state.compare(cmp));
        let ops = if succeeded { req.success } else { req.failure };
        state.validate(&ops)?;

        let revision = state.revision + 1;
        let mut events = Vec::new();
        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            let resp = match op {
                TxnOp::Range(r) => TxnOpResponse::Range(state.range(&r)?),
                TxnOp::Put(p) => TxnOpResponse::Put(state.apply_put(p, revision, &mut events)?),
                TxnOp::DeleteRange(d) => {
                    TxnOpResponse::DeleteRange(state.apply_delete(&d, revision, &mut events))
                }
            };
            responses.push(resp);
        }
        state.commit(revision, events);

        Ok(TxnResponse {
            succeeded,
            responses,
            revision: state.revision,
        })
    }

    fn watch_stream(&self) -> StoreResult<(Box<dyn WatchStream>, Receiver<WatchResponse>)> {
        let (tx, rx) = mpsc::channel();
        let stream_id = {
            let mut state = self.state()?;
            state.next_stream_id += 1;
            state.next_stream_id
        };
        let stream = MemoryWatchStream {
            state: Arc::clone(&self.state),
            stream_id,
            sender: Some(tx),
        };
        Ok((Box::new(stream), rx))
    }
}

/// `MemoryStore` 的 watch 流，drop 时自动关闭
pub struct MemoryWatchStream {
    state: Arc<Mutex<StoreState>>,
    stream_id: u64,
    sender: Option<Sender<WatchResponse>>,
}

impl WatchStream for MemoryWatchStream {
    fn watch(&mut self, key: &[u8], range_end: &[u8], start_revision: Revision) -> StoreResult<WatchId> {
        let sender = self.sender.clone().ok_or(StoreError::WatchClosed)?;
        let mut state = lock_state(&self.state)?;
        if start_revision > 0 && start_revision <= state.revision {
            return Err(StoreError::Backend(format!(
                "不保留历史版本，无法从修订版本 {} 开始 watch",
                start_revision
            )));
        }

        state.next_watch_id += 1;
        let id = state.next_watch_id;
        state.watches.insert(
            id,
            WatchRegistration {
                stream_id: self.stream_id,
                key: key.to_vec(),
                range_end: range_end.to_vec(),
                sender,
            },
        );
        Ok(id)
    }

    fn cancel(&mut self, id: WatchId) -> StoreResult<()> {
        let mut state = lock_state(&self.state)?;
        if state
            .watches
            .get(&id)
            .is_some_and(|reg| reg.stream_id == self.stream_id)
        {
            state.watches.remove(&id);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.sender = None;
        let stream_id = self.stream_id;
        if let Ok(mut state) = self.state.lock() {
            state.watches.retain(|_, reg| reg.stream_id != stream_id);
        }
    }
}

impl Drop for MemoryWatchStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::codec::prefix_upper_bound;
    use std::thread::sleep;
    use std::time::Duration;

    fn put(store: &MemoryStore, key: &str, value: &str) {
        store.put(PutRequest::new(key, value)).unwrap();
    }

    #[test]
    fn test_range_end_conventions() {
        let store = MemoryStore::new();
        put(&store, "a", "1");
        put(&store, "b", "2");
        put(&store, "c", "3");

        // 空 range_end 只匹配单个键
        let res = store.range(RangeRequest::single("b")).unwrap();
        assert_eq!(res.count, 1);
        assert_eq!(res.kvs[0].value, b"2".to_vec());

        // 零字节表示起始键之后的全部键
        let res = store.range(RangeRequest::range("b", ZERO_BYTE)).unwrap();
        assert_eq!(res.count, 2);

        let res = store.range(RangeRequest::range("a", "c").keys_only()).unwrap();
        let keys: Vec<_> = res.kvs.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(res.kvs.iter().all(|kv| kv.value.is_empty()));

        // 倒置区间为空
        assert_eq!(store.range(RangeRequest::range("c", "a")).unwrap().count, 0);
    }

    #[test]
    fn test_versions_and_revisions() {
        let store = MemoryStore::new();
        put(&store, "k", "v1");
        put(&store, "k", "v2");
        let kv = store.range(RangeRequest::single("k")).unwrap().kvs.remove(0);
        assert_eq!(kv.version, 2);
        assert_eq!(kv.create_revision, 1);
        assert_eq!(kv.mod_revision, 2);
        assert_eq!(store.revision().unwrap(), 2);

        // 删除不存在的键不推进版本
        store.delete_range(DeleteRangeRequest::single("none")).unwrap();
        assert_eq!(store.revision().unwrap(), 2);

        let mut req = RangeRequest::single("k");
        req.revision = 1;
        assert!(store.range(req).is_err());
    }

    #[test]
    fn test_txn_compare_branches() {
        let store = MemoryStore::new();
        let txn = || TxnRequest {
            compare: vec![Compare::version("lock", CompareResult::Equal, 0)],
            success: vec![TxnOp::Put(PutRequest::new("lock", ZERO_BYTE))],
            failure: vec![TxnOp::Range(RangeRequest::single("lock"))],
        };

        let first = store.txn(txn()).unwrap();
        assert!(first.succeeded);
        let second = store.txn(txn()).unwrap();
        assert!(!second.succeeded);
        match &second.responses[0] {
            TxnOpResponse::Range(r) => assert_eq!(r.kvs[0].value, ZERO_BYTE.to_vec()),
            other => panic!("unexpected response {:?}", other),
        }

        // 多个写操作共享同一个修订版本
        let resp = store
            .txn(TxnRequest {
                compare: vec![],
                success: vec![
                    TxnOp::DeleteRange(DeleteRangeRequest::single("lock")),
                    TxnOp::Put(PutRequest::new("value", "x")),
                ],
                failure: vec![],
            })
            .unwrap();
        assert!(resp.succeeded);
        assert_eq!(resp.revision, first.revision + 1);
    }

    #[test]
    fn test_ignore_value_requires_existing_key() {
        let store = MemoryStore::new();
        let lease = store.lease_grant(10).unwrap();
        let req = PutRequest {
            key: b"missing".to_vec(),
            lease,
            ignore_value: true,
            ..Default::default()
        };
        assert!(matches!(store.put(req), Err(StoreError::KeyNotFound(_))));
        assert_eq!(store.revision().unwrap(), 0);
    }

    #[test]
    fn test_lease_expiry() {
        let store = MemoryStore::new();
        put(&store, "temp", "value");
        let lease = store.lease_grant(1).unwrap();
        store
            .put(PutRequest {
                key: b"temp".to_vec(),
                lease,
                ignore_value: true,
                ..Default::default()
            })
            .unwrap();

        let kv = store.range(RangeRequest::single("temp")).unwrap().kvs.remove(0);
        assert_eq!(kv.value, b"value".to_vec());

        sleep(Duration::from_millis(1200));
        assert_eq!(store.range(RangeRequest::single("temp")).unwrap().count, 0);
    }

    #[test]
    fn test_watch_stream_delivery() {
        let store = MemoryStore::new();
        let (mut stream, rx) = store.watch_stream().unwrap();
        let id = stream.watch(b"p", &prefix_upper_bound(b"p"), 0).unwrap();

        put(&store, "p1", "a");
        put(&store, "q1", "b");
        store.delete_range(DeleteRangeRequest::single("p1")).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.watch_id, id);
        assert_eq!(first.events[0].kind, EventKind::Put);
        assert_eq!(first.events[0].kv.key, b"p1".to_vec());
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(second.events[0].kind, EventKind::Delete);
        assert_eq!(second.events[0].prev_kv.as_ref().unwrap().value, b"a".to_vec());

        stream.cancel(id).unwrap();
        put(&store, "p2", "c");
        assert!(rx.try_recv().is_err());

        // 关闭后接收端断开
        stream.close();
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }
}
