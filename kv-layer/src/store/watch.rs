//! 变更通知
//!
//! `WatchController` 登记所有存活的 `Watcher`；每个 `Watcher` 独占一条底层 watch 流，
//! 在自己的后台线程里串行处理注册、取消请求和底层事件，把匹配的事件投递到事件队列。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread;

use log::{debug, info, warn};

use super::codec::prefix_upper_bound;
use super::error::{StoreError, StoreResult};
use super::request::{EventKind, WatchId, WatchResponse};
use super::traits::{Store, WatchStream};

/// 以此结尾的模式表示前缀 watch
pub const PREFIX_MARKER: char = '*';

type Registry = Arc<RwLock<HashMap<u64, Sender<WatcherInput>>>>;

/// 推送给订阅者的变更事件
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub key: String,
    /// 删除事件为空
    pub value: Vec<u8>,
    pub previous: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub key: String,
    pub prefix: bool,
    pub cancel: bool,
}

impl WatchRequest {
    fn from_pattern(pattern: &str, cancel: bool) -> Self {
        match pattern.strip_suffix(PREFIX_MARKER) {
            Some(prefix) => WatchRequest {
                key: prefix.to_string(),
                prefix: true,
                cancel,
            },
            None => WatchRequest {
                key: pattern.to_string(),
                prefix: false,
                cancel,
            },
        }
    }

    pub fn watch(pattern: &str) -> Self {
        Self::from_pattern(pattern, false)
    }

    pub fn unwatch(pattern: &str) -> Self {
        Self::from_pattern(pattern, true)
    }

    /// 登记表中使用的名字，前缀 watch 带 `*`
    pub fn pattern(&self) -> String {
        if self.prefix {
            format!("{}{}", self.key, PREFIX_MARKER)
        } else {
            self.key.clone()
        }
    }

    fn matches(&self, key: &str) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

enum WatcherInput {
    Request(WatchRequest, Sender<StoreResult<()>>),
    Store(WatchResponse),
    Close,
}

/// 可克隆的请求句柄
#[derive(Clone)]
pub struct WatcherHandle {
    id: u64,
    input: Sender<WatcherInput>,
}

impl WatcherHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn request(&self, req: WatchRequest) -> StoreResult<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.input
            .send(WatcherInput::Request(req, ack_tx))
            .map_err(|_| StoreError::WatchClosed)?;
        ack_rx.recv().map_err(|_| StoreError::WatchClosed)?
    }

    /// 订阅键或 `前缀*`，重复订阅不产生新的底层 watch
    pub fn watch(&self, pattern: &str) -> StoreResult<()> {
        self.request(WatchRequest::watch(pattern))
    }

    pub fn unwatch(&self, pattern: &str) -> StoreResult<()> {
        self.request(WatchRequest::unwatch(pattern))
    }

    pub fn close(&self) {
        // 已退出的 watcher 收不到也无妨
        let _ = self.input.send(WatcherInput::Close);
    }
}

/// 一个订阅者连接。drop 时关闭
pub struct Watcher {
    handle: WatcherHandle,
    events: Receiver<Event>,
}

impl Watcher {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }

    pub fn watch(&self, pattern: &str) -> StoreResult<()> {
        self.handle.watch(pattern)
    }

    pub fn unwatch(&self, pattern: &str) -> StoreResult<()> {
        self.handle.unwatch(pattern)
    }

    /// 事件队列。watcher 关闭后接收端断开
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.handle.close();
    }
}

struct WatcherWorker {
    id: u64,
    stream: Box<dyn WatchStream>,
    /// 模式 -> (请求, 底层 watch id)
    watching: HashMap<String, (WatchRequest, WatchId)>,
    events: Sender<Event>,
    registry: Registry,
}

impl WatcherWorker {
    fn run(mut self, input: Receiver<WatcherInput>) {
        for msg in input {
            match msg {
                WatcherInput::Request(req, ack) => {
                    let res = self.apply(req);
                    let _ = ack.send(res);
                }
                WatcherInput::Store(resp) => {
                    if !self.dispatch(resp) {
                        debug!("watcher {} 的事件接收端已关闭", self.id);
                        break;
                    }
                }
                WatcherInput::Close => break,
            }
        }
        self.shutdown();
    }

    fn apply(&mut self, req: WatchRequest) -> StoreResult<()> {
        let pattern = req.pattern();
        if req.cancel {
            if let Some((_, watch_id)) = self.watching.remove(&pattern) {
                self.stream.cancel(watch_id)?;
                debug!("watcher {} 取消订阅 '{}'", self.id, pattern);
            }
            return Ok(());
        }

        if self.watching.contains_key(&pattern) {
            return Ok(());
        }
        let range_end = if req.prefix {
            prefix_upper_bound(req.key.as_bytes())
        } else {
            Vec::new()
        };
        let watch_id = self.stream.watch(req.key.as_bytes(), &range_end, 0)?;
        debug!("watcher {} 订阅 '{}'", self.id, pattern);
        self.watching.insert(pattern, (req, watch_id));
        Ok(())
    }

    /// 投递事件，事件接收端已关闭时返回 false
    fn dispatch(&self, resp: WatchResponse) -> bool {
        let Some((req, _)) = self
            .watching
            .values()
            .find(|(_, watch_id)| *watch_id == resp.watch_id)
        else {
            return true;
        };

        for ev in resp.events {
            let key = String::from_utf8_lossy(&ev.kv.key).into_owned();
            if !req.matches(&key) {
                continue;
            }
            let event = Event {
                kind: ev.kind,
                key,
                value: ev.kv.value,
                previous: ev.prev_kv.map(|kv| kv.value),
            };
            if self.events.send(event).is_err() {
                return false;
            }
        }
        true
    }

    fn shutdown(&mut self) {
        self.stream.close();
        match self.registry.write() {
            Ok(mut watchers) => {
                watchers.remove(&self.id);
            }
            Err(_) => warn!("watcher 登记表锁已损坏"),
        }
        info!("watcher {} 已关闭", self.id);
    }
}

/// watcher 登记表
pub struct WatchController {
    store: Arc<dyn Store>,
    watchers: Registry,
    next_id: AtomicU64,
}

impl WatchController {
    pub fn new(store: Arc<dyn Store>) -> Self {
        WatchController {
            store,
            watchers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// 创建一个新的 watcher，并启动其后台线程
    pub fn new_watcher(&self) -> StoreResult<Watcher> {
        let (stream, store_rx) = self.store.watch_stream()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (input_tx, input_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let forward = input_tx.clone();
        thread::spawn(move || {
            for resp in store_rx {
                if forward.send(WatcherInput::Store(resp)).is_err() {
                    break;
                }
            }
        });

        self.watchers
            .write()
            .map_err(|_| StoreError::Backend("watcher 登记表锁已损坏".to_string()))?
            .insert(id, input_tx.clone());

        let worker = WatcherWorker {
            id,
            stream,
            watching: HashMap::new(),
            events: event_tx,
            registry: Arc::clone(&self.watchers),
        };
        thread::spawn(move || worker.run(input_rx));
        info!("创建 watcher {}", id);

        Ok(Watcher {
            handle: WatcherHandle {
                id,
                input: input_tx,
            },
            events: event_rx,
        })
    }

    /// 当前存活的 watcher 数量
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().map(|w| w.len()).unwrap_or(0)
    }

    /// 关闭当前所有 watcher。之后仍可以创建新的 watcher
    pub fn close(&self) {
        let snapshot: Vec<Sender<WatcherInput>> = match self.watchers.read() {
            Ok(watchers) => watchers.values().cloned().collect(),
            Err(_) => {
                warn!("watcher 登记表锁已损坏");
                return;
            }
        };
        info!("关闭 {} 个 watcher", snapshot.len());
        for input in snapshot {
            let _ = input.send(WatcherInput::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_parsing() {
        let req = WatchRequest::watch("user:*");
        assert!(req.prefix);
        assert_eq!(req.key, "user:");
        assert_eq!(req.pattern(), "user:*");
        assert!(req.matches("user:1"));
        assert!(!req.matches("users"));

        let req = WatchRequest::unwatch("exact");
        assert!(req.cancel);
        assert!(!req.prefix);
        assert!(req.matches("exact"));
        assert!(!req.matches("exact2"));
    }
}
