use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::WatchConfig;
use super::error::{StoreError, StoreResult};
use super::watch::{Event, WatchController, Watcher, WatcherHandle};

/// 检查关闭标志的间隔
const CLOSE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// 建立 watcher 连接
pub trait WatchConnector: Send + 'static {
    fn connect(&self) -> StoreResult<Watcher>;
}

impl WatchConnector for Arc<WatchController> {
    fn connect(&self) -> StoreResult<Watcher> {
        self.new_watcher()
    }
}

/// 客户端事件通道
pub struct EventChannel {
    id: u64,
    receiver: Receiver<Event>,
}

impl EventChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<Event> {
        &self.receiver
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

struct ClientShared {
    watching: Mutex<BTreeSet<String>>,
    channels: Mutex<HashMap<u64, SyncSender<Event>>>,
    current: Mutex<Option<WatcherHandle>>,
    next_channel: AtomicU64,
    connected: AtomicBool,
    closing: AtomicBool,
    capacity: usize,
    reconnect_delay: Duration,
}

fn guard<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("watch 客户端状态锁已损坏".to_string()))
}

impl ClientShared {
    fn current(&self) -> Option<WatcherHandle> {
        guard(&self.current).ok().and_then(|c| c.clone())
    }

    fn set_current(&self, handle: Option<WatcherHandle>) {
        if let Ok(mut current) = guard(&self.current) {
            *current = handle;
        }
    }

    /// 把事件复制到每个通道；通道满时丢弃并告警，已关闭的通道被移除
    fn fan_out(&self, event: Event) {
        let Ok(mut channels) = guard(&self.channels) else {
            return;
        };
        channels.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("事件通道 {} 已满，丢弃 '{}' 的事件", id, event.key);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// 重新订阅期间持有 `watching`，并发的 unwatch 要等重放结束后才生效
    fn replay(&self, handle: &WatcherHandle) {
        let Ok(watching) = guard(&self.watching) else {
            return;
        };
        for pattern in watching.iter() {
            if let Err(e) = handle.watch(pattern) {
                warn!("重新订阅 '{}' 失败: {}", pattern, e);
            }
        }
    }

    fn closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn run<C: WatchConnector>(&self, connector: C) {
        while !self.closing() {
            let watcher = match connector.connect() {
                Ok(watcher) => watcher,
                Err(e) => {
                    error!("建立 watch 连接失败: {}", e);
                    thread::sleep(self.reconnect_delay);
                    continue;
                }
            };

            let handle = watcher.handle();
            self.set_current(Some(handle.clone()));
            self.replay(&handle);
            self.connected.store(true, Ordering::SeqCst);
            info!("watch 连接 {} 已建立", handle.id());

            self.pump(&watcher);
            self.connected.store(false, Ordering::SeqCst);
            self.set_current(None);
            drop(watcher);

            if self.closing() {
                break;
            }
            warn!("watch 连接 {} 已断开，{:?} 后重连", handle.id(), self.reconnect_delay);
            thread::sleep(self.reconnect_delay);
        }
        debug!("watch 客户端后台线程退出");
    }

    fn pump(&self, watcher: &Watcher) {
        loop {
            match watcher.events().recv_timeout(CLOSE_CHECK_INTERVAL) {
                Ok(event) => self.fan_out(event),
                Err(RecvTimeoutError::Timeout) => {
                    if self.closing() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

/// 带自动重连的 watch 客户端
///
/// 后台线程持有当前连接，把事件分发给所有事件通道；
/// 连接断开后重连，并重新订阅之前所有的模式。
pub struct WatchClient {
    shared: Arc<ClientShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WatchClient {
    pub fn connect<C: WatchConnector>(connector: C, config: &WatchConfig) -> Self {
        let shared = Arc::new(ClientShared {
            watching: Mutex::new(BTreeSet::new()),
            channels: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            next_channel: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            capacity: config.event_channel_capacity.max(1),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || worker_shared.run(connector));

        WatchClient {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// 连接已建立且已重新订阅
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn new_event_channel(&self) -> StoreResult<EventChannel> {
        if self.shared.closing() {
            return Err(StoreError::WatchClosed);
        }
        let (tx, rx) = mpsc::sync_channel(self.shared.capacity);
        let id = self.shared.next_channel.fetch_add(1, Ordering::SeqCst);
        guard(&self.shared.channels)?.insert(id, tx);
        Ok(EventChannel { id, receiver: rx })
    }

    pub fn close_event_channel(&self, channel: EventChannel) -> StoreResult<()> {
        guard(&self.shared.channels)?.remove(&channel.id);
        Ok(())
    }

    /// 订阅键或 `前缀*`。连接断开期间记录下来，重连后生效
    pub fn watch(&self, pattern: &str) -> StoreResult<()> {
        if self.shared.closing() {
            return Err(StoreError::WatchClosed);
        }
        guard(&self.shared.watching)?.insert(pattern.to_string());
        match self.shared.current() {
            Some(handle) => match handle.watch(pattern) {
                Err(StoreError::WatchClosed) => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }

    pub fn unwatch(&self, pattern: &str) -> StoreResult<()> {
        guard(&self.shared.watching)?.remove(pattern);
        match self.shared.current() {
            Some(handle) => match handle.unwatch(pattern) {
                Err(StoreError::WatchClosed) => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }

    /// 关闭连接和所有事件通道，等待后台线程退出
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.shared.current() {
            handle.close();
        }

        let worker = guard(&self.worker).ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("watch 客户端后台线程异常退出");
            }
        }
        if let Ok(mut channels) = guard(&self.shared.channels) {
            channels.clear();
        }
        info!("watch 客户端已关闭");
    }
}

impl Drop for WatchClient {
    fn drop(&mut self) {
        self.close();
    }
}
