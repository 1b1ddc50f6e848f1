use std::fmt;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::Settings;
use super::codec;
use super::data_types::Value;
use super::error::StoreResult;
use super::lock::{check_key, wait_deadline, LockManager};
use super::request::RangeRequest;
use super::store_core::MemoryStore;
use super::traits::Store;

/// 读改写回调的结果：写回新值，或不写只释放锁
pub(crate) enum Mutation<T> {
    Write(Vec<u8>, T),
    Skip(T),
}

/// 线程安全的类型化存储入口
///
/// 可以廉价克隆；`with_max_lock_wait` 返回的副本只影响通过它发起的调用。
#[derive(Clone)]
pub struct StoreManager {
    store: Arc<dyn Store>,
    locks: LockManager,
    max_lock_wait: i64,
    poll_interval: Duration,
}

impl fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreManager")
            .field("max_lock_wait", &self.max_lock_wait)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl StoreManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let defaults = Settings::default();
        StoreManager {
            locks: LockManager::new(
                Arc::clone(&store),
                Duration::from_millis(defaults.lock.retry_delay_ms),
            ),
            store,
            max_lock_wait: defaults.lock.default_max_wait_seconds,
            poll_interval: Duration::from_millis(defaults.blocking.poll_interval_ms),
        }
    }

    /// 使用进程内存储
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// 使用配置构建
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.locks = LockManager::new(
            Arc::clone(&self.store),
            Duration::from_millis(settings.lock.retry_delay_ms),
        );
        self.max_lock_wait = settings.lock.default_max_wait_seconds;
        self.poll_interval = Duration::from_millis(settings.blocking.poll_interval_ms);
        info!(
            "存储配置: 锁等待 {} 秒, 轮询间隔 {:?}",
            self.max_lock_wait, self.poll_interval
        );
        self
    }

    /// 返回一个使用不同锁等待时间的句柄
    pub fn with_max_lock_wait(&self, seconds: i64) -> Self {
        let mut handle = self.clone();
        handle.max_lock_wait = seconds;
        handle
    }

    pub fn max_lock_wait(&self) -> i64 {
        self.max_lock_wait
    }

    /// 获取底层存储的引用
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// 按默认等待时间加锁
    pub fn lock(&self, key: &str) -> StoreResult<()> {
        self.locks.lock(key, self.max_lock_wait)
    }

    pub fn lock_with_timeout(&self, key: &str, max_wait_seconds: i64) -> StoreResult<()> {
        self.locks.lock(key, max_wait_seconds)
    }

    pub fn unlock(&self, key: &str) -> StoreResult<()> {
        self.locks.unlock(key)
    }

    /// 写入新值并释放锁，两者原子完成
    pub fn unlock_then_set(&self, key: &str, value: impl Into<Value>) -> StoreResult<()> {
        let bytes = codec::encode(&value.into())?;
        self.locks.unlock_and_write(key, bytes)
    }

    /// 读取原始字节，不存在时返回 None
    pub(crate) fn read_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let res = self.store.range(RangeRequest::single(key))?;
        Ok(res.kvs.into_iter().next().map(|kv| kv.value))
    }

    /// 加锁、读取、修改、写回并解锁。任何一步出错都会释放锁。
    pub(crate) fn modify<T, F>(&self, key: &str, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(Option<&[u8]>) -> StoreResult<Mutation<T>>,
    {
        check_key(key)?;
        self.lock(key)?;

        let current = match self.read_raw(key) {
            Ok(current) => current,
            Err(e) => {
                self.locks.release_quietly(key);
                return Err(e);
            }
        };

        match mutate(current.as_deref()) {
            Ok(Mutation::Write(bytes, out)) => match self.locks.unlock_and_write(key, bytes) {
                Ok(()) => Ok(out),
                Err(e) => {
                    self.locks.release_quietly(key);
                    Err(e)
                }
            },
            Ok(Mutation::Skip(out)) => {
                self.locks.unlock(key)?;
                Ok(out)
            }
            Err(e) => {
                self.locks.release_quietly(key);
                Err(e)
            }
        }
    }

    /// 反复执行 `attempt` 直到返回 Some 或超时（超时返回 None）。
    /// `timeout_seconds` 不大于 0 时一直等待。
    ///
    /// 等待期间 watch 该键，键变化时提前醒来；watch 不可用时退化为轮询。
    pub(crate) fn wait_for<T, F>(
        &self,
        key: &str,
        timeout_seconds: i64,
        mut attempt: F,
    ) -> StoreResult<Option<T>>
    where
        F: FnMut() -> StoreResult<Option<T>>,
    {
        let deadline = if timeout_seconds > 0 {
            wait_deadline(timeout_seconds)
        } else {
            None
        };

        let mut wake = match self.store.watch_stream() {
            Ok((mut stream, rx)) => match stream.watch(key.as_bytes(), &[], 0) {
                Ok(_) => Some((stream, rx)),
                Err(e) => {
                    debug!("无法 watch '{}'，改为轮询: {}", key, e);
                    None
                }
            },
            Err(e) => {
                debug!("无法打开 watch 流，改为轮询: {}", e);
                None
            }
        };

        loop {
            if let Some(found) = attempt()? {
                return Ok(Some(found));
            }

            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(None);
                    }
                    self.poll_interval.min(d - now)
                }
                None => self.poll_interval,
            };

            let disconnected = match &wake {
                Some((_, rx)) => matches!(rx.recv_timeout(wait), Err(RecvTimeoutError::Disconnected)),
                None => {
                    thread::sleep(wait);
                    false
                }
            };
            if disconnected {
                wake = None;
                thread::sleep(wait);
            }
        }
    }
}
