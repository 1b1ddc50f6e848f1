use base64::prelude::*;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::store::{EventKind, Hash, StoreManager, StoreResult, WatchController, Watcher};

// 表示解析后的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // 字节串命令
    Get(String),
    Set(String, String),
    SetNx(String, String),
    Length(String),

    // 键命令
    Del(String),
    Has(String),
    Keys(Option<String>),
    Expire(String, i64),
    Clear,

    // 数值命令
    GetInt(String),
    SetInt(String, i64),
    Incr(String, i64),
    Decr(String, i64),
    GetFloat(String),
    SetFloat(String, f64),
    IncrFloat(String, f64),
    DecrFloat(String, f64),

    // 列表命令
    GetList(String),
    GetListItem(String, i64),
    SetListItem(String, i64, String),
    ListLength(String),
    ListLimit(String, i64),
    ListInsert(String, i64, String),
    ListAppend(String, String),
    ListPopLeft(String, Option<i64>),
    ListPopRight(String, Option<i64>),
    ListHas(String, String),
    ListDelete(String, i64),
    ListDeleteItem(String, String),

    // 哈希命令
    GetHash(String),
    GetHashField(String, String),
    HashHas(String, String),
    HashLength(String),
    HashFields(String),
    HashValues(String),
    SetHashField(String, String, String),
    DelHashField(String, String),

    // 锁命令
    Lock(String, Option<i64>),
    Unlock(String),
    SetLockTimeout(i64),

    // 订阅命令
    Watch(String),
    Unwatch(String),
    Events,

    // 其他命令
    Ping,
    Help,
    HelpCommand(String),

    // 无效命令
    Invalid(String),
}

fn invalid(usage: &str) -> Command {
    Command::Invalid(format!("Usage: {}", usage))
}

fn with_key(args: &[&str], usage: &str, build: fn(String) -> Command) -> Command {
    match args {
        [key] => build(key.to_string()),
        _ => invalid(usage),
    }
}

fn with_key_value(args: &[&str], usage: &str, build: fn(String, String) -> Command) -> Command {
    if args.len() < 2 {
        return invalid(usage);
    }
    build(args[0].to_string(), args[1..].join(" "))
}

fn with_key_int(args: &[&str], usage: &str, build: fn(String, i64) -> Command) -> Command {
    match args {
        [key, n] => match n.parse::<i64>() {
            Ok(n) => build(key.to_string(), n),
            Err(_) => invalid(usage),
        },
        _ => invalid(usage),
    }
}

fn with_key_float(args: &[&str], usage: &str, build: fn(String, f64) -> Command) -> Command {
    match args {
        [key, n] => match n.parse::<f64>() {
            Ok(n) if n.is_finite() => build(key.to_string(), n),
            _ => invalid(usage),
        },
        _ => invalid(usage),
    }
}

fn with_key_index_value(
    args: &[&str],
    usage: &str,
    build: fn(String, i64, String) -> Command,
) -> Command {
    if args.len() < 3 {
        return invalid(usage);
    }
    match args[1].parse::<i64>() {
        Ok(index) => build(args[0].to_string(), index, args[2..].join(" ")),
        Err(_) => invalid(usage),
    }
}

/// 带可选整数参数的命令，例如 `INCR key [by]`
fn with_key_opt_int(
    args: &[&str],
    usage: &str,
    build: fn(String, Option<i64>) -> Command,
) -> Command {
    match args {
        [key] => build(key.to_string(), None),
        [key, n] => match n.parse::<i64>() {
            Ok(n) => build(key.to_string(), Some(n)),
            Err(_) => invalid(usage),
        },
        _ => invalid(usage),
    }
}

fn render_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("base64:{}", BASE64_STANDARD.encode(bytes)),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("ERROR: {}", e))
}

fn render_list(items: &[Vec<u8>]) -> String {
    let items: Vec<String> = items.iter().map(|item| render_bytes(item)).collect();
    to_json(&items)
}

fn render_hash(hash: &Hash) -> String {
    let fields: BTreeMap<&str, String> = hash
        .iter()
        .map(|(field, value)| (field.as_str(), render_bytes(value)))
        .collect();
    to_json(&fields)
}

fn reply<T>(result: StoreResult<T>, render: impl FnOnce(T) -> String) -> String {
    match result {
        Ok(value) => render(value),
        Err(e) => format!("ERROR: {}", e),
    }
}

fn ok(_: ()) -> String {
    "OK".to_string()
}

fn integer<N: std::fmt::Display>(n: N) -> String {
    format!("(integer) {}", n)
}

fn flag(b: bool) -> String {
    integer(u8::from(b))
}

// 命令处理器
pub struct CommandHandler {
    store_manager: StoreManager,
    watch: Option<Arc<WatchController>>,
    watcher: Option<Watcher>,
}

impl CommandHandler {
    pub fn new(store_manager: StoreManager) -> Self {
        CommandHandler {
            store_manager,
            watch: None,
            watcher: None,
        }
    }

    /// 启用 WATCH / UNWATCH / EVENTS
    pub fn with_watch(mut self, controller: Arc<WatchController>) -> Self {
        self.watch = Some(controller);
        self
    }

    // 解析命令字符串
    pub fn parse_command(&self, input: &str) -> Command {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some((verb, args)) = parts.split_first() else {
            return Command::Invalid("Empty command".to_string());
        };

        match verb.to_lowercase().as_str() {
            // 字节串命令
            "get" => with_key(args, "GET key", Command::Get),
            "set" => with_key_value(args, "SET key value", Command::Set),
            "setnx" => with_key_value(args, "SETNX key value", Command::SetNx),
            "length" => with_key(args, "LENGTH key", Command::Length),

            // 键命令
            "del" => with_key(args, "DEL key", Command::Del),
            "has" => with_key(args, "HAS key", Command::Has),
            "keys" => match args {
                [] => Command::Keys(None),
                [prefix] => Command::Keys(Some(prefix.to_string())),
                _ => invalid("KEYS [prefix]"),
            },
            "expire" => with_key_int(args, "EXPIRE key seconds", Command::Expire),
            "clear" => Command::Clear,

            // 数值命令
            "getint" => with_key(args, "GETINT key", Command::GetInt),
            "setint" => with_key_int(args, "SETINT key value", Command::SetInt),
            "incr" => with_key_opt_int(args, "INCR key [by]", |key, by| {
                Command::Incr(key, by.unwrap_or(1))
            }),
            "decr" => with_key_opt_int(args, "DECR key [by]", |key, by| {
                Command::Decr(key, by.unwrap_or(1))
            }),
            "getfloat" => with_key(args, "GETFLOAT key", Command::GetFloat),
            "setfloat" => with_key_float(args, "SETFLOAT key value", Command::SetFloat),
            "incrfloat" => with_key_float(args, "INCRFLOAT key by", Command::IncrFloat),
            "decrfloat" => with_key_float(args, "DECRFLOAT key by", Command::DecrFloat),

            // 列表命令
            "getlist" => with_key(args, "GETLIST key", Command::GetList),
            "getlistitem" => with_key_int(args, "GETLISTITEM key index", Command::GetListItem),
            "setlistitem" => {
                with_key_index_value(args, "SETLISTITEM key index value", Command::SetListItem)
            }
            "listlength" => with_key(args, "LISTLENGTH key", Command::ListLength),
            "listlimit" => with_key_int(args, "LISTLIMIT key limit", Command::ListLimit),
            "listinsert" => {
                with_key_index_value(args, "LISTINSERT key index value", Command::ListInsert)
            }
            "listappend" => with_key_value(args, "LISTAPPEND key value", Command::ListAppend),
            "listpopleft" => {
                with_key_opt_int(args, "LISTPOPLEFT key [timeout]", Command::ListPopLeft)
            }
            "listpopright" => {
                with_key_opt_int(args, "LISTPOPRIGHT key [timeout]", Command::ListPopRight)
            }
            "listhas" => with_key_value(args, "LISTHAS key value", Command::ListHas),
            "listdelete" => with_key_int(args, "LISTDELETE key index", Command::ListDelete),
            "listdeleteitem" => {
                with_key_value(args, "LISTDELETEITEM key value", Command::ListDeleteItem)
            }

            // 哈希命令
            "gethash" => with_key(args, "GETHASH key", Command::GetHash),
            "gethashfield" => match args {
                [key, field] => Command::GetHashField(key.to_string(), field.to_string()),
                _ => invalid("GETHASHFIELD key field"),
            },
            "hashhas" => match args {
                [key, field] => Command::HashHas(key.to_string(), field.to_string()),
                _ => invalid("HASHHAS key field"),
            },
            "hashlength" => with_key(args, "HASHLENGTH key", Command::HashLength),
            "hashfields" => with_key(args, "HASHFIELDS key", Command::HashFields),
            "hashvalues" => with_key(args, "HASHVALUES key", Command::HashValues),
            "sethashfield" => {
                if args.len() < 3 {
                    invalid("SETHASHFIELD key field value")
                } else {
                    Command::SetHashField(
                        args[0].to_string(),
                        args[1].to_string(),
                        args[2..].join(" "),
                    )
                }
            }
            "delhashfield" => match args {
                [key, field] => Command::DelHashField(key.to_string(), field.to_string()),
                _ => invalid("DELHASHFIELD key field"),
            },

            // 锁命令
            "lock" => with_key_opt_int(args, "LOCK key [seconds]", Command::Lock),
            "unlock" => with_key(args, "UNLOCK key", Command::Unlock),
            "setlocktimeout" => match args {
                [n] => match n.parse::<i64>() {
                    Ok(n) => Command::SetLockTimeout(n),
                    Err(_) => invalid("SETLOCKTIMEOUT seconds"),
                },
                _ => invalid("SETLOCKTIMEOUT seconds"),
            },

            // 订阅命令
            "watch" => with_key(args, "WATCH pattern", Command::Watch),
            "unwatch" => with_key(args, "UNWATCH pattern", Command::Unwatch),
            "events" => Command::Events,

            // 其他命令
            "ping" => Command::Ping,
            "help" => match args {
                [] => Command::Help,
                [cmd] => Command::HelpCommand(cmd.to_string()),
                _ => invalid("HELP [command]"),
            },
            _ => Command::Invalid(format!("Unknown command: {}", verb)),
        }
    }

    // 执行命令并返回结果
    pub fn execute_command(&mut self, command: Command) -> String {
        debug!("执行命令: {:?}", command);
        let store = &self.store_manager;

        match command {
            Command::Get(key) => reply(store.get(&key), |v| render_bytes(&v)),
            Command::Set(key, value) => reply(store.set(&key, value), ok),
            Command::SetNx(key, value) => reply(store.set_nx(&key, value), flag),
            Command::Length(key) => reply(store.length(&key), integer),

            Command::Del(key) => reply(store.delete(&key), flag),
            Command::Has(key) => reply(store.has(&key), flag),
            Command::Keys(prefix) => {
                let keys = match prefix {
                    Some(prefix) => store.keys_with_prefix(&prefix),
                    None => store.keys(),
                };
                reply(keys, |keys| to_json(&keys))
            }
            Command::Expire(key, seconds) => reply(store.set_expire(&key, seconds), ok),
            Command::Clear => reply(store.clear(), integer),

            Command::GetInt(key) => reply(store.get_int(&key), integer),
            Command::SetInt(key, value) => reply(store.set_int(&key, value), ok),
            Command::Incr(key, by) => reply(store.increment_int(&key, by), integer),
            Command::Decr(key, by) => reply(store.decrement_int(&key, by), integer),
            Command::GetFloat(key) => reply(store.get_float(&key), |f| f.to_string()),
            Command::SetFloat(key, value) => reply(store.set_float(&key, value), ok),
            Command::IncrFloat(key, by) => reply(store.increment_float(&key, by), |f| f.to_string()),
            Command::DecrFloat(key, by) => reply(store.decrement_float(&key, by), |f| f.to_string()),

            Command::GetList(key) => reply(store.get_list(&key), |list| render_list(&list.items)),
            Command::GetListItem(key, index) => {
                reply(store.get_list_item(&key, index), |v| render_bytes(&v))
            }
            Command::SetListItem(key, index, value) => {
                reply(store.set_list_item(&key, index, value), ok)
            }
            Command::ListLength(key) => reply(store.list_length(&key), integer),
            Command::ListLimit(key, limit) => reply(store.list_limit(&key, limit), ok),
            Command::ListInsert(key, index, value) => {
                reply(store.list_insert(&key, index, value), integer)
            }
            Command::ListAppend(key, value) => reply(store.list_append(&key, value), integer),
            Command::ListPopLeft(key, timeout) => {
                let popped = match timeout {
                    Some(timeout) => store.list_pop_left_blocking(&key, timeout),
                    None => store.list_pop_left(&key),
                };
                reply(popped, |v| render_bytes(&v))
            }
            Command::ListPopRight(key, timeout) => {
                let popped = match timeout {
                    Some(timeout) => store.list_pop_right_blocking(&key, timeout),
                    None => store.list_pop_right(&key),
                };
                reply(popped, |v| render_bytes(&v))
            }
            Command::ListHas(key, value) => reply(store.list_has(&key, value.as_bytes()), integer),
            Command::ListDelete(key, index) => {
                reply(store.list_delete(&key, index), |v| render_bytes(&v))
            }
            Command::ListDeleteItem(key, value) => {
                reply(store.list_delete_item(&key, value.as_bytes()), integer)
            }

            Command::GetHash(key) => reply(store.get_hash(&key), |h| render_hash(&h)),
            Command::GetHashField(key, field) => {
                reply(store.get_hash_field(&key, &field), |v| render_bytes(&v))
            }
            Command::HashHas(key, field) => reply(store.hash_has(&key, &field), flag),
            Command::HashLength(key) => reply(store.hash_length(&key), integer),
            Command::HashFields(key) => reply(store.hash_fields(&key), |f| to_json(&f)),
            Command::HashValues(key) => reply(store.hash_values(&key), |v| render_list(&v)),
            Command::SetHashField(key, field, value) => {
                reply(store.set_hash_field(&key, &field, value), ok)
            }
            Command::DelHashField(key, field) => reply(store.del_hash_field(&key, &field), flag),

            Command::Lock(key, seconds) => {
                let locked = match seconds {
                    Some(seconds) => store.lock_with_timeout(&key, seconds),
                    None => store.lock(&key),
                };
                reply(locked, ok)
            }
            Command::Unlock(key) => reply(store.unlock(&key), ok),
            Command::SetLockTimeout(seconds) => {
                // 至少等待 1 秒
                self.store_manager = self.store_manager.with_max_lock_wait(seconds.max(1));
                "OK".to_string()
            }

            Command::Watch(pattern) => match self.watcher() {
                Ok(watcher) => reply(watcher.watch(&pattern), ok),
                Err(msg) => msg,
            },
            Command::Unwatch(pattern) => match self.watcher() {
                Ok(watcher) => reply(watcher.unwatch(&pattern), ok),
                Err(msg) => msg,
            },
            Command::Events => self.drain_events(),

            Command::Ping => "PONG".to_string(),
            Command::Help => self.get_help(),
            Command::HelpCommand(cmd) => self.get_command_help(&cmd),
            Command::Invalid(msg) => format!("ERROR: {}", msg),
        }
    }

    /// 首次使用时创建 watcher
    fn watcher(&mut self) -> Result<&Watcher, String> {
        let Some(controller) = &self.watch else {
            return Err("ERROR: 未启用 watch".to_string());
        };
        if self.watcher.is_none() {
            match controller.new_watcher() {
                Ok(watcher) => self.watcher = Some(watcher),
                Err(e) => return Err(format!("ERROR: {}", e)),
            }
        }
        self.watcher
            .as_ref()
            .ok_or_else(|| "ERROR: 未启用 watch".to_string())
    }

    /// 取出已收到的事件，每行一个
    fn drain_events(&self) -> String {
        let Some(watcher) = &self.watcher else {
            return "(empty)".to_string();
        };
        let lines: Vec<String> = watcher
            .events()
            .try_iter()
            .map(|event| match event.kind {
                EventKind::Put => format!("put {} {}", event.key, render_bytes(&event.value)),
                EventKind::Delete => format!("delete {}", event.key),
            })
            .collect();
        if lines.is_empty() {
            "(empty)".to_string()
        } else {
            lines.join("\n")
        }
    }

    // 获取帮助信息
    fn get_help(&self) -> String {
        let help = r"可用命令:
字节串命令:
  set [key] [value] - 写入值
  setnx [key] [value] - 键不存在时写入
  get [key] - 读取值
  length [key] - 值的字节长度

键命令:
  del [key] - 删除键
  has [key] - 键是否存在
  keys [prefix] - 列出键
  expire [key] [seconds] - 设置过期时间
  clear - 清空所有键

数值命令:
  getint/setint/incr/decr - 整数计数器
  getfloat/setfloat/incrfloat/decrfloat - 浮点计数器

列表命令:
  getlist [key] - 获取整个列表
  getlistitem [key] [index] - 获取元素，支持负数下标
  setlistitem [key] [index] [value] - 修改元素
  listlength [key] - 列表长度
  listlimit [key] [limit] - 设置列表长度上限
  listinsert [key] [index] [value] - 插入元素
  listappend [key] [value] - 追加元素
  listpopleft [key] [timeout] - 弹出第一个元素，给出 timeout 时阻塞等待
  listpopright [key] [timeout] - 弹出最后一个元素，给出 timeout 时阻塞等待
  listhas [key] [value] - 查找元素下标
  listdelete [key] [index] - 删除指定下标的元素
  listdeleteitem [key] [value] - 删除第一个匹配的元素

哈希命令:
  gethash [key] - 获取整个哈希
  gethashfield [key] [field] - 获取字段
  hashhas [key] [field] - 字段是否存在
  hashlength [key] - 字段数量
  hashfields [key] - 所有字段名
  hashvalues [key] - 所有字段值
  sethashfield [key] [field] [value] - 写入字段
  delhashfield [key] [field] - 删除字段

锁命令:
  lock [key] [seconds] - 加锁
  unlock [key] - 解锁
  setlocktimeout [seconds] - 设置默认加锁等待时间

订阅命令:
  watch [key|prefix*] - 订阅变更
  unwatch [key|prefix*] - 取消订阅
  events - 取出已收到的事件

其他命令:
  ping - 测试连接
  help - 获取所有命令帮助
  help [command] - 获取特定命令帮助";

        help.to_string()
    }

    // 获取特定命令的帮助信息
    fn get_command_help(&self, command: &str) -> String {
        match command.to_lowercase().as_str() {
            "set" => "set [key] [value] - 写入值，键被锁定时等待".to_string(),
            "get" => "get [key] - 读取值".to_string(),
            "del" => "del [key] - 删除键，键被锁定时等待".to_string(),
            "incr" => "incr [key] [by] - 整数加 by，默认为 1".to_string(),
            "getlistitem" => {
                "getlistitem [key] [index] - 获取元素，越界时返回首尾元素".to_string()
            }
            "listpopleft" => {
                "listpopleft [key] [timeout] - 弹出第一个元素，timeout 为 0 时一直等待".to_string()
            }
            "listlimit" => {
                "listlimit [key] [limit] - 设置长度上限，超出时从头部删除".to_string()
            }
            "lock" => "lock [key] [seconds] - 加锁，超时返回错误".to_string(),
            "watch" => "watch [key|prefix*] - 订阅键或前缀的变更".to_string(),
            "ping" => "ping - 测试连接".to_string(),
            "help" => "help - 获取所有命令帮助\nhelp [command] - 获取特定命令帮助".to_string(),
            _ => format!("Unknown command: {}", command),
        }
    }
}
