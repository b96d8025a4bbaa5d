//! Redis store tests.
//!
//! The first group runs against a small in-process RESP responder. The second
//! group only runs when `REDIS_URL` points at a live server.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use gatekeep::ratelimit::{ClientState, LimiterConfig, RateConfig, RateLimiter};
use gatekeep::store::{RedisStore, RedisStoreOptions, Store, StoreError};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn rate(limit: u64) -> RateConfig {
    RateConfig::new(limit, Duration::from_secs(1), Duration::from_secs(30)).unwrap()
}

async fn store(url: &str) -> RedisStore {
    let options = RedisStoreOptions {
        prefix: format!("gatekeep_test_{}", uuid::Uuid::new_v4().simple()),
        ..RedisStoreOptions::default()
    };
    RedisStore::connect(url, options).await.unwrap()
}

#[derive(Default)]
struct FakeState {
    values: HashMap<String, String>,
    /// Keys listed by KEYS that have no value, as if they expired in between.
    vanished: Vec<String>,
    /// Stop answering data commands; connection setup still succeeds.
    silent: bool,
    commands: Vec<Vec<String>>,
}

/// Minimal RESP2 responder covering the commands the store issues.
struct FakeRedis {
    url: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeRedis {
    async fn start(state: FakeState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}/", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(state));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, shared.clone()));
            }
        });

        Self { url, state }
    }

    async fn store(&self, options: RedisStoreOptions) -> RedisStore {
        RedisStore::connect(&self.url, options).await.unwrap()
    }

    fn value(&self, key: &str) -> Option<String> {
        self.state.lock().values.get(key).cloned()
    }

    fn commands(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|command| command[0].eq_ignore_ascii_case(name))
            .cloned()
            .collect()
    }
}

async fn serve(socket: TcpStream, state: Arc<Mutex<FakeState>>) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(command) = read_command(&mut reader).await {
        let reply = respond(&command, &mut state.lock());
        if let Some(reply) = reply {
            if writer.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

async fn read_command(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

fn bulk(value: &str) -> String {
    format!("${}\r\n{}\r\n", value.len(), value)
}

fn respond(command: &[String], state: &mut FakeState) -> Option<String> {
    let name = command[0].to_ascii_uppercase();
    if name == "CLIENT" {
        return Some("+OK\r\n".to_string());
    }

    state.commands.push(command.to_vec());
    if state.silent {
        return None;
    }

    let reply = match name.as_str() {
        "GET" => match state.values.get(&command[1]) {
            Some(value) => bulk(value),
            None => "$-1\r\n".to_string(),
        },
        "SETEX" => {
            state.values.insert(command[1].clone(), command[3].clone());
            "+OK\r\n".to_string()
        }
        "EXISTS" => format!(":{}\r\n", u8::from(state.values.contains_key(&command[1]))),
        "KEYS" => {
            let mut keys: Vec<&String> = state.values.keys().chain(state.vanished.iter()).collect();
            keys.sort();
            let mut reply = format!("*{}\r\n", keys.len());
            for key in keys {
                reply.push_str(&bulk(key));
            }
            reply
        }
        _ => format!("-ERR unknown command '{}'\r\n", name),
    };
    Some(reply)
}

fn encoded(total: u64) -> String {
    let now = Utc::now();
    let mut state = ClientState::new(&rate(5), now);
    for _ in 0..total {
        state.register_request(now);
    }
    serde_json::to_string(&state).unwrap()
}

#[tokio::test]
async fn test_scan_skips_keys_that_vanish_before_get() {
    let fake = FakeRedis::start(FakeState {
        values: HashMap::from([("gatekeep:10.0.0.1".to_string(), encoded(2))]),
        vanished: vec!["gatekeep:10.0.0.2".to_string()],
        ..FakeState::default()
    })
    .await;
    let store = fake.store(RedisStoreOptions::default()).await;

    let all = store.all().await.unwrap();

    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "10.0.0.1");
    assert_eq!(all[0].1.total_requests, 2);
    assert_eq!(fake.commands("GET").len(), 2);
}

#[tokio::test]
async fn test_undecodable_entry_does_not_stop_sweep() {
    let fake = FakeRedis::start(FakeState {
        values: HashMap::from([
            ("gatekeep:10.0.0.1".to_string(), encoded(2)),
            ("gatekeep:legacy".to_string(), r#"{"old":1}"#.to_string()),
        ]),
        ..FakeState::default()
    })
    .await;
    let store = fake.store(RedisStoreOptions::default()).await;

    assert!(matches!(store.get("legacy").await, Err(StoreError::Codec(_))));

    let all = store.all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "10.0.0.1");

    let limiter = RateLimiter::new(Arc::new(store), LimiterConfig::by_ip(rate(5)));
    let report = limiter.sweep_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.reset, 1);
    assert_eq!(report.failed, 0);

    let swept: ClientState = serde_json::from_str(&fake.value("gatekeep:10.0.0.1").unwrap()).unwrap();
    assert_eq!(swept.total_requests, 0);
    assert_eq!(fake.value("gatekeep:legacy").as_deref(), Some(r#"{"old":1}"#));
}

#[tokio::test]
async fn test_unanswered_command_times_out() {
    let fake = FakeRedis::start(FakeState {
        silent: true,
        ..FakeState::default()
    })
    .await;
    let timeout = Duration::from_millis(100);
    let store = fake
        .store(RedisStoreOptions {
            operation_timeout: timeout,
            ..RedisStoreOptions::default()
        })
        .await;

    assert!(matches!(store.get("10.0.0.1").await, Err(StoreError::Timeout(t)) if t == timeout));
    assert!(matches!(store.all().await, Err(StoreError::Timeout(_))));

    let limiter = RateLimiter::new(Arc::new(store), LimiterConfig::by_ip(rate(5)));
    assert!(limiter.decide("10.0.0.1", None).await.is_err());
}

#[tokio::test]
async fn test_expiry_is_at_least_one_second() {
    let fake = FakeRedis::start(FakeState::default()).await;
    let store = fake
        .store(RedisStoreOptions {
            ttl: Duration::from_millis(200),
            ..RedisStoreOptions::default()
        })
        .await;

    store
        .add("10.0.0.1", &ClientState::new(&rate(5), Utc::now()))
        .await
        .unwrap();

    let writes = fake.commands("SETEX");
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0][1], "gatekeep:10.0.0.1");
    assert_eq!(writes[0][2], "1");
    assert!(store.exists("10.0.0.1").await.unwrap());
}

#[tokio::test]
async fn test_redis_missing_key() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = store(&url).await;

    assert!(store.get("10.0.0.1").await.unwrap().is_none());
    assert!(!store.exists("10.0.0.1").await.unwrap());
}

#[tokio::test]
async fn test_redis_round_trip_blocked_state() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = store(&url).await;

    let now = Utc::now();
    let mut state = ClientState::new(&rate(1), now);
    state.admit(now);
    state.admit(now);
    assert!(state.is_blocked());

    store.add("2001:db8::1", &state).await.unwrap();

    assert!(store.exists("2001:db8::1").await.unwrap());
    assert_eq!(store.get("2001:db8::1").await.unwrap(), Some(state.clone()));

    let all = store.all().await.unwrap();
    assert_eq!(all, vec![("2001:db8::1".to_string(), state)]);
}

#[tokio::test]
async fn test_redis_entries_expire() {
    let Some(url) = redis_url() else {
        return;
    };
    let options = RedisStoreOptions {
        prefix: format!("gatekeep_test_{}", uuid::Uuid::new_v4().simple()),
        ttl: Duration::from_secs(1),
        ..RedisStoreOptions::default()
    };
    let store = RedisStore::connect(&url, options).await.unwrap();

    store
        .add("ephemeral", &ClientState::new(&rate(5), Utc::now()))
        .await
        .unwrap();
    assert!(store.exists("ephemeral").await.unwrap());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!store.exists("ephemeral").await.unwrap());
}

#[tokio::test]
async fn test_redis_backed_limiter() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = Arc::new(store(&url).await);
    let limiter = RateLimiter::new(store.clone(), LimiterConfig::by_ip(rate(3)));

    for _ in 0..3 {
        assert!(limiter.decide("10.9.9.9", None).await.unwrap().is_allowed());
    }
    assert!(!limiter.decide("10.9.9.9", None).await.unwrap().is_allowed());

    let persisted = store.get("10.9.9.9").await.unwrap().unwrap();
    assert!(persisted.is_blocked());
    assert_eq!(persisted.total_requests, 4);

    let report = limiter.sweep_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.reset, 0);
}
