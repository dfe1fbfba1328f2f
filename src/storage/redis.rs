use crate::error::StoreError;
use crate::storage::scripts::{ACQUIRE_LOCK, RELEASE_LOCK, RENEW_LOCK};
use crate::storage::LockStore;
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::str::FromStr;
use std::time::Duration;

pub struct RedisStore {
    client: ConnectionManager,
    prefix: String,
    acquire_script: Script,
    renew_script: Script,
    release_script: Script,
}

impl RedisStore {
    pub async fn new(
        redis_url: &str,
        username: Option<String>,
        password: Option<String>,
        db: Option<i64>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        // 构建连接信息
        let mut connection_info = redis::ConnectionInfo::from_str(redis_url)?;

        // 设置认证信息
        if let Some(pwd) = password {
            connection_info.redis.password = Some(pwd);
        }
        if let Some(user) = username {
            connection_info.redis.username = Some(user);
        }
        if let Some(database) = db {
            connection_info.redis.db = database;
        }

        let client = redis::Client::open(connection_info)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(connection, prefix))
    }

    pub fn with_connection(client: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            acquire_script: Script::new(ACQUIRE_LOCK),
            renew_script: Script::new(RENEW_LOCK),
            release_script: Script::new(RELEASE_LOCK),
        }
    }

    fn get_lock_key(&self, lock_key: &str) -> String {
        format!("{}{}", self.prefix, lock_key)
    }
}

/// Redis 的 EX 只接受整秒，不足一秒向上取整
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl LockStore for RedisStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.client.clone();
        let result: i32 = self
            .acquire_script
            .key(self.get_lock_key(key))
            .arg(token)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.client.clone();
        let result: i32 = self
            .renew_script
            .key(self.get_lock_key(key))
            .arg(token)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.client.clone();
        let result: i32 = self
            .release_script
            .key(self.get_lock_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.client.clone();
        // -2 表示 key 不存在，-1 表示没有过期时间
        let millis: i64 = conn.pttl(self.get_lock_key(key)).await?;
        if millis >= 0 {
            Ok(Some(Duration::from_millis(millis as u64)))
        } else {
            Ok(None)
        }
    }
}
