use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{CounterKey, CounterStore, IncrementOutcome, StoreError, StoreResult, count_from_i64};
use crate::{
    config::RedisStorageConfig,
    models::{ActionKind, CounterRecord, Counters, Limit, Tier},
};

/// Hash field holding the tier snapshot.
const TIER_FIELD: &str = "tier";

/// Lua script for the atomic conditional increment.
/// Returns [allowed (0/1), count]
///
/// ARGV[2] is the limit, or -1 for unbounded. ARGV[4] is the absolute expiry
/// for the window hash, or 0 to keep it forever; it is only applied when the
/// hash has no expiry yet, so later increments never push it out.
const INCREMENT_IF_ALLOWED_SCRIPT: &str = r#"
local key = KEYS[1]
local field = ARGV[1]
local limit = tonumber(ARGV[2])
local tier = ARGV[3]
local expire_at = tonumber(ARGV[4])

local current = tonumber(redis.call('HGET', key, field) or '0')

if limit >= 0 and current + 1 > limit then
    return {0, current}
end

local new_value = redis.call('HINCRBY', key, field, 1)
redis.call('HSETNX', key, 'tier', tier)
if expire_at > 0 and redis.call('TTL', key) < 0 then
    redis.call('EXPIREAT', key, expire_at)
end
return {1, new_value}
"#;

/// Counter store keeping one Redis hash per window.
pub struct RedisCounterStore {
    client: redis::Client,
    key_prefix: String,
    closed_period_ttl_secs: Option<u64>,
}

impl RedisCounterStore {
    pub async fn from_config(config: &RedisStorageConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let store = Self {
            client,
            key_prefix: config.key_prefix.clone(),
            closed_period_ttl_secs: config.closed_period_ttl_secs,
        };
        // Fail fast on a bad URL or unreachable server.
        store.health_check().await?;
        Ok(store)
    }

    fn prefixed_key(&self, key: &CounterKey) -> String {
        format!("{}{}", self.key_prefix, key.canonical())
    }

    async fn get_connection(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn expire_at(&self, key: &CounterKey) -> i64 {
        match self.closed_period_ttl_secs {
            Some(ttl) => key
                .period
                .end_epoch()
                .saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)),
            None => 0,
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn read(&self, key: &CounterKey) -> StoreResult<Vec<CounterRecord>> {
        let mut conn = self.get_connection().await?;
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let mut counts = Counters::new();
        for action in ActionKind::ALL {
            if let Some(raw) = fields.get(action.as_str()) {
                let value: i64 = raw.parse().map_err(|_| {
                    StoreError::Corrupt(format!("non-integer count '{}' in {}", raw, action))
                })?;
                counts.set(action, count_from_i64(value, action.as_str())?);
            }
        }

        Ok(vec![CounterRecord {
            user_id: key.user_id.clone(),
            tier: fields.get(TIER_FIELD).and_then(|t| t.parse().ok()),
            period_kind: key.period_kind(),
            period: key.period,
            counts,
        }])
    }

    async fn increment_if_allowed(
        &self,
        key: &CounterKey,
        action: ActionKind,
        tier: Tier,
        limit: Limit,
    ) -> StoreResult<IncrementOutcome> {
        let mut conn = self.get_connection().await?;
        let limit_arg = limit
            .as_bounded()
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let result: Vec<i64> = redis::Script::new(INCREMENT_IF_ALLOWED_SCRIPT)
            .key(self.prefixed_key(key))
            .arg(action.as_str())
            .arg(limit_arg)
            .arg(tier.as_str())
            .arg(self.expire_at(key))
            .invoke_async(&mut conn)
            .await?;

        let (allowed, count) = match result.as_slice() {
            [allowed, count] => (*allowed == 1, *count),
            other => {
                return Err(StoreError::Internal(format!(
                    "unexpected increment script reply: {:?}",
                    other
                )));
            }
        };

        Ok(IncrementOutcome {
            allowed,
            count: count_from_i64(count, action.as_str())?,
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
