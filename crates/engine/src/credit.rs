//! Tenant credit gate.
//!
//! SMS and Email sends each consume one credit from the sending tenant's
//! balance before the adapter is called. WhatsApp is unmetered. A message
//! refused here is dropped and the tenant is told once per cycle.
//!
//! The Redis ledger decrements with a Lua script so the balance can never go
//! below zero, even with several engines sharing one Redis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use courier_common::error::AppError;
use courier_common::types::Channel;

/// Atomically take one credit if any remain. Returns the new balance, or -1.
const CONSUME_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
    return redis.call('DECR', KEYS[1])
end
return -1
"#;

/// Balance store for per-tenant, per-channel credits.
#[async_trait]
pub trait CreditSource: Send + Sync {
    async fn remaining_credits(&self, tenant_id: &str, channel: Channel) -> Result<i64, AppError>;

    /// Take one credit. `Ok(false)` means the balance was already zero.
    async fn consume_credit(&self, tenant_id: &str, channel: Channel) -> Result<bool, AppError>;

    /// Top up a balance. Returns the new balance.
    async fn grant(&self, tenant_id: &str, channel: Channel, amount: u32) -> Result<i64, AppError>;
}

/// Told when a tenant runs out of credits for a channel.
pub trait TenantNotifier: Send + Sync {
    fn credits_exhausted(&self, tenant_id: &str, channel: Channel);
}

/// Notifier that only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTenantNotifier;

impl TenantNotifier for LoggingTenantNotifier {
    fn credits_exhausted(&self, tenant_id: &str, channel: Channel) {
        tracing::warn!(
            tenant_id = %tenant_id,
            channel = %channel,
            "Tenant has no credits left; top up to resume sending"
        );
    }
}

/// Process-local ledger, for tests and single-node setups.
#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    balances: Mutex<HashMap<(String, Channel), i64>>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a balance outright.
    pub fn set(&self, tenant_id: &str, channel: Channel, credits: i64) {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((tenant_id.to_string(), channel), credits.max(0));
    }
}

#[async_trait]
impl CreditSource for InMemoryCreditLedger {
    async fn remaining_credits(&self, tenant_id: &str, channel: Channel) -> Result<i64, AppError> {
        let balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(balances
            .get(&(tenant_id.to_string(), channel))
            .copied()
            .unwrap_or(0))
    }

    async fn consume_credit(&self, tenant_id: &str, channel: Channel) -> Result<bool, AppError> {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        match balances.get_mut(&(tenant_id.to_string(), channel)) {
            Some(balance) if *balance > 0 => {
                *balance -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn grant(&self, tenant_id: &str, channel: Channel, amount: u32) -> Result<i64, AppError> {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry((tenant_id.to_string(), channel)).or_insert(0);
        *balance += i64::from(amount);
        Ok(*balance)
    }
}

/// Redis-backed ledger. Balances live under `tenant:credits:{tenant}:{channel}`.
#[derive(Clone)]
pub struct RedisCreditLedger {
    redis: ConnectionManager,
    consume: redis::Script,
}

impl RedisCreditLedger {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            consume: redis::Script::new(CONSUME_SCRIPT),
        }
    }

    fn key(tenant_id: &str, channel: Channel) -> String {
        format!("tenant:credits:{}:{}", tenant_id, channel)
    }
}

#[async_trait]
impl CreditSource for RedisCreditLedger {
    async fn remaining_credits(&self, tenant_id: &str, channel: Channel) -> Result<i64, AppError> {
        let mut redis = self.redis.clone();
        let balance: Option<i64> = redis::cmd("GET")
            .arg(Self::key(tenant_id, channel))
            .query_async(&mut redis)
            .await?;
        Ok(balance.unwrap_or(0).max(0))
    }

    async fn consume_credit(&self, tenant_id: &str, channel: Channel) -> Result<bool, AppError> {
        let mut redis = self.redis.clone();
        let remaining: i64 = self
            .consume
            .key(Self::key(tenant_id, channel))
            .invoke_async(&mut redis)
            .await?;

        if remaining >= 0 {
            tracing::debug!(tenant_id = %tenant_id, channel = %channel, remaining, "Credit consumed");
        }
        Ok(remaining >= 0)
    }

    async fn grant(&self, tenant_id: &str, channel: Channel, amount: u32) -> Result<i64, AppError> {
        let mut redis = self.redis.clone();
        let balance: i64 = redis::cmd("INCRBY")
            .arg(Self::key(tenant_id, channel))
            .arg(amount)
            .query_async(&mut redis)
            .await?;
        Ok(balance)
    }
}

/// Decides whether a message may be handed to its adapter.
#[derive(Clone)]
pub struct CreditGate {
    source: Arc<dyn CreditSource>,
    notifier: Arc<dyn TenantNotifier>,
}

impl CreditGate {
    pub fn new(source: Arc<dyn CreditSource>, notifier: Arc<dyn TenantNotifier>) -> Self {
        Self { source, notifier }
    }

    /// Take a credit for one send on `channel`.
    ///
    /// Returns `false` when the tenant is out of credits or the ledger could
    /// not be reached; the notifier is only told about the former.
    pub async fn take(&self, tenant_id: &str, channel: Channel) -> bool {
        if !channel.is_metered() {
            return true;
        }

        match self.source.consume_credit(tenant_id, channel).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    channel = %channel,
                    "Send refused, tenant out of credits"
                );
                self.notifier.credits_exhausted(tenant_id, channel);
                false
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    channel = %channel,
                    error = %e,
                    "Credit ledger unavailable, refusing send"
                );
                false
            }
        }
    }
}
