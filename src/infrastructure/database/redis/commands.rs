use redis::RedisResult;
use lazy_static::lazy_static;
use redis::Script;
use redis::aio::MultiplexedConnection;

pub const PREFIX: &str = "zb";

pub fn user_key(id: i64) -> String {
    format!("{}:user:{}", PREFIX, id)
}

pub fn user_state_key(id: i64) -> String {
    format!("{}:user_state:{}", PREFIX, id)
}

pub fn balance_key(id: i64) -> String {
    format!("{}:balance:{}", PREFIX, id)
}

pub fn referrals_key(id: i64) -> String {
    format!("{}:referrals:{}", PREFIX, id)
}

pub fn referral_set_key(id: i64) -> String {
    format!("{}:referral_set:{}", PREFIX, id)
}

pub fn user_completions_key(id: i64) -> String {
    format!("{}:user_completions:{}", PREFIX, id)
}

pub fn task_key(id: u32) -> String {
    format!("{}:task:{}", PREFIX, id)
}

pub fn task_completions_key(id: u32) -> String {
    format!("{}:task_completions:{}", PREFIX, id)
}

pub fn pending_proof_key(user_id: i64, task_id: u32) -> String {
    format!("{}:pending_proof:{}:{}", PREFIX, user_id, task_id)
}

pub fn proof_key(id: u64) -> String {
    format!("{}:proof:{}", PREFIX, id)
}

pub fn proof_resolution_key(id: u64) -> String {
    format!("{}:proof_resolution:{}", PREFIX, id)
}

pub fn withdrawal_key(id: u64) -> String {
    format!("{}:withdrawal:{}", PREFIX, id)
}

pub fn withdrawal_resolution_key(id: u64) -> String {
    format!("{}:withdrawal_resolution:{}", PREFIX, id)
}

pub fn invoice_key(id: i64) -> String {
    format!("{}:invoice:{}", PREFIX, id)
}

pub const TASKS_SET: &str = "zb:tasks";
pub const PROOFS_SET: &str = "zb:proofs";
pub const WITHDRAWALS_SET: &str = "zb:withdrawals";
pub const INVOICES_SET: &str = "zb:invoices";
pub const SETTLED_INVOICES_SET: &str = "zb:settled_invoices";
pub const TASK_SEQ: &str = "zb:task_seq";
pub const PROOF_SEQ: &str = "zb:proof_seq";
pub const WITHDRAWAL_SEQ: &str = "zb:withdrawal_seq";
pub const MAINTENANCE_KEY: &str = "zb:maintenance";

lazy_static! {
    /// KEYS: balance, user record. ARGV: signed delta.
    /// Returns `{0, new}`, `{-1, 0}` for a missing user or `{-2, balance}` on overdraft.
    pub static ref ADJUST_BALANCE: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[2]) == 0 then
            return {-1, 0}
        end
        local balance = tonumber(redis.call('GET', KEYS[1]) or '0')
        local delta = tonumber(ARGV[1])
        if balance + delta < 0 then
            return {-2, balance}
        end
        return {0, redis.call('INCRBY', KEYS[1], ARGV[1])}
        "#
    );

    /// KEYS: user record, user state hash. ARGV: field, value.
    /// Returns 0 when the user does not exist, 1 once the field is written.
    pub static ref SET_USER_FIELD: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
        return 1
        "#
    );

    /// KEYS: settled invoices set, balance, user record. ARGV: invoice id, units.
    /// Returns `{0, new}`, `{1, 0}` when already settled or `{-1, 0}` for a missing user.
    pub static ref SETTLE_INVOICE: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[3]) == 0 then
            return {-1, 0}
        end
        if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
            return {1, 0}
        end
        redis.call('SADD', KEYS[1], ARGV[1])
        return {0, redis.call('INCRBY', KEYS[2], ARGV[2])}
        "#
    );

    /// KEYS: task record, task completions, user completions.
    /// ARGV: user id, task id, timestamp, cap (-1 for none).
    pub static ref CLAIM_COMPLETION: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 'missing'
        end
        if redis.call('HEXISTS', KEYS[3], ARGV[2]) == 1 then
            return 'duplicate'
        end
        local cap = tonumber(ARGV[4])
        local count = redis.call('HLEN', KEYS[2])
        if cap >= 0 and count >= cap then
            return 'full'
        end
        redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
        redis.call('HSET', KEYS[3], ARGV[2], ARGV[3])
        if cap >= 0 and count + 1 >= cap then
            return 'closed'
        end
        return 'recorded'
        "#
    );
}

/// Collects every key matching `pattern` with a cursor-based SCAN.
pub async fn scan_keys(con: &mut MultiplexedConnection, pattern: &str) -> RedisResult<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let res: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(1000)
            .query_async(con)
            .await?;
        cursor = res.0;
        keys.extend(res.1);
        if cursor == 0 {
            break;
        }
    }
    Ok(keys)
}

/// Ids of every stored user record.
pub async fn scan_user_ids(con: &mut MultiplexedConnection) -> RedisResult<Vec<i64>> {
    let prefix = format!("{}:user:", PREFIX);
    let keys = scan_keys(con, &format!("{}*", prefix)).await?;
    Ok(keys
        .iter()
        .filter_map(|key| key.strip_prefix(&prefix))
        .filter_map(|id| id.parse::<i64>().ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(user_key(42), "zb:user:42");
        assert_eq!(pending_proof_key(42, 3), "zb:pending_proof:42:3");
        assert_eq!(task_completions_key(3), "zb:task_completions:3");
        assert_eq!(user_state_key(42), "zb:user_state:42");
        assert!(TASKS_SET.starts_with(PREFIX));
    }

    #[test]
    fn user_scan_skips_sibling_user_keys() {
        let prefix = format!("{}:user:", PREFIX);
        assert!(user_key(7).starts_with(&prefix));
        assert!(!user_state_key(7).starts_with(&prefix));
        assert!(!user_completions_key(7).starts_with(&prefix));
    }
}
