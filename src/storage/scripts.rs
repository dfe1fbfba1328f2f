//! 分布式锁的 Lua 脚本，KEYS[1] 为锁的 key，ARGV[1] 为持有者 token

/// 仅在 key 不存在时加锁，ARGV[2] 为过期秒数
pub const ACQUIRE_LOCK: &str = r#"
    if redis.call('set', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
        return 1
    end
    return 0
"#;

/// 仅在值匹配时续约，ARGV[2] 为过期秒数
pub const RENEW_LOCK: &str = r#"
    if redis.call('get', KEYS[1]) == ARGV[1] then
        return redis.call('expire', KEYS[1], ARGV[2])
    end
    return 0
"#;

/// 仅在值匹配时释放
pub const RELEASE_LOCK: &str = r#"
    if redis.call('get', KEYS[1]) == ARGV[1] then
        return redis.call('del', KEYS[1])
    end
    return 0
"#;
