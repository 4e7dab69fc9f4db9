//! # Command Dispatcher
//!
//! Maps one parsed RESP request to a typed operation against a single
//! shard's storage engine and returns the reply to send back (spec §4.4,
//! §6). Every handler here assumes its keys already route to the shard
//! it's given; routing itself lives in [`crate::router`].
//!
//! Multi-key commands (`SINTERSTORE`, `MSET`, ...) require every key to
//! hash to the same shard, the same constraint Redis Cluster places on
//! multi-key operations (`CROSSSLOT`). A caller that spans shards gets
//! `CoreError::Other` rather than silent partial execution.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use corekv_common::error::{CoreError, CoreResult};
use corekv_common::Key;
use corekv_resp::Reply;
use corekv_store::bitmap::{self, BitOp};
use corekv_store::bytes_buf::ManagedBytes;
use corekv_store::entry::{Value, ValueKind};
use corekv_store::geo::{self, GeoUnit};
use corekv_store::map::MapValue;
use corekv_store::set::Set;
use corekv_store::shard::Shard;
use corekv_store::zset::{ScoreBound, ZAddFlags};

fn eq_ci(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn parse_i64(arg: &[u8]) -> CoreResult<i64> {
    std::str::from_utf8(arg).ok().and_then(|s| s.parse().ok()).ok_or(CoreError::NotAnInteger)
}

fn parse_u64(arg: &[u8]) -> CoreResult<u64> {
    std::str::from_utf8(arg).ok().and_then(|s| s.parse().ok()).ok_or(CoreError::NotAnInteger)
}

fn parse_f64(arg: &[u8]) -> CoreResult<f64> {
    std::str::from_utf8(arg).ok().and_then(|s| s.parse().ok()).ok_or(CoreError::NotAFloat)
}

fn parse_key(arg: &[u8]) -> CoreResult<Key> {
    Key::new(arg.to_vec())
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::String => "string",
        ValueKind::List => "list",
        ValueKind::Hash => "hash",
        ValueKind::Set => "set",
        ValueKind::ZSet => "zset",
    }
}

/// Dispatches one already-parsed request against `shard`, returning the
/// reply to write back to the client. `request[0]` is the command name;
/// an empty request is a protocol error the caller should not have let
/// reach here.
pub fn dispatch<R: Rng>(shard: &mut Shard, request: &[Vec<u8>], now: Instant, rng: &mut R) -> Reply {
    let Some(cmd) = request.first() else {
        return CoreError::Protocol("empty command".into()).into();
    };
    let args = &request[1..];

    let result = route(shard, cmd, args, now, rng);
    match result {
        Ok(reply) => reply,
        Err(err) => err.into(),
    }
}

fn route<R: Rng>(shard: &mut Shard, cmd: &[u8], args: &[Vec<u8>], now: Instant, rng: &mut R) -> CoreResult<Reply> {
    macro_rules! is {
        ($name:expr) => {
            eq_ci(cmd, $name)
        };
    }

    if is!(b"PING") {
        return Ok(match args.len() {
            0 => Reply::Simple("PONG".to_string()),
            1 => Reply::bulk(args[0].clone()),
            _ => return Err(CoreError::WrongArity("PING".into())),
        });
    }
    if is!(b"ECHO") {
        let [msg] = require_n(args, "ECHO")?;
        return Ok(Reply::bulk(msg.clone()));
    }
    if is!(b"COMMAND") {
        return Ok(command_reply(args));
    }
    if is!(b"TYPE") {
        let [key] = require_n(args, "TYPE")?;
        return Ok(match shard.type_of(key, hash(key), now) {
            Some(kind) => Reply::Simple(kind_name(kind).to_string()),
            None => Reply::Simple("none".to_string()),
        });
    }

    // -- Strings -----------------------------------------------------
    if is!(b"GET") {
        let [key] = require_n(args, "GET")?;
        return get_string(shard, key, now);
    }
    if is!(b"SET") {
        return cmd_set(shard, args, now);
    }
    if is!(b"SETNX") {
        let [key, value] = require_n(args, "SETNX")?;
        if shard.exists(key, hash(key), now) {
            return Ok(Reply::integer(0));
        }
        shard.set(parse_key(key)?, Value::Bytes(ManagedBytes::new(value.to_vec())), None, now);
        return Ok(Reply::integer(1));
    }
    if is!(b"SETEX") {
        let [key, seconds, value] = require_n(args, "SETEX")?;
        let ttl = Duration::from_secs(parse_u64(seconds)?);
        shard.set(parse_key(key)?, Value::Bytes(ManagedBytes::new(value.to_vec())), Some(ttl), now);
        return Ok(Reply::ok());
    }
    if is!(b"PSETEX") {
        let [key, millis, value] = require_n(args, "PSETEX")?;
        let ttl = Duration::from_millis(parse_u64(millis)?);
        shard.set(parse_key(key)?, Value::Bytes(ManagedBytes::new(value.to_vec())), Some(ttl), now);
        return Ok(Reply::ok());
    }
    if is!(b"GETSET") {
        let [key, value] = require_n(args, "GETSET")?;
        let previous = shard.set(parse_key(key)?, Value::Bytes(ManagedBytes::new(value.to_vec())), None, now);
        return Ok(match previous {
            Some(entry) if !entry.is_expired_at(now) => Reply::bulk(entry.value.as_bytes()?.as_bytes().to_vec()),
            _ => Reply::NullBulk,
        });
    }
    if is!(b"APPEND") {
        let [key, value] = require_n(args, "APPEND")?;
        return with_string_or_create(shard, key, now, |buf| Ok(buf.append(value) as i64));
    }
    if is!(b"STRLEN") {
        let [key] = require_n(args, "STRLEN")?;
        return Ok(match shard.get(key, hash(key), now) {
            Some(entry) => Reply::integer(entry.value.as_bytes()?.len() as i64),
            None => Reply::integer(0),
        });
    }
    if is!(b"GETRANGE") {
        let [key, start, end] = require_n(args, "GETRANGE")?;
        let (start, end) = (parse_i64(start)?, parse_i64(end)?);
        return Ok(match shard.get(key, hash(key), now) {
            Some(entry) => {
                let bytes = entry.value.as_bytes()?.as_bytes();
                match corekv_store::normalize_signed_range(start, end, bytes.len()) {
                    Some((s, e)) => Reply::bulk(bytes[s..=e].to_vec()),
                    None => Reply::bulk(Vec::new()),
                }
            }
            None => Reply::bulk(Vec::new()),
        });
    }
    if is!(b"SETRANGE") {
        let [key, offset, value] = require_n(args, "SETRANGE")?;
        let offset = parse_u64(offset)? as usize;
        return with_string_or_create(shard, key, now, |buf| {
            buf.extend(offset, 0);
            let mut bytes = buf.as_bytes().to_vec();
            if bytes.len() < offset + value.len() {
                bytes.resize(offset + value.len(), 0);
            }
            bytes[offset..offset + value.len()].copy_from_slice(value);
            *buf = ManagedBytes::new(bytes);
            Ok(buf.len() as i64)
        });
    }
    if is!(b"INCR") {
        let [key] = require_n(args, "INCR")?;
        return incr_by(shard, key, 1, now);
    }
    if is!(b"DECR") {
        let [key] = require_n(args, "DECR")?;
        return incr_by(shard, key, -1, now);
    }
    if is!(b"INCRBY") {
        let [key, delta] = require_n(args, "INCRBY")?;
        return incr_by(shard, key, parse_i64(delta)?, now);
    }
    if is!(b"DECRBY") {
        let [key, delta] = require_n(args, "DECRBY")?;
        return incr_by(shard, key, -parse_i64(delta)?, now);
    }
    if is!(b"INCRBYFLOAT") {
        let [key, delta] = require_n(args, "INCRBYFLOAT")?;
        let delta = parse_f64(delta)?;
        return with_string_or_create(shard, key, now, |buf| {
            let current: f64 = std::str::from_utf8(buf.as_bytes()).ok().and_then(|s| s.trim().parse().ok()).ok_or(CoreError::NotAFloat)?;
            let updated = current + delta;
            *buf = ManagedBytes::new(corekv_store::fmt_float(updated).into_bytes());
            Ok(0i64)
        })
        .map(|_| ())
        .and_then(|_| match shard.get(key, hash(key), now) {
            Some(entry) => Ok(Reply::bulk(entry.value.as_bytes()?.as_bytes().to_vec())),
            None => Ok(Reply::NullBulk),
        });
    }
    if is!(b"MGET") {
        let mut items = Vec::with_capacity(args.len());
        for key in args {
            items.push(match shard.get(key, hash(key), now) {
                Some(entry) => match entry.value.as_bytes() {
                    Ok(b) => Reply::bulk(b.as_bytes().to_vec()),
                    Err(_) => Reply::NullBulk,
                },
                None => Reply::NullBulk,
            });
        }
        return Ok(Reply::array(items));
    }
    if is!(b"MSET") {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(CoreError::WrongArity("MSET".into()));
        }
        for pair in args.chunks(2) {
            shard.set(parse_key(&pair[0])?, Value::Bytes(ManagedBytes::new(pair[1].clone())), None, now);
        }
        return Ok(Reply::ok());
    }
    if is!(b"MSETNX") {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(CoreError::WrongArity("MSETNX".into()));
        }
        if args.chunks(2).any(|pair| shard.exists(&pair[0], hash(&pair[0]), now)) {
            return Ok(Reply::integer(0));
        }
        for pair in args.chunks(2) {
            shard.set(parse_key(&pair[0])?, Value::Bytes(ManagedBytes::new(pair[1].clone())), None, now);
        }
        return Ok(Reply::integer(1));
    }

    // -- Key space -----------------------------------------------------
    if is!(b"DEL") {
        let removed = args.iter().filter(|k| shard.del(k, hash(k))).count();
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"EXISTS") {
        let count = args.iter().filter(|k| shard.exists(k, hash(k), now)).count();
        return Ok(Reply::integer(count as i64));
    }
    if is!(b"EXPIRE") {
        let [key, seconds] = require_n(args, "EXPIRE")?;
        return set_expiry(shard, key, Duration::from_secs(parse_u64(seconds)?), now);
    }
    if is!(b"PEXPIRE") {
        let [key, millis] = require_n(args, "PEXPIRE")?;
        return set_expiry(shard, key, Duration::from_millis(parse_u64(millis)?), now);
    }
    if is!(b"PERSIST") {
        let [key] = require_n(args, "PERSIST")?;
        return Ok(Reply::integer(shard.persist(key, hash(key)) as i64));
    }
    if is!(b"TTL") {
        let [key] = require_n(args, "TTL")?;
        return Ok(ttl_reply(shard.ttl(key, hash(key), now), false));
    }
    if is!(b"PTTL") {
        let [key] = require_n(args, "PTTL")?;
        return Ok(ttl_reply(shard.ttl(key, hash(key), now), true));
    }
    if is!(b"RENAME") {
        let [key, new_key] = require_n(args, "RENAME")?;
        shard.rename(key, hash(key), parse_key(new_key)?, now)?;
        return Ok(Reply::ok());
    }
    if is!(b"RENAMENX") {
        let [key, new_key] = require_n(args, "RENAMENX")?;
        if shard.exists(new_key, hash(new_key), now) {
            return Ok(Reply::integer(0));
        }
        shard.rename(key, hash(key), parse_key(new_key)?, now)?;
        return Ok(Reply::integer(1));
    }
    if is!(b"DBSIZE") {
        return Ok(Reply::integer(shard.dbsize() as i64));
    }
    if is!(b"INFO") {
        return Ok(Reply::bulk(info_reply(shard)));
    }
    if is!(b"FLUSHDB") || is!(b"FLUSHALL") {
        shard.flush();
        return Ok(Reply::ok());
    }
    if is!(b"RANDOMKEY") {
        return Ok(match shard.random_key(rng) {
            Some(key) => Reply::bulk(key),
            None => Reply::NullBulk,
        });
    }
    if is!(b"KEYS") {
        let [pattern] = require_n(args, "KEYS")?;
        return Ok(Reply::bulk_array(shard.keys_matching(pattern)));
    }

    // -- Lists -----------------------------------------------------
    if is!(b"LPUSH") {
        return list_push(shard, args, now, true, false);
    }
    if is!(b"RPUSH") {
        return list_push(shard, args, now, false, false);
    }
    if is!(b"LPUSHX") {
        return list_push(shard, args, now, true, true);
    }
    if is!(b"RPUSHX") {
        return list_push(shard, args, now, false, true);
    }
    if is!(b"LPOP") {
        return list_pop(shard, args, now, true);
    }
    if is!(b"RPOP") {
        return list_pop(shard, args, now, false);
    }
    if is!(b"LLEN") {
        let [key] = require_n(args, "LLEN")?;
        return Ok(Reply::integer(with_list(shard, key, now, |l| Ok(l.len() as i64))?.unwrap_or(0)));
    }
    if is!(b"LRANGE") {
        let [key, start, end] = require_n(args, "LRANGE")?;
        let (start, end) = (parse_i64(start)?, parse_i64(end)?);
        let items = with_list(shard, key, now, |l| Ok(l.range(start, end)))?.unwrap_or_default();
        return Ok(Reply::bulk_array(items));
    }
    if is!(b"LINDEX") {
        let [key, index] = require_n(args, "LINDEX")?;
        let index = parse_i64(index)?;
        let found = with_list(shard, key, now, |l| Ok(l.index(index).map(|b| b.to_vec())))?.flatten();
        return Ok(found.map(Reply::bulk).unwrap_or(Reply::NullBulk));
    }
    if is!(b"LSET") {
        let [key, index, value] = require_n(args, "LSET")?;
        let index = parse_i64(index)?;
        let result = with_list_mut(shard, key, now, |l| l.set_at(index, value.to_vec()).map_err(|_| CoreError::OutOfRange))?;
        result.ok_or(CoreError::NoSuchKey)??;
        return Ok(Reply::ok());
    }
    if is!(b"LINSERT") {
        let [key, where_, pivot, value] = require_n(args, "LINSERT")?;
        let before = eq_ci(where_, b"BEFORE");
        if !before && !eq_ci(where_, b"AFTER") {
            return Err(CoreError::Syntax);
        }
        let result = with_list_mut(shard, key, now, |l| {
            if before { l.insert_before(pivot, value.to_vec()) } else { l.insert_after(pivot, value.to_vec()) }
        })?;
        return Ok(match result {
            None => Reply::integer(0),
            Some(Ok(len)) => Reply::integer(len as i64),
            Some(Err(())) => Reply::integer(-1),
        });
    }
    if is!(b"LREM") {
        let [key, count, value] = require_n(args, "LREM")?;
        let count = parse_i64(count)?;
        let removed = with_list_mut(shard, key, now, |l| Ok::<_, CoreError>(l.remove_value(count, value)))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"LTRIM") {
        let [key, start, end] = require_n(args, "LTRIM")?;
        let (start, end) = (parse_i64(start)?, parse_i64(end)?);
        with_list_mut(shard, key, now, |l| {
            l.trim(start, end);
            Ok::<_, CoreError>(())
        })
        .transpose()?;
        return Ok(Reply::ok());
    }

    // -- Hashes -----------------------------------------------------
    if is!(b"HSET") {
        return hash_set(shard, args, now, false);
    }
    if is!(b"HSETNX") {
        return hash_set(shard, args, now, true);
    }
    if is!(b"HMSET") {
        hash_set(shard, args, now, false)?;
        return Ok(Reply::ok());
    }
    if is!(b"HGET") {
        let [key, field] = require_n(args, "HGET")?;
        let value = with_map(shard, key, now, |m| Ok(m.get(field).map(MapValue::as_bytes_for_reply)))?.flatten();
        return Ok(value.map(Reply::bulk).unwrap_or(Reply::NullBulk));
    }
    if is!(b"HMGET") {
        let [key, fields @ ..] = args else { return Err(CoreError::WrongArity("HMGET".into())) };
        let values = with_map(shard, key, now, |m| {
            Ok(fields.iter().map(|f| m.get(f).map(MapValue::as_bytes_for_reply)).collect::<Vec<_>>())
        })?
        .unwrap_or_else(|| vec![None; fields.len()]);
        return Ok(Reply::array(values.into_iter().map(|v| v.map(Reply::Bulk).unwrap_or(Reply::NullBulk)).collect()));
    }
    if is!(b"HDEL") {
        let [key, fields @ ..] = args else { return Err(CoreError::WrongArity("HDEL".into())) };
        let removed = with_map_mut(shard, key, now, |m| Ok::<_, CoreError>(m.delete_many(fields)))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"HLEN") {
        let [key] = require_n(args, "HLEN")?;
        return Ok(Reply::integer(with_map(shard, key, now, |m| Ok(m.len() as i64))?.unwrap_or(0)));
    }
    if is!(b"HEXISTS") {
        let [key, field] = require_n(args, "HEXISTS")?;
        return Ok(Reply::integer(with_map(shard, key, now, |m| Ok(m.exists(field) as i64))?.unwrap_or(0)));
    }
    if is!(b"HSTRLEN") {
        let [key, field] = require_n(args, "HSTRLEN")?;
        return Ok(Reply::integer(with_map(shard, key, now, |m| Ok(m.field_len(field).unwrap_or(0) as i64))?.unwrap_or(0)));
    }
    if is!(b"HKEYS") {
        let [key] = require_n(args, "HKEYS")?;
        let keys = with_map(shard, key, now, |m| Ok(m.keys().cloned().collect::<Vec<_>>()))?.unwrap_or_default();
        return Ok(Reply::bulk_array(keys));
    }
    if is!(b"HVALS") {
        let [key] = require_n(args, "HVALS")?;
        let values = with_map(shard, key, now, |m| Ok(m.values().map(MapValue::as_bytes_for_reply).collect::<Vec<_>>()))?.unwrap_or_default();
        return Ok(Reply::bulk_array(values));
    }
    if is!(b"HGETALL") {
        let [key] = require_n(args, "HGETALL")?;
        let pairs = with_map(shard, key, now, |m| {
            Ok(m.iter().map(|(k, v)| (k.clone(), v.as_bytes_for_reply())).collect::<Vec<_>>())
        })?
        .unwrap_or_default();
        return Ok(Reply::flat_pairs(pairs));
    }
    if is!(b"HINCRBY") {
        let [key, field, delta] = require_n(args, "HINCRBY")?;
        let delta = parse_i64(delta)?;
        let value = with_map_mut(shard, key, now, |m| m.incr_by(field, delta))?.unwrap()?;
        return Ok(Reply::integer(value));
    }
    if is!(b"HINCRBYFLOAT") {
        let [key, field, delta] = require_n(args, "HINCRBYFLOAT")?;
        let delta = parse_f64(delta)?;
        let value = with_map_mut(shard, key, now, |m| m.incr_by_float(field, delta))?.unwrap()?;
        return Ok(Reply::bulk(corekv_store::fmt_float(value).into_bytes()));
    }

    // -- Sets -----------------------------------------------------
    if is!(b"SADD") {
        let [key, members @ ..] = args else { return Err(CoreError::WrongArity("SADD".into())) };
        let added = with_set_mut(shard, key, now, |s| Ok::<_, CoreError>(s.add_many(members.to_vec())))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(added as i64));
    }
    if is!(b"SREM") {
        let [key, members @ ..] = args else { return Err(CoreError::WrongArity("SREM".into())) };
        let removed = with_set_mut(shard, key, now, |s| Ok::<_, CoreError>(s.remove_many(members)))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"SCARD") {
        let [key] = require_n(args, "SCARD")?;
        return Ok(Reply::integer(with_set(shard, key, now, |s| Ok(s.len() as i64))?.unwrap_or(0)));
    }
    if is!(b"SISMEMBER") {
        let [key, member] = require_n(args, "SISMEMBER")?;
        return Ok(Reply::integer(with_set(shard, key, now, |s| Ok(s.contains(member) as i64))?.unwrap_or(0)));
    }
    if is!(b"SMEMBERS") {
        let [key] = require_n(args, "SMEMBERS")?;
        let members = with_set(shard, key, now, |s| Ok(s.iter().cloned().collect::<Vec<_>>()))?.unwrap_or_default();
        return Ok(Reply::bulk_array(members));
    }
    if is!(b"SRANDMEMBER") {
        let [key] = require_n(args, "SRANDMEMBER")?;
        let member = with_set(shard, key, now, |s| Ok(s.random_member(rng).cloned()))?.flatten();
        return Ok(member.map(Reply::bulk).unwrap_or(Reply::NullBulk));
    }
    if is!(b"SPOP") {
        let [key] = require_n(args, "SPOP")?;
        let popped = with_set_mut(shard, key, now, |s| Ok::<_, CoreError>(s.pop_random(rng, 1)))?.transpose()?.unwrap_or_default();
        return Ok(popped.into_iter().next().map(Reply::bulk).unwrap_or(Reply::NullBulk));
    }
    if is!(b"SMOVE") {
        let [src, dest, member] = require_n(args, "SMOVE")?;
        return smove(shard, src, dest, member, now);
    }
    if is!(b"SDIFF") || is!(b"SINTER") || is!(b"SUNION") {
        return set_algebra_reply(shard, cmd, args, now);
    }
    if is!(b"SDIFFSTORE") || is!(b"SINTERSTORE") || is!(b"SUNIONSTORE") {
        return set_algebra_store(shard, cmd, args, now);
    }

    // -- Sorted sets -----------------------------------------------------
    if is!(b"ZADD") {
        return zadd(shard, args, now, rng);
    }
    if is!(b"ZINCRBY") {
        let [key, delta, member] = require_n(args, "ZINCRBY")?;
        let delta = parse_f64(delta)?;
        let score = with_zset_mut(shard, key, now, |z| Ok::<_, CoreError>(z.zincrby(rng, member.to_vec(), delta)))?
            .transpose()?
            .unwrap();
        return Ok(Reply::bulk(corekv_store::fmt_float(score).into_bytes()));
    }
    if is!(b"ZREM") {
        let [key, members @ ..] = args else { return Err(CoreError::WrongArity("ZREM".into())) };
        let removed = with_zset_mut(shard, key, now, |z| Ok::<_, CoreError>(z.zrem(members)))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"ZCARD") {
        let [key] = require_n(args, "ZCARD")?;
        return Ok(Reply::integer(with_zset(shard, key, now, |z| Ok(z.len() as i64))?.unwrap_or(0)));
    }
    if is!(b"ZSCORE") {
        let [key, member] = require_n(args, "ZSCORE")?;
        let score = with_zset(shard, key, now, |z| Ok(z.score(member)))?.flatten();
        return Ok(score.map(|s| Reply::bulk(corekv_store::fmt_float(s).into_bytes())).unwrap_or(Reply::NullBulk));
    }
    if is!(b"ZRANK") || is!(b"ZREVRANK") {
        let [key, member] = require_n(args, cmd_name(cmd))?;
        let reverse = is!(b"ZREVRANK");
        let rank = with_zset(shard, key, now, |z| Ok(z.rank(member, reverse)))?.flatten();
        return Ok(rank.map(|r| Reply::integer(r as i64)).unwrap_or(Reply::NullBulk));
    }
    if is!(b"ZRANGE") || is!(b"ZREVRANGE") {
        let [key, start, end, rest @ ..] = args else { return Err(CoreError::WrongArity(cmd_name(cmd).into())) };
        let (start, end) = (parse_i64(start)?, parse_i64(end)?);
        let with_scores = parse_withscores(cmd_name(cmd), rest)?;
        let reverse = is!(b"ZREVRANGE");
        let members = with_zset(shard, key, now, |z| Ok(z.range_by_rank(start, end, reverse)))?.unwrap_or_default();
        return Ok(render_zmembers(members, with_scores));
    }
    if is!(b"ZRANGEBYSCORE") || is!(b"ZREVRANGEBYSCORE") {
        let [key, min, max, rest @ ..] = args else { return Err(CoreError::WrongArity(cmd_name(cmd).into())) };
        let with_scores = parse_withscores(cmd_name(cmd), rest)?;
        let reverse = is!(b"ZREVRANGEBYSCORE");
        let (min, max) = if reverse { (parse_score_bound(max)?, parse_score_bound(min)?) } else { (parse_score_bound(min)?, parse_score_bound(max)?) };
        let members = with_zset(shard, key, now, |z| Ok(z.range_by_score(min, max, reverse, 0, None)))?.unwrap_or_default();
        return Ok(render_zmembers(members, with_scores));
    }
    if is!(b"ZCOUNT") {
        let [key, min, max] = require_n(args, "ZCOUNT")?;
        let (min, max) = (parse_score_bound(min)?, parse_score_bound(max)?);
        return Ok(Reply::integer(with_zset(shard, key, now, |z| Ok(z.count(min, max) as i64))?.unwrap_or(0)));
    }
    if is!(b"ZREMRANGEBYRANK") {
        let [key, start, end] = require_n(args, "ZREMRANGEBYRANK")?;
        let (start, end) = (parse_i64(start)?, parse_i64(end)?);
        let removed = with_zset_mut(shard, key, now, |z| Ok::<_, CoreError>(z.remove_range_by_rank(start, end)))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"ZREMRANGEBYSCORE") {
        let [key, min, max] = require_n(args, "ZREMRANGEBYSCORE")?;
        let (min, max) = (parse_score_bound(min)?, parse_score_bound(max)?);
        let removed = with_zset_mut(shard, key, now, |z| Ok::<_, CoreError>(z.remove_range_by_score(min, max)))?.transpose()?.unwrap_or(0);
        return Ok(Reply::integer(removed as i64));
    }
    if is!(b"ZUNIONSTORE") || is!(b"ZINTERSTORE") {
        return zset_store(shard, cmd, args, now, rng);
    }

    // -- Bitmaps -----------------------------------------------------
    if is!(b"SETBIT") {
        let [key, offset, value] = require_n(args, "SETBIT")?;
        let offset = parse_u64(offset)?;
        let value = match value.as_slice() {
            b"0" => false,
            b"1" => true,
            _ => return Err(CoreError::OutOfRange),
        };
        let previous = with_string_or_create(shard, key, now, |buf| bitmap::set_bit(buf, offset, value).map(|p| p as i64).map_err(|_| CoreError::OutOfRange))?;
        return Ok(Reply::integer(previous));
    }
    if is!(b"GETBIT") {
        let [key, offset] = require_n(args, "GETBIT")?;
        let offset = parse_u64(offset)?;
        let bit = with_string(shard, key, now, |buf| Ok(bitmap::get_bit(buf, offset) as i64))?.unwrap_or(0);
        return Ok(Reply::integer(bit));
    }
    if is!(b"BITCOUNT") {
        let [key, rest @ ..] = args else { return Err(CoreError::WrongArity("BITCOUNT".into())) };
        let (start, end) = parse_optional_range(rest)?;
        let count = with_string(shard, key, now, |buf| Ok(bitmap::bit_count(buf, start, end) as i64))?.unwrap_or(0);
        return Ok(Reply::integer(count));
    }
    if is!(b"BITPOS") {
        let [key, bit, rest @ ..] = args else { return Err(CoreError::WrongArity("BITPOS".into())) };
        let target = match bit.as_slice() {
            b"0" => false,
            b"1" => true,
            _ => return Err(CoreError::OutOfRange),
        };
        let (start, end) = parse_optional_range(rest)?;
        let pos = with_string(shard, key, now, |buf| Ok(bitmap::bit_pos(buf, target, start, end)))?.flatten();
        return Ok(pos.map(|p| Reply::integer(p as i64)).unwrap_or(Reply::integer(-1)));
    }
    if is!(b"BITOP") {
        return bitop(shard, args, now);
    }

    // -- Geo -----------------------------------------------------
    if is!(b"GEOADD") {
        let [key, triples @ ..] = args else { return Err(CoreError::WrongArity("GEOADD".into())) };
        if triples.is_empty() || triples.len() % 3 != 0 {
            return Err(CoreError::WrongArity("GEOADD".into()));
        }
        let mut added = 0i64;
        for triple in triples.chunks_exact(3) {
            let (lon, lat, member) = (parse_f64(&triple[0])?, parse_f64(&triple[1])?, &triple[2]);
            let outcome = with_zset_mut(shard, key, now, |z| geo::geo_add(z, rng, member.clone(), lon, lat))?.transpose()?.unwrap();
            added += outcome.added as i64;
        }
        return Ok(Reply::integer(added));
    }
    if is!(b"GEOPOS") {
        let [key, member] = require_n(args, "GEOPOS")?;
        let pos = with_zset(shard, key, now, |z| Ok(geo::geo_pos(z, member)))?.flatten();
        return Ok(match pos {
            Some((lon, lat)) => Reply::array(vec![
                Reply::bulk(corekv_store::fmt_float(lon).into_bytes()),
                Reply::bulk(corekv_store::fmt_float(lat).into_bytes()),
            ]),
            None => Reply::NullArray,
        });
    }
    if is!(b"GEODIST") {
        let [key, m1, m2, rest @ ..] = args else { return Err(CoreError::WrongArity("GEODIST".into())) };
        let unit = parse_unit(rest)?;
        let dist = with_zset(shard, key, now, |z| Ok(geo::geo_dist(z, m1, m2, unit)))?.flatten();
        return Ok(dist.map(|d| Reply::bulk(corekv_store::fmt_float(d).into_bytes())).unwrap_or(Reply::NullBulk));
    }
    if is!(b"GEOHASH") {
        let [key, member] = require_n(args, "GEOHASH")?;
        let hash = with_zset(shard, key, now, |z| Ok(geo::geo_hash(z, member)))?.flatten();
        return Ok(hash.map(|h| Reply::bulk(h.into_bytes())).unwrap_or(Reply::NullBulk));
    }
    if is!(b"GEORADIUS") {
        let [key, lon, lat, radius, unit_name, opts @ ..] = args else { return Err(CoreError::WrongArity("GEORADIUS".into())) };
        let unit = GeoUnit::from_name(std::str::from_utf8(unit_name).unwrap_or("")).ok_or(CoreError::Syntax)?;
        let geo_opts = GeoRadiusOpts::parse(opts)?;
        let matches = with_zset(shard, key, now, |z| {
            Ok(geo::geo_radius(z, parse_f64(lon)?, parse_f64(lat)?, parse_f64(radius)?, unit, geo_opts.order, geo_opts.count))
        })?
        .unwrap_or_default();
        return Ok(geo_opts.render(matches));
    }
    if is!(b"GEORADIUSBYMEMBER") {
        let [key, member, radius, unit_name, opts @ ..] = args else { return Err(CoreError::WrongArity("GEORADIUSBYMEMBER".into())) };
        let unit = GeoUnit::from_name(std::str::from_utf8(unit_name).unwrap_or("")).ok_or(CoreError::Syntax)?;
        let geo_opts = GeoRadiusOpts::parse(opts)?;
        let matches = with_zset(shard, key, now, |z| Ok(geo::geo_radius_by_member(z, member, parse_f64(radius)?, unit, geo_opts.order, geo_opts.count)))?
            .flatten()
            .unwrap_or_default();
        return Ok(geo_opts.render(matches));
    }

    Err(CoreError::Other(format!("unknown command '{}'", String::from_utf8_lossy(cmd))))
}

/// Parsed `WITHCOORD|WITHDIST|WITHHASH|COUNT|ASC|DESC` trailer shared by
/// `GEORADIUS` and `GEORADIUSBYMEMBER` (spec §6).
#[derive(Default)]
struct GeoRadiusOpts {
    with_coord: bool,
    with_dist: bool,
    with_hash: bool,
    count: Option<usize>,
    order: Option<geo::GeoOrder>,
}

impl GeoRadiusOpts {
    fn parse(opts: &[Vec<u8>]) -> CoreResult<Self> {
        let mut out = GeoRadiusOpts::default();
        let mut i = 0;
        while i < opts.len() {
            match opts[i].to_ascii_uppercase().as_slice() {
                b"WITHCOORD" => {
                    out.with_coord = true;
                    i += 1;
                }
                b"WITHDIST" => {
                    out.with_dist = true;
                    i += 1;
                }
                b"WITHHASH" => {
                    out.with_hash = true;
                    i += 1;
                }
                b"ASC" => {
                    out.order = Some(geo::GeoOrder::Asc);
                    i += 1;
                }
                b"DESC" => {
                    out.order = Some(geo::GeoOrder::Desc);
                    i += 1;
                }
                b"COUNT" => {
                    let n = opts.get(i + 1).ok_or(CoreError::Syntax)?;
                    out.count = Some(parse_u64(n)? as usize);
                    i += 2;
                }
                _ => return Err(CoreError::Syntax),
            }
        }
        Ok(out)
    }

    /// Plain member array when no `WITH*` flag was given; otherwise an
    /// array of per-match arrays in Redis's fixed `[member, dist?, hash?,
    /// coord?]` field order.
    fn render(&self, matches: Vec<geo::GeoMatch>) -> Reply {
        if !self.with_coord && !self.with_dist && !self.with_hash {
            return Reply::bulk_array(matches.into_iter().map(|m| m.member).collect());
        }
        Reply::array(
            matches
                .into_iter()
                .map(|m| {
                    let mut row = vec![Reply::bulk(m.member.clone())];
                    if self.with_dist {
                        row.push(Reply::bulk(corekv_store::fmt_float(m.distance).into_bytes()));
                    }
                    if self.with_hash {
                        row.push(Reply::integer(m.score as i64));
                    }
                    if self.with_coord {
                        let (lon, lat) = m.coords();
                        row.push(Reply::array(vec![
                            Reply::bulk(corekv_store::fmt_float(lon).into_bytes()),
                            Reply::bulk(corekv_store::fmt_float(lat).into_bytes()),
                        ]));
                    }
                    Reply::array(row)
                })
                .collect(),
        )
    }
}

fn cmd_name(cmd: &[u8]) -> &str {
    std::str::from_utf8(cmd).unwrap_or("?")
}

fn hash(key: &[u8]) -> u64 {
    corekv_common::hash64(key)
}

/// Destructures `args` into exactly `N` elements, or a `WrongArity`
/// error naming `cmd`.
fn require_n<'a, const N: usize>(args: &'a [Vec<u8>], cmd: &str) -> CoreResult<[&'a [u8]; N]> {
    if args.len() != N {
        return Err(CoreError::WrongArity(cmd.to_string()));
    }
    let mut out: [&[u8]; N] = [&[]; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_slice();
    }
    Ok(out)
}

fn get_string(shard: &mut Shard, key: &[u8], now: Instant) -> CoreResult<Reply> {
    match shard.get(key, hash(key), now) {
        Some(entry) => Ok(Reply::bulk(entry.value.as_bytes()?.as_bytes().to_vec())),
        None => Ok(Reply::NullBulk),
    }
}

fn cmd_set(shard: &mut Shard, args: &[Vec<u8>], now: Instant) -> CoreResult<Reply> {
    let [key, value, rest @ ..] = args else { return Err(CoreError::WrongArity("SET".into())) };
    let mut ttl = None;
    let mut nx = false;
    let mut xx = false;
    let mut i = 0;
    while i < rest.len() {
        if eq_ci(&rest[i], b"EX") {
            let seconds = rest.get(i + 1).ok_or(CoreError::Syntax)?;
            ttl = Some(Duration::from_secs(parse_u64(seconds)?));
            i += 2;
        } else if eq_ci(&rest[i], b"PX") {
            let millis = rest.get(i + 1).ok_or(CoreError::Syntax)?;
            ttl = Some(Duration::from_millis(parse_u64(millis)?));
            i += 2;
        } else if eq_ci(&rest[i], b"NX") {
            nx = true;
            i += 1;
        } else if eq_ci(&rest[i], b"XX") {
            xx = true;
            i += 1;
        } else {
            return Err(CoreError::Syntax);
        }
    }
    if nx && xx {
        return Err(CoreError::ConflictingFlags);
    }
    let exists = shard.exists(key, hash(key), now);
    if (nx && exists) || (xx && !exists) {
        return Ok(Reply::NullBulk);
    }
    shard.set(parse_key(key)?, Value::Bytes(ManagedBytes::new(value.clone())), ttl, now);
    Ok(Reply::ok())
}

fn set_expiry(shard: &mut Shard, key: &[u8], ttl: Duration, now: Instant) -> CoreResult<Reply> {
    match shard.expire_at(key, hash(key), now + ttl) {
        Ok(()) => Ok(Reply::integer(1)),
        Err(CoreError::NoSuchKey) => Ok(Reply::integer(0)),
        Err(e) => Err(e),
    }
}

fn ttl_reply(ttl: Option<Option<Duration>>, millis: bool) -> Reply {
    match ttl {
        None => Reply::integer(-2),
        Some(None) => Reply::integer(-1),
        Some(Some(d)) => Reply::integer(if millis { d.as_millis() as i64 } else { d.as_secs() as i64 }),
    }
}

fn with_string<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&ManagedBytes) -> CoreResult<T>) -> CoreResult<Option<T>> {
    match shard.get(key, hash(key), now) {
        Some(entry) => f(entry.value.as_bytes()?).map(Some),
        None => Ok(None),
    }
}

/// Runs `f` against the string at `key`, creating an empty one first if
/// absent, and never deletes afterward (strings stay, even if empty,
/// unlike the aggregate containers).
fn with_string_or_create<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&mut ManagedBytes) -> CoreResult<T>) -> CoreResult<T> {
    let existed = shard.exists(key, hash(key), now);
    if !existed {
        shard.set(parse_key(key)?, Value::Bytes(ManagedBytes::new(Vec::new())), None, now);
    }
    shard.get_mut(key, hash(key), now).unwrap().value.as_bytes_mut().and_then(f)
}

fn incr_by(shard: &mut Shard, key: &[u8], delta: i64, now: Instant) -> CoreResult<Reply> {
    let updated = with_string_or_create(shard, key, now, |buf| {
        let current: i64 = if buf.is_empty() {
            0
        } else {
            std::str::from_utf8(buf.as_bytes()).ok().and_then(|s| s.parse().ok()).ok_or(CoreError::NotAnInteger)?
        };
        let updated = current.checked_add(delta).ok_or_else(|| CoreError::Other("increment or decrement would overflow".into()))?;
        *buf = ManagedBytes::new(updated.to_string().into_bytes());
        Ok(updated)
    })?;
    Ok(Reply::integer(updated))
}

fn with_list<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&corekv_store::list::List) -> CoreResult<T>) -> CoreResult<Option<T>> {
    match shard.get(key, hash(key), now) {
        Some(entry) => f(entry.value.as_list()?).map(Some),
        None => Ok(None),
    }
}

fn with_list_mut<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&mut corekv_store::list::List) -> T) -> CoreResult<Option<T>> {
    shard
        .get_mut(key, hash(key), now)
        .map(|entry| entry.value.as_list_mut().map(|l| f(l)))
        .transpose()
}

fn list_push(shard: &mut Shard, args: &[Vec<u8>], now: Instant, head: bool, only_if_exists: bool) -> CoreResult<Reply> {
    let [key, values @ ..] = args else { return Err(CoreError::WrongArity("LPUSH".into())) };
    if values.is_empty() {
        return Err(CoreError::WrongArity("LPUSH".into()));
    }
    if only_if_exists && !shard.exists(key, hash(key), now) {
        return Ok(Reply::integer(0));
    }
    let len = shard.with_entry(key, hash(key), now, |entry| match entry {
        Some(e) => match e.value.as_list_mut() {
            Ok(list) => {
                let mut len = list.len();
                for v in values {
                    len = if head { list.push_head(v.clone()) } else { list.push_tail(v.clone()) };
                }
                (Ok(len), false)
            }
            Err(err) => (Err(err), false),
        },
        None => {
            let mut list = corekv_store::list::List::new();
            let mut len = 0;
            for v in values {
                len = if head { list.push_head(v.clone()) } else { list.push_tail(v.clone()) };
            }
            (Ok((len, list)), false)
        }
    });

    // `with_entry` can't insert a brand-new key itself (it only pins an
    // existing slot), so a fresh list is built above and installed here.
    match len {
        Ok(n) => Ok(Reply::integer(n as i64)),
        Err(CoreError::WrongType) => Err(CoreError::WrongType),
        Err(_) => {
            let mut list = corekv_store::list::List::new();
            for v in values {
                if head {
                    list.push_head(v.clone());
                } else {
                    list.push_tail(v.clone());
                }
            }
            let new_len = list.len();
            shard.set(parse_key(key)?, Value::List(list), None, now);
            Ok(Reply::integer(new_len as i64))
        }
    }
}

fn list_pop(shard: &mut Shard, args: &[Vec<u8>], now: Instant, head: bool) -> CoreResult<Reply> {
    let [key] = require_n(args, "LPOP")?;
    let popped = shard.with_entry(key, hash(key), now, |entry| match entry {
        Some(e) => match e.value.as_list_mut() {
            Ok(list) => {
                let value = if head { list.pop_head() } else { list.pop_tail() };
                let delete = list.is_empty();
                (Ok(value), delete)
            }
            Err(err) => (Err(err), false),
        },
        None => (Ok(None), false),
    })?;
    Ok(popped.map(Reply::bulk).unwrap_or(Reply::NullBulk))
}

fn with_map<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&corekv_store::map::Map) -> CoreResult<T>) -> CoreResult<Option<T>> {
    match shard.get(key, hash(key), now) {
        Some(entry) => f(entry.value.as_map()?).map(Some),
        None => Ok(None),
    }
}

fn with_map_mut<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&mut corekv_store::map::Map) -> T) -> CoreResult<Option<T>> {
    let exists = shard.exists(key, hash(key), now);
    if !exists {
        shard.set(parse_key(key)?, Value::Map(corekv_store::map::Map::new()), None, now);
    }
    shard
        .get_mut(key, hash(key), now)
        .map(|entry| entry.value.as_map_mut().map(|m| f(m)))
        .transpose()
}

fn hash_set(shard: &mut Shard, args: &[Vec<u8>], now: Instant, nx: bool) -> CoreResult<Reply> {
    let [key, rest @ ..] = args else { return Err(CoreError::WrongArity("HSET".into())) };
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CoreError::WrongArity("HSET".into()));
    }
    let mut created = 0;
    for pair in rest.chunks(2) {
        let (field, value) = (pair[0].clone(), pair[1].clone());
        let was_created = with_map_mut(shard, key, now, |m| {
            if nx {
                m.set_if_absent(field, MapValue::Bytes(value))
            } else {
                m.set(field, MapValue::Bytes(value))
            }
        })?
        .unwrap();
        if was_created {
            created += 1;
        }
    }
    Ok(Reply::integer(created))
}

fn with_set<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&Set) -> CoreResult<T>) -> CoreResult<Option<T>> {
    match shard.get(key, hash(key), now) {
        Some(entry) => f(entry.value.as_set()?).map(Some),
        None => Ok(None),
    }
}

fn with_set_mut<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&mut Set) -> T) -> CoreResult<Option<T>> {
    let exists = shard.exists(key, hash(key), now);
    if !exists {
        shard.set(parse_key(key)?, Value::Set(Set::new()), None, now);
    }
    shard.get_mut(key, hash(key), now).map(|entry| entry.value.as_set_mut().map(|s| f(s))).transpose()
}

/// `SMOVE src dest member`: atomically moves `member` from `src`'s set to
/// `dest`'s set. Deletes `src` if it becomes empty (the empty-collection
/// invariant, spec §3); creates `dest` if absent.
fn smove(shard: &mut Shard, src: &[u8], dest: &[u8], member: &[u8], now: Instant) -> CoreResult<Reply> {
    let removed = shard.with_entry(src, hash(src), now, |entry| match entry {
        Some(e) => match e.value.as_set_mut() {
            Ok(set) => {
                let removed = set.remove(member);
                (Ok(removed), removed && set.is_empty())
            }
            Err(err) => (Err(err), false),
        },
        None => (Ok(false), false),
    })?;
    if !removed {
        return Ok(Reply::integer(0));
    }
    with_set_mut(shard, dest, now, |s| s.add(member.to_vec()))?;
    Ok(Reply::integer(1))
}

fn set_algebra_reply(shard: &mut Shard, cmd: &[u8], args: &[Vec<u8>], now: Instant) -> CoreResult<Reply> {
    if args.is_empty() {
        return Err(CoreError::WrongArity(cmd_name(cmd).to_string()));
    }
    let sets = load_sets(shard, args, now)?;
    let result = combine_sets(cmd, &sets);
    Ok(Reply::bulk_array(result))
}

fn set_algebra_store(shard: &mut Shard, cmd: &[u8], args: &[Vec<u8>], now: Instant) -> CoreResult<Reply> {
    let [dest, sources @ ..] = args else { return Err(CoreError::WrongArity(cmd_name(cmd).to_string())) };
    if sources.is_empty() {
        return Err(CoreError::WrongArity(cmd_name(cmd).to_string()));
    }
    let sets = load_sets(shard, sources, now)?;
    let base_cmd = if eq_ci(cmd, b"SDIFFSTORE") {
        &b"SDIFF"[..]
    } else if eq_ci(cmd, b"SINTERSTORE") {
        &b"SINTER"[..]
    } else {
        &b"SUNION"[..]
    };
    let result = combine_sets(base_cmd, &sets);
    let count = result.len();
    if count == 0 {
        shard.del(dest, hash(dest));
    } else {
        let mut set = Set::new();
        set.add_many(result);
        shard.set(parse_key(dest)?, Value::Set(set), None, now);
    }
    Ok(Reply::integer(count as i64))
}

fn load_sets(shard: &mut Shard, keys: &[Vec<u8>], now: Instant) -> CoreResult<Vec<Set>> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        let mut set = Set::new();
        if let Some(members) = with_set(shard, key, now, |s| Ok(s.iter().cloned().collect::<Vec<_>>()))? {
            set.add_many(members);
        }
        sets.push(set);
    }
    Ok(sets)
}

fn combine_sets(cmd: &[u8], sets: &[Set]) -> Vec<Vec<u8>> {
    let Some((first, rest)) = sets.split_first() else { return Vec::new() };
    let mut acc: Vec<Vec<u8>> = first.iter().cloned().collect();
    for other in rest {
        let acc_set = {
            let mut s = Set::new();
            s.add_many(acc.clone());
            s
        };
        acc = if eq_ci(cmd, b"SDIFF") {
            acc_set.difference(other)
        } else if eq_ci(cmd, b"SINTER") {
            acc_set.intersection(other)
        } else {
            acc_set.union(other)
        };
    }
    acc
}

fn with_zset<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&corekv_store::zset::ZSet) -> CoreResult<T>) -> CoreResult<Option<T>> {
    match shard.get(key, hash(key), now) {
        Some(entry) => f(entry.value.as_zset()?).map(Some),
        None => Ok(None),
    }
}

fn with_zset_mut<T>(shard: &mut Shard, key: &[u8], now: Instant, f: impl FnOnce(&mut corekv_store::zset::ZSet) -> CoreResult<T>) -> CoreResult<Option<CoreResult<T>>> {
    let exists = shard.exists(key, hash(key), now);
    if !exists {
        shard.set(parse_key(key)?, Value::ZSet(corekv_store::zset::ZSet::new()), None, now);
    }
    Ok(shard.get_mut(key, hash(key), now).map(|entry| entry.value.as_zset_mut().map_err(CoreError::from)).map(|r| r.and_then(|z| f(z))))
}

/// Parses the optional trailing `WITHSCORES` flag shared by `ZRANGE`,
/// `ZREVRANGE`, `ZRANGEBYSCORE` and `ZREVRANGEBYSCORE`.
fn parse_withscores(cmd: &str, rest: &[Vec<u8>]) -> CoreResult<bool> {
    match rest {
        [] => Ok(false),
        [flag] if flag.eq_ignore_ascii_case(b"WITHSCORES") => Ok(true),
        _ => Err(CoreError::WrongArity(cmd.into())),
    }
}

/// Renders a list of sorted-set members as a flat bulk array, or as a
/// flat `member, score, member, score, ...` array when `WITHSCORES` was
/// requested.
fn render_zmembers(members: Vec<corekv_store::zset::ZMember>, with_scores: bool) -> Reply {
    if with_scores {
        let mut items = Vec::with_capacity(members.len() * 2);
        for m in members {
            items.push(Reply::bulk(m.member));
            items.push(Reply::bulk(corekv_store::fmt_float(m.score).into_bytes()));
        }
        Reply::array(items)
    } else {
        Reply::bulk_array(members.into_iter().map(|m| m.member).collect())
    }
}

fn zadd<R: Rng>(shard: &mut Shard, args: &[Vec<u8>], now: Instant, rng: &mut R) -> CoreResult<Reply> {
    let [key, rest @ ..] = args else { return Err(CoreError::WrongArity("ZADD".into())) };
    let mut flags = ZAddFlags::default();
    let mut i = 0;
    while i < rest.len() {
        match rest[i].to_ascii_uppercase().as_slice() {
            b"NX" => {
                flags.nx = true;
                i += 1;
            }
            b"XX" => {
                flags.xx = true;
                i += 1;
            }
            b"CH" => {
                flags.ch = true;
                i += 1;
            }
            b"INCR" => {
                flags.incr = true;
                i += 1;
            }
            _ => break,
        }
    }
    let pairs = &rest[i..];
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(CoreError::WrongArity("ZADD".into()));
    }

    let mut added = 0i64;
    let mut changed = 0i64;
    let mut last_score = 0.0;
    for pair in pairs.chunks(2) {
        let score = parse_f64(&pair[0])?;
        let member = pair[1].clone();
        let outcome = with_zset_mut(shard, key, now, |z| z.zadd(rng, member.clone(), score, flags))?.unwrap()?;
        if outcome.added {
            added += 1;
        }
        if outcome.changed {
            changed += 1;
        }
        last_score = outcome.score;
    }

    if flags.incr {
        return Ok(Reply::bulk(corekv_store::fmt_float(last_score).into_bytes()));
    }
    Ok(Reply::integer(if flags.ch { changed } else { added }))
}

#[derive(Clone, Copy)]
enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// Shared body for `ZUNIONSTORE`/`ZINTERSTORE`: both read every source
/// key's members with weights applied, combine scores per `AGGREGATE`,
/// and overwrite `dest` with the result (sources that don't exist
/// contribute no members, same as a missing key ZSET-side elsewhere).
fn zset_store<R: Rng>(shard: &mut Shard, cmd: &[u8], args: &[Vec<u8>], now: Instant, rng: &mut R) -> CoreResult<Reply> {
    let is_union = eq_ci(cmd, b"ZUNIONSTORE");
    let [dest, numkeys_arg, rest @ ..] = args else { return Err(CoreError::WrongArity(cmd_name(cmd).to_string())) };
    let numkeys = parse_u64(numkeys_arg)? as usize;
    if numkeys == 0 || rest.len() < numkeys {
        return Err(CoreError::WrongArity(cmd_name(cmd).to_string()));
    }
    let keys = &rest[..numkeys];
    let mut tail = &rest[numkeys..];
    let mut weights = vec![1.0f64; numkeys];
    let mut aggregate = Aggregate::Sum;
    while !tail.is_empty() {
        if eq_ci(&tail[0], b"WEIGHTS") {
            if tail.len() < 1 + numkeys {
                return Err(CoreError::Syntax);
            }
            for i in 0..numkeys {
                weights[i] = parse_f64(&tail[1 + i])?;
            }
            tail = &tail[1 + numkeys..];
        } else if eq_ci(&tail[0], b"AGGREGATE") {
            let name = tail.get(1).ok_or(CoreError::Syntax)?;
            aggregate = match name.to_ascii_uppercase().as_slice() {
                b"SUM" => Aggregate::Sum,
                b"MIN" => Aggregate::Min,
                b"MAX" => Aggregate::Max,
                _ => return Err(CoreError::Syntax),
            };
            tail = &tail[2..];
        } else {
            return Err(CoreError::Syntax);
        }
    }

    let mut sources: Vec<HashMap<Vec<u8>, f64>> = Vec::with_capacity(numkeys);
    for key in keys {
        let members = with_zset(shard, key, now, |z| Ok(z.range_by_rank(0, -1, false)))?.unwrap_or_default();
        sources.push(members.into_iter().map(|m| (m.member, m.score)).collect());
    }

    let mut acc: HashMap<Vec<u8>, f64> = HashMap::new();
    if is_union {
        for (idx, source) in sources.iter().enumerate() {
            for (member, score) in source {
                let weighted = score * weights[idx];
                acc.entry(member.clone()).and_modify(|existing| *existing = aggregate.combine(*existing, weighted)).or_insert(weighted);
            }
        }
    } else if let Some((first, rest)) = sources.split_first() {
        'member: for (member, score) in first {
            let mut value = score * weights[0];
            for (idx, source) in rest.iter().enumerate() {
                match source.get(member) {
                    Some(other) => value = aggregate.combine(value, other * weights[idx + 1]),
                    None => continue 'member,
                }
            }
            acc.insert(member.clone(), value);
        }
    }

    let count = acc.len();
    if count == 0 {
        shard.del(dest, hash(dest));
    } else {
        let mut zset = corekv_store::zset::ZSet::new();
        for (member, score) in acc {
            zset.zadd(rng, member, score, ZAddFlags::default())?;
        }
        shard.set(parse_key(dest)?, Value::ZSet(zset), None, now);
    }
    Ok(Reply::integer(count as i64))
}

/// `COMMAND` and `COMMAND COUNT` are the only subcommands this server
/// answers; `COMMAND` with any other subcommand returns an empty array
/// rather than erroring, matching how clients probe for optional
/// introspection support.
fn command_reply(args: &[Vec<u8>]) -> Reply {
    match args.first() {
        Some(sub) if eq_ci(sub, b"COUNT") => Reply::integer(KNOWN_COMMANDS.len() as i64),
        Some(sub) if eq_ci(sub, b"DOCS") => Reply::array(Vec::new()),
        None => Reply::array(KNOWN_COMMANDS.iter().map(|name| Reply::bulk_array(vec![name.as_bytes().to_vec()])).collect()),
        _ => Reply::array(Vec::new()),
    }
}

/// `INFO`: a minimal Redis-style `section:key:value` bulk string, enough
/// for a client to confirm it's talking to a live shard and see its
/// live key count. Only the `keyspace` section is populated; the core
/// has no replication/persistence state to report (spec §1 Non-goals).
fn info_reply(shard: &Shard) -> Vec<u8> {
    format!("# Keyspace\r\ndb{}:keys={}\r\n", shard.id, shard.dbsize()).into_bytes()
}

const KNOWN_COMMANDS: &[&str] = &[
    "ping", "echo", "command", "type", "get", "set", "setnx", "setex", "psetex", "getset", "append", "strlen", "getrange", "setrange",
    "incr", "decr", "incrby", "decrby", "incrbyfloat", "mget", "mset", "msetnx", "del", "exists", "expire", "pexpire", "persist", "ttl",
    "pttl", "rename", "renamenx", "dbsize", "info", "flushdb", "flushall", "randomkey", "keys", "lpush", "rpush", "lpushx", "rpushx", "lpop", "rpop", "llen", "lrange",
    "lindex", "lset", "linsert", "lrem", "ltrim", "hset", "hsetnx", "hmset", "hget", "hmget", "hdel", "hlen", "hexists", "hkeys", "hvals",
    "hgetall", "hincrby", "hincrbyfloat", "sadd", "srem", "scard", "sismember", "smembers", "srandmember", "spop", "smove", "sdiff", "sinter", "sunion",
    "sdiffstore", "sinterstore", "sunionstore", "zadd", "zincrby", "zrem", "zcard", "zscore", "zrank", "zrevrank", "zrange", "zrevrange",
    "zrangebyscore", "zrevrangebyscore", "zcount", "zremrangebyrank", "zremrangebyscore", "zunionstore", "zinterstore", "setbit", "getbit",
    "bitcount", "bitpos", "bitop", "geoadd", "geopos", "geodist", "geohash", "georadius", "georadiusbymember",
];

fn parse_score_bound(arg: &[u8]) -> CoreResult<ScoreBound> {
    if arg.first() == Some(&b'(') {
        Ok(ScoreBound::exclusive(parse_f64(&arg[1..])?))
    } else if arg == b"-inf" {
        Ok(ScoreBound::inclusive(f64::NEG_INFINITY))
    } else if arg == b"+inf" {
        Ok(ScoreBound::inclusive(f64::INFINITY))
    } else {
        Ok(ScoreBound::inclusive(parse_f64(arg)?))
    }
}

fn parse_unit(args: &[&[u8]]) -> CoreResult<GeoUnit> {
    match args.first() {
        Some(name) => GeoUnit::from_name(std::str::from_utf8(name).unwrap_or("")).ok_or(CoreError::Syntax),
        None => Ok(GeoUnit::Meters),
    }
}

fn parse_optional_range(args: &[Vec<u8>]) -> CoreResult<(Option<i64>, Option<i64>)> {
    match args.len() {
        0 => Ok((None, None)),
        2 => Ok((Some(parse_i64(&args[0])?), Some(parse_i64(&args[1])?))),
        _ => Err(CoreError::Syntax),
    }
}

fn bitop(shard: &mut Shard, args: &[Vec<u8>], now: Instant) -> CoreResult<Reply> {
    let [op_name, dest, sources @ ..] = args else { return Err(CoreError::WrongArity("BITOP".into())) };
    let op = match op_name.to_ascii_uppercase().as_slice() {
        b"AND" => BitOp::And,
        b"OR" => BitOp::Or,
        b"XOR" => BitOp::Xor,
        b"NOT" => BitOp::Not,
        _ => return Err(CoreError::Syntax),
    };
    if sources.is_empty() || (op == BitOp::Not && sources.len() != 1) {
        return Err(CoreError::WrongArity("BITOP".into()));
    }

    let mut buffers = Vec::with_capacity(sources.len());
    for key in sources {
        let buf = with_string(shard, key, now, |b| Ok(b.clone()))?.unwrap_or_default();
        buffers.push(buf);
    }
    let refs: Vec<&ManagedBytes> = buffers.iter().collect();
    let result = bitmap::bit_op(op, &refs);
    let len = result.len();
    shard.set(parse_key(dest)?, Value::Bytes(ManagedBytes::new(result)), None, now);
    Ok(Reply::integer(len as i64))
}
