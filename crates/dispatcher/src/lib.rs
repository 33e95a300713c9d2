//! Argument-array to operation mapping (spec §4.5): given one complete
//! command (already assembled by the wire codec into `Vec<Bytes>`),
//! mutate the store and produce the reply bytes to queue on the
//! connection's output buffer.

mod error;
mod server_info;

pub use error::DispatchError;
pub use server_info::{Role, ServerInfo};

use bytes::Bytes;
use kvstore::{Store, Value};

/// Side effects the event loop must carry out beyond queuing `reply`.
#[derive(Debug)]
pub enum SpecialAction {
    /// `PSYNC` succeeded: the connection must transition to the replica
    /// role and stream `snapshot` framed as `$<n>\r\n<bytes>` (no
    /// trailing CRLF) immediately after `reply`.
    BeginFullResync { snapshot: Vec<u8> },
}

/// Result of dispatching one command.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Bytes to append to the connection's output buffer. Empty means no
    /// reply is sent (e.g. `REPLCONF ACK` received by a master).
    pub reply: Vec<u8>,
    /// Whether this command must be propagated, in its original wire
    /// form, to attached replicas (REDESIGN FLAGS: SET, INCR, DECR, DEL,
    /// LPUSH, RPUSH).
    pub propagate: bool,
    pub special: Option<SpecialAction>,
}

impl Outcome {
    fn reply_only(reply: Vec<u8>) -> Self {
        Self { reply, propagate: false, special: None }
    }

    fn write(reply: Vec<u8>) -> Self {
        Self { reply, propagate: true, special: None }
    }
}

/// Dispatches one already-parsed command. When `outcome.propagate` is
/// set, the caller is expected to forward the exact raw bytes it read
/// for this command (not `outcome.reply`) to every attached replica —
/// the dispatcher only decides *whether* to propagate, since the event
/// loop is what already holds the original wire bytes in its input
/// ring buffer.
pub fn dispatch(store: &mut Store, info: &mut ServerInfo, args: &[Bytes]) -> Outcome {
    match execute(store, info, args) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "command failed");
            Outcome::reply_only(resp::error(&e.reply_message()))
        }
    }
}

fn execute(store: &mut Store, info: &mut ServerInfo, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    let Some(cmd) = args.first() else {
        return Err(DispatchError::UnknownCommand(String::new()));
    };
    let name = String::from_utf8_lossy(cmd).to_ascii_uppercase();

    match name.as_str() {
        "PING" => cmd_ping(args),
        "ECHO" => cmd_echo(args),
        "SET" => cmd_set(store, args),
        "GET" => cmd_get(store, args),
        "EXIST" | "EXISTS" => cmd_exist(store, args),
        "DEL" => cmd_del(store, args),
        "INCR" => cmd_incr_decr(store, args, 1),
        "DECR" => cmd_incr_decr(store, args, -1),
        "LPUSH" => cmd_push(store, args, true),
        "RPUSH" => cmd_push(store, args, false),
        "LRANGE" => cmd_lrange(store, args),
        "CONFIG" => cmd_config(info, args),
        "SAVE" => cmd_save(store, info, args),
        "DBSIZE" => cmd_dbsize(store, args),
        "INFO" => cmd_info(info, args),
        "REPLCONF" => cmd_replconf(args),
        "PSYNC" => cmd_psync(store, info, args),
        _ => Err(DispatchError::UnknownCommand(name)),
    }
}

fn arity_exact(args: &[Bytes], n: usize, cmd: &str) -> Result<(), DispatchError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(DispatchError::Arity(cmd.to_string()))
    }
}

fn arity_at_least(args: &[Bytes], n: usize, cmd: &str) -> Result<(), DispatchError> {
    if args.len() >= n {
        Ok(())
    } else {
        Err(DispatchError::Arity(cmd.to_string()))
    }
}

fn parse_i64(b: &Bytes) -> Result<i64, DispatchError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(DispatchError::ValueRange)
}

fn cmd_ping(args: &[Bytes]) -> Result<Outcome, DispatchError> {
    match args.len() {
        1 => Ok(Outcome::reply_only(resp::simple_string("PONG"))),
        2 => Ok(Outcome::reply_only(resp::simple_string(&String::from_utf8_lossy(&args[1])))),
        _ => Err(DispatchError::Arity("ping".into())),
    }
}

fn cmd_echo(args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_exact(args, 2, "echo")?;
    Ok(Outcome::reply_only(resp::simple_string(&String::from_utf8_lossy(&args[1]))))
}

enum ExpireOption {
    Ex(u64),
    Px(u64),
    ExAt(u64),
    PxAt(u64),
}

fn cmd_set(store: &mut Store, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_at_least(args, 3, "set")?;
    let key = &args[1];
    let value = args[2].clone();

    let mut nx = false;
    let mut xx = false;
    let mut get = false;
    let mut keepttl = false;
    let mut expire: Option<ExpireOption> = None;

    let mut i = 3;
    while i < args.len() {
        let opt = String::from_utf8_lossy(&args[i]).to_ascii_uppercase();
        match opt.as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "GET" => get = true,
            "KEEPTTL" => keepttl = true,
            "EX" | "PX" | "EXAT" | "PXAT" => {
                i += 1;
                let n = args.get(i).ok_or(DispatchError::Syntax)?;
                let n = parse_i64(n)?;
                if expire.is_some() {
                    return Err(DispatchError::Syntax);
                }
                if n <= 0 {
                    return Err(DispatchError::NonNegativeExpiration);
                }
                expire = Some(match opt.as_str() {
                    "EX" => ExpireOption::Ex(n as u64),
                    "PX" => ExpireOption::Px(n as u64),
                    "EXAT" => ExpireOption::ExAt(n as u64),
                    _ => ExpireOption::PxAt(n as u64),
                });
            }
            _ => return Err(DispatchError::Syntax),
        }
        i += 1;
    }
    if nx && xx {
        return Err(DispatchError::Syntax);
    }
    if keepttl && expire.is_some() {
        return Err(DispatchError::Syntax);
    }

    let old = if get {
        Some(store.get_string(key).map_err(DispatchError::from)?)
    } else {
        None
    };

    let is_live = store.exists(key) && store.peek_expires_at_ms(key).map_or(true, |ms| {
        ms == 0 || ms > kvstore::now_ms()
    });
    let condition_failed = (nx && is_live) || (xx && !is_live);

    if condition_failed {
        let reply = match old {
            Some(v) => resp::bulk_string(v.as_deref()),
            None => resp::bulk_string(None),
        };
        return Ok(Outcome::reply_only(reply));
    }

    let expires_at_ms = if keepttl {
        store.peek_expires_at_ms(key).unwrap_or(0)
    } else {
        match expire {
            None => 0,
            Some(ExpireOption::Ex(secs)) => kvstore::now_ms() + secs * 1000,
            Some(ExpireOption::Px(ms)) => kvstore::now_ms() + ms,
            Some(ExpireOption::ExAt(secs)) => secs * 1000,
            Some(ExpireOption::PxAt(ms)) => ms,
        }
    };

    store.set(key.clone(), Value::Str(value), expires_at_ms);

    let reply = if get {
        resp::bulk_string(old.flatten().as_deref())
    } else {
        resp::simple_string("OK")
    };
    Ok(Outcome::write(reply))
}

fn cmd_get(store: &mut Store, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_exact(args, 2, "get")?;
    let value = store.get_string(&args[1]).map_err(DispatchError::from)?;
    Ok(Outcome::reply_only(resp::bulk_string(value.as_deref())))
}

fn cmd_exist(store: &mut Store, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_at_least(args, 2, "exist")?;
    let count = args[1..].iter().filter(|k| store.exists(k)).count();
    Ok(Outcome::reply_only(resp::integer(count as i64)))
}

fn cmd_del(store: &mut Store, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_at_least(args, 2, "del")?;
    let count = args[1..].iter().filter(|k| store.delete(k)).count();
    Ok(Outcome::write(resp::integer(count as i64)))
}

fn cmd_incr_decr(store: &mut Store, args: &[Bytes], delta: i64) -> Result<Outcome, DispatchError> {
    arity_exact(args, 2, if delta > 0 { "incr" } else { "decr" })?;
    let value = store.incrby(&args[1], delta).map_err(DispatchError::from)?;
    Ok(Outcome::write(resp::integer(value)))
}

fn cmd_push(store: &mut Store, args: &[Bytes], front: bool) -> Result<Outcome, DispatchError> {
    arity_at_least(args, 3, if front { "lpush" } else { "rpush" })?;
    let items = args[2..].iter().cloned();
    let len = if front {
        store.lpush(&args[1], items)
    } else {
        store.rpush(&args[1], items)
    }
    .map_err(DispatchError::from)?;
    Ok(Outcome::write(resp::integer(len as i64)))
}

fn cmd_lrange(store: &mut Store, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_exact(args, 4, "lrange")?;
    let start = parse_i64(&args[2])?;
    let end = parse_i64(&args[3])?;
    let items = store.lrange(&args[1], start, end).map_err(DispatchError::from)?;
    let refs: Vec<Option<&[u8]>> = items.iter().map(|b| Some(b.as_ref())).collect();
    Ok(Outcome::reply_only(resp::bulk_string_array(&refs)))
}

fn cmd_config(info: &ServerInfo, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_at_least(args, 3, "config")?;
    let sub = String::from_utf8_lossy(&args[1]).to_ascii_uppercase();
    if sub != "GET" {
        return Err(DispatchError::Syntax);
    }
    let known: [(&str, String); 2] = [
        ("dir", info.dir.display().to_string()),
        ("dbfilename", info.dbfilename.clone()),
    ];
    let mut matched: Vec<&(&str, String)> = Vec::new();
    for pattern in &args[2..] {
        let pattern = String::from_utf8_lossy(pattern).to_ascii_lowercase();
        for entry in &known {
            let already_matched = matched.iter().any(|(k, _)| *k == entry.0);
            if !already_matched && (pattern == "*" || pattern == entry.0) {
                matched.push(entry);
            }
        }
    }
    let mut pairs: Vec<Option<&[u8]>> = Vec::new();
    for (key, value) in &matched {
        pairs.push(Some(key.as_bytes()));
        pairs.push(Some(value.as_bytes()));
    }
    Ok(Outcome::reply_only(resp::bulk_string_array(&pairs)))
}

fn cmd_save(store: &Store, info: &ServerInfo, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_exact(args, 1, "save")?;
    match rdb::save(store, &info.dir, &info.dbfilename) {
        Ok(()) => Ok(Outcome::reply_only(resp::simple_string("OK"))),
        Err(e) => Ok(Outcome::reply_only(resp::error(&format!("ERR {e}")))),
    }
}

fn cmd_dbsize(store: &Store, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_exact(args, 1, "dbsize")?;
    Ok(Outcome::reply_only(resp::integer(store.dbsize() as i64)))
}

fn cmd_info(info: &ServerInfo, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    if args.len() > 2 {
        return Err(DispatchError::Arity("info".into()));
    }
    Ok(Outcome::reply_only(resp::bulk_string(Some(
        info.replication_info().as_bytes(),
    ))))
}

fn cmd_replconf(args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_at_least(args, 2, "replconf")?;
    let sub = String::from_utf8_lossy(&args[1]).to_ascii_uppercase();
    match sub.as_str() {
        "ACK" => Ok(Outcome::reply_only(Vec::new())),
        _ => Ok(Outcome::reply_only(resp::simple_string("OK"))),
    }
}

fn cmd_psync(store: &Store, info: &ServerInfo, args: &[Bytes]) -> Result<Outcome, DispatchError> {
    arity_exact(args, 3, "psync")?;
    let header = resp::simple_string(&format!(
        "FULLRESYNC {} {}",
        info.master_replid, info.master_repl_offset
    ));
    let snapshot = rdb::encode_for_transfer(store);
    Ok(Outcome {
        reply: header,
        propagate: false,
        special: Some(SpecialAction::BeginFullResync { snapshot }),
    })
}

/// The absolute snapshot file path `<dir>/<dbfilename>`, used by the
/// server at startup to load the existing file before the event loop
/// begins.
pub fn snapshot_path(info: &ServerInfo) -> std::path::PathBuf {
    info.dir.join(&info.dbfilename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn args(words: &[&str]) -> Vec<Bytes> {
        words.iter().map(|w| b(w)).collect()
    }

    fn info() -> ServerInfo {
        ServerInfo::new_master(PathBuf::from("/tmp/redis-mini-test"), "dump.rdb".into(), 6379)
    }

    #[test]
    fn ping_without_argument_replies_pong() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["PING"]));
        assert_eq!(out.reply, b"+PONG\r\n");
        assert!(!out.propagate);
    }

    #[test]
    fn echo_replies_the_argument_as_a_simple_string() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["ECHO", "hello"]));
        assert_eq!(out.reply, b"+hello\r\n");
    }

    #[test]
    fn unknown_command_is_an_error_reply_not_a_panic() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["FROBNICATE"]));
        assert!(out.reply.starts_with(b"-ERR unknown command"));
    }

    #[test]
    fn wrong_arity_is_an_error_reply() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["GET"]));
        assert!(out.reply.starts_with(b"-ERR wrong number of arguments"));
    }

    // scenario: SET NX on an already-existing key leaves it untouched.
    #[test]
    fn set_nx_on_existing_key_is_a_no_op() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["SET", "k", "first"]));
        let out = dispatch(&mut store, &mut info, &args(&["SET", "k", "second", "NX"]));
        assert_eq!(out.reply, b"$-1\r\n");
        assert!(!out.propagate);
        assert_eq!(store.get_string(b"k").unwrap(), Some(b("first")));
    }

    // scenario: SET EX then the key expires.
    #[test]
    fn set_ex_expires_after_the_given_seconds() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["SET", "k", "v", "PX", "1"]));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.get_string(b"k").unwrap(), None);
    }

    #[test]
    fn set_xx_on_an_absent_key_is_a_no_op() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["SET", "k", "v", "XX"]));
        assert_eq!(out.reply, b"$-1\r\n");
        assert_eq!(store.dbsize(), 0);
    }

    #[test]
    fn set_keepttl_preserves_the_existing_expiration() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["SET", "k", "v1", "EX", "1000"]));
        let before = store.peek_expires_at_ms(b"k").unwrap();
        dispatch(&mut store, &mut info, &args(&["SET", "k", "v2", "KEEPTTL"]));
        assert_eq!(store.peek_expires_at_ms(b"k").unwrap(), before);
    }

    #[test]
    fn set_nx_and_xx_together_is_a_syntax_error() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["SET", "k", "v", "NX", "XX"]));
        assert!(out.reply.starts_with(b"-ERR syntax error"));
    }

    #[test]
    fn set_get_against_a_list_key_replies_wrongtype() {
        let mut store = Store::new();
        let mut info = info();
        store.rpush(b"L", [b("x")]).unwrap();
        let out = dispatch(&mut store, &mut info, &args(&["SET", "L", "v", "GET"]));
        assert!(out.reply.starts_with(b"-WRONGTYPE"));
    }

    // scenario: LPUSH/RPUSH then LRANGE with negative indices.
    #[test]
    fn lpush_rpush_and_lrange_with_negative_indices() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["RPUSH", "L", "a", "b", "c"]));
        let out = dispatch(&mut store, &mut info, &args(&["LRANGE", "L", "-2", "-1"]));
        assert_eq!(out.reply, b"*2\r\n$1\r\nb\r\n$1\r\nc\r\n");
    }

    // scenario: GET against a list key is a wrong-type error.
    #[test]
    fn get_against_a_list_key_is_wrongtype() {
        let mut store = Store::new();
        let mut info = info();
        store.rpush(b"L", [b("x")]).unwrap();
        let out = dispatch(&mut store, &mut info, &args(&["GET", "L"]));
        assert!(out.reply.starts_with(b"-WRONGTYPE"));
    }

    #[test]
    fn incr_and_decr_on_an_absent_key_start_at_zero() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["INCR", "c"]));
        assert_eq!(out.reply, b":1\r\n");
        assert!(out.propagate);
        let out = dispatch(&mut store, &mut info, &args(&["DECR", "c"]));
        assert_eq!(out.reply, b":0\r\n");
    }

    #[test]
    fn del_counts_keys_actually_removed() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["SET", "a", "1"]));
        let out = dispatch(&mut store, &mut info, &args(&["DEL", "a", "missing"]));
        assert_eq!(out.reply, b":1\r\n");
    }

    #[test]
    fn exist_counts_across_multiple_keys_including_duplicates() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["SET", "a", "1"]));
        let out = dispatch(&mut store, &mut info, &args(&["EXIST", "a", "a", "missing"]));
        assert_eq!(out.reply, b":2\r\n");
    }

    #[test]
    fn config_get_star_returns_dir_and_dbfilename() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["CONFIG", "GET", "*"]));
        let text = String::from_utf8_lossy(&out.reply);
        assert!(text.contains("dir"));
        assert!(text.contains("dbfilename"));
    }

    #[test]
    fn dbsize_reflects_live_keys() {
        let mut store = Store::new();
        let mut info = info();
        dispatch(&mut store, &mut info, &args(&["SET", "a", "1"]));
        let out = dispatch(&mut store, &mut info, &args(&["DBSIZE"]));
        assert_eq!(out.reply, b":1\r\n");
    }

    #[test]
    fn info_replication_section_starts_the_offset_at_zero() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["INFO", "replication"]));
        let text = String::from_utf8_lossy(&out.reply);
        assert!(text.contains("master_repl_offset:0"));
    }

    #[test]
    fn replconf_ack_from_a_replica_produces_no_reply() {
        let mut store = Store::new();
        let mut info = info();
        let out = dispatch(&mut store, &mut info, &args(&["REPLCONF", "ACK", "0"]));
        assert!(out.reply.is_empty());
    }

    // scenario: a replica handshake's PSYNC gets FULLRESYNC plus a
    // snapshot transfer instruction.
    #[test]
    fn psync_replies_fullresync_and_requests_a_snapshot_transfer() {
        let mut store = Store::new();
        let mut info = info();
        store.set(b("k"), Value::Str(b("v")), 0);
        let out = dispatch(&mut store, &mut info, &args(&["PSYNC", "?", "-1"]));
        assert!(out.reply.starts_with(b"+FULLRESYNC"));
        assert!(matches!(out.special, Some(SpecialAction::BeginFullResync { .. })));
    }

    #[test]
    fn writes_that_mutate_the_store_are_flagged_for_propagation() {
        let mut store = Store::new();
        let mut info = info();
        for cmd in [vec!["SET", "k", "v"], vec!["INCR", "n"], vec!["DEL", "k"]] {
            let out = dispatch(&mut store, &mut info, &args(&cmd));
            assert!(out.propagate, "{cmd:?} should propagate");
        }
        let out = dispatch(&mut store, &mut info, &args(&["GET", "n"]));
        assert!(!out.propagate);
    }
}
