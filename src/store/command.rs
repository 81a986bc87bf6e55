//! Commands understood by the counter store and their replies.
//!
//! The command set is the subset of the Redis dialect the engagement
//! scripts rely on. Commands arrive either from Rust (`Store::execute`) or
//! from Lua through `redis.call`; both go through [`Command::parse`].

use crate::error::{Error, Result};
use std::fmt;

/// A parsed store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// GET key
    Get(String),
    /// SET key value
    Set(String, String),
    /// DEL key [key ...]
    Del(Vec<String>),
    /// EXISTS key [key ...]
    Exists(Vec<String>),
    /// EXPIRE key seconds
    Expire(String, i64),
    /// TTL key
    Ttl(String),
    /// HGET key field
    HGet(String, String),
    /// HSET key field value [field value ...]
    HSet(String, Vec<(String, String)>),
    /// HSETNX key field value
    HSetNx(String, String, String),
    /// HINCRBY key field delta
    HIncrBy(String, String, i64),
    /// HDEL key field [field ...]
    HDel(String, Vec<String>),
    /// HGETALL key
    HGetAll(String),
    /// HEXISTS key field
    HExists(String, String),
    /// ZADD key [NX] score member [score member ...]
    ZAdd {
        /// Target key
        key: String,
        /// Only add new members, never update
        nx: bool,
        /// (score, member) pairs
        members: Vec<(i64, String)>,
    },
    /// ZINCRBY key delta member
    ZIncrBy(String, i64, String),
    /// ZREM key member [member ...]
    ZRem(String, Vec<String>),
    /// ZSCORE key member
    ZScore(String, String),
    /// ZCARD key
    ZCard(String),
    /// ZREVRANGE key start stop [WITHSCORES]
    ZRevRange {
        /// Target key
        key: String,
        /// First rank
        start: isize,
        /// Last rank (inclusive)
        stop: isize,
        /// Interleave scores in the reply
        with_scores: bool,
    },
    /// SADD key member [member ...]
    SAdd(String, Vec<String>),
    /// SREM key member [member ...]
    SRem(String, Vec<String>),
    /// SISMEMBER key member
    SIsMember(String, String),
    /// SCARD key
    SCard(String),
}

impl Command {
    /// Parses a command from its name and arguments.
    pub fn parse<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        let (name, rest) = match argv.split_first() {
            Some((name, rest)) => (name.as_ref().to_ascii_uppercase(), rest),
            None => return Err(Error::invalid_argument("empty command")),
        };
        let args: Vec<&str> = rest.iter().map(AsRef::as_ref).collect();
        let arity = |ok: bool| -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(Error::invalid_argument(format!(
                    "wrong number of arguments for '{}' command",
                    name.to_ascii_lowercase()
                )))
            }
        };
        let owned = |s: &str| s.to_string();

        let cmd = match name.as_str() {
            "GET" => {
                arity(args.len() == 1)?;
                Command::Get(owned(args[0]))
            }
            "SET" => {
                arity(args.len() == 2)?;
                Command::Set(owned(args[0]), owned(args[1]))
            }
            "DEL" => {
                arity(!args.is_empty())?;
                Command::Del(args.iter().map(|s| s.to_string()).collect())
            }
            "EXISTS" => {
                arity(!args.is_empty())?;
                Command::Exists(args.iter().map(|s| s.to_string()).collect())
            }
            "EXPIRE" => {
                arity(args.len() == 2)?;
                Command::Expire(owned(args[0]), parse_int(args[1])?)
            }
            "TTL" => {
                arity(args.len() == 1)?;
                Command::Ttl(owned(args[0]))
            }
            "HGET" => {
                arity(args.len() == 2)?;
                Command::HGet(owned(args[0]), owned(args[1]))
            }
            "HSET" => {
                arity(args.len() >= 3 && args.len() % 2 == 1)?;
                let pairs = args[1..].chunks(2).map(|p| (owned(p[0]), owned(p[1]))).collect();
                Command::HSet(owned(args[0]), pairs)
            }
            "HSETNX" => {
                arity(args.len() == 3)?;
                Command::HSetNx(owned(args[0]), owned(args[1]), owned(args[2]))
            }
            "HINCRBY" => {
                arity(args.len() == 3)?;
                Command::HIncrBy(owned(args[0]), owned(args[1]), parse_int(args[2])?)
            }
            "HDEL" => {
                arity(args.len() >= 2)?;
                Command::HDel(owned(args[0]), args[1..].iter().map(|s| s.to_string()).collect())
            }
            "HGETALL" => {
                arity(args.len() == 1)?;
                Command::HGetAll(owned(args[0]))
            }
            "HEXISTS" => {
                arity(args.len() == 2)?;
                Command::HExists(owned(args[0]), owned(args[1]))
            }
            "ZADD" => {
                arity(args.len() >= 3)?;
                let nx = args[1].eq_ignore_ascii_case("NX");
                let pairs = if nx { &args[2..] } else { &args[1..] };
                arity(!pairs.is_empty() && pairs.len() % 2 == 0)?;
                let members = pairs
                    .chunks(2)
                    .map(|p| Ok((parse_int(p[0])?, owned(p[1]))))
                    .collect::<Result<Vec<_>>>()?;
                Command::ZAdd { key: owned(args[0]), nx, members }
            }
            "ZINCRBY" => {
                arity(args.len() == 3)?;
                Command::ZIncrBy(owned(args[0]), parse_int(args[1])?, owned(args[2]))
            }
            "ZREM" => {
                arity(args.len() >= 2)?;
                Command::ZRem(owned(args[0]), args[1..].iter().map(|s| s.to_string()).collect())
            }
            "ZSCORE" => {
                arity(args.len() == 2)?;
                Command::ZScore(owned(args[0]), owned(args[1]))
            }
            "ZCARD" => {
                arity(args.len() == 1)?;
                Command::ZCard(owned(args[0]))
            }
            "ZREVRANGE" => {
                arity(args.len() == 3 || args.len() == 4)?;
                let with_scores = match args.get(3) {
                    None => false,
                    Some(flag) if flag.eq_ignore_ascii_case("WITHSCORES") => true,
                    Some(_) => return Err(Error::invalid_argument("syntax error")),
                };
                Command::ZRevRange {
                    key: owned(args[0]),
                    start: parse_int(args[1])? as isize,
                    stop: parse_int(args[2])? as isize,
                    with_scores,
                }
            }
            "SADD" => {
                arity(args.len() >= 2)?;
                Command::SAdd(owned(args[0]), args[1..].iter().map(|s| s.to_string()).collect())
            }
            "SREM" => {
                arity(args.len() >= 2)?;
                Command::SRem(owned(args[0]), args[1..].iter().map(|s| s.to_string()).collect())
            }
            "SISMEMBER" => {
                arity(args.len() == 2)?;
                Command::SIsMember(owned(args[0]), owned(args[1]))
            }
            "SCARD" => {
                arity(args.len() == 1)?;
                Command::SCard(owned(args[0]))
            }
            other => {
                return Err(Error::invalid_argument(format!("unknown command '{}'", other)))
            }
        };
        Ok(cmd)
    }

    /// Returns true if the command never mutates the keyspace.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Command::Get(_)
                | Command::Exists(_)
                | Command::Ttl(_)
                | Command::HGet(..)
                | Command::HGetAll(_)
                | Command::HExists(..)
                | Command::ZScore(..)
                | Command::ZCard(_)
                | Command::ZRevRange { .. }
                | Command::SIsMember(..)
                | Command::SCard(_)
        )
    }
}

/// Parses a signed integer argument.
pub fn parse_int(s: &str) -> Result<i64> {
    s.trim().parse::<i64>().map_err(|_| Error::NotInteger(s.to_string()))
}

/// Reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Missing value
    Nil,
    /// Integer reply
    Int(i64),
    /// String reply
    Bulk(String),
    /// Status reply such as `OK`
    Status(String),
    /// Multi-element reply
    Array(Vec<Reply>),
}

impl Reply {
    /// The `OK` status.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Integer value of the reply, parsing bulk strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(i) => Some(*i),
            Reply::Bulk(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String value of a bulk or status reply.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Bulk(s) | Reply::Status(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for the nil reply.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "(nil)"),
            Reply::Int(i) => write!(f, "(integer) {}", i),
            Reply::Bulk(s) => write!(f, "\"{}\"", s),
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
