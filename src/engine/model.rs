//! Engagement entities and the counter views read back from the cache.

use crate::engine::keys::{field, PRIVATE, PUBLIC};
use crate::engine::repository::CounterRecord;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    /// Long-form article
    Article,
    /// Column (series of articles)
    Column,
    /// Short talk post
    Talk,
    /// Comment on another entity
    Comment,
}

impl Kind {
    /// Every kind, in key-prefix order.
    pub const ALL: [Kind; 4] = [Kind::Article, Kind::Column, Kind::Talk, Kind::Comment];

    /// Key prefix and aggregate field name.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Article => "article",
            Kind::Column => "column",
            Kind::Talk => "talk",
            Kind::Comment => "comment",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::invalid_argument(format!("unknown kind '{}'", s)))
    }
}

/// Who can see an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Visible to visitors
    #[default]
    Public,
    /// Visible to the owner only
    Private,
}

impl Visibility {
    /// The `auth` flag stored in counter hashes.
    pub fn auth_flag(self) -> &'static str {
        match self {
            Visibility::Public => PUBLIC,
            Visibility::Private => PRIVATE,
        }
    }

    /// Parses an `auth` flag.
    pub fn from_auth_flag(flag: &str) -> Result<Self> {
        match flag {
            PUBLIC => Ok(Visibility::Public),
            PRIVATE => Ok(Visibility::Private),
            other => Err(Error::invalid_argument(format!("invalid auth flag '{}'", other))),
        }
    }
}

/// Engagement type that can feed a ranking view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engagement {
    /// Agree (like)
    Agree,
    /// Page view
    View,
    /// Collect (bookmark)
    Collect,
    /// New comment
    Comment,
}

impl Engagement {
    /// Counter field the engagement increments.
    pub fn field(self) -> &'static str {
        match self {
            Engagement::Agree => field::AGREE,
            Engagement::View => field::VIEW,
            Engagement::Collect => field::COLLECT,
            Engagement::Comment => field::COMMENT,
        }
    }
}

fn int_field(fields: &BTreeMap<String, String>, name: &str) -> Result<i64> {
    match fields.get(name) {
        Some(v) => v.parse().map_err(|_| Error::NotInteger(format!("{}={}", name, v))),
        None => Ok(0),
    }
}

/// Engagement counters of one content entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounters {
    /// Agree count
    pub agree: i64,
    /// View count
    pub view: i64,
    /// Collect count
    pub collect: i64,
    /// Comment count
    pub comment: i64,
    /// Owner uuid
    pub owner: String,
    /// Visibility
    pub visibility: Visibility,
}

impl ContentCounters {
    /// Reads counters from a counter hash.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            agree: int_field(fields, field::AGREE)?,
            view: int_field(fields, field::VIEW)?,
            collect: int_field(fields, field::COLLECT)?,
            comment: int_field(fields, field::COMMENT)?,
            owner: fields.get(field::UUID).cloned().unwrap_or_default(),
            visibility: match fields.get(field::AUTH) {
                Some(flag) => Visibility::from_auth_flag(flag)?,
                None => Visibility::Public,
            },
        })
    }

    /// Counters of an authoritative content record.
    pub fn from_record(record: &CounterRecord) -> Self {
        Self {
            agree: record.column(field::AGREE),
            view: record.column(field::VIEW),
            collect: record.column(field::COLLECT),
            comment: record.column(field::COMMENT),
            owner: record.owner.clone(),
            visibility: record.visibility,
        }
    }
}

/// Aggregated engagement and social graph size of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAchievement {
    /// Agrees received
    pub agree: i64,
    /// Views received
    pub view: i64,
    /// Collects received
    pub collect: i64,
    /// Users this user follows
    pub follow: i64,
    /// Users following this user
    pub followed: i64,
    /// Engagement score
    pub score: i64,
}

impl UserAchievement {
    /// Reads an achievement hash.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            agree: int_field(fields, field::AGREE)?,
            view: int_field(fields, field::VIEW)?,
            collect: int_field(fields, field::COLLECT)?,
            follow: int_field(fields, field::FOLLOW)?,
            followed: int_field(fields, field::FOLLOWED)?,
            score: int_field(fields, field::SCORE)?,
        })
    }

    /// Achievement of an authoritative record.
    pub fn from_record(record: &CounterRecord) -> Self {
        Self {
            agree: record.column(field::AGREE),
            view: record.column(field::VIEW),
            collect: record.column(field::COLLECT),
            follow: record.column(field::FOLLOW),
            followed: record.column(field::FOLLOWED),
            score: record.column(field::SCORE),
        }
    }
}

/// Per-kind content counts of one user.
///
/// `{kind}` counts everything the owner sees; `{kind}_visit` counts only
/// public entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContentCounts {
    /// Articles
    pub article: i64,
    /// Public articles
    pub article_visit: i64,
    /// Columns
    pub column: i64,
    /// Public columns
    pub column_visit: i64,
    /// Talks
    pub talk: i64,
    /// Public talks
    pub talk_visit: i64,
}

impl UserContentCounts {
    /// Reads a counts hash.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            article: int_field(fields, "article")?,
            article_visit: int_field(fields, "article_visit")?,
            column: int_field(fields, "column")?,
            column_visit: int_field(fields, "column_visit")?,
            talk: int_field(fields, "talk")?,
            talk_visit: int_field(fields, "talk_visit")?,
        })
    }

    /// Counts of an authoritative record.
    pub fn from_record(record: &CounterRecord) -> Self {
        Self {
            article: record.column("article"),
            article_visit: record.column("article_visit"),
            column: record.column("column"),
            column_visit: record.column("column_visit"),
            talk: record.column("talk"),
            talk_visit: record.column("talk_visit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
        assert!("video".parse::<Kind>().is_err());
    }

    #[test]
    fn test_visibility_flags() {
        assert_eq!(Visibility::Public.auth_flag(), "0");
        assert_eq!(Visibility::from_auth_flag("1").unwrap(), Visibility::Private);
        assert!(Visibility::from_auth_flag("2").is_err());
    }

    #[test]
    fn test_content_counters_from_fields() {
        let counters = ContentCounters::from_fields(&fields(&[
            ("agree", "2"),
            ("view", "10"),
            ("uuid", "u1"),
            ("auth", "1"),
        ]))
        .unwrap();
        assert_eq!(counters.agree, 2);
        assert_eq!(counters.collect, 0);
        assert_eq!(counters.owner, "u1");
        assert_eq!(counters.visibility, Visibility::Private);

        assert!(ContentCounters::from_fields(&fields(&[("agree", "x")])).is_err());
    }

    #[test]
    fn test_achievement_and_counts_from_fields() {
        let a = UserAchievement::from_fields(&fields(&[("followed", "3"), ("score", "7")])).unwrap();
        assert_eq!(a.followed, 3);
        assert_eq!(a.score, 7);

        let c = UserContentCounts::from_fields(&fields(&[("talk", "4"), ("talk_visit", "1")]))
            .unwrap();
        assert_eq!((c.talk, c.talk_visit, c.article), (4, 1, 0));
    }
}
