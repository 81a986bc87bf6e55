//! Mutation dispatcher.
//!
//! Pure mapping from a business [`Event`] to the catalog script, key list
//! and argument list that apply it. No I/O happens here; the controller
//! hands the resulting [`Invocation`] to a
//! [`CounterStore`](crate::engine::CounterStore).
//!
//! Which kinds carry which scripts lives in [`KINDS`]; which ranking views
//! exist and what feeds them lives in [`RANKINGS`]. Adding a ranking view is
//! a one-row change.

use crate::config::Options;
use crate::engine::catalog;
use crate::engine::keys::{self, field};
use crate::engine::model::{Engagement, Kind, Visibility};
use crate::engine::repository::{CounterRecord, EntityRef};
use crate::error::{Error, Result};

/// A ranking view maintained per ranked kind.
#[derive(Debug, Clone, Copy)]
pub struct RankingSpec {
    /// Key suffix: `{kind}:{suffix}`.
    pub suffix: &'static str,
    /// Engagement types that move the score.
    pub fed_by: &'static [Engagement],
}

/// Ranking views.
pub const RANKINGS: &[RankingSpec] = &[
    RankingSpec {
        suffix: "hot",
        fed_by: &[Engagement::Agree, Engagement::Collect, Engagement::Comment],
    },
    RankingSpec { suffix: "leaderboard", fed_by: &[Engagement::Agree] },
];

/// Per-kind dispatch table row.
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    /// Content kind.
    pub kind: Kind,
    /// Creation / republish script; `None` for kinds created through other
    /// events.
    pub create_script: Option<&'static str>,
    /// Deletion script.
    pub delete_script: Option<&'static str>,
    /// Has ranking views.
    pub ranked: bool,
    /// Can be collected.
    pub collectable: bool,
}

/// Dispatch table, one row per [`Kind`].
pub const KINDS: [KindSpec; 4] = [
    KindSpec {
        kind: Kind::Article,
        create_script: Some(catalog::CREATE_ARTICLE),
        delete_script: Some(catalog::DELETE_ARTICLE),
        ranked: true,
        collectable: true,
    },
    KindSpec {
        kind: Kind::Column,
        create_script: Some(catalog::CREATE_COLUMN),
        delete_script: Some(catalog::DELETE_COLUMN),
        ranked: true,
        collectable: true,
    },
    KindSpec {
        kind: Kind::Talk,
        create_script: Some(catalog::CREATE_TALK),
        delete_script: Some(catalog::DELETE_TALK),
        ranked: true,
        collectable: true,
    },
    KindSpec {
        kind: Kind::Comment,
        create_script: None,
        delete_script: None,
        ranked: false,
        collectable: false,
    },
];

/// Table row of a kind.
pub fn kind_spec(kind: Kind) -> &'static KindSpec {
    match kind {
        Kind::Article => &KINDS[0],
        Kind::Column => &KINDS[1],
        Kind::Talk => &KINDS[2],
        Kind::Comment => &KINDS[3],
    }
}

/// Ranking keys of `kind` fed by `engagement`.
pub fn ranking_keys(kind: Kind, engagement: Engagement) -> Vec<String> {
    if !kind_spec(kind).ranked {
        return Vec::new();
    }
    RANKINGS
        .iter()
        .filter(|r| r.fed_by.contains(&engagement))
        .map(|r| keys::ranking(kind, r.suffix))
        .collect()
}

/// Every ranking key of `kind`.
pub fn all_ranking_keys(kind: Kind) -> Vec<String> {
    if !kind_spec(kind).ranked {
        return Vec::new();
    }
    RANKINGS.iter().map(|r| keys::ranking(kind, r.suffix)).collect()
}

/// A business event that changes engagement counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// New content.
    Create { kind: Kind, id: u64, owner: String, visibility: Visibility, score: i64 },
    /// Visibility change of existing content.
    Republish { kind: Kind, id: u64, owner: String, visibility: Visibility, score: i64 },
    /// Content removal.
    Delete { kind: Kind, id: u64, owner: String, visibility: Visibility },
    /// `user` agrees with content owned by `owner`.
    Agree { kind: Kind, id: u64, owner: String, user: String },
    /// `user` withdraws an agree.
    CancelAgree { kind: Kind, id: u64, owner: String, user: String },
    /// Content viewed.
    View { kind: Kind, id: u64, owner: String },
    /// `user` collects content at `at` (epoch seconds).
    Collect { kind: Kind, id: u64, owner: String, user: String, at: i64 },
    /// `user` removes content from their collections.
    CancelCollect { kind: Kind, id: u64, owner: String, user: String },
    /// New comment on a parent entity.
    CommentAdd { parent_kind: Kind, parent_id: u64, comment_id: u64, author: String },
    /// Comment removal.
    CommentRemove { parent_kind: Kind, parent_id: u64, comment_id: u64 },
    /// `follower` follows `followed`.
    Follow { follower: String, followed: String },
    /// `follower` stops following `followed`.
    Unfollow { follower: String, followed: String },
    /// New user.
    RegisterUser { uuid: String },
}

/// A resolved script call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Catalog script name.
    pub script: &'static str,
    /// Positional keys.
    pub keys: Vec<String>,
    /// Positional arguments.
    pub args: Vec<String>,
}

impl Invocation {
    fn new(script: &'static str, keys: Vec<String>, args: Vec<String>) -> Self {
        Self { script, keys, args }
    }
}

/// Event → invocation mapper.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    ttl_secs: u64,
}

impl Dispatcher {
    /// Creates a dispatcher stamping `ttl_secs` on created records.
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs }
    }

    /// Creates a dispatcher from store options.
    pub fn from_options(options: &Options) -> Self {
        Self::new(options.counter_ttl_secs)
    }

    /// TTL stamped on primary counter records.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Maps an event to its invocation.
    pub fn dispatch(&self, event: &Event) -> Result<Invocation> {
        let ttl = self.ttl_secs.to_string();
        let inv = match event {
            Event::Create { kind, id, owner, visibility, score } => {
                self.create(*kind, *id, owner, *visibility, *score, "create")?
            }
            Event::Republish { kind, id, owner, visibility, score } => {
                self.create(*kind, *id, owner, *visibility, *score, "republish")?
            }
            Event::Delete { kind, id, owner, visibility } => {
                let script = kind_spec(*kind).delete_script.ok_or_else(|| {
                    Error::invalid_argument(format!("{} is removed with its own event", kind))
                })?;
                let mut k = content_keys(*kind, *id, owner);
                k.extend(all_ranking_keys(*kind));
                Invocation::new(
                    script,
                    k,
                    vec![id.to_string(), visibility.auth_flag().to_string(), kind.to_string()],
                )
            }
            Event::Agree { kind, id, owner, user } => {
                self.agree(catalog::SET_AGREE, *kind, *id, owner, user)
            }
            Event::CancelAgree { kind, id, owner, user } => {
                self.agree(catalog::CANCEL_AGREE, *kind, *id, owner, user)
            }
            Event::View { kind, id, owner } => {
                let mut k = vec![keys::counter(*kind, *id), keys::achievement(owner)];
                k.extend(ranking_keys(*kind, Engagement::View));
                Invocation::new(catalog::SET_VIEW, k, vec![id.to_string(), "1".to_string()])
            }
            Event::Collect { kind, id, owner, user, at } => {
                self.collect(catalog::CREATE_COLLECTION, *kind, *id, owner, user, *at)?
            }
            Event::CancelCollect { kind, id, owner, user } => {
                self.collect(catalog::CANCEL_COLLECTION, *kind, *id, owner, user, 0)?
            }
            Event::CommentAdd { parent_kind, parent_id, comment_id, author } => {
                let mut k = vec![
                    keys::counter(Kind::Comment, *comment_id),
                    keys::counter(*parent_kind, *parent_id),
                ];
                k.extend(ranking_keys(*parent_kind, Engagement::Comment));
                Invocation::new(
                    catalog::CREATE_COMMENT,
                    k,
                    vec![
                        comment_id.to_string(),
                        author.clone(),
                        ttl,
                        parent_id.to_string(),
                        "1".to_string(),
                    ],
                )
            }
            Event::CommentRemove { parent_kind, parent_id, comment_id } => {
                let mut k = vec![
                    keys::counter(Kind::Comment, *comment_id),
                    keys::counter(*parent_kind, *parent_id),
                ];
                k.extend(ranking_keys(*parent_kind, Engagement::Comment));
                Invocation::new(
                    catalog::DELETE_COMMENT,
                    k,
                    vec![comment_id.to_string(), parent_id.to_string(), "1".to_string()],
                )
            }
            Event::Follow { follower, followed } => {
                self.follow(catalog::SET_FOLLOW, follower, followed)?
            }
            Event::Unfollow { follower, followed } => {
                self.follow(catalog::CANCEL_FOLLOW, follower, followed)?
            }
            Event::RegisterUser { uuid } => Invocation::new(
                catalog::CREATE_USER,
                vec![keys::achievement(uuid), keys::content_counts(uuid)],
                vec![ttl],
            ),
        };
        log::debug!("dispatch {:?} -> {}", event, inv.script);
        Ok(inv)
    }

    /// Invocation repopulating the cached copy of `record`. Fields the
    /// cache already holds are kept.
    pub fn rehydrate(&self, record: &CounterRecord) -> Invocation {
        let script = match &record.entity {
            EntityRef::Content { .. } => catalog::REHYDRATE_CONTENT,
            EntityRef::Achievement(_) => catalog::REHYDRATE_ACHIEVEMENT,
            EntityRef::ContentCounts(_) => catalog::REHYDRATE_COUNTS,
        };
        Invocation::new(script, vec![record.entity.cache_key()], self.record_args(record))
    }

    /// Invocation overwriting the cached copy of `record` with its values.
    pub fn refresh(&self, record: &CounterRecord) -> Invocation {
        let script = match &record.entity {
            EntityRef::Content { .. } => catalog::REFRESH_CONTENT,
            EntityRef::Achievement(_) => catalog::REFRESH_ACHIEVEMENT,
            EntityRef::ContentCounts(_) => catalog::REFRESH_COUNTS,
        };
        Invocation::new(script, vec![record.entity.cache_key()], self.record_args(record))
    }

    /// One invocation per ranking view of a content record, each setting
    /// the score the record's columns imply.
    pub fn refresh_rankings(&self, record: &CounterRecord) -> Vec<Invocation> {
        let EntityRef::Content { kind, id } = record.entity else {
            return Vec::new();
        };
        if !kind_spec(kind).ranked {
            return Vec::new();
        }
        RANKINGS
            .iter()
            .map(|r| {
                let score: i64 = r.fed_by.iter().map(|e| record.column(e.field())).sum();
                Invocation::new(
                    catalog::REFRESH_RANKING,
                    vec![keys::counter(kind, id), keys::ranking(kind, r.suffix)],
                    vec![id.to_string(), score.to_string()],
                )
            })
            .collect()
    }

    fn record_args(&self, record: &CounterRecord) -> Vec<String> {
        let names: &[&str] = match &record.entity {
            EntityRef::Content { .. } => &field::CONTENT[..],
            EntityRef::Achievement(_) => &field::ACHIEVEMENT[..],
            EntityRef::ContentCounts(_) => &field::COUNTS[..],
        };
        let mut args: Vec<String> = names.iter().map(|n| record.column(n).to_string()).collect();
        if let EntityRef::Content { .. } = record.entity {
            args.push(record.owner.clone());
            args.push(record.visibility.auth_flag().to_string());
        }
        args.push(self.ttl_secs.to_string());
        args
    }

    fn create(
        &self,
        kind: Kind,
        id: u64,
        owner: &str,
        visibility: Visibility,
        score: i64,
        mode: &str,
    ) -> Result<Invocation> {
        let script = kind_spec(kind).create_script.ok_or_else(|| {
            Error::invalid_argument(format!("{} is created with its own event", kind))
        })?;
        let mut k = content_keys(kind, id, owner);
        k.extend(all_ranking_keys(kind));
        Ok(Invocation::new(
            script,
            k,
            vec![
                id.to_string(),
                owner.to_string(),
                visibility.auth_flag().to_string(),
                mode.to_string(),
                self.ttl_secs.to_string(),
                kind.to_string(),
                score.to_string(),
            ],
        ))
    }

    fn agree(&self, script: &'static str, kind: Kind, id: u64, owner: &str, user: &str) -> Invocation {
        let mut k = vec![
            keys::counter(kind, id),
            keys::achievement(owner),
            keys::agree_marker(user, kind),
        ];
        k.extend(ranking_keys(kind, Engagement::Agree));
        Invocation::new(script, k, vec![id.to_string(), "1".to_string()])
    }

    fn collect(
        &self,
        script: &'static str,
        kind: Kind,
        id: u64,
        owner: &str,
        user: &str,
        at: i64,
    ) -> Result<Invocation> {
        if !kind_spec(kind).collectable {
            return Err(Error::invalid_argument(format!("{} cannot be collected", kind)));
        }
        let mut k = vec![
            keys::counter(kind, id),
            keys::achievement(owner),
            keys::collect_marker(user, kind),
            keys::collections(user, kind),
        ];
        k.extend(ranking_keys(kind, Engagement::Collect));
        Ok(Invocation::new(script, k, vec![id.to_string(), "1".to_string(), at.to_string()]))
    }

    fn follow(&self, script: &'static str, follower: &str, followed: &str) -> Result<Invocation> {
        if follower == followed {
            return Err(Error::invalid_argument("a user cannot follow themselves"));
        }
        Ok(Invocation::new(
            script,
            vec![keys::achievement(followed), keys::achievement(follower), keys::following(follower)],
            vec![followed.to_string(), "1".to_string()],
        ))
    }
}

fn content_keys(kind: Kind, id: u64, owner: &str) -> Vec<String> {
    vec![
        keys::counter(kind, id),
        keys::owner_index(owner, kind),
        keys::visit_index(owner, kind),
        keys::chronological(kind),
        keys::content_counts(owner),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::Catalog;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(1800)
    }

    fn check_arity(inv: &Invocation) {
        let template = Catalog::builtin().get(inv.script).unwrap();
        template.check_arity(&inv.keys, &inv.args).unwrap();
    }

    #[test]
    fn test_ranking_tables() {
        assert_eq!(ranking_keys(Kind::Article, Engagement::Agree), vec!["article:hot", "article:leaderboard"]);
        assert_eq!(ranking_keys(Kind::Talk, Engagement::Collect), vec!["talk:hot"]);
        assert!(ranking_keys(Kind::Article, Engagement::View).is_empty());
        assert!(ranking_keys(Kind::Comment, Engagement::Agree).is_empty());
        assert_eq!(all_ranking_keys(Kind::Column).len(), RANKINGS.len());
        for spec in KINDS {
            assert_eq!(kind_spec(spec.kind).kind, spec.kind);
        }
    }

    #[test]
    fn test_create_invocation() {
        let inv = dispatcher()
            .dispatch(&Event::Create {
                kind: Kind::Article,
                id: 42,
                owner: "u1".into(),
                visibility: Visibility::Private,
                score: 42,
            })
            .unwrap();
        assert_eq!(inv.script, "CreateArticleCache");
        assert_eq!(
            inv.keys,
            vec![
                "article:42",
                "user:u1:article",
                "user:u1:article:visit",
                "article",
                "user:u1:count",
                "article:hot",
                "article:leaderboard"
            ]
        );
        assert_eq!(inv.args, vec!["42", "u1", "1", "create", "1800", "article", "42"]);
        check_arity(&inv);
    }

    #[test]
    fn test_every_event_matches_template_arity() {
        let d = dispatcher();
        let events = vec![
            Event::Republish { kind: Kind::Talk, id: 1, owner: "u".into(), visibility: Visibility::Public, score: 1 },
            Event::Delete { kind: Kind::Column, id: 1, owner: "u".into(), visibility: Visibility::Public },
            Event::Agree { kind: Kind::Comment, id: 1, owner: "u".into(), user: "v".into() },
            Event::CancelAgree { kind: Kind::Article, id: 1, owner: "u".into(), user: "v".into() },
            Event::View { kind: Kind::Article, id: 1, owner: "u".into() },
            Event::Collect { kind: Kind::Article, id: 1, owner: "u".into(), user: "v".into(), at: 9 },
            Event::CancelCollect { kind: Kind::Talk, id: 1, owner: "u".into(), user: "v".into() },
            Event::CommentAdd { parent_kind: Kind::Article, parent_id: 1, comment_id: 2, author: "v".into() },
            Event::CommentRemove { parent_kind: Kind::Article, parent_id: 1, comment_id: 2 },
            Event::Follow { follower: "v".into(), followed: "u".into() },
            Event::Unfollow { follower: "v".into(), followed: "u".into() },
            Event::RegisterUser { uuid: "u".into() },
        ];
        for event in events {
            check_arity(&d.dispatch(&event).unwrap());
        }
    }

    #[test]
    fn test_rejected_events() {
        let d = dispatcher();
        let comment = Event::Create {
            kind: Kind::Comment,
            id: 1,
            owner: "u".into(),
            visibility: Visibility::Public,
            score: 1,
        };
        assert!(matches!(d.dispatch(&comment), Err(Error::InvalidArgument(_))));
        let collect = Event::Collect { kind: Kind::Comment, id: 1, owner: "u".into(), user: "v".into(), at: 0 };
        assert!(d.dispatch(&collect).is_err());
        let own = Event::Follow { follower: "u".into(), followed: "u".into() };
        assert!(d.dispatch(&own).is_err());
    }

    #[test]
    fn test_follow_keys() {
        let inv = dispatcher()
            .dispatch(&Event::Follow { follower: "b".into(), followed: "a".into() })
            .unwrap();
        assert_eq!(inv.keys, vec!["user:a:achievement", "user:b:achievement", "user:b:following"]);
        assert_eq!(inv.args, vec!["a", "1"]);
    }

    #[test]
    fn test_rehydrate_invocations() {
        let d = dispatcher();
        let mut record = CounterRecord::content(Kind::Talk, 5, "u1", Visibility::Private);
        record.columns.insert("agree".into(), 3);
        let inv = d.rehydrate(&record);
        assert_eq!(inv.script, "RehydrateContentCache");
        assert_eq!(inv.keys, vec!["talk:5"]);
        assert_eq!(inv.args, vec!["3", "0", "0", "0", "u1", "1", "1800"]);
        check_arity(&inv);

        check_arity(&d.rehydrate(&CounterRecord::achievement("u1")));
        let counts = d.rehydrate(&CounterRecord::content_counts("u1"));
        assert_eq!(counts.keys, vec!["user:u1:count"]);
        check_arity(&counts);
    }

    #[test]
    fn test_refresh_invocations() {
        let d = dispatcher();
        let mut record = CounterRecord::content(Kind::Article, 5, "u1", Visibility::Public);
        record.columns.insert("agree".into(), 3);
        record.columns.insert("collect".into(), 2);
        record.columns.insert("view".into(), 40);

        let inv = d.refresh(&record);
        assert_eq!(inv.script, "RefreshContentCache");
        assert_eq!(inv.args, d.rehydrate(&record).args);
        check_arity(&inv);
        check_arity(&d.refresh(&CounterRecord::achievement("u1")));

        let rankings = d.refresh_rankings(&record);
        let scores: Vec<_> = rankings.iter().map(|i| (i.keys[1].as_str(), i.args[1].as_str())).collect();
        assert_eq!(scores, vec![("article:hot", "5"), ("article:leaderboard", "3")]);
        for inv in &rankings {
            check_arity(inv);
        }

        let comment = CounterRecord::comment(9, "u1", EntityRef::content(Kind::Article, 5));
        assert!(d.refresh_rankings(&comment).is_empty());
        assert!(d.refresh_rankings(&CounterRecord::achievement("u1")).is_empty());
    }
}
