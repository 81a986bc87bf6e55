//! The built-in script catalog.
//!
//! Every cache mutation the engine performs is one of these templates,
//! executed atomically by the counter store. Statuses: `0` applied, `1`
//! no-op (marker already in the requested state, or a decrement clamped at
//! the floor), `2` the primary counter record is absent.

use crate::engine::keys::{field, VISIT_SUFFIX};
use crate::script::{Cond, KeySlot, Operand, Step, Template};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Existence-gated hash increment.
pub const HINCR_IF_EXISTS: &str = "HIncrIfExists";
/// Existence-gated, floor-guarded hash decrement.
pub const HDECR_FLOOR: &str = "HDecrFloor";
/// Article creation / republish fan-out.
pub const CREATE_ARTICLE: &str = "CreateArticleCache";
/// Column creation / republish fan-out.
pub const CREATE_COLUMN: &str = "CreateColumnCache";
/// Talk creation / republish fan-out.
pub const CREATE_TALK: &str = "CreateTalkCache";
/// Comment creation, bumping the parent's comment count.
pub const CREATE_COMMENT: &str = "CreateCommentCache";
/// Article deletion fan-out.
pub const DELETE_ARTICLE: &str = "DeleteArticleCache";
/// Column deletion fan-out.
pub const DELETE_COLUMN: &str = "DeleteColumnCache";
/// Talk deletion fan-out.
pub const DELETE_TALK: &str = "DeleteTalkCache";
/// Comment deletion, dropping the parent's comment count.
pub const DELETE_COMMENT: &str = "DeleteCommentCache";
/// Agree toggle on.
pub const SET_AGREE: &str = "SetAgreeToCache";
/// Agree toggle off.
pub const CANCEL_AGREE: &str = "CancelAgreeFromCache";
/// View increment.
pub const SET_VIEW: &str = "SetViewToCache";
/// Collect toggle on.
pub const CREATE_COLLECTION: &str = "CreateCollectionsCache";
/// Collect toggle off.
pub const CANCEL_COLLECTION: &str = "CancelCollectionsFromCache";
/// Parent comment-count increment.
pub const SET_COMMENT: &str = "SetCommentToCache";
/// Parent comment-count decrement.
pub const CANCEL_COMMENT: &str = "CancelCommentFromCache";
/// Follow toggle on.
pub const SET_FOLLOW: &str = "SetAchievementFollowToCache";
/// Follow toggle off.
pub const CANCEL_FOLLOW: &str = "CancelAchievementFollowFromCache";
/// New user achievement and counts.
pub const CREATE_USER: &str = "CreateUserCache";
/// Content counter rehydration.
pub const REHYDRATE_CONTENT: &str = "RehydrateContentCache";
/// Achievement rehydration.
pub const REHYDRATE_ACHIEVEMENT: &str = "RehydrateAchievementCache";
/// Content-counts rehydration.
pub const REHYDRATE_COUNTS: &str = "RehydrateCountCache";
/// Content counter overwrite from the system of record.
pub const REFRESH_CONTENT: &str = "RefreshContentCache";
/// Achievement overwrite from the system of record.
pub const REFRESH_ACHIEVEMENT: &str = "RefreshAchievementCache";
/// Content-counts overwrite from the system of record.
pub const REFRESH_COUNTS: &str = "RefreshCountCache";
/// Ranking score overwrite for a member already ranked.
pub const REFRESH_RANKING: &str = "RefreshRankingCache";

/// Immutable name → template table.
#[derive(Debug)]
pub struct Catalog {
    templates: BTreeMap<&'static str, Template>,
}

impl Catalog {
    /// The process-wide catalog.
    pub fn builtin() -> &'static Catalog {
        static CATALOG: OnceLock<Catalog> = OnceLock::new();
        CATALOG.get_or_init(Catalog::build)
    }

    /// Looks up a template by name.
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Always false for the built-in catalog.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    fn build() -> Catalog {
        let templates = [
            hincr_if_exists(),
            hdecr_floor(),
            create_content(CREATE_ARTICLE),
            create_content(CREATE_COLUMN),
            create_content(CREATE_TALK),
            create_comment(),
            delete_content(DELETE_ARTICLE),
            delete_content(DELETE_COLUMN),
            delete_content(DELETE_TALK),
            delete_comment(),
            set_agree(),
            cancel_agree(),
            set_view(),
            create_collection(),
            cancel_collection(),
            set_comment(),
            cancel_comment(),
            set_follow(),
            cancel_follow(),
            create_user(),
            rehydrate(REHYDRATE_CONTENT, &["counter"], &CONTENT_REHYDRATE_ARGS),
            rehydrate(REHYDRATE_ACHIEVEMENT, &["achievement"], &ACHIEVEMENT_REHYDRATE_ARGS),
            rehydrate(REHYDRATE_COUNTS, &["user counts"], &COUNTS_REHYDRATE_ARGS),
            refresh(REFRESH_CONTENT, &["counter"], &CONTENT_REHYDRATE_ARGS),
            refresh(REFRESH_ACHIEVEMENT, &["achievement"], &ACHIEVEMENT_REHYDRATE_ARGS),
            refresh(REFRESH_COUNTS, &["user counts"], &COUNTS_REHYDRATE_ARGS),
            refresh_ranking(),
        ];
        Catalog { templates: templates.into_iter().map(|t| (t.name, t)).collect() }
    }
}

// ----------------------------------------------------------------------
// Step shorthands
// ----------------------------------------------------------------------

const fn k(i: usize) -> KeySlot {
    KeySlot::At(i)
}

const fn a(i: usize) -> Operand {
    Operand::Arg(i)
}

const fn lit(s: &'static str) -> Operand {
    Operand::Lit(s)
}

fn when(cond: Cond, then: Vec<Step>) -> Step {
    Step::When { cond, then }
}

fn hsetnx(key: usize, name: &'static str, value: Operand) -> Step {
    Step::HSetNx { key: k(key), field: lit(name), value }
}

fn incr(key: usize, name: &'static str, delta: Operand) -> Step {
    Step::HIncrIfExists { key: k(key), field: lit(name), delta }
}

fn decr(key: usize, name: &'static str, delta: Operand) -> Step {
    Step::HDecrFloor { key: k(key), field: lit(name), delta }
}

fn rankings_incr(from: usize, member: Operand, delta: Operand) -> Step {
    Step::ForEachKey {
        from,
        steps: vec![Step::ZIncrIfMember { key: KeySlot::Current, member, delta }],
    }
}

fn rankings_decr(from: usize, member: Operand, delta: Operand) -> Step {
    Step::ForEachKey {
        from,
        steps: vec![Step::ZDecrFloor { key: KeySlot::Current, member, delta }],
    }
}

/// Zero-initialized counter fields, set only where absent.
fn init_fields(key: usize, fields: &[&'static str]) -> Vec<Step> {
    fields.iter().map(|&f| hsetnx(key, f, lit("0"))).collect()
}

// ----------------------------------------------------------------------
// Templates
// ----------------------------------------------------------------------

fn hincr_if_exists() -> Template {
    Template {
        name: HINCR_IF_EXISTS,
        keys: &["hash"],
        variadic_keys: false,
        args: &["field", "delta"],
        steps: vec![
            when(Cond::Missing(k(0)), vec![Step::Return(2)]),
            Step::HIncrIfExists { key: k(0), field: a(0), delta: a(1) },
        ],
    }
}

fn hdecr_floor() -> Template {
    Template {
        name: HDECR_FLOOR,
        keys: &["hash"],
        variadic_keys: false,
        args: &["field", "delta"],
        steps: vec![
            when(Cond::Missing(k(0)), vec![Step::Return(2)]),
            Step::HDecrFloor { key: k(0), field: a(0), delta: a(1) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
        ],
    }
}

// keys: counter, owner index, visit index, chronological, user counts, rankings...
// args: id, owner uuid, auth, mode, ttl, kind, score
fn create_content(name: &'static str) -> Template {
    let mut create = init_fields(0, &field::CONTENT);
    create.extend([
        hsetnx(0, field::UUID, a(1)),
        Step::HSet { key: k(0), field: lit(field::AUTH), value: a(2) },
        Step::Expire { key: k(0), seconds: a(4) },
        Step::ZAdd { key: k(1), member: a(0), score: a(6), nx: false },
        when(
            Cond::Changed,
            vec![Step::HIncrIfExists { key: k(4), field: a(5), delta: Operand::Int(1) }],
        ),
        Step::ForEachKey {
            from: 5,
            steps: vec![Step::ZAdd {
                key: KeySlot::Current,
                member: a(0),
                score: Operand::Int(0),
                nx: true,
            }],
        },
    ]);

    let republish = vec![
        when(
            Cond::Exists(k(0)),
            vec![
                Step::HSet { key: k(0), field: lit(field::AUTH), value: a(2) },
                Step::Expire { key: k(0), seconds: a(4) },
            ],
        ),
        when(Cond::Missing(k(0)), vec![Step::SetStatus(2)]),
    ];

    let visit_delta = Operand::Int(1);
    let visit_field = Operand::ArgSuffix(5, VISIT_SUFFIX);
    Template {
        name,
        keys: &["counter", "owner index", "visit index", "chronological", "user counts"],
        variadic_keys: true,
        args: &["id", "owner uuid", "auth", "mode", "ttl", "kind", "score"],
        steps: vec![
            when(Cond::ArgEq(3, "create"), create),
            when(Cond::ArgEq(3, "republish"), republish),
            when(
                Cond::ArgEq(2, "0"),
                vec![
                    Step::ZAdd { key: k(2), member: a(0), score: a(6), nx: false },
                    when(
                        Cond::Changed,
                        vec![Step::HIncrIfExists { key: k(4), field: visit_field, delta: visit_delta }],
                    ),
                    Step::ZAdd { key: k(3), member: a(0), score: a(6), nx: false },
                ],
            ),
            when(
                Cond::ArgEq(2, "1"),
                vec![
                    Step::ZRem { key: k(2), member: a(0) },
                    when(
                        Cond::Changed,
                        vec![Step::HDecrFloor { key: k(4), field: visit_field, delta: visit_delta }],
                    ),
                    Step::ZRem { key: k(3), member: a(0) },
                ],
            ),
        ],
    }
}

// keys: counter, owner index, visit index, chronological, user counts, rankings...
// args: id, auth, kind
fn delete_content(name: &'static str) -> Template {
    let one = Operand::Int(1);
    Template {
        name,
        keys: &["counter", "owner index", "visit index", "chronological", "user counts"],
        variadic_keys: true,
        args: &["id", "auth", "kind"],
        steps: vec![
            Step::Del { key: k(0) },
            Step::ZRem { key: k(1), member: a(0) },
            when(Cond::Changed, vec![Step::HDecrFloor { key: k(4), field: a(2), delta: one }]),
            Step::ForEachKey {
                from: 5,
                steps: vec![Step::ZRem { key: KeySlot::Current, member: a(0) }],
            },
            when(
                Cond::ArgEq(1, "0"),
                vec![
                    Step::ZRem { key: k(2), member: a(0) },
                    when(
                        Cond::Changed,
                        vec![Step::HDecrFloor {
                            key: k(4),
                            field: Operand::ArgSuffix(2, VISIT_SUFFIX),
                            delta: one,
                        }],
                    ),
                    Step::ZRem { key: k(3), member: a(0) },
                ],
            ),
        ],
    }
}

// keys: comment counter, parent counter, parent rankings...
// args: comment id, author uuid, ttl, parent id, delta
fn create_comment() -> Template {
    let mut steps = vec![
        hsetnx(0, field::AGREE, lit("0")),
        when(Cond::Unchanged, vec![Step::Return(1)]),
    ];
    steps.extend(init_fields(0, &[field::VIEW, field::COLLECT, field::COMMENT]));
    steps.extend([
        hsetnx(0, field::UUID, a(1)),
        Step::HSet { key: k(0), field: lit(field::AUTH), value: lit("0") },
        Step::Expire { key: k(0), seconds: a(2) },
        incr(1, field::COMMENT, a(4)),
        when(Cond::Unchanged, vec![Step::SetStatus(2)]),
        rankings_incr(2, a(3), a(4)),
    ]);
    Template {
        name: CREATE_COMMENT,
        keys: &["comment counter", "parent counter"],
        variadic_keys: true,
        args: &["comment id", "author uuid", "ttl", "parent id", "delta"],
        steps,
    }
}

// keys: comment counter, parent counter, parent rankings...
// args: comment id, parent id, delta
fn delete_comment() -> Template {
    Template {
        name: DELETE_COMMENT,
        keys: &["comment counter", "parent counter"],
        variadic_keys: true,
        args: &["comment id", "parent id", "delta"],
        steps: vec![
            Step::Del { key: k(0) },
            when(Cond::Missing(k(1)), vec![Step::SetStatus(2)]),
            decr(1, field::COMMENT, a(2)),
            rankings_decr(2, a(1), a(2)),
        ],
    }
}

fn set_agree() -> Template {
    Template {
        name: SET_AGREE,
        keys: &["counter", "achievement", "marker"],
        variadic_keys: true,
        args: &["id", "delta"],
        steps: vec![
            Step::SAdd { key: k(2), member: a(0) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
            incr(0, field::AGREE, a(1)),
            when(Cond::Unchanged, vec![Step::SetStatus(2)]),
            incr(1, field::AGREE, a(1)),
            incr(1, field::SCORE, a(1)),
            rankings_incr(3, a(0), a(1)),
        ],
    }
}

fn cancel_agree() -> Template {
    Template {
        name: CANCEL_AGREE,
        keys: &["counter", "achievement", "marker"],
        variadic_keys: true,
        args: &["id", "delta"],
        steps: vec![
            Step::SRem { key: k(2), member: a(0) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
            when(Cond::Missing(k(0)), vec![Step::SetStatus(2)]),
            decr(0, field::AGREE, a(1)),
            decr(1, field::AGREE, a(1)),
            decr(1, field::SCORE, a(1)),
            rankings_decr(3, a(0), a(1)),
        ],
    }
}

fn set_view() -> Template {
    Template {
        name: SET_VIEW,
        keys: &["counter", "achievement"],
        variadic_keys: true,
        args: &["id", "delta"],
        steps: vec![
            incr(0, field::VIEW, a(1)),
            when(Cond::Unchanged, vec![Step::SetStatus(2)]),
            incr(1, field::VIEW, a(1)),
            rankings_incr(2, a(0), a(1)),
        ],
    }
}

fn create_collection() -> Template {
    Template {
        name: CREATE_COLLECTION,
        keys: &["counter", "achievement", "marker", "collections"],
        variadic_keys: true,
        args: &["id", "delta", "timestamp"],
        steps: vec![
            Step::ZAdd { key: k(3), member: a(0), score: a(2), nx: false },
            Step::SAdd { key: k(2), member: a(0) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
            incr(0, field::COLLECT, a(1)),
            when(Cond::Unchanged, vec![Step::SetStatus(2)]),
            incr(1, field::COLLECT, a(1)),
            incr(1, field::SCORE, a(1)),
            rankings_incr(4, a(0), a(1)),
        ],
    }
}

fn cancel_collection() -> Template {
    Template {
        name: CANCEL_COLLECTION,
        keys: &["counter", "achievement", "marker", "collections"],
        variadic_keys: true,
        args: &["id", "delta", "timestamp"],
        steps: vec![
            Step::ZRem { key: k(3), member: a(0) },
            Step::SRem { key: k(2), member: a(0) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
            when(Cond::Missing(k(0)), vec![Step::SetStatus(2)]),
            decr(0, field::COLLECT, a(1)),
            decr(1, field::COLLECT, a(1)),
            decr(1, field::SCORE, a(1)),
            rankings_decr(4, a(0), a(1)),
        ],
    }
}

fn set_comment() -> Template {
    Template {
        name: SET_COMMENT,
        keys: &["counter"],
        variadic_keys: true,
        args: &["id", "delta"],
        steps: vec![
            when(Cond::Missing(k(0)), vec![Step::Return(2)]),
            incr(0, field::COMMENT, a(1)),
            rankings_incr(1, a(0), a(1)),
        ],
    }
}

fn cancel_comment() -> Template {
    Template {
        name: CANCEL_COMMENT,
        keys: &["counter"],
        variadic_keys: true,
        args: &["id", "delta"],
        steps: vec![
            when(Cond::Missing(k(0)), vec![Step::Return(2)]),
            decr(0, field::COMMENT, a(1)),
            when(Cond::Unchanged, vec![Step::Return(1)]),
            rankings_decr(1, a(0), a(1)),
        ],
    }
}

// Both mirrored counters change in the same script or not at all.
fn set_follow() -> Template {
    Template {
        name: SET_FOLLOW,
        keys: &["followed achievement", "follower achievement", "following marker"],
        variadic_keys: false,
        args: &["followed uuid", "delta"],
        steps: vec![
            Step::SAdd { key: k(2), member: a(0) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
            when(Cond::Missing(k(0)), vec![Step::SetStatus(2)]),
            when(Cond::Missing(k(1)), vec![Step::SetStatus(2)]),
            incr(0, field::FOLLOWED, a(1)),
            incr(1, field::FOLLOW, a(1)),
        ],
    }
}

fn cancel_follow() -> Template {
    Template {
        name: CANCEL_FOLLOW,
        keys: &["followed achievement", "follower achievement", "following marker"],
        variadic_keys: false,
        args: &["followed uuid", "delta"],
        steps: vec![
            Step::SRem { key: k(2), member: a(0) },
            when(Cond::Unchanged, vec![Step::Return(1)]),
            when(Cond::Missing(k(0)), vec![Step::SetStatus(2)]),
            when(Cond::Missing(k(1)), vec![Step::SetStatus(2)]),
            decr(0, field::FOLLOWED, a(1)),
            decr(1, field::FOLLOW, a(1)),
        ],
    }
}

fn create_user() -> Template {
    let mut steps = init_fields(0, &field::ACHIEVEMENT);
    steps.push(Step::Expire { key: k(0), seconds: a(0) });
    steps.extend(init_fields(1, &field::COUNTS));
    steps.push(Step::Expire { key: k(1), seconds: a(0) });
    Template {
        name: CREATE_USER,
        keys: &["achievement", "user counts"],
        variadic_keys: false,
        args: &["ttl"],
        steps,
    }
}

const CONTENT_REHYDRATE_ARGS: [&str; 7] =
    ["agree", "view", "collect", "comment", "uuid", "auth", "ttl"];
const ACHIEVEMENT_REHYDRATE_ARGS: [&str; 7] =
    ["agree", "view", "collect", "follow", "followed", "score", "ttl"];
const COUNTS_REHYDRATE_ARGS: [&str; 7] =
    ["article", "article_visit", "column", "column_visit", "talk", "talk_visit", "ttl"];

/// One `HSETNX` per field named by the arguments, then a fresh TTL from
/// the last argument.
fn rehydrate(
    name: &'static str,
    keys: &'static [&'static str],
    args: &'static [&'static str],
) -> Template {
    let ttl = args.len() - 1;
    let mut steps: Vec<Step> =
        args[..ttl].iter().enumerate().map(|(i, &f)| hsetnx(0, f, a(i))).collect();
    steps.push(Step::Expire { key: k(0), seconds: a(ttl) });
    Template { name, keys, variadic_keys: false, args, steps }
}

/// Same arguments as [`rehydrate`], but every field is overwritten.
fn refresh(
    name: &'static str,
    keys: &'static [&'static str],
    args: &'static [&'static str],
) -> Template {
    let ttl = args.len() - 1;
    let mut steps: Vec<Step> = args[..ttl]
        .iter()
        .enumerate()
        .map(|(i, &f)| Step::HSet { key: k(0), field: lit(f), value: a(i) })
        .collect();
    steps.push(Step::Expire { key: k(0), seconds: a(ttl) });
    Template { name, keys, variadic_keys: false, args, steps }
}

// Deleted entities have no counter and are never ranked again.
fn refresh_ranking() -> Template {
    Template {
        name: REFRESH_RANKING,
        keys: &["counter", "ranking"],
        variadic_keys: false,
        args: &["id", "score"],
        steps: vec![
            when(Cond::Missing(k(0)), vec![Step::Return(2)]),
            Step::ZRem { key: k(1), member: a(0) },
            when(
                Cond::Changed,
                vec![Step::ZAdd { key: k(1), member: a(0), score: a(1), nx: false }],
            ),
        ],
    }
}
