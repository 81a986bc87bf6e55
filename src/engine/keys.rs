//! Counter store key layout and shared field names.
//!
//! ```text
//! {kind}:{id}                       counter hash
//! {kind}                            chronological index
//! {kind}:{view}                     ranking view (hot, leaderboard)
//! user:{uuid}:{kind}                owner-visible index
//! user:{uuid}:{kind}:visit          visitor-visible index
//! user:{uuid}:achievement           achievement hash
//! user:{uuid}:count                 per-kind content counts
//! user:{uuid}:agree:{kind}          agree marker set
//! user:{uuid}:collect:{kind}        collect marker set
//! user:{uuid}:collections:{kind}    collected entities by time
//! user:{uuid}:following             follow marker set
//! ```

use crate::engine::model::Kind;

/// `auth` flag of public entities.
pub const PUBLIC: &str = "0";
/// `auth` flag of private entities.
pub const PRIVATE: &str = "1";

/// Field names shared by every counter hash.
pub mod field {
    /// Agree count
    pub const AGREE: &str = "agree";
    /// View count
    pub const VIEW: &str = "view";
    /// Collect count
    pub const COLLECT: &str = "collect";
    /// Comment count
    pub const COMMENT: &str = "comment";
    /// Followed-users count
    pub const FOLLOW: &str = "follow";
    /// Followers count
    pub const FOLLOWED: &str = "followed";
    /// Visibility flag
    pub const AUTH: &str = "auth";
    /// Owner uuid
    pub const UUID: &str = "uuid";
    /// Engagement score
    pub const SCORE: &str = "score";

    /// Counter fields of a content hash.
    pub const CONTENT: [&str; 4] = [AGREE, VIEW, COLLECT, COMMENT];
    /// Counter fields of an achievement hash.
    pub const ACHIEVEMENT: [&str; 6] = [AGREE, VIEW, COLLECT, FOLLOW, FOLLOWED, SCORE];
    /// Fields of a content-counts hash.
    pub const COUNTS: [&str; 6] =
        ["article", "article_visit", "column", "column_visit", "talk", "talk_visit"];
}

/// Suffix of visitor aggregate fields and index keys.
pub const VISIT_SUFFIX: &str = "_visit";

/// Counter hash of a content entity.
pub fn counter(kind: Kind, id: u64) -> String {
    format!("{}:{}", kind, id)
}

/// Chronological index of a kind.
pub fn chronological(kind: Kind) -> String {
    kind.to_string()
}

/// Ranking view of a kind.
pub fn ranking(kind: Kind, view: &str) -> String {
    format!("{}:{}", kind, view)
}

/// Owner-visible index.
pub fn owner_index(uuid: &str, kind: Kind) -> String {
    format!("user:{}:{}", uuid, kind)
}

/// Visitor-visible index.
pub fn visit_index(uuid: &str, kind: Kind) -> String {
    format!("user:{}:{}:visit", uuid, kind)
}

/// Achievement hash of a user.
pub fn achievement(uuid: &str) -> String {
    format!("user:{}:achievement", uuid)
}

/// Content-counts hash of a user.
pub fn content_counts(uuid: &str) -> String {
    format!("user:{}:count", uuid)
}

/// Agree marker set.
pub fn agree_marker(uuid: &str, kind: Kind) -> String {
    format!("user:{}:agree:{}", uuid, kind)
}

/// Collect marker set.
pub fn collect_marker(uuid: &str, kind: Kind) -> String {
    format!("user:{}:collect:{}", uuid, kind)
}

/// Collections view of a user.
pub fn collections(uuid: &str, kind: Kind) -> String {
    format!("user:{}:collections:{}", uuid, kind)
}

/// Follow marker set.
pub fn following(uuid: &str) -> String {
    format!("user:{}:following", uuid)
}
