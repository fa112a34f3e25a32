//! Authorization kernel: pure predicates over a viewer, their rank in a
//! thread and the thread's visibility flags. Nothing here touches storage.

use std::fmt;

/// Standing of a user inside one thread. Anonymous viewers and users with no
/// membership row are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Banned = -1,
    None = 0,
    Member = 1,
    Moderator = 2,
    Owner = 3,
}

impl Rank {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::Banned),
            0 => Some(Self::None),
            1 => Some(Self::Member),
            2 => Some(Self::Moderator),
            3 => Some(Self::Owner),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn is_banned(self) -> bool {
        self == Self::Banned
    }

    pub fn is_member(self) -> bool {
        self >= Self::Member
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Banned => "banned",
            Self::None => "none",
            Self::Member => "member",
            Self::Moderator => "moderator",
            Self::Owner => "owner",
        };
        f.write_str(name)
    }
}

/// The parts of a signed-in user the kernel looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub open_to_non_members: bool,
    pub open_to_anonymous: bool,
}

/// What the kernel needs to know about one viewer in one thread. Build it
/// with [`Access::new`] so an anonymous viewer always has rank `None`.
#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub actor: Option<Actor>,
    pub rank: Rank,
    pub visibility: Visibility,
}

impl Access {
    pub fn new(actor: Option<Actor>, rank: Rank, visibility: Visibility) -> Self {
        let rank = if actor.is_some() { rank } else { Rank::None };
        Self {
            actor,
            rank,
            visibility,
        }
    }

    fn verified(&self) -> bool {
        self.actor.is_some_and(|a| a.verified)
    }

    fn is_actor(&self, user_id: i64) -> bool {
        self.actor.is_some_and(|a| a.id == user_id)
    }

    pub fn can_read(&self) -> bool {
        self.rank >= Rank::None
            && (self.rank >= Rank::Member
                || self.visibility.open_to_non_members
                || (self.actor.is_none() && self.visibility.open_to_anonymous))
    }

    pub fn can_write(&self) -> bool {
        self.verified() && self.rank >= Rank::Member
    }

    /// Editing and deleting posts or comments share one rule.
    pub fn can_modify(&self, author_id: i64) -> bool {
        self.can_write() && (self.is_actor(author_id) || self.rank >= Rank::Moderator)
    }

    pub fn can_edit_post(&self, author_id: i64) -> bool {
        self.can_modify(author_id)
    }

    pub fn can_delete_post(&self, author_id: i64) -> bool {
        self.can_modify(author_id)
    }

    pub fn can_edit_comment(&self, author_id: i64) -> bool {
        self.can_modify(author_id)
    }

    pub fn can_delete_comment(&self, author_id: i64) -> bool {
        self.can_modify(author_id)
    }

    pub fn can_ban(&self) -> bool {
        self.rank >= Rank::Moderator
    }

    pub fn can_resolve_report(&self) -> bool {
        self.rank >= Rank::Moderator
    }

    pub fn can_list_reports(&self) -> bool {
        self.rank >= Rank::Moderator
    }

    pub fn can_manage_tags(&self) -> bool {
        self.rank == Rank::Owner
    }

    pub fn can_edit_thread_config(&self) -> bool {
        self.rank == Rank::Owner
    }

    pub fn can_manage_moderators(&self) -> bool {
        self.rank == Rank::Owner
    }
}

/// Semantic kind of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Avatar,
    Icon,
    Banner,
    PostMedia,
}

impl MediaKind {
    /// Path segment used by the upload endpoint.
    pub fn from_route(segment: &str) -> Option<Self> {
        match segment {
            "avatar" => Some(Self::Avatar),
            "icon" => Some(Self::Icon),
            "banner" => Some(Self::Banner),
            "postMedia" | "post-media" => Some(Self::PostMedia),
            _ => None,
        }
    }

    /// Value persisted in `media_links.kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Icon => "icon",
            Self::Banner => "banner",
            Self::PostMedia => "post-media",
        }
    }

    pub fn needs_thread(self) -> bool {
        matches!(self, Self::Icon | Self::Banner)
    }
}

/// `access` is the uploader's standing in the target thread; it is ignored
/// for avatars, which only need a verified account.
pub fn can_upload_as(kind: MediaKind, actor: Option<Actor>, access: Option<&Access>) -> bool {
    let verified = actor.is_some_and(|a| a.verified);
    match kind {
        MediaKind::Avatar => verified,
        MediaKind::Icon | MediaKind::Banner => {
            verified && access.is_some_and(|a| a.rank == Rank::Owner)
        }
        MediaKind::PostMedia => match access {
            Some(a) => a.can_write(),
            None => verified,
        },
    }
}
