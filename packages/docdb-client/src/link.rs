//! Resource link construction and parsing.
//!
//! Links follow the service's addressing scheme: alternating resource-type
//! segments and ids, e.g. `dbs/{db}/colls/{coll}/docs/{doc}`. Self-links
//! returned by the service use rids instead of ids and may carry a trailing
//! slash; every function here accepts either form. Id and rid segments are
//! never mixed in one link.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{ClientError, Result};

/// Kinds of addressable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Database,
    Collection,
    Document,
    StoredProcedure,
    User,
    Permission,
}

impl ResourceKind {
    /// Path segment naming this kind.
    pub fn segment(self) -> &'static str {
        match self {
            ResourceKind::Database => "dbs",
            ResourceKind::Collection => "colls",
            ResourceKind::Document => "docs",
            ResourceKind::StoredProcedure => "sprocs",
            ResourceKind::User => "users",
            ResourceKind::Permission => "permissions",
        }
    }

    /// Key holding the item array in a feed response body.
    pub fn feed_key(self) -> &'static str {
        match self {
            ResourceKind::Database => "Databases",
            ResourceKind::Collection => "DocumentCollections",
            ResourceKind::Document => "Documents",
            ResourceKind::StoredProcedure => "StoredProcedures",
            ResourceKind::User => "Users",
            ResourceKind::Permission => "Permissions",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "dbs" => Some(ResourceKind::Database),
            "colls" => Some(ResourceKind::Collection),
            "docs" => Some(ResourceKind::Document),
            "sprocs" => Some(ResourceKind::StoredProcedure),
            "users" => Some(ResourceKind::User),
            "permissions" => Some(ResourceKind::Permission),
            _ => None,
        }
    }
}

/// Strips leading and trailing slashes.
pub fn trim_link(link: &str) -> &str {
    link.trim_matches('/')
}

/// Appends `{kind}/{id}` to a parent link.
pub fn child_link(parent: &str, kind: ResourceKind, id: &str) -> String {
    let parent = trim_link(parent);
    if parent.is_empty() {
        format!("{}/{}", kind.segment(), id)
    } else {
        format!("{}/{}/{}", parent, kind.segment(), id)
    }
}

/// Appends the feed segment for `kind` to a parent link.
pub fn feed_link(parent: &str, kind: ResourceKind) -> String {
    let parent = trim_link(parent);
    if parent.is_empty() {
        kind.segment().to_string()
    } else {
        format!("{}/{}", parent, kind.segment())
    }
}

pub fn database_link(database_id: &str) -> String {
    child_link("", ResourceKind::Database, database_id)
}

pub fn collection_link(database_id: &str, collection_id: &str) -> String {
    child_link(
        &database_link(database_id),
        ResourceKind::Collection,
        collection_id,
    )
}

pub fn document_link(database_id: &str, collection_id: &str, document_id: &str) -> String {
    child_link(
        &collection_link(database_id, collection_id),
        ResourceKind::Document,
        document_id,
    )
}

pub fn stored_procedure_link(database_id: &str, collection_id: &str, procedure_id: &str) -> String {
    child_link(
        &collection_link(database_id, collection_id),
        ResourceKind::StoredProcedure,
        procedure_id,
    )
}

pub fn user_link(database_id: &str, user_id: &str) -> String {
    child_link(&database_link(database_id), ResourceKind::User, user_id)
}

pub fn permission_link(database_id: &str, user_id: &str, permission_id: &str) -> String {
    child_link(
        &user_link(database_id, user_id),
        ResourceKind::Permission,
        permission_id,
    )
}

/// True when `segment` is a database rid: eight base64 characters, with `-`
/// in place of `/`, decoding to four bytes.
pub fn is_database_rid(segment: &str) -> bool {
    segment.len() == 8
        && STANDARD
            .decode(segment.replace('-', "/"))
            .map(|bytes| bytes.len() == 4)
            .unwrap_or(false)
}

/// A parsed resource path.
///
/// Paths with an odd number of segments address a feed (`dbs/x/colls`),
/// paths with an even number address a single item (`dbs/x/colls/y`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    segments: Vec<String>,
    kind: ResourceKind,
    is_feed: bool,
}

impl ResourcePath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = trim_link(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return Err(ClientError::InvalidLink(path.to_string()));
        }

        for (index, segment) in segments.iter().enumerate() {
            if index % 2 == 0 && ResourceKind::from_segment(segment).is_none() {
                return Err(ClientError::InvalidLink(path.to_string()));
            }
        }

        let is_feed = segments.len() % 2 == 1;
        let kind_index = if is_feed {
            segments.len() - 1
        } else {
            segments.len() - 2
        };
        let kind = ResourceKind::from_segment(&segments[kind_index])
            .ok_or_else(|| ClientError::InvalidLink(path.to_string()))?;

        Ok(Self {
            segments,
            kind,
            is_feed,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_feed(&self) -> bool {
        self.is_feed
    }

    /// Resource type used when signing the request.
    pub fn resource_type(&self) -> &'static str {
        self.kind.segment()
    }

    /// True when the path addresses resources by rid rather than id.
    pub fn is_rid_based(&self) -> bool {
        self.segments
            .get(1)
            .map_or(false, |segment| is_database_rid(segment))
    }

    /// Resource link used when signing the request: the item itself, or the
    /// parent of a feed. Rid-based paths sign only the lowercased rid.
    pub fn resource_link(&self) -> String {
        let addressed = if self.is_feed {
            &self.segments[..self.segments.len() - 1]
        } else {
            &self.segments[..]
        };
        if self.is_rid_based() {
            addressed
                .last()
                .map(|rid| rid.to_lowercase())
                .unwrap_or_default()
        } else {
            addressed.join("/")
        }
    }

    /// Full path without surrounding slashes.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }

    /// Id following the segment for `kind`, if the path contains it.
    pub fn id_of(&self, kind: ResourceKind) -> Option<&str> {
        self.segments
            .chunks(2)
            .find(|pair| pair[0] == kind.segment())
            .and_then(|pair| pair.get(1))
            .map(String::as_str)
    }

    /// Id segments from the deepest to the shallowest.
    pub fn ids_deepest_first(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(index, _)| index % 2 == 1)
            .map(|(_, segment)| segment.as_str())
            .rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_id_links() {
        assert_eq!(database_link("ToDoList"), "dbs/ToDoList");
        assert_eq!(collection_link("ToDoList", "Items"), "dbs/ToDoList/colls/Items");
        assert_eq!(
            document_link("ToDoList", "Items", "d1"),
            "dbs/ToDoList/colls/Items/docs/d1"
        );
        assert_eq!(
            stored_procedure_link("ToDoList", "Items", "getAllDocs"),
            "dbs/ToDoList/colls/Items/sprocs/getAllDocs"
        );
        assert_eq!(
            permission_link("ToDoList", "testuser", "p"),
            "dbs/ToDoList/users/testuser/permissions/p"
        );
    }

    #[test]
    fn child_link_accepts_self_links_with_trailing_slash() {
        assert_eq!(
            child_link("dbs/a/colls/b/", ResourceKind::Document, "c"),
            "dbs/a/colls/b/docs/c"
        );
        assert_eq!(
            feed_link("/dbs/a/users/u/", ResourceKind::Permission),
            "dbs/a/users/u/permissions"
        );
    }

    #[test]
    fn parses_feed_paths() {
        let path = ResourcePath::parse("dbs/a/colls/b/docs").unwrap();
        assert!(path.is_feed());
        assert_eq!(path.kind(), ResourceKind::Document);
        assert_eq!(path.resource_type(), "docs");
        assert_eq!(path.resource_link(), "dbs/a/colls/b");

        let root = ResourcePath::parse("dbs").unwrap();
        assert!(root.is_feed());
        assert_eq!(root.resource_link(), "");
    }

    #[test]
    fn parses_item_paths() {
        let path = ResourcePath::parse("/dbs/a/colls/b/sprocs/s/").unwrap();
        assert!(!path.is_feed());
        assert_eq!(path.kind(), ResourceKind::StoredProcedure);
        assert_eq!(path.resource_link(), "dbs/a/colls/b/sprocs/s");
        assert_eq!(path.id_of(ResourceKind::Collection), Some("b"));
        assert_eq!(path.id_of(ResourceKind::User), None);
        let ids: Vec<&str> = path.ids_deepest_first().collect();
        assert_eq!(ids, vec!["s", "b", "a"]);
    }

    #[test]
    fn rid_based_paths_sign_the_lowercased_rid() {
        assert!(is_database_rid("XP0mAA=="));
        assert!(!is_database_rid("ToDoList"));
        assert!(!is_database_rid("abc"));

        let feed = ResourcePath::parse("dbs/XP0mAA==/colls/XP0mAJ3H-AA=/docs").unwrap();
        assert!(feed.is_rid_based());
        assert_eq!(feed.resource_type(), "docs");
        assert_eq!(feed.resource_link(), "xp0maj3h-aa=");

        let item = ResourcePath::parse("dbs/XP0mAA==/colls/XP0mAJ3H-AA=/").unwrap();
        assert_eq!(item.resource_link(), "xp0maj3h-aa=");

        let by_id = ResourcePath::parse("dbs/ToDoList/colls/Items/docs").unwrap();
        assert!(!by_id.is_rid_based());
        assert_eq!(by_id.resource_link(), "dbs/ToDoList/colls/Items");
    }

    #[test]
    fn rejects_unknown_segments() {
        assert!(ResourcePath::parse("").is_err());
        assert!(ResourcePath::parse("tables/a").is_err());
        assert!(ResourcePath::parse("dbs/a/rows/b").is_err());
    }
}
