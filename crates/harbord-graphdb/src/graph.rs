//! File-backed name graph.
//!
//! The graph is held in memory behind a reader/writer lock and written
//! through to disk on every mutation. A mutation is applied to a copy of the
//! state, the copy is persisted (temp file + rename), and only then swapped
//! in, so a failed write leaves both the file and the in-memory graph
//! untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Identifier of the root entity that every top-level name hangs off.
pub const ROOT_ID: &str = "0";

/// A node in the graph, referring to a container identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: String,
}

impl Entity {
    fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Returns the identifier the entity refers to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A named edge from a parent entity to a child entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Child entity.
    pub entity_id: String,
    /// Last path segment.
    pub name: String,
    /// Parent entity.
    pub parent_id: String,
}

/// One step of a traversal.
#[derive(Debug, Clone)]
pub struct WalkMeta {
    /// Entity the edge starts from.
    pub parent: Entity,
    /// Entity the edge points to.
    pub entity: Entity,
    /// Full path of `entity` along this traversal.
    pub full_path: String,
    /// The traversed edge.
    pub edge: Edge,
}

/// Entities keyed by full path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entities(BTreeMap<String, Entity>);

impl Entities {
    /// Returns all paths, shallowest first, ties in lexical order.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.0.keys().map(String::as_str).collect();
        paths.sort_by_key(|p| (depth_of(p), *p));
        paths
    }

    /// Returns the entity at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Entity> {
        self.0.get(path)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(path, entity)` pairs in lexical path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entity)> {
        self.0.iter().map(|(p, e)| (p.as_str(), e))
    }
}

fn depth_of(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Serialized form of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphState {
    entities: BTreeSet<String>,
    /// parent id -> edge name -> child id
    edges: BTreeMap<String, BTreeMap<String, String>>,
}

impl GraphState {
    fn with_root() -> Self {
        let mut state = Self::default();
        state.entities.insert(ROOT_ID.to_string());
        state
    }

    fn resolve(&self, path: &str) -> Option<String> {
        let mut current = ROOT_ID.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.edges.get(&current)?.get(segment)?.clone();
        }
        Some(current)
    }

    fn collect_children(
        &self,
        parent_id: &str,
        parent_path: &str,
        depth: Option<usize>,
        visiting: &mut Vec<String>,
        out: &mut Vec<WalkMeta>,
    ) {
        let Some(edges) = self.edges.get(parent_id) else {
            return;
        };
        visiting.push(parent_id.to_string());

        for (name, child_id) in edges {
            let full_path = join(parent_path, name);
            out.push(WalkMeta {
                parent: Entity::new(parent_id),
                entity: Entity::new(child_id.clone()),
                full_path: full_path.clone(),
                edge: Edge {
                    entity_id: child_id.clone(),
                    name: name.clone(),
                    parent_id: parent_id.to_string(),
                },
            });

            let next = match depth {
                Some(0) => continue,
                Some(n) => Some(n - 1),
                None => None,
            };
            // Links may form cycles; never re-enter an entity on the current branch.
            if !visiting.iter().any(|v| v == child_id) {
                self.collect_children(child_id, &full_path, next, visiting, out);
            }
        }

        visiting.pop();
    }

    /// Top-level names bound to `id`.
    fn root_names(&self, id: &str) -> Vec<String> {
        self.edges
            .get(ROOT_ID)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(_, child)| child.as_str() == id)
                    .map(|(name, _)| join("/", name))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Normalizes an absolute path: collapses repeated and trailing slashes.
fn clean(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(GraphError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    Ok(format!("/{}", segments.join("/")))
}

/// Splits an absolute path into its parent path and last segment.
fn split(path: &str) -> Result<(String, String)> {
    let cleaned = clean(path)?;
    match cleaned.rsplit_once('/') {
        Some((_, "")) | None => Err(GraphError::InvalidPath(path.to_string())),
        Some(("", name)) => Ok(("/".to_string(), name.to_string())),
        Some((parent, name)) => Ok((parent.to_string(), name.to_string())),
    }
}

/// Persisted name graph.
///
/// Internally synchronized: every method takes `&self` and the database can
/// be shared across threads behind an `Arc`.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    state: RwLock<GraphState>,
}

impl Database {
    /// Opens the graph stored at `path`, creating it (and its parent
    /// directory) if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, decoded, or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let raw = fs::read(&path).map_err(|e| GraphError::io(&path, e))?;
            let mut state: GraphState =
                serde_json::from_slice(&raw).map_err(|e| GraphError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            state.entities.insert(ROOT_ID.to_string());
            tracing::debug!(path = %path.display(), entities = state.entities.len(), "opened name graph");
            state
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| GraphError::io(parent, e))?;
            }
            let state = GraphState::with_root();
            persist(&path, &state)?;
            tracing::debug!(path = %path.display(), "created name graph");
            state
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Returns the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds `full_path` to the entity `id`.
    ///
    /// The parent path must already exist. Binding a name to the id it is
    /// already bound to succeeds and changes nothing.
    ///
    /// # Errors
    /// - [`GraphError::NonUniqueName`] if the name is bound to another id.
    /// - [`GraphError::NotFound`] if the parent path does not exist.
    /// - [`GraphError::InvalidPath`] for relative paths or `/`.
    pub fn set(&self, full_path: &str, id: &str) -> Result<Entity> {
        let (parent_path, name) = split(full_path)?;
        let mut state = self.state.write();

        if let Some(existing) = state.resolve(&join(&parent_path, &name)) {
            if existing == id {
                return Ok(Entity::new(existing));
            }
            return Err(GraphError::NonUniqueName(full_path.to_string()));
        }

        let parent_id = state
            .resolve(&parent_path)
            .ok_or_else(|| GraphError::NotFound(parent_path.clone()))?;

        let mut next = state.clone();
        next.entities.insert(id.to_string());
        next.edges
            .entry(parent_id)
            .or_default()
            .insert(name, id.to_string());
        persist(&self.path, &next)?;
        *state = next;

        Ok(Entity::new(id))
    }

    /// Returns the entity at `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Entity> {
        let cleaned = clean(name).ok()?;
        self.state.read().resolve(&cleaned).map(Entity::new)
    }

    /// Returns true if `name` resolves to an entity.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the descendants of `name` in depth-first order.
    ///
    /// `depth` limits recursion: `Some(0)` yields direct children only,
    /// `Some(n)` descends `n` further levels, `None` is unbounded.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] if `name` does not resolve.
    pub fn children(&self, name: &str, depth: Option<usize>) -> Result<Vec<WalkMeta>> {
        let cleaned = clean(name)?;
        let state = self.state.read();
        let id = state
            .resolve(&cleaned)
            .ok_or_else(|| GraphError::NotFound(cleaned.clone()))?;

        let mut out = Vec::new();
        state.collect_children(&id, &cleaned, depth, &mut Vec::new(), &mut out);
        Ok(out)
    }

    /// Calls `visit` for every descendant of `name`, stopping at the first
    /// error.
    ///
    /// The traversal is snapshotted before `visit` runs, so the callback may
    /// freely call back into the database.
    ///
    /// # Errors
    /// Returns the first error produced by `visit`, or a lookup error for
    /// `name` converted into `E`.
    pub fn walk<E, F>(&self, name: &str, depth: Option<usize>, mut visit: F) -> std::result::Result<(), E>
    where
        E: From<GraphError>,
        F: FnMut(&str, &Entity) -> std::result::Result<(), E>,
    {
        for meta in self.children(name, depth)? {
            visit(&meta.full_path, &meta.entity)?;
        }
        Ok(())
    }

    /// Returns every entity below `name`, keyed by full path. Unknown names
    /// yield an empty set.
    #[must_use]
    pub fn list(&self, name: &str, depth: Option<usize>) -> Entities {
        let entities: BTreeMap<String, Entity> = self
            .children(name, depth)
            .map(|metas| {
                metas
                    .into_iter()
                    .map(|m| (m.full_path, m.entity))
                    .collect()
            })
            .unwrap_or_default();
        Entities(entities)
    }

    /// Returns the top-level names of the entities that hold an edge to
    /// the entity at `name`.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] if `name` does not resolve.
    pub fn parents(&self, name: &str) -> Result<Vec<String>> {
        let cleaned = clean(name)?;
        let state = self.state.read();
        let id = state
            .resolve(&cleaned)
            .ok_or_else(|| GraphError::NotFound(cleaned.clone()))?;

        let mut parents = BTreeSet::new();
        for (parent_id, edges) in &state.edges {
            if parent_id == ROOT_ID || !edges.values().any(|child| *child == id) {
                continue;
            }
            parents.extend(state.root_names(parent_id));
        }
        Ok(parents.into_iter().collect())
    }

    /// Number of edges pointing at `id`.
    #[must_use]
    pub fn refs(&self, id: &str) -> usize {
        self.state
            .read()
            .edges
            .values()
            .map(|edges| edges.values().filter(|child| child.as_str() == id).count())
            .sum()
    }

    /// Removes the edge named by `name`. The entity itself is kept.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] if no such edge exists.
    pub fn delete(&self, name: &str) -> Result<()> {
        let (parent_path, edge_name) = split(name)?;
        let mut state = self.state.write();

        let parent_id = state
            .resolve(&parent_path)
            .ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        if state.edges.get(&parent_id).and_then(|e| e.get(&edge_name)).is_none() {
            return Err(GraphError::NotFound(name.to_string()));
        }

        let mut next = state.clone();
        if let Some(edges) = next.edges.get_mut(&parent_id) {
            edges.remove(&edge_name);
            if edges.is_empty() {
                next.edges.remove(&parent_id);
            }
        }
        persist(&self.path, &next)?;
        *state = next;
        Ok(())
    }

    /// Removes the entity `id` together with every edge to or from it.
    /// Returns the number of edges removed.
    ///
    /// # Errors
    /// Returns an error if the updated graph cannot be written.
    pub fn purge(&self, id: &str) -> Result<usize> {
        if id == ROOT_ID {
            return Err(GraphError::InvalidPath("/".to_string()));
        }
        let mut state = self.state.write();
        if !state.entities.contains(id) {
            return Ok(0);
        }

        let mut next = state.clone();
        let mut removed = next.edges.remove(id).map_or(0, |edges| edges.len());
        for edges in next.edges.values_mut() {
            let before = edges.len();
            edges.retain(|_, child| child.as_str() != id);
            removed += before - edges.len();
        }
        next.edges.retain(|_, edges| !edges.is_empty());
        next.entities.remove(id);

        persist(&self.path, &next)?;
        *state = next;
        tracing::debug!(id = %id, edges = removed, "purged entity from name graph");
        Ok(removed)
    }

    /// Flushes the current graph to disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn close(&self) -> Result<()> {
        let state = self.state.read();
        persist(&self.path, &state)
    }
}

fn persist(path: &Path, state: &GraphState) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(state).map_err(|e| GraphError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(|e| GraphError::io(&tmp, e))?;
    file.write_all(&encoded).map_err(|e| GraphError::io(&tmp, e))?;
    file.sync_all().map_err(|e| GraphError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| GraphError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("linkgraph.json")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_open_creates_file_with_root() {
        let (dir, db) = open_temp();
        assert!(dir.path().join("linkgraph.json").exists());
        assert_eq!(db.get("/").unwrap().id(), ROOT_ID);
    }

    #[test]
    fn test_set_and_get() {
        let (_dir, db) = open_temp();
        let entity = db.set("/web", "abc123").unwrap();
        assert_eq!(entity.id(), "abc123");
        assert_eq!(db.get("/web").unwrap().id(), "abc123");
        assert!(db.exists("/web"));
        assert!(!db.exists("/db"));
    }

    #[test]
    fn test_set_normalizes_slashes() {
        let (_dir, db) = open_temp();
        db.set("//web/", "abc123").unwrap();
        assert_eq!(db.get("/web").unwrap().id(), "abc123");
    }

    #[test]
    fn test_set_same_id_is_idempotent() {
        let (_dir, db) = open_temp();
        db.set("/web", "abc123").unwrap();
        assert!(db.set("/web", "abc123").is_ok());
        assert_eq!(db.refs("abc123"), 1);
    }

    #[test]
    fn test_set_conflicting_id_fails() {
        let (_dir, db) = open_temp();
        db.set("/web", "abc123").unwrap();
        let err = db.set("/web", "def456").unwrap_err();
        assert!(err.is_non_unique_name());
        assert_eq!(db.get("/web").unwrap().id(), "abc123");
    }

    #[test]
    fn test_set_requires_parent() {
        let (_dir, db) = open_temp();
        let err = db.set("/missing/alias", "abc123").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_set_rejects_root_and_relative() {
        let (_dir, db) = open_temp();
        assert!(matches!(db.set("/", "x"), Err(GraphError::InvalidPath(_))));
        assert!(matches!(db.set("web", "x"), Err(GraphError::InvalidPath(_))));
        assert!(db.get("web").is_none());
    }

    #[test]
    fn test_children_depth() {
        let (_dir, db) = open_temp();
        db.set("/web", "w").unwrap();
        db.set("/db", "d").unwrap();
        db.set("/cache", "c").unwrap();
        db.set("/web/db", "d").unwrap();
        db.set("/db/cache", "c").unwrap();

        let direct = db.children("/web", Some(0)).unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].full_path, "/web/db");
        assert_eq!(direct[0].entity.id(), "d");
        assert_eq!(direct[0].parent.id(), "w");

        let all = db.children("/web", None).unwrap();
        let paths: Vec<_> = all.iter().map(|m| m.full_path.as_str()).collect();
        assert_eq!(paths, vec!["/web/db", "/web/db/cache"]);
    }

    #[test]
    fn test_children_unknown_name() {
        let (_dir, db) = open_temp();
        assert!(db.children("/nope", None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_unbounded_walk_terminates_on_cycle() {
        let (_dir, db) = open_temp();
        db.set("/a", "a").unwrap();
        db.set("/b", "b").unwrap();
        db.set("/a/b", "b").unwrap();
        db.set("/b/a", "a").unwrap();

        let all = db.children("/a", None).unwrap();
        let paths: Vec<_> = all.iter().map(|m| m.full_path.as_str()).collect();
        assert_eq!(paths, vec!["/a/b", "/a/b/a"]);
    }

    #[test]
    fn test_walk_propagates_first_error() {
        let (_dir, db) = open_temp();
        db.set("/web", "w").unwrap();
        db.set("/a", "a").unwrap();
        db.set("/b", "b").unwrap();
        db.set("/web/a", "a").unwrap();
        db.set("/web/b", "b").unwrap();

        let mut seen = Vec::new();
        let result: std::result::Result<(), GraphError> = db.walk("/web", Some(0), |path, _| {
            seen.push(path.to_string());
            Err(GraphError::NotFound(path.to_string()))
        });
        assert!(result.is_err());
        assert_eq!(seen, vec!["/web/a"]);
    }

    #[test]
    fn test_list_from_root() {
        let (_dir, db) = open_temp();
        db.set("/web", "w").unwrap();
        db.set("/db", "d").unwrap();
        db.set("/web/db", "d").unwrap();

        let entities = db.list("/", None);
        assert_eq!(entities.len(), 3);
        assert_eq!(entities.paths(), vec!["/db", "/web", "/web/db"]);
        assert_eq!(entities.get("/web/db").unwrap().id(), "d");
        assert!(db.list("/unknown", None).is_empty());
    }

    #[test]
    fn test_parents() {
        let (_dir, db) = open_temp();
        db.set("/web", "w").unwrap();
        db.set("/api", "a").unwrap();
        db.set("/db", "d").unwrap();
        db.set("/web/db", "d").unwrap();
        db.set("/api/database", "d").unwrap();

        assert_eq!(db.parents("/db").unwrap(), vec!["/api", "/web"]);
        assert!(db.parents("/web").unwrap().is_empty());
    }

    #[test]
    fn test_delete_edge() {
        let (_dir, db) = open_temp();
        db.set("/web", "w").unwrap();
        db.set("/db", "d").unwrap();
        db.set("/web/db", "d").unwrap();

        db.delete("/web/db").unwrap();
        assert!(!db.exists("/web/db"));
        assert!(db.exists("/db"));
        assert!(db.delete("/web/db").unwrap_err().is_not_found());
    }

    #[test]
    fn test_purge_removes_all_edges() {
        let (_dir, db) = open_temp();
        db.set("/web", "w").unwrap();
        db.set("/db", "d").unwrap();
        db.set("/web/db", "d").unwrap();

        assert_eq!(db.purge("d").unwrap(), 2);
        assert!(!db.exists("/db"));
        assert!(!db.exists("/web/db"));
        assert_eq!(db.refs("d"), 0);
        assert_eq!(db.purge("d").unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkgraph.json");
        {
            let db = Database::open(&path).unwrap();
            db.set("/web", "w").unwrap();
            db.set("/db", "d").unwrap();
            db.set("/web/db", "d").unwrap();
            db.close().unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get("/web/db").unwrap().id(), "d");
        assert_eq!(db.list("/", None).len(), 3);
    }

    #[test]
    fn test_open_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkgraph.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(Database::open(&path), Err(GraphError::Corrupt { .. })));
    }

    proptest! {
        #[test]
        fn prop_bound_names_resolve(names in proptest::collection::btree_set("[a-z][a-z0-9_]{0,12}", 1..16)) {
            let (_dir, db) = open_temp();
            for (i, name) in names.iter().enumerate() {
                db.set(&format!("/{name}"), &format!("id{i}")).unwrap();
            }
            for (i, name) in names.iter().enumerate() {
                let expected = format!("id{i}");
                prop_assert_eq!(db.get(&format!("/{name}")).map(|e| e.id().to_string()), Some(expected));
            }
            prop_assert_eq!(db.list("/", Some(0)).len(), names.len());
        }
    }
}
