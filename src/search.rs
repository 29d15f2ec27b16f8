//! Search boundary: translates a structured field-query AST into a
//! storage-layer predicate, per spec.md §4.5.
//!
//! Grounded in `original_source/core/search/search.py`'s
//! `SQLQueryBuilder(LuceneTreeVisitorV2)`: the same visitor shape (one
//! method per node kind), the same two boundary errors
//! (`field-required`, wildcards rejected inside a range), and the same
//! `(type, field-name)` mapper registry with dotted-path redirection. The
//! Python original compiles to a SQLAlchemy filter; here each field mapper
//! compiles directly to a predicate over one object's LMDB-backed state,
//! since there is no relational query planner underneath.

use std::collections::HashMap;
use std::sync::Arc;

use heed::RoTxn;

use crate::db::Dbs;
use crate::error::{CapError, Result};

/// A leaf value: a bare word, a quoted phrase, or a `[low TO high]` range.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Word(String),
    Phrase(String),
    Range { low: Option<String>, high: Option<String> },
}

impl FieldValue {
    fn has_wildcard(&self) -> bool {
        match self {
            FieldValue::Word(w) => w.contains('*') || w.contains('?'),
            FieldValue::Phrase(_) => false,
            FieldValue::Range { low, high } => {
                low.as_deref().is_some_and(|s| s.contains('*') || s.contains('?'))
                    || high.as_deref().is_some_and(|s| s.contains('*') || s.contains('?'))
            }
        }
    }
}

/// Anchored `*`/`?` glob match — `*` any run of characters, `?` exactly
/// one. A phrase never reaches this; only a bare word resolves wildcards
/// (spec.md §4.5's "strip phrase delimiters and resolve wildcards
/// per-field").
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..])),
        Some('?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && glob_match(&pattern[1..], &text[1..]),
    }
}

/// Resolve a leaf value against one candidate string: a phrase matches
/// exactly, a word resolves `*`/`?` wildcards (or matches exactly when it
/// has none).
fn value_matches(value: &FieldValue, candidate: &str) -> bool {
    match value {
        FieldValue::Phrase(p) => p == candidate,
        FieldValue::Word(w) => {
            let pattern: Vec<char> = w.chars().collect();
            let text: Vec<char> = candidate.chars().collect();
            glob_match(&pattern, &text)
        }
        FieldValue::Range { .. } => false,
    }
}

/// The query AST, mirroring the node kinds spec.md §4.5 names.
#[derive(Debug, Clone)]
pub enum AstNode {
    And(Box<AstNode>, Box<AstNode>),
    Or(Box<AstNode>, Box<AstNode>),
    Not(Box<AstNode>),
    Prohibit(Box<AstNode>),
    Group(Box<AstNode>),
    /// A bare term with no field selector — always rejected; terms are
    /// only meaningful inside a `SearchField`.
    Term(FieldValue),
    SearchField { name: String, value: Box<AstNode> },
}

/// A compiled, evaluable condition over one object's stored state.
pub type Predicate = Arc<dyn Fn(&Dbs, &RoTxn, u64) -> Result<bool> + Send + Sync>;

/// What a field mapper produces: either a terminal predicate, or a
/// redirect to a different object type for the unconsumed dotted-path
/// remainder (spec.md §4.5's "supporting dotted sub-field access").
pub enum MapperOutcome {
    Predicate(Predicate),
    Redirect { type_: String, remainder: String },
}

pub trait FieldMapper: Send + Sync {
    fn resolve(&self, remainder: &str, value: &FieldValue) -> Result<MapperOutcome>;
}

#[derive(Default)]
pub struct FieldMapperRegistry {
    mappers: HashMap<(String, String), Arc<dyn FieldMapper>>,
}

impl FieldMapperRegistry {
    pub fn register(&mut self, type_: &str, field: &str, mapper: Arc<dyn FieldMapper>) {
        self.mappers.insert((type_.to_string(), field.to_string()), mapper);
    }

    fn lookup(&self, type_: &str, field: &str) -> Option<&Arc<dyn FieldMapper>> {
        self.mappers.get(&(type_.to_string(), field.to_string()))
    }
}

/// Match on `Object.dhash`, wildcard-aware for a bare word.
pub struct DhashMapper;
impl FieldMapper for DhashMapper {
    fn resolve(&self, _remainder: &str, value: &FieldValue) -> Result<MapperOutcome> {
        if let FieldValue::Range { .. } = value {
            return Err(CapError::unsupported_grammar("dhash is not a range field"));
        }
        let value = value.clone();
        Ok(MapperOutcome::Predicate(Arc::new(move |dbs, tx, object_id| {
            let Some(object) = dbs.objects.get(tx, &object_id).map_err(crate::error::err)? else {
                return Ok(false);
            };
            Ok(value_matches(&value, &object.dhash))
        })))
    }
}

/// Whether the object carries a tag matching the given name, wildcard-aware.
pub struct TagMapper;
impl FieldMapper for TagMapper {
    fn resolve(&self, _remainder: &str, value: &FieldValue) -> Result<MapperOutcome> {
        if let FieldValue::Range { .. } = value {
            return Err(CapError::unsupported_grammar("tag is not a range field"));
        }
        let value = value.clone();
        Ok(MapperOutcome::Predicate(Arc::new(move |dbs, tx, object_id| {
            for tag_id in dbs.object_tags.list_fwd(tx, object_id)? {
                if let Some(tag) = dbs.tags.get(tx, &tag_id).map_err(crate::error::err)? {
                    if value_matches(&value, &tag.name) {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        })))
    }
}

/// Whether any comment on the object has a word matching the given
/// pattern (wildcard-aware), or contains the given substring when the
/// value carries no wildcard.
pub struct CommentMapper;
impl FieldMapper for CommentMapper {
    fn resolve(&self, _remainder: &str, value: &FieldValue) -> Result<MapperOutcome> {
        if let FieldValue::Range { .. } = value {
            return Err(CapError::unsupported_grammar("comment is not a range field"));
        }
        let value = value.clone();
        Ok(MapperOutcome::Predicate(Arc::new(move |dbs, tx, object_id| {
            for comment_id in dbs.comments_by_object.list_fwd(tx, object_id)? {
                if let Some(comment) = dbs.comments.get(tx, &comment_id).map_err(crate::error::err)? {
                    if value.has_wildcard() {
                        if comment.comment.split_whitespace().any(|word| value_matches(&value, word)) {
                            return Ok(true);
                        }
                    } else {
                        let needle = match &value {
                            FieldValue::Word(w) | FieldValue::Phrase(w) => w,
                            FieldValue::Range { .. } => unreachable!(),
                        };
                        if comment.comment.contains(needle.as_str()) {
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        })))
    }
}

/// Equality on a single-valued typed attribute, addressed as `meta.<key>`,
/// wildcard-aware for a bare word.
pub struct MetakeyMapper;
impl FieldMapper for MetakeyMapper {
    fn resolve(&self, remainder: &str, value: &FieldValue) -> Result<MapperOutcome> {
        if let FieldValue::Range { .. } = value {
            return Err(CapError::unsupported_grammar("metakeys are not range fields"));
        }
        let value = value.clone();
        let key_name = remainder.to_string();
        Ok(MapperOutcome::Predicate(Arc::new(move |dbs, tx, object_id| {
            let Some(def_id) = dbs.metakey_def_name_index.get(tx, &key_name).map_err(crate::error::err)? else {
                return Ok(false);
            };
            let k = crate::db::key(object_id, def_id);
            let Some(values) = dbs.metakeys.get(tx, &k).map_err(crate::error::err)? else {
                return Ok(false);
            };
            Ok(values.values.iter().any(|v| value_matches(&value, v)))
        })))
    }
}

/// Build the default registry for the object types this crate knows about.
pub fn default_registry() -> FieldMapperRegistry {
    let mut registry = FieldMapperRegistry::default();
    for type_ in ["object", "file", "static_config", "blob"] {
        registry.register(type_, "dhash", Arc::new(DhashMapper));
        registry.register(type_, "tag", Arc::new(TagMapper));
        registry.register(type_, "comment", Arc::new(CommentMapper));
        registry.register(type_, "meta", Arc::new(MetakeyMapper));
    }
    registry
}

/// Compile an AST into a single predicate. `queried_type` is the object
/// type the outermost query is scoped to; a field mapper may redirect it
/// for a dotted sub-path.
pub fn compile(node: &AstNode, queried_type: &str, registry: &FieldMapperRegistry) -> Result<Predicate> {
    match node {
        AstNode::Term(_) => Err(CapError::field_not_queryable("term used outside a field selector")),
        AstNode::Group(inner) => compile(inner, queried_type, registry),
        AstNode::And(l, r) => {
            let (l, r) = (compile(l, queried_type, registry)?, compile(r, queried_type, registry)?);
            Ok(Arc::new(move |dbs, tx, id| Ok(l(dbs, tx, id)? && r(dbs, tx, id)?)))
        }
        AstNode::Or(l, r) => {
            let (l, r) = (compile(l, queried_type, registry)?, compile(r, queried_type, registry)?);
            Ok(Arc::new(move |dbs, tx, id| Ok(l(dbs, tx, id)? || r(dbs, tx, id)?)))
        }
        AstNode::Not(inner) | AstNode::Prohibit(inner) => {
            let inner = compile(inner, queried_type, registry)?;
            Ok(Arc::new(move |dbs, tx, id| Ok(!inner(dbs, tx, id)?)))
        }
        AstNode::SearchField { name, value } => {
            if let AstNode::Term(field_value) = value.as_ref() {
                if field_value.has_wildcard() {
                    if let FieldValue::Range { .. } = field_value {
                        return Err(CapError::unsupported_grammar("wildcard inside a range bound"));
                    }
                }
                let (head, remainder) = name.split_once('.').unwrap_or((name.as_str(), ""));
                let mapper = registry
                    .lookup(queried_type, head)
                    .ok_or_else(|| CapError::field_not_queryable(format!("{queried_type}.{head} is not queryable")))?;
                match mapper.resolve(remainder, field_value)? {
                    MapperOutcome::Predicate(p) => Ok(p),
                    MapperOutcome::Redirect { type_, remainder } => {
                        let inner_name = remainder;
                        compile(
                            &AstNode::SearchField { name: inner_name, value: value.clone() },
                            &type_,
                            registry,
                        )
                    }
                }
            } else {
                Err(CapError::unsupported_grammar("search field must wrap a term, phrase, or range"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::tx::transact;

    fn setup() -> tempfile::TempDir {
        let _lock = db::test_lock();
        let dir = tempfile::tempdir().unwrap();
        db::init(dir.path().to_str().unwrap()).ok();
        db::clear_all().unwrap();
        dir
    }

    #[test]
    fn bare_term_outside_field_selector_is_rejected() {
        let registry = default_registry();
        let result = compile(&AstNode::Term(FieldValue::Word("foo".into())), "object", &registry);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "nonexistent".into(),
            value: Box::new(AstNode::Term(FieldValue::Word("x".into()))),
        };
        assert!(compile(&node, "object", &registry).is_err());
    }

    #[test]
    fn wildcard_inside_range_is_unsupported_grammar() {
        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "meta".into(),
            value: Box::new(AstNode::Term(FieldValue::Range { low: Some("a*".into()), high: Some("z".into()) })),
        };
        assert!(compile(&node, "object", &registry).is_err());
    }

    #[test]
    fn tag_predicate_matches_tagged_objects() {
        let _dir = setup();
        let (object_id, _) = transact(|tx| tx.get_or_create_object("file", "abc")).unwrap();
        transact(|tx| tx.add_tag(object_id, "malicious")).unwrap();

        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "tag".into(),
            value: Box::new(AstNode::Term(FieldValue::Word("malicious".into()))),
        };
        let predicate = compile(&node, "file", &registry).unwrap();
        let matched = db::read(|dbs, rtx| predicate(dbs, rtx, object_id)).unwrap();
        assert!(matched);
    }

    #[test]
    fn tag_wildcard_matches_a_prefix() {
        let _dir = setup();
        let (object_id, _) = transact(|tx| tx.get_or_create_object("file", "abc")).unwrap();
        transact(|tx| tx.add_tag(object_id, "malicious")).unwrap();

        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "tag".into(),
            value: Box::new(AstNode::Term(FieldValue::Word("mal*".into()))),
        };
        let predicate = compile(&node, "file", &registry).unwrap();
        assert!(db::read(|dbs, rtx| predicate(dbs, rtx, object_id)).unwrap());
    }

    #[test]
    fn tag_wildcard_does_not_match_unrelated_tags() {
        let _dir = setup();
        let (object_id, _) = transact(|tx| tx.get_or_create_object("file", "abc")).unwrap();
        transact(|tx| tx.add_tag(object_id, "benign")).unwrap();

        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "tag".into(),
            value: Box::new(AstNode::Term(FieldValue::Word("mal*".into()))),
        };
        let predicate = compile(&node, "file", &registry).unwrap();
        assert!(!db::read(|dbs, rtx| predicate(dbs, rtx, object_id)).unwrap());
    }

    #[test]
    fn phrase_values_never_resolve_wildcards() {
        let _dir = setup();
        let (object_id, _) = transact(|tx| tx.get_or_create_object("file", "abc")).unwrap();
        transact(|tx| tx.add_tag(object_id, "mal*")).unwrap();

        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "tag".into(),
            value: Box::new(AstNode::Term(FieldValue::Phrase("mal*".into()))),
        };
        let predicate = compile(&node, "file", &registry).unwrap();
        assert!(db::read(|dbs, rtx| predicate(dbs, rtx, object_id)).unwrap());

        let node_loose = AstNode::SearchField {
            name: "tag".into(),
            value: Box::new(AstNode::Term(FieldValue::Phrase("malicious".into()))),
        };
        let predicate_loose = compile(&node_loose, "file", &registry).unwrap();
        assert!(!db::read(|dbs, rtx| predicate_loose(dbs, rtx, object_id)).unwrap());
    }

    #[test]
    fn comment_wildcard_matches_one_word() {
        let _dir = setup();
        let user_id = transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        let (object_id, _) = transact(|tx| tx.get_or_create_object("file", "abc")).unwrap();
        transact(|tx| tx.add_comment(object_id, user_id, "looks like emotet variant")).unwrap();

        let registry = default_registry();
        let node = AstNode::SearchField {
            name: "comment".into(),
            value: Box::new(AstNode::Term(FieldValue::Word("emo*".into()))),
        };
        let predicate = compile(&node, "file", &registry).unwrap();
        assert!(db::read(|dbs, rtx| predicate(dbs, rtx, object_id)).unwrap());
    }
}
