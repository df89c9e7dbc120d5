//! Query evaluation and field classification.

use super::shape::{GraphQuery, QueryField, QueryFields};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::snapshot::QueryDocumentSnapshot;
use crate::types::{Reference, Value};
use std::borrow::Cow;

/// How a query key obtains its reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Read from the document's own data.
    Link,
    /// Supplied by the caller.
    Extension,
}

/// A query key resolved against one snapshot.
#[derive(Clone, Debug)]
pub struct SubQuery {
    /// Key as written in the query (`ownerRef`, `kanbans`).
    pub key: String,
    /// Key the joined value appears under in the result (`owner`, `kanbans`).
    pub result_key: String,
    pub kind: FieldKind,
    /// `None` when the reference is null or missing.
    pub reference: Option<Reference>,
    pub query: GraphQuery,
    pub guaranteed_to_exist: bool,
}

/// Resolve a node's query for its current snapshot.
pub fn evaluate<'a>(
    snapshot: &QueryDocumentSnapshot,
    query: &'a GraphQuery,
) -> Cow<'a, QueryFields> {
    match query {
        GraphQuery::Fields(fields) => Cow::Borrowed(fields),
        GraphQuery::Generator(generate) => Cow::Owned(generate(snapshot)),
    }
}

/// Classify one query entry, validating link keys.
pub fn classify(key: &str, field: &QueryField, config: &GraphConfig) -> Result<FieldKind> {
    match field {
        QueryField::Extension(_) => Ok(FieldKind::Extension),
        QueryField::Link(_) => {
            if config.is_link_key(key) {
                Ok(FieldKind::Link)
            } else {
                Err(GraphError::MalformedQueryKey {
                    key: key.to_string(),
                    suffix: config.link_suffix.clone(),
                })
            }
        }
    }
}

/// Resolve the reference, sub-query and result key of one query entry.
pub fn resolve_sub_query(
    snapshot: &QueryDocumentSnapshot,
    key: &str,
    field: &QueryField,
    config: &GraphConfig,
) -> Result<SubQuery> {
    let kind = classify(key, field, config)?;
    match field {
        QueryField::Link(query) => {
            let reference = match snapshot.get(key) {
                None | Some(Value::Null) => None,
                Some(Value::Reference(reference)) => Some(reference.clone()),
                Some(other) => {
                    return Err(GraphError::MalformedReference {
                        key: key.to_string(),
                        found: other.type_name().to_string(),
                    })
                }
            };
            let result_key = config.strip_link_suffix(key).unwrap_or(key).to_string();
            Ok(SubQuery {
                key: key.to_string(),
                result_key,
                kind,
                reference,
                query: query.clone(),
                guaranteed_to_exist: false,
            })
        }
        QueryField::Extension(extension) => Ok(SubQuery {
            key: key.to_string(),
            result_key: key.to_string(),
            kind,
            reference: extension.reference.clone(),
            query: extension.query.clone(),
            guaranteed_to_exist: extension.guaranteed_to_exist,
        }),
    }
}

/// Resolve every entry of a query object, failing on the first malformed one.
pub fn resolve_all(
    snapshot: &QueryDocumentSnapshot,
    fields: &QueryFields,
    config: &GraphConfig,
) -> Result<Vec<SubQuery>> {
    fields
        .iter()
        .map(|(key, field)| resolve_sub_query(snapshot, key, field, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::shape::{field, field_opt};
    use crate::types::{DocumentRef, QueryRef};
    use serde_json::json;

    fn project() -> QueryDocumentSnapshot {
        let mut data = Value::fields_from_json(json!({ "title": "Demo", "nowPlayingRef": null }));
        data.insert("ownerRef".to_string(), DocumentRef::new("users/alice").into());
        QueryDocumentSnapshot {
            id: "p1".to_string(),
            reference: DocumentRef::new("projects/p1"),
            data,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_evaluate_static_and_generated() {
        let snapshot = project();
        let fixed = GraphQuery::from(QueryFields::new().link("ownerRef", GraphQuery::empty()));
        assert_eq!(evaluate(&snapshot, &fixed).len(), 1);

        let generated = GraphQuery::generator(|doc| {
            let kanbans = doc.reference.collection("kanbans");
            QueryFields::new().extension("kanbans", field(kanbans, GraphQuery::empty()))
        });
        let fields = evaluate(&snapshot, &generated);
        assert!(fields.contains_key("kanbans"));
    }

    #[test]
    fn test_link_field_resolution() {
        let config = GraphConfig::default();
        let snapshot = project();
        let sub = resolve_sub_query(
            &snapshot,
            "ownerRef",
            &QueryField::Link(GraphQuery::empty()),
            &config,
        )
        .unwrap();
        assert_eq!(sub.kind, FieldKind::Link);
        assert_eq!(sub.result_key, "owner");
        assert_eq!(sub.reference, Some(DocumentRef::new("users/alice").into()));
    }

    #[test]
    fn test_null_and_absent_links_resolve_to_none() {
        let config = GraphConfig::default();
        let snapshot = project();
        for key in ["nowPlayingRef", "managerRef"] {
            let link = QueryField::Link(GraphQuery::empty());
            let sub = resolve_sub_query(&snapshot, key, &link, &config).unwrap();
            assert!(sub.reference.is_none(), "{key} should have no reference");
        }
    }

    #[test]
    fn test_link_without_suffix_is_malformed() {
        let config = GraphConfig::default();
        let err = resolve_sub_query(
            &project(),
            "owner",
            &QueryField::Link(GraphQuery::empty()),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::MalformedQueryKey { ref key, .. } if key == "owner"));
    }

    #[test]
    fn test_non_reference_link_value_is_malformed() {
        let config = GraphConfig::default();
        let mut snapshot = project();
        snapshot.data.insert("ownerRef".to_string(), Value::from("alice"));
        let err = resolve_sub_query(
            &snapshot,
            "ownerRef",
            &QueryField::Link(GraphQuery::empty()),
            &config,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::MalformedReference {
                key: "ownerRef".to_string(),
                found: "string".to_string(),
            }
        );
    }

    #[test]
    fn test_extension_field_keeps_key() {
        let config = GraphConfig::default();
        let query = QueryRef::new("projects/p1/kanbans");
        let sub = resolve_sub_query(
            &project(),
            "kanbans",
            &QueryField::Extension(field(query.clone(), GraphQuery::empty())),
            &config,
        )
        .unwrap();
        assert_eq!(sub.kind, FieldKind::Extension);
        assert_eq!(sub.result_key, "kanbans");
        assert_eq!(sub.reference, Some(query.into()));

        let absent = resolve_sub_query(
            &project(),
            "pinned",
            &QueryField::Extension(field_opt(None, GraphQuery::empty())),
            &config,
        )
        .unwrap();
        assert!(absent.reference.is_none());
    }
}
