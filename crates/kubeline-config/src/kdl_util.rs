//! Helpers for extracting values from KDL nodes.

use kdl::{KdlNode, KdlValue};
use kubeline_core::{ParamValue, ResourceId};
use std::collections::BTreeMap;

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    get_first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

pub(crate) fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated attributes: needs="a" needs="b"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    if !result.is_empty() {
        return result;
    }

    // Block syntax: needs "a" "b"
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == name {
                return get_all_string_args(child);
            }
        }
    }

    Vec::new()
}

/// The single string argument of each child of `node`, keyed by child name.
pub(crate) fn get_string_children(node: &KdlNode) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if let Some(value) = get_first_string_arg(child) {
                map.insert(child.name().value().to_string(), value);
            }
        }
    }
    map
}

/// An entity id: a non-negative integer or a UUID string.
pub(crate) fn id_value(value: &KdlValue, field: &str) -> ConfigResult<ResourceId> {
    let invalid = |message: String| ConfigError::invalid(field, message);
    match value {
        KdlValue::Integer(n) => u64::try_from(*n)
            .map(ResourceId::from_number)
            .map_err(|_| invalid(format!("{n} is not a valid id"))),
        KdlValue::String(s) => s
            .parse()
            .map_err(|_| invalid(format!("{s:?} is not a valid id"))),
        other => Err(invalid(format!("{other} is not a valid id"))),
    }
}

pub(crate) fn id_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<ResourceId>> {
    node.get(name)
        .map(|v| id_value(v, name))
        .transpose()
}

pub(crate) fn scalar_value(value: &KdlValue, field: &str) -> ConfigResult<ParamValue> {
    Ok(match value {
        KdlValue::String(s) => ParamValue::String(s.clone()),
        KdlValue::Integer(n) => {
            ParamValue::Int(i64::try_from(*n).map_err(|_| {
                ConfigError::invalid(field, format!("{n} does not fit in 64 bits"))
            })?)
        }
        KdlValue::Float(f) => ParamValue::Float(*f),
        KdlValue::Bool(b) => ParamValue::Bool(*b),
        KdlValue::Null => ParamValue::Absent,
    })
}

/// Convert a parameter node into a value.
///
/// - `key "v"` is a scalar, `key "a" "b"` a list, `key #null` (or a bare
///   `key`) absent
/// - `key a=1 b="x"` is a map of its properties
/// - `key { - ...; - ... }` is a list of the `-` children, any other block
///   a map of child name to child value; an empty block is an empty list
pub(crate) fn node_value(node: &KdlNode) -> ConfigResult<ParamValue> {
    let field = node.name().value();

    if let Some(children) = node.children() {
        let nodes = children.nodes();
        if nodes.iter().all(|n| n.name().value() == "-") {
            return nodes
                .iter()
                .map(node_value)
                .collect::<ConfigResult<Vec<_>>>()
                .map(ParamValue::List);
        }
        let mut map = BTreeMap::new();
        for child in nodes {
            map.insert(child.name().value().to_string(), node_value(child)?);
        }
        return Ok(ParamValue::Map(map));
    }

    let mut args = Vec::new();
    let mut props = BTreeMap::new();
    for entry in node.entries() {
        match entry.name() {
            Some(name) => {
                props.insert(name.value().to_string(), scalar_value(entry.value(), field)?);
            }
            None => args.push(scalar_value(entry.value(), field)?),
        }
    }

    if !props.is_empty() {
        if !args.is_empty() {
            return Err(ConfigError::invalid(
                field,
                "cannot mix arguments and properties",
            ));
        }
        return Ok(ParamValue::Map(props));
    }

    Ok(match args.len() {
        0 => ParamValue::Absent,
        1 => args.remove(0),
        _ => ParamValue::List(args),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdl::KdlDocument;

    fn first(kdl: &str) -> KdlNode {
        let doc: KdlDocument = kdl.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(node_value(&first(r#"k "v""#)).unwrap(), ParamValue::from("v"));
        assert_eq!(node_value(&first("k 22")).unwrap(), ParamValue::Int(22));
        assert_eq!(node_value(&first("k 1.5")).unwrap(), ParamValue::Float(1.5));
        assert_eq!(node_value(&first("k #false")).unwrap(), ParamValue::Bool(false));
        assert_eq!(node_value(&first("k #null")).unwrap(), ParamValue::Absent);
        assert_eq!(node_value(&first("k")).unwrap(), ParamValue::Absent);
    }

    #[test]
    fn test_lists_and_maps() {
        assert_eq!(
            node_value(&first(r#"k "a" "b""#)).unwrap(),
            ParamValue::List(vec!["a".into(), "b".into()])
        );

        let builds = node_value(&first(
            r#"
            image_builds {
                - dockerfile="Dockerfile" image="acme/web"
                - image="acme/api"
            }
            "#,
        ))
        .unwrap();
        let list = builds.as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            list[0].as_map().unwrap().get("image"),
            Some(&ParamValue::from("acme/web"))
        );

        let nested = node_value(&first(r#"k { a 1; b "x" }"#)).unwrap();
        assert_eq!(nested.as_map().unwrap().get("a"), Some(&ParamValue::Int(1)));

        assert_eq!(node_value(&first("k {}")).unwrap(), ParamValue::List(vec![]));
    }

    #[test]
    fn test_mixed_arguments_and_properties_rejected() {
        assert!(node_value(&first(r#"k "a" b=1"#)).is_err());
    }

    #[test]
    fn test_ids() {
        let node = first(r#"r 3 uuid="00000000-0000-0000-0000-000000000003" bad=-1"#);
        let numeric = id_value(get_first_arg(&node).unwrap(), "r").unwrap();
        assert_eq!(numeric, ResourceId::from_number(3));
        assert_eq!(id_prop(&node, "uuid").unwrap(), Some(numeric));
        assert!(id_prop(&node, "bad").is_err());
        assert_eq!(id_prop(&node, "missing").unwrap(), None);
    }
}
