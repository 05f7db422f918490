//! Tool-schema dialects and translation between them.
//!
//! The `2024-11-05` protocol revision describes tool schemas with the
//! draft-07 JSON Schema vocabulary; later revisions use 2020-12. Translation
//! rewrites the keywords whose spelling changed and refuses keywords that
//! have no draft-07 equivalent.

use mcpz_core::{McpzError, McpzResult};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::debug;

/// A version of the tool-schema wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Protocol `2024-11-05`, draft-07 schemas, no output schemas.
    Legacy,
    /// Protocols `2025-03-26` and later, 2020-12 schemas.
    Current,
}

/// Protocol version advertised by Legacy endpoints.
pub const LEGACY_PROTOCOL_VERSION: &str = "2024-11-05";
/// Protocol version advertised by Current endpoints.
pub const CURRENT_PROTOCOL_VERSION: &str = "2025-06-18";

const CURRENT_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2025-06-18"];

/// Keywords with no draft-07 representation.
const CURRENT_ONLY_KEYWORDS: &[&str] = &[
    "$dynamicRef",
    "$dynamicAnchor",
    "unevaluatedProperties",
    "unevaluatedItems",
    "minContains",
    "maxContains",
    "contentSchema",
];

/// Keywords that may sit next to `$ref` without changing what a schema
/// accepts in either dialect.
const REF_NEUTRAL_SIBLINGS: &[&str] = &[
    "$id",
    "$schema",
    "$comment",
    "$anchor",
    "definitions",
    "$defs",
    "title",
    "description",
    "default",
    "examples",
    "readOnly",
    "writeOnly",
    "deprecated",
];

/// Keywords whose value is a single subschema.
const SCHEMA_KEYWORDS: &[&str] = &[
    "additionalProperties",
    "contains",
    "not",
    "if",
    "then",
    "else",
    "propertyNames",
    "additionalItems",
];

/// Keywords whose value is an array of subschemas.
const SCHEMA_ARRAY_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf"];

/// Keywords whose value maps names to subschemas.
const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "patternProperties"];

impl Dialect {
    /// Map a negotiated protocol version to its dialect.
    pub fn from_protocol_version(version: &str) -> Option<Self> {
        if version == LEGACY_PROTOCOL_VERSION {
            Some(Self::Legacy)
        } else if CURRENT_PROTOCOL_VERSIONS.contains(&version) {
            Some(Self::Current)
        } else {
            None
        }
    }

    /// The protocol version an endpoint of this dialect advertises.
    pub fn protocol_version(self) -> &'static str {
        match self {
            Self::Legacy => LEGACY_PROTOCOL_VERSION,
            Self::Current => CURRENT_PROTOCOL_VERSION,
        }
    }

    /// Whether tools may declare an `outputSchema`.
    pub fn supports_output_schema(self) -> bool {
        matches!(self, Self::Current)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy ({LEGACY_PROTOCOL_VERSION})"),
            Self::Current => write!(f, "current ({CURRENT_PROTOCOL_VERSION})"),
        }
    }
}

/// Translate a JSON Schema from one dialect to another.
///
/// Legacy to Current never fails for well-formed input. Current to Legacy
/// fails with [`McpzError::UnsupportedConstruct`] on the first keyword that
/// has no draft-07 equivalent. Same-dialect translation is the identity.
///
/// Local `$ref` pointers are rewritten to address the same subschema in the
/// translated document. Draft-07 ignores keywords next to `$ref`, so the
/// upgrade drops the ones that would start to apply and the downgrade moves
/// the reference into `allOf` when it has applying siblings.
pub fn translate_schema(schema: &Value, from: Dialect, to: Dialect) -> McpzResult<Value> {
    if from == to {
        return Ok(schema.clone());
    }
    Translation { root: schema, from }.schema(schema, "")
}

/// One pass over a document, reading it in the `from` dialect.
struct Translation<'a> {
    root: &'a Value,
    from: Dialect,
}

impl Translation<'_> {
    fn schema(&self, value: &Value, pointer: &str) -> McpzResult<Value> {
        match self.from {
            Dialect::Legacy => self.upgrade(value, pointer),
            Dialect::Current => self.downgrade(value, pointer),
        }
    }

    fn upgrade(&self, schema: &Value, pointer: &str) -> McpzResult<Value> {
        let Value::Object(map) = schema else {
            return Ok(schema.clone());
        };
        let tuple_items = matches!(map.get("items"), Some(Value::Array(_)));
        let has_ref = map.contains_key("$ref");
        let mut out = Map::new();

        for (key, value) in map {
            let here = child_pointer(pointer, key);
            if has_ref && key != "$ref" && !REF_NEUTRAL_SIBLINGS.contains(&key.as_str()) {
                debug!(keyword = %key, pointer = %here, "Dropping keyword ignored next to $ref");
                continue;
            }
            match key.as_str() {
                "definitions" => {
                    insert_unique(&mut out, "$defs", self.map_of_schemas(value, &here)?, &here)?;
                }
                "items" if tuple_items => {
                    insert_unique(&mut out, "prefixItems", self.array_of_schemas(value, &here)?, &here)?;
                }
                "additionalItems" if tuple_items => {
                    insert_unique(&mut out, "items", self.upgrade(value, &here)?, &here)?;
                }
                "dependencies" => {
                    let Value::Object(deps) = value else {
                        insert_unique(&mut out, key, value.clone(), &here)?;
                        continue;
                    };
                    let mut required = Map::new();
                    let mut schemas = Map::new();
                    for (prop, dep) in deps {
                        if dep.is_array() {
                            required.insert(prop.clone(), dep.clone());
                        } else {
                            schemas.insert(prop.clone(), self.upgrade(dep, &child_pointer(&here, prop))?);
                        }
                    }
                    // an empty map still has to come back as `dependencies`
                    if !required.is_empty() || schemas.is_empty() {
                        insert_unique(&mut out, "dependentRequired", Value::Object(required), &here)?;
                    }
                    if !schemas.is_empty() {
                        insert_unique(&mut out, "dependentSchemas", Value::Object(schemas), &here)?;
                    }
                }
                "$id" => match value.as_str().and_then(|id| id.strip_prefix('#')) {
                    Some(anchor) if is_anchor_name(anchor) => {
                        insert_unique(&mut out, "$anchor", Value::String(anchor.to_string()), &here)?;
                    }
                    _ => insert_unique(&mut out, key, value.clone(), &here)?,
                },
                "$ref" => {
                    insert_unique(&mut out, key, self.translate_ref(value), &here)?;
                }
                _ => {
                    let translated = self.translate_keyword(key, value, &here)?;
                    insert_unique(&mut out, key, translated, &here)?;
                }
            }
        }
        Ok(Value::Object(out))
    }

    fn downgrade(&self, schema: &Value, pointer: &str) -> McpzResult<Value> {
        let Value::Object(map) = schema else {
            return Ok(schema.clone());
        };
        let has_prefix_items = map.contains_key("prefixItems");
        let wrap_ref = map.contains_key("$ref")
            && map
                .keys()
                .any(|k| k != "$ref" && !REF_NEUTRAL_SIBLINGS.contains(&k.as_str()));
        let mut wrapped_ref = None;
        let mut out = Map::new();

        for (key, value) in map {
            let here = child_pointer(pointer, key);
            if CURRENT_ONLY_KEYWORDS.contains(&key.as_str()) {
                return Err(unsupported(key, pointer));
            }
            match key.as_str() {
                "$defs" | "definitions" => {
                    insert_unique(&mut out, "definitions", self.map_of_schemas(value, &here)?, &here)?;
                }
                "prefixItems" => {
                    insert_unique(&mut out, "items", self.array_of_schemas(value, &here)?, &here)?;
                }
                "items" if has_prefix_items => {
                    insert_unique(&mut out, "additionalItems", self.downgrade(value, &here)?, &here)?;
                }
                "dependentRequired" | "dependentSchemas" | "dependencies" => {
                    self.merge_dependencies(&mut out, key, value, &here)?;
                }
                "$anchor" => {
                    let Some(anchor) = value.as_str() else {
                        return Err(unsupported(key, pointer));
                    };
                    // draft-07 spells an anchor as a fragment-only `$id`
                    if map.contains_key("$id") {
                        return Err(unsupported(key, pointer));
                    }
                    insert_unique(&mut out, "$id", Value::String(format!("#{anchor}")), &here)?;
                }
                "$ref" if wrap_ref => wrapped_ref = Some(self.translate_ref(value)),
                "$ref" => {
                    insert_unique(&mut out, key, self.translate_ref(value), &here)?;
                }
                _ => {
                    let translated = self.translate_keyword(key, value, &here)?;
                    insert_unique(&mut out, key, translated, &here)?;
                }
            }
        }

        if let Some(reference) = wrapped_ref {
            // appended last so pointers into an existing `allOf` stay valid
            let all_of = out
                .entry("allOf")
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(all_of) = all_of else {
                return Err(unsupported("allOf", pointer));
            };
            all_of.push(json!({ "$ref": reference }));
        }
        Ok(Value::Object(out))
    }

    /// Fold `dependentRequired`, `dependentSchemas` and `dependencies` into
    /// one draft-07 `dependencies` map.
    fn merge_dependencies(
        &self,
        out: &mut Map<String, Value>,
        key: &str,
        value: &Value,
        here: &str,
    ) -> McpzResult<()> {
        let Value::Object(deps) = value else {
            return Err(unsupported(key, here));
        };
        let mut translated = Vec::with_capacity(deps.len());
        for (prop, dep) in deps {
            let dep = if dep.is_array() {
                dep.clone()
            } else {
                self.downgrade(dep, &child_pointer(here, prop))?
            };
            translated.push((prop, dep));
        }

        let entry = out
            .entry("dependencies")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(merged) = entry else {
            return Err(unsupported(key, here));
        };
        for (prop, dep) in translated {
            if merged.insert(prop.clone(), dep).is_some() {
                return Err(unsupported(key, &child_pointer(here, prop)));
            }
        }
        Ok(())
    }

    /// Recurse into keywords that hold subschemas; copy everything else verbatim.
    fn translate_keyword(&self, key: &str, value: &Value, here: &str) -> McpzResult<Value> {
        if SCHEMA_KEYWORDS.contains(&key) || key == "items" {
            self.schema(value, here)
        } else if SCHEMA_ARRAY_KEYWORDS.contains(&key) {
            self.array_of_schemas(value, here)
        } else if SCHEMA_MAP_KEYWORDS.contains(&key) {
            self.map_of_schemas(value, here)
        } else {
            Ok(value.clone())
        }
    }

    fn map_of_schemas(&self, value: &Value, here: &str) -> McpzResult<Value> {
        let Value::Object(entries) = value else {
            return Ok(value.clone());
        };
        let mut out = Map::new();
        for (name, schema) in entries {
            out.insert(name.clone(), self.schema(schema, &child_pointer(here, name))?);
        }
        Ok(Value::Object(out))
    }

    fn array_of_schemas(&self, value: &Value, here: &str) -> McpzResult<Value> {
        let Value::Array(items) = value else {
            return Ok(value.clone());
        };
        items
            .iter()
            .enumerate()
            .map(|(i, schema)| self.schema(schema, &child_pointer(here, &i.to_string())))
            .collect::<McpzResult<Vec<_>>>()
            .map(Value::Array)
    }

    /// Rewrite a local `$ref` pointer by walking it through the source
    /// document, so only tokens in keyword position are renamed. Anchors and
    /// remote references are left alone.
    fn translate_ref(&self, value: &Value) -> Value {
        let Some(pointer) = value.as_str().and_then(|r| r.strip_prefix("#/")) else {
            return value.clone();
        };
        let tokens: Vec<String> = pointer.split('/').map(unescape_token).collect();
        let mut out: Vec<String> = Vec::with_capacity(tokens.len());
        let mut node = Some(self.root);
        let mut rest = tokens.iter();

        while let Some(token) = rest.next() {
            let schema = node.and_then(Value::as_object);
            let Some((renamed, keyed)) = schema.and_then(|s| self.ref_keyword(token, s)) else {
                // past anything we know how to walk
                out.push(token.clone());
                out.extend(rest.by_ref().cloned());
                break;
            };
            let child = schema.and_then(|s| s.get(token.as_str()));
            if !keyed {
                out.push(renamed.to_string());
                node = child;
                continue;
            }
            let Some(name) = rest.next() else {
                out.push(renamed.to_string());
                break;
            };
            let target = child.and_then(|c| member(c, name));
            let renamed = if renamed == "dependentSchemas" && target.is_some_and(Value::is_array) {
                "dependentRequired"
            } else {
                renamed
            };
            out.push(renamed.to_string());
            out.push(name.clone());
            node = target;
        }

        let escaped: Vec<String> = out.iter().map(|t| escape_token(t)).collect();
        Value::String(format!("#/{}", escaped.join("/")))
    }

    /// Target spelling of a keyword inside a `$ref` pointer, and whether the
    /// next token names a member (property, definition or array index).
    fn ref_keyword(&self, token: &str, schema: &Map<String, Value>) -> Option<(&'static str, bool)> {
        let tuple_items = matches!(schema.get("items"), Some(Value::Array(_)));
        let renamed = match (self.from, token) {
            (Dialect::Legacy, "definitions") => ("$defs", true),
            (Dialect::Legacy, "items") if tuple_items => ("prefixItems", true),
            (Dialect::Legacy, "additionalItems") if tuple_items => ("items", false),
            (Dialect::Legacy, "dependencies") => ("dependentSchemas", true),
            (Dialect::Current, "$defs" | "definitions") => ("definitions", true),
            (Dialect::Current, "prefixItems") => ("items", true),
            (Dialect::Current, "items") if schema.contains_key("prefixItems") => {
                ("additionalItems", false)
            }
            (Dialect::Current, "dependentSchemas" | "dependentRequired" | "dependencies") => {
                ("dependencies", true)
            }
            (_, "items") => ("items", false),
            _ => {
                if let Some(k) = SCHEMA_KEYWORDS.iter().find(|k| **k == token) {
                    (*k, false)
                } else if let Some(k) = SCHEMA_ARRAY_KEYWORDS
                    .iter()
                    .chain(SCHEMA_MAP_KEYWORDS)
                    .find(|k| **k == token)
                {
                    (*k, true)
                } else {
                    return None;
                }
            }
        };
        Some(renamed)
    }
}

fn member<'v>(container: &'v Value, name: &str) -> Option<&'v Value> {
    match container {
        Value::Object(map) => map.get(name),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn unsupported(keyword: &str, pointer: &str) -> McpzError {
    McpzError::UnsupportedConstruct {
        keyword: keyword.to_string(),
        pointer: if pointer.is_empty() { "/".into() } else { pointer.into() },
        dialect: Dialect::Legacy.to_string(),
    }
}

/// Two source keywords mapping onto the same target keyword is ambiguous.
fn insert_unique(out: &mut Map<String, Value>, key: &str, value: Value, here: &str) -> McpzResult<()> {
    if out.insert(key.to_string(), value).is_some() {
        return Err(McpzError::UnsupportedConstruct {
            keyword: key.to_string(),
            pointer: here.to_string(),
            dialect: "either".into(),
        });
    }
    Ok(())
}

/// Plain-name fragment syntax shared by 2020-12 `$anchor` and draft-07 `$id`.
fn is_anchor_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn child_pointer(parent: &str, token: &str) -> String {
    format!("{parent}/{}", escape_token(token))
}
