use std::collections::BTreeSet;

use indexmap::IndexMap;
use openapiv3::{ReferenceOr, SchemaKind, Type, VariantOrUnknownOrEmpty};
use tracing::warn;

/// Nesting level beyond which `$ref` chasing stops.
const MAX_RESOLVE_DEPTH: usize = 16;

/// A normalized value schema used to drive request synthesis.
///
/// This is a deliberately small projection of an OpenAPI schema: only the
/// pieces the synthesizer consumes survive the conversion. References are
/// resolved against `components.schemas` at load time; a reference that cannot
/// be resolved (unknown name, cycle, depth limit) is kept as [`Schema::Ref`]
/// so the synthesizer can still fall back to a generic value.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// A string with optional constraints.
    String(StringSchema),
    /// An integer with optional bounds.
    Integer(IntegerSchema),
    /// A floating-point number with optional bounds.
    Number(NumberSchema),
    /// A boolean.
    Boolean,
    /// An array of items.
    Array(ArraySchema),
    /// An object with named fields.
    Object(ObjectSchema),
    /// An unresolved reference to a named component schema.
    Ref(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringSchema {
    /// OpenAPI `format`, e.g. `email`, `date-time`, `uuid`.
    pub format: Option<String>,
    /// Regular expression the value should match.
    pub pattern: Option<String>,
    /// Closed set of admissible values; empty means unconstrained.
    pub enumeration: Vec<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegerSchema {
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    /// Closed set of admissible values; empty means unconstrained.
    pub enumeration: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberSchema {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArraySchema {
    /// Item schema; `None` when the document declares none.
    pub items: Option<Box<Schema>>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSchema {
    /// Fields in declaration order.
    pub fields: IndexMap<String, Schema>,
    /// Names of required fields. Always a subset of `fields` keys.
    pub required: BTreeSet<String>,
}

impl Schema {
    /// Returns whether this schema produces strings or integers.
    ///
    /// Identifier-typed path parameters are restricted to these shapes.
    pub(crate) fn is_identifier_compatible(&self) -> bool {
        matches!(self, Self::String(_) | Self::Integer(_))
    }
}

/// Resolves `$ref`s against the document components while converting.
pub(super) struct SchemaResolver<'a> {
    components: Option<&'a openapiv3::Components>,
}

impl<'a> SchemaResolver<'a> {
    pub(super) fn new(doc: &'a openapiv3::OpenAPI) -> Self {
        Self {
            components: doc.components.as_ref(),
        }
    }

    /// Converts an OpenAPI schema into the normalized model.
    pub(super) fn convert(&self, schema: &openapiv3::Schema) -> Schema {
        self.convert_at(schema, 0)
    }

    /// Converts a schema-or-reference, chasing the reference when possible.
    pub(super) fn convert_ref(&self, schema: &ReferenceOr<openapiv3::Schema>) -> Schema {
        match schema {
            ReferenceOr::Item(item) => self.convert_at(item, 0),
            ReferenceOr::Reference { reference } => self.resolve_reference(reference, 0),
        }
    }

    fn resolve_reference(&self, reference: &str, depth: usize) -> Schema {
        let name = reference
            .strip_prefix("#/components/schemas/")
            .unwrap_or(reference);
        if depth >= MAX_RESOLVE_DEPTH {
            warn!(reference, "schema reference nesting too deep, keeping as ref");
            return Schema::Ref(name.to_string());
        }
        let resolved = self
            .components
            .and_then(|components| components.schemas.get(name));
        match resolved {
            Some(ReferenceOr::Item(item)) => self.convert_at(item, depth + 1),
            Some(ReferenceOr::Reference { reference }) => {
                self.resolve_reference(reference, depth + 1)
            }
            None => {
                warn!(reference, "unresolvable schema reference");
                Schema::Ref(name.to_string())
            }
        }
    }

    fn convert_boxed(&self, schema: &ReferenceOr<Box<openapiv3::Schema>>, depth: usize) -> Schema {
        match schema {
            ReferenceOr::Item(item) => self.convert_at(item, depth),
            ReferenceOr::Reference { reference } => self.resolve_reference(reference, depth),
        }
    }

    fn convert_at(&self, schema: &openapiv3::Schema, depth: usize) -> Schema {
        if depth >= MAX_RESOLVE_DEPTH {
            return Schema::String(StringSchema::default());
        }
        match &schema.schema_kind {
            SchemaKind::Type(Type::String(string_type)) => Schema::String(StringSchema {
                format: string_format_name(&string_type.format),
                pattern: string_type.pattern.clone(),
                enumeration: string_type.enumeration.iter().flatten().cloned().collect(),
                min_length: string_type.min_length,
                max_length: string_type.max_length,
            }),
            SchemaKind::Type(Type::Integer(integer_type)) => Schema::Integer(IntegerSchema {
                minimum: integer_type.minimum,
                maximum: integer_type.maximum,
                enumeration: integer_type.enumeration.iter().flatten().copied().collect(),
            }),
            SchemaKind::Type(Type::Number(number_type)) => Schema::Number(NumberSchema {
                minimum: number_type.minimum,
                maximum: number_type.maximum,
            }),
            SchemaKind::Type(Type::Boolean { .. }) => Schema::Boolean,
            SchemaKind::Type(Type::Array(array_type)) => Schema::Array(ArraySchema {
                items: array_type
                    .items
                    .as_ref()
                    .map(|items| Box::new(self.convert_boxed(items, depth + 1))),
                min_items: array_type.min_items,
                max_items: array_type.max_items,
            }),
            SchemaKind::Type(Type::Object(object_type)) => {
                let fields: IndexMap<String, Schema> = object_type
                    .properties
                    .iter()
                    .map(|(name, prop)| (name.clone(), self.convert_boxed(prop, depth + 1)))
                    .collect();
                // Required names without a matching field carry no information
                // for synthesis and are dropped.
                let required = object_type
                    .required
                    .iter()
                    .filter(|name| fields.contains_key(*name))
                    .cloned()
                    .collect();
                Schema::Object(ObjectSchema { fields, required })
            }
            SchemaKind::OneOf { one_of: variants }
            | SchemaKind::AnyOf { any_of: variants }
            | SchemaKind::AllOf { all_of: variants } => variants
                .first()
                .map_or(Schema::Object(ObjectSchema::default()), |first| match first {
                    ReferenceOr::Item(item) => self.convert_at(item, depth + 1),
                    ReferenceOr::Reference { reference } => {
                        self.resolve_reference(reference, depth + 1)
                    }
                }),
            SchemaKind::Not { .. } | SchemaKind::Any(_) => {
                Schema::Object(ObjectSchema::default())
            }
        }
    }
}

fn string_format_name(
    format: &VariantOrUnknownOrEmpty<openapiv3::StringFormat>,
) -> Option<String> {
    match format {
        VariantOrUnknownOrEmpty::Item(known) => Some(
            match known {
                openapiv3::StringFormat::Date => "date",
                openapiv3::StringFormat::DateTime => "date-time",
                openapiv3::StringFormat::Password => "password",
                openapiv3::StringFormat::Byte => "byte",
                openapiv3::StringFormat::Binary => "binary",
            }
            .to_string(),
        ),
        VariantOrUnknownOrEmpty::Unknown(other) => Some(other.clone()),
        VariantOrUnknownOrEmpty::Empty => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_components(schemas_json: serde_json::Value) -> openapiv3::OpenAPI {
        let doc = serde_json::json!({
            "openapi": "3.0.0",
            "info": {"title": "t", "version": "1"},
            "paths": {},
            "components": {"schemas": schemas_json}
        });
        serde_json::from_value(doc).expect("valid document")
    }

    fn parse_schema(json: serde_json::Value) -> openapiv3::Schema {
        serde_json::from_value(json).expect("valid schema")
    }

    #[test]
    fn should_convert_string_constraints() {
        let doc = doc_with_components(serde_json::json!({}));
        let resolver = SchemaResolver::new(&doc);
        let schema = parse_schema(serde_json::json!({
            "type": "string",
            "format": "email",
            "minLength": 3,
            "maxLength": 10
        }));

        let Schema::String(string) = resolver.convert(&schema) else {
            panic!("expected a string schema");
        };
        assert_eq!(string.format.as_deref(), Some("email"));
        assert_eq!(string.min_length, Some(3));
        assert_eq!(string.max_length, Some(10));
    }

    #[test]
    fn should_convert_object_and_filter_required() {
        let doc = doc_with_components(serde_json::json!({}));
        let resolver = SchemaResolver::new(&doc);
        let schema = parse_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "stars": {"type": "integer", "minimum": 0, "maximum": 5}
            },
            "required": ["title", "ghost"]
        }));

        let Schema::Object(object) = resolver.convert(&schema) else {
            panic!("expected an object schema");
        };
        assert_eq!(object.fields.len(), 2);
        // "ghost" names no field and must not survive.
        assert_eq!(
            object.required.iter().collect::<Vec<_>>(),
            vec![&"title".to_string()]
        );
    }

    #[test]
    fn should_resolve_component_reference() {
        let doc = doc_with_components(serde_json::json!({
            "Pet": {"type": "object", "properties": {"name": {"type": "string"}}}
        }));
        let resolver = SchemaResolver::new(&doc);

        let converted = resolver.convert_ref(&ReferenceOr::Reference {
            reference: "#/components/schemas/Pet".to_string(),
        });
        assert!(matches!(converted, Schema::Object(_)));
    }

    #[test]
    fn should_keep_unresolvable_reference() {
        let doc = doc_with_components(serde_json::json!({}));
        let resolver = SchemaResolver::new(&doc);

        let converted = resolver.convert_ref(&ReferenceOr::Reference {
            reference: "#/components/schemas/Missing".to_string(),
        });
        assert_eq!(converted, Schema::Ref("Missing".to_string()));
    }

    #[test]
    fn should_survive_reference_cycles() {
        let doc = doc_with_components(serde_json::json!({
            "A": {"$ref": "#/components/schemas/B"},
            "B": {"$ref": "#/components/schemas/A"}
        }));
        let resolver = SchemaResolver::new(&doc);

        let converted = resolver.convert_ref(&ReferenceOr::Reference {
            reference: "#/components/schemas/A".to_string(),
        });
        // The chase stops at the depth limit instead of recursing forever.
        assert!(matches!(converted, Schema::Ref(_)));
    }

    #[test]
    fn should_take_first_one_of_variant() {
        let doc = doc_with_components(serde_json::json!({}));
        let resolver = SchemaResolver::new(&doc);
        let schema = parse_schema(serde_json::json!({
            "oneOf": [{"type": "integer"}, {"type": "string"}]
        }));

        assert!(matches!(resolver.convert(&schema), Schema::Integer(_)));
    }
}
