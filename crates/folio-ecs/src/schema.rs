//! Declarative component schemas.
//!
//! A [`ComponentSchema`] describes the fields of one component type: their
//! accepted runtime types, an optional default, and whether the field is
//! required. [`ComponentSchema::create_component`] turns caller data into a
//! validated component instance:
//!
//! 1. defaults are applied for missing fields,
//! 2. required fields are checked for presence,
//! 3. every present field that the schema declares is type-checked.
//!
//! Fields the schema does not mention pass through untouched; schemas do not
//! enforce a closed shape.
//!
//! # Example
//!
//! ```
//! use folio_ecs::schema::{ComponentSchema, FieldType};
//! use serde_json::json;
//!
//! let schema = ComponentSchema::builder("position")
//!     .with_default("x", FieldType::Number, json!(0))
//!     .with_default("y", FieldType::Number, json!(0))
//!     .build();
//!
//! let data = json!({ "x": 4 }).as_object().cloned().unwrap();
//! let component = schema.create_component(data).unwrap();
//! assert_eq!(component["x"], json!(4));
//! assert_eq!(component["y"], json!(0));
//! ```

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::component::ComponentData;
use crate::ValidationError;

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// Semantic type of a component field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// A non-null JSON object. Arrays do not qualify.
    Object,
    Array,
    /// Name of a handler in a caller-side dispatch table. Component data is
    /// plain JSON, so callbacks are referenced rather than stored.
    Function,
    Null,
    Any,
}

impl FieldType {
    /// Parse a single type name (`"number"`, `"array"`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.trim() {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            "function" => Self::Function,
            "null" => Self::Null,
            "any" => Self::Any,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Function => "function",
            Self::Null => "null",
            Self::Any => "any",
        }
    }

    /// Whether `value` satisfies this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            // serde_json cannot hold NaN, but guard anyway in case a Number
            // was produced from a float through an unchecked path.
            Self::Number => value.as_f64().is_some_and(|n| !n.is_nan()),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Function => value.as_str().is_some_and(|s| !s.is_empty()),
            Self::Null => value.is_null(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The runtime type name of a JSON value, as reported in validation errors.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// TypeSpec
// ---------------------------------------------------------------------------

/// A union of [`FieldType`]s. A value matches if it matches any member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec(Vec<FieldType>);

impl TypeSpec {
    /// Build a union from its members.
    pub fn union(types: impl IntoIterator<Item = FieldType>) -> Self {
        let mut members: Vec<FieldType> = Vec::new();
        for ty in types {
            if !members.contains(&ty) {
                members.push(ty);
            }
        }
        Self(members)
    }

    /// Parse `"number"` or a `|`-separated union such as `"string|null"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let members: Option<Vec<FieldType>> = spec.split('|').map(FieldType::parse).collect();
        members.filter(|m| !m.is_empty()).map(Self::union)
    }

    pub fn members(&self) -> &[FieldType] {
        &self.0
    }

    pub fn matches(&self, value: &Value) -> bool {
        self.0.iter().any(|ty| ty.matches(value))
    }
}

impl From<FieldType> for TypeSpec {
    fn from(ty: FieldType) -> Self {
        Self(vec![ty])
    }
}

impl<const N: usize> From<[FieldType; N]> for TypeSpec {
    fn from(types: [FieldType; N]) -> Self {
        Self::union(types)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(ty.as_str())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// Declaration of one schema field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub types: TypeSpec,
    pub default: Option<Value>,
    pub required: bool,
}

impl FieldSpec {
    /// An optional field with no default.
    pub fn new(types: impl Into<TypeSpec>) -> Self {
        Self {
            types: types.into(),
            default: None,
            required: false,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// JSON form of a field declaration: either a bare type string or an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawField {
    Short(String),
    Full {
        #[serde(rename = "type", default)]
        ty: Option<String>,
        #[serde(default)]
        default: Option<Value>,
        #[serde(default)]
        required: bool,
    },
}

// ---------------------------------------------------------------------------
// ComponentSchema
// ---------------------------------------------------------------------------

/// Field declarations for one component type.
///
/// Fields keep their declaration order, which is also the order in which
/// validation reports problems.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSchema {
    name: String,
    fields: Vec<(String, FieldSpec)>,
}

impl ComponentSchema {
    /// Start building a schema for the component type `name`.
    pub fn builder(name: &str) -> ComponentSchemaBuilder {
        ComponentSchemaBuilder {
            name: name.to_owned(),
            fields: Vec::new(),
        }
    }

    /// Parse a declarative JSON schema.
    ///
    /// ```json
    /// { "x": "number", "label": { "type": "string|null", "default": null, "required": true } }
    /// ```
    ///
    /// A field without a `type` accepts anything. Defaults must satisfy the
    /// field's own type.
    pub fn from_json(name: &str, declaration: &Value) -> Result<Self, ValidationError> {
        let invalid = |details: String| ValidationError::InvalidSchema {
            component: name.to_owned(),
            details,
        };
        let map = declaration
            .as_object()
            .ok_or_else(|| invalid(format!("expected an object, got {}", value_type_name(declaration))))?;

        let mut builder = Self::builder(name);
        for (field, raw) in map {
            let raw: RawField = serde_json::from_value(raw.clone())
                .map_err(|e| invalid(format!("field '{field}': {e}")))?;
            let (ty, default, required) = match raw {
                RawField::Short(ty) => (Some(ty), None, false),
                RawField::Full { ty, default, required } => (ty, default, required),
            };
            let types = match ty {
                Some(ty) => TypeSpec::parse(&ty)
                    .ok_or_else(|| invalid(format!("field '{field}': unknown type '{ty}'")))?,
                None => TypeSpec::from(FieldType::Any),
            };
            if let Some(value) = &default {
                if !types.matches(value) {
                    return Err(invalid(format!(
                        "field '{field}': default of type {} does not satisfy {types}",
                        value_type_name(value)
                    )));
                }
            }
            builder = builder.field_spec(
                field,
                FieldSpec {
                    types,
                    default,
                    required,
                },
            );
        }
        Ok(builder.build())
    }

    /// The component type this schema describes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up one field declaration.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    /// All field declarations in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> + '_ {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Produce a validated component instance from caller data.
    pub fn create_component(&self, mut data: ComponentData) -> Result<ComponentData, ValidationError> {
        for (field, spec) in &self.fields {
            if let Some(default) = &spec.default {
                if !data.contains_key(field) {
                    data.insert(field.clone(), default.clone());
                }
            }
        }

        for (field, spec) in &self.fields {
            if spec.required && !data.contains_key(field) {
                return Err(ValidationError::MissingField {
                    component: self.name.clone(),
                    field: field.clone(),
                });
            }
        }

        for (field, spec) in &self.fields {
            if let Some(value) = data.get(field) {
                if !spec.types.matches(value) {
                    return Err(ValidationError::TypeMismatch {
                        component: self.name.clone(),
                        field: field.clone(),
                        expected: spec.types.to_string(),
                        actual: value_type_name(value).to_owned(),
                    });
                }
            }
        }

        Ok(data)
    }

    /// Like [`create_component`](Self::create_component) but accepts any
    /// JSON value; non-objects are rejected.
    pub fn create_component_from_value(&self, data: Value) -> Result<ComponentData, ValidationError> {
        match data {
            Value::Object(map) => self.create_component(map),
            other => Err(ValidationError::NotAnObject {
                component: self.name.clone(),
                actual: value_type_name(&other).to_owned(),
            }),
        }
    }
}

/// Builder returned by [`ComponentSchema::builder`].
#[derive(Debug, Clone)]
pub struct ComponentSchemaBuilder {
    name: String,
    fields: Vec<(String, FieldSpec)>,
}

impl ComponentSchemaBuilder {
    /// Declare an optional field without a default.
    pub fn field(self, name: &str, types: impl Into<TypeSpec>) -> Self {
        self.field_spec(name, FieldSpec::new(types))
    }

    /// Declare a field that is filled with `default` when absent.
    pub fn with_default(self, name: &str, types: impl Into<TypeSpec>, default: Value) -> Self {
        self.field_spec(name, FieldSpec::new(types).default_value(default))
    }

    /// Declare a field that must be supplied.
    pub fn required(self, name: &str, types: impl Into<TypeSpec>) -> Self {
        self.field_spec(name, FieldSpec::new(types).required())
    }

    /// Declare a field from a full spec. Redeclaring a field replaces it.
    pub fn field_spec(mut self, name: &str, spec: FieldSpec) -> Self {
        if let Some(slot) = self.fields.iter_mut().find(|(field, _)| field == name) {
            slot.1 = spec;
        } else {
            self.fields.push((name.to_owned(), spec));
        }
        self
    }

    pub fn build(self) -> ComponentSchema {
        ComponentSchema {
            name: self.name,
            fields: self.fields,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
