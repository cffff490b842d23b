/*!
 * Property schemas.
 *
 * A [`PropertySet`] is the ordered list of [`PropertyDescriptor`]s derived from
 * a struct implementing [`Schema`]. Descriptors carry the declared name, the
 * type as written, the validation rules, a description and free-form extras,
 * plus the resolved Rust type used to cast, check and encode values.
 *
 * Structs are normally declared through the [`schema!`](crate::schema!) macro:
 *
 * ```
 * tmios_devices::schema! {
 *     #[derive(Debug, Clone, PartialEq)]
 *     pub struct SetTarget {
 *         pub target: f64 => { validate: "gte=5,lte=35", desc: "Target temperature" },
 *         pub zone: String as "zoneId",
 *     }
 * }
 * ```
 */
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value as Json;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::validate::{self, Rule, RuleParseError, ValidationErrors, Violation};

/// A type-erased property value
pub type PropValue = Arc<dyn Any + Send + Sync>;

/// Error type for schema construction and value handling
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The schema source does not serialize to an object
    #[error("{type_name} is not struct-shaped")]
    NotStruct {
        /// Rust type name of the schema source
        type_name: &'static str,
    },

    /// Declared fields and serialized fields disagree
    #[error("{type_name}: field '{field}' {problem}")]
    FieldMismatch {
        /// Rust type name of the schema source
        type_name: &'static str,
        /// The field name
        field: String,
        /// What is wrong with it
        problem: &'static str,
    },

    /// Two fields resolve to the same property name
    #[error("{type_name}: property '{name}' declared twice")]
    DuplicateProperty {
        /// Rust type name of the schema source
        type_name: &'static str,
        /// The repeated name
        name: String,
    },

    /// A validation rule could not be parsed
    #[error("property '{property}': {source}")]
    InvalidRule {
        /// The property declaring the rule
        property: String,
        /// The parse failure
        #[source]
        source: RuleParseError,
    },

    /// Malformed payload
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// A value could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// A value's runtime type is not the property's type
    #[error("value of '{property}' is not {expected} type")]
    TypeMismatch {
        /// The property name
        property: String,
        /// The declared type
        expected: String,
    },

    /// A decoded value broke its validation rules
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

impl SchemaError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::NotStruct { .. }
            | SchemaError::FieldMismatch { .. }
            | SchemaError::DuplicateProperty { .. }
            | SchemaError::InvalidRule { .. } => ErrorKind::Configuration,
            SchemaError::Decode(_) => ErrorKind::Decode,
            SchemaError::Encode(_) => ErrorKind::Encode,
            SchemaError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            SchemaError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// The resolved Rust type behind a property
///
/// Built once from a concrete type; holds the monomorphized functions that
/// decode, encode and default-construct values of that type.
#[derive(Clone, Copy)]
pub struct PropertyType {
    type_id: TypeId,
    type_name: &'static str,
    decode: fn(&[u8]) -> serde_json::Result<PropValue>,
    encode: fn(&(dyn Any + Send + Sync)) -> Option<serde_json::Result<Json>>,
    zero: fn() -> PropValue,
}

impl PropertyType {
    /// Resolve the property type for `T`
    pub fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_as::<T>,
            encode: encode_as::<T>,
            zero: zero_of::<T>,
        }
    }

    /// The resolved type id
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The fully-qualified Rust type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether this is the type `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for PropertyType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl fmt::Debug for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyType").field(&self.type_name).finish()
    }
}

fn decode_as<T>(raw: &[u8]) -> serde_json::Result<PropValue>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Ok(Arc::new(serde_json::from_slice::<T>(raw)?))
}

fn encode_as<T: Serialize + 'static>(value: &(dyn Any + Send + Sync)) -> Option<serde_json::Result<Json>> {
    value.downcast_ref::<T>().map(serde_json::to_value)
}

fn zero_of<T: Default + Send + Sync + 'static>() -> PropValue {
    Arc::new(T::default())
}

/// Builds the property set of a field whose type is itself a schema struct
pub type NestedFn = fn() -> Result<PropertySet, SchemaError>;

/// Type marker used by [`schema!`](crate::schema!) to find fields whose type
/// implements [`Schema`]
///
/// `(&FieldShape::<T>::new()).nested_set()` resolves to [`NestedSchema`] when
/// `T: Schema` and falls back to [`PlainField`] otherwise. Both traits must be
/// in scope at the call site.
#[doc(hidden)]
pub struct FieldShape<T>(PhantomData<fn() -> T>);

impl<T> FieldShape<T> {
    #[doc(hidden)]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

#[doc(hidden)]
pub trait NestedSchema {
    fn nested_set(&self) -> Option<NestedFn>;
}

impl<T: Schema> NestedSchema for FieldShape<T> {
    fn nested_set(&self) -> Option<NestedFn> {
        Some(PropertySet::of::<T>)
    }
}

#[doc(hidden)]
pub trait PlainField {
    fn nested_set(&self) -> Option<NestedFn>;
}

impl<T> PlainField for &FieldShape<T> {
    fn nested_set(&self) -> Option<NestedFn> {
        None
    }
}

/// The declaration of one struct field, as produced by [`Schema::fields`]
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    type_tag: String,
    validate: String,
    desc: String,
    extras: String,
    resolved: PropertyType,
    nested: Option<NestedFn>,
}

impl FieldSpec {
    /// Declare a field of type `T`
    ///
    /// `field` is the field identifier, `type_tag` the type as written.
    pub fn new<T>(field: &str, type_tag: &str) -> Self
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    {
        Self {
            name: field.to_string(),
            type_tag: type_tag.to_string(),
            validate: String::new(),
            desc: String::new(),
            extras: String::new(),
            resolved: PropertyType::of::<T>(),
            nested: None,
        }
    }

    /// Validate the field's own fields with this property set builder
    ///
    /// Set by [`schema!`](crate::schema!) for fields whose type is a schema
    /// struct.
    pub fn nested(mut self, nested: Option<NestedFn>) -> Self {
        self.nested = nested;
        self
    }

    /// Serialized name, overriding the field identifier
    pub fn rename(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Validation rules, e.g. `required,gte=5`
    pub fn validate(mut self, rules: &str) -> Self {
        self.validate = rules.to_string();
        self
    }

    /// Human-readable description
    pub fn desc(mut self, desc: &str) -> Self {
        self.desc = desc.to_string();
        self
    }

    /// Free-form extras, passed through untouched
    pub fn extras(mut self, extras: &str) -> Self {
        self.extras = extras.to_string();
        self
    }
}

/// A struct whose fields can be described as a [`PropertySet`]
///
/// The struct must serialize to a JSON object with exactly one key per
/// declared field. Implemented by [`schema!`](crate::schema!).
pub trait Schema: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// The declared fields, in declaration order
    fn fields() -> Vec<FieldSpec>;
}

/// Describes one property of a config, properties, args or rets struct
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDescriptor {
    name: String,
    #[serde(rename = "type")]
    type_tag: String,
    validate: String,
    desc: String,
    extras: String,
    #[serde(skip)]
    rules: Vec<Rule>,
    #[serde(skip)]
    nested: Option<PropertySet>,
    #[serde(skip)]
    resolved: PropertyType,
}

impl PropertyDescriptor {
    fn from_spec(spec: FieldSpec) -> Result<Self, SchemaError> {
        let rules = validate::parse_rules(&spec.validate).map_err(|source| SchemaError::InvalidRule {
            property: spec.name.clone(),
            source,
        })?;
        let nested = spec.nested.map(|build| build()).transpose()?;

        Ok(Self {
            name: spec.name,
            type_tag: spec.type_tag,
            validate: spec.validate,
            desc: spec.desc,
            extras: spec.extras,
            rules,
            nested,
            resolved: spec.resolved,
        })
    }

    /// The property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared type, as written in the struct
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The validation rule text
    pub fn validate(&self) -> &str {
        &self.validate
    }

    /// The parsed validation rules
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The description
    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// The extras
    pub fn extras(&self) -> &str {
        &self.extras
    }

    /// The property set of the field's type, when it is a schema struct
    pub fn nested(&self) -> Option<&PropertySet> {
        self.nested.as_ref()
    }

    /// Whether this property, or any nested one, declares rules
    fn has_rules(&self) -> bool {
        !self.rules.is_empty() || self.nested.as_ref().map_or(false, PropertySet::has_rules)
    }

    /// The resolved Rust type
    pub fn property_type(&self) -> &PropertyType {
        &self.resolved
    }

    /// Fail unless `value` is exactly of the resolved type
    pub fn check(&self, value: &(dyn Any + Send + Sync)) -> Result<(), SchemaError> {
        if (*value).type_id() != self.resolved.type_id {
            return Err(self.mismatch());
        }
        Ok(())
    }

    /// Decode raw bytes into a fresh value of the resolved type
    pub fn cast(&self, raw: &[u8]) -> Result<PropValue, SchemaError> {
        (self.resolved.decode)(raw).map_err(SchemaError::Decode)
    }

    /// Decode raw bytes into `T`, which must be the resolved type
    pub fn cast_as<T: DeserializeOwned + 'static>(&self, raw: &[u8]) -> Result<T, SchemaError> {
        if !self.resolved.is::<T>() {
            return Err(self.mismatch());
        }
        serde_json::from_slice(raw).map_err(SchemaError::Decode)
    }

    /// Encode a value of the resolved type to JSON
    pub fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Json, SchemaError> {
        match (self.resolved.encode)(value) {
            Some(encoded) => encoded.map_err(SchemaError::Encode),
            None => Err(self.mismatch()),
        }
    }

    /// A fresh default value of the resolved type
    pub fn zero(&self) -> PropValue {
        (self.resolved.zero)()
    }

    fn mismatch(&self) -> SchemaError {
        SchemaError::TypeMismatch {
            property: self.name.clone(),
            expected: self.type_tag.clone(),
        }
    }
}

/// Decode raw bytes into a fresh value of the descriptor's type
pub fn cast(raw: &[u8], descriptor: &PropertyDescriptor) -> Result<PropValue, SchemaError> {
    descriptor.cast(raw)
}

/// The struct a [`PropertySet`] was derived from
#[derive(Clone, Copy)]
pub struct SchemaOrigin {
    type_id: TypeId,
    type_name: &'static str,
    canonicalize: fn(&PropertySet, &[u8]) -> Result<Vec<u8>, SchemaError>,
}

impl SchemaOrigin {
    fn of<S: Schema>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
            canonicalize: canonicalize_as::<S>,
        }
    }

    /// The origin type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the origin is `S`
    pub fn is<S: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }
}

impl PartialEq for SchemaOrigin {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl fmt::Debug for SchemaOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchemaOrigin").field(&self.type_name).finish()
    }
}

fn canonicalize_as<S: Schema>(set: &PropertySet, raw: &[u8]) -> Result<Vec<u8>, SchemaError> {
    let value: S = set.decode(raw)?;
    serde_json::to_vec(&value).map_err(SchemaError::Encode)
}

/// Ordered descriptors for every field of a schema struct
///
/// Serializes as the plain list of descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySet {
    props: Vec<PropertyDescriptor>,
    origin: SchemaOrigin,
}

/// Build the property set of `S`
pub fn build_property_set<S: Schema>() -> Result<PropertySet, SchemaError> {
    PropertySet::of::<S>()
}

impl PropertySet {
    /// Build the property set of `S`
    ///
    /// Fails when `S` does not serialize to an object, when its declared
    /// fields and serialized keys disagree, when two fields share a name or
    /// when a validation rule does not parse.
    pub fn of<S: Schema>() -> Result<Self, SchemaError> {
        let type_name = std::any::type_name::<S>();
        let shape = serde_json::to_value(S::default()).map_err(SchemaError::Encode)?;
        let Json::Object(keys) = shape else {
            return Err(SchemaError::NotStruct { type_name });
        };

        let mut props: Vec<PropertyDescriptor> = Vec::new();
        for spec in S::fields() {
            if props.iter().any(|p| p.name == spec.name) {
                return Err(SchemaError::DuplicateProperty {
                    type_name,
                    name: spec.name,
                });
            }
            if !keys.contains_key(&spec.name) {
                return Err(SchemaError::FieldMismatch {
                    type_name,
                    field: spec.name,
                    problem: "is declared but not serialized",
                });
            }
            props.push(PropertyDescriptor::from_spec(spec)?);
        }

        if let Some(key) = keys.keys().find(|key| !props.iter().any(|p| &p.name == *key)) {
            return Err(SchemaError::FieldMismatch {
                type_name,
                field: key.clone(),
                problem: "is serialized but not declared",
            });
        }

        Ok(Self {
            props,
            origin: SchemaOrigin::of::<S>(),
        })
    }

    /// Look up a property by name
    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.props.iter().find(|p| p.name == name)
    }

    /// Iterate over the properties in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, PropertyDescriptor> {
        self.props.iter()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// Whether the set has no properties
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// The struct this set was derived from
    pub fn origin(&self) -> &SchemaOrigin {
        &self.origin
    }

    fn has_rules(&self) -> bool {
        self.props.iter().any(PropertyDescriptor::has_rules)
    }

    /// Validate the JSON form of a value against every property's rules
    ///
    /// Fields whose type is a schema struct are validated recursively; their
    /// violations are reported as `parent.field`.
    pub fn validate_json(&self, value: &Json) -> Result<(), SchemaError> {
        let Json::Object(fields) = value else {
            return Err(SchemaError::NotStruct {
                type_name: self.origin.type_name,
            });
        };

        let mut violations = Vec::new();
        self.collect_violations(fields, "", &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::new(violations).into())
        }
    }

    fn collect_violations(&self, fields: &serde_json::Map<String, Json>, prefix: &str, out: &mut Vec<Violation>) {
        for prop in self.props.iter().filter(|p| p.has_rules()) {
            let path = format!("{}{}", prefix, prop.name);
            let value = fields.get(&prop.name).unwrap_or(&Json::Null);

            if let Some(violation) = validate::check(&path, &prop.rules, value) {
                out.push(violation);
            }
            // A null nested struct has nothing to descend into
            if let (Some(nested), Json::Object(inner)) = (&prop.nested, value) {
                nested.collect_violations(inner, &format!("{}.", path), out);
            }
        }
    }

    /// Validate a value against every property's rules
    pub fn validate_value<T: Serialize>(&self, value: &T) -> Result<(), SchemaError> {
        if !self.has_rules() {
            return Ok(());
        }
        let json = serde_json::to_value(value).map_err(SchemaError::Encode)?;
        self.validate_json(&json)
    }

    /// Decode raw bytes into a fresh `T` and validate it
    pub fn decode<T: Serialize + DeserializeOwned>(&self, raw: &[u8]) -> Result<T, SchemaError> {
        let value: T = serde_json::from_slice(raw).map_err(SchemaError::Decode)?;
        self.validate_value(&value)?;
        Ok(value)
    }

    /// Decode into a fresh instance of the origin struct, validate it and
    /// re-encode it
    pub fn canonicalize(&self, raw: &[u8]) -> Result<Vec<u8>, SchemaError> {
        (self.origin.canonicalize)(self, raw)
    }
}

impl<'a> IntoIterator for &'a PropertySet {
    type Item = &'a PropertyDescriptor;
    type IntoIter = std::slice::Iter<'a, PropertyDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.props.iter()
    }
}

impl Serialize for PropertySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.props)
    }
}

/// Declare a schema struct
///
/// Expands to the struct itself, deriving `Serialize`, `Deserialize` and
/// `Default` (missing fields decode to their defaults), and to its
/// [`Schema`](crate::schema::Schema) implementation. Each field may carry a
/// serialized name (`as "name"`) and any of the `validate`, `desc` and
/// `extras` keys. The calling crate must depend on `serde`.
#[macro_export]
macro_rules! schema {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fattr:meta])*
                $fvis:vis $field:ident : $ty:ty $(as $rename:literal)? $(=> { $($key:ident : $val:expr),* $(,)? })?
            ),* $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(::serde::Serialize, ::serde::Deserialize, ::core::default::Default)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$fattr])*
                $(#[serde(rename = $rename)])?
                $fvis $field: $ty,
            )*
        }

        impl $crate::schema::Schema for $name {
            fn fields() -> ::std::vec::Vec<$crate::schema::FieldSpec> {
                ::std::vec![
                    $(
                        $crate::schema::FieldSpec::new::<$ty>(stringify!($field), stringify!($ty))
                            .nested({
                                #[allow(unused_imports)]
                                use $crate::schema::{NestedSchema as _, PlainField as _};
                                (&$crate::schema::FieldShape::<$ty>::new()).nested_set()
                            })
                            $(.rename($rename))?
                            $($(.$key($val))*)?
                    ),*
                ]
            }
        }
    };
}

crate::schema! {
    /// A schema with no fields, for models without config or properties and
    /// actions without arguments or results
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Empty {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    crate::schema! {
        #[derive(Debug, Clone, PartialEq)]
        struct Gauge {
            /// Sensor address on the bus
            address: String => { validate: "required", desc: "Bus address", extras: "unit=none" },
            offset: f64 as "calibrationOffset" => { validate: "gte=-5,lte=5" },
            channels: Vec<u8>,
            label: Option<String>,
        }
    }

    #[test]
    fn test_build_property_set_order_and_names() {
        let set = build_property_set::<Gauge>().unwrap();
        let names: Vec<_> = set.iter().map(PropertyDescriptor::name).collect();
        assert_eq!(names, ["address", "calibrationOffset", "channels", "label"]);

        let address = set.get("address").unwrap();
        assert_eq!(address.type_tag(), "String");
        assert_eq!(address.validate(), "required");
        assert_eq!(address.rules(), &[Rule::Required]);
        assert_eq!(address.desc(), "Bus address");
        assert_eq!(address.extras(), "unit=none");

        let offset = set.get("calibrationOffset").unwrap();
        assert_eq!(offset.type_tag(), "f64");
        assert!(offset.property_type().is::<f64>());
        assert!(set.get("offset").is_none());

        assert!(set.origin().is::<Gauge>());
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_property_set_serializes_as_list() {
        let set = build_property_set::<Gauge>().unwrap();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json[1]["name"], "calibrationOffset");
        assert_eq!(json[1]["type"], "f64");
        assert_eq!(json[1]["validate"], "gte=-5,lte=5");
        assert_eq!(json[0].as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_check_is_strict() {
        let set = build_property_set::<Gauge>().unwrap();
        let offset = set.get("calibrationOffset").unwrap();

        assert!(offset.check(&1.5f64).is_ok());
        let err = offset.check(&1.5f32).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(offset.check(&"1.5").is_err());
        assert!(offset.check(&1i64).is_err());
    }

    #[test]
    fn test_cast() {
        let set = build_property_set::<Gauge>().unwrap();
        let channels = set.get("channels").unwrap();

        let value = cast(b"[1, 2, 3]", channels).unwrap();
        assert_eq!(value.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
        assert!(channels.check(&*value).is_ok());

        let err = channels.cast(b"[1, \"two\"]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);

        assert_eq!(channels.cast_as::<Vec<u8>>(b"[9]").unwrap(), vec![9]);
        assert!(matches!(
            channels.cast_as::<Vec<u16>>(b"[9]"),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_and_zero() {
        let set = build_property_set::<Gauge>().unwrap();
        let label = set.get("label").unwrap();

        let value: PropValue = Arc::new(Some("boiler room".to_string()));
        assert_eq!(label.encode(&*value).unwrap(), serde_json::json!("boiler room"));
        assert!(label.encode(&42u8).is_err());

        let zero = label.zero();
        assert_eq!(zero.downcast_ref::<Option<String>>(), Some(&None));
    }

    #[test]
    fn test_decode_validates() {
        let set = build_property_set::<Gauge>().unwrap();

        let gauge: Gauge = set
            .decode(br#"{"address": "0x1f", "calibrationOffset": 1.25}"#)
            .unwrap();
        assert_eq!(gauge.address, "0x1f");
        assert_eq!(gauge.offset, 1.25);
        assert!(gauge.channels.is_empty());

        let err = set
            .decode::<Gauge>(br#"{"address": "", "calibrationOffset": 9}"#)
            .unwrap_err();
        let SchemaError::Validation(violations) = err else {
            panic!("expected a validation error");
        };
        assert!(violations.has("address"));
        assert!(violations.has("calibrationOffset"));

        let err = set.decode::<Gauge>(b"{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_canonicalize() {
        let set = build_property_set::<Gauge>().unwrap();
        let raw = set
            .canonicalize(br#"{"address": "0x1f", "ignored": true}"#)
            .unwrap();
        let json: Json = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "address": "0x1f",
                "calibrationOffset": 0.0,
                "channels": [],
                "label": null,
            })
        );
    }

    #[test]
    fn test_round_trip() {
        let gauge = Gauge {
            address: "0x2a".to_string(),
            offset: -0.5,
            channels: vec![3, 4],
            label: Some("return pipe".to_string()),
        };
        let raw = serde_json::to_vec(&gauge).unwrap();
        let set = build_property_set::<Gauge>().unwrap();
        assert_eq!(set.decode::<Gauge>(&raw).unwrap(), gauge);
    }

    crate::schema! {
        #[derive(Debug, Clone, PartialEq)]
        struct Stage {
            level: u8 => { validate: "lte=5" },
        }
    }

    crate::schema! {
        #[derive(Debug, Clone, PartialEq)]
        struct Burner {
            label: String => { validate: "required" },
            first: Stage as "firstStage",
            spare: Option<Stage>,
        }
    }

    crate::schema! {
        #[derive(Debug, Clone, PartialEq)]
        struct Boiler {
            burner: Burner,
        }
    }

    #[test]
    fn test_nested_property_sets() {
        let set = build_property_set::<Burner>().unwrap();
        let first = set.get("firstStage").unwrap().nested().unwrap();
        assert_eq!(first, &build_property_set::<Stage>().unwrap());
        // Only direct schema fields are descended into
        assert!(set.get("spare").unwrap().nested().is_none());
        assert!(set.get("label").unwrap().nested().is_none());
    }

    #[test]
    fn test_decode_validates_nested_fields() {
        let set = build_property_set::<Boiler>().unwrap();

        let boiler: Boiler = set
            .decode(br#"{"burner": {"label": "main", "firstStage": {"level": 3}}}"#)
            .unwrap();
        assert_eq!(boiler.burner.first.level, 3);

        let err = set
            .decode::<Boiler>(br#"{"burner": {"label": "", "firstStage": {"level": 9}}}"#)
            .unwrap_err();
        let SchemaError::Validation(violations) = err else {
            panic!("expected a validation error");
        };
        assert!(violations.has("burner.label"));
        assert!(violations.has("burner.firstStage.level"));
        assert_eq!(violations.violations().len(), 2);
        assert!(violations.to_string().contains("burner.firstStage.level must be less than or equal to 5"));

        // Rules of a nested struct also apply when it sits at the top level
        let stage_set = build_property_set::<Stage>().unwrap();
        assert_eq!(
            set.decode::<Boiler>(br#"{"burner": {"label": "x", "firstStage": {"level": 6}}}"#)
                .unwrap_err()
                .kind(),
            stage_set.decode::<Stage>(br#"{"level": 6}"#).unwrap_err().kind()
        );
    }

    #[test]
    fn test_nested_canonicalize_rejects_bad_inner_value() {
        let set = build_property_set::<Burner>().unwrap();
        assert!(set.canonicalize(br#"{"label": "pilot", "firstStage": {"level": 2}}"#).is_ok());
        let err = set
            .canonicalize(br#"{"label": "pilot", "firstStage": {"level": 8}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_empty_schema() {
        let set = build_property_set::<Empty>().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.canonicalize(b"{}").unwrap(), b"{}");
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    struct Celsius(f64);

    impl Schema for Celsius {
        fn fields() -> Vec<FieldSpec> {
            Vec::new()
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Drifted {
        level: u8,
    }

    impl Schema for Drifted {
        fn fields() -> Vec<FieldSpec> {
            vec![FieldSpec::new::<u8>("lvl", "u8")]
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Twice {
        level: u8,
    }

    impl Schema for Twice {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::new::<u8>("level", "u8"),
                FieldSpec::new::<u8>("level", "u8"),
            ]
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct BadRule {
        level: u8,
    }

    impl Schema for BadRule {
        fn fields() -> Vec<FieldSpec> {
            vec![FieldSpec::new::<u8>("level", "u8").validate("between=1 5")]
        }
    }

    #[test]
    fn test_build_rejects_malformed_schemas() {
        let err = build_property_set::<Celsius>().unwrap_err();
        assert!(matches!(err, SchemaError::NotStruct { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = build_property_set::<Drifted>().unwrap_err();
        assert!(matches!(err, SchemaError::FieldMismatch { ref field, .. } if field == "lvl"));

        let err = build_property_set::<Twice>().unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateProperty { .. }));

        let err = build_property_set::<BadRule>().unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRule { ref property, .. } if property == "level"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
