//! Definition types - validated entity and relationship metadata

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Length assumed for string properties that do not declare one
pub const DEFAULT_STRING_LEN: u32 = 255;

/// Width of generated surrogate keys when the primary property has no length
pub const DEFAULT_KEY_WIDTH: u32 = 32;

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

/// Names end up unquoted in generated SQL, so only plain identifiers are allowed.
pub(crate) fn check_identifier(owner: &str, what: &str, value: &str) -> Result<()> {
    let re = IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
    if re.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidSchema {
            name: owner.to_string(),
            reason: format!("{what} '{value}' is not a valid identifier"),
        })
    }
}

fn invalid(owner: &str, reason: impl Into<String>) -> Error {
    Error::InvalidSchema {
        name: owner.to_string(),
        reason: reason.into(),
    }
}

// ========== Property Definitions ==========

/// Logical datatype of a property.
///
/// Unknown spellings are kept as `Other` rather than rejected; they map to a
/// plain text column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Datatype {
    String,
    Int,
    Float,
    Bool,
    Date,
    DateTime,
    Array,
    Object,
    Relationship,
    Other(String),
}

impl Datatype {
    pub fn as_str(&self) -> &str {
        match self {
            Datatype::String => "string",
            Datatype::Int => "int",
            Datatype::Float => "float",
            Datatype::Bool => "bool",
            Datatype::Date => "date",
            Datatype::DateTime => "datetime",
            Datatype::Array => "array",
            Datatype::Object => "object",
            Datatype::Relationship => "relationship",
            Datatype::Other(s) => s,
        }
    }

    /// Numeric and boolean values are embedded without quoting
    pub fn is_numeric(&self) -> bool {
        matches!(self, Datatype::Int | Datatype::Float | Datatype::Bool)
    }
}

impl From<String> for Datatype {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "string" => Datatype::String,
            "int" | "integer" => Datatype::Int,
            "float" | "numeric" => Datatype::Float,
            "bool" | "boolean" => Datatype::Bool,
            "date" => Datatype::Date,
            "datetime" => Datatype::DateTime,
            "array" => Datatype::Array,
            "object" => Datatype::Object,
            "relationship" => Datatype::Relationship,
            _ => Datatype::Other(s),
        }
    }
}

impl From<Datatype> for String {
    fn from(d: Datatype) -> Self {
        d.as_str().to_string()
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a property's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Source {
    #[default]
    #[serde(rename = "db")]
    Db,
    #[serde(rename = "non-db", alias = "nondb")]
    NonDb,
}

/// UI field kinds. Closed set: an unknown kind fails when the declaration loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    TextArea,
    Password,
    Email,
    Number,
    Checkbox,
    Select,
    MultiSelect,
    Date,
    DateTime,
    Hidden,
    Relationship,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::TextArea => "textarea",
            FieldKind::Password => "password",
            FieldKind::Email => "email",
            FieldKind::Number => "number",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Select => "select",
            FieldKind::MultiSelect => "multiselect",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Hidden => "hidden",
            FieldKind::Relationship => "relationship",
        }
    }
}

impl FromStr for FieldKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(Value::String(s.to_lowercase()))
            .map_err(|_| Error::Parse(format!("Unknown field kind: {s}")))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative metadata for one field of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub datatype: Datatype,
    #[serde(default)]
    pub source: Source,
    #[serde(default, rename = "fieldtype")]
    pub field_kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u32>,
    #[serde(default, rename = "defaultvalue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, alias = "isPrimary")]
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PropertyDefinition {
    /// Create a db-backed property with no constraints
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            source: Source::Db,
            field_kind: FieldKind::Text,
            required: false,
            len: None,
            default_value: None,
            is_primary: false,
            relationship: None,
            options: Vec::new(),
            label: None,
        }
    }

    pub fn with_len(mut self, len: u32) -> Self {
        self.len = Some(len);
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn non_db(mut self) -> Self {
        self.source = Source::NonDb;
        self
    }

    /// Whether this property has a column of its own
    pub fn is_db_backed(&self) -> bool {
        self.source == Source::Db && self.datatype != Datatype::Relationship
    }

    pub fn is_relationship(&self) -> bool {
        self.datatype == Datatype::Relationship
    }

    /// Human label for messages
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Width of key values stored in this column
    pub fn key_width(&self) -> u32 {
        self.len.unwrap_or(DEFAULT_KEY_WIDTH)
    }

    /// Look up a declared attribute by its declaration-file spelling
    pub fn attribute(&self, attribute: &str) -> Option<Value> {
        match serde_json::to_value(self).ok()? {
            Value::Object(mut map) => map.remove(attribute),
            _ => None,
        }
    }

    /// Set a declared attribute by its declaration-file spelling
    pub fn set_attribute(&mut self, attribute: &str, value: Value) -> Result<()> {
        let name = self.name.clone();
        let mut map = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            other => return Err(Error::Parse(format!("{name}: expected an object, got {other}"))),
        };
        map.insert(attribute.to_string(), value);
        *self = serde_json::from_value(Value::Object(map))
            .map_err(|e| Error::Parse(format!("{name}.{attribute}: {e}")))?;
        Ok(())
    }
}

// ========== Entity Definitions ==========

#[derive(Deserialize)]
struct EntityDeclaration {
    name: String,
    table: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDefinition>,
}

/// A validated entity type.
///
/// # Invariants
/// - exactly one property has `is_primary` set
/// - every name is a plain SQL identifier
/// - every relationship-typed property names a relationship
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDefinition {
    pub name: String,
    pub table: String,
    properties: Vec<PropertyDefinition>,
    #[serde(skip)]
    primary: usize,
}

impl EntityDefinition {
    /// Build and validate a definition from its parts
    pub fn new(
        name: impl Into<String>,
        table: Option<String>,
        properties: Vec<PropertyDefinition>,
    ) -> Result<Self> {
        let name = name.into();
        let table = table.unwrap_or_else(|| name.clone());
        check_identifier(&name, "type name", &name)?;
        check_identifier(&name, "table", &table)?;

        let mut seen = std::collections::HashSet::new();
        for prop in &properties {
            check_identifier(&name, "property", &prop.name)?;
            if !seen.insert(prop.name.as_str()) {
                return Err(invalid(&name, format!("property '{}' is declared twice", prop.name)));
            }
            if prop.is_relationship() {
                match &prop.relationship {
                    Some(rel) => check_identifier(&name, "relationship", rel)?,
                    None => {
                        return Err(invalid(
                            &name,
                            format!("relationship property '{}' names no relationship", prop.name),
                        ));
                    }
                }
            }
        }

        let primaries: Vec<usize> = properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_primary)
            .map(|(i, _)| i)
            .collect();
        let primary = match primaries.as_slice() {
            [only] => *only,
            [] => return Err(invalid(&name, "no primary property declared")),
            _ => return Err(invalid(&name, "more than one primary property declared")),
        };
        if !properties[primary].is_db_backed() {
            return Err(invalid(&name, "the primary property must be stored in the database"));
        }

        Ok(Self {
            name,
            table,
            properties,
            primary,
        })
    }

    /// Parse a TOML declaration
    pub fn from_toml(requested: &str, text: &str) -> Result<Self> {
        let decl: EntityDeclaration =
            toml::from_str(text).map_err(|e| Error::Parse(format!("{requested}: {e}")))?;
        if decl.name != requested {
            return Err(invalid(
                requested,
                format!("declaration is named '{}'", decl.name),
            ));
        }
        Self::new(decl.name, decl.table, decl.properties)
    }

    /// Properties in declaration order
    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyDefinition> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Look up a property or fail with `UnknownProperty`
    pub fn require_property(&self, name: &str) -> Result<&PropertyDefinition> {
        self.property(name).ok_or_else(|| Error::UnknownProperty {
            entity: self.name.clone(),
            property: name.to_string(),
        })
    }

    pub fn primary(&self) -> &PropertyDefinition {
        &self.properties[self.primary]
    }

    /// Properties that own a column
    pub fn db_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.is_db_backed())
    }

    pub fn relationship_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.iter().filter(|p| p.is_relationship())
    }

    /// Re-check invariants after an attribute override
    pub(crate) fn revalidate(self) -> Result<Self> {
        Self::new(self.name, Some(self.table), self.properties)
    }
}

// ========== Relationship Definitions ==========

/// How two entity types associate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    #[serde(alias = "one-to-many", alias = "one_to_many")]
    OneToMany,
    #[serde(alias = "many-to-many", alias = "many_to_many")]
    ManyToMany,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::OneToMany => "OneToMany",
            RelationshipKind::ManyToMany => "ManyToMany",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of a relationship an entity type occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Endpoint1,
    EndpointA,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Endpoint1 => Role::EndpointA,
            Role::EndpointA => Role::Endpoint1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Endpoint1 => "endpoint1",
            Role::EndpointA => "endpointA",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One participant of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Participant type name
    pub entity: String,
    /// Key field on the participant. On the many side of a one-to-many this is the foreign key.
    pub key: String,
    /// Fields used to label linked records; joined with a space
    #[serde(default, deserialize_with = "one_or_many")]
    pub display: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[derive(Deserialize)]
struct RelationshipDeclaration {
    name: String,
    kind: RelationshipKind,
    table: Option<String>,
    endpoint1: Endpoint,
    #[serde(alias = "endpointA")]
    endpoint_a: Endpoint,
}

/// A validated relationship between two entity types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipDefinition {
    pub name: String,
    pub kind: RelationshipKind,
    /// Junction table, many-to-many only
    pub table: Option<String>,
    pub endpoint1: Endpoint,
    pub endpoint_a: Endpoint,
}

impl RelationshipDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: RelationshipKind,
        table: Option<String>,
        endpoint1: Endpoint,
        endpoint_a: Endpoint,
    ) -> Result<Self> {
        let name = name.into();
        check_identifier(&name, "relationship", &name)?;
        for endpoint in [&endpoint1, &endpoint_a] {
            check_identifier(&name, "endpoint type", &endpoint.entity)?;
            check_identifier(&name, "endpoint key", &endpoint.key)?;
            for field in &endpoint.display {
                check_identifier(&name, "display field", field)?;
            }
        }

        let table = match kind {
            RelationshipKind::ManyToMany => {
                let table = table.unwrap_or_else(|| name.clone());
                check_identifier(&name, "junction table", &table)?;
                Some(table)
            }
            RelationshipKind::OneToMany => None,
        };

        let def = Self {
            name,
            kind,
            table,
            endpoint1,
            endpoint_a,
        };

        if def.kind == RelationshipKind::ManyToMany
            && def.junction_column(Role::Endpoint1) == def.junction_column(Role::EndpointA)
        {
            return Err(invalid(
                &def.name,
                format!("both endpoints map to junction column '{}'", def.junction_column(Role::Endpoint1)),
            ));
        }

        Ok(def)
    }

    /// Parse a TOML declaration
    pub fn from_toml(requested: &str, text: &str) -> Result<Self> {
        let decl: RelationshipDeclaration =
            toml::from_str(text).map_err(|e| Error::Parse(format!("{requested}: {e}")))?;
        if decl.name != requested {
            return Err(invalid(
                requested,
                format!("declaration is named '{}'", decl.name),
            ));
        }
        Self::new(decl.name, decl.kind, decl.table, decl.endpoint1, decl.endpoint_a)
    }

    pub fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Endpoint1 => &self.endpoint1,
            Role::EndpointA => &self.endpoint_a,
        }
    }

    /// Junction column holding the given endpoint's key: `<Type>_<key>`.
    /// A self-referential relationship suffixes `_1` / `_a` to tell the sides apart.
    pub fn junction_column(&self, role: Role) -> String {
        let endpoint = self.endpoint(role);
        if !self.is_self_referential() {
            return format!("{}_{}", endpoint.entity, endpoint.key);
        }
        let side = match role {
            Role::Endpoint1 => "1",
            Role::EndpointA => "a",
        };
        format!("{}_{}_{side}", endpoint.entity, endpoint.key)
    }

    /// Alias used for the joined endpoint table
    pub fn join_alias(&self, role: Role) -> String {
        format!("{}_from_{}", self.endpoint(role).entity, self.name)
    }

    /// Alias used for the junction table inside joins
    pub fn junction_alias(&self) -> String {
        format!("{}_junction", self.name)
    }

    /// Whether both endpoints are the same type
    pub fn is_self_referential(&self) -> bool {
        self.endpoint1.entity == self.endpoint_a.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOVIES: &str = r#"
        name = "Movies"

        [[properties]]
        name = "id"
        datatype = "string"
        len = 16
        is_primary = true
        fieldtype = "hidden"

        [[properties]]
        name = "title"
        datatype = "string"
        len = 255
        required = true
        label = "Title"

        [[properties]]
        name = "fans"
        datatype = "relationship"
        source = "non-db"
        fieldtype = "multiselect"
        relationship = "Users_Movies"
    "#;

    #[test]
    fn test_entity_from_toml_keeps_order() {
        let def = EntityDefinition::from_toml("Movies", MOVIES).unwrap();
        let names: Vec<_> = def.properties().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "fans"]);
        assert_eq!(def.table, "Movies");
        assert_eq!(def.primary().name, "id");
        assert_eq!(def.db_properties().count(), 2);
        assert_eq!(def.property("fans").unwrap().field_kind, FieldKind::MultiSelect);
    }

    #[test]
    fn test_entity_requires_single_primary() {
        let props = vec![PropertyDefinition::new("a", Datatype::String)];
        assert!(matches!(
            EntityDefinition::new("T", None, props),
            Err(Error::InvalidSchema { .. })
        ));

        let props = vec![
            PropertyDefinition::new("a", Datatype::String).primary(),
            PropertyDefinition::new("b", Datatype::String).primary(),
        ];
        assert!(EntityDefinition::new("T", None, props).is_err());
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let props = vec![PropertyDefinition::new("id; DROP TABLE x", Datatype::String).primary()];
        assert!(matches!(
            EntityDefinition::new("T", None, props),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_unknown_field_kind_fails_fast() {
        let text = r#"
            name = "T"
            [[properties]]
            name = "id"
            datatype = "string"
            is_primary = true
            fieldtype = "colorwheel"
        "#;
        assert!(matches!(EntityDefinition::from_toml("T", text), Err(Error::Parse(_))));
        assert!("colorwheel".parse::<FieldKind>().is_err());
        assert_eq!("MultiSelect".parse::<FieldKind>().unwrap(), FieldKind::MultiSelect);
    }

    #[test]
    fn test_datatype_aliases() {
        assert_eq!(Datatype::from("integer".to_string()), Datatype::Int);
        assert_eq!(Datatype::from("numeric".to_string()), Datatype::Float);
        assert_eq!(Datatype::from("boolean".to_string()), Datatype::Bool);
        assert_eq!(
            Datatype::from("geometry".to_string()),
            Datatype::Other("geometry".to_string())
        );
    }

    #[test]
    fn test_relationship_display_accepts_string_or_list() {
        let text = r#"
            name = "Users_Movies"
            kind = "ManyToMany"
            table = "Users_Movies"

            [endpoint1]
            entity = "Users"
            key = "id"
            display = ["first_name", "last_name"]

            [endpoint_a]
            entity = "Movies"
            key = "id"
            display = "title"
        "#;
        let rel = RelationshipDefinition::from_toml("Users_Movies", text).unwrap();
        assert_eq!(rel.endpoint1.display, vec!["first_name", "last_name"]);
        assert_eq!(rel.endpoint_a.display, vec!["title"]);
        assert_eq!(rel.junction_column(Role::Endpoint1), "Users_id");
        assert_eq!(rel.junction_column(Role::EndpointA), "Movies_id");
        assert_eq!(rel.join_alias(Role::EndpointA), "Movies_from_Users_Movies");
    }

    #[test]
    fn test_one_to_many_has_no_junction_table() {
        let rel = RelationshipDefinition::new(
            "Users_Blogs",
            RelationshipKind::OneToMany,
            Some("ignored".to_string()),
            Endpoint { entity: "Users".into(), key: "id".into(), display: vec![] },
            Endpoint { entity: "Blogs".into(), key: "user_id".into(), display: vec![] },
        )
        .unwrap();
        assert_eq!(rel.table, None);
    }

    #[test]
    fn test_self_referential_junction_columns() {
        let endpoint = Endpoint { entity: "Users".into(), key: "id".into(), display: vec![] };
        let rel = RelationshipDefinition::new(
            "Friends",
            RelationshipKind::ManyToMany,
            None,
            endpoint.clone(),
            endpoint,
        )
        .unwrap();
        assert!(rel.is_self_referential());
        assert_eq!(rel.junction_column(Role::Endpoint1), "Users_id_1");
        assert_eq!(rel.junction_column(Role::EndpointA), "Users_id_a");
    }

    #[test]
    fn test_junction_columns_must_differ() {
        let result = RelationshipDefinition::new(
            "Pairs",
            RelationshipKind::ManyToMany,
            None,
            Endpoint { entity: "Users_x".into(), key: "id".into(), display: vec![] },
            Endpoint { entity: "Users".into(), key: "x_id".into(), display: vec![] },
        );
        assert!(matches!(result, Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn test_attribute_roundtrip() {
        let mut prop = PropertyDefinition::new("password_hash", Datatype::String).required();
        assert_eq!(prop.attribute("required"), Some(Value::Bool(true)));
        prop.set_attribute("required", Value::Bool(false)).unwrap();
        assert!(!prop.required);
        prop.set_attribute("source", Value::String("non-db".into())).unwrap();
        assert!(!prop.is_db_backed());
    }
}
