//! Hierarchical resource addresses.
//!
//! Structural metadata is addressed as
//! `pgscope://schemas/{schema}[/{tables|views|procedures}[/{name}]]`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PgScopeError, Result};

/// Scheme marker for every resource address.
pub const RESOURCE_SCHEME: &str = "pgscope://";

/// Root segment under the scheme.
const SCHEMAS_SEGMENT: &str = "schemas";

/// MIME type of every successful resource read.
pub const JSON_MIME_TYPE: &str = "application/json";

/// Kind of object container within a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectCategory {
    /// Base tables
    Tables,
    /// Views
    Views,
    /// Stored procedures
    Procedures,
}

impl ObjectCategory {
    /// All categories, in listing order.
    pub const ALL: [ObjectCategory; 3] = [Self::Tables, Self::Views, Self::Procedures];

    /// Path segment for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tables => "tables",
            Self::Views => "views",
            Self::Procedures => "procedures",
        }
    }

    /// Singular form, used in cache keys for single objects.
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Tables => "table",
            Self::Views => "view",
            Self::Procedures => "procedure",
        }
    }

    /// Human-readable plural.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Tables => "Tables",
            Self::Views => "Views",
            Self::Procedures => "Procedures",
        }
    }

    /// Parse from a path segment (exact, lowercase).
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "tables" => Some(Self::Tables),
            "views" => Some(Self::Views),
            "procedures" => Some(Self::Procedures),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed resource address, most specific last.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceAddress {
    /// `pgscope://schemas/{schema}`
    Schema { schema: String },
    /// `pgscope://schemas/{schema}/{category}`
    Collection { schema: String, category: ObjectCategory },
    /// `pgscope://schemas/{schema}/{category}/{name}`
    Object { schema: String, category: ObjectCategory, name: String },
}

impl ResourceAddress {
    /// Parse an address. Anything that is not one of the three shapes is an
    /// `UnknownResource` error; there is no default.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(RESOURCE_SCHEME)
            .ok_or_else(|| PgScopeError::unknown_resource_with_reason(uri, "unsupported scheme"))?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.first() != Some(&SCHEMAS_SEGMENT) {
            return Err(PgScopeError::unknown_resource(uri));
        }
        if segments[1..].iter().any(|s| s.is_empty()) {
            return Err(PgScopeError::unknown_resource_with_reason(uri, "empty path segment"));
        }

        let category = |segment: &str| {
            ObjectCategory::parse(segment).ok_or_else(|| {
                PgScopeError::unknown_resource_with_reason(
                    uri,
                    format!("unknown category '{segment}'"),
                )
            })
        };

        match segments[1..] {
            [schema] => Ok(Self::Schema { schema: schema.to_string() }),
            [schema, cat] => {
                Ok(Self::Collection { schema: schema.to_string(), category: category(cat)? })
            }
            [schema, cat, name] => Ok(Self::Object {
                schema: schema.to_string(),
                category: category(cat)?,
                name: name.to_string(),
            }),
            _ => Err(PgScopeError::unknown_resource(uri)),
        }
    }

    /// Schema this address belongs to.
    pub fn schema(&self) -> &str {
        match self {
            Self::Schema { schema }
            | Self::Collection { schema, .. }
            | Self::Object { schema, .. } => schema,
        }
    }

    /// Category, if the address names one.
    pub fn category(&self) -> Option<ObjectCategory> {
        match self {
            Self::Schema { .. } => None,
            Self::Collection { category, .. } | Self::Object { category, .. } => Some(*category),
        }
    }

    /// Object name, if the address names one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Object { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Render back to URI form.
    pub fn to_uri(&self) -> String {
        match self {
            Self::Schema { schema } => format!("{RESOURCE_SCHEME}{SCHEMAS_SEGMENT}/{schema}"),
            Self::Collection { schema, category } => {
                format!("{RESOURCE_SCHEME}{SCHEMAS_SEGMENT}/{schema}/{category}")
            }
            Self::Object { schema, category, name } => {
                format!("{RESOURCE_SCHEME}{SCHEMAS_SEGMENT}/{schema}/{category}/{name}")
            }
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

/// An entry in the resource listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

impl ResourceDescriptor {
    /// Describe a schema or collection address.
    pub fn for_address(address: &ResourceAddress) -> Self {
        let schema = address.schema();
        let (name, description) = match address {
            ResourceAddress::Schema { .. } => {
                (format!("Schema: {schema}"), format!("Resources for the {schema} schema"))
            }
            ResourceAddress::Collection { category, .. } => (
                format!("{} in {schema}", category.title()),
                format!("List of {} in the {schema} schema", category.as_str()),
            ),
            ResourceAddress::Object { category, name, .. } => (
                format!("{schema}.{name}"),
                format!("Details of {} {schema}.{name}", category.singular()),
            ),
        };

        Self { uri: address.to_uri(), name, description, mime_type: JSON_MIME_TYPE.to_string() }
    }
}

/// Payload returned from a resource read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}
