//! Introspected schema used to check operations before they are sent.
//!
//! Only root types and their field names are fetched. That is enough to catch a
//! payload that drifted from the deployed API with a clear message instead of an
//! opaque server error.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind};
use crate::operation::{Operation, OperationKind};

pub const INTROSPECTION_QUERY: &str = "query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { name fields { name } }
  }
}";

#[derive(Deserialize)]
struct IntrospectionData {
    #[serde(rename = "__schema")]
    schema: RawSchema,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    query_type: Option<NamedType>,
    mutation_type: Option<NamedType>,
    subscription_type: Option<NamedType>,
    types: Vec<RawType>,
}

#[derive(Deserialize)]
struct NamedType {
    name: String,
}

#[derive(Deserialize)]
struct RawType {
    name: String,
    #[serde(default)]
    fields: Option<Vec<NamedType>>,
}

#[derive(Debug, Default)]
pub struct Schema {
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    fields: HashMap<String, HashSet<String>>,
}

impl Schema {
    pub fn introspection_operation() -> Result<Operation, Error> {
        Operation::parse(INTROSPECTION_QUERY)
    }

    /// Builds the schema from the `data` of an introspection response.
    pub fn from_introspection(data: Value) -> Result<Self, Error> {
        let IntrospectionData { schema } = serde_json::from_value(data)?;

        let fields = schema
            .types
            .into_iter()
            .map(|ty| {
                let names = ty
                    .fields
                    .unwrap_or_default()
                    .into_iter()
                    .map(|field| field.name)
                    .collect();
                (ty.name, names)
            })
            .collect();

        Ok(Self {
            query_type: schema.query_type.map(|t| t.name),
            mutation_type: schema.mutation_type.map(|t| t.name),
            subscription_type: schema.subscription_type.map(|t| t.name),
            fields,
        })
    }

    fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Checks every root field of `operation` exists on the matching root type.
    pub fn validate(&self, operation: &Operation) -> Result<(), Error> {
        let root = self.root_type(operation.kind()).ok_or_else(|| {
            Error::new(
                ErrorKind::Validation,
                format!("schema defines no {} type", operation.kind()),
            )
        })?;
        let known = self.fields.get(root);

        for field in operation.root_fields() {
            if field.starts_with("__") {
                continue;
            }
            if !known.is_some_and(|fields| fields.contains(field)) {
                return Err(Error::new(
                    ErrorKind::Validation,
                    format!("'{field}' is not a field of {root} in '{}'", operation.name()),
                ));
            }
        }

        Ok(())
    }
}
