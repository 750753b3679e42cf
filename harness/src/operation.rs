//! GraphQL operations and the on-disk catalog they are loaded from.
//!
//! Documents are parsed only to learn what kind of operation they hold and
//! which root fields it asks for. Everything else is left to the server.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use async_graphql_parser::parse_query;
use async_graphql_parser::types::{ExecutableDocument, OperationType, Selection, SelectionSet};
use serde_json::{json, Map, Value};

use crate::error::{payload_error, Error, PayloadErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// A parsed GraphQL operation together with its variable bindings.
#[derive(Clone, Debug)]
pub struct Operation {
    name: String,
    text: String,
    kind: OperationKind,
    root_fields: Vec<String>,
    variables: Map<String, Value>,
}

impl Operation {
    pub fn parse(text: impl Into<String>) -> Result<Self, Error> {
        let text = text.into();
        let (kind, root_fields) = parse_document(&text)?;

        Ok(Self {
            name: root_fields[0].clone(),
            text,
            kind,
            root_fields,
            variables: Map::new(),
        })
    }

    /// Renames the operation, typically after the payload file it came from.
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root_fields(&self) -> &[String] {
        &self.root_fields
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// The `{query, variables}` object sent over HTTP or inside a WebSocket message.
    pub fn request_body(&self) -> Value {
        if self.variables.is_empty() {
            json!({ "query": self.text })
        } else {
            json!({ "query": self.text, "variables": self.variables })
        }
    }
}

/// Loads operations from `queries/`, `mutations/` and `subscriptions/` below a root directory.
#[derive(Clone, Debug)]
pub struct PayloadCatalog {
    root: PathBuf,
}

impl PayloadCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn query(&self, name: &str) -> Result<Operation, Error> {
        self.load("queries", name, OperationKind::Query)
    }

    pub fn mutation(&self, name: &str) -> Result<Operation, Error> {
        self.load("mutations", name, OperationKind::Mutation)
    }

    pub fn subscription(&self, name: &str) -> Result<Operation, Error> {
        self.load("subscriptions", name, OperationKind::Subscription)
    }

    fn load(&self, dir: &str, name: &str, expected: OperationKind) -> Result<Operation, Error> {
        let path = self.root.join(dir).join(format!("{name}.graphql"));
        let text = fs::read_to_string(&path).map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::NotFound => PayloadErrorKind::NotFound,
                _ => PayloadErrorKind::Unreadable,
            };
            payload_error(kind, &format!("{}: {err}", path.display()))
        })?;

        let operation = Operation::parse(text)?.named(name);
        if operation.kind() != expected {
            return Err(payload_error(
                PayloadErrorKind::Malformed,
                &format!(
                    "{} holds a {} but a {expected} was expected",
                    path.display(),
                    operation.kind()
                ),
            ));
        }

        Ok(operation)
    }
}

fn malformed(message: &str) -> Error {
    payload_error(PayloadErrorKind::Malformed, message)
}

fn parse_document(text: &str) -> Result<(OperationKind, Vec<String>), Error> {
    let document = parse_query(text).map_err(|err| malformed(&err.to_string()))?;

    let mut operations = document.operations.iter();
    let definition = match (operations.next(), operations.next()) {
        (Some((_, definition)), None) => &definition.node,
        (None, _) => return Err(malformed("document holds no operation")),
        (Some(_), Some(_)) => return Err(malformed("document holds more than one operation")),
    };

    let kind = match definition.ty {
        OperationType::Query => OperationKind::Query,
        OperationType::Mutation => OperationKind::Mutation,
        OperationType::Subscription => OperationKind::Subscription,
    };

    let mut fields = Vec::new();
    collect_root_fields(&document, &definition.selection_set.node, &mut Vec::new(), &mut fields)?;

    if fields.is_empty() {
        return Err(malformed("operation selects no fields"));
    }
    Ok((kind, fields))
}

/// Field names selected at the root, looking through fragment spreads and inline fragments.
fn collect_root_fields<'a>(
    document: &'a ExecutableDocument,
    selection_set: &'a SelectionSet,
    visiting: &mut Vec<&'a str>,
    fields: &mut Vec<String>,
) -> Result<(), Error> {
    for selection in &selection_set.items {
        match &selection.node {
            Selection::Field(field) => {
                let name = field.node.name.node.as_str();
                if !fields.iter().any(|known| known == name) {
                    fields.push(name.to_string());
                }
            }
            Selection::InlineFragment(fragment) => {
                collect_root_fields(document, &fragment.node.selection_set.node, visiting, fields)?;
            }
            Selection::FragmentSpread(spread) => {
                let name = spread.node.fragment_name.node.as_str();
                if visiting.contains(&name) {
                    return Err(malformed(&format!("fragment '{name}' spreads itself")));
                }
                let fragment = document
                    .fragments
                    .get(&spread.node.fragment_name.node)
                    .ok_or_else(|| malformed(&format!("unknown fragment '{name}'")))?;

                visiting.push(name);
                collect_root_fields(document, &fragment.node.selection_set.node, visiting, fields)?;
                visiting.pop();
            }
        }
    }
    Ok(())
}
