//! Query resolution: alias expansion, backend dispatch, set combination
//!
//! The parsed tree is walked bottom-up; backend leaves resolve through the
//! registry and interior nodes combine their children with the mapped set
//! operator. Alias expansion is recursive with an explicit visited set
//! carried along the current path, so cycles are detected rather than
//! overflowing the stack.

use crate::core::error::{Error, Result};
use crate::nodeset::NodeSet;
use crate::query::ast::{Item, Operator, Query};
use crate::query::parser;
use crate::query::registry::BackendRegistry;
use std::collections::HashMap;
use tracing::debug;

pub struct QueryResolver<'a> {
    registry: &'a BackendRegistry,
    aliases: &'a HashMap<String, String>,
    default_backend: Option<&'a str>,
}

impl<'a> QueryResolver<'a> {
    pub fn new(
        registry: &'a BackendRegistry,
        aliases: &'a HashMap<String, String>,
        default_backend: Option<&'a str>,
    ) -> Self {
        Self {
            registry,
            aliases,
            default_backend,
        }
    }

    /// Resolve a composite query string to a NodeSet.
    ///
    /// When a default backend is configured the raw input is first tried
    /// against that backend's own grammar; only on a grammar failure is it
    /// parsed as a global-grammar query.
    pub async fn resolve(&self, text: &str) -> Result<NodeSet> {
        if let Some(name) = self.default_backend {
            let backend = self.registry.get_by_name(name).ok_or_else(|| {
                Error::config(format!("default_backend '{name}' is not registered"))
            })?;
            if backend.validate(text).is_ok() {
                debug!(backend = name, "Resolving through the default backend");
                return backend.resolve(text).await;
            }
        }

        let query = parser::parse(text)?;
        let mut visited = Vec::new();
        self.eval_query(&query, &mut visited).await
    }

    async fn eval_query(&self, query: &Query, visited: &mut Vec<String>) -> Result<NodeSet> {
        let mut result = self.eval_item(&query.first, visited).await?;
        for (op, item) in &query.rest {
            let rhs = self.eval_item(item, visited).await?;
            result = match op {
                Operator::Union => &result | &rhs,
                Operator::Intersection => &result & &rhs,
                Operator::Difference => &result - &rhs,
                Operator::SymmetricDifference => &result ^ &rhs,
            };
        }
        Ok(result)
    }

    async fn eval_item(&self, item: &Item, visited: &mut Vec<String>) -> Result<NodeSet> {
        match item {
            Item::Backend { prefix, payload } => {
                let backend = self.registry.get(*prefix).ok_or(Error::Parse {
                    position: 0,
                    message: format!("no backend registered for prefix '{prefix}'"),
                })?;
                backend.resolve(payload).await
            }
            Item::Alias(name) => {
                if visited.iter().any(|seen| seen == name) {
                    return Err(Error::CyclicAlias { name: name.clone() });
                }
                let text = self.aliases.get(name).ok_or_else(|| Error::UnknownAlias {
                    name: name.clone(),
                })?;
                let parsed = parser::parse(text)?;
                visited.push(name.clone());
                let result = Box::pin(self.eval_query(&parsed, visited)).await;
                visited.pop();
                result
            }
            Item::Group(inner) => Box::pin(self.eval_query(inner, visited)).await,
        }
    }
}
