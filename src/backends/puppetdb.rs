//! PuppetDB backend
//!
//! Compiles the backend-local query grammar to a PuppetDB AST and resolves
//! it against the nodes or resources endpoint. API v3 sends the query as an
//! urlencoded GET parameter; v4 uses POST to avoid URL-length limits.
//!
//! Grammar:
//!   q        ::= item (("and" | "or") q)*
//!   item     ::= ["not"] atom | ["not"] "(" q ")"
//!   atom     ::= host-pattern | category ":" key [op value]
//!   category ::= "F" | "R" | "C" | "O" | "P"
//!   op       ::= "=" | ">=" | "<=" | "<" | ">" | "~"
//!
//! `C:Name` is shorthand for `R:Class = Name`, `O:Mod` for
//! `R:Class = Role::Mod`, `P:Mod` for `R:Class = Profile::Mod`.
//! `R:Type@field` selects on a resource field, `R:Type%param` on a resource
//! parameter. Backslashes inside regex literals must be doubled; they are
//! passed through to PuppetDB untouched.

use crate::backends::Backend;
use crate::core::config::PuppetDbConfig;
use crate::core::error::{Error, Result};
use crate::nodeset::NodeSet;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const BACKEND_NAME: &str = "puppetdb";

pub const PREFIX: char = 'P';

/// Resource fields PuppetDB accepts for `@field` selection
const RESOURCE_FIELDS: &[&str] = &["tag", "certname", "type", "title", "exported", "file", "line"];

/// Which API endpoint a compiled query targets. Fact and resource selectors
/// cannot be mixed inside one payload; callers compose them at the global
/// grammar level instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Nodes,
    Resources,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Nodes => "nodes",
            Endpoint::Resources => "resources",
        }
    }

    /// JSON key holding the host name in a response row
    fn host_key(self, api_version: u8) -> &'static str {
        match (self, api_version) {
            (Endpoint::Nodes, 3) => "name",
            _ => "certname",
        }
    }
}

pub struct PuppetDbBackend {
    client: reqwest::Client,
    config: PuppetDbConfig,
}

impl PuppetDbBackend {
    pub fn new(config: PuppetDbConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout));

        if !config.ssl_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let (Some(cert), Some(key)) = (&config.ssl_client_cert, &config.ssl_client_key) {
            let mut pem = std::fs::read(cert)?;
            pem.extend(std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| Error::Config {
                message: format!("invalid puppetdb client certificate: {e}"),
            })?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(|e| Error::Config {
            message: format!("failed to build puppetdb HTTP client: {e}"),
        })?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.config.scheme, self.config.host, self.config.port
        )
    }

    async fn query(&self, endpoint: Endpoint, ast: &Value) -> Result<Vec<Value>> {
        let response = match self.config.api_version {
            3 => {
                let query = urlencoding::encode(&ast.to_string()).into_owned();
                let url = format!("{}/v3/{}?query={query}", self.base_url(), endpoint.path());
                debug!(url = %url, "PuppetDB v3 query");
                self.client.get(&url).send().await
            }
            _ => {
                let url = format!("{}/pdb/query/v4/{}", self.base_url(), endpoint.path());
                debug!(url = %url, query = %ast, "PuppetDB v4 query");
                self.client.post(&url).json(&json!({ "query": ast })).send().await
            }
        }
        .map_err(connection_error)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::BackendAuth {
                backend: BACKEND_NAME,
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 400 {
                return Err(Error::InvalidQuery {
                    backend: BACKEND_NAME,
                    message: format!("rejected by PuppetDB: {text}"),
                });
            }
            return Err(Error::BackendUnreachable {
                backend: BACKEND_NAME,
                message: format!("HTTP {status}: {text}"),
            });
        }

        response.json().await.map_err(connection_error)
    }
}

fn connection_error(e: reqwest::Error) -> Error {
    Error::BackendUnreachable {
        backend: BACKEND_NAME,
        message: e.to_string(),
    }
}

#[async_trait]
impl Backend for PuppetDbBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn prefix(&self) -> char {
        PREFIX
    }

    fn validate(&self, payload: &str) -> Result<()> {
        compile(payload, self.config.api_version).map(|_| ())
    }

    async fn resolve(&self, payload: &str) -> Result<NodeSet> {
        let (endpoint, ast) = compile(payload, self.config.api_version)?;
        let rows = self.query(endpoint, &ast).await?;

        let key = endpoint.host_key(self.config.api_version);
        let mut nodes = NodeSet::new();
        for row in rows {
            if let Some(name) = row.get(key).and_then(Value::as_str) {
                nodes.insert(name);
            }
        }
        debug!(hosts = nodes.len(), "PuppetDB query resolved");
        Ok(nodes)
    }
}

/// Compile a payload into the endpoint it targets and the PuppetDB AST
pub fn compile(payload: &str, api_version: u8) -> Result<(Endpoint, Value)> {
    let tokens = tokenize(payload)?;
    if tokens.is_empty() {
        return Err(invalid("empty query"));
    }
    let mut parser = Parser {
        tokens,
        index: 0,
        api_version,
        endpoint: None,
    };
    let ast = parser.parse_query(0)?;
    if parser.index < parser.tokens.len() {
        return Err(invalid("trailing input after query"));
    }
    // endpoint is always set once at least one atom has been parsed
    Ok((parser.endpoint.expect("query has at least one atom"), ast))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidQuery {
        backend: BACKEND_NAME,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Op(String),
    Quoted(String),
    Word(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(invalid("unterminated quoted string"));
                }
                tokens.push(Token::Quoted(chars[start..j].iter().collect()));
                i = j + 1;
            }
            '=' | '~' => {
                tokens.push(Token::Op(c.to_string()));
                i += 1;
            }
            '<' | '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(format!("{c}=")));
                    i += 2;
                } else {
                    tokens.push(Token::Op(c.to_string()));
                    i += 1;
                }
            }
            _ => {
                let start = i;
                while i < chars.len() && !is_token_boundary(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Word(word),
                });
            }
        }
    }
    Ok(tokens)
}

fn is_token_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\'' | '=' | '~' | '<' | '>')
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    api_version: u8,
    endpoint: Option<Endpoint>,
}

impl Parser {
    fn parse_query(&mut self, depth: usize) -> Result<Value> {
        if depth > 50 {
            return Err(invalid("query nesting too deep"));
        }

        let mut operands = vec![self.parse_item(depth)?];
        let mut current_op: Option<&'static str> = None;

        loop {
            let op = match self.peek() {
                Some(Token::And) => "and",
                Some(Token::Or) => "or",
                _ => break,
            };
            self.index += 1;
            let item = self.parse_item(depth)?;
            match current_op {
                Some(prev) if prev == op => operands.push(item),
                Some(prev) => {
                    // left-associative: fold what we have into one operand
                    let mut folded = vec![Value::String(prev.to_string())];
                    folded.append(&mut operands);
                    operands = vec![Value::Array(folded), item];
                    current_op = Some(op);
                }
                None => {
                    operands.push(item);
                    current_op = Some(op);
                }
            }
        }

        match current_op {
            Some(op) => {
                let mut array = vec![Value::String(op.to_string())];
                array.append(&mut operands);
                Ok(Value::Array(array))
            }
            None => Ok(operands.pop().expect("at least one operand")),
        }
    }

    fn parse_item(&mut self, depth: usize) -> Result<Value> {
        if depth > 50 {
            return Err(invalid("query nesting too deep"));
        }
        if matches!(self.peek(), Some(Token::Not)) {
            self.index += 1;
            let inner = self.parse_item(depth + 1)?;
            return Ok(json!(["not", inner]));
        }
        match self.peek().cloned() {
            Some(Token::LParen) => {
                self.index += 1;
                let inner = self.parse_query(depth + 1)?;
                if !matches!(self.peek(), Some(Token::RParen)) {
                    return Err(invalid("expected ')'"));
                }
                self.index += 1;
                Ok(inner)
            }
            Some(Token::Word(word)) => {
                self.index += 1;
                self.parse_atom(&word)
            }
            _ => Err(invalid("expected atom or '('")),
        }
    }

    fn parse_atom(&mut self, word: &str) -> Result<Value> {
        match word.split_once(':') {
            Some((category @ ("F" | "R" | "C" | "O" | "P"), key)) => {
                if key.is_empty() {
                    return Err(invalid(format!("missing key after '{category}:'")));
                }
                let comparison = self.try_comparison()?;
                match category {
                    "F" => self.fact_atom(key, comparison),
                    "R" => self.resource_atom(key, None, comparison),
                    "C" => self.resource_atom(key, Some(""), comparison),
                    "O" => self.resource_atom(key, Some("Role::"), comparison),
                    _ => self.resource_atom(key, Some("Profile::"), comparison),
                }
            }
            _ => self.host_atom(word),
        }
    }

    /// Consume `op value` when present
    fn try_comparison(&mut self) -> Result<Option<(String, Value)>> {
        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Ok(None);
        };
        self.index += 1;
        let value = match self.peek().cloned() {
            Some(Token::Quoted(text)) => Value::String(text),
            Some(Token::Word(word)) => scalar(&word),
            _ => return Err(invalid(format!("missing value after '{op}'"))),
        };
        self.index += 1;
        if op == "~" {
            // catch broken patterns before they reach PuppetDB
            let Value::String(pattern) = &value else {
                return Err(invalid("regex match requires a string pattern"));
            };
            regex::Regex::new(pattern)
                .map_err(|e| invalid(format!("invalid regex pattern: {e}")))?;
        }
        Ok(Some((op, value)))
    }

    fn set_endpoint(&mut self, endpoint: Endpoint) -> Result<()> {
        match self.endpoint {
            None => {
                self.endpoint = Some(endpoint);
                Ok(())
            }
            Some(current) if current == endpoint => Ok(()),
            Some(_) => Err(invalid(
                "cannot mix fact and resource selectors in one query; \
                 combine them at the global grammar level",
            )),
        }
    }

    fn fact_atom(&mut self, key: &str, comparison: Option<(String, Value)>) -> Result<Value> {
        self.set_endpoint(Endpoint::Nodes)?;
        let (op, value) =
            comparison.ok_or_else(|| invalid(format!("fact query 'F:{key}' requires an operator")))?;
        Ok(json!([op, ["fact", key], value]))
    }

    /// Resource atom. `class_prefix` is None for plain `R:` selectors and the
    /// title prefix for the C/O/P class shortcuts.
    fn resource_atom(
        &mut self,
        key: &str,
        class_prefix: Option<&str>,
        comparison: Option<(String, Value)>,
    ) -> Result<Value> {
        self.set_endpoint(Endpoint::Resources)?;

        // split off @field / %param selection from the name
        let (name, selector) = match key.find(|c| c == '@' || c == '%') {
            Some(pos) => {
                let (name, rest) = key.split_at(pos);
                (name, Some((rest.as_bytes()[0] as char, &rest[1..])))
            }
            None => (key, None),
        };
        if name.is_empty() {
            return Err(invalid("missing resource name"));
        }

        let mut clauses = Vec::new();
        match class_prefix {
            Some(prefix) => {
                clauses.push(json!(["=", "type", "Class"]));
                clauses.push(json!(["=", "title", format!("{prefix}{}", classcase(name))]));
            }
            None => {
                clauses.push(json!(["=", "type", capitalize_first_segment(name)]));
            }
        }

        match (selector, comparison) {
            (Some((marker, selector_name)), Some((op, value))) => {
                if selector_name.is_empty() {
                    return Err(invalid(format!("missing name after '{marker}'")));
                }
                match marker {
                    '@' => {
                        if !RESOURCE_FIELDS.contains(&selector_name) {
                            return Err(invalid(format!(
                                "unknown resource field '{selector_name}'"
                            )));
                        }
                        clauses.push(json!([op, selector_name, value]));
                    }
                    _ => {
                        if op == "~" && self.api_version == 3 {
                            return Err(invalid(
                                "regex match is not supported on resource parameters",
                            ));
                        }
                        clauses.push(json!([op, ["parameter", selector_name], value]));
                    }
                }
            }
            (Some((marker, _)), None) => {
                return Err(invalid(format!("'{marker}' selection requires an operator")));
            }
            (None, Some((op, value))) => {
                if class_prefix.is_some() {
                    return Err(invalid(
                        "class shortcuts select by name; use %param or @field to compare",
                    ));
                }
                // plain comparison selects on the resource title
                let value = match (&value, op.as_str()) {
                    (Value::String(s), "~") => Value::String(s.clone()),
                    (Value::String(s), _) => Value::String(capitalize_first_segment(s)),
                    _ => value,
                };
                clauses.push(json!([op, "title", value]));
            }
            (None, None) => {}
        }

        if clauses.len() == 1 {
            Ok(clauses.pop().expect("one clause"))
        } else {
            let mut array = vec![json!("and")];
            array.extend(clauses);
            Ok(Value::Array(array))
        }
    }

    fn host_atom(&mut self, pattern: &str) -> Result<Value> {
        self.set_endpoint(Endpoint::Nodes)?;

        if pattern.contains('*') {
            let mut regex = String::from("^");
            for c in pattern.chars() {
                match c {
                    '*' => regex.push_str(".*"),
                    '.' => regex.push_str("\\."),
                    c => regex.push(c),
                }
            }
            regex.push('$');
            return Ok(json!(["~", "certname", regex]));
        }

        let nodes = NodeSet::parse(pattern).map_err(|e| invalid(e.to_string()))?;
        let mut clauses: Vec<Value> = nodes
            .iter()
            .map(|host| json!(["=", "certname", host]))
            .collect();
        match clauses.len() {
            0 => Err(invalid("empty host pattern")),
            1 => Ok(clauses.pop().expect("one clause")),
            _ => {
                let mut array = vec![json!("or")];
                array.append(&mut clauses);
                Ok(Value::Array(array))
            }
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }
}

/// `true`/`false`, integers and floats become JSON scalars; anything else
/// stays a string
fn scalar(word: &str) -> Value {
    match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = word.parse::<i64>() {
                return json!(n);
            }
            if let Ok(f) = word.parse::<f64>() {
                return json!(f);
            }
            Value::String(word.to_string())
        }
    }
}

fn capitalize_first_segment(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Capitalize every `::` segment, the way Puppet class names are written
fn classcase(name: &str) -> String {
    name.split("::")
        .map(capitalize_first_segment)
        .collect::<Vec<_>>()
        .join("::")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ast(payload: &str) -> (Endpoint, Value) {
        compile(payload, 4).unwrap()
    }

    #[test]
    fn test_host_pattern_expands() {
        let (endpoint, q) = ast("host[1-2].d");
        assert_eq!(endpoint, Endpoint::Nodes);
        assert_eq!(
            q,
            json!(["or", ["=", "certname", "host1.d"], ["=", "certname", "host2.d"]])
        );
    }

    #[test]
    fn test_host_glob_becomes_regex() {
        let (_, q) = ast("host1*.example.org");
        assert_eq!(q, json!(["~", "certname", "^host1.*\\.example\\.org$"]));
    }

    #[test]
    fn test_fact_comparison() {
        let (endpoint, q) = ast("F:memorysize_mb >= 4096");
        assert_eq!(endpoint, Endpoint::Nodes);
        assert_eq!(q, json!([">=", ["fact", "memorysize_mb"], 4096]));
    }

    #[test]
    fn test_fact_requires_operator() {
        assert!(compile("F:osfamily", 4).is_err());
    }

    #[test]
    fn test_resource_type_capitalized() {
        let (endpoint, q) = ast("R:nginx::worker");
        assert_eq!(endpoint, Endpoint::Resources);
        assert_eq!(q, json!(["=", "type", "Nginx::worker"]));
    }

    #[test]
    fn test_resource_title_comparison() {
        let (_, q) = ast("R:Class = apt");
        assert_eq!(
            q,
            json!(["and", ["=", "type", "Class"], ["=", "title", "Apt"]])
        );
    }

    #[test]
    fn test_resource_title_regex_not_capitalized() {
        let (_, q) = ast("R:Class ~ \"apt.*\"");
        assert_eq!(
            q,
            json!(["and", ["=", "type", "Class"], ["~", "title", "apt.*"]])
        );
    }

    #[test]
    fn test_class_shortcuts() {
        let (_, c) = ast("C:mysql::server");
        assert_eq!(
            c,
            json!(["and", ["=", "type", "Class"], ["=", "title", "Mysql::Server"]])
        );
        let (_, o) = ast("O:web");
        assert_eq!(
            o,
            json!(["and", ["=", "type", "Class"], ["=", "title", "Role::Web"]])
        );
        let (_, p) = ast("P:cache");
        assert_eq!(
            p,
            json!(["and", ["=", "type", "Class"], ["=", "title", "Profile::Cache"]])
        );
    }

    #[test]
    fn test_resource_field_selection() {
        let (_, q) = ast("R:File@file = /etc/motd");
        assert_eq!(
            q,
            json!(["and", ["=", "type", "File"], ["=", "file", "/etc/motd"]])
        );
        assert!(compile("R:File@bogus = x", 4).is_err());
    }

    #[test]
    fn test_resource_parameter_selection() {
        let (_, q) = ast("R:Service%ensure = running");
        assert_eq!(
            q,
            json!([
                "and",
                ["=", "type", "Service"],
                ["=", ["parameter", "ensure"], "running"]
            ])
        );
    }

    #[test]
    fn test_parameter_regex_rejected_on_v3() {
        assert!(compile("R:Service%ensure ~ run.*", 3).is_err());
        assert!(compile("R:Service%ensure ~ run.*", 4).is_ok());
    }

    #[test]
    fn test_boolean_combination_and_not() {
        let (_, q) = ast("F:osfamily = Debian and not F:lsbdistid = Ubuntu");
        assert_eq!(
            q,
            json!([
                "and",
                ["=", ["fact", "osfamily"], "Debian"],
                ["not", ["=", ["fact", "lsbdistid"], "Ubuntu"]]
            ])
        );
    }

    #[test]
    fn test_grouping() {
        let (_, q) = ast("(F:a = 1 or F:b = 2) and F:c = 3");
        assert_eq!(
            q,
            json!([
                "and",
                ["or", ["=", ["fact", "a"], 1], ["=", ["fact", "b"], 2]],
                ["=", ["fact", "c"], 3]
            ])
        );
    }

    #[test]
    fn test_left_associative_mixed_operators() {
        let (_, q) = ast("F:a = 1 and F:b = 2 or F:c = 3");
        assert_eq!(
            q,
            json!([
                "or",
                ["and", ["=", ["fact", "a"], 1], ["=", ["fact", "b"], 2]],
                ["=", ["fact", "c"], 3]
            ])
        );
    }

    #[test]
    fn test_mixing_facts_and_resources_rejected() {
        let err = compile("F:osfamily = Debian and R:Class = apt", 4).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery { .. }));
    }

    #[test]
    fn test_quoted_values_and_booleans() {
        let (_, q) = ast("F:role = \"db master\"");
        assert_eq!(q, json!(["=", ["fact", "role"], "db master"]));
        let (_, q) = ast("F:is_virtual = true");
        assert_eq!(q, json!(["=", ["fact", "is_virtual"], true]));
    }

    #[test]
    fn test_broken_regex_rejected_early() {
        assert!(compile("F:path ~ \"[unclosed\"", 4).is_err());
        assert!(compile("F:path ~ \"var/log/.*\"", 4).is_ok());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(compile("", 4).is_err());
        assert!(compile("F:a =", 4).is_err());
        assert!(compile("(F:a = 1", 4).is_err());
        assert!(compile("F:a = 1 and", 4).is_err());
        assert!(compile("X:a = 1 ) junk", 4).is_err());
    }
}
