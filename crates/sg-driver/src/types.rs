use std::fmt;
use std::sync::Arc;

use sg_types::{Parameter, Parameters, Reader, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Text,
    StoredProcedure,
}

/// An immutable query definition: name, text, and the ordered parameter
/// names the command expects.
///
/// `name` keys the resilience policy cache, so two queries sharing a name
/// share a circuit breaker.
#[derive(Debug, Clone)]
pub struct Query {
    name: Arc<str>,
    text: Arc<str>,
    kind: QueryKind,
    parameter_names: Arc<[String]>,
    shard_parameter: Option<Arc<str>>,
}

impl Query {
    pub fn procedure(name: &str) -> Self {
        Query {
            name: name.into(),
            text: name.into(),
            kind: QueryKind::StoredProcedure,
            parameter_names: Vec::new().into(),
            shard_parameter: None,
        }
    }

    pub fn text(name: &str, sql: &str) -> Self {
        Query {
            name: name.into(),
            text: sql.into(),
            kind: QueryKind::Text,
            parameter_names: Vec::new().into(),
            shard_parameter: None,
        }
    }

    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Parameter slot that receives the shard id when executed on a shard.
    pub fn with_shard_parameter(mut self, name: &str) -> Self {
        self.shard_parameter = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn shard_parameter(&self) -> Option<&str> {
        self.shard_parameter.as_deref()
    }
}

/// A query bound to concrete parameter values, ready for a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub text: String,
    pub kind: QueryKind,
    pub parameters: Parameters,
}

impl Command {
    /// Bind `provided` values to `query`.
    ///
    /// When the query declares parameter names, exactly those are bound in
    /// declaration order (absent ones as `Null`), followed by any provided
    /// output parameters the declaration omits. Otherwise `provided` is used
    /// as-is. A `shard_id` is written into the query's shard slot.
    pub fn bind(query: &Query, provided: &Parameters, shard_id: Option<&Value>) -> Command {
        let mut parameters = if query.parameter_names.is_empty() {
            provided.clone()
        } else {
            let mut bound: Parameters = query
                .parameter_names
                .iter()
                .map(|name| {
                    provided
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Parameter::input(name.as_str(), Value::Null))
                })
                .collect();
            for p in provided.iter().filter(|p| p.direction.is_output()) {
                if !bound.contains(&p.name) {
                    bound.push(p.clone());
                }
            }
            bound
        };

        if let (Some(slot), Some(shard)) = (query.shard_parameter(), shard_id) {
            parameters.set(slot, shard.clone());
        }

        Command {
            name: query.name.to_string(),
            text: query.text.to_string(),
            kind: query.kind,
            parameters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuteBehavior {
    #[default]
    Default,
    /// Only the first row of the first result set is wanted.
    SingleRow,
}

/// Everything a command produced.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub reader: Reader,
    /// Parameters as returned by the database, including output values.
    pub output: Parameters,
    pub rows_affected: u64,
}

impl Execution {
    pub fn from_reader(reader: Reader) -> Self {
        Execution { reader, ..Default::default() }
    }

    pub fn with_output(mut self, output: Parameters) -> Self {
        self.output = output;
        self
    }

    pub fn with_rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = rows;
        self
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_name: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What a driver needs to create a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub connection_string: String,
    pub credential: Option<Credential>,
}

impl ConnectionSpec {
    pub fn new(connection_string: impl Into<String>) -> Self {
        ConnectionSpec { connection_string: connection_string.into(), credential: None }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_types::Direction;

    #[test]
    fn bind_follows_declared_order_and_fills_nulls() {
        let query = Query::procedure("ws.GetOrder").with_parameters(["@OrderId", "@Region", "@ShardId"]);
        let provided = Parameters::new()
            .with("@Region", "emea")
            .with("@Unrelated", 1)
            .with("@OrderId", 42)
            .with_output("@Count");

        let command = Command::bind(&query, &provided, None);
        let names: Vec<_> = command.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["@OrderId", "@Region", "@ShardId", "@Count"]);
        assert_eq!(command.parameters.value("@ShardId"), Some(&Value::Null));
        assert_eq!(command.parameters.get("@Count").unwrap().direction, Direction::Output);
        assert_eq!(command.kind, QueryKind::StoredProcedure);
    }

    #[test]
    fn bind_writes_shard_slot() {
        let query = Query::text("orders", "select 1").with_shard_parameter("@ShardId");
        let provided = Parameters::new().with("@OrderId", 1);

        let sharded = Command::bind(&query, &provided, Some(&Value::I16(3)));
        assert_eq!(sharded.parameters.value("@ShardId"), Some(&Value::I16(3)));

        let unsharded = Command::bind(&query, &provided, None);
        assert!(!unsharded.parameters.contains("@ShardId"));
    }

    #[test]
    fn credential_debug_hides_password() {
        let cred = Credential { user_name: "svc".into(), password: "hunter2".into() };
        let text = format!("{cred:?}");
        assert!(text.contains("svc"));
        assert!(!text.contains("hunter2"));
    }
}
