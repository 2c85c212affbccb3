//! Named operations with declared, validated parameters.
//!
//! Every global builtin and every method of an expression variant is a
//! [`Builtin`]: a name, a static parameter table and a plain handler
//! function. Arguments are checked against the table once, here, before the
//! handler runs; handlers read them back through the typed accessors of
//! [`Arguments`].

use std::fmt;

use indexmap::IndexMap;

use super::{
    value::{Map, NumericArray, Value},
    ExecutionContext, Expression, ScriptError,
};
use crate::ast::Position;

/// Kind a parameter value must be convertible to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Numeric,
    NumericArray,
    StringArray,
    Map,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgKind::String => "string",
            ArgKind::Numeric => "numeric",
            ArgKind::NumericArray => "numeric array",
            ArgKind::StringArray => "string array",
            ArgKind::Map => "map",
        })
    }
}

/// Declared parameter of a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

impl Parameter {
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// A validated argument
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Numeric(f64),
    NumericArray(NumericArray),
    StringArray(Vec<String>),
    Map(Map),
}

impl ArgValue {
    fn kind(&self) -> ArgKind {
        match self {
            ArgValue::String(_) => ArgKind::String,
            ArgValue::Numeric(_) => ArgKind::Numeric,
            ArgValue::NumericArray(_) => ArgKind::NumericArray,
            ArgValue::StringArray(_) => ArgKind::StringArray,
            ArgValue::Map(_) => ArgKind::Map,
        }
    }

    /// Converts a raw value to `kind`; on mismatch returns the name of the
    /// kind actually found
    fn convert(value: Value, kind: ArgKind) -> Result<Self, String> {
        match (kind, value) {
            (ArgKind::String, Value::String(s)) => Ok(ArgValue::String(s)),
            (ArgKind::Numeric, Value::Number(n)) => Ok(ArgValue::Numeric(n)),
            (ArgKind::Map, Value::Map(m)) => Ok(ArgValue::Map(m)),
            (ArgKind::NumericArray, Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Number(n) => Ok(n),
                    other => Err(format!("array containing {}", other.type_name())),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|numbers| ArgValue::NumericArray(NumericArray(numbers))),
            (ArgKind::StringArray, Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(format!("array containing {}", other.type_name())),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ArgValue::StringArray),
            (_, other) => Err(other.type_name().to_string()),
        }
    }
}

/// Arguments that passed validation against a parameter table
#[derive(Debug, Clone)]
pub struct Arguments {
    callable: &'static str,
    position: Position,
    values: IndexMap<&'static str, ArgValue>,
}

impl Arguments {
    /// Checks `raw` against `parameters`. Required parameters must be
    /// present; present parameters must convert to their declared kind;
    /// absent optional parameters are left out.
    pub fn validate(
        callable: &'static str,
        parameters: &'static [Parameter],
        mut raw: IndexMap<String, Value>,
        position: Position,
    ) -> Result<Self, ScriptError> {
        if let Some(unknown) = raw
            .keys()
            .find(|name| !parameters.iter().any(|p| p.name == name.as_str()))
        {
            return Err(ScriptError::UnexpectedArgument {
                callable: callable.to_string(),
                parameter: unknown.clone(),
                position,
            });
        }

        let mut values = IndexMap::with_capacity(parameters.len());
        for parameter in parameters {
            match raw.shift_remove(parameter.name) {
                Some(value) => {
                    let converted = ArgValue::convert(value, parameter.kind).map_err(|actual| {
                        ScriptError::WrongArgumentType {
                            callable: callable.to_string(),
                            parameter: parameter.name.to_string(),
                            expected: parameter.kind.to_string(),
                            actual,
                            position,
                        }
                    })?;
                    values.insert(parameter.name, converted);
                }
                None if parameter.required => {
                    return Err(ScriptError::MissingArgument {
                        callable: callable.to_string(),
                        parameter: parameter.name.to_string(),
                        position,
                    });
                }
                None => {}
            }
        }

        Ok(Self {
            callable,
            position,
            values,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn missing(&self, name: &str) -> ScriptError {
        ScriptError::MissingArgument {
            callable: self.callable.to_string(),
            parameter: name.to_string(),
            position: self.position,
        }
    }

    fn mismatch(&self, name: &str, expected: ArgKind, found: &ArgValue) -> ScriptError {
        ScriptError::WrongArgumentType {
            callable: self.callable.to_string(),
            parameter: name.to_string(),
            expected: expected.to_string(),
            actual: found.kind().to_string(),
            position: self.position,
        }
    }

    fn get(&self, name: &str) -> Result<&ArgValue, ScriptError> {
        self.values.get(name).ok_or_else(|| self.missing(name))
    }

    pub fn string(&self, name: &str) -> Result<&str, ScriptError> {
        match self.get(name)? {
            ArgValue::String(s) => Ok(s),
            other => Err(self.mismatch(name, ArgKind::String, other)),
        }
    }

    pub fn numeric(&self, name: &str) -> Result<f64, ScriptError> {
        match self.get(name)? {
            ArgValue::Numeric(n) => Ok(*n),
            other => Err(self.mismatch(name, ArgKind::Numeric, other)),
        }
    }

    pub fn numeric_array(&self, name: &str) -> Result<&NumericArray, ScriptError> {
        match self.get(name)? {
            ArgValue::NumericArray(values) => Ok(values),
            other => Err(self.mismatch(name, ArgKind::NumericArray, other)),
        }
    }

    pub fn string_array(&self, name: &str) -> Result<&[String], ScriptError> {
        match self.get(name)? {
            ArgValue::StringArray(values) => Ok(values),
            other => Err(self.mismatch(name, ArgKind::StringArray, other)),
        }
    }

    pub fn map(&self, name: &str) -> Result<&Map, ScriptError> {
        match self.get(name)? {
            ArgValue::Map(map) => Ok(map),
            other => Err(self.mismatch(name, ArgKind::Map, other)),
        }
    }

    pub fn optional_string(&self, name: &str) -> Result<Option<&str>, ScriptError> {
        self.optional(name, Self::string)
    }

    pub fn optional_numeric(&self, name: &str) -> Result<Option<f64>, ScriptError> {
        self.optional(name, Self::numeric)
    }

    pub fn optional_map(&self, name: &str) -> Result<Option<&Map>, ScriptError> {
        self.optional(name, Self::map)
    }

    fn optional<'a, T>(
        &'a self,
        name: &str,
        read: impl Fn(&'a Self, &str) -> Result<T, ScriptError>,
    ) -> Result<Option<T>, ScriptError> {
        if self.contains(name) {
            read(self, name).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Handler of a builtin: receives the call and the context, produces the
/// resulting expression
pub type Handler =
    fn(&Invocation<'_>, &ExecutionContext<'_>) -> Result<Expression, ScriptError>;

/// Static description of a callable operation
pub struct Builtin {
    pub name: &'static str,
    pub parameters: &'static [Parameter],
    pub handler: Handler,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// A single call in progress
pub struct Invocation<'a> {
    pub callable: &'a Callable,
    pub args: Arguments,
    pub position: Position,
}

impl Invocation<'_> {
    /// The expression a method was extracted from
    pub fn receiver(&self) -> Result<&Expression, ScriptError> {
        self.callable
            .receiver
            .as_deref()
            .ok_or_else(|| ScriptError::NotCallable {
                target: format!("{}() without a receiver", self.callable.name()),
                position: self.position,
            })
    }
}

/// A builtin bound to an optional receiver
#[derive(Debug, Clone)]
pub struct Callable {
    builtin: &'static Builtin,
    receiver: Option<Box<Expression>>,
}

impl Callable {
    pub fn global(builtin: &'static Builtin) -> Self {
        Self {
            builtin,
            receiver: None,
        }
    }

    pub fn method(builtin: &'static Builtin, receiver: Expression) -> Self {
        Self {
            builtin,
            receiver: Some(Box::new(receiver)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.builtin.name
    }

    pub fn parameters(&self) -> &'static [Parameter] {
        self.builtin.parameters
    }

    /// Validates `raw` and runs the handler. The handler is never reached
    /// with arguments that failed validation. Store, file and decoding
    /// failures from the handler are tagged with `position`.
    pub fn invoke(
        &self,
        context: &ExecutionContext<'_>,
        raw: IndexMap<String, Value>,
        position: Position,
    ) -> Result<Expression, ScriptError> {
        let args = Arguments::validate(self.builtin.name, self.builtin.parameters, raw, position)?;
        let invocation = Invocation {
            callable: self,
            args,
            position,
        };
        (self.builtin.handler)(&invocation, context).map_err(|err| err.at(position))
    }

    /// Binds positional arguments to parameters in declaration order,
    /// skipping the ones given by name, then invokes.
    pub fn call(
        &self,
        context: &ExecutionContext<'_>,
        positional: Vec<Value>,
        mut named: IndexMap<String, Value>,
        position: Position,
    ) -> Result<Expression, ScriptError> {
        let free: Vec<&Parameter> = self
            .builtin
            .parameters
            .iter()
            .filter(|parameter| !named.contains_key(parameter.name))
            .collect();
        let mut free = free.into_iter();

        for (index, value) in positional.into_iter().enumerate() {
            let parameter = free.next().ok_or_else(|| ScriptError::UnexpectedArgument {
                callable: self.builtin.name.to_string(),
                parameter: format!("#{}", index + 1),
                position,
            })?;
            named.insert(parameter.name.to_string(), value);
        }

        self.invoke(context, named, position)
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.builtin.name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::evaluator::{ExpressionKind, GlobalRegistry};

    static SPY_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn spy(invocation: &Invocation<'_>, _context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
        SPY_CALLS.fetch_add(1, Ordering::SeqCst);
        let name = invocation.args.string("name")?;
        Ok(Expression::string(name, invocation.position))
    }

    static SPY: Builtin = Builtin {
        name: "spy",
        parameters: &[
            Parameter::required("name", ArgKind::String),
            Parameter::optional("limit", ArgKind::Numeric),
        ],
        handler: spy,
    };

    fn raw(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_missing_required_argument_never_reaches_handler() {
        let registry = GlobalRegistry::standard();
        let context = ExecutionContext::new(&registry, Map::new());
        let callable = Callable::global(&SPY);
        let before = SPY_CALLS.load(Ordering::SeqCst);

        for args in [raw(&[]), raw(&[("limit", Value::Number(3.0))])] {
            let err = callable.invoke(&context, args, Position::new(1, 1)).unwrap_err();
            match err {
                ScriptError::MissingArgument { parameter, callable, .. } => {
                    assert_eq!(parameter, "name");
                    assert_eq!(callable, "spy");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(SPY_CALLS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_wrong_type_names_parameter_and_kinds() {
        let registry = GlobalRegistry::standard();
        let context = ExecutionContext::new(&registry, Map::new());
        let callable = Callable::global(&SPY);

        let err = callable
            .invoke(
                &context,
                raw(&[("name", Value::String("x".into())), ("limit", Value::String("ten".into()))]),
                Position::new(2, 5),
            )
            .unwrap_err();

        match err {
            ScriptError::WrongArgumentType {
                parameter,
                expected,
                actual,
                position,
                ..
            } => {
                assert_eq!(parameter, "limit");
                assert_eq!(expected, "numeric");
                assert_eq!(actual, "string");
                assert_eq!(position, Position::new(2, 5));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_call_reaches_handler() {
        let registry = GlobalRegistry::standard();
        let context = ExecutionContext::new(&registry, Map::new());
        let callable = Callable::global(&SPY);

        let result = callable
            .call(
                &context,
                vec![Value::String("positional".into())],
                IndexMap::new(),
                Position::new(1, 1),
            )
            .unwrap();
        assert!(matches!(result.kind(), ExpressionKind::String(s) if s == "positional"));
    }

    #[test]
    fn test_surplus_and_unknown_arguments_are_rejected() {
        let registry = GlobalRegistry::standard();
        let context = ExecutionContext::new(&registry, Map::new());
        let callable = Callable::global(&SPY);

        let surplus = callable.call(
            &context,
            vec![Value::String("a".into()), Value::Number(1.0), Value::Number(2.0)],
            IndexMap::new(),
            Position::new(1, 1),
        );
        assert!(matches!(surplus, Err(ScriptError::UnexpectedArgument { .. })));

        let unknown = callable.invoke(
            &context,
            raw(&[("name", Value::String("a".into())), ("colour", Value::Null)]),
            Position::new(1, 1),
        );
        assert!(matches!(
            unknown,
            Err(ScriptError::UnexpectedArgument { parameter, .. }) if parameter == "colour"
        ));
    }

    #[test]
    fn test_positional_arguments_fill_the_unnamed_parameters() {
        let registry = GlobalRegistry::standard();
        let context = ExecutionContext::new(&registry, Map::new());
        let callable = Callable::global(&SPY);

        let result = callable
            .call(
                &context,
                vec![Value::String("first".into())],
                raw(&[("limit", Value::Number(3.0))]),
                Position::new(1, 1),
            )
            .unwrap();
        assert!(matches!(result.kind(), ExpressionKind::String(s) if s == "first"));

        // `limit` is named, so the second positional value has nowhere to go
        let surplus = callable.call(
            &context,
            vec![Value::String("a".into()), Value::Number(1.0)],
            raw(&[("limit", Value::Number(3.0))]),
            Position::new(1, 1),
        );
        assert!(matches!(
            surplus,
            Err(ScriptError::UnexpectedArgument { parameter, .. }) if parameter == "#2"
        ));
    }

    fn failing_read(
        _invocation: &Invocation<'_>,
        _context: &ExecutionContext<'_>,
    ) -> Result<Expression, ScriptError> {
        Err(ScriptError::Store(crate::aggregations::StoreError::Disabled))
    }

    static FAILING_READ: Builtin = Builtin {
        name: "failingRead",
        parameters: &[],
        handler: failing_read,
    };

    #[test]
    fn test_handler_failures_carry_the_call_position() {
        let registry = GlobalRegistry::standard();
        let context = ExecutionContext::new(&registry, Map::new());

        let err = Callable::global(&FAILING_READ)
            .invoke(&context, IndexMap::new(), Position::new(4, 9))
            .unwrap_err();
        assert_eq!(err.position(), Some(Position::new(4, 9)));
        assert!(matches!(err.root(), ScriptError::Store(_)));
        assert!(err.to_string().ends_with("(line 4, column 9)"));

        // Errors that already know where they happened keep their own position
        let err = Callable::global(&SPY)
            .invoke(&context, IndexMap::new(), Position::new(2, 3))
            .unwrap_err();
        assert!(matches!(err, ScriptError::MissingArgument { .. }));
    }

    #[test]
    fn test_array_kinds() {
        static PARAMS: [Parameter; 2] = [
            Parameter::required("data", ArgKind::NumericArray),
            Parameter::optional("labels", ArgKind::StringArray),
        ];

        let args = Arguments::validate(
            "stats",
            &PARAMS,
            raw(&[
                ("data", Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])),
                ("labels", Value::Array(vec![Value::String("a".into())])),
            ]),
            Position::new(1, 1),
        )
        .unwrap();
        assert_eq!(args.numeric_array("data").unwrap().sum(), 3.0);
        assert_eq!(args.string_array("labels").unwrap(), ["a".to_string()]);

        let err = Arguments::validate(
            "stats",
            &PARAMS,
            raw(&[("data", Value::Array(vec![Value::Number(1.0), Value::Boolean(true)]))]),
            Position::new(1, 1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::WrongArgumentType { actual, .. } if actual == "array containing boolean"
        ));
    }
}
