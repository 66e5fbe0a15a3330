use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl Direction {
    /// `true` for every direction the database writes back into.
    pub fn is_output(self) -> bool {
        !matches!(self, Direction::Input)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub direction: Direction,
}

impl Parameter {
    pub fn input(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Parameter { name: name.into(), value: value.into(), direction: Direction::Input }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Parameter { name: name.into(), value: Value::Null, direction: Direction::Output }
    }
}

/// Ordered, name-unique parameter list.
///
/// Setting a name that already exists replaces its value in place, so the
/// original position and direction are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.push(Parameter::output(name));
        self
    }

    pub fn with_return_value(mut self, name: impl Into<String>) -> Self {
        self.push(Parameter {
            name: name.into(),
            value: Value::Null,
            direction: Direction::ReturnValue,
        });
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.items.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.items.push(Parameter { name, value, direction: Direction::Input }),
        }
    }

    /// Insert or replace a full parameter, including its direction.
    pub fn push(&mut self, parameter: Parameter) {
        match self.items.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.items.push(parameter),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.items.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// First parameter the database writes back (output or return value).
    pub fn first_output(&self) -> Option<&Parameter> {
        self.items.iter().find(|p| p.direction.is_output())
    }

    /// Copy of `self` with every entry of `overrides` applied on top.
    pub fn merged_with(&self, overrides: &Parameters) -> Parameters {
        let mut merged = self.clone();
        for p in overrides.iter() {
            merged.push(p.clone());
        }
        merged
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Parameter> for Parameters {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for p in iter {
            params.push(p);
        }
        params
    }
}

impl IntoIterator for Parameters {
    type Item = Parameter;
    type IntoIter = std::vec::IntoIter<Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
