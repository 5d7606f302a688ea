//! Native predicates: comparison, arithmetic, string and datetime.
//!
//! A builtin of arity `n` with `k` inputs computes its last `n - k` arguments
//! from its first `k`. Builtins with no outputs are tests and return
//! [`BuiltinOutput::Truth`]; the rest return one value per output position,
//! which the evaluator binds (or checks, when already bound) against the
//! literal's arguments. Output checking is structural, so `plus(2, 3, 5.0)`
//! fails because `5 != 5.0`.
//!
//! The registry is an ordinary value owned by whoever evaluates rules; there
//! is no process-wide instance.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use tracing::debug;

use crate::error::BuiltinError;
use crate::formula::Constant;

/// Result of calling a builtin on its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinOutput {
    /// A test builtin accepted or rejected its inputs.
    Truth(bool),
    /// Computed values, one per output position.
    Values(Vec<Constant>),
}

type BuiltinFn = Arc<dyn Fn(&[Constant]) -> Result<BuiltinOutput, BuiltinError> + Send + Sync>;

/// A named native predicate.
#[derive(Clone)]
pub struct Builtin {
    name: String,
    arity: usize,
    num_inputs: usize,
    code: BuiltinFn,
}

impl Builtin {
    /// Create a builtin of the given total arity whose first `num_inputs`
    /// arguments are inputs.
    pub fn new<F>(name: impl Into<String>, arity: usize, num_inputs: usize, code: F) -> Self
    where
        F: Fn(&[Constant]) -> Result<BuiltinOutput, BuiltinError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            num_inputs: num_inputs.min(arity),
            code: Arc::new(code),
        }
    }

    /// Predicate name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of arguments.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of leading input arguments.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Number of trailing output arguments.
    pub fn num_outputs(&self) -> usize {
        self.arity - self.num_inputs
    }

    /// Call the native function on bound input values.
    pub fn call(&self, inputs: &[Constant]) -> Result<BuiltinOutput, BuiltinError> {
        if inputs.len() != self.num_inputs {
            return Err(BuiltinError(format!(
                "{} expects {} inputs, got {}",
                self.name,
                self.num_inputs,
                inputs.len()
            )));
        }
        let output = (self.code)(inputs)?;
        match &output {
            BuiltinOutput::Truth(_) if self.num_outputs() > 0 => Err(BuiltinError(format!(
                "{} returned a truth value but declares outputs",
                self.name
            ))),
            BuiltinOutput::Values(values) if values.len() != self.num_outputs() => {
                Err(BuiltinError(format!(
                    "{} returned {} values for {} outputs",
                    self.name,
                    values.len(),
                    self.num_outputs()
                )))
            }
            _ => Ok(output),
        }
    }

    /// Whether `args` (inputs followed by outputs) satisfy this builtin.
    pub fn holds(&self, args: &[Constant]) -> bool {
        if args.len() != self.arity {
            return false;
        }
        let (inputs, outputs) = args.split_at(self.num_inputs);
        match self.call(inputs) {
            Ok(BuiltinOutput::Truth(truth)) => truth,
            Ok(BuiltinOutput::Values(values)) => values == outputs,
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("num_inputs", &self.num_inputs)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (inputs: {})", self.name, self.arity, self.num_inputs)
    }
}

/// Builtins grouped into named categories, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    categories: BTreeMap<String, Vec<Builtin>>,
    by_name: HashMap<String, (Builtin, String)>,
}

impl BuiltinRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard comparison, arithmetic, string and
    /// datetime builtins.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add_map(default_builtins());
        registry
    }

    /// Whether `table` names a builtin, optionally of the given arity.
    pub fn is_builtin(&self, table: &str, arity: Option<usize>) -> bool {
        match self.by_name.get(table) {
            Some((b, _)) => arity.is_none_or(|a| a == b.arity),
            None => false,
        }
    }

    /// Look up a builtin by name.
    pub fn builtin(&self, table: &str) -> Option<&Builtin> {
        self.by_name.get(table).map(|(b, _)| b)
    }

    /// The builtin a literal over `table` of `arity` refers to, if any.
    pub fn lookup(&self, table: &str, arity: usize) -> Option<&Builtin> {
        self.builtin(table).filter(|b| b.arity == arity)
    }

    /// Category a builtin is registered in.
    pub fn category_of(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|(_, c)| c.as_str())
    }

    /// Whether a builtin with the same name and number of inputs is registered.
    pub fn is_registered(&self, builtin: &Builtin) -> bool {
        self.by_name
            .get(&builtin.name)
            .is_some_and(|(b, _)| b.num_inputs == builtin.num_inputs)
    }

    /// Register every builtin of `map`, creating categories as needed.
    ///
    /// Builtins already registered under the same name and input count are
    /// skipped.
    pub fn add_map(&mut self, map: impl IntoIterator<Item = (String, Vec<Builtin>)>) {
        for (category, builtins) in map {
            self.categories.entry(category.clone()).or_default();
            for builtin in builtins {
                if self.is_registered(&builtin) {
                    debug!(builtin = %builtin.name, "builtin already registered");
                    continue;
                }
                self.insert_to_category(&category, builtin);
            }
        }
    }

    /// Remove every builtin of `map` (matched by name and input count) and
    /// drop categories left empty.
    pub fn delete_map(&mut self, map: impl IntoIterator<Item = (String, Vec<Builtin>)>) {
        for (category, builtins) in map {
            for builtin in builtins {
                self.delete_builtin(&category, &builtin.name, builtin.num_inputs);
            }
            if self.categories.get(&category).is_some_and(|c| c.is_empty()) {
                self.categories.remove(&category);
            }
        }
    }

    /// Whether a category exists.
    pub fn exists_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    /// Create an empty category, replacing any existing one.
    pub fn insert_category(&mut self, category: &str) {
        self.delete_category(category);
        self.categories.insert(category.to_string(), Vec::new());
    }

    /// Remove a category and every builtin in it.
    pub fn delete_category(&mut self, category: &str) {
        self.delete_all_in_category(category);
        self.categories.remove(category);
    }

    /// Add a builtin to an existing category. Returns `false` if the
    /// category does not exist.
    pub fn insert_to_category(&mut self, category: &str, builtin: Builtin) -> bool {
        if !self.categories.contains_key(category) {
            return false;
        }
        if let Some((_, old_category)) = self.by_name.remove(&builtin.name)
            && let Some(old) = self.categories.get_mut(&old_category)
        {
            old.retain(|b| b.name != builtin.name);
        }
        if let Some(members) = self.categories.get_mut(category) {
            members.push(builtin.clone());
        }
        self.by_name
            .insert(builtin.name.clone(), (builtin, category.to_string()));
        true
    }

    /// Remove the named builtin from a category. Returns whether it was present.
    pub fn delete_from_category(&mut self, category: &str, name: &str) -> bool {
        let Some(members) = self.categories.get_mut(category) else {
            return false;
        };
        let before = members.len();
        members.retain(|b| b.name != name);
        let removed = members.len() != before;
        if removed {
            self.by_name.remove(name);
        }
        removed
    }

    /// Empty a category but keep it. Returns whether it existed.
    pub fn delete_all_in_category(&mut self, category: &str) -> bool {
        let Some(members) = self.categories.get_mut(category) else {
            return false;
        };
        for builtin in members.drain(..) {
            self.by_name.remove(&builtin.name);
        }
        true
    }

    /// Remove the builtin matching name and input count from a category.
    pub fn delete_builtin(&mut self, category: &str, name: &str, num_inputs: usize) -> bool {
        let matches = self
            .categories
            .get(category)
            .is_some_and(|m| m.iter().any(|b| b.name == name && b.num_inputs == num_inputs));
        matches && self.delete_from_category(category, name)
    }

    /// Every registered builtin with its category, ordered by category.
    pub fn list_builtins(&self) -> Vec<(&str, &Builtin)> {
        self.categories
            .iter()
            .flat_map(|(c, members)| members.iter().map(move |b| (c.as_str(), b)))
            .collect()
    }
}

fn err(message: impl Into<String>) -> BuiltinError {
    BuiltinError(message.into())
}

fn truth(value: bool) -> Result<BuiltinOutput, BuiltinError> {
    Ok(BuiltinOutput::Truth(value))
}

fn value(value: Constant) -> Result<BuiltinOutput, BuiltinError> {
    Ok(BuiltinOutput::Values(vec![value]))
}

fn compare(a: &Constant, b: &Constant) -> Result<Ordering, BuiltinError> {
    match (a, b) {
        (Constant::Int(x), Constant::Int(y)) => Ok(x.cmp(y)),
        (Constant::String(x), Constant::String(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| err(format!("cannot compare {a} and {b}"))),
            _ => Err(err(format!("cannot compare {a} and {b}"))),
        },
    }
}

fn comparison(name: &str, accept: fn(Ordering) -> bool) -> Builtin {
    Builtin::new(name, 2, 2, move |args| truth(accept(compare(&args[0], &args[1])?)))
}

fn equal(a: &Constant, b: &Constant) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(_), Some(_)) => compare(a, b).is_ok_and(|o| o == Ordering::Equal),
        _ => a == b,
    }
}

fn arithmetic(
    name: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Builtin {
    let label = name.to_string();
    Builtin::new(name, 3, 2, move |args| match (&args[0], &args[1]) {
        (Constant::Int(x), Constant::Int(y)) => int_op(*x, *y)
            .map(Constant::Int)
            .ok_or_else(|| err(format!("{label}: integer overflow"))),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Constant::Float(float_op(x, y))),
            _ => Err(err(format!("{label}: non-numeric arguments {a}, {b}"))),
        },
    }
    .and_then(value))
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn string<'a>(c: &'a Constant, name: &str) -> Result<&'a str, BuiltinError> {
    c.as_str()
        .ok_or_else(|| err(format!("{name}: expected a string, got {c}")))
}

fn integer(c: &Constant, name: &str) -> Result<i64, BuiltinError> {
    match c {
        Constant::Int(i) => Ok(*i),
        _ => Err(err(format!("{name}: expected an integer, got {c}"))),
    }
}

fn arithmetic_builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("plus", 3, 2, |args| match (&args[0], &args[1]) {
            (Constant::String(x), Constant::String(y)) => value(Constant::String(format!("{x}{y}"))),
            (Constant::Int(x), Constant::Int(y)) => x
                .checked_add(*y)
                .map(Constant::Int)
                .ok_or_else(|| err("plus: integer overflow"))
                .and_then(value),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => value(Constant::Float(x + y)),
                _ => Err(err(format!("plus: cannot add {a} and {b}"))),
            },
        }),
        arithmetic("minus", i64::checked_sub, |x, y| x - y),
        arithmetic("mul", i64::checked_mul, |x, y| x * y),
        Builtin::new("div", 3, 2, |args| {
            if args[1].as_f64() == Some(0.0) {
                return Err(err("div: division by zero"));
            }
            match (&args[0], &args[1]) {
                (Constant::Int(x), Constant::Int(y)) => floor_div(*x, *y)
                    .map(Constant::Int)
                    .ok_or_else(|| err("div: integer overflow"))
                    .and_then(value),
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => value(Constant::Float(x / y)),
                    _ => Err(err(format!("div: non-numeric arguments {a}, {b}"))),
                },
            }
        }),
        Builtin::new("float", 2, 1, |args| match &args[0] {
            Constant::Int(i) => value(Constant::Float(*i as f64)),
            Constant::Float(f) => value(Constant::Float(*f)),
            Constant::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| err(format!("float: {s:?}: {e}")))
                .map(Constant::Float)
                .and_then(value),
        }),
        Builtin::new("int", 2, 1, |args| match &args[0] {
            Constant::Int(i) => value(Constant::Int(*i)),
            Constant::Float(f) if f.is_finite() && f.abs() < 9.2e18 => {
                value(Constant::Int(f.trunc() as i64))
            }
            Constant::Float(f) => Err(err(format!("int: {f} is out of integer range"))),
            Constant::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| err(format!("int: {s:?}: {e}")))
                .map(Constant::Int)
                .and_then(value),
        }),
    ]
}

fn comparison_builtins() -> Vec<Builtin> {
    vec![
        comparison("lt", Ordering::is_lt),
        comparison("lteq", Ordering::is_le),
        comparison("gt", Ordering::is_gt),
        comparison("gteq", Ordering::is_ge),
        Builtin::new("equal", 2, 2, |args| truth(equal(&args[0], &args[1]))),
        Builtin::new("max", 3, 2, |args| {
            let larger = if compare(&args[0], &args[1])?.is_gt() {
                &args[0]
            } else {
                &args[1]
            };
            value(larger.clone())
        }),
    ]
}

fn string_builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("concat", 3, 2, |args| {
            let x = string(&args[0], "concat")?;
            let y = string(&args[1], "concat")?;
            value(Constant::String(format!("{x}{y}")))
        }),
        Builtin::new("len", 2, 1, |args| {
            let s = string(&args[0], "len")?;
            value(Constant::Int(s.chars().count() as i64))
        }),
    ]
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse the datetime formats accepted by the datetime builtins.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn datetime(c: &Constant, name: &str) -> Result<NaiveDateTime, BuiltinError> {
    let text = string(c, name)?;
    parse_datetime(text).ok_or_else(|| err(format!("{name}: not a datetime: {text:?}")))
}

fn time_of_day(c: &Constant, name: &str) -> Result<NaiveTime, BuiltinError> {
    let text = string(c, name)?;
    NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")
        .ok()
        .or_else(|| parse_datetime(text).map(|dt| dt.time()))
        .ok_or_else(|| err(format!("{name}: not a time: {text:?}")))
}

/// A duration given as seconds, or as `s`, `m:s`, `h:m:s` or `d:h:m:s`.
fn timedelta(c: &Constant, name: &str) -> Result<TimeDelta, BuiltinError> {
    let seconds = match c {
        Constant::Int(i) => *i as f64,
        Constant::Float(f) => *f,
        Constant::String(s) => {
            let mut total = 0.0;
            let fields: Vec<&str> = s.trim().split(':').collect();
            if fields.len() > 4 {
                return Err(err(format!("{name}: not a duration: {s:?}")));
            }
            for (field, scale) in fields.iter().rev().zip([1.0, 60.0, 3600.0, 86400.0]) {
                let amount: f64 = field
                    .trim()
                    .parse()
                    .map_err(|_| err(format!("{name}: not a duration: {s:?}")))?;
                total += amount * scale;
            }
            total
        }
    };
    if !seconds.is_finite() {
        return Err(err(format!("{name}: duration out of range")));
    }
    TimeDelta::try_milliseconds((seconds * 1000.0).round() as i64)
        .ok_or_else(|| err(format!("{name}: duration out of range")))
}

fn format_datetime(dt: NaiveDateTime) -> Constant {
    Constant::String(dt.format(DATETIME_FORMAT).to_string())
}

fn datetime_comparison(name: &str, accept: fn(Ordering) -> bool) -> Builtin {
    let label = name.to_string();
    Builtin::new(name, 2, 2, move |args| {
        let a = datetime(&args[0], &label)?;
        let b = datetime(&args[1], &label)?;
        truth(accept(a.cmp(&b)))
    })
}

fn datetime_builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("now", 1, 0, |_| {
            value(Constant::String(Local::now().format(DATETIME_FORMAT).to_string()))
        }),
        Builtin::new("unpack_date", 4, 1, |args| {
            let dt = datetime(&args[0], "unpack_date")?;
            Ok(BuiltinOutput::Values(vec![
                Constant::Int(dt.year().into()),
                Constant::Int(dt.month().into()),
                Constant::Int(dt.day().into()),
            ]))
        }),
        Builtin::new("unpack_time", 4, 1, |args| {
            let t = time_of_day(&args[0], "unpack_time")?;
            Ok(BuiltinOutput::Values(vec![
                Constant::Int(t.hour().into()),
                Constant::Int(t.minute().into()),
                Constant::Int(t.second().into()),
            ]))
        }),
        Builtin::new("unpack_datetime", 7, 1, |args| {
            let dt = datetime(&args[0], "unpack_datetime")?;
            Ok(BuiltinOutput::Values(vec![
                Constant::Int(dt.year().into()),
                Constant::Int(dt.month().into()),
                Constant::Int(dt.day().into()),
                Constant::Int(dt.hour().into()),
                Constant::Int(dt.minute().into()),
                Constant::Int(dt.second().into()),
            ]))
        }),
        Builtin::new("pack_time", 4, 3, |args| {
            let [h, m, s] = [0, 1, 2].map(|i| integer(&args[i], "pack_time"));
            value(Constant::String(format!("{:02}:{:02}:{:02}", h?, m?, s?)))
        }),
        Builtin::new("pack_date", 4, 3, |args| {
            let [y, m, d] = [0, 1, 2].map(|i| integer(&args[i], "pack_date"));
            value(Constant::String(format!("{:04}-{:02}-{:02}", y?, m?, d?)))
        }),
        Builtin::new("pack_datetime", 7, 6, |args| {
            let [y, mo, d, h, mi, s] =
                [0, 1, 2, 3, 4, 5].map(|i| integer(&args[i], "pack_datetime"));
            value(Constant::String(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                y?, mo?, d?, h?, mi?, s?
            )))
        }),
        Builtin::new("extract_date", 2, 1, |args| {
            let dt = datetime(&args[0], "extract_date")?;
            value(Constant::String(dt.format("%Y-%m-%d").to_string()))
        }),
        Builtin::new("extract_time", 2, 1, |args| {
            let dt = datetime(&args[0], "extract_time")?;
            value(Constant::String(dt.format("%H:%M:%S").to_string()))
        }),
        Builtin::new("datetime_to_seconds", 2, 1, |args| {
            let dt = datetime(&args[0], "datetime_to_seconds")?;
            let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(|| err("datetime_to_seconds: invalid epoch"))?;
            value(Constant::Int((dt - epoch).num_seconds()))
        }),
        Builtin::new("datetime_plus", 3, 2, |args| {
            let dt = datetime(&args[0], "datetime_plus")?;
            let delta = timedelta(&args[1], "datetime_plus")?;
            dt.checked_add_signed(delta)
                .ok_or_else(|| err("datetime_plus: out of range"))
                .map(format_datetime)
                .and_then(value)
        }),
        Builtin::new("datetime_minus", 3, 2, |args| {
            let dt = datetime(&args[0], "datetime_minus")?;
            let delta = timedelta(&args[1], "datetime_minus")?;
            dt.checked_sub_signed(delta)
                .ok_or_else(|| err("datetime_minus: out of range"))
                .map(format_datetime)
                .and_then(value)
        }),
        datetime_comparison("datetime_lt", Ordering::is_lt),
        datetime_comparison("datetime_lteq", Ordering::is_le),
        datetime_comparison("datetime_gt", Ordering::is_gt),
        datetime_comparison("datetime_gteq", Ordering::is_ge),
        datetime_comparison("datetime_equal", Ordering::is_eq),
    ]
}

/// The standard builtins, keyed by category.
pub fn default_builtins() -> Vec<(String, Vec<Builtin>)> {
    vec![
        ("comparison".to_string(), comparison_builtins()),
        ("arithmetic".to_string(), arithmetic_builtins()),
        ("string".to_string(), string_builtins()),
        ("datetime".to_string(), datetime_builtins()),
    ]
}
