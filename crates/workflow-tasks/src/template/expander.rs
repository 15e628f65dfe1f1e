//! Expansion of `${[options;]name[|default]}` expressions.
//!
//! Supported names:
//! - `workflow.input.KEY` - job input parameter
//! - `env.KEY` - process environment variable
//! - `TASK.json.PATH` - JSON path into the output of an earlier HTTP or CLI task
//!
//! The only option is `encoding=url|html`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::model::{InputParameter, Job, TaskType};
use crate::result::TaskResult;
use crate::template::json_path;

const INPUT_PREFIX: &str = "workflow.input.";
const ENV_PREFIX: &str = "env.";
const ENCODING_OPTION: &str = "encoding";

static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$\{(?P<options>(?:[a-zA-Z]+=[a-zA-Z0-9]+;)*)(?P<name>[^;}|]+)(?:\|(?P<default>[^}]+))?\}",
    )
    .expect("expression pattern is valid")
});

static OUTPUT_EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)\.json\.(.*)$").expect("output pattern is valid"));

/// Escaping applied to a substituted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Plain,
    Url,
    Html,
}

impl Encoding {
    /// Parse the option string (`key=value;` pairs) of an expression.
    fn from_options(options: &str) -> Self {
        let mut encoding = Encoding::Plain;
        for token in options.split(';') {
            if let Some((key, value)) = token.split_once('=') {
                if key == ENCODING_OPTION {
                    encoding = match value {
                        "url" => Encoding::Url,
                        "html" => Encoding::Html,
                        _ => Encoding::Plain,
                    };
                }
            }
        }
        encoding
    }

    pub fn apply(&self, value: &str) -> String {
        match self {
            Encoding::Plain => value.to_string(),
            Encoding::Url => url::form_urlencoded::byte_serialize(value.as_bytes()).collect(),
            Encoding::Html => escape_html(value),
        }
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '"' => escaped.push_str("&#34;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Expands templates against one job's inputs and the results so far.
#[derive(Debug, Clone, Copy)]
pub struct Expander<'a> {
    inputs: &'a [InputParameter],
    results: &'a [TaskResult],
}

impl<'a> Expander<'a> {
    pub fn new(inputs: &'a [InputParameter], results: &'a [TaskResult]) -> Self {
        Self { inputs, results }
    }

    /// Expander over a job's inputs and its recorded results.
    pub fn for_job(job: &'a Job) -> Self {
        Self::new(&job.input_parameters, &job.results)
    }

    /// Expand every expression in `raw`.
    ///
    /// All matches are resolved against the same inputs; a `TASK.json.PATH`
    /// expression that cannot be resolved is left untouched.
    pub fn expand(&self, raw: &str) -> String {
        EXPRESSION
            .replace_all(raw, |caps: &Captures| {
                self.resolve(caps)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Expand every string leaf of a JSON value.
    pub fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand(s)),
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), self.expand_value(v)))
                    .collect(),
            ),
            Value::Array(arr) => Value::Array(arr.iter().map(|v| self.expand_value(v)).collect()),
            _ => value.clone(),
        }
    }

    fn resolve(&self, caps: &Captures) -> Option<String> {
        let name = &caps["name"];
        let default = caps.name("default").map_or("", |m| m.as_str());
        let encoding = Encoding::from_options(caps.name("options").map_or("", |m| m.as_str()));

        let value = if let Some(key) = name.strip_prefix(INPUT_PREFIX).filter(|k| !k.is_empty()) {
            self.inputs
                .iter()
                .find(|p| p.name == key)
                .map_or_else(|| default.to_string(), |p| p.value.clone())
        } else if let Some(key) = name.strip_prefix(ENV_PREFIX).filter(|k| !k.is_empty()) {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        } else if let Some(output) = OUTPUT_EXPRESSION.captures(name) {
            let found = self.task_output(&output[1], &output[2])?;
            if found.is_empty() {
                default.to_string()
            } else {
                found
            }
        } else {
            default.to_string()
        };

        Some(encoding.apply(&value))
    }

    /// Stringified value at `path` in the JSON output of `task`.
    fn task_output(&self, task: &str, path: &str) -> Option<String> {
        let result = self
            .results
            .iter()
            .find(|r| r.name == task && matches!(r.task_type, TaskType::Http | TaskType::Cli))?;
        let document: Value = serde_json::from_str(result.text_output()?).ok()?;
        json_path::lookup(&document, path).map(stringify)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Expand `raw` for `job` given the results recorded so far.
pub fn expand(raw: &str, job: &Job, results: &[TaskResult]) -> String {
    Expander::new(&job.input_parameters, results).expand(raw)
}
