//! Script templates.
//!
//! A simulation turns a parameter mapping into a task's command script with
//! a `Template`: either a function supplied by the caller or a fixed list of
//! command lines with `{name}` placeholders.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Error, Result};


/// Ordered task parameters.
pub type Params = IndexMap<String, Value>;

/// Caller-supplied script generator.
pub type TemplateFn = Arc<dyn Fn(&Params) -> Result<Vec<String>> + Send + Sync>;

#[derive(Clone)]
pub enum Template {
    Function(TemplateFn),
    Fixed(Vec<String>),
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Function(_) => f.write_str("Template::Function(..)"),
            Template::Fixed(lines) => f.debug_tuple("Template::Fixed").field(lines).finish(),
        }
    }
}

impl Template {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Params) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Template::Function(Arc::new(f))
    }

    pub fn fixed<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Template::Fixed(lines.into_iter().map(Into::into).collect())
    }

    /// Produce the script for `params`. An empty script is a `Template` error.
    pub fn render(&self, params: &Params) -> Result<Vec<String>> {
        let script = match self {
            Template::Function(f) => f(params)?,
            Template::Fixed(lines) => lines
                .iter()
                .map(|line| substitute(line, params))
                .collect::<Result<Vec<_>>>()?,
        };
        if script.is_empty() {
            return Err(Error::Template("template produced an empty script".into()));
        }
        Ok(script)
    }

    /// Placeholder names used by a fixed template, in first-use order.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Template::Fixed(lines) = self {
            for line in lines {
                for name in scan(line).into_iter().flatten() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }
}


/// Replace each `{name}` in `line` with the text of `params[name]`.
/// `{{` and `}}` produce literal braces.
pub fn substitute(line: &str, params: &Params) -> Result<String> {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let name = read_name(&mut chars, line)?;
                let value = params.get(&name).ok_or_else(|| {
                    Error::Template(format!("unknown placeholder {{{}}} in '{}'", name, line))
                })?;
                out.push_str(&param_text(value));
            }
            '}' => {
                return Err(Error::Template(format!("unmatched '}}' in '{}'", line)));
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn read_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, line: &str) -> Result<String> {
    let mut name = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            if name.is_empty() {
                return Err(Error::Template(format!("empty placeholder in '{}'", line)));
            }
            return Ok(name);
        }
        name.push(c);
    }
    Err(Error::Template(format!("unclosed placeholder in '{}'", line)))
}

fn scan(line: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
            }
            '{' => names.push(read_name(&mut chars, line)?),
            _ => {}
        }
    }
    Ok(names)
}

/// Text inserted for a parameter value. Strings are inserted bare.
pub fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn fixed_template_substitutes() {
        let template = Template::fixed(vec![
            "gmx grompp -f {mdp} -c {input_dir}/conf.gro",
            "gmx mdrun -nsteps {steps}",
        ]);
        let script = template
            .render(&params(&[
                ("mdp", json!("em.mdp")),
                ("input_dir", json!("../..")),
                ("steps", json!(5000)),
            ]))
            .unwrap();
        assert_eq!(
            script,
            vec!["gmx grompp -f em.mdp -c ../../conf.gro", "gmx mdrun -nsteps 5000"]
        );
    }

    #[test]
    fn escaped_braces() {
        let out = substitute("awk '{{print $1}}' {f}", &params(&[("f", json!("x.txt"))])).unwrap();
        assert_eq!(out, "awk '{print $1}' x.txt");
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let err = Template::fixed(vec!["run {missing}"]).render(&Params::new()).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn malformed_placeholders() {
        assert!(substitute("a {b", &Params::new()).is_err());
        assert!(substitute("a {} b", &Params::new()).is_err());
        assert!(substitute("a } b", &Params::new()).is_err());
    }

    #[test]
    fn function_template() {
        let template = Template::function(|p: &Params| {
            let n = p.get("n").and_then(Value::as_u64).unwrap_or(1);
            Ok((0..n).map(|i| format!("echo {}", i)).collect())
        });
        let script = template.render(&params(&[("n", json!(2))])).unwrap();
        assert_eq!(script, vec!["echo 0", "echo 1"]);
    }

    #[test]
    fn empty_script_is_rejected() {
        let template = Template::function(|_: &Params| Ok(Vec::new()));
        assert!(matches!(template.render(&Params::new()), Err(Error::Template(_))));
        assert!(Template::fixed(Vec::<String>::new()).render(&Params::new()).is_err());
    }

    #[test]
    fn function_errors_propagate() {
        let template = Template::function(|_: &Params| Err(Error::Template("bad temperature".into())));
        let err = template.render(&Params::new()).unwrap_err();
        assert!(err.to_string().contains("bad temperature"));
    }

    #[test]
    fn placeholder_listing() {
        let template = Template::fixed(vec!["{a} {b}", "{{x}} {a} {c}"]);
        assert_eq!(template.placeholders(), vec!["a", "b", "c"]);
    }

    #[test]
    fn value_text() {
        assert_eq!(param_text(&json!("s")), "s");
        assert_eq!(param_text(&json!(1.5)), "1.5");
        assert_eq!(param_text(&json!(true)), "true");
        assert_eq!(param_text(&Value::Null), "");
    }
}
