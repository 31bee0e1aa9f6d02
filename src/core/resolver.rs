//! DP-003: Variable resolution.
//!
//! Substitutes `${name}` placeholders in step text and target leaves.
//! Lookup order: step-local variables, run bindings (recipe variables
//! shadowed by runtime values), then built-ins. Substitution is single-pass:
//! inserted values are never rescanned.

use super::error::{ErrorInfo, ErrorKind};
use super::types::*;
use chrono::{DateTime, Local};
use indexmap::IndexMap;

/// Built-in dynamic values, fixed for the lifetime of one scope.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub run_id: String,
    pub recipe_name: String,
    /// 1-based index of the step being resolved
    pub step_index: usize,
    pub now: DateTime<Local>,
}

impl Builtins {
    pub fn new(run_id: &str, recipe_name: &str, step_index: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            recipe_name: recipe_name.to_string(),
            step_index,
            now: Local::now(),
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "timestamp" => Some(self.now.format("%Y%m%d_%H%M%S").to_string()),
            "date" => Some(self.now.format("%Y-%m-%d").to_string()),
            "now" => Some(self.now.to_rfc3339()),
            "run_id" => Some(self.run_id.clone()),
            "recipe_name" => Some(self.recipe_name.clone()),
            "step_index" => Some(self.step_index.to_string()),
            _ => name
                .strip_prefix("env.")
                .and_then(|var| std::env::var(var).ok()),
        }
    }
}

/// Layered lookup scope for one step.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub locals: &'a IndexMap<String, String>,
    pub bindings: &'a IndexMap<String, String>,
    pub builtins: &'a Builtins,
}

impl Scope<'_> {
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.locals
            .get(name)
            .or_else(|| self.bindings.get(name))
            .cloned()
            .or_else(|| self.builtins.lookup(name))
    }
}

fn is_placeholder_name(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Resolve all placeholders in a string.
///
/// A `${` without a closing brace, or enclosing something that is not a
/// variable name, is kept as literal text.
pub fn resolve_template(template: &str, scope: &Scope<'_>) -> Result<String, ErrorInfo> {
    if !template.contains("${") {
        return Ok(template.to_string());
    }

    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("${") {
        let open = start + open;
        let Some(close) = result[open..].find('}') else {
            break;
        };
        let close = open + close + 1;
        let key = &result[open + 2..close - 1];

        if !is_placeholder_name(key) {
            start = open + 2;
            continue;
        }

        let value = scope.lookup(key).ok_or_else(|| {
            ErrorInfo::new(
                ErrorKind::UnresolvedVariable,
                format!("unresolved variable: {}", key),
            )
        })?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve every string leaf of a target.
pub fn resolve_target(target: &TargetSpec, scope: &Scope<'_>) -> Result<TargetSpec, ErrorInfo> {
    let opt = |v: &Option<String>| -> Result<Option<String>, ErrorInfo> {
        v.as_deref().map(|s| resolve_template(s, scope)).transpose()
    };
    let window = |w: &WindowTarget| -> Result<WindowTarget, ErrorInfo> {
        Ok(WindowTarget {
            title: opt(&w.title)?,
            class_name: opt(&w.class_name)?,
            process_id: w.process_id,
        })
    };

    Ok(match target {
        TargetSpec::Window(w) => TargetSpec::Window(window(w)?),
        TargetSpec::Element(e) => TargetSpec::Element(ElementTarget {
            automation_id: opt(&e.automation_id)?,
            control_type: opt(&e.control_type)?,
            name: opt(&e.name)?,
            class_name: opt(&e.class_name)?,
            index: e.index,
            window: e.window.as_ref().map(window).transpose()?,
        }),
        TargetSpec::File(path) => TargetSpec::File(resolve_template(path, scope)?),
        TargetSpec::Files(paths) => TargetSpec::Files(
            paths
                .iter()
                .map(|p| resolve_template(p, scope))
                .collect::<Result<_, _>>()?,
        ),
        TargetSpec::App(app) => TargetSpec::App(AppTarget {
            executable: resolve_template(&app.executable, scope)?,
            args: app
                .args
                .iter()
                .map(|a| resolve_template(a, scope))
                .collect::<Result<_, _>>()?,
        }),
        TargetSpec::Malformed(reason) => {
            return Err(ErrorInfo::new(ErrorKind::Validation, reason.clone()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn builtins() -> Builtins {
        Builtins::new("r-000000000001", "demo", 3)
    }

    #[test]
    fn test_dp003_resolve_recipe_variable() {
        let bindings = vars(&[("app_name", "notepad.exe")]);
        let locals = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &locals,
            bindings: &bindings,
            builtins: &b,
        };
        assert_eq!(resolve_template("${app_name}", &scope).unwrap(), "notepad.exe");
        assert_eq!(
            resolve_template("run ${app_name} now", &scope).unwrap(),
            "run notepad.exe now"
        );
    }

    #[test]
    fn test_dp003_resolve_target_app() {
        let bindings = vars(&[("app_name", "notepad.exe"), ("file", "a.txt")]);
        let locals = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &locals,
            bindings: &bindings,
            builtins: &b,
        };
        let target = TargetSpec::App(AppTarget {
            executable: "${app_name}".to_string(),
            args: vec!["${file}".to_string()],
        });
        assert_eq!(
            resolve_target(&target, &scope).unwrap(),
            TargetSpec::App(AppTarget {
                executable: "notepad.exe".to_string(),
                args: vec!["a.txt".to_string()],
            })
        );
    }

    #[test]
    fn test_dp003_locals_shadow_bindings() {
        let bindings = vars(&[("who", "recipe")]);
        let locals = vars(&[("who", "step")]);
        let b = builtins();
        let scope = Scope {
            locals: &locals,
            bindings: &bindings,
            builtins: &b,
        };
        assert_eq!(resolve_template("${who}", &scope).unwrap(), "step");
    }

    #[test]
    fn test_dp003_bindings_shadow_builtins() {
        let bindings = vars(&[("run_id", "custom")]);
        let locals = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &locals,
            bindings: &bindings,
            builtins: &b,
        };
        assert_eq!(resolve_template("${run_id}", &scope).unwrap(), "custom");
    }

    #[test]
    fn test_dp003_builtins() {
        let empty = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &empty,
            bindings: &empty,
            builtins: &b,
        };
        assert_eq!(resolve_template("${run_id}", &scope).unwrap(), "r-000000000001");
        assert_eq!(resolve_template("${recipe_name}", &scope).unwrap(), "demo");
        assert_eq!(resolve_template("${step_index}", &scope).unwrap(), "3");
        let ts = resolve_template("${timestamp}", &scope).unwrap();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
        let date = resolve_template("${date}", &scope).unwrap();
        assert_eq!(date.len(), 10);
    }

    #[test]
    fn test_dp003_env_builtin() {
        let empty = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &empty,
            bindings: &empty,
            builtins: &b,
        };
        let path = std::env::var("PATH").unwrap_or_default();
        if !path.is_empty() {
            assert_eq!(resolve_template("${env.PATH}", &scope).unwrap(), path);
        }
        let err = resolve_template("${env.DESKPILOT_SURELY_UNSET_VAR}", &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedVariable);
    }

    #[test]
    fn test_dp003_unresolved() {
        let empty = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &empty,
            bindings: &empty,
            builtins: &b,
        };
        let err = resolve_template("hello ${nobody}", &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedVariable);
        assert!(err.message.contains("nobody"));
    }

    #[test]
    fn test_dp003_single_pass() {
        let bindings = vars(&[("a", "${b}"), ("b", "deep")]);
        let locals = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &locals,
            bindings: &bindings,
            builtins: &b,
        };
        assert_eq!(resolve_template("${a}", &scope).unwrap(), "${b}");
        let self_ref = vars(&[("loop", "${loop}")]);
        let scope = Scope {
            locals: &locals,
            bindings: &self_ref,
            builtins: &b,
        };
        assert_eq!(resolve_template("${loop}${loop}", &scope).unwrap(), "${loop}${loop}");
    }

    #[test]
    fn test_dp003_literal_dollar_brace() {
        let bindings = vars(&[("x", "1")]);
        let locals = IndexMap::new();
        let b = builtins();
        let scope = Scope {
            locals: &locals,
            bindings: &bindings,
            builtins: &b,
        };
        assert_eq!(resolve_template("cost ${", &scope).unwrap(), "cost ${");
        assert_eq!(resolve_template("${ not a name } ${x}", &scope).unwrap(), "${ not a name } 1");
    }

    proptest! {
        #[test]
        fn prop_dp003_placeholder_free_unchanged(s in "[^$]*") {
            let empty = IndexMap::new();
            let b = builtins();
            let scope = Scope { locals: &empty, bindings: &empty, builtins: &b };
            prop_assert_eq!(resolve_template(&s, &scope).unwrap(), s);
        }

        #[test]
        fn prop_dp003_resolve_twice_same(value in "[a-z ]{0,12}", prefix in "[a-z ]{0,8}") {
            let bindings = vars(&[("v", value.as_str())]);
            let locals = IndexMap::new();
            let b = builtins();
            let scope = Scope { locals: &locals, bindings: &bindings, builtins: &b };
            let once = resolve_template(&format!("{}${{v}}", prefix), &scope).unwrap();
            let twice = resolve_template(&once, &scope).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
