//! Expansion of `@@include` directives in HTML sources.
//!
//! A directive has the form `@@include("partial.html")` or
//! `@@include('partial.html', {"title": "Home"})`. The path is always
//! resolved against the include base, also from inside nested partials. The
//! optional JSON object becomes the context of the partial: every `@@key`
//! token inside it is replaced by the value, and nested includes see the
//! merged context of their parents.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};

use crate::error::IncludeError;

/// Marker that starts every directive and variable.
pub const MARKER: &str = "@@";

const DIRECTIVE: &str = "@@include(";

/// Nesting deeper than this is treated as a cycle.
const MAX_DEPTH: usize = 64;

type Context = Map<String, Value>;

/// Resolves include directives against a fixed base directory.
#[derive(Debug, Clone)]
pub struct Includer {
    base: Utf8PathBuf,
}

impl Includer {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Expands every directive in `text`, which was read from `file`.
    pub fn expand(&self, text: &str, file: &Utf8Path) -> Result<String, IncludeError> {
        let mut stack = vec![file.to_path_buf()];
        self.expand_with(text, file, &Context::new(), &mut stack)
    }

    fn expand_with(
        &self,
        text: &str,
        file: &Utf8Path,
        context: &Context,
        stack: &mut Vec<Utf8PathBuf>,
    ) -> Result<String, IncludeError> {
        let text = substitute(text, context);

        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();

        while let Some(pos) = rest.find(DIRECTIVE) {
            out.push_str(&rest[..pos]);

            let args = &rest[pos + DIRECTIVE.len()..];
            let (directive, consumed) = parse_directive(args, file)?;

            let path = self.base.join(&directive.path);

            if stack.len() >= MAX_DEPTH || stack.contains(&path) {
                let chain = stack
                    .iter()
                    .chain(std::iter::once(&path))
                    .map(|path| path.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(IncludeError::Cycle(chain));
            }

            if !path.is_file() {
                return Err(IncludeError::NotFound(path));
            }

            let partial = fs::read_to_string(&path)?;

            let mut scope = context.clone();
            scope.extend(directive.context);

            stack.push(path.clone());
            let expanded = self.expand_with(&partial, &path, &scope, stack)?;
            stack.pop();

            out.push_str(&expanded);
            rest = &args[consumed..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

struct Directive {
    path: String,
    context: Context,
}

/// Parses `"path", {..})` and returns the directive together with the number
/// of bytes consumed, closing parenthesis included.
fn parse_directive(args: &str, file: &Utf8Path) -> Result<(Directive, usize), IncludeError> {
    let syntax = |reason: &str| IncludeError::Syntax {
        file: file.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut cursor = skip_ws(args, 0);

    let quote = match args[cursor..].chars().next() {
        Some(c @ ('"' | '\'')) => c,
        _ => return Err(syntax("expected a quoted path")),
    };
    cursor += 1;

    let len = args[cursor..]
        .find(quote)
        .ok_or_else(|| syntax("unterminated path"))?;
    let path = args[cursor..cursor + len].trim().to_string();
    cursor += len + 1;

    if path.is_empty() {
        return Err(syntax("empty path"));
    }

    let mut context = Context::new();
    cursor = skip_ws(args, cursor);

    if args[cursor..].starts_with(',') {
        cursor = skip_ws(args, cursor + 1);

        let mut stream = serde_json::Deserializer::from_str(&args[cursor..]).into_iter::<Value>();
        let value = match stream.next() {
            Some(Ok(value)) => value,
            Some(Err(source)) => {
                return Err(IncludeError::Context {
                    file: file.to_path_buf(),
                    source,
                });
            }
            None => return Err(syntax("missing context after ','")),
        };
        cursor += stream.byte_offset();

        match value {
            Value::Object(map) => context = map,
            _ => return Err(syntax("context must be a JSON object")),
        }

        cursor = skip_ws(args, cursor);
    }

    if !args[cursor..].starts_with(')') {
        return Err(syntax("expected ')'"));
    }

    Ok((Directive { path, context }, cursor + 1))
}

fn skip_ws(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start().len())
}

/// Replaces `@@key` tokens with values from the context. Dotted keys address
/// nested objects. Tokens without a value are kept verbatim.
fn substitute(text: &str, context: &Context) -> String {
    if context.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(MARKER) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + MARKER.len()..];

        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        let ident = after[..len].trim_end_matches('.');

        match lookup(context, ident) {
            Some(value) if ident != "include" => {
                out.push_str(&render(value));
                rest = &after[ident.len()..];
            }
            _ => {
                out.push_str(MARKER);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(context: &'a Context, ident: &str) -> Option<&'a Value> {
    if ident.is_empty() {
        return None;
    }

    let mut parts = ident.split('.');
    let mut value = context.get(parts.next()?)?;

    for part in parts {
        value = value.as_object()?.get(part)?;
    }

    Some(value)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        for (name, text) in files {
            let path = base.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }

        (dir, base)
    }

    #[test]
    fn test_inlines_partial_at_directive() {
        let (_dir, base) = setup(&[("partials/header.html", "<header>Hi</header>")]);
        let includer = Includer::new(&base);

        let out = includer
            .expand(
                "<body>@@include(\"partials/header.html\")<main></main></body>",
                &base.join("index.html"),
            )
            .unwrap();

        assert_eq!(out, "<body><header>Hi</header><main></main></body>");
    }

    #[test]
    fn test_missing_partial() {
        let (_dir, base) = setup(&[]);
        let includer = Includer::new(&base);

        let err = includer
            .expand("@@include('nope.html')", &base.join("index.html"))
            .unwrap_err();

        assert!(matches!(err, IncludeError::NotFound(path) if path.ends_with("nope.html")));
    }

    #[test]
    fn test_nested_includes_resolve_against_base() {
        let (_dir, base) = setup(&[
            ("partials/layout.html", "<div>@@include('partials/inner.html')</div>"),
            ("partials/inner.html", "<p>inner</p>"),
        ]);
        let includer = Includer::new(&base);

        let out = includer
            .expand("@@include('partials/layout.html')", &base.join("index.html"))
            .unwrap();

        assert_eq!(out, "<div><p>inner</p></div>");
    }

    #[test]
    fn test_context_variables() {
        let (_dir, base) = setup(&[
            ("title.html", "<h1>@@title</h1><p>@@meta.author, @@count</p>@@unknown"),
        ]);
        let includer = Includer::new(&base);

        let out = includer
            .expand(
                r#"@@include("title.html", {"title": "Home", "meta": {"author": "Ann"}, "count": 3})"#,
                &base.join("index.html"),
            )
            .unwrap();

        assert_eq!(out, "<h1>Home</h1><p>Ann, 3</p>@@unknown");
    }

    #[test]
    fn test_context_is_inherited_by_nested_partials() {
        let (_dir, base) = setup(&[
            ("outer.html", "@@include('inner.html', {\"b\": \"2\"})"),
            ("inner.html", "@@a-@@b"),
        ]);
        let includer = Includer::new(&base);

        let out = includer
            .expand(r#"@@include('outer.html', {"a": "1"})"#, &base.join("index.html"))
            .unwrap();

        assert_eq!(out, "1-2");
    }

    #[test]
    fn test_cycle_is_an_error() {
        let (_dir, base) = setup(&[
            ("a.html", "@@include('b.html')"),
            ("b.html", "@@include('a.html')"),
        ]);
        let includer = Includer::new(&base);

        let err = includer
            .expand("@@include('a.html')", &base.join("index.html"))
            .unwrap_err();

        match err {
            IncludeError::Cycle(chain) => {
                let names: Vec<_> = chain
                    .split(" -> ")
                    .map(|path| Utf8Path::new(path).file_name().unwrap())
                    .collect();
                assert_eq!(names, ["index.html", "a.html", "b.html", "a.html"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_malformed_directives() {
        let (_dir, base) = setup(&[("a.html", "x")]);
        let includer = Includer::new(&base);
        let file = base.join("index.html");

        assert!(matches!(
            includer.expand("@@include(a.html)", &file),
            Err(IncludeError::Syntax { .. })
        ));
        assert!(matches!(
            includer.expand("@@include('a.html'", &file),
            Err(IncludeError::Syntax { .. })
        ));
        assert!(matches!(
            includer.expand("@@include('a.html', [1])", &file),
            Err(IncludeError::Syntax { .. })
        ));
        assert!(matches!(
            includer.expand("@@include('a.html', {oops})", &file),
            Err(IncludeError::Context { .. })
        ));
    }

    #[test]
    fn test_text_without_directives_is_untouched() {
        let includer = Includer::new("unused");
        let text = "<p>email me @@ home</p>";

        assert_eq!(includer.expand(text, Utf8Path::new("x.html")).unwrap(), text);
    }
}
