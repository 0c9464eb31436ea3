//! Launch-argument override grammar
//!
//! `-settings:<Kind>.<field.path>=<value>` or `-s:<Kind>.<field.path>=<value>`.

use std::fmt;

const LONG_PREFIX: &str = "-settings";
const SHORT_PREFIX: &str = "-s";

/// A well-formed override argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgOverride {
    pub kind: String,
    pub path: Vec<String>,
    pub value: String,
}

/// A settings argument that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedArg {
    pub token: String,
    /// Kind named by the token, when one could be made out
    pub kind_hint: Option<String>,
    pub reason: &'static str,
}

impl fmt::Display for MalformedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed settings argument '{}': {}", self.token, self.reason)
    }
}

/// Parse one argument.
///
/// Returns `None` for arguments that are not settings overrides at all.
pub fn parse_arg(token: &str) -> Option<Result<ArgOverride, MalformedArg>> {
    let body = if let Some(rest) = token.strip_prefix(LONG_PREFIX) {
        rest
    } else if let Some(rest) = token.strip_prefix(SHORT_PREFIX) {
        // "-sfoo" and friends belong to someone else
        if !rest.is_empty() && !rest.starts_with(':') {
            return None;
        }
        rest
    } else {
        return None;
    };

    let malformed = |kind_hint: Option<&str>, reason| MalformedArg {
        token: token.to_string(),
        kind_hint: kind_hint.filter(|k| !k.is_empty()).map(str::to_string),
        reason,
    };

    let Some(body) = body.strip_prefix(':') else {
        return Some(Err(malformed(None, "missing ':' after the settings prefix")));
    };

    let kind_hint = body.split(['.', '=']).next();

    let Some((target, value)) = body.split_once('=') else {
        return Some(Err(malformed(kind_hint, "missing '=' before the value")));
    };

    let Some((kind, path)) = target.split_once('.') else {
        return Some(Err(malformed(kind_hint, "missing field path after the kind name")));
    };

    if kind.is_empty() {
        return Some(Err(malformed(None, "empty kind name")));
    }

    let path: Vec<String> = path.split('.').map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return Some(Err(malformed(kind_hint, "empty field path segment")));
    }

    Some(Ok(ArgOverride {
        kind: kind.to_string(),
        path,
        value: value.to_string(),
    }))
}

/// Parse every settings argument, keeping going past malformed ones.
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> (Vec<ArgOverride>, Vec<MalformedArg>) {
    let mut parsed = Vec::new();
    let mut malformed = Vec::new();

    for arg in args {
        match parse_arg(arg.as_ref()) {
            Some(Ok(a)) => parsed.push(a),
            Some(Err(m)) => malformed.push(m),
            None => {}
        }
    }

    (parsed, malformed)
}
