//! Parsing and host-side resolution of `host:container[:options]` mounts.
//!
//! The container knows nothing about the caller's working directory or
//! environment, so host paths are expanded and made absolute before they
//! reach the runtime's `-v` flag.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::PtyError;

/// A single volume mount specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    /// Host path or named volume. `None` for an anonymous volume.
    pub host: Option<String>,
    /// Path inside the container.
    pub container: String,
    /// Runtime options such as `ro` or `rw,z`.
    pub options: Option<String>,
}

impl Mount {
    /// Resolve the mount against `cwd`, expanding variables with `lookup`.
    ///
    /// Host parts that look like paths become absolute and lexically
    /// normalized; bare names are left alone as named volumes.
    pub fn resolve_with<F>(&self, cwd: &Path, lookup: F) -> Mount
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = self.host.as_deref().map(|host| {
            let expanded = expand_home(&expand_vars(host, &lookup));
            if looks_like_path(&expanded) {
                absolutize(cwd, Path::new(&expanded))
                    .to_string_lossy()
                    .into_owned()
            } else {
                expanded
            }
        });

        let container = if self.host.is_none() {
            expand_vars(&self.container, &lookup)
        } else {
            self.container.clone()
        };

        Mount {
            host,
            container,
            options: self.options.clone(),
        }
    }
}

impl FromStr for Mount {
    type Err = PtyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| PtyError::SpawnFailed(format!("invalid mount `{s}`: {why}"));

        let mut parts = s.splitn(3, ':');
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        let options = parts.next();

        let mount = match second {
            None => Mount {
                host: None,
                container: first.to_string(),
                options: None,
            },
            Some(container) => Mount {
                host: Some(first.to_string()),
                container: container.to_string(),
                options: options.map(str::to_string),
            },
        };

        if mount.host.as_deref() == Some("") {
            return Err(invalid("empty host path"));
        }
        if mount.container.is_empty() {
            return Err(invalid("empty container path"));
        }
        if mount.options.as_deref() == Some("") {
            return Err(invalid("empty options"));
        }
        Ok(mount)
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{host}:")?;
        }
        f.write_str(&self.container)?;
        if let Some(options) = &self.options {
            write!(f, ":{options}")?;
        }
        Ok(())
    }
}

/// Expand `$NAME` and `${NAME}` references.
///
/// Unknown variables and malformed references are left as written.
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

fn expand_home(path: &str) -> String {
    let tail = match path.strip_prefix('~') {
        Some(tail) if tail.is_empty() || tail.starts_with('/') => tail,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{tail}", home.display()),
        None => path.to_string(),
    }
}

fn looks_like_path(host: &str) -> bool {
    host.contains('/') || host.starts_with('.') || host.starts_with('~')
}

/// Join `path` onto `cwd` and drop `.`/`..` components without touching the
/// filesystem.
fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
