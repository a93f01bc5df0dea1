//! Decides which working-tree paths are tracked.
//!
//! Evaluation order:
//! 1. Hard exclusions (metadata directory, `.git`, secrets and key material,
//!    configured sensitive globs). Nothing can re-include these.
//! 2. Ordered rules: the built-in defaults, then the user's `ignore` list.
//!    The last matching rule wins; `!pattern` is an include rule.
//! 3. Anything unmatched is tracked.
//!
//! The same filter is consulted when scanning for commits, diffing and
//! restoring, so an excluded path is never reported nor written.

use crate::error::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

const SECRET_PATTERNS: &[&str] = &["secrets.yaml", ".secrets.yaml", "*.pem", "*.key", "*.crt"];

const DEFAULT_EXCLUDES: &[&str] = &[
    // databases
    "*.db",
    "*.db-shm",
    "*.db-wal",
    "*.db-journal",
    "*.sqlite",
    "*.sqlite3",
    // logs
    "*.log",
    "*.log.*",
    // editor and backup leftovers
    "*.bak",
    "*.backup",
    "*.old",
    "*.tmp",
    "*.temp",
    "*~",
    // heavy or runtime-owned directories at the root
    "/.storage/",
    "/.cloud/",
    "/.homeassistant/",
    "/www/",
    "/media/",
    "/storage/",
    "/tmp/",
    "/node_modules/",
    "/__pycache__/",
];

struct Rule {
    pattern: String,
    include: bool,
    matcher: GlobSet,
}

pub struct ChangeFilter {
    metadata_dir: String,
    hard: GlobSet,
    rules: Vec<Rule>,
}

impl ChangeFilter {
    pub fn new(
        metadata_dir: &str,
        ignore: &[String],
        sensitive: &[String],
        use_default_excludes: bool,
    ) -> Result<Self> {
        let mut hard = GlobSetBuilder::new();
        for pattern in SECRET_PATTERNS {
            add_pattern(&mut hard, pattern)?;
        }
        for pattern in sensitive {
            add_pattern(&mut hard, pattern)?;
        }
        add_pattern(&mut hard, ".git/")?;

        let mut rules = Vec::new();
        if use_default_excludes {
            for pattern in DEFAULT_EXCLUDES {
                rules.push(Rule::compile(pattern)?);
            }
        }
        for pattern in ignore {
            let trimmed = pattern.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            rules.push(Rule::compile(trimmed)?);
        }

        Ok(Self {
            metadata_dir: metadata_dir.trim_matches('/').to_string(),
            hard: hard.build()?,
            rules,
        })
    }

    pub fn metadata_dir(&self) -> &str {
        &self.metadata_dir
    }

    /// Whether `path` (relative to the root, `/`-separated) is tracked.
    pub fn is_trackable(&self, path: &str) -> bool {
        let path = normalize(path);
        if path.is_empty() || self.is_hard_excluded(&path) {
            return false;
        }

        let mut tracked = true;
        for rule in &self.rules {
            if rule.matcher.is_match(path.as_str()) {
                tracked = rule.include;
            }
        }
        tracked
    }

    /// True for paths no rule may re-include. Walkers use this to skip
    /// whole directories.
    pub fn is_hard_excluded(&self, path: &str) -> bool {
        let path = normalize(path);
        let first = path.split('/').next().unwrap_or_default();
        first == self.metadata_dir || self.hard.is_match(path.as_str())
    }

    /// The rule patterns in evaluation order, `!`-prefixed when including.
    pub fn rules(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|r| {
                if r.include {
                    format!("!{}", r.pattern)
                } else {
                    r.pattern.clone()
                }
            })
            .collect()
    }
}

impl Rule {
    fn compile(raw: &str) -> Result<Self> {
        let (include, pattern) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let mut builder = GlobSetBuilder::new();
        add_pattern(&mut builder, pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            include,
            matcher: builder.build()?,
        })
    }
}

/// Expand a gitignore-flavoured pattern into globs over relative paths.
///
/// A leading `/` anchors to the root, a trailing `/` matches a directory and
/// its contents, and a pattern without `/` matches a name at any depth.
fn add_pattern(builder: &mut GlobSetBuilder, pattern: &str) -> Result<()> {
    let dir_only = pattern.ends_with('/');
    let anchored = pattern.starts_with('/');
    let body = pattern.trim_matches('/');
    let base = if anchored || body.contains('/') {
        body.to_string()
    } else {
        format!("**/{}", body)
    };

    let mut globs = vec![format!("{}/**", base)];
    if !dir_only {
        globs.push(base);
    }

    for glob in globs {
        builder.add(GlobBuilder::new(&glob).literal_separator(true).build()?);
    }
    Ok(())
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut path = path.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_start_matches('/').to_string()
}
