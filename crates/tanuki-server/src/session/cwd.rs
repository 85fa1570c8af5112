//! Fake working directory.
//!
//! Only tracks a path string. Nothing here touches the real filesystem, and
//! every target is accepted: whether the directory "exists" is the backend's
//! story to tell.

/// Current and previous directory for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCwd {
    current: String,
    previous: Option<String>,
    home: String,
}

impl FakeCwd {
    /// Start in `home`.
    pub fn new(home: impl Into<String>) -> Self {
        let home = normalize(&home.into());
        Self {
            current: home.clone(),
            previous: None,
            home,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Apply `cd [target]` the way bash does for the forms attackers type:
    /// no argument or `~` goes home, `-` swaps with the previous directory,
    /// and everything else resolves against the current directory.
    pub fn change_dir(&mut self, target: Option<&str>) {
        let next = match target {
            None => self.home.clone(),
            Some("-") => match &self.previous {
                Some(prev) => prev.clone(),
                None => return,
            },
            Some(path) => self.resolve(path),
        };
        self.previous = Some(std::mem::replace(&mut self.current, next));
    }

    /// Absolute, normalized form of `path` relative to the current directory.
    pub fn resolve(&self, path: &str) -> String {
        let expanded = if path == "~" {
            self.home.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            format!("{}/{rest}", self.home)
        } else {
            path.to_string()
        };

        if expanded.starts_with('/') {
            normalize(&expanded)
        } else {
            normalize(&format!("{}/{expanded}", self.current))
        }
    }

    /// The directory as a prompt shows it, with home abbreviated to `~`.
    pub fn display(&self) -> String {
        if self.current == self.home {
            "~".to_string()
        } else if self.home != "/" {
            match self.current.strip_prefix(&self.home) {
                Some(rest) if rest.starts_with('/') => format!("~{rest}"),
                _ => self.current.clone(),
            }
        } else {
            self.current.clone()
        }
    }
}

/// Collapse `.`, `..` and repeated slashes. `..` at the root stays at the root.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}
