//! Runtime compatibility gate.
//!
//! An artifact may declare the minimum Ruby it needs in its version file:
//!
//! ```ruby
//! REQUIRED_RUBY = '3.2.0'
//! ```
//!
//! The gate compares that against the Ruby on this host before anything in the
//! installation is touched. No declaration, or no way to learn the host's
//! version, means the update proceeds.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use super::version::VersionKey;
use crate::config::{LayoutConfig, RuntimeConfig};
use crate::errors::UpdateError;

/// Outcome of a compatibility check that did not block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    /// The artifact declares no requirement.
    Undeclared,
    /// The requirement is met.
    Satisfied {
        /// Declared minimum.
        required: String,
        /// Host runtime version.
        running: String,
    },
    /// A requirement exists but the host version is unknown.
    Unverified {
        /// Declared minimum.
        required: String,
    },
}

/// Checks an extracted artifact's declared runtime requirement.
#[derive(Debug, Clone)]
pub struct CompatibilityGate {
    requirement_key: String,
    version_file: String,
    running: Option<String>,
}

impl CompatibilityGate {
    /// Creates a gate that compares against `running`.
    #[must_use]
    pub fn new(runtime: &RuntimeConfig, layout: &LayoutConfig, running: Option<String>) -> Self {
        Self {
            requirement_key: runtime.requirement_key.clone(),
            version_file: format!("{}/{}", layout.lib_dir, layout.version_file),
            running,
        }
    }

    /// Creates a gate for the host runtime: the configured version, else the
    /// interpreter's own answer.
    #[must_use]
    pub fn detect(runtime: &RuntimeConfig, layout: &LayoutConfig) -> Self {
        let running = runtime
            .version
            .clone()
            .or_else(|| probe_runtime(&runtime.interpreter));
        debug!(running = ?running, "host runtime");
        Self::new(runtime, layout, running)
    }

    /// Checks the artifact rooted at `extracted_root`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::CompatibilityBlocked`] when the host runtime is
    /// older than the declared minimum, or an I/O error if the version file
    /// exists but cannot be read.
    pub fn check(&self, extracted_root: &Path) -> Result<Compatibility> {
        let Some(required) = self.declared_requirement(extracted_root)? else {
            return Ok(Compatibility::Undeclared);
        };

        let Some(running) = &self.running else {
            warn!(%required, "runtime version unknown; skipping compatibility check");
            return Ok(Compatibility::Unverified { required });
        };

        if VersionKey::parse(running) < VersionKey::parse(&required) {
            return Err(UpdateError::compatibility_blocked(required, running.clone()).into());
        }
        Ok(Compatibility::Satisfied {
            required,
            running: running.clone(),
        })
    }

    fn declared_requirement(&self, extracted_root: &Path) -> Result<Option<String>> {
        let path = extracted_root.join(&self.version_file);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(scan_requirement(&content, &self.requirement_key))
    }
}

/// Finds `<KEY> = 'x.y.z'` (either quote style) in Ruby source.
#[must_use]
pub fn scan_requirement(content: &str, key: &str) -> Option<String> {
    let pattern = format!(r#"(?m)^\s*{}\s*=\s*["']([^"']+)["']"#, regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Asks the interpreter on `PATH` for its version.
fn probe_runtime(interpreter: &str) -> Option<String> {
    let path = which::which(interpreter).ok()?;
    let output = Command::new(path)
        .args(["-e", "print RUBY_VERSION"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!version.is_empty()).then_some(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn gate(running: Option<&str>) -> CompatibilityGate {
        CompatibilityGate::new(
            &RuntimeConfig::default(),
            &LayoutConfig::default(),
            running.map(ToString::to_string),
        )
    }

    fn artifact(version_rb: &str) -> assert_fs::TempDir {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("lib/version.rb").write_str(version_rb).unwrap();
        temp
    }

    #[test]
    fn missing_version_file_is_compatible() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert_eq!(gate(Some("2.6.0")).check(temp.path()).unwrap(), Compatibility::Undeclared);
    }

    #[test]
    fn missing_requirement_line_is_compatible() {
        let temp = artifact("LICH_VERSION = '5.15.0'\n");
        assert_eq!(gate(Some("2.6.0")).check(temp.path()).unwrap(), Compatibility::Undeclared);
    }

    #[test]
    fn newer_runtime_satisfies_requirement() {
        let temp = artifact("  REQUIRED_RUBY = '3.2.0'\n");
        assert_eq!(
            gate(Some("3.3.1")).check(temp.path()).unwrap(),
            Compatibility::Satisfied {
                required: "3.2.0".to_string(),
                running: "3.3.1".to_string()
            }
        );
    }

    #[test]
    fn older_runtime_is_blocked_with_both_versions() {
        let temp = artifact("REQUIRED_RUBY = \"3.2.0\"\n");
        let err = gate(Some("2.6.0")).check(temp.path()).unwrap_err();
        let kind = err.downcast_ref::<UpdateError>().unwrap();
        assert!(matches!(kind, UpdateError::CompatibilityBlocked { .. }));
        assert_eq!(
            kind.to_string(),
            "update requires Ruby 3.2.0, but Ruby 2.6.0 is installed"
        );
    }

    #[test]
    fn unknown_runtime_is_unverified_not_blocked() {
        let temp = artifact("REQUIRED_RUBY = '3.2.0'\n");
        assert_eq!(
            gate(None).check(temp.path()).unwrap(),
            Compatibility::Unverified {
                required: "3.2.0".to_string()
            }
        );
    }

    #[test]
    fn configured_version_skips_probe() {
        let runtime = RuntimeConfig {
            version: Some("3.4.0".to_string()),
            interpreter: "definitely-not-a-ruby-binary".to_string(),
            ..RuntimeConfig::default()
        };
        let gate = CompatibilityGate::detect(&runtime, &LayoutConfig::default());
        assert_eq!(gate.running.as_deref(), Some("3.4.0"));
    }

    #[test]
    fn absent_interpreter_probes_to_none() {
        assert_eq!(probe_runtime("definitely-not-a-ruby-binary"), None);
    }
}
