//! Loading suite documents from YAML or JSON files.

use crate::model::{Environment, SuiteCase, TestCase, TestSuite};
use crate::runner::EnvironmentOverrides;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A suite document as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteDocument {
    pub name: String,
    /// Name of the default environment. May be omitted when exactly one
    /// environment is defined.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub environments: HashMap<String, Environment>,
    #[serde(default)]
    pub cases: Vec<SuiteCaseDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteCaseDocument {
    #[serde(flatten)]
    pub case: TestCase,
    #[serde(default)]
    pub order: i64,
    /// Environment name pinned on this entry.
    #[serde(default)]
    pub environment: Option<String>,
}

/// A suite with its environments resolved.
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    pub suite: TestSuite,
    pub default_environment: Environment,
    pub environments: HashMap<String, Environment>,
}

impl SuiteDocument {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid suite YAML")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid suite JSON")
    }

    /// Resolve environment names into environments.
    pub fn resolve(self) -> Result<LoadedSuite> {
        let environments: HashMap<String, Environment> = self
            .environments
            .into_iter()
            .map(|(name, mut env)| {
                env.name.get_or_insert_with(|| name.clone());
                (name, env)
            })
            .collect();

        let default_environment = match &self.environment {
            Some(name) => environments.get(name).cloned().ok_or_else(|| {
                anyhow!(
                    "Suite '{}' uses undefined default environment '{}'",
                    self.name,
                    name
                )
            })?,
            None if environments.len() == 1 => environments
                .values()
                .next()
                .cloned()
                .ok_or_else(|| anyhow!("Suite '{}' has no environment", self.name))?,
            None => {
                return Err(anyhow!(
                    "Suite '{}' must name its default environment ({} defined)",
                    self.name,
                    environments.len()
                ))
            }
        };

        let mut suite = TestSuite::new(&self.name);
        for entry in self.cases {
            let environment = match &entry.environment {
                Some(name) => Some(
                    environments.get(name).cloned().ok_or_else(|| {
                        anyhow!(
                            "Case '{}' in suite '{}' uses undefined environment '{}'",
                            entry.case.label(),
                            self.name,
                            name
                        )
                    })?,
                ),
                None => None,
            };
            suite.cases.push(SuiteCase {
                case: entry.case,
                order: entry.order,
                environment,
            });
        }

        Ok(LoadedSuite {
            suite,
            default_environment,
            environments,
        })
    }
}

impl LoadedSuite {
    /// Swap the default environment for another defined one.
    pub fn use_default_environment(&mut self, name: &str) -> Result<()> {
        let environment = self.environments.get(name).ok_or_else(|| {
            anyhow!(
                "Environment '{}' is not defined in suite '{}'",
                name,
                self.suite.name
            )
        })?;
        self.default_environment = environment.clone();
        Ok(())
    }

    /// Turn `(case id, environment name)` pairs into overrides. Unknown
    /// names are logged and skipped so those cases keep their default.
    pub fn resolve_overrides(
        &self,
        requested: &[(u64, String)],
    ) -> EnvironmentOverrides {
        requested
            .iter()
            .filter_map(|(case_id, name)| match self.environments.get(name) {
                Some(env) => Some((*case_id, env.clone())),
                None => {
                    warn!(
                        "Ignoring override for case {}: environment '{}' is not defined in suite '{}'",
                        case_id, name, self.suite.name
                    );
                    None
                }
            })
            .collect()
    }
}

/// Finds and loads suite documents.
#[derive(Debug)]
pub struct SuiteLoader {
    pub search_paths: Vec<PathBuf>,
}

impl SuiteLoader {
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from("tests/suites")],
        }
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Load a single suite file. `.json` files are read as JSON and
    /// everything else as YAML.
    pub fn load_suite<P: AsRef<Path>>(&self, path: P) -> Result<LoadedSuite> {
        let path = path.as_ref();
        info!("Loading test suite from {}", path.display());

        let content = fs::read_to_string(path).context(format!(
            "Failed to read suite file: {}",
            path.display()
        ))?;

        let document = if path.extension().is_some_and(|ext| ext == "json") {
            SuiteDocument::from_json(&content)
        } else {
            SuiteDocument::from_yaml(&content)
        }
        .context(format!("Failed to parse suite from {}", path.display()))?;

        let loaded = document
            .resolve()
            .context(format!("Invalid suite in {}", path.display()))?;

        debug!(
            "Successfully loaded test suite: {} ({} cases)",
            loaded.suite.name,
            loaded.suite.cases.len()
        );
        Ok(loaded)
    }

    /// Load every suite file in `dir`. Files that fail to load are
    /// logged and skipped.
    pub fn load_suites_from_dir<P: AsRef<Path>>(
        &self,
        dir: P,
    ) -> Result<Vec<LoadedSuite>> {
        let dir = dir.as_ref();
        info!("Loading test suites from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).context(format!(
            "Failed to read directory: {}",
            dir.display()
        ))? {
            let path = entry?.path();
            if path.is_file() && is_suite_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut suites = Vec::new();
        for path in paths {
            match self.load_suite(&path) {
                Ok(suite) => suites.push(suite),
                Err(err) => {
                    warn!(
                        "Failed to load suite from {}: {:#}",
                        path.display(),
                        err
                    );
                }
            }
        }

        info!("Loaded {} test suites from {}", suites.len(), dir.display());
        Ok(suites)
    }

    /// Load suites from every existing search directory.
    pub fn load_all_suites(&self) -> Result<Vec<LoadedSuite>> {
        let mut all_suites = Vec::new();

        for path in &self.search_paths {
            if path.is_dir() {
                all_suites.extend(self.load_suites_from_dir(path)?);
            }
        }

        info!("Loaded {} test suites in total", all_suites.len());
        Ok(all_suites)
    }
}

impl Default for SuiteLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_suite_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMethod, ValidationRule};
    use serde_json::json;

    const FLOW_YAML: &str = r#"
name: user flow
environment: staging
environments:
  staging:
    id: 1
    base_url: http://localhost:8000
    variables:
      user: alice
  prod:
    id: 2
    base_url: https://api.example.com
cases:
  - id: 2
    name: read
    order: 1
    method: GET
    url: /items/${token}
    validation_rules:
      - contains: [content, abc]
  - id: 1
    name: login
    order: 0
    environment: prod
    method: POST
    url: /login
    body: {user: "${user}"}
    extract_params:
      - {name: token, path: $.token}
"#;

    fn tempdir_with_files(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn test_suite_file_detection() {
        assert!(is_suite_file(Path::new("a.yaml")));
        assert!(is_suite_file(Path::new("dir/b.yml")));
        assert!(is_suite_file(Path::new("c.json")));
        assert!(!is_suite_file(Path::new("readme.md")));
        assert!(!is_suite_file(Path::new("no_ext")));
    }

    #[test]
    fn test_resolve_yaml_document() {
        let loaded = SuiteDocument::from_yaml(FLOW_YAML)
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(loaded.suite.name, "user flow");
        assert_eq!(loaded.default_environment.id, Some(1));
        assert_eq!(
            loaded.default_environment.name.as_deref(),
            Some("staging")
        );
        assert_eq!(loaded.default_environment.variables["user"], json!("alice"));

        let ordered = loaded.suite.ordered_cases();
        assert_eq!(ordered[0].case.name, "login");
        assert_eq!(ordered[0].case.method, HttpMethod::Post);
        assert_eq!(
            ordered[0].environment.as_ref().and_then(|e| e.id),
            Some(2)
        );
        assert_eq!(ordered[0].case.extract_params[0].path, "$.token");
        assert!(ordered[1].environment.is_none());
        assert_eq!(
            ordered[1].case.validation_rules,
            vec![ValidationRule::contains("content", "abc")]
        );
    }

    #[test]
    fn test_undefined_case_environment_is_an_error() {
        let yaml = r#"
name: broken
environment: dev
environments:
  dev: {base_url: "http://x"}
cases:
  - {name: a, method: GET, url: /, environment: nowhere}
"#;
        let err = SuiteDocument::from_yaml(yaml)
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_default_environment_rules() {
        let single = r#"{
            "name": "single",
            "environments": {"only": {"base_url": "http://x"}},
            "cases": []
        }"#;
        let loaded = SuiteDocument::from_json(single).unwrap().resolve().unwrap();
        assert_eq!(loaded.default_environment.base_url, "http://x");

        let ambiguous = r#"{
            "name": "ambiguous",
            "environments": {
                "a": {"base_url": "http://a"},
                "b": {"base_url": "http://b"}
            }
        }"#;
        assert!(SuiteDocument::from_json(ambiguous)
            .unwrap()
            .resolve()
            .is_err());
    }

    #[test]
    fn test_overrides_skip_unknown_environments() {
        let mut loaded = SuiteDocument::from_yaml(FLOW_YAML)
            .unwrap()
            .resolve()
            .unwrap();

        let overrides = loaded.resolve_overrides(&[
            (2, "prod".to_string()),
            (1, "missing".to_string()),
        ]);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[&2].id, Some(2));

        loaded.use_default_environment("prod").unwrap();
        assert_eq!(loaded.default_environment.id, Some(2));
        assert!(loaded.use_default_environment("missing").is_err());
    }

    #[test]
    fn test_load_from_dir_with_mixed_formats() {
        let dir = tempdir_with_files(&[
            ("a.yaml", FLOW_YAML),
            (
                "b.json",
                r#"{"name": "json suite", "environments": {"e": {"base_url": "http://x"}}}"#,
            ),
            ("c.yml", "name: [not, a, suite"),
            ("d.md", "# notes\n"),
        ]);

        let loader = SuiteLoader::new();
        let suites = loader.load_suites_from_dir(dir.path()).unwrap();

        let names: Vec<&str> =
            suites.iter().map(|s| s.suite.name.as_str()).collect();
        assert_eq!(names, vec!["user flow", "json suite"]);
    }

    #[test]
    fn test_load_all_skips_missing_dirs() {
        let dir = tempdir_with_files(&[("a.yaml", FLOW_YAML)]);
        let mut loader = SuiteLoader::new();
        loader.add_path(dir.path()).add_path(dir.path().join("absent"));

        let suites = loader.load_all_suites().unwrap();
        assert_eq!(suites.len(), 1);
    }
}
