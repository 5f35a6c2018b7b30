//! Solution Model (C3): typed schema for the JSONC solution file (`spec.md` §6) plus a
//! read-only query surface over one loaded solution.

use crate::errors::{AutoForgeError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequiredTool {
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,
    pub architecture: String,
    pub required_tools: IndexMap<String, RequiredTool>,
    pub build_system: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub name: String,
    pub build_path: String,
    #[serde(default)]
    pub execute_from: Option<String>,
    #[serde(default)]
    pub compiler_options: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub pre_build_steps: IndexMap<String, String>,
    #[serde(default)]
    pub post_build_steps: IndexMap<String, String>,
    #[serde(default)]
    pub clean: Option<String>,
    #[serde(default)]
    pub board: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub tool_chain: Toolchain,
    pub configurations: Vec<Configuration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionDef {
    pub name: String,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariableDef {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_path: Option<bool>,
    #[serde(default)]
    pub path_must_exist: Option<bool>,
    #[serde(default)]
    pub create_path_if_not_exist: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub path_must_exist: Option<bool>,
    #[serde(default)]
    pub create_path_if_not_exist: Option<bool>,
}

/// Top-level shape of a solution file, as parsed by the Config Preprocessor (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionFile {
    pub solutions: Vec<SolutionDef>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub defaults: Option<Defaults>,
    #[serde(default)]
    pub auto_prefix: Option<bool>,
    #[serde(default)]
    pub force_upper_case_names: Option<bool>,
}

impl SolutionFile {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| AutoForgeError::ParseError {
            line: 0,
            message: e.to_string(),
            context: String::new(),
        })
    }
}

/// Result of [`SolutionModel::query_configurations`].
pub enum ConfigQuery {
    Single(Configuration),
    List(Vec<Configuration>),
}

/// Result of [`SolutionModel::get_loaded_solution`].
pub enum SolutionView<'a> {
    Full(&'a SolutionDef),
    Name(&'a str),
}

/// Read-only query surface over one loaded solution. Never mutates after construction.
pub struct SolutionModel {
    solution: SolutionDef,
}

impl SolutionModel {
    /// Select a solution by name from a parsed file, or the first one if `name` is
    /// `None`. Fails with [`AutoForgeError::UnknownProject`] if `name` doesn't match
    /// any declared solution (there being no dedicated "unknown solution" variant in
    /// the error taxonomy, a solution name miss is reported the same way a project
    /// name miss is: both are "I asked for a name that isn't in this tree").
    pub fn select(file: &SolutionFile, name: Option<&str>) -> Result<Self> {
        let solution = match name {
            Some(n) => file
                .solutions
                .iter()
                .find(|s| s.name == n)
                .cloned()
                .ok_or_else(|| AutoForgeError::UnknownProject { name: n.to_string() })?,
            None => file
                .solutions
                .first()
                .cloned()
                .ok_or_else(|| AutoForgeError::UnknownProject {
                    name: "<none declared>".to_string(),
                })?,
        };
        Ok(Self { solution })
    }

    pub fn get_loaded_solution(&self, name_only: bool) -> SolutionView<'_> {
        if name_only {
            SolutionView::Name(&self.solution.name)
        } else {
            SolutionView::Full(&self.solution)
        }
    }

    /// Projects in declaration order.
    pub fn query_projects(&self) -> &[Project] {
        &self.solution.projects
    }

    fn find_project(&self, project_name: &str) -> Result<&Project> {
        self.solution
            .projects
            .iter()
            .find(|p| p.name == project_name)
            .ok_or_else(|| AutoForgeError::UnknownProject {
                name: project_name.to_string(),
            })
    }

    pub fn query_configurations(
        &self,
        project_name: &str,
        configuration_name: Option<&str>,
    ) -> Result<ConfigQuery> {
        let project = self.find_project(project_name)?;
        match configuration_name {
            Some(name) => project
                .configurations
                .iter()
                .find(|c| c.name == name)
                .cloned()
                .map(ConfigQuery::Single)
                .ok_or_else(|| AutoForgeError::UnknownConfiguration {
                    project: project_name.to_string(),
                    configuration: name.to_string(),
                }),
            None => Ok(ConfigQuery::List(project.configurations.clone())),
        }
    }

    pub fn get_configurations_list(&self, project_name: &str) -> Result<Vec<String>> {
        let project = self.find_project(project_name)?;
        Ok(project.configurations.iter().map(|c| c.name.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SolutionFile {
        let json = serde_json::json!({
            "solutions": [{
                "name": "demo",
                "projects": [{
                    "name": "zephyr",
                    "tool_chain": {
                        "name": "arm-gcc",
                        "architecture": "arm",
                        "required_tools": {
                            "cmake": { "version": ">=3.20" },
                            "ninja": { "version": ">=1.10" }
                        },
                        "build_system": "cmake"
                    },
                    "configurations": [{
                        "name": "debug",
                        "build_path": "build",
                        "compiler_options": ["-S", ".", "-B", "build", "-G", "Ninja"],
                        "artifacts": ["build/zephyr.elf"]
                    }]
                }]
            }],
            "variables": []
        });
        SolutionFile::from_value(json).unwrap()
    }

    #[test]
    fn selects_first_solution_by_default() {
        let file = sample();
        let model = SolutionModel::select(&file, None).unwrap();
        match model.get_loaded_solution(true) {
            SolutionView::Name(n) => assert_eq!(n, "demo"),
            _ => panic!("expected name view"),
        }
    }

    #[test]
    fn query_single_configuration() {
        let file = sample();
        let model = SolutionModel::select(&file, None).unwrap();
        match model.query_configurations("zephyr", Some("debug")).unwrap() {
            ConfigQuery::Single(cfg) => assert_eq!(cfg.build_path, "build"),
            _ => panic!("expected single"),
        }
    }

    #[test]
    fn unknown_project_errors() {
        let file = sample();
        let model = SolutionModel::select(&file, None).unwrap();
        assert!(matches!(
            model.query_configurations("missing", None),
            Err(AutoForgeError::UnknownProject { .. })
        ));
    }

    #[test]
    fn unknown_configuration_errors() {
        let file = sample();
        let model = SolutionModel::select(&file, None).unwrap();
        assert!(matches!(
            model.query_configurations("zephyr", Some("missing")),
            Err(AutoForgeError::UnknownConfiguration { .. })
        ));
    }

    #[test]
    fn configurations_list_is_ordered() {
        let file = sample();
        let model = SolutionModel::select(&file, None).unwrap();
        assert_eq!(
            model.get_configurations_list("zephyr").unwrap(),
            vec!["debug".to_string()]
        );
    }
}
