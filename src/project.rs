//! Project identity and on-disk project validation

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::protocol::BindRequest;

/// Validated identity of a project to bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    name: String,
    language: String,
    build_type: String,
    local_path: PathBuf,
}

impl ProjectIdentity {
    pub fn new(name: &str, language: &str, build_type: &str, local_path: &Path) -> Result<Self> {
        let name = name.trim();
        let language = language.trim();
        let build_type = build_type.trim();
        for (field, value) in [("name", name), ("language", language), ("type", build_type)] {
            if value.is_empty() {
                bail!("Project {} must not be empty", field);
            }
        }
        if !local_path.is_dir() {
            bail!("Project path is not a directory: {}", local_path.display());
        }
        Ok(Self {
            name: name.to_string(),
            language: language.to_string(),
            build_type: build_type.to_string(),
            local_path: local_path.to_path_buf(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn build_type(&self) -> &str {
        &self.build_type
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn bind_request(&self) -> BindRequest {
        BindRequest {
            language: self.language.clone(),
            project_type: self.build_type.clone(),
            name: self.name.clone(),
            path: self.local_path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectType {
    pub language: String,
    #[serde(rename = "projectType")]
    pub build_type: String,
}

/// Either the detected type or the reason detection failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidationResult {
    Detected(ProjectType),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub status: String,
    #[serde(rename = "projectPath")]
    pub path: String,
    pub result: ValidationResult,
}

fn project_type(language: &str, build_type: &str) -> ProjectType {
    ProjectType {
        language: language.to_string(),
        build_type: build_type.to_string(),
    }
}

/// Guess language and build type from well-known marker files
pub fn detect_project_type(root: &Path) -> ProjectType {
    let has = |name: &str| root.join(name).is_file();

    if has("pom.xml") {
        let pom = fs::read_to_string(root.join("pom.xml")).unwrap_or_default();
        return if pom.contains("spring-boot") {
            project_type("java", "spring")
        } else {
            project_type("java", "liberty")
        };
    }
    if has("package.json") {
        return project_type("nodejs", "nodejs");
    }
    if has("Package.swift") {
        return project_type("swift", "swift");
    }
    if has("go.mod") {
        return project_type("go", "docker");
    }
    if has("requirements.txt") || has("setup.py") {
        return project_type("python", "docker");
    }
    if has("Dockerfile") {
        return project_type("unknown", "docker");
    }
    project_type("unknown", "unknown")
}

pub const SETTINGS_FILE: &str = ".cw-settings";
const LEGACY_SETTINGS_FILE: &str = ".mc-settings";

/// Per-project build settings read by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub context_root: String,
    pub internal_port: String,
    pub health_check: String,
    pub is_https: bool,
    pub ignored_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maven_profiles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maven_properties: Option<Vec<String>>,
}

impl ProjectSettings {
    pub fn defaults_for(build_type: &str) -> Self {
        let maven = matches!(build_type, "liberty" | "spring").then(|| vec![String::new()]);
        Self {
            context_root: String::new(),
            internal_port: String::new(),
            health_check: String::new(),
            is_https: false,
            ignored_paths: vec![String::new()],
            maven_profiles: maven.clone(),
            maven_properties: maven,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFile {
    Existing,
    /// Legacy settings file moved to the current name
    Renamed,
    Created,
}

/// Make sure the project has a settings file, writing defaults if needed
pub fn ensure_settings_file(root: &Path, build_type: &str) -> Result<SettingsFile> {
    let current = root.join(SETTINGS_FILE);
    if current.exists() {
        return Ok(SettingsFile::Existing);
    }
    let legacy = root.join(LEGACY_SETTINGS_FILE);
    if legacy.is_file() {
        fs::rename(&legacy, &current)
            .with_context(|| format!("Failed to rename {}", legacy.display()))?;
        return Ok(SettingsFile::Renamed);
    }
    let mut data = serde_json::to_string_pretty(&ProjectSettings::defaults_for(build_type))?;
    data.push('\n');
    fs::write(&current, data).with_context(|| format!("Failed to write {}", current.display()))?;
    Ok(SettingsFile::Created)
}

/// Detect the project type and make sure a settings file exists
pub fn validate(root: &Path) -> ValidationResponse {
    let (status, result) = if root.is_dir() {
        let detected = detect_project_type(root);
        match ensure_settings_file(root, &detected.build_type) {
            Ok(_) => ("success", ValidationResult::Detected(detected)),
            Err(e) => ("failed", ValidationResult::Failed(format!("{:#}", e))),
        }
    } else {
        (
            "failed",
            ValidationResult::Failed(format!("project path not found: {}", root.display())),
        )
    };
    ValidationResponse {
        status: status.to_string(),
        path: root.to_string_lossy().into_owned(),
        result,
    }
}
