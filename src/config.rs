//! Run configuration and the JSON documents handed to the compute engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hcs::ContainerLayer;
use crate::{Error, Result};

const OWNER: &str = "hcs-nspawn";

fn default_stdout_filename() -> String {
    "nspawn-stdout.txt".to_string()
}

/// Input configuration for one container run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NspawnConfig {
    /// Executable to launch inside the container.
    pub process_executable: String,
    /// Working directory of the process inside the container.
    #[serde(default)]
    pub process_directory: String,
    /// Host directory mapped into the container.
    pub mapped_directory: String,
    /// Directory of the parent layer; its parent is the layer store.
    pub parent_layer_directory: String,
    /// File (under the mapped directory) the process stdout is redirected to.
    #[serde(default = "default_stdout_filename")]
    pub stdout_filename: String,
}

impl NspawnConfig {
    pub fn builder() -> NspawnConfigBuilder {
        NspawnConfigBuilder::default()
    }

    /// Decode from the process-boundary JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.process_executable.is_empty() {
            return Err(Error::InvalidArgument(
                "process_executable cannot be empty".into(),
            ));
        }
        if self.mapped_directory.is_empty() {
            return Err(Error::InvalidArgument(
                "mapped_directory cannot be empty".into(),
            ));
        }
        if self.parent_layer_directory.is_empty() {
            return Err(Error::InvalidArgument(
                "parent_layer_directory cannot be empty".into(),
            ));
        }
        self.parent_layer_split().map(|_| ())
    }

    /// Split the parent layer directory into the layer store path and the
    /// parent layer name.
    pub fn parent_layer_split(&self) -> Result<(PathBuf, String)> {
        let path = Path::new(&self.parent_layer_directory);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "parent_layer_directory has no layer name: [{}]",
                    self.parent_layer_directory
                ))
            })?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "parent_layer_directory has no base path: [{}]",
                    self.parent_layer_directory
                ))
            })?;
        Ok((base.to_path_buf(), name))
    }

    /// Container document submitted to `create_system`.
    ///
    /// Owns clones of the leaf and ancestor layers so the document and the
    /// orchestrator can evolve independently past this point.
    pub fn container_document(
        &self,
        base_path: &Path,
        volume_path: &str,
        layer: ContainerLayer,
        ancestors: Vec<ContainerLayer>,
    ) -> serde_json::Value {
        let token = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        serde_json::json!({
            "SystemType": "Container",
            "Name": layer.name(),
            "Owner": OWNER,
            "IsDummy": false,
            "VolumePath": volume_path,
            "IgnoreFlushesDuringBoot": true,
            "LayerFolderPath": layer.path().to_string_lossy(),
            "Layers": ancestors.iter().map(|la| {
                serde_json::json!({
                    "ID": la.name(),
                    "Path": la.path().to_string_lossy(),
                })
            }).collect::<Vec<_>>(),
            "MappedDirectories": [{
                "HostPath": self.mapped_directory,
                "ContainerPath": self.process_directory,
                "ReadOnly": false,
            }],
            "HostName": token,
            "BasePath": base_path.to_string_lossy(),
        })
    }

    /// Process document submitted to `create_process`.
    pub fn process_document(&self) -> serde_json::Value {
        serde_json::json!({
            "CommandLine": self.process_executable,
            "WorkingDirectory": self.process_directory,
            "CreateStdInPipe": false,
            "CreateStdOutPipe": false,
            "CreateStdErrPipe": false,
            "StdOutFileName": format!("{}/{}", self.mapped_directory, self.stdout_filename),
        })
    }
}

#[derive(Default)]
pub struct NspawnConfigBuilder {
    process_executable: String,
    process_directory: String,
    mapped_directory: String,
    parent_layer_directory: String,
    stdout_filename: Option<String>,
}

impl NspawnConfigBuilder {
    pub fn process_executable(mut self, exe: impl Into<String>) -> Self {
        self.process_executable = exe.into();
        self
    }

    pub fn process_directory(mut self, dir: impl Into<String>) -> Self {
        self.process_directory = dir.into();
        self
    }

    pub fn mapped_directory(mut self, dir: impl Into<String>) -> Self {
        self.mapped_directory = dir.into();
        self
    }

    pub fn parent_layer_directory(mut self, dir: impl Into<String>) -> Self {
        self.parent_layer_directory = dir.into();
        self
    }

    pub fn stdout_filename(mut self, name: impl Into<String>) -> Self {
        self.stdout_filename = Some(name.into());
        self
    }

    pub fn build(self) -> NspawnConfig {
        NspawnConfig {
            process_executable: self.process_executable,
            process_directory: self.process_directory,
            mapped_directory: self.mapped_directory,
            parent_layer_directory: self.parent_layer_directory,
            stdout_filename: self.stdout_filename.unwrap_or_else(default_stdout_filename),
        }
    }

    pub fn build_validated(self) -> Result<NspawnConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> NspawnConfig {
        NspawnConfig::builder()
            .process_executable("/bin/true")
            .process_directory("/work")
            .mapped_directory("/mnt/x")
            .parent_layer_directory("/layers/base")
            .build()
    }

    #[test]
    fn test_builder_defaults_stdout_filename() {
        let config = sample();
        assert_eq!(config.stdout_filename, "nspawn-stdout.txt");
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let config = NspawnConfig::builder().build();
        assert!(config.validate().is_err());

        let config = NspawnConfig::builder()
            .process_executable("/bin/true")
            .mapped_directory("/mnt/x")
            .parent_layer_directory("/")
            .build();
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_parent_layer_split() {
        let (base, name) = sample().parent_layer_split().unwrap();
        assert_eq!(base, PathBuf::from("/layers"));
        assert_eq!(name, "base");
    }

    #[test]
    fn test_from_json() {
        let config = NspawnConfig::from_json(
            r#"{
                "process_executable": "/bin/true",
                "process_directory": "/work",
                "mapped_directory": "/mnt/x",
                "parent_layer_directory": "/layers/base"
            }"#,
        )
        .unwrap();
        assert_eq!(config.process_executable, "/bin/true");
        assert_eq!(config.stdout_filename, "nspawn-stdout.txt");
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(NspawnConfig::from_json("{}").is_err());
        assert!(NspawnConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "process_executable": "/bin/true",
                "process_directory": "/work",
                "mapped_directory": "/mnt/x",
                "parent_layer_directory": "/layers/base",
                "stdout_filename": "out.txt"
            }}"#
        )
        .unwrap();

        let config = NspawnConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stdout_filename, "out.txt");
    }

    #[test]
    fn test_container_document_preserves_ancestor_order() {
        let config = sample();
        let layer = ContainerLayer::new("/layers", "leaf");
        let ancestors = vec![
            ContainerLayer::new("/layers", "base"),
            ContainerLayer::new("/layers", "image"),
        ];
        let doc = config.container_document(Path::new("/layers"), "/volumes/leaf", layer, ancestors);

        assert_eq!(doc["SystemType"], "Container");
        assert_eq!(doc["Name"], "leaf");
        assert_eq!(doc["VolumePath"], "/volumes/leaf");
        assert_eq!(doc["Layers"][0]["ID"], "base");
        assert_eq!(doc["Layers"][1]["ID"], "image");
        assert_eq!(doc["MappedDirectories"][0]["HostPath"], "/mnt/x");
        assert_eq!(doc["HostName"].as_str().unwrap().len(), 8);
    }

    #[test]
    fn test_process_document() {
        let doc = sample().process_document();
        assert_eq!(doc["CommandLine"], "/bin/true");
        assert_eq!(doc["WorkingDirectory"], "/work");
        assert_eq!(doc["StdOutFileName"], "/mnt/x/nspawn-stdout.txt");
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let json = serde_json::to_string(&sample()).unwrap();
        let decoded: NspawnConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.mapped_directory, "/mnt/x");
    }
}
