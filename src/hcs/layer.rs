//! Copy-on-write layer types and the layer driver contract.

use std::path::{Path, PathBuf};

use super::NativeResult;

/// Base-image layer appended below the parent layer.
//
// TODO: discover ancestor layers from the layer store on disk instead of
// assuming a single fixed base image below the parent.
const BASE_IMAGE_LAYER_ID: &str =
    "c98833436817d72e5a11b062890502b31fd5cfcb7b5b5047bcf8cc430d7a2166";

/// Driver working context: the directory that holds all layers.
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub home_dir: PathBuf,
}

impl DriverInfo {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
        }
    }
}

/// Driver-facing record for one layer in a CoW chain.
///
/// Ancestor descriptors are ordered nearest-parent first; the driver relies
/// on that order for fallthrough resolution, so it is never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub id: String,
    pub path: PathBuf,
    pub dirty: bool,
}

/// One filesystem layer under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayer {
    name: String,
    base_path: PathBuf,
}

impl ContainerLayer {
    pub fn new(base_path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
        }
    }

    /// Create the writable leaf layer for one run, with a unique name.
    pub fn generate(base_path: impl Into<PathBuf>) -> Self {
        let name = format!("nspawn-{}", uuid::Uuid::new_v4().as_simple());
        Self::new(base_path, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn path(&self) -> PathBuf {
        self.base_path.join(&self.name)
    }

    pub fn descriptor(&self) -> LayerDescriptor {
        LayerDescriptor {
            id: self.name.clone(),
            path: self.path(),
            dirty: false,
        }
    }
}

/// Resolve the read-only ancestor chain for a new leaf layer.
///
/// Stub collaborator: the parent layer followed by the fixed base image.
pub fn collect_ancestor_layers(base_path: &Path, parent_layer_name: &str) -> Vec<ContainerLayer> {
    vec![
        ContainerLayer::new(base_path, parent_layer_name),
        ContainerLayer::new(base_path, BASE_IMAGE_LAYER_ID),
    ]
}

/// Synchronous layer driver contract.
///
/// Every call reports a native status code; zero is success. The acquisition
/// half (`create` through `layer_mount_path`) is fatal on failure, the
/// teardown half is invoked best-effort.
#[cfg_attr(test, mockall::automock)]
pub trait LayerDriver {
    fn create_layer(
        &self,
        info: &DriverInfo,
        name: &str,
        parent_name: &str,
        ancestors: &[LayerDescriptor],
    ) -> NativeResult;

    fn activate_layer(&self, info: &DriverInfo, name: &str) -> NativeResult;

    fn prepare_layer(
        &self,
        info: &DriverInfo,
        name: &str,
        ancestors: &[LayerDescriptor],
    ) -> NativeResult;

    /// Mount point of a prepared layer's volume.
    fn layer_mount_path(&self, info: &DriverInfo, name: &str) -> NativeResult<String>;

    fn unprepare_layer(&self, info: &DriverInfo, name: &str) -> NativeResult;

    fn deactivate_layer(&self, info: &DriverInfo, name: &str) -> NativeResult;

    fn destroy_layer(&self, info: &DriverInfo, name: &str) -> NativeResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_layer_names_are_unique() {
        let a = ContainerLayer::generate("/layers");
        let b = ContainerLayer::generate("/layers");
        assert!(a.name().starts_with("nspawn-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_descriptor_points_under_base_path() {
        let layer = ContainerLayer::new("/layers", "leaf");
        let desc = layer.descriptor();
        assert_eq!(desc.id, "leaf");
        assert_eq!(desc.path, PathBuf::from("/layers/leaf"));
        assert!(!desc.dirty);
    }

    #[test]
    fn test_ancestors_keep_parent_first() {
        let ancestors = collect_ancestor_layers(Path::new("/layers"), "base");
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].name(), "base");
        assert_eq!(ancestors[1].name(), BASE_IMAGE_LAYER_ID);
    }
}
