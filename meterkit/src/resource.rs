//! Static metadata stamped on every exported batch

use crate::types::{Dimension, DimensionPosition, Name};

/// Supplies the resource attributes for an exporting provider.
pub trait ResourceBuilder {
    /// Attributes describing the process, like its service name
    fn resource_attributes(&self) -> DimensionPosition;
}

impl ResourceBuilder for DimensionPosition {
    fn resource_attributes(&self) -> DimensionPosition {
        self.clone()
    }
}

/// Who is reporting: service name, namespace and deployment environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    namespace: String,
    environment: String,
}

impl ServiceIdentity {
    /// Describe a service
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            environment: environment.into(),
        }
    }
}

impl ResourceBuilder for ServiceIdentity {
    fn resource_attributes(&self) -> DimensionPosition {
        // The environment goes out under both its legacy and semantic-convention keys.
        [
            ("service.name", Dimension::from(self.name.clone())),
            ("service.namespace", Dimension::from(self.namespace.clone())),
            (
                "service.environment",
                Dimension::from(self.environment.clone()),
            ),
            (
                "deployment.environment",
                Dimension::from(self.environment.clone()),
            ),
            ("telemetry.sdk.language", Dimension::Str("rust")),
        ]
        .into_iter()
        .map(|(name, dimension)| (Name::Str(name), dimension))
        .collect()
    }
}
