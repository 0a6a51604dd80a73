use std::collections::HashMap;

use crate::metadata::model::{ObjectType, SystemKind};

/// Execution profile of one supported migration flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSpec {
    /// Whether data moves through a staging object that a cleanup vertex drops
    /// afterwards.
    pub uses_staging: bool,
    /// Whether transfers are followed by a verification phase.
    pub verification: bool,
}

/// Registration table mapping (source, destination, object type) to a flow.
///
/// Built once at startup; an unsupported combination is rejected at submission
/// time. Embedding applications extend the table through [`FlowRegistry::register`]
/// instead of subclassing job types.
#[derive(Debug, Clone)]
pub struct FlowRegistry {
    flows: HashMap<(SystemKind, SystemKind, ObjectType), FlowSpec>,
}

impl FlowRegistry {
    pub fn empty() -> Self {
        Self {
            flows: HashMap::new(),
        }
    }

    /// Creates the registry with the built-in flows.
    pub fn with_default_flows() -> Self {
        let mut registry = Self::empty();

        // Hive sources land directly in the warehouse and are verified there.
        registry.register_object_flows(
            SystemKind::Hive,
            SystemKind::Warehouse,
            FlowSpec {
                uses_staging: false,
                verification: true,
            },
        );
        // Warehouse exports to object storage go through a staging object that
        // must be cleaned up afterwards.
        registry.register_object_flows(
            SystemKind::Warehouse,
            SystemKind::ObjectStore,
            FlowSpec {
                uses_staging: true,
                verification: false,
            },
        );
        // Restores from object storage write the warehouse directly.
        registry.register_object_flows(
            SystemKind::ObjectStore,
            SystemKind::Warehouse,
            FlowSpec {
                uses_staging: false,
                verification: false,
            },
        );

        registry
    }

    /// Registers one flow.
    pub fn register(
        &mut self,
        source: SystemKind,
        dest: SystemKind,
        object_type: ObjectType,
        flow: FlowSpec,
    ) {
        self.flows.insert((source, dest, object_type), flow);
    }

    /// Registers a flow for catalog, table, and partition scopes at once.
    fn register_object_flows(&mut self, source: SystemKind, dest: SystemKind, flow: FlowSpec) {
        for object_type in [ObjectType::Catalog, ObjectType::Table, ObjectType::Partition] {
            self.register(source, dest, object_type, flow);
        }
    }

    pub fn get(
        &self,
        source: SystemKind,
        dest: SystemKind,
        object_type: ObjectType,
    ) -> Option<FlowSpec> {
        self.flows.get(&(source, dest, object_type)).copied()
    }

    pub fn supports(&self, source: SystemKind, dest: SystemKind, object_type: ObjectType) -> bool {
        self.flows.contains_key(&(source, dest, object_type))
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::with_default_flows()
    }
}
