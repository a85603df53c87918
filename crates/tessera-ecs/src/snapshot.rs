//! Entity export and import.
//!
//! [`World::save_entities`] turns every registered entity into an
//! [`EntityExport`]: class name, handle, tags and the JSON form of every
//! component. [`World::load_entities`] replaces the world's entities with the
//! ones described by a list of exports, looking each class name up in an
//! explicit [`ClassRegistry`].
//!
//! The export is opaque to the core: component data is whatever serde makes of
//! the component type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::world::{World, DEFAULT_CLASS};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Export types
// ---------------------------------------------------------------------------

/// Serialized form of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentExport {
    /// Registered component name.
    pub class_name: String,
    pub id: u64,
    pub created: f64,
    pub data: serde_json::Value,
}

/// Serialized form of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityExport {
    pub class_name: String,
    /// Entity index.
    pub id: u32,
    /// Entity generation.
    pub version: u32,
    pub created: f64,
    pub tags: Vec<String>,
    pub components: Vec<ComponentExport>,
}

// ---------------------------------------------------------------------------
// ClassRegistry
// ---------------------------------------------------------------------------

/// Rebuilds one exported entity inside a world.
pub type FromJson = fn(&mut World, &EntityExport) -> Result<EntityId, EcsError>;

/// Maps exported class names to the functions that rebuild them.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<&'static str, FromJson>,
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.names())
            .finish()
    }
}

impl ClassRegistry {
    /// An empty registry. Even the default class must be registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows the default `"Entity"` class.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_CLASS, |world, export| {
            spawn_from_export(world, DEFAULT_CLASS, export)
        });
        registry
    }

    /// Register or replace the rebuild function for `class`.
    pub fn register(&mut self, class: &'static str, from_json: FromJson) -> &mut Self {
        self.classes.insert(class, from_json);
        self
    }

    pub fn get(&self, class: &str) -> Option<FromJson> {
        self.classes.get(class).copied()
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.classes.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Rebuild an exported entity as a fresh entity of `class`: tags and
/// components by name, registered through the deferred path.
///
/// Custom [`FromJson`] functions can call this and then adjust the result.
pub fn spawn_from_export(
    world: &mut World,
    class: &'static str,
    export: &EntityExport,
) -> Result<EntityId, EcsError> {
    let entity = world.spawn_as(class);
    for tag in &export.tags {
        world.add_tag(entity, tag)?;
    }
    for component in &export.components {
        world.add_component_json(entity, &component.class_name, &component.data)?;
    }
    Ok(entity)
}

// ---------------------------------------------------------------------------
// World export/import impl
// ---------------------------------------------------------------------------

impl World {
    /// Export every registered entity, in active-list order.
    pub fn save_entities(&self) -> Result<Vec<EntityExport>, EcsError> {
        let mut exports = Vec::with_capacity(self.store.active.len());
        for entity in self.store.active.iter() {
            let Some(record) = self.store.record(entity) else {
                continue;
            };
            let mut components = Vec::new();
            for type_index in 0..self.store.storages.len() {
                let type_id = ComponentTypeId(type_index as u32);
                let storage = self.store.erased(type_id);
                let (Some(meta), Some(data)) =
                    (storage.meta(entity.index()), storage.to_json(entity.index()))
                else {
                    continue;
                };
                let name = self.store.registry.name(type_id);
                let data = data.map_err(|err| EcsError::ComponentSerialization {
                    component: name.to_owned(),
                    details: err.to_string(),
                })?;
                components.push(ComponentExport {
                    class_name: name.to_owned(),
                    id: meta.id.0,
                    created: meta.created,
                    data,
                });
            }
            exports.push(EntityExport {
                class_name: record.class.to_owned(),
                id: entity.index(),
                version: entity.generation(),
                created: record.created,
                tags: record
                    .tags
                    .iter()
                    .map(|&tag| self.store.tags.name(tag).to_owned())
                    .collect(),
                components,
            });
        }
        Ok(exports)
    }

    /// Replace every entity with the ones described by `exports`.
    ///
    /// The exports are validated first; on error the world is untouched.
    /// Current entities are then destroyed immediately (queries drop them at
    /// the next flush) and each export is rebuilt by its class's
    /// [`FromJson`]. Returns the new handles in input order.
    pub fn load_entities(
        &mut self,
        exports: &[EntityExport],
        classes: &ClassRegistry,
    ) -> Result<Vec<EntityId>, EcsError> {
        let mut builders = Vec::with_capacity(exports.len());
        for export in exports {
            let from_json = classes
                .get(&export.class_name)
                .ok_or_else(|| EcsError::UnknownClass {
                    name: export.class_name.clone(),
                    registered: classes.names().join(", "),
                })?;
            self.validate_export(export)?;
            builders.push(from_json);
        }

        let current: Vec<EntityId> = self
            .store
            .records
            .iter()
            .flatten()
            .filter(|record| !record.in_pool)
            .map(|record| record.id)
            .collect();
        for entity in current {
            self.destroy_entity_immediate(entity)?;
        }

        let mut loaded = Vec::with_capacity(exports.len());
        for (export, from_json) in exports.iter().zip(builders) {
            match from_json(self, export) {
                Ok(entity) => loaded.push(entity),
                Err(err) => {
                    warn!(
                        class = %export.class_name,
                        id = export.id,
                        error = %err,
                        "failed to rebuild exported entity after validation"
                    );
                    return Err(err);
                }
            }
        }
        Ok(loaded)
    }

    fn validate_export(&self, export: &EntityExport) -> Result<(), EcsError> {
        for component in &export.components {
            let type_id = self
                .store
                .registry
                .lookup_by_name(&component.class_name)
                .ok_or_else(|| EcsError::UnknownComponent {
                    name: component.class_name.clone(),
                    registered: self.store.registry.registered_names().join(", "),
                })?;
            self.store
                .erased(type_id)
                .validate_json(&component.data)
                .map_err(|err| EcsError::ComponentDeserialization {
                    component: component.class_name.clone(),
                    details: err.to_string(),
                })?;
        }
        Ok(())
    }

    /// BLAKE3 hex digest of the JSON export.
    pub fn state_hash(&self) -> Result<String, EcsError> {
        let exports = self.save_entities()?;
        let bytes = serde_json::to_vec(&exports).map_err(|err| EcsError::ComponentSerialization {
            component: "<export>".to_owned(),
            details: err.to_string(),
        })?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    fn world() -> World {
        let mut world = World::new();
        world.register_component::<Position>("position");
        world
    }

    #[test]
    fn export_uses_camel_case_keys() {
        let mut world = world();
        let entity = world.spawn_immediate();
        world
            .add_component_immediate(entity, Position { x: 1.0, y: 2.0 })
            .unwrap();
        world.add_tag_immediate(entity, "player").unwrap();

        let json = serde_json::to_value(world.save_entities().unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["className"], "Entity");
        assert_eq!(first["tags"], serde_json::json!(["player"]));
        assert_eq!(first["components"][0]["className"], "position");
        assert_eq!(
            first["components"][0]["data"],
            serde_json::json!({ "x": 1.0, "y": 2.0 })
        );
    }

    #[test]
    fn unknown_class_leaves_world_untouched() {
        let mut world = world();
        let keep = world.spawn_immediate();
        let exports = vec![EntityExport {
            class_name: "Ghost".to_owned(),
            id: 0,
            version: 0,
            created: 0.0,
            tags: Vec::new(),
            components: Vec::new(),
        }];

        let err = world
            .load_entities(&exports, &ClassRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, EcsError::UnknownClass { ref name, .. } if name == "Ghost"));
        assert!(world.is_alive(keep));
    }

    #[test]
    fn bad_component_data_is_rejected_before_destroying() {
        let mut world = world();
        let keep = world.spawn_immediate();
        let exports = vec![EntityExport {
            class_name: "Entity".to_owned(),
            id: 0,
            version: 0,
            created: 0.0,
            tags: Vec::new(),
            components: vec![ComponentExport {
                class_name: "position".to_owned(),
                id: 0,
                created: 0.0,
                data: serde_json::json!("nowhere"),
            }],
        }];

        let err = world
            .load_entities(&exports, &ClassRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, EcsError::ComponentDeserialization { .. }));
        assert!(world.is_alive(keep));
    }

    #[test]
    fn class_registry_lists_sorted_names() {
        let mut classes = ClassRegistry::with_defaults();
        classes.register("Bullet", |world, export| {
            spawn_from_export(world, "Bullet", export)
        });
        assert_eq!(classes.names(), vec!["Bullet", "Entity"]);
        assert!(classes.get("Bullet").is_some());
        assert!(ClassRegistry::new().get("Entity").is_none());
    }
}
