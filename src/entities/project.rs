//! The project: root container of patterns, types, and contexts.

use crate::attrs;
use crate::entities::node_type::NodeType;
use crate::entities::pattern::Pattern;
use crate::storage::{EntityCode, EntityRef, StorageAdapter, StorageResult};

/// A named set of environment presets injected into node executions.
///
/// The `value` is a multiline string of `KEY=value` lines; each node type
/// declares by name which context its nodes use.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    pub uuid: String,
    pub name: String,
    pub value: String,
}

impl Context {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Context, &self.uuid)
    }

    /// Parse the `KEY=value` lines, skipping lines without `=`.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.value.lines().filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
        })
    }

    pub async fn set_value(
        &mut self,
        store: &dyn StorageAdapter,
        value: impl Into<String>,
    ) -> StorageResult<()> {
        self.value = value.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "value" => self.value })
            .await
    }
}

/// A script run by the UI layer at a graph event (open, select, refresh,
/// toggle). The engine only stores it.
#[derive(Clone, Debug, PartialEq)]
pub struct Hud {
    pub uuid: String,
    pub name: String,
    pub script: String,
    pub event: String,
}

impl Hud {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            script: "return []".to_string(),
            event: "open".to_string(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Hud, &self.uuid)
    }
}

/// A project-level script applied to whole graphs in batch, filtered by
/// pattern and template visibility.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchScript {
    pub uuid: String,
    pub name: String,
    pub menu: String,
    /// Comma-separated users allowed to see the script, empty for all.
    pub users: String,
    pub script: String,
    /// Pattern name filter, empty for all patterns.
    pub pattern: String,
    /// Template name filter, empty for all templates.
    pub template: String,
}

impl BatchScript {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            menu: String::new(),
            users: String::new(),
            script: script.into(),
            pattern: String::new(),
            template: String::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::BatchScript, &self.uuid)
    }
}

/// Root container of one production.
///
/// Owns the graph classes ([`Pattern`]), node classes ([`NodeType`]),
/// environment presets ([`Context`]), the head script prepended to every
/// node execution, and the version-numbering policy shared by all nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub uuid: String,
    pub name: String,
    pub patterns: Vec<Pattern>,
    pub types: Vec<NodeType>,
    pub contexts: Vec<Context>,
    pub huds: Vec<Hud>,
    pub batch_scripts: Vec<BatchScript>,
    /// First layer of every compiled node script.
    pub script: String,
    /// Zero-padding width of node version numbers.
    pub versions_padding: usize,
    /// Id given to the first version of a new node.
    pub versions_start: i64,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            patterns: Vec::new(),
            types: Vec::new(),
            contexts: Vec::new(),
            huds: Vec::new(),
            batch_scripts: Vec::new(),
            script: String::new(),
            versions_padding: 3,
            versions_start: 1,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Project, &self.uuid)
    }

    pub fn pattern(&self, name: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeType> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn node_type_by_uuid(&self, uuid: &str) -> Option<&NodeType> {
        self.types.iter().find(|t| t.uuid == uuid)
    }

    /// Create the project and its whole hierarchy in the store.
    pub async fn create(&mut self, store: &dyn StorageAdapter) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                None,
                EntityCode::Project,
                attrs! {
                    "name" => self.name,
                    "script" => self.script,
                    "versions_padding" => self.versions_padding,
                    "versions_start" => self.versions_start,
                },
            )
            .await?;
        let project_ref = self.entity_ref();
        for pattern in &mut self.patterns {
            pattern.create(store, &project_ref).await?;
        }
        for ty in &mut self.types {
            ty.create(store, &project_ref).await?;
        }
        for context in &mut self.contexts {
            context.uuid = store
                .create_entity(
                    Some(&project_ref),
                    EntityCode::Context,
                    attrs! { "name" => context.name, "value" => context.value },
                )
                .await?;
        }
        for hud in &mut self.huds {
            hud.uuid = store
                .create_entity(
                    Some(&project_ref),
                    EntityCode::Hud,
                    attrs! { "name" => hud.name, "script" => hud.script, "event" => hud.event },
                )
                .await?;
        }
        for batch in &mut self.batch_scripts {
            batch.uuid = store
                .create_entity(
                    Some(&project_ref),
                    EntityCode::BatchScript,
                    attrs! {
                        "name" => batch.name,
                        "menu" => batch.menu,
                        "users" => batch.users,
                        "script" => batch.script,
                        "pattern" => batch.pattern,
                        "template" => batch.template,
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub async fn set_name(
        &mut self,
        store: &dyn StorageAdapter,
        name: impl Into<String>,
    ) -> StorageResult<()> {
        self.name = name.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "name" => self.name })
            .await
    }

    pub async fn set_script(
        &mut self,
        store: &dyn StorageAdapter,
        script: impl Into<String>,
    ) -> StorageResult<()> {
        self.script = script.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "script" => self.script })
            .await
    }

    pub async fn set_versions_padding(
        &mut self,
        store: &dyn StorageAdapter,
        padding: usize,
    ) -> StorageResult<()> {
        self.versions_padding = padding;
        store
            .set_attrs(&self.entity_ref(), attrs! { "versions_padding" => padding })
            .await
    }

    pub async fn set_versions_start(
        &mut self,
        store: &dyn StorageAdapter,
        start: i64,
    ) -> StorageResult<()> {
        self.versions_start = start;
        store
            .set_attrs(&self.entity_ref(), attrs! { "versions_start" => start })
            .await
    }

    /// Delete the project and its whole hierarchy from the store.
    pub async fn delete(&self, store: &dyn StorageAdapter) -> StorageResult<()> {
        store.delete_entity(&self.entity_ref()).await
    }
}
