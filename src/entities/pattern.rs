//! Patterns: classes of graphs.
//!
//! A pattern tells the engine where a graph's data lives and how the graph
//! is named, as path templates over ordered keys `${0}`, `${1}`, ... A
//! project typically has one pattern per production category (shots,
//! assets, ...).

use crate::attrs;
use crate::storage::{EntityCode, EntityRef, StorageAdapter, StorageResult};

/// Default graph content copied into a new graph the first time it is
/// opened. The template's own node tree is stored as an ordinary graph
/// under the reserved path key `*template*`.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphTemplate {
    pub uuid: String,
    pub name: String,
    /// Image shown when picking a template, empty for none.
    pub icon: String,
}

impl GraphTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            icon: String::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::GraphTemplate, &self.uuid)
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
}

/// Where graphs of one category live and how they are named.
///
/// # Path templates
///
/// ```text
/// /path/project/Shots/${0}/${0}_${1}
/// ```
///
/// declares two keys. A graph with keys `["0100", "1580"]` stores its data
/// under `/path/project/Shots/0100/0100_1580`.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub uuid: String,
    pub name: String,
    /// Directory template with `${i}` placeholders.
    pub pattern: String,
    /// Graph display-name template with `${i}` placeholders.
    pub graph_name: String,
    /// Display order among the project's patterns.
    pub order: i64,
    pub templates: Vec<GraphTemplate>,
}

impl Pattern {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            pattern: pattern.into(),
            graph_name: "${0}".to_string(),
            order: 0,
            templates: Vec::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Pattern, &self.uuid)
    }

    /// Number of `${i}` keys the path template declares.
    pub fn key_count(&self) -> usize {
        let mut n = 0;
        while self.pattern.contains(&format!("${{{n}}}")) {
            n += 1;
        }
        n
    }

    /// Fill the path template with the given keys.
    pub fn convert_path(&self, keys: &[String]) -> String {
        let mut path = self.pattern.clone();
        for (i, key) in keys.iter().enumerate() {
            path = path.replace(&format!("${{{i}}}"), key);
        }
        path
    }

    /// Fill the graph-name template with the given keys.
    pub fn convert_graph_name(&self, keys: &[String]) -> String {
        let mut name = self.graph_name.clone();
        for (i, key) in keys.iter().enumerate() {
            name = name.replace(&format!("${{{i}}}"), key);
        }
        name
    }

    pub fn template(&self, name: &str) -> Option<&GraphTemplate> {
        self.templates.iter().find(|t| t.name == name)
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

    pub async fn set_pattern(
        &mut self,
        store: &dyn StorageAdapter,
        pattern: impl Into<String>,
    ) -> StorageResult<()> {
        self.pattern = pattern.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "pattern" => self.pattern })
            .await
    }

    pub async fn set_graph_name(
        &mut self,
        store: &dyn StorageAdapter,
        graph_name: impl Into<String>,
    ) -> StorageResult<()> {
        self.graph_name = graph_name.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "graph_name" => self.graph_name })
            .await
    }

    pub async fn set_order(&mut self, store: &dyn StorageAdapter, order: i64) -> StorageResult<()> {
        self.order = order;
        store
            .set_attrs(&self.entity_ref(), attrs! { "order" => order })
            .await
    }

    /// Create the pattern and its templates in the store.
    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        project: &EntityRef,
    ) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                Some(project),
                EntityCode::Pattern,
                attrs! {
                    "name" => self.name,
                    "pattern" => self.pattern,
                    "graph_name" => self.graph_name,
                    "order" => self.order,
                },
            )
            .await?;
        let pattern_ref = self.entity_ref();
        for template in &mut self.templates {
            template.uuid = store
                .create_entity(
                    Some(&pattern_ref),
                    EntityCode::GraphTemplate,
                    attrs! { "name" => template.name, "icon" => template.icon },
                )
                .await?;
        }
        Ok(())
    }
}
