//! Node type schemas.
//!
//! A [`NodeType`] is the class of a node: the parameters its versions expose,
//! the actions they can run, and the output files they declare. Types are
//! themselves versioned ([`TypeVersion`]) so a node can pin the schema
//! revision it was authored against while the type keeps evolving.

use crate::attrs;
use crate::storage::{EntityCode, EntityRef, StorageAdapter, StorageResult};

/// Version id meaning "use the type's active version".
pub const ACTIVE_TYPE_VERSION: i64 = -1;

/// Value kind of a declared parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    String,
    Text,
    /// Executable code: the value is compiled into the node script with the
    /// `self`-handle preamble prepended.
    Code,
    File,
    Enum,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::String => "string",
            ParamKind::Text => "text",
            ParamKind::Code => "code",
            ParamKind::File => "file",
            ParamKind::Enum => "enum",
        }
    }

    /// Decode a persisted kind string, tolerating unknown values as `String`.
    pub fn decode(s: &str) -> Self {
        match s {
            "bool" => ParamKind::Bool,
            "int" => ParamKind::Int,
            "float" => ParamKind::Float,
            "text" => ParamKind::Text,
            // Legacy stores spell the code kind after its interpreter.
            "code" | "python" => ParamKind::Code,
            "file" => ParamKind::File,
            "enum" => ParamKind::Enum,
            _ => ParamKind::String,
        }
    }
}

/// A declared input of a type version.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub uuid: String,
    pub name: String,
    pub kind: ParamKind,
    /// Allowed values when `kind` is [`ParamKind::Enum`].
    pub enum_values: Vec<String>,
    /// Default value, stored unevaluated.
    pub default: String,
    /// Hidden parameters never expose overrides to callers.
    pub visibility: bool,
    pub advanced: bool,
    pub order: i64,
}

impl Param {
    pub fn new(name: impl Into<String>, kind: ParamKind, default: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            kind,
            enum_values: Vec::new(),
            default: default.into(),
            visibility: true,
            advanced: false,
            order: 0,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::TypeParameter, &self.uuid)
    }
}

/// A named script a node of this type can execute.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub uuid: String,
    pub name: String,
    /// Menu path, e.g. `"Render"` or `"Render|Farm"`.
    pub menu: String,
    pub command: String,
    /// Confirmation message shown before running, empty for none.
    pub warning: String,
    /// Comma-separated users allowed to see the action, empty for all.
    pub users: String,
    /// When set, the invoking layer must not start another action on this
    /// node until this one finishes.
    pub stack: bool,
    pub order: i64,
}

impl Action {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            menu: String::new(),
            command: command.into(),
            warning: String::new(),
            users: String::new(),
            stack: true,
            order: 0,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Action, &self.uuid)
    }
}

/// A named output artifact path template shared by all nodes of a type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeFile {
    pub uuid: String,
    pub name: String,
    /// Path template resolved through the node's variable environment.
    pub path: String,
    /// Whether the artifact is duplicated when the node is versioned.
    pub copy: bool,
}

impl TypeFile {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            path: path.into(),
            copy: true,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::TypeFile, &self.uuid)
    }
}

/// One revision of a type's schema: ordered parameters, actions, and the
/// type head script prepended to every node execution.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeVersion {
    pub uuid: String,
    pub id: i64,
    pub script: String,
    pub parameters: Vec<Param>,
    pub actions: Vec<Action>,
}

impl TypeVersion {
    pub fn new(id: i64) -> Self {
        Self {
            uuid: String::new(),
            id,
            script: String::new(),
            parameters: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::TypeVersion, &self.uuid)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&Param> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Restore declaration order after loading from an unordered store.
    pub(crate) fn sort_members(&mut self) {
        self.parameters.sort_by_key(|p| p.order);
        self.actions.sort_by_key(|a| a.order);
    }
}

/// The schema shared by all nodes of one kind.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeType {
    pub uuid: String,
    pub name: String,
    /// Name of the project context whose entries are injected into the
    /// environment of nodes of this type, empty for none.
    pub context: String,
    /// Uuids of types whose node versions stay synchronized with this
    /// type's when their nodes are linked.
    pub link_with: Vec<String>,
    pub type_files: Vec<TypeFile>,
    pub versions: Vec<TypeVersion>,
    /// Id of the active version; nodes without a pin follow this.
    pub version_active: i64,
}

impl NodeType {
    /// A new type with one empty version `0`, which is active.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            context: String::new(),
            link_with: Vec::new(),
            type_files: Vec::new(),
            versions: vec![TypeVersion::new(0)],
            version_active: 0,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Type, &self.uuid)
    }

    /// The version a node sees: `pin` when not [`ACTIVE_TYPE_VERSION`] and
    /// present, else the active version, else the newest one.
    pub fn version(&self, pin: i64) -> Option<&TypeVersion> {
        if pin != ACTIVE_TYPE_VERSION {
            if let Some(v) = self.versions.iter().find(|v| v.id == pin) {
                return Some(v);
            }
        }
        self.versions
            .iter()
            .find(|v| v.id == self.version_active)
            .or_else(|| self.versions.last())
    }

    pub fn script(&self, pin: i64) -> &str {
        self.version(pin).map_or("", |v| v.script.as_str())
    }

    pub fn actions(&self, pin: i64) -> &[Action] {
        self.version(pin).map_or(&[], |v| v.actions.as_slice())
    }

    pub fn action(&self, name: &str, pin: i64) -> Option<&Action> {
        self.version(pin).and_then(|v| v.action(name))
    }

    pub fn parameters(&self, pin: i64) -> &[Param] {
        self.version(pin).map_or(&[], |v| v.parameters.as_slice())
    }

    pub fn parameter(&self, name: &str, pin: i64) -> Option<&Param> {
        self.version(pin).and_then(|v| v.parameter(name))
    }

    pub fn type_file(&self, name: &str) -> Option<&TypeFile> {
        self.type_files.iter().find(|f| f.name == name)
    }

    /// Switch the active schema version and persist the change.
    pub async fn set_version_active(
        &mut self,
        store: &dyn StorageAdapter,
        id: i64,
    ) -> StorageResult<()> {
        if self.versions.iter().any(|v| v.id == id) {
            self.version_active = id;
            store
                .set_attrs(&self.entity_ref(), attrs! { "versionActive" => id })
                .await?;
        }
        Ok(())
    }

    /// Create the type and its whole schema hierarchy in the store.
    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        project: &EntityRef,
    ) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                Some(project),
                EntityCode::Type,
                attrs! {
                    "name" => self.name,
                    "context" => self.context,
                    "linkWith" => self.link_with.join(";"),
                    "versionActive" => self.version_active,
                },
            )
            .await?;
        let type_ref = self.entity_ref();
        for file in &mut self.type_files {
            file.uuid = store
                .create_entity(
                    Some(&type_ref),
                    EntityCode::TypeFile,
                    attrs! { "name" => file.name, "path" => file.path, "copy" => file.copy },
                )
                .await?;
        }
        for version in &mut self.versions {
            version.uuid = store
                .create_entity(
                    Some(&type_ref),
                    EntityCode::TypeVersion,
                    attrs! { "id" => version.id, "script" => version.script },
                )
                .await?;
            let version_ref = version.entity_ref();
            for param in &mut version.parameters {
                param.uuid = store
                    .create_entity(
                        Some(&version_ref),
                        EntityCode::TypeParameter,
                        attrs! {
                            "name" => param.name,
                            "type" => param.kind.as_str(),
                            "enum" => param.enum_values.join(";"),
                            "default" => param.default,
                            "visibility" => param.visibility,
                            "advanced" => param.advanced,
                            "order" => param.order,
                        },
                    )
                    .await?;
            }
            for action in &mut version.actions {
                action.uuid = store
                    .create_entity(
                        Some(&version_ref),
                        EntityCode::Action,
                        attrs! {
                            "name" => action.name,
                            "menu" => action.menu,
                            "command" => action.command,
                            "warning" => action.warning,
                            "users" => action.users,
                            "stack" => action.stack,
                            "order" => action.order,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_version_wins_over_active() {
        let mut ty = NodeType::new("comp");
        ty.versions.push(TypeVersion::new(1));
        ty.version_active = 1;
        assert_eq!(ty.version(0).unwrap().id, 0);
        assert_eq!(ty.version(ACTIVE_TYPE_VERSION).unwrap().id, 1);
        // Unknown pin falls back to the active version.
        assert_eq!(ty.version(9).unwrap().id, 1);
    }

    #[test]
    fn param_kind_decodes_legacy_spelling() {
        assert_eq!(ParamKind::decode("python"), ParamKind::Code);
        assert_eq!(ParamKind::decode("unknown"), ParamKind::String);
    }
}
