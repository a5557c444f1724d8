//! Shared builders: a seeded project and opened graphs over an in-memory
//! store.

use mangrove::entities::{
    Action, Context, Graph, GraphTemplate, NodeType, Param, ParamKind, Pattern, Project, TypeFile,
};
use mangrove::session::SessionIdentity;
use mangrove::storage::MemoryStorage;

/// A project with one pattern `Shots` rooted at `root`, one type `comp`
/// (parameter `quality`, action `render`, output file `image`), and one
/// context `render`.
pub async fn seeded_project(store: &MemoryStorage, root: &str) -> Project {
    let mut project = Project::new("show");
    project.script = "mgvProjectHead = True".to_string();

    let mut pattern = Pattern::new("Shots", format!("{root}/Shots/${{0}}"));
    pattern.templates.push(GraphTemplate::new("default"));
    project.patterns.push(pattern);

    let mut ty = NodeType::new("comp");
    ty.context = "render".to_string();
    ty.type_files.push(TypeFile::new(
        "image",
        "${MGVNODEPATH}/img_v${MGVNODEVERSION}.exr",
    ));
    {
        let version = &mut ty.versions[0];
        version.script = "mgvTypeHead = True".to_string();
        version
            .parameters
            .push(Param::new("quality", ParamKind::Int, "8"));
        version
            .actions
            .push(Action::new("render", "mgvOutput = {'v': 1}"));
    }
    project.types.push(ty);

    project
        .contexts
        .push(Context::new("render", "RENDERER=internal"));

    project.create(store).await.unwrap();
    project
}

/// Open (create) a graph of the `Shots` pattern for a fresh session.
pub async fn open_graph(
    store: &MemoryStorage,
    project: &Project,
    keys: Vec<String>,
    user: &str,
) -> Graph {
    let name = project
        .pattern("Shots")
        .unwrap()
        .convert_graph_name(&keys);
    let session = SessionIdentity::new(user);
    let mut graph = Graph::new("Shots", keys, name, session);
    let pattern_ref = project.pattern("Shots").unwrap().entity_ref();
    graph.create(store, &pattern_ref).await.unwrap();
    graph
}
