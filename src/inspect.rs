//! Object-graph inspection (spec.md §4.3 "Object-graph inspection (the hard
//! algorithm)").
//!
//! DESIGN NOTES' "Cyclic object graph" note: the source relies on identity
//! of heap objects plus a reference-map to break cycles. Here the
//! materialised graph is an arena of [`InspectedNode`]s addressed by
//! [`NodeId`] rather than `Rc`/`Weak` — children hold indices, not owned
//! pointers, and `ref -> NodeId` is the exact analogue of the source's
//! reference map.

use crate::session::{DebugSession, VariablesFilter, VariablesQuery};
use crate::value::{PrimitiveValue, Variable, VariableKind};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Index into an [`InspectGraph`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One materialised node of an inspected object graph.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectedNode {
    Primitive(PrimitiveValue),
    /// Any non-primitive whose `type != "object"` (spec.md: "return their
    /// `valueAsString`"), or an object whose expansion was depth-cut.
    Opaque(Option<String>),
    Array { reference: i64, items: Vec<NodeId> },
    Object {
        reference: i64,
        fields: HashMap<String, NodeId>,
        /// Populated only when `inspectProto` is true and `__proto__`
        /// resolved to an object.
        proto: Option<NodeId>,
    },
}

/// An inspected object graph rooted at the handle passed to [`inspect`].
pub struct InspectGraph {
    arena: Vec<InspectedNode>,
    root: NodeId,
}

impl InspectGraph {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> &InspectedNode {
        &self.arena[id.0]
    }
}

/// Options for [`inspect`] (spec.md §4.3 `inspect(handle, {maxDepth=16,
/// inspectProto=false})`).
#[derive(Debug, Clone, Copy)]
pub struct InspectOptions {
    pub max_depth: u32,
    pub inspect_proto: bool,
}

impl Default for InspectOptions {
    fn default() -> Self {
        InspectOptions { max_depth: 16, inspect_proto: false }
    }
}

struct Shared<'a> {
    session: &'a DebugSession,
    opts: InspectOptions,
    arena: Mutex<Vec<Option<InspectedNode>>>,
    /// `ref -> NodeId`, populated *before* a node's children are fetched so
    /// concurrent siblings referencing the same unseen ref observe the
    /// reservation instead of each starting their own expansion.
    seen: Mutex<HashMap<i64, NodeId>>,
}

impl Shared<'_> {
    async fn reserve(&self, reference: i64, placeholder: InspectedNode) -> Option<NodeId> {
        let mut seen = self.seen.lock().await;
        if seen.contains_key(&reference) {
            return None;
        }
        let mut arena = self.arena.lock().await;
        let id = NodeId(arena.len());
        arena.push(Some(placeholder));
        seen.insert(reference, id);
        Some(id)
    }

    async fn fill(&self, id: NodeId, node: InspectedNode) {
        let mut arena = self.arena.lock().await;
        arena[id.0] = Some(node);
    }

    async fn existing(&self, reference: i64) -> Option<NodeId> {
        self.seen.lock().await.get(&reference).copied()
    }

    async fn push_leaf(&self, node: InspectedNode) -> NodeId {
        let mut arena = self.arena.lock().await;
        let id = NodeId(arena.len());
        arena.push(Some(node));
        id
    }
}

/// Recursively materialise `variable` into `shared`'s arena, honoring depth
/// bounding, prototype gating, and cycle safety. Boxed because it recurses
/// across an await point.
fn inspect_rec<'a>(
    shared: &'a Shared<'a>,
    variable: Variable,
    depth: u32,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = NodeId> + Send + 'a>> {
    Box::pin(async move {
        match &variable.kind {
            VariableKind::Primitive(p) => shared.push_leaf(InspectedNode::Primitive(p.clone())).await,
            VariableKind::Function | VariableKind::Opaque(_) => {
                shared.push_leaf(InspectedNode::Opaque(variable.value_as_string.clone())).await
            }
            VariableKind::Object { is_array, indexed_count } => {
                let reference = variable.reference;

                if let Some(existing) = shared.existing(reference).await {
                    return existing;
                }

                if depth == 0 {
                    return shared
                        .push_leaf(InspectedNode::Opaque(variable.value_as_string.clone()))
                        .await;
                }

                let is_array = *is_array;
                let placeholder = if is_array {
                    InspectedNode::Array { reference, items: vec![] }
                } else {
                    InspectedNode::Object { reference, fields: HashMap::new(), proto: None }
                };

                let Some(id) = shared.reserve(reference, placeholder).await else {
                    // Lost the race: someone else reserved it between our
                    // `existing` check and now. Spin to pick up their slot.
                    return inspect_rec(shared, variable, depth).await;
                };

                let query = if is_array {
                    VariablesQuery {
                        filter: Some(VariablesFilter::Indexed),
                        start: Some(0),
                        count: *indexed_count,
                    }
                } else {
                    VariablesQuery::default()
                };

                let children = match shared.session.inspect_variable(reference, query).await {
                    Ok(vars) => vars,
                    Err(_) => {
                        // Partial failure: leave the container empty rather
                        // than propagating (spec.md §4.3).
                        vec![]
                    }
                };

                if is_array {
                    let mut futures = FuturesUnordered::new();
                    for (index, child) in children.into_iter().enumerate() {
                        futures.push(async move {
                            let node_id = inspect_rec(shared, child, depth - 1).await;
                            (index, node_id)
                        });
                    }
                    let mut items_by_index = HashMap::new();
                    while let Some((index, node_id)) = futures.next().await {
                        items_by_index.insert(index, node_id);
                    }
                    let len = items_by_index.len();
                    let mut items = Vec::with_capacity(len);
                    for i in 0..len {
                        if let Some(node_id) = items_by_index.remove(&i) {
                            items.push(node_id);
                        }
                    }
                    shared.fill(id, InspectedNode::Array { reference, items }).await;
                } else {
                    let mut proto_child: Option<Variable> = None;
                    let mut named = vec![];
                    for child in children {
                        if child.name == "__proto__" {
                            if shared.opts.inspect_proto && child.is_object() {
                                proto_child = Some(child);
                            }
                            continue;
                        }
                        named.push(child);
                    }

                    let mut futures = FuturesUnordered::new();
                    for child in named {
                        let name = child.name.clone();
                        futures.push(async move {
                            let node_id = inspect_rec(shared, child, depth - 1).await;
                            (name, node_id)
                        });
                    }
                    let mut fields = HashMap::new();
                    while let Some((name, node_id)) = futures.next().await {
                        fields.insert(name, node_id);
                    }

                    let proto = match proto_child {
                        Some(child) => Some(inspect_rec(shared, child, depth - 1).await),
                        None => None,
                    };

                    shared.fill(id, InspectedNode::Object { reference, fields, proto }).await;
                }

                id
            }
        }
    })
}

/// Materialise `variable` into a cycle-safe, depth-bounded object graph.
pub async fn inspect(
    session: &DebugSession,
    variable: Variable,
    opts: InspectOptions,
) -> InspectGraph {
    let shared = Shared {
        session,
        opts,
        arena: Mutex::new(vec![]),
        seen: Mutex::new(HashMap::new()),
    };

    let root = inspect_rec(&shared, variable, opts.max_depth).await;
    let arena = shared.arena.into_inner();
    let arena = arena.into_iter().map(|n| n.expect("every reserved slot is filled")).collect();
    InspectGraph { arena, root }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use bytes::{BufMut, BytesMut};
    use serde_json::json;
    use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
    use tokio_util::codec::{Decoder, Encoder};

    fn encode(value: &serde_json::Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        crate::transport::FrameCodec.encode(value.clone(), &mut buf).unwrap();
        buf.to_vec()
    }

    fn primitive_leaf(name: &str, value: &str) -> Variable {
        Variable::from_wire(crate::value::RawVariableInfo {
            name: name.to_string(),
            value: Some(value.to_string()),
            ty: "integer".to_string(),
            variables_reference: 0,
            indexed_variables: None,
        })
    }

    fn object_var(name: &str, reference: i64) -> Variable {
        Variable::from_wire(crate::value::RawVariableInfo {
            name: name.to_string(),
            value: Some("[object Object]".to_string()),
            ty: "object".to_string(),
            variables_reference: reference,
            indexed_variables: None,
        })
    }

    /// Drives a fake debuggee that replies to `variables` requests from a
    /// caller-supplied table keyed by `variablesReference`.
    async fn serve_variables_table(
        mut server: impl AsyncRead + AsyncWrite + Unpin,
        table: HashMap<i64, serde_json::Value>,
    ) {
        let mut buf = BytesMut::new();
        let mut read_buf = [0u8; 4096];
        let mut codec = crate::transport::FrameCodec;
        loop {
            let n = match server.read(&mut read_buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&read_buf[..n]);
            while let Ok(Some(envelope)) = codec.decode(&mut buf) {
                let seq = envelope["request"]["request_seq"].as_i64().unwrap();
                let reference = envelope["request"]["args"]["variablesReference"].as_i64().unwrap();
                let body = table.get(&reference).cloned().unwrap_or(json!({"variables": []}));
                let resp = json!({"version":1,"type":"response","request_seq":seq,"body":body});
                if server.write_all(&encode(&resp)).await.is_err() {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn two_node_cycle_resolves_to_same_container_instance() {
        let (client, server) = duplex(16384);
        let conn = Connection::spawn_default(client);
        let session = DebugSession::new(conn);

        let mut table = HashMap::new();
        table.insert(
            1,
            json!({"variables": [
                {"name": "next", "type": "object", "variablesReference": 2, "value": "[object Object]"}
            ]}),
        );
        table.insert(
            2,
            json!({"variables": [
                {"name": "prev", "type": "object", "variablesReference": 1, "value": "[object Object]"}
            ]}),
        );
        tokio::spawn(serve_variables_table(server, table));

        let root_var = object_var("A", 1);
        let graph = inspect(&session, root_var, InspectOptions::default()).await;

        let root_id = graph.root();
        let InspectedNode::Object { fields, .. } = graph.get(root_id) else { panic!("expected object") };
        let next_id = *fields.get("next").unwrap();
        let InspectedNode::Object { fields: next_fields, .. } = graph.get(next_id) else { panic!("expected object") };
        let prev_id = *next_fields.get("prev").unwrap();

        assert_eq!(prev_id, root_id, "cycle must resolve to the same container instance");
    }

    #[tokio::test]
    async fn depth_bound_truncates_a_long_chain() {
        let (client, server) = duplex(16384);
        let conn = Connection::spawn_default(client);
        let session = DebugSession::new(conn);

        let mut table = HashMap::new();
        for i in 1..=100 {
            table.insert(
                i,
                json!({"variables": [
                    {"name": "next", "type": "object", "variablesReference": i + 1, "value": "[object Object]"}
                ]}),
            );
        }
        tokio::spawn(serve_variables_table(server, table));

        let root_var = object_var("root", 1);
        let graph = inspect(
            &session,
            root_var,
            InspectOptions { max_depth: 3, inspect_proto: false },
        )
        .await;

        let mut id = graph.root();
        for _ in 0..3 {
            let InspectedNode::Object { fields, .. } = graph.get(id) else { panic!("expected object") };
            id = *fields.get("next").unwrap();
        }
        assert!(matches!(graph.get(id), InspectedNode::Opaque(_)));
    }

    #[tokio::test]
    async fn indexed_array_materialises_in_order() {
        let (client, server) = duplex(16384);
        let conn = Connection::spawn_default(client);
        let session = DebugSession::new(conn);

        let mut table = HashMap::new();
        table.insert(
            1,
            json!({"variables": [
                {"name": "0", "type": "integer", "value": "10", "variablesReference": 0},
                {"name": "1", "type": "integer", "value": "20", "variablesReference": 0},
                {"name": "2", "type": "integer", "value": "30", "variablesReference": 0},
                {"name": "3", "type": "integer", "value": "40", "variablesReference": 0},
                {"name": "4", "type": "integer", "value": "50", "variablesReference": 0},
            ]}),
        );
        tokio::spawn(serve_variables_table(server, table));

        let root_var = Variable::from_wire(crate::value::RawVariableInfo {
            name: "arr".to_string(),
            value: Some("[object Array]".to_string()),
            ty: "object".to_string(),
            variables_reference: 1,
            indexed_variables: Some(5),
        });
        let graph = inspect(&session, root_var, InspectOptions::default()).await;

        let InspectedNode::Array { items, .. } = graph.get(graph.root()) else { panic!("expected array") };
        assert_eq!(items.len(), 5);
        let values: Vec<_> = items
            .iter()
            .map(|id| match graph.get(*id) {
                InspectedNode::Primitive(PrimitiveValue::Integer(n)) => *n,
                other => panic!("expected integer, got {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn failed_child_fetch_yields_empty_container_not_propagated_error() {
        let (client, server) = duplex(16384);
        let conn = Connection::spawn_default(client);
        let session = DebugSession::new(conn);

        // Empty table: every `variables` request gets `{"variables": []}`
        // back, simulating an expired reference without an error response
        // at the protocol layer (the connection layer already swallows
        // remote errors into Err, which this path short-circuits to empty).
        tokio::spawn(serve_variables_table(server, HashMap::new()));

        let root_var = object_var("root", 42);
        let graph = inspect(&session, root_var, InspectOptions::default()).await;

        let InspectedNode::Object { fields, .. } = graph.get(graph.root()) else { panic!("expected object") };
        assert!(fields.is_empty());
    }

    #[test]
    fn primitive_leaf_smoke() {
        let v = primitive_leaf("x", "5");
        assert!(v.primitive());
    }
}
