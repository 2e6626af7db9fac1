use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ten_conversion::{MsgAndResultConversion, MsgConversion, Rule};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub extension_name: String,
    pub addon_name: String,
    /// App this node runs on. `"localhost"` (the default) means the same
    /// app/process that is validating the graph; any other URI makes this
    /// node a remote bring-up target during `start_graph` (§4.8 step 4).
    #[serde(default = "GraphNode::default_app")]
    pub app: String,
}

impl GraphNode {
    fn default_app() -> String {
        ten_message::LOCALHOST.to_string()
    }

    pub fn is_local(&self, own_uri: &str) -> bool {
        self.app == own_uri || self.app == ten_message::LOCALHOST
    }
}

/// A fixed-path edge: messages named `cmd_name` leaving `src_extension` are
/// routed to `dest_extension`, optionally rewritten by `conversion` on the
/// way out and on the way the result comes back. Content-based routing
/// beyond this fixed-path shape is explicitly out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConnection {
    pub src_extension: String,
    pub cmd_name: String,
    pub dest_extension: String,
    /// App the destination extension lives on. Mirrors `GraphNode::app`;
    /// a non-local value means this edge's traffic crosses a `Remote`.
    #[serde(default = "GraphNode::default_app")]
    pub dest_app: String,
    #[serde(default)]
    pub conversion: Option<MsgAndResultConversion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDef {
    pub graph_id: String,
    pub nodes: Vec<GraphNode>,
    pub connections: Vec<GraphConnection>,
}

impl GraphDef {
    /// Matches the external `start_graph` JSON shape: a flat list of
    /// extension nodes naming their addon, and a flat list of fixed-path
    /// connections between them. Enforces the "single addon per extension"
    /// rule from §4.8 step 2: the same extension name may appear more than
    /// once (e.g. once per contributing predefined-graph fragment) only if
    /// every occurrence names the same addon.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut addon_by_name: HashMap<&str, &str> = HashMap::new();
        for node in &self.nodes {
            match addon_by_name.get(node.extension_name.as_str()) {
                Some(existing) if *existing != node.addon_name => {
                    return Err(GraphError::AddonMismatch(node.extension_name.clone()));
                }
                _ => {
                    addon_by_name.insert(&node.extension_name, &node.addon_name);
                }
            }
        }

        for conn in &self.connections {
            if !addon_by_name.contains_key(conn.src_extension.as_str()) {
                return Err(GraphError::UnknownExtension(conn.src_extension.clone()));
            }
            // A remote dest's extension lives in another app's node list,
            // not this one's, so it can't be checked here; `Engine` rejects
            // those lazily at dispatch time if no `Remote` answers for them.
            if conn.dest_app == ten_message::LOCALHOST
                && !addon_by_name.contains_key(conn.dest_extension.as_str())
            {
                return Err(GraphError::UnknownExtension(conn.dest_extension.clone()));
            }
        }

        Ok(())
    }

    pub fn extension_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.extension_name.as_str())
    }

    pub fn connections_from(&self, extension_name: &str) -> impl Iterator<Item = &GraphConnection> {
        self.connections
            .iter()
            .filter(move |c| c.src_extension == extension_name)
    }

    /// Remote app URIs this graph needs a `Remote` opened to, distinct and
    /// excluding `own_uri`/`"localhost"` — walked during §4.8 step 4.
    pub fn remote_app_uris(&self, own_uri: &str) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.nodes {
            if !node.is_local(own_uri) {
                seen.insert(node.app.clone());
            }
        }
        seen.into_iter().collect()
    }

    /// The subset of this graph's nodes/connections relevant to one remote
    /// app, sent as that app's child `start_graph` cmd (§4.8 step 4).
    pub fn subset_for_app(&self, app_uri: &str) -> GraphDef {
        let nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|n| n.app == app_uri)
            .cloned()
            .collect();
        let node_names: std::collections::HashSet<_> =
            nodes.iter().map(|n| n.extension_name.clone()).collect();
        let connections = self
            .connections
            .iter()
            .filter(|c| node_names.contains(&c.src_extension))
            .cloned()
            .collect();
        GraphDef {
            graph_id: self.graph_id.clone(),
            nodes,
            connections,
        }
    }
}

// ---------------------------------------------------------------------
// §6 External interface: the `start_graph` JSON under the reserved `ten`
// object, transcribed field-for-field. Parsed at the App boundary and
// translated into the flat `GraphDef`/`GraphConnection` shape routing
// actually runs on.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StartGraphEnvelope {
    pub ten: StartGraphCmdJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartGraphCmdJson {
    #[serde(rename = "type")]
    pub cmd_type: String,
    #[serde(default)]
    pub graph_id: Option<String>,
    #[serde(default)]
    pub predefined_graph_name: Option<String>,
    #[serde(default)]
    pub long_running_mode: bool,
    #[serde(default)]
    pub nodes: Vec<NodeJson>,
    #[serde(default)]
    pub connections: Vec<ConnectionJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeJson {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub addon: String,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub extension_group: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionJson {
    pub extension: String,
    #[serde(default)]
    pub cmd: Vec<MsgEdgeJson>,
    #[serde(default)]
    pub data: Vec<MsgEdgeJson>,
    #[serde(default)]
    pub audio_frame: Vec<MsgEdgeJson>,
    #[serde(default)]
    pub video_frame: Vec<MsgEdgeJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MsgEdgeJson {
    pub name: String,
    pub dest: Vec<DestJson>,
    #[serde(default)]
    pub msg_conversion: Option<MsgConversionJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestJson {
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub extension_group: Option<String>,
    pub extension: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MsgConversionJson {
    #[serde(rename = "type")]
    pub conversion_type: String,
    #[serde(default)]
    pub keep_original: bool,
    #[serde(default)]
    pub rules: Vec<RuleJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleJson {
    pub path: String,
    pub conversion_mode: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub original_path: Option<String>,
}

impl MsgConversionJson {
    fn into_msg_conversion(self) -> Result<MsgConversion, GraphError> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in self.rules {
            let parsed = match rule.conversion_mode.as_str() {
                "fixed_value" => Rule::FixedValue {
                    path: rule.path.into(),
                    value: json_to_property_value(rule.value.unwrap_or(serde_json::Value::Null)),
                },
                "from_original" => Rule::FromOriginal {
                    path: rule.path.into(),
                    original_path: rule
                        .original_path
                        .ok_or_else(|| GraphError::UnknownAddon("missing original_path".into()))?
                        .into(),
                },
                other => {
                    return Err(GraphError::UnknownAddon(format!("unknown conversion_mode {other}")))
                }
            };
            rules.push(parsed);
        }
        Ok(MsgConversion::new(rules, self.keep_original))
    }
}

fn json_to_property_value(value: serde_json::Value) -> ten_message::PropertyValue {
    use ten_message::PropertyValue as PV;
    match value {
        serde_json::Value::Null => PV::Invalid,
        serde_json::Value::Bool(b) => PV::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                PV::Int(i)
            } else {
                PV::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => PV::String(s),
        serde_json::Value::Array(arr) => PV::Array(arr.into_iter().map(json_to_property_value).collect()),
        serde_json::Value::Object(obj) => PV::Object(
            obj.into_iter()
                .map(|(k, v)| (k, json_to_property_value(v)))
                .collect(),
        ),
    }
}

/// Translates the external JSON `start_graph` shape into the flat
/// `GraphDef` the routing pipeline runs on. One `MsgEdgeJson` with N dests
/// fans out into N `GraphConnection` entries, each carrying its own copy
/// of the edge's conversion rules (consistent with §4.3: conversion is a
/// per-edge concern, not a per-fan-out-branch one).
pub fn graph_def_from_start_graph_cmd(
    graph_id: String,
    cmd: StartGraphCmdJson,
) -> Result<GraphDef, GraphError> {
    let nodes = cmd
        .nodes
        .into_iter()
        .map(|n| GraphNode {
            extension_name: n.name,
            addon_name: n.addon,
            app: n.app.unwrap_or_else(GraphNode::default_app),
        })
        .collect();

    let mut connections = Vec::new();
    for conn in cmd.connections {
        for edge in conn.cmd {
            push_connections(&mut connections, &conn.extension, edge)?;
        }
        for edge in conn.data {
            push_connections(&mut connections, &conn.extension, edge)?;
        }
        for edge in conn.audio_frame {
            push_connections(&mut connections, &conn.extension, edge)?;
        }
        for edge in conn.video_frame {
            push_connections(&mut connections, &conn.extension, edge)?;
        }
    }

    Ok(GraphDef {
        graph_id,
        nodes,
        connections,
    })
}

fn push_connections(
    out: &mut Vec<GraphConnection>,
    src_extension: &str,
    edge: MsgEdgeJson,
) -> Result<(), GraphError> {
    let conversion = match edge.msg_conversion {
        Some(mc) => Some(MsgAndResultConversion {
            msg_conversion: Some(mc.into_msg_conversion()?),
            result_conversion: None,
        }),
        None => None,
    };
    for dest in edge.dest {
        out.push(GraphConnection {
            src_extension: src_extension.to_string(),
            cmd_name: edge.name.clone(),
            dest_extension: dest.extension,
            dest_app: dest.app.unwrap_or_else(GraphNode::default_app),
            conversion: conversion.clone(),
        });
    }
    Ok(())
}

/// `start_graph`'s `graph_id` bookkeeping (§4.8 step 1): generate a fresh
/// UUID4 if the incoming cmd left it blank, otherwise adopt whatever the
/// upstream app already assigned so the whole fan-out shares one id.
pub fn resolve_graph_id(requested: Option<String>) -> String {
    requested.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> GraphNode {
        GraphNode {
            extension_name: name.to_string(),
            addon_name: format!("{name}_addon"),
            app: GraphNode::default_app(),
        }
    }

    fn conn(src: &str, cmd: &str, dest: &str) -> GraphConnection {
        GraphConnection {
            src_extension: src.to_string(),
            cmd_name: cmd.to_string(),
            dest_extension: dest.to_string(),
            dest_app: GraphNode::default_app(),
            conversion: None,
        }
    }

    #[test]
    fn empty_graph_is_rejected() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![],
            connections: vec![],
        };
        assert!(matches!(graph.validate(), Err(GraphError::Empty)));
    }

    /// S2: two nodes named `extension_1` bound to different addons must be
    /// rejected with a detail matching
    /// `/extension 'extension_1' is associated with different addon/`.
    #[test]
    fn same_name_different_addon_is_rejected() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![
                GraphNode {
                    extension_name: "extension_1".into(),
                    addon_name: "addon_a".into(),
                    app: GraphNode::default_app(),
                },
                GraphNode {
                    extension_name: "extension_1".into(),
                    addon_name: "addon_b".into(),
                    app: GraphNode::default_app(),
                },
            ],
            connections: vec![],
        };
        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("extension 'extension_1' is associated with different addon"));
    }

    #[test]
    fn same_name_same_addon_is_idempotent() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![node("a"), node("a")],
            connections: vec![],
        };
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn connection_to_unknown_local_extension_is_rejected() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![node("a")],
            connections: vec![conn("a", "ping", "ghost")],
        };
        assert!(matches!(graph.validate(), Err(GraphError::UnknownExtension(_))));
    }

    #[test]
    fn well_formed_graph_validates() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![node("a"), node("b")],
            connections: vec![conn("a", "ping", "b")],
        };
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn remote_dest_is_not_required_to_resolve_locally() {
        let mut remote_conn = conn("a", "ping", "b");
        remote_conn.dest_app = "msgpack://10.0.0.2:5570/".into();
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![node("a")],
            connections: vec![remote_conn],
        };
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn start_graph_json_fans_out_one_edge_per_dest() {
        let json = r#"{
            "ten": {
                "type": "start_graph",
                "nodes": [
                    {"type": "extension", "name": "a", "addon": "a_addon"},
                    {"type": "extension", "name": "b", "addon": "b_addon"},
                    {"type": "extension", "name": "c", "addon": "c_addon"}
                ],
                "connections": [
                    {
                        "extension": "a",
                        "cmd": [
                            {
                                "name": "ping",
                                "dest": [{"extension": "b"}, {"extension": "c"}]
                            }
                        ]
                    }
                ]
            }
        }"#;
        let envelope: StartGraphEnvelope = serde_json::from_str(json).unwrap();
        let graph = graph_def_from_start_graph_cmd("g1".into(), envelope.ten).unwrap();
        assert_eq!(graph.connections.len(), 2);
        assert!(graph.connections.iter().any(|c| c.dest_extension == "b"));
        assert!(graph.connections.iter().any(|c| c.dest_extension == "c"));
    }

    #[test]
    fn start_graph_json_parses_msg_conversion_rules() {
        let json = r#"{
            "ten": {
                "type": "start_graph",
                "nodes": [
                    {"type": "extension", "name": "src", "addon": "src_addon"},
                    {"type": "extension", "name": "dst", "addon": "dst_addon"}
                ],
                "connections": [
                    {
                        "extension": "src",
                        "data": [
                            {
                                "name": "evt",
                                "dest": [{"extension": "dst"}],
                                "msg_conversion": {
                                    "type": "per_property",
                                    "keep_original": false,
                                    "rules": [
                                        {"path": "k", "conversion_mode": "fixed_value", "value": 42}
                                    ]
                                }
                            }
                        ]
                    }
                ]
            }
        }"#;
        let envelope: StartGraphEnvelope = serde_json::from_str(json).unwrap();
        let graph = graph_def_from_start_graph_cmd("g1".into(), envelope.ten).unwrap();
        let conversion = graph.connections[0].conversion.as_ref().unwrap();
        let mut src_msg = ten_message::Msg::new_data("evt", ten_message::Location::localhost());
        src_msg.set_property(&"other".into(), 1i64.into());
        let converted = conversion.convert_msg(&src_msg);
        assert_eq!(converted.peek_property(&"k".into()).and_then(|v| v.as_int()), Some(42));
        assert!(converted.peek_property(&"other".into()).is_none());
    }

    #[test]
    fn resolve_graph_id_generates_when_absent() {
        let a = resolve_graph_id(None);
        let b = resolve_graph_id(None);
        assert_ne!(a, b);
        assert_eq!(resolve_graph_id(Some("fixed".into())), "fixed");
    }

    #[test]
    fn remote_app_uris_excludes_local_nodes() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![
                node("a"),
                GraphNode {
                    extension_name: "b".into(),
                    addon_name: "b_addon".into(),
                    app: "msgpack://10.0.0.2:5570/".into(),
                },
            ],
            connections: vec![],
        };
        assert_eq!(
            graph.remote_app_uris("msgpack://10.0.0.1:5570/"),
            vec!["msgpack://10.0.0.2:5570/".to_string()]
        );
    }

    #[test]
    fn subset_for_app_filters_nodes_and_connections() {
        let graph = GraphDef {
            graph_id: "g".into(),
            nodes: vec![
                node("a"),
                GraphNode {
                    extension_name: "b".into(),
                    addon_name: "b_addon".into(),
                    app: "msgpack://10.0.0.2:5570/".into(),
                },
            ],
            connections: vec![conn("a", "ping", "b")],
        };
        let subset = graph.subset_for_app("msgpack://10.0.0.2:5570/");
        assert_eq!(subset.nodes.len(), 1);
        assert_eq!(subset.nodes[0].extension_name, "b");
        assert!(subset.connections.is_empty());
    }
}
